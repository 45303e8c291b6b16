//! Shared fixtures: shell-script tools written into a temp directory.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub const GET_WEATHER_DESCRIPTOR: &str = r#"{"name":"get_weather","description":"Current weather for a location","parameters":{"type":"object","properties":{"location":{"type":"string","description":"City name"},"units":{"type":"string","enum":["c","f"]}},"required":["location"]}}"#;

/// Write an executable `#!/bin/sh` script named `file` into `dir`.
pub fn write_script(dir: &Path, file: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(file);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A script that prints `descriptor` in describe mode and runs `run`
/// otherwise.
pub fn write_tool(dir: &Path, file: &str, descriptor: &str, run: &str) -> PathBuf {
    write_script(
        dir,
        file,
        &format!(
            "if [ \"$1\" = \"--describe\" ]; then\ncat <<'EOF'\n{descriptor}\nEOF\nexit 0\nfi\n{run}"
        ),
    )
}

/// The weather tool: stub output echoes the location, live mode fails.
pub fn write_get_weather(dir: &Path) -> PathBuf {
    write_tool(
        dir,
        "get_weather.sh",
        GET_WEATHER_DESCRIPTOR,
        r#"loc=$(printf '%s' "$1" | sed -n 's/.*"location"[[:space:]]*:[[:space:]]*"\([^"]*\)".*/\1/p')
if [ "$PINCER_STUB_MODE" = "1" ]; then
  printf '{"location":"%s","condition":"Sunny (stub)","temp_c":21}\n' "$loc"
  exit 0
fi
echo "weather service unavailable" >&2
exit 2"#,
    )
}

/// A tool whose describe mode exits 1.
pub fn write_broken(dir: &Path) -> PathBuf {
    write_script(dir, "broken_tool.sh", "echo 'describe not supported' >&2\nexit 1")
}

/// A minimal valid tool named `name` with no required parameters.
pub fn write_echo(dir: &Path, name: &str) -> PathBuf {
    write_tool(
        dir,
        &format!("{name}.sh"),
        &format!(
            r#"{{"name":"{name}","description":"Echo the arguments","parameters":{{"type":"object","properties":{{}},"required":[]}}}}"#
        ),
        r#"printf '%s\n' "$1""#,
    )
}
