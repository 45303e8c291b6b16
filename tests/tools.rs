//! Discovery, validation and dispatch against real executables.
#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use pincer::logs::{self, EventLog};
use pincer::tools::{
    discover_all, discover_one, validate, DiscoveryError, DispatchError, Dispatcher, NativeTool,
    ToolDescriptor, ToolSettings, ValidationError,
};
use serde_json::json;
use tempfile::TempDir;

fn stub_settings() -> ToolSettings {
    ToolSettings {
        stub_mode: true,
        ..ToolSettings::default()
    }
}

// ── Discovery ────────────────────────────────────────────────

#[tokio::test]
async fn broken_tool_is_excluded_from_catalog() {
    let dir = TempDir::new().unwrap();
    common::write_get_weather(dir.path());
    common::write_broken(dir.path());

    let report = discover_all(dir.path(), &ToolSettings::default())
        .await
        .unwrap();

    assert_eq!(report.catalog.len(), 1);
    assert_eq!(report.catalog.names(), vec!["get_weather"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].kind(), "describe_failed");
    assert!(report.skipped[0]
        .path()
        .ends_with("broken_tool.sh"));
}

#[tokio::test]
async fn catalog_holds_only_the_valid_tools() {
    let dir = TempDir::new().unwrap();
    for name in ["alpha", "beta", "gamma"] {
        common::write_echo(dir.path(), name);
    }
    common::write_broken(dir.path());
    common::write_script(dir.path(), "garbage.sh", "echo 'not json'");
    common::write_script(dir.path(), "silent.sh", "exit 0");
    common::write_tool(
        dir.path(),
        "nameless.sh",
        r#"{"description":"x","parameters":{"type":"object"}}"#,
        "exit 0",
    );
    std::fs::write(dir.path().join("README.md"), "not a tool").unwrap();

    let report = discover_all(dir.path(), &ToolSettings::default())
        .await
        .unwrap();

    assert_eq!(report.catalog.names(), vec!["alpha", "beta", "gamma"]);
    let mut kinds: Vec<&str> = report.skipped.iter().map(DiscoveryError::kind).collect();
    kinds.sort();
    assert_eq!(
        kinds,
        vec!["describe_failed", "empty_output", "invalid_json", "missing_fields"]
    );
}

#[tokio::test]
async fn missing_fields_are_named() {
    let dir = TempDir::new().unwrap();
    let path = common::write_tool(dir.path(), "half.sh", r#"{"name":"half"}"#, "exit 0");

    match discover_one(&path, &ToolSettings::default()).await {
        Err(DiscoveryError::MissingFields { fields, .. }) => {
            assert_eq!(fields, vec!["description", "parameters"]);
        }
        other => panic!("expected MissingFields, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_describe_times_out() {
    let dir = TempDir::new().unwrap();
    let path = common::write_script(dir.path(), "sleepy.sh", "sleep 5");
    let settings = ToolSettings {
        describe_timeout: Duration::from_millis(200),
        ..ToolSettings::default()
    };

    let err = discover_one(&path, &settings).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
}

#[tokio::test]
async fn missing_directory_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = discover_all(&dir.path().join("nope"), &ToolSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::NotFound { .. }));
}

#[tokio::test]
async fn empty_directory_gives_empty_catalog() {
    let dir = TempDir::new().unwrap();
    let report = discover_all(dir.path(), &ToolSettings::default())
        .await
        .unwrap();
    assert!(report.catalog.is_empty());
    assert!(report.skipped.is_empty());
}

// ── Validation ───────────────────────────────────────────────

#[tokio::test]
async fn validate_checks_required_fields() {
    let dir = TempDir::new().unwrap();
    common::write_get_weather(dir.path());
    let catalog = discover_all(dir.path(), &ToolSettings::default())
        .await
        .unwrap()
        .catalog;

    assert_eq!(
        validate(&catalog, "get_weather", &json!({"location": "NYC"})),
        Ok(())
    );
    assert_eq!(
        validate(&catalog, "get_weather", &json!({})),
        Err(ValidationError::MissingRequired {
            tool: "get_weather".into(),
            fields: vec!["location".into()],
        })
    );
    assert_eq!(
        validate(&catalog, "ghost_tool", &json!({})),
        Err(ValidationError::UnknownTool("ghost_tool".into()))
    );
}

// ── Dispatch ─────────────────────────────────────────────────

#[tokio::test]
async fn stub_mode_dispatch_is_deterministic() {
    let dir = TempDir::new().unwrap();
    common::write_get_weather(dir.path());
    let dispatcher = Dispatcher::new(dir.path(), stub_settings());

    let out = dispatcher
        .dispatch("get_weather", &json!({"location": "NYC"}))
        .await
        .unwrap();
    assert!(out.contains("NYC"), "{out}");
    assert!(out.contains("Sunny (stub)"), "{out}");

    let again = dispatcher
        .dispatch("get_weather", &json!({"location": "NYC"}))
        .await
        .unwrap();
    assert_eq!(out, again);
}

#[tokio::test]
async fn unknown_tool_is_not_found() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(dir.path(), stub_settings());
    let err = dispatcher.dispatch("ghost_tool", &json!({})).await.unwrap_err();
    assert!(matches!(err, DispatchError::ToolNotFound(ref n) if n == "ghost_tool"));
}

#[tokio::test]
async fn path_like_names_never_execute() {
    let dir = TempDir::new().unwrap();
    let inner = dir.path().join("tools");
    std::fs::create_dir(&inner).unwrap();
    common::write_echo(dir.path(), "outside");

    let dispatcher = Dispatcher::new(&inner, ToolSettings::default());
    for name in ["../outside", "../outside.sh", "/bin/sh", ".hidden"] {
        let err = dispatcher.dispatch(name, &json!({})).await.unwrap_err();
        assert!(matches!(err, DispatchError::ToolNotFound(_)), "{name}");
    }
}

#[tokio::test]
async fn non_zero_exit_carries_stderr() {
    let dir = TempDir::new().unwrap();
    common::write_get_weather(dir.path());
    let dispatcher = Dispatcher::new(dir.path(), ToolSettings::default());

    let err = dispatcher
        .dispatch("get_weather", &json!({"location": "NYC"}))
        .await
        .unwrap_err();
    match &err {
        DispatchError::ExecutionFailed {
            stderr,
            exit_status,
            ..
        } => {
            assert_eq!(stderr, "weather service unavailable");
            assert_eq!(*exit_status, 2);
        }
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }
    assert_eq!(err.user_message(), "weather service unavailable");
}

#[tokio::test]
async fn silent_failure_still_has_a_message() {
    let dir = TempDir::new().unwrap();
    common::write_tool(
        dir.path(),
        "quiet.sh",
        r#"{"name":"quiet","description":"d","parameters":{"type":"object"}}"#,
        "exit 3",
    );
    let dispatcher = Dispatcher::new(dir.path(), ToolSettings::default());
    let err = dispatcher.dispatch("quiet", &json!({})).await.unwrap_err();
    assert_eq!(err.user_message(), "tool quiet failed with exit status 3");
}

#[tokio::test]
async fn slow_tool_times_out() {
    let dir = TempDir::new().unwrap();
    common::write_tool(
        dir.path(),
        "slow.sh",
        r#"{"name":"slow","description":"d","parameters":{"type":"object"}}"#,
        "sleep 5",
    );
    let settings = ToolSettings {
        execute_timeout: Duration::from_millis(200),
        ..ToolSettings::default()
    };
    let dispatcher = Dispatcher::new(dir.path(), settings);
    let err = dispatcher.dispatch("slow", &json!({})).await.unwrap_err();
    assert!(matches!(err, DispatchError::Timeout { .. }), "{err:?}");
}

#[tokio::test]
async fn arguments_arrive_as_one_json_argument() {
    let dir = TempDir::new().unwrap();
    common::write_echo(dir.path(), "echo");
    let dispatcher = Dispatcher::new(dir.path(), ToolSettings::default());

    let out = dispatcher
        .dispatch("echo", &json!({"text": "hello world"}))
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed, json!({"text": "hello world"}));
}

#[tokio::test]
async fn stdout_is_returned_verbatim() {
    let dir = TempDir::new().unwrap();
    common::write_tool(
        dir.path(),
        "table.sh",
        r#"{"name":"table","description":"d","parameters":{"type":"object"}}"#,
        r#"printf '  indented\n  table\n\n'"#,
    );
    let dispatcher = Dispatcher::new(dir.path(), ToolSettings::default());

    let out = dispatcher.dispatch("table", &json!({})).await.unwrap();
    assert_eq!(out, "  indented\n  table\n\n");
}

#[tokio::test]
async fn oversized_stdout_is_capped() {
    let dir = TempDir::new().unwrap();
    common::write_tool(
        dir.path(),
        "flood.sh",
        r#"{"name":"flood","description":"d","parameters":{"type":"object"}}"#,
        "head -c 300000 /dev/zero | tr '\\000' 'a'",
    );
    let dispatcher = Dispatcher::new(dir.path(), ToolSettings::default());

    let out = dispatcher.dispatch("flood", &json!({})).await.unwrap();
    assert!(out.ends_with('…'));
    assert_eq!(out.trim_end_matches('…').len(), 256 * 1024);
}

#[tokio::test]
async fn checked_dispatch_rejects_before_running() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("ran");
    common::write_tool(
        dir.path(),
        "touchy.sh",
        r#"{"name":"touchy","description":"d","parameters":{"type":"object","required":["path"]}}"#,
        "touch ran",
    );
    let dispatcher = Dispatcher::new(dir.path(), ToolSettings::default());
    let catalog = dispatcher.discover().await.unwrap().catalog;

    let err = dispatcher
        .dispatch_checked(&catalog, "touchy", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Validation(ValidationError::MissingRequired { .. })
    ));
    assert!(!marker.exists());
}

#[tokio::test]
async fn native_tools_come_first_and_dispatch() {
    let dir = TempDir::new().unwrap();
    common::write_echo(dir.path(), "echo");
    let descriptor = ToolDescriptor::parse(
        r#"{"name":"clock","description":"Fixed time","parameters":{"type":"object"}}"#,
    )
    .unwrap();
    let clock = NativeTool::from_fn(descriptor, |_args| async { Ok(json!("12:00")) });
    let dispatcher =
        Dispatcher::new(dir.path(), ToolSettings::default()).with_native_tool(Arc::new(clock));

    let report = dispatcher.discover().await.unwrap();
    assert_eq!(report.catalog.names(), vec!["clock", "echo"]);
    assert_eq!(dispatcher.dispatch("clock", &json!({})).await.unwrap(), "12:00");
}

#[tokio::test]
async fn dispatch_events_are_logged_in_order() {
    let dir = TempDir::new().unwrap();
    common::write_get_weather(dir.path());
    let log_path = dir.path().join("logs").join("events.jsonl");
    let events = Arc::new(EventLog::new(&log_path, "pincer"));
    let dispatcher = Dispatcher::new(dir.path(), stub_settings()).with_event_log(events);

    dispatcher
        .dispatch("get_weather", &json!({"location": "Oslo"}))
        .await
        .unwrap();
    dispatcher.dispatch("ghost_tool", &json!({})).await.unwrap_err();

    let logged = logs::read_events(&log_path).await.unwrap();
    let kinds: Vec<&str> = logged.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(
        kinds,
        vec![
            logs::TOOL_DISPATCH,
            logs::TOOL_RESULT,
            logs::TOOL_DISPATCH,
            logs::TOOL_ERROR
        ]
    );
    assert!(logged.iter().all(|e| e.agent == "pincer"));
    assert!(logged[1].message.contains("Oslo"));
    assert!(logged[3].message.contains("ghost_tool"));
}

// ── Bundled demo tools ───────────────────────────────────────

#[tokio::test]
async fn demo_tools_describe_and_stub() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/tools");
    let dispatcher = Dispatcher::new(&dir, stub_settings());

    let report = dispatcher.discover().await.unwrap();
    assert_eq!(report.catalog.names(), vec!["disk_usage", "get_weather"]);
    assert!(report.skipped.is_empty());

    let weather = dispatcher
        .dispatch_checked(&report.catalog, "get_weather", &json!({"location": "NYC"}))
        .await
        .unwrap();
    assert!(weather.contains("NYC") && weather.contains("Sunny (stub)"));

    let disk = dispatcher
        .dispatch_checked(&report.catalog, "disk_usage", &json!({}))
        .await
        .unwrap();
    assert!(disk.contains("\"use_percent\":\"42%\""), "{disk}");
}
