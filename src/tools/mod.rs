//! Tool descriptors, the tool catalog, and the [`Tool`] capability trait.
//!
//! A tool is anything that can describe itself with a [`ToolDescriptor`]
//! and execute a JSON argument object.  Two variants exist:
//! [`executable::ExecutableTool`] (an external program in the tools
//! directory, spawned per call) and [`native::NativeTool`] (an in-process
//! async handler).  [`discovery`] builds a [`Catalog`] from a directory;
//! [`dispatch`] validates calls against it and executes them.

pub mod discovery;
pub mod dispatch;
pub mod executable;
pub mod native;
pub mod parsing;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use discovery::{discover_all, discover_one, DiscoveryError, DiscoveryReport};
pub use dispatch::{validate, DispatchError, Dispatcher, ValidationError};
pub use executable::ExecutableTool;
pub use native::NativeTool;

/// Argument passed to a tool executable to request its descriptor.
pub const DESCRIBE_FLAG: &str = "--describe";

/// Environment variable set to `1` on spawned tools when stub mode is on.
pub const STUB_ENV: &str = "PINCER_STUB_MODE";

// ── Descriptor types ─────────────────────────────────────────

/// Schema of a single tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// JSON type name (`"string"`, `"boolean"`, `"number"`, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Allowed values, when the parameter is an enumeration.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// The `parameters` object of a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Always `"object"`.
    #[serde(rename = "type", default = "default_object")]
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    /// Parameter names that must be present in every call.
    #[serde(default)]
    pub required: Vec<String>,
}

fn default_object() -> String {
    "object".into()
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self {
            kind: default_object(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

/// JSON metadata a tool emits about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique (within a catalog) machine-friendly name.
    pub name: String,
    /// Human-readable one-liner.
    pub description: String,
    pub parameters: ParameterSchema,
}

impl ToolDescriptor {
    /// The descriptor keys that must be present and non-null.
    pub const REQUIRED_KEYS: [&'static str; 3] = ["name", "description", "parameters"];

    /// Parse a descriptor from raw describe-mode output.
    pub fn parse(raw: &str) -> Result<Self, DescriptorProblem> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| DescriptorProblem::Invalid(e.to_string()))?;
        let obj = value.as_object().ok_or_else(|| {
            DescriptorProblem::Invalid("descriptor is not a JSON object".to_string())
        })?;

        let missing: Vec<String> = Self::REQUIRED_KEYS
            .iter()
            .filter(|k| obj.get(**k).map_or(true, Value::is_null))
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DescriptorProblem::Missing(missing));
        }

        serde_json::from_value(value).map_err(|e| DescriptorProblem::Invalid(e.to_string()))
    }
}

/// Why raw describe output did not yield a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorProblem {
    /// Required keys absent or null.
    Missing(Vec<String>),
    /// Not JSON, not an object, or a key has the wrong shape.
    Invalid(String),
}

// ── Catalog ──────────────────────────────────────────────────

/// Ordered sequence of validated descriptors from one discovery pass.
///
/// Repeated names are legal; lookups return the first match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    tools: Vec<ToolDescriptor>,
}

impl Catalog {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    /// First descriptor whose name matches exactly.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ToolDescriptor> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Prompt fragment listing every tool and the calling convention the
    /// orchestrator understands.  Empty when the catalog is empty.
    pub fn prompt_block(&self) -> String {
        if self.tools.is_empty() {
            return String::new();
        }
        let tools_json =
            serde_json::to_string_pretty(&self.tools).unwrap_or_else(|_| "[]".to_string());
        format!(
            "The following tools are available:\n\n```tools_metadata\n{tools_json}\n```\n\n\
             To call a tool, reply with ONLY a fenced json block of the form\n\
             ```json\n{{\"name\": \"<tool>\", \"args\": {{...}}}}\n```\n\
             and nothing else. You will receive the tool output in the next message."
        )
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a ToolDescriptor;
    type IntoIter = std::slice::Iter<'a, ToolDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tools.iter()
    }
}

// ── Invocation ───────────────────────────────────────────────

/// Raw result of one tool execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Per-runtime settings for spawned tools.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    /// Upper bound on a describe-mode call.
    pub describe_timeout: Duration,
    /// Upper bound on an execute-mode call.
    pub execute_timeout: Duration,
    /// When set, spawned tools receive `PINCER_STUB_MODE=1`.
    pub stub_mode: bool,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            describe_timeout: Duration::from_secs(5),
            execute_timeout: Duration::from_secs(30),
            stub_mode: false,
        }
    }
}

/// A callable capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name used for dispatch lookups.
    fn name(&self) -> &str;

    /// Produce this tool's descriptor.
    async fn describe(&self) -> Result<ToolDescriptor, DiscoveryError>;

    /// Run the tool with a JSON argument object.
    ///
    /// A non-zero `exit_status` is returned as `Ok`; only failures to run
    /// at all (spawn errors, timeouts) are `Err`.
    async fn execute(&self, args: &Value) -> Result<ToolOutput, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather() -> ToolDescriptor {
        ToolDescriptor::parse(
            r#"{"name":"get_weather","description":"Weather lookup",
                "parameters":{"type":"object",
                  "properties":{"location":{"type":"string","description":"City"},
                                "units":{"type":"string","enum":["c","f"],"default":"c"}},
                  "required":["location"]}}"#,
        )
        .unwrap()
    }

    #[test]
    fn parse_full_descriptor() {
        let d = weather();
        assert_eq!(d.name, "get_weather");
        assert_eq!(d.parameters.kind, "object");
        assert_eq!(d.parameters.required, vec!["location"]);
        let units = &d.parameters.properties["units"];
        assert_eq!(units.allowed.as_ref().unwrap().len(), 2);
        assert_eq!(units.default, Some(json!("c")));
    }

    #[test]
    fn parse_reports_missing_and_null_keys() {
        let err = ToolDescriptor::parse(r#"{"name":"x","description":null}"#).unwrap_err();
        assert_eq!(
            err,
            DescriptorProblem::Missing(vec!["description".to_string(), "parameters".to_string()])
        );
    }

    #[test]
    fn parse_rejects_non_objects() {
        assert!(matches!(
            ToolDescriptor::parse("[1,2]"),
            Err(DescriptorProblem::Invalid(_))
        ));
        assert!(matches!(
            ToolDescriptor::parse("not json"),
            Err(DescriptorProblem::Invalid(_))
        ));
    }

    #[test]
    fn reserialize_preserves_identity() {
        let d = weather();
        let again = ToolDescriptor::parse(&serde_json::to_string(&d).unwrap()).unwrap();
        assert_eq!(again.name, d.name);
        assert_eq!(again.description, d.description);
        assert_eq!(again.parameters.required, d.parameters.required);
    }

    #[test]
    fn catalog_lookup_uses_first_match() {
        let mut second = weather();
        second.description = "shadowed".into();
        let catalog = Catalog::new(vec![weather(), second]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("get_weather").unwrap().description, "Weather lookup");
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn prompt_block_empty_for_empty_catalog() {
        assert!(Catalog::default().prompt_block().is_empty());
        let block = Catalog::new(vec![weather()]).prompt_block();
        assert!(block.contains("get_weather"));
        assert!(block.contains("```json"));
    }
}
