//! In-process tools.
//!
//! A [`NativeTool`] pairs a fixed descriptor with an async handler.  It
//! goes through the same catalog, validation and dispatch path as an
//! executable tool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{DiscoveryError, DispatchError, Tool, ToolDescriptor, ToolOutput};

/// Handler for a native tool: receives the owned argument object and
/// returns a JSON value or an error.
pub type NativeHandler = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>> + Send + Sync,
>;

/// A tool implemented in Rust.
#[derive(Clone)]
pub struct NativeTool {
    descriptor: ToolDescriptor,
    handler: NativeHandler,
}

impl std::fmt::Debug for NativeTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTool")
            .field("name", &self.descriptor.name)
            .finish_non_exhaustive()
    }
}

impl NativeTool {
    pub fn new(descriptor: ToolDescriptor, handler: NativeHandler) -> Self {
        Self {
            descriptor,
            handler,
        }
    }

    /// Convenience constructor from a plain async function.
    pub fn from_fn<F, Fut>(descriptor: ToolDescriptor, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: NativeHandler = Arc::new(move |args| Box::pin(f(args)));
        Self::new(descriptor, handler)
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl Tool for NativeTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    async fn describe(&self) -> Result<ToolDescriptor, DiscoveryError> {
        Ok(self.descriptor.clone())
    }

    async fn execute(&self, args: &Value) -> Result<ToolOutput, DispatchError> {
        match (self.handler)(args.clone()).await {
            Ok(Value::String(s)) => Ok(ToolOutput {
                stdout: s,
                stderr: String::new(),
                exit_status: 0,
            }),
            Ok(other) => Ok(ToolOutput {
                stdout: other.to_string(),
                stderr: String::new(),
                exit_status: 0,
            }),
            Err(e) => Ok(ToolOutput {
                stdout: String::new(),
                stderr: format!("{e:#}"),
                exit_status: 1,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> NativeTool {
        let descriptor = ToolDescriptor::parse(
            r#"{"name":"echo","description":"Echo text",
                "parameters":{"type":"object",
                  "properties":{"text":{"type":"string"}},"required":["text"]}}"#,
        )
        .unwrap();
        NativeTool::from_fn(descriptor, |args| async move {
            match args.get("text").and_then(Value::as_str) {
                Some("fail") => anyhow::bail!("refusing to echo"),
                Some(t) => Ok(Value::String(t.to_string())),
                None => Ok(json!({"echo": null})),
            }
        })
    }

    #[tokio::test]
    async fn string_result_is_stdout() {
        let out = echo().execute(&json!({"text": "hi"})).await.unwrap();
        assert_eq!(out.stdout, "hi");
        assert!(out.success());
    }

    #[tokio::test]
    async fn structured_result_is_json() {
        let out = echo().execute(&json!({})).await.unwrap();
        assert_eq!(out.stdout, r#"{"echo":null}"#);
    }

    #[tokio::test]
    async fn handler_error_is_exit_one() {
        let out = echo().execute(&json!({"text": "fail"})).await.unwrap();
        assert_eq!(out.exit_status, 1);
        assert_eq!(out.stderr, "refusing to echo");
    }
}
