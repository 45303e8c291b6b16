//! Pure string-parsing helpers for extracting tool-call blocks from LLM
//! replies.
//!
//! The orchestrator asks the model to request a tool by replying with a
//! single fenced ```` ```json ```` block `{"name": ..., "args": {...}}`.

use serde::Deserialize;
use serde_json::Value;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

/// Extract the first ` ```json ` fenced code block and the remaining
/// (surrounding) text from `reply`.
///
/// Returns `Some((json_content, remaining_text))` when a fenced block
/// is found.  `remaining_text` is built by stripping the fenced block
/// and trimming; it may be empty.
pub fn extract_tool_call_block(reply: &str) -> Option<(String, String)> {
    let text = reply.replace("\r\n", "\n");
    let open = text.find("```json")?;
    let after_tag = &text[open + 7..];
    let nl = after_tag.find('\n')?;
    let inner_start = open + 7 + nl + 1;
    let inner_text = &text[inner_start..];
    let close = inner_text.find("\n```")?;
    let json_content = inner_text[..close].to_string();

    let block_end = inner_start + close + 4;
    let before = text[..open].trim();
    let after = text.get(block_end..).unwrap_or("").trim();
    let remaining = match (before.is_empty(), after.is_empty()) {
        (true, _) => after.to_string(),
        (false, true) => before.to_string(),
        (false, false) => format!("{before}\n{after}"),
    };

    Some((json_content, remaining))
}

/// Inner content of the first ` ```json ` fenced block, if any.
pub fn extract_fenced_json(reply: &str) -> Option<String> {
    extract_tool_call_block(reply).map(|(json, _)| json)
}

/// `true` when `reply` is exactly one fenced json block (plus whitespace).
pub fn is_tool_call_only(reply: &str) -> bool {
    matches!(extract_tool_call_block(reply), Some((_, rest)) if rest.is_empty())
}

/// Parse `reply` as a tool request.
///
/// Only replies consisting solely of a fenced json block whose content
/// is an object with a string `name` qualify; anything else is treated
/// as a normal answer.
pub fn parse_tool_request(reply: &str) -> Option<ToolRequest> {
    let (json, rest) = extract_tool_call_block(reply)?;
    if !rest.is_empty() {
        return None;
    }
    let req: ToolRequest = serde_json::from_str(json.trim()).ok()?;
    if req.name.trim().is_empty() {
        return None;
    }
    Some(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_fenced_json() {
        let input = "```json\n{\"name\": \"get_weather\", \"args\": {\"location\": \"NYC\"}}\n```";
        assert_eq!(
            extract_fenced_json(input).unwrap(),
            "{\"name\": \"get_weather\", \"args\": {\"location\": \"NYC\"}}"
        );
        assert!(is_tool_call_only(input));
    }

    #[test]
    fn surrounding_text_is_not_a_call() {
        let input = "Let me check.\n```json\n{\"name\": \"get_weather\"}\n```\nDone.";
        let (_, rest) = extract_tool_call_block(input).unwrap();
        assert_eq!(rest, "Let me check.\nDone.");
        assert!(!is_tool_call_only(input));
        assert!(parse_tool_request(input).is_none());
    }

    #[test]
    fn crlf_line_endings() {
        let input = "```json\r\n{\"name\": \"disk_usage\"}\r\n```";
        assert_eq!(extract_fenced_json(input).unwrap(), "{\"name\": \"disk_usage\"}");
    }

    #[test]
    fn request_defaults_args_to_empty_object() {
        let req = parse_tool_request("\n```json\n{\"name\": \"disk_usage\"}\n```\n").unwrap();
        assert_eq!(req.name, "disk_usage");
        assert_eq!(req.args, json!({}));
    }

    #[test]
    fn non_request_json_is_ignored() {
        assert!(parse_tool_request("```json\n[1, 2]\n```").is_none());
        assert!(parse_tool_request("```json\n{\"name\": \"\"}\n```").is_none());
        assert!(parse_tool_request("plain answer").is_none());
    }
}
