//! Wire shapes for a single-turn Messages call that forces one tool.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub(crate) struct ToolRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [Turn<'a>; 1],
    tools: [Tool<'a>; 1],
    tool_choice: ToolChoice<'a>,
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Tool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
}

/// Which tool to force and the schema its input must satisfy.
pub(crate) struct ForcedTool<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub schema: &'a Value,
}

impl<'a> ToolRequest<'a> {
    pub fn new(model: &'a str, system: &'a str, user: &'a str, tool: ForcedTool<'a>) -> Self {
        Self {
            model,
            max_tokens: 4096,
            temperature: 0.0,
            system,
            messages: [Turn {
                role: "user",
                content: user,
            }],
            tools: [Tool {
                name: tool.name,
                description: tool.description,
                input_schema: tool.schema,
            }],
            tool_choice: ToolChoice {
                kind: "tool",
                name: tool.name,
            },
        }
    }

    pub fn model(&self) -> &str {
        self.model
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    #[serde(default)]
    content: Vec<Block>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    ToolUse { name: String, input: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub(crate) struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

impl MessagesResponse {
    /// Take the input of the first call to `tool`.
    pub fn into_tool_input(self, tool: &str) -> Option<Value> {
        self.content.into_iter().find_map(|block| match block {
            Block::ToolUse { name, input } if name == tool => Some(input),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_forces_the_named_tool() {
        let schema = json!({"type": "object"});
        let req = ToolRequest::new(
            "m",
            "sys",
            "hi",
            ForcedTool {
                name: "verdict",
                description: "d",
                schema: &schema,
            },
        );
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": "verdict"}));
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn tool_input_skips_other_blocks() {
        let resp: MessagesResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "thinking"},
                {"type": "tool_use", "id": "t1", "name": "verdict", "input": {"outcome": true}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 3}
        }))
        .unwrap();
        assert_eq!(resp.usage.output_tokens, 3);
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(resp.into_tool_input("verdict").unwrap()["outcome"], true);
    }

    #[test]
    fn missing_tool_call_is_none() {
        let resp: MessagesResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "I refuse"}],
            "stop_reason": "end_turn"
        }))
        .unwrap();
        assert!(resp.into_tool_input("verdict").is_none());
    }
}
