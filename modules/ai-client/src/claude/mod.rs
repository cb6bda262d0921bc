mod client;
mod types;

use crate::error::AiError;
use crate::schema::StructuredOutput;

use types::{ForcedTool, ToolRequest};

const TOOL_NAME: &str = "structured_response";

/// Claude agent bound to one API key and model.
///
/// Cheap to construct: callers holding a pool of keys build one per attempt
/// and share the `reqwest::Client` across them.
#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    base_url: Option<String>,
    http: reqwest::Client,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask for a `T` via a forced tool call and deserialize the tool input.
    pub async fn extract<T: StructuredOutput>(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<T, AiError> {
        let system = system_prompt.into();
        let user = user_prompt.into();
        let schema = T::tool_schema();
        let request = ToolRequest::new(
            &self.model,
            &system,
            &user,
            ForcedTool {
                name: TOOL_NAME,
                description: "Return the structured result for the input.",
                schema: &schema,
            },
        );

        let response =
            client::post_messages(&self.http, self.base_url.as_deref(), &self.api_key, &request)
                .await?;

        let input = response
            .into_tool_input(TOOL_NAME)
            .ok_or_else(|| AiError::Parse("No structured output in Claude response".into()))?;

        serde_json::from_value(input)
            .map_err(|e| AiError::Parse(format!("Failed to deserialize response: {e}")))
    }
}
