use anyhow::{Context, Result, bail};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::models::AnnotationBatch;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const TOOL_NAME: &str = "submit_entities";
const TOOL_DESCRIPTION: &str =
    "Submit every personal name, place name and organization or tribal affiliation found in the batch";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Connection settings for the annotation model
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    /// Kept at 0.0 so reruns see the same candidates
    pub temperature: f64,
    pub max_tokens: u32,
}

impl AnthropicConfig {
    /// Reads `ANTHROPIC_API_KEY` and, optionally, `ANTHROPIC_MODEL`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY is required for model annotation")?;
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self::new(api_key, model))
    }

    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

/// Thin client for the messages endpoint, used only through the forced entity tool
pub struct AnthropicClient {
    http: Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Annotate one utterance batch; the reply must come back through `submit_entities`
    pub async fn send_with_tool(&self, system: &str, user: &str) -> Result<AnnotationBatch> {
        let schema = annotation_schema();
        let request = EntityRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system,
            messages: [UserMessage {
                role: "user",
                content: user,
            }],
            tools: [ToolSpec {
                name: TOOL_NAME,
                description: TOOL_DESCRIPTION,
                input_schema: &schema,
            }],
            tool_choice: ForcedTool {
                kind: "tool",
                name: TOOL_NAME,
            },
        };

        let reply = self.post(&request).await?;
        parse_tool_output(&reply)
    }

    async fn post(&self, request: &EntityRequest<'_>) -> Result<MessagesReply> {
        debug!("Requesting entity annotations from {}", self.config.model);
        let response = self
            .http
            .post(MESSAGES_URL)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(request)
            .send()
            .await
            .context("Annotation request could not be sent")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Annotation request rejected ({status}): {body}");
        }

        response
            .json::<MessagesReply>()
            .await
            .context("Annotation reply was not valid JSON")
    }
}

fn annotation_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "batch_id": {
                "type": "string",
                "description": "ID of the batch being annotated"
            },
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "utterance_index": {"type": "integer"},
                        "text": {
                            "type": "string",
                            "description": "Exact text as it appears in the utterance"
                        },
                        "type": {
                            "type": "string",
                            "enum": ["person", "location", "organization", "ambiguous"]
                        },
                        "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                    },
                    "required": ["utterance_index", "text", "type", "confidence"]
                }
            },
            "notes": {"type": "string"}
        },
        "required": ["batch_id", "entities"]
    })
}

/// Pull the `submit_entities` call out of the reply and read its input as an annotation batch
fn parse_tool_output(reply: &MessagesReply) -> Result<AnnotationBatch> {
    let input = reply
        .content
        .iter()
        .find(|block| block.kind == "tool_use" && block.name.as_deref() == Some(TOOL_NAME))
        .and_then(|block| block.input.clone())
        .context("Reply did not call submit_entities")?;
    serde_json::from_value(input).context("submit_entities input does not match the annotation schema")
}

#[derive(Serialize)]
struct EntityRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
    tools: [ToolSpec<'a>; 1],
    tool_choice: ForcedTool<'a>,
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ToolSpec<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Serialize)]
struct ForcedTool<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    content: Vec<ReplyBlock>,
}

#[derive(Debug, Deserialize)]
struct ReplyBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_output() {
        let reply: MessagesReply = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "Here you go"},
                {"type": "tool_use", "name": "submit_entities", "input": {
                    "batch_id": "b1",
                    "entities": [{"utterance_index": 0, "text": "Jodi", "type": "person", "confidence": 0.9}]
                }}
            ]
        }))
        .unwrap();
        let batch = parse_tool_output(&reply).unwrap();
        assert_eq!(batch.batch_id, "b1");
        assert_eq!(batch.entities.len(), 1);
    }

    #[test]
    fn test_missing_tool_block_is_error() {
        let reply: MessagesReply = serde_json::from_value(serde_json::json!({
            "content": [{"type": "text", "text": "no tool"}]
        }))
        .unwrap();
        assert!(parse_tool_output(&reply).is_err());
    }

    #[test]
    fn test_schema_requires_entities() {
        let schema = annotation_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "entities"));
    }
}
