use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use taskloom_config::ProviderConfig;

use super::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, MessagePart,
    ProviderError, ProviderErrorKind, Usage,
};

/// Adapter for providers exposing the OpenAI chat-completions wire format.
///
/// Gemini, Groq, and OpenAI all serve this endpoint shape; the immutable
/// `ProviderConfig` carries the differing base URL, model, and credentials.
/// A fresh adapter is built from a fresh config for every request.
pub struct ChatCompletionsProvider {
    client: Client,
    config: ProviderConfig,
}

impl ChatCompletionsProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        self.config.model()
    }

    fn classify_status(&self, status: StatusCode, body: &str) -> ProviderError {
        let kind = match status.as_u16() {
            401 | 403 => ProviderErrorKind::AuthFailed,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimited,
            500 | 502 | 503 | 529 => ProviderErrorKind::Unavailable,
            _ => ProviderErrorKind::Unknown,
        };

        let mut message = format!("status {status}");
        if !body.is_empty() {
            message.push_str(": ");
            // Keep enough body to diagnose, never the whole payload.
            message.push_str(&body.chars().take(200).collect::<String>());
        }
        ProviderError::new(self.provider_id(), kind, message)
    }

    fn classify_transport(&self, error: reqwest::Error) -> ProviderError {
        let kind = if error.is_timeout() {
            ProviderErrorKind::Timeout
        } else if error.is_connect() {
            ProviderErrorKind::Unavailable
        } else {
            ProviderErrorKind::Unknown
        };
        ProviderError::new(self.provider_id(), kind, format!("request failed: {error}"))
    }

    fn convert_request(&self, request: &LlmRequest) -> Result<WireRequest, ProviderError> {
        let mut messages = Vec::new();

        if let Some(system_prompt) = &request.system {
            messages.push(WireMessage::System {
                content: system_prompt.clone(),
            });
        }

        for msg in &request.messages {
            self.convert_message(msg, &mut messages)?;
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| WireTool {
                        kind: "function".to_string(),
                        function: WireFunctionDefinition {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };

        Ok(WireRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools,
        })
    }

    fn convert_message(
        &self,
        msg: &ChatMessage,
        out: &mut Vec<WireMessage>,
    ) -> Result<(), ProviderError> {
        match msg.role {
            ChatRole::System => {
                let content = flatten_text(&msg.content);
                out.push(WireMessage::System { content });
            }
            ChatRole::User => {
                let content = flatten_text(&msg.content);
                out.push(WireMessage::User { content });
            }
            ChatRole::Assistant => {
                let mut text_parts = Vec::new();
                let mut tool_calls = Vec::new();

                match &msg.content {
                    MessagePart::Text(t) => text_parts.push(t.clone()),
                    MessagePart::Parts(parts) => {
                        for part in parts {
                            match part {
                                ContentBlock::Text { text } => text_parts.push(text.clone()),
                                ContentBlock::ToolUse { id, name, input } => {
                                    tool_calls.push(WireToolCall {
                                        id: id.clone(),
                                        kind: "function".to_string(),
                                        function: WireFunctionCall {
                                            name: name.clone(),
                                            arguments: serde_json::to_string(input)
                                                .unwrap_or_default(),
                                        },
                                    });
                                }
                                ContentBlock::ToolResult { .. } => {}
                            }
                        }
                    }
                }

                out.push(WireMessage::Assistant {
                    content: if text_parts.is_empty() {
                        None
                    } else {
                        Some(text_parts.join("\n"))
                    },
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                });
            }
            ChatRole::Tool => {
                // Each tool result becomes its own wire message; a turn may
                // carry several when the model called tools in parallel.
                let MessagePart::Parts(parts) = &msg.content else {
                    return Err(ProviderError::new(
                        self.provider_id(),
                        ProviderErrorKind::Unknown,
                        "tool message must carry tool_result parts",
                    ));
                };
                for part in parts {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                    } = part
                    {
                        out.push(WireMessage::Tool {
                            tool_call_id: tool_use_id.clone(),
                            content: content.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn convert_response(&self, response: WireResponse) -> Result<LlmResponse, ProviderError> {
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            ProviderError::new(
                self.provider_id(),
                ProviderErrorKind::Unknown,
                "no choices in response",
            )
        })?;

        let mut content_blocks = Vec::new();
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                content_blocks.push(ContentBlock::Text { text });
            }
        }
        if let Some(tool_calls) = choice.message.tool_calls {
            for tc in tool_calls {
                let input: serde_json::Value = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::String(tc.function.arguments));
                content_blocks.push(ContentBlock::ToolUse {
                    id: tc.id,
                    name: tc.function.name,
                    input,
                });
            }
        }

        Ok(LlmResponse {
            content: content_blocks,
            model: response.model,
            usage: response.usage.map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
            stop_reason: choice.finish_reason,
        })
    }
}

fn flatten_text(content: &MessagePart) -> String {
    match content {
        MessagePart::Text(t) => t.clone(),
        MessagePart::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    fn provider_id(&self) -> &str {
        self.config.provider().as_str()
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.config.base_url());
        let wire_request = self.convert_request(request)?;

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key()))
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify_status(status, &body));
        }

        let wire_response: WireResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                self.provider_id(),
                ProviderErrorKind::Unknown,
                format!("failed to parse response: {e}"),
            )
        })?;

        self.convert_response(wire_response)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.config.base_url());
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key()))
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

// Wire types

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum WireMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<WireToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionDefinition,
}

#[derive(Serialize)]
struct WireFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct WireResponse {
    model: String,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
