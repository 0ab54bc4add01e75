// src/provider/openai.rs — OpenAI Responses API provider (SSE streaming)

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};

use super::{
    ContentBlock, Embedding, EventStream, GenerationRequest, ModelProvider, StreamEvent,
    TokenUsage, ToolCallRecord,
};
use crate::infra::errors::WeftError;

pub struct OpenAiProvider {
    api_key: String,
    custom_key: bool,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            custom_key: false,
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com/v1".into(),
        }
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            custom_key: false,
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Build a provider running on a workspace-supplied credential.
    /// Sessions on a custom key settle at zero cost.
    pub fn with_custom_key(api_key: String) -> Self {
        Self {
            api_key,
            custom_key: true,
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com/v1".into(),
        }
    }

    fn build_request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let input: Vec<serde_json::Value> = request
            .blocks
            .iter()
            .map(|block| match block {
                ContentBlock::System(text) => serde_json::json!({
                    "type": "message",
                    "role": "system",
                    "content": text,
                }),
                ContentBlock::InputText(text) => serde_json::json!({
                    "type": "message",
                    "role": "user",
                    "content": [{ "type": "input_text", "text": text }],
                }),
                ContentBlock::InputImage {
                    media_type, data, ..
                } => serde_json::json!({
                    "type": "message",
                    "role": "user",
                    "content": [{
                        "type": "input_image",
                        "detail": "auto",
                        "image_url": format!("data:{};base64,{}", media_type, data),
                    }],
                }),
                ContentBlock::OutputText(text) => serde_json::json!({
                    "type": "message",
                    "role": "assistant",
                    "content": [{ "type": "output_text", "text": text }],
                }),
                ContentBlock::ToolCall(call) => serde_json::json!({
                    "type": "function_call",
                    "call_id": call.id,
                    "name": call.name,
                    "arguments": call.arguments.to_string(),
                }),
                ContentBlock::ToolOutput { call_id, output } => serde_json::json!({
                    "type": "function_call_output",
                    "status": "completed",
                    "call_id": call_id,
                    "output": output,
                }),
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "input": input,
            "stream": true,
            "reasoning": { "summary": "auto" },
        });

        if let Some(max) = request.max_output_tokens {
            body["max_output_tokens"] = serde_json::json!(max);
        }

        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = serde_json::json!(tools);
            body["tool_choice"] = serde_json::json!("auto");
        }

        body
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn key(&self) -> &str {
        "openai"
    }

    fn has_custom_key(&self) -> bool {
        self.custom_key
    }

    async fn stream_message(&self, request: GenerationRequest) -> Result<EventStream, WeftError> {
        let body = self.build_request_body(&request);

        let request_builder = self
            .client
            .post(format!("{}/responses", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body);

        let mut es = request_builder
            .eventsource()
            .map_err(|e| WeftError::Provider {
                provider: "openai".into(),
                message: e.to_string(),
                retriable: false,
            })?;

        let stream = async_stream::stream! {
            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(msg)) => {
                        if msg.data == "[DONE]" {
                            break;
                        }
                        let parsed: serde_json::Value = match serde_json::from_str(&msg.data) {
                            Ok(v) => v,
                            Err(e) => {
                                yield Err(WeftError::Provider {
                                    provider: "openai".into(),
                                    message: format!("Failed to parse SSE data: {}", e),
                                    retriable: false,
                                });
                                break;
                            }
                        };

                        let event_type = parsed["type"].as_str().unwrap_or("");

                        match event_type {
                            "response.output_text.delta" => {
                                let text = parsed["delta"].as_str().unwrap_or("").to_string();
                                if !text.is_empty() {
                                    yield Ok(StreamEvent::ContentDelta(text));
                                }
                            }
                            "response.reasoning_summary_text.delta" => {
                                let text = parsed["delta"].as_str().unwrap_or("").to_string();
                                if !text.is_empty() {
                                    yield Ok(StreamEvent::ReasoningDelta(text));
                                }
                            }
                            "response.output_item.done" => {
                                // Function calls arrive as completed output
                                // items; arguments are a JSON-encoded string.
                                if parsed["item"]["type"] == "function_call" {
                                    let item = &parsed["item"];
                                    let arguments = item["arguments"]
                                        .as_str()
                                        .and_then(|raw| serde_json::from_str(raw).ok())
                                        .unwrap_or_else(|| serde_json::json!({}));
                                    yield Ok(StreamEvent::ToolCallComplete(ToolCallRecord {
                                        id: item["call_id"].as_str().unwrap_or("").to_string(),
                                        name: item["name"].as_str().unwrap_or("").to_string(),
                                        arguments,
                                    }));
                                }
                            }
                            "response.completed" => {
                                let usage = &parsed["response"]["usage"];
                                yield Ok(StreamEvent::UsageFinal(TokenUsage {
                                    input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                                    output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                                }));
                                break;
                            }
                            "response.failed" | "error" => {
                                let message = parsed["response"]["error"]["message"]
                                    .as_str()
                                    .or_else(|| parsed["message"].as_str())
                                    .unwrap_or("upstream reported failure")
                                    .to_string();
                                yield Err(WeftError::Provider {
                                    provider: "openai".into(),
                                    message,
                                    retriable: false,
                                });
                                break;
                            }
                            _ => {} // created, in_progress, content_part events, etc.
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        yield Err(WeftError::Provider {
                            provider: "openai".into(),
                            message: format!("SSE stream error: {}", e),
                            retriable: true,
                        });
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Embedding, WeftError> {
        let body = serde_json::json!({
            "model": model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WeftError::Provider {
                provider: "openai".into(),
                message: e.to_string(),
                retriable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);
            return Err(WeftError::RateLimited {
                provider: "openai".into(),
                retry_after_ms: retry_after * 1000,
            });
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(WeftError::Provider {
                provider: "openai".into(),
                message: format!("HTTP {}: {}", status, error_body),
                retriable: status.is_server_error(),
            });
        }

        let resp: serde_json::Value = response.json().await.map_err(|e| WeftError::Provider {
            provider: "openai".into(),
            message: format!("Failed to parse response: {}", e),
            retriable: false,
        })?;

        let vector = resp["data"][0]["embedding"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
            .unwrap_or_default();

        let usage = TokenUsage {
            input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: 0,
        };

        Ok(Embedding { vector, usage })
    }
}
