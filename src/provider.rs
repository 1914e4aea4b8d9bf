//! Model-provider client for a Responses-style API.
//!
//! Covers the three exchanges the agent needs: conversation creation
//! (seeded with the system prompt), a streamed turn, and a non-streamed
//! follow-up carrying tool outputs. The trait exists so the orchestrator
//! can be driven by a scripted mock in tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::Settings;

// ============ Requests ============

/// One request to the responses endpoint. The same shape serves the
/// streamed user turn and the non-streamed tool-output follow-up.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub model: String,
    pub input: Vec<Value>,
    /// System instructions; sent only when no conversation handle exists
    /// yet (first turn of a degraded, handle-less dialogue).
    pub instructions: Option<String>,
    pub conversation: Option<String>,
    /// Chaining reference used instead of a conversation handle.
    pub previous_response_id: Option<String>,
    pub tools: Vec<Value>,
    pub effort: String,
}

impl TurnRequest {
    pub fn to_body(&self, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "input": self.input,
            "tools": self.tools,
            "tool_choice": "auto",
            "reasoning": { "effort": self.effort },
        });
        if let Some(instructions) = &self.instructions {
            body["instructions"] = json!(instructions);
        }
        if let Some(conversation) = &self.conversation {
            body["conversation"] = json!(conversation);
        }
        if let Some(prev) = &self.previous_response_id {
            body["previous_response_id"] = json!(prev);
        }
        if stream {
            body["stream"] = Value::Bool(true);
        }
        body
    }
}

/// A user-role message input item.
pub fn user_message(text: &str) -> Value {
    json!({
        "type": "message",
        "role": "user",
        "content": [{ "type": "input_text", "text": text }],
    })
}

/// A tool-result input item paired to its originating call.
pub fn function_output(call_id: &str, output: &str) -> Value {
    json!({
        "type": "function_call_output",
        "call_id": call_id,
        "output": output,
    })
}

// ============ Responses ============

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum OutputItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,
}

/// A finalized response from the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// A tool-invocation request extracted from a finalized turn.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

impl ResponseBody {
    /// Concatenated text of all message output items, in output order.
    pub fn output_text(&self) -> String {
        let mut text = String::new();
        for item in &self.output {
            if let OutputItem::Message { content } = item {
                for part in content {
                    if part.part_type == "output_text" {
                        text.push_str(&part.text);
                    }
                }
            }
        }
        text
    }

    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                } => Some(FunctionCall {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

// ============ Streaming ============

/// Tagged event union forwarded to the caller while a turn streams.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    TextDelta(String),
    ToolCallStarted { name: String },
    Failed(String),
    Done,
}

/// What a single SSE frame means to us. Frames we don't care about map
/// to `None`.
#[derive(Debug)]
enum SseAction {
    Delta(String),
    ToolStarted(String),
    Completed(ResponseBody),
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct DeltaFrame {
    #[serde(default)]
    delta: String,
}

#[derive(Debug, Deserialize)]
struct ItemFrame {
    item: OutputItem,
}

#[derive(Debug, Deserialize)]
struct ResponseFrame {
    response: ResponseBody,
}

fn translate_sse(event: &str, data: &str) -> Result<Option<SseAction>> {
    match event {
        "response.output_text.delta" => {
            let frame: DeltaFrame = serde_json::from_str(data)?;
            Ok(Some(SseAction::Delta(frame.delta)))
        }
        "response.output_item.added" => {
            let frame: ItemFrame = serde_json::from_str(data)?;
            match frame.item {
                OutputItem::FunctionCall { name, .. } => Ok(Some(SseAction::ToolStarted(name))),
                _ => Ok(None),
            }
        }
        "response.completed" => {
            let frame: ResponseFrame = serde_json::from_str(data)?;
            Ok(Some(SseAction::Completed(frame.response)))
        }
        "response.failed" | "response.incomplete" => {
            let frame: ResponseFrame = serde_json::from_str(data)?;
            let message = frame
                .response
                .error
                .map(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("response {}", event));
            Ok(Some(SseAction::Failed(message)))
        }
        "error" => {
            let message = serde_json::from_str::<Value>(data)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .or_else(|| v.pointer("/error/message"))
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| data.to_string());
            Ok(Some(SseAction::Failed(message)))
        }
        _ => Ok(None),
    }
}

/// Pull a human-readable message out of a provider error body.
fn extract_api_error(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

// ============ Trait + HTTP implementation ============

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Create a server-side conversation seeded with the system prompt.
    async fn create_conversation(&self, system_prompt: &str) -> Result<String>;

    /// Run one streamed turn, forwarding events in arrival order, and
    /// return the finalized response.
    async fn stream_turn(
        &self,
        request: &TurnRequest,
        events: mpsc::Sender<TurnEvent>,
    ) -> Result<ResponseBody>;

    /// Run one non-streamed turn (the tool-output follow-up).
    async fn execute_turn(&self, request: &TurnRequest) -> Result<ResponseBody>;
}

pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: secrecy::SecretString,
}

impl OpenAiProvider {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .http
            .post(self.url(path))
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "provider error {}: {}",
                status.as_u16(),
                extract_api_error(&body)
            ));
        }
        Ok(resp)
    }
}

#[derive(Debug, Deserialize)]
struct Conversation {
    id: String,
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn create_conversation(&self, system_prompt: &str) -> Result<String> {
        let body = json!({
            "items": [{
                "type": "message",
                "role": "system",
                "content": system_prompt,
            }],
        });
        let conversation: Conversation = self.post("conversations", &body).await?.json().await?;
        Ok(conversation.id)
    }

    async fn stream_turn(
        &self,
        request: &TurnRequest,
        events: mpsc::Sender<TurnEvent>,
    ) -> Result<ResponseBody> {
        let resp = self.post("responses", &request.to_body(true)).await?;

        let stream = resp.bytes_stream().eventsource();
        tokio::pin!(stream);
        while let Some(frame) = stream.next().await {
            let frame = frame.map_err(|e| anyhow!("stream transport error: {}", e))?;
            match translate_sse(&frame.event, &frame.data)? {
                Some(SseAction::Delta(delta)) => {
                    let _ = events.send(TurnEvent::TextDelta(delta)).await;
                }
                Some(SseAction::ToolStarted(name)) => {
                    let _ = events.send(TurnEvent::ToolCallStarted { name }).await;
                }
                Some(SseAction::Completed(response)) => {
                    let _ = events.send(TurnEvent::Done).await;
                    return Ok(response);
                }
                Some(SseAction::Failed(message)) => {
                    let _ = events.send(TurnEvent::Failed(message.clone())).await;
                    return Err(anyhow!("provider stream error: {}", message));
                }
                None => {}
            }
        }
        Err(anyhow!("stream ended without a completed response"))
    }

    async fn execute_turn(&self, request: &TurnRequest) -> Result<ResponseBody> {
        let response: ResponseBody = self
            .post("responses", &request.to_body(false))
            .await?
            .json()
            .await?;
        if let Some(error) = &response.error {
            return Err(anyhow!("provider error: {}", error.message));
        }
        Ok(response)
    }
}
