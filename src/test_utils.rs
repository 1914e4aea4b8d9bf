//! Scripted mock collaborators for unit tests.

use crate::cli::{Args, Context};
use crate::config::Settings;
use crate::enrich::{EnrichClient, EnrichTransport, UpstreamReply};
use crate::provider::{
    ModelProvider, OutputItem, ResponseBody, TurnEvent, TurnRequest, Usage,
};
use crate::session::SessionStore;
use crate::transcript::Transcript;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use std::cell::RefCell;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Settings with fake credentials for isolated construction in tests.
pub fn test_settings() -> Settings {
    Settings {
        api_key: SecretString::from("sk-test".to_string()),
        base_url: "https://provider.test/v1".to_string(),
        model: "gpt-5".to_string(),
        effort: "medium".to_string(),
        conversation_override: None,
        enrich_api_key: None,
        enrich_base_url: "https://enrich.test/v1".to_string(),
        enrich_timeout: Duration::from_secs(1),
        config_url: None,
    }
}

/// A full [`Context`] over the given provider, rooted in `dir`. The
/// enricher carries no credential, so tool dispatch stays offline.
pub fn test_context(provider: Box<dyn ModelProvider>, dir: &Path) -> Context {
    let settings = test_settings();
    let enricher = EnrichClient::with_transport(
        Box::new(CountingTransport::new()),
        &settings.enrich_base_url,
        None,
        settings.enrich_timeout,
    );
    let transcript =
        Transcript::new(&dir.join("transcript.jsonl"), "sess-test").expect("transcript file");
    Context {
        args: Args::default(),
        settings,
        provider,
        enricher,
        session: SessionStore::in_dir(dir),
        system_prompt: "system prompt".to_string(),
        transcript: RefCell::new(transcript),
        conversation: RefCell::new(None),
        last_response_id: RefCell::new(None),
        tracing: RefCell::new(false),
    }
}

// ============ Provider ============

enum StreamStep {
    Respond {
        deltas: Vec<String>,
        response: ResponseBody,
    },
    Fail(String),
}

/// A scripted [`ModelProvider`] that records every request it sees.
#[derive(Clone)]
pub struct MockProvider {
    created: Arc<Mutex<Vec<String>>>,
    stream_script: Arc<Mutex<Vec<StreamStep>>>,
    execute_script: Arc<Mutex<Vec<ResponseBody>>>,
    stream_requests: Arc<Mutex<Vec<TurnRequest>>>,
    execute_requests: Arc<Mutex<Vec<TurnRequest>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            created: Arc::new(Mutex::new(Vec::new())),
            stream_script: Arc::new(Mutex::new(Vec::new())),
            execute_script: Arc::new(Mutex::new(Vec::new())),
            stream_requests: Arc::new(Mutex::new(Vec::new())),
            execute_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push_stream_response(&self, deltas: Vec<String>, response: ResponseBody) {
        self.stream_script
            .lock()
            .expect("stream script lock")
            .push(StreamStep::Respond { deltas, response });
    }

    pub fn push_stream_failure(&self, message: &str) {
        self.stream_script
            .lock()
            .expect("stream script lock")
            .push(StreamStep::Fail(message.to_string()));
    }

    pub fn push_execute_response(&self, response: ResponseBody) {
        self.execute_script
            .lock()
            .expect("execute script lock")
            .push(response);
    }

    pub fn conversations_created(&self) -> usize {
        self.created.lock().expect("created lock").len()
    }

    pub fn seeded_prompts(&self) -> Vec<String> {
        self.created.lock().expect("created lock").clone()
    }

    pub fn stream_requests(&self) -> Vec<TurnRequest> {
        self.stream_requests.lock().expect("requests lock").clone()
    }

    pub fn execute_requests(&self) -> Vec<TurnRequest> {
        self.execute_requests.lock().expect("requests lock").clone()
    }

    /// A finalized response carrying only text.
    pub fn text_response(id: &str, text: &str) -> ResponseBody {
        ResponseBody {
            id: id.to_string(),
            status: Some("completed".to_string()),
            output: vec![serde_json::from_value(serde_json::json!({
                "type": "message",
                "content": [{ "type": "output_text", "text": text }]
            }))
            .expect("message item")],
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 5,
            }),
            error: None,
        }
    }

    /// A finalized response requesting the given tool invocations.
    pub fn function_call_response(id: &str, calls: &[(&str, &str, &str)]) -> ResponseBody {
        let output: Vec<OutputItem> = calls
            .iter()
            .map(|(call_id, name, arguments)| {
                serde_json::from_value(serde_json::json!({
                    "type": "function_call",
                    "call_id": call_id,
                    "name": name,
                    "arguments": arguments,
                }))
                .expect("function call item")
            })
            .collect();
        ResponseBody {
            id: id.to_string(),
            status: Some("completed".to_string()),
            output,
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 5,
            }),
            error: None,
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn create_conversation(&self, system_prompt: &str) -> Result<String> {
        let mut created = self.created.lock().expect("created lock");
        created.push(system_prompt.to_string());
        Ok(format!("conv-{}", created.len()))
    }

    async fn stream_turn(
        &self,
        request: &TurnRequest,
        events: mpsc::Sender<TurnEvent>,
    ) -> Result<ResponseBody> {
        self.stream_requests
            .lock()
            .expect("requests lock")
            .push(request.clone());

        let step = {
            let mut script = self.stream_script.lock().expect("stream script lock");
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        match step {
            Some(StreamStep::Respond { deltas, response }) => {
                for delta in deltas {
                    let _ = events.send(TurnEvent::TextDelta(delta)).await;
                }
                let _ = events.send(TurnEvent::Done).await;
                Ok(response)
            }
            Some(StreamStep::Fail(message)) => {
                let _ = events.send(TurnEvent::Failed(message.clone())).await;
                Err(anyhow!("provider stream error: {}", message))
            }
            None => Err(anyhow!("no scripted stream response")),
        }
    }

    async fn execute_turn(&self, request: &TurnRequest) -> Result<ResponseBody> {
        self.execute_requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let mut script = self.execute_script.lock().expect("execute script lock");
        if script.is_empty() {
            Err(anyhow!("no scripted follow-up response"))
        } else {
            Ok(script.remove(0))
        }
    }
}

// ============ Enrichment transports ============

/// Counts calls without answering any; for asserting a call never left
/// the client.
pub struct CountingTransport {
    calls: Arc<Mutex<usize>>,
}

impl CountingTransport {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<Mutex<usize>> {
        self.calls.clone()
    }
}

impl Default for CountingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnrichTransport for CountingTransport {
    async fn fetch(&self, _url: &str) -> Result<UpstreamReply> {
        *self.calls.lock().expect("calls lock") += 1;
        Err(anyhow!("transport should not have been reached"))
    }
}

/// Answers every fetch with the same canned reply, recording the URLs.
pub struct StaticTransport {
    reply: UpstreamReply,
    urls: Arc<Mutex<Vec<String>>>,
}

impl StaticTransport {
    pub fn new(reply: UpstreamReply) -> Self {
        Self {
            reply,
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn urls(&self) -> Arc<Mutex<Vec<String>>> {
        self.urls.clone()
    }
}

#[async_trait]
impl EnrichTransport for StaticTransport {
    async fn fetch(&self, url: &str) -> Result<UpstreamReply> {
        self.urls.lock().expect("urls lock").push(url.to_string());
        Ok(self.reply.clone())
    }
}

/// Sleeps past any reasonable timeout before answering.
pub struct SlowTransport {
    delay: Duration,
}

impl SlowTransport {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl EnrichTransport for SlowTransport {
    async fn fetch(&self, _url: &str) -> Result<UpstreamReply> {
        tokio::time::sleep(self.delay).await;
        Ok(UpstreamReply {
            status: 200,
            content_type: None,
            body: String::new(),
        })
    }
}
