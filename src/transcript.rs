//! Append-only JSONL transcript of one session.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Transcript {
    pub path: PathBuf,
    session_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    session_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl Transcript {
    pub fn new(path: &Path, session_id: &str) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            session_id: session_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            session_id: &self.session_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn session_start(&mut self, model: &str) -> Result<()> {
        self.log("session_start", serde_json::json!({ "model": model }))
    }

    pub fn user_message(&mut self, content: &str) -> Result<()> {
        self.log("user_message", serde_json::json!({ "content": content }))
    }

    pub fn assistant_message(&mut self, content: &str) -> Result<()> {
        self.log(
            "assistant_message",
            serde_json::json!({ "content": content }),
        )
    }

    pub fn tool_call(&mut self, tool: &str, call_id: &str) -> Result<()> {
        self.log(
            "tool_call",
            serde_json::json!({ "tool": tool, "call_id": call_id }),
        )
    }

    pub fn tool_result(&mut self, tool: &str, call_id: &str, ok: bool) -> Result<()> {
        self.log(
            "tool_result",
            serde_json::json!({ "tool": tool, "call_id": call_id, "ok": ok }),
        )
    }

    /// Log token usage for one provider exchange
    pub fn turn_usage(&mut self, response_id: &str, input_tokens: u64, output_tokens: u64) -> Result<()> {
        self.log(
            "turn_usage",
            serde_json::json!({
                "response_id": response_id,
                "input_tokens": input_tokens,
                "output_tokens": output_tokens,
            }),
        )
    }

    pub fn conversation_created(&mut self, conversation_id: &str) -> Result<()> {
        self.log(
            "conversation_created",
            serde_json::json!({ "conversation_id": conversation_id }),
        )
    }

    pub fn conversation_reset(&mut self) -> Result<()> {
        self.log("conversation_reset", serde_json::json!({}))
    }

    /// Log an enrichment lookup (auto-enrich or tool-invoked)
    pub fn enrichment(&mut self, email: &str, status: u16) -> Result<()> {
        self.log(
            "enrichment",
            serde_json::json!({ "email": email, "status": status }),
        )
    }
}
