//! Conversation-handle persistence across process restarts.
//!
//! One plain-text file in the working directory holds the current
//! handle. Read and write failures degrade to "no handle" — the only
//! cost is a fresh conversation.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::provider::ModelProvider;

pub const HANDLE_FILE: &str = ".conversation_id";

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(HANDLE_FILE))
    }

    /// Resolve the conversation handle for this run.
    ///
    /// An explicit override wins and is never persisted. Otherwise the
    /// persisted handle is reused when present; else a new conversation
    /// is created from the system prompt and its id persisted.
    pub async fn resolve(
        &self,
        provider: &dyn ModelProvider,
        system_prompt: &str,
        override_id: Option<&str>,
    ) -> Result<String> {
        if let Some(id) = override_id.map(str::trim).filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        if let Some(id) = self.read_persisted() {
            return Ok(id);
        }

        let id = provider.create_conversation(system_prompt).await?;
        self.persist(&id);
        Ok(id)
    }

    /// Remove any persisted handle. Succeeds silently when none exists.
    pub fn forget(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                eprintln!("[session] could not remove {}: {}", self.path.display(), e);
            }
        }
    }

    fn read_persisted(&self) -> Option<String> {
        fs::read_to_string(&self.path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn persist(&self, id: &str) {
        if let Err(e) = fs::write(&self.path, id) {
            eprintln!("[session] could not persist handle: {}", e);
        }
    }
}
