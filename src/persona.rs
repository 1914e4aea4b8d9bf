//! Agent persona: personality and background facts, edited externally
//! and read once per process at prompt-build time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Personality as stored in the configuration document: either a single
/// free-text block or an ordered list of trait statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Personality {
    Text(String),
    Traits(Vec<String>),
}

impl Default for Personality {
    fn default() -> Self {
        Personality::Traits(Vec::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPersona {
    #[serde(default)]
    pub personality: Personality,
    #[serde(default)]
    pub context: Vec<String>,
}

impl Default for AgentPersona {
    fn default() -> Self {
        Self {
            personality: Personality::Traits(vec![
                "Warm and welcoming, like a good concierge".to_string(),
                "Asks one question at a time".to_string(),
                "Keeps answers short and conversational".to_string(),
            ]),
            context: vec![
                "You are onboarding a new customer for a SaaS product".to_string(),
                "The user may paste their work email to speed things up".to_string(),
            ],
        }
    }
}

/// Fetch the agent-config document from the configuration service.
pub async fn fetch(http: &reqwest::Client, base_url: &str) -> Result<AgentPersona> {
    let url = format!("{}/agent-config", base_url.trim_end_matches('/'));
    let persona = http
        .get(&url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("GET {}", url))?
        .json::<AgentPersona>()
        .await
        .context("agent-config document is not valid JSON")?;
    Ok(persona)
}
