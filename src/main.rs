use anyhow::Result;
use clap::Parser;
use std::cell::RefCell;
use std::path::PathBuf;

use intake::cli::{self, Args, Context};
use intake::config::Settings;
use intake::enrich::EnrichClient;
use intake::persona::{self, AgentPersona};
use intake::plan::{self, OnboardingPlan};
use intake::prompt;
use intake::provider::{ModelProvider, OpenAiProvider};
use intake::session::SessionStore;
use intake::transcript::Transcript;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // The provider credential is the only fatal startup requirement.
    let settings = match Settings::from_env(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Configuration documents are read once, at prompt-build time.
    let http = reqwest::Client::new();
    let (agent_persona, onboarding_plan) =
        load_documents(&http, settings.config_url.as_deref()).await;
    let system_prompt = prompt::build_system_prompt(&agent_persona, &onboarding_plan);

    if args.dump_prompt {
        println!("{}", system_prompt);
        return Ok(());
    }

    let provider: Box<dyn ModelProvider> = Box::new(OpenAiProvider::new(&settings));
    let enricher = EnrichClient::new(&settings);

    let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let session = SessionStore::in_dir(&root);

    // Each invocation starts a clean dialogue unless the caller opts
    // into continuity.
    if !args.resume && settings.conversation_override.is_none() {
        session.forget();
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let sessions_dir = root.join(".intake").join("sessions");
    std::fs::create_dir_all(&sessions_dir)?;
    let mut transcript = Transcript::new(
        &sessions_dir.join(format!("{}.jsonl", session_id)),
        &session_id,
    )?;
    let _ = transcript.session_start(&settings.model);

    let conversation = match session
        .resolve(
            provider.as_ref(),
            &system_prompt,
            settings.conversation_override.as_deref(),
        )
        .await
    {
        Ok(id) => {
            let _ = transcript.conversation_created(&id);
            Some(id)
        }
        Err(e) => {
            eprintln!(
                "[session] could not establish a conversation ({}); continuing without server-side history",
                e
            );
            None
        }
    };

    let tracing = args.trace;
    let ctx = Context {
        args,
        settings,
        provider,
        enricher,
        session,
        system_prompt,
        transcript: RefCell::new(transcript),
        conversation: RefCell::new(conversation),
        last_response_id: RefCell::new(None),
        tracing: RefCell::new(tracing),
    };

    cli::run_repl(ctx).await
}

/// Fetch the two configuration documents, falling back to the built-in
/// defaults when the service is unset or unreachable.
async fn load_documents(
    http: &reqwest::Client,
    base_url: Option<&str>,
) -> (AgentPersona, OnboardingPlan) {
    let Some(base_url) = base_url else {
        return (AgentPersona::default(), OnboardingPlan::default());
    };
    let agent_persona = match persona::fetch(http, base_url).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[config] using built-in agent config ({})", e);
            AgentPersona::default()
        }
    };
    let onboarding_plan = match plan::fetch(http, base_url).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("[config] using built-in onboarding plan ({})", e);
            OnboardingPlan::default()
        }
    };
    (agent_persona, onboarding_plan)
}
