//! Interactive shell: argument parsing, the REPL loop, and control
//! commands.

use crate::agent::{self, TurnStats};
use crate::config::Settings;
use crate::enrich::EnrichClient;
use crate::provider::ModelProvider;
use crate::session::SessionStore;
use crate::transcript::Transcript;
use anyhow::Result;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::cell::RefCell;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "intake", about = "Conversational onboarding agent")]
pub struct Args {
    /// Initial message for the first turn (e.g. a bootstrap email)
    pub bootstrap: Option<String>,

    #[arg(
        long,
        help = "Resume the persisted conversation instead of starting fresh"
    )]
    pub resume: bool,

    #[arg(long, help = "Override the model id")]
    pub model: Option<String>,

    #[arg(
        long,
        help = "Use an explicit conversation id (no persistence side effect)"
    )]
    pub conversation: Option<String>,

    #[arg(
        long = "auto-enrich",
        help = "Enrich emails detected in free-form input"
    )]
    pub auto_enrich: bool,

    #[arg(long, help = "Trace requests and tool dispatch")]
    pub trace: bool,

    #[arg(long, help = "Print the assembled system prompt and exit")]
    pub dump_prompt: bool,
}

/// Get the path to the history file
fn history_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".intake")
        .join("history")
}

pub struct Context {
    pub args: Args,
    pub settings: Settings,
    pub provider: Box<dyn ModelProvider>,
    pub enricher: EnrichClient,
    pub session: SessionStore,
    pub system_prompt: String,
    pub transcript: RefCell<Transcript>,
    /// Active conversation handle; `None` means degraded chaining via
    /// the previous response id.
    pub conversation: RefCell<Option<String>>,
    pub last_response_id: RefCell<Option<String>>,
    pub tracing: RefCell<bool>,
}

/// Print turn stats to stderr
fn print_stats(duration: Duration, stats: &TurnStats) {
    let tokens = stats.total_tokens();
    let token_display = if tokens >= 1000 {
        format!("{:.1}k", tokens as f64 / 1000.0)
    } else {
        tokens.to_string()
    };
    eprintln!(
        "[Duration: {:.1}s | Tokens: {} | Tools: {}]",
        duration.as_secs_f64(),
        token_display,
        stats.tool_uses
    );
}

async fn run_and_report(ctx: &Context, input: &str) {
    let start = Instant::now();
    match agent::run_turn(ctx, input).await {
        Ok(result) => print_stats(start.elapsed(), &result.stats),
        Err(e) => eprintln!("Error: {}", e),
    }
}

pub async fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history_file = history_path();
    let _ = rl.load_history(&history_file);

    println!("intake - onboarding assistant. /help for commands; empty line or 'exit' to quit");

    // A startup argument is the first turn (e.g. a bootstrap email).
    if let Some(initial) = ctx.args.bootstrap.clone() {
        run_and_report(&ctx, &initial).await;
    }

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() || line == "exit" {
                    break;
                }
                rl.add_history_entry(&line)?;

                if line == "reset" || line.starts_with('/') {
                    if handle_command(&ctx, &line).await {
                        break;
                    }
                    continue;
                }

                run_and_report(&ctx, &line).await;
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    // Save command history (create parent directory if needed)
    if let Some(parent) = history_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = rl.save_history(&history_file);

    Ok(())
}

/// Returns true when the shell should exit.
async fn handle_command(ctx: &Context, cmd: &str) -> bool {
    match cmd {
        "/exit" | "/quit" => return true,
        "/help" => {
            println!("Commands:");
            println!("  exit (or empty line)  - quit");
            println!("  /id                   - print the current conversation id");
            println!("  /reset (or reset)     - forget the conversation and start over");
            println!("  /trace                - toggle request tracing");
            println!("  /help                 - show commands");
        }
        "/trace" => {
            let mut t = ctx.tracing.borrow_mut();
            *t = !*t;
            println!("Tracing: {}", if *t { "on" } else { "off" });
        }
        "/id" => match ctx.conversation.borrow().as_deref() {
            Some(id) => println!("{}", id),
            None => match ctx.last_response_id.borrow().as_deref() {
                Some(id) => println!("none (chaining from response {})", id),
                None => println!("none"),
            },
        },
        "/reset" | "reset" => reset_conversation(ctx).await,
        other => println!("Unknown command: {}", other),
    }
    false
}

/// Forget the persisted handle and start a fresh dialogue.
async fn reset_conversation(ctx: &Context) {
    ctx.session.forget();
    *ctx.last_response_id.borrow_mut() = None;
    let _ = ctx.transcript.borrow_mut().conversation_reset();

    match ctx
        .session
        .resolve(ctx.provider.as_ref(), &ctx.system_prompt, None)
        .await
    {
        Ok(id) => {
            let _ = ctx.transcript.borrow_mut().conversation_created(&id);
            println!("Conversation reset: {}", id);
            *ctx.conversation.borrow_mut() = Some(id);
        }
        Err(e) => {
            eprintln!(
                "[session] could not create a conversation ({}); continuing without server-side history",
                e
            );
            *ctx.conversation.borrow_mut() = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_context, MockProvider};

    #[tokio::test]
    async fn reset_forgets_and_recreates_the_handle() {
        let provider = MockProvider::new();
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(Box::new(provider.clone()), dir.path());
        *ctx.conversation.borrow_mut() = Some("conv-stale".to_string());
        *ctx.last_response_id.borrow_mut() = Some("resp-stale".to_string());

        assert!(!handle_command(&ctx, "/reset").await);

        assert_eq!(provider.conversations_created(), 1);
        assert_eq!(ctx.conversation.borrow().as_deref(), Some("conv-1"));
        assert!(ctx.last_response_id.borrow().is_none());
    }

    #[tokio::test]
    async fn bare_reset_is_accepted_too() {
        let provider = MockProvider::new();
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(Box::new(provider.clone()), dir.path());

        assert!(!handle_command(&ctx, "reset").await);
        assert_eq!(provider.conversations_created(), 1);
    }

    #[tokio::test]
    async fn exit_commands_terminate_the_shell() {
        let provider = MockProvider::new();
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(Box::new(provider), dir.path());

        assert!(handle_command(&ctx, "/exit").await);
        assert!(handle_command(&ctx, "/quit").await);
        assert!(!handle_command(&ctx, "/help").await);
        assert!(!handle_command(&ctx, "/id").await);
        assert!(!handle_command(&ctx, "/unknown").await);
    }
}
