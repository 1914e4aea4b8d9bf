//! Turn orchestration: one streamed exchange with the model, tool
//! dispatch, and the non-streamed follow-up carrying tool outputs.

use crate::cli::Context;
use crate::enrich::EnrichOptions;
use crate::provider::{self, FunctionCall, ResponseBody, TurnEvent, TurnRequest};
use crate::tools;
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::io::{self, Write};
use tokio::sync::mpsc;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
});

/// Token and tool counters for one turn.
#[derive(Debug, Default, Clone)]
pub struct TurnStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_uses: u64,
}

impl TurnStats {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Result of a turn. `response_id` is the terminal identifier to chain
/// the next turn from; after a tool follow-up it is the follow-up's id.
#[derive(Debug, Default, Clone)]
pub struct TurnResult {
    pub response_id: Option<String>,
    pub response_text: Option<String>,
    pub stats: TurnStats,
}

fn trace(ctx: &Context, label: &str, content: &str) {
    if *ctx.tracing.borrow() {
        eprintln!("[TRACE:{}] {}", label, content);
    }
}

/// First email-shaped token in free-form text.
pub fn detect_email(text: &str) -> Option<String> {
    EMAIL_RE.find(text).map(|m| m.as_str().to_string())
}

/// Run one conversational turn: stream the model's output, execute any
/// requested tools, and submit their results as a follow-up.
pub async fn run_turn(ctx: &Context, user_input: &str) -> Result<TurnResult> {
    let mut turn_result = TurnResult::default();
    let _ = ctx.transcript.borrow_mut().user_message(user_input);

    let mut input = vec![provider::user_message(user_input)];

    // Alternate path: enrich an email spotted in free text and hand the
    // result to the model as extra context for this turn.
    if ctx.args.auto_enrich {
        if let Some(email) = detect_email(user_input) {
            trace(ctx, "ENRICH", &email);
            let result = ctx.enricher.enrich(&email, &EnrichOptions::default()).await;
            let _ = ctx
                .transcript
                .borrow_mut()
                .enrichment(&email, result.status);
            if let Ok(serialized) = serde_json::to_string(&result) {
                input.push(provider::user_message(&format!(
                    "Enrichment lookup for {}: {}",
                    email, serialized
                )));
            }
        }
    }

    let conversation = ctx.conversation.borrow().clone();
    let previous = ctx.last_response_id.borrow().clone();

    // Instructions ride along only when there is no server-side
    // conversation memory to rely on, and then only on the first turn.
    let instructions = if conversation.is_none() && previous.is_none() {
        Some(ctx.system_prompt.clone())
    } else {
        None
    };

    let mut request = TurnRequest {
        model: ctx.settings.model.clone(),
        input,
        instructions,
        conversation: conversation.clone(),
        previous_response_id: if conversation.is_some() {
            None
        } else {
            previous
        },
        tools: tools::declarations(),
        effort: ctx.settings.effort.clone(),
    };

    let response = stream_with_fallback(ctx, &mut request).await?;
    record_usage(ctx, &response, &mut turn_result.stats);

    let text = response.output_text();
    if !text.is_empty() {
        let _ = ctx.transcript.borrow_mut().assistant_message(&text);
        turn_result.response_text = Some(text);
    }

    let calls = response.function_calls();
    turn_result.response_id = Some(response.id.clone());

    if !calls.is_empty() {
        // Tool results are best-effort: a broken tool or a failed
        // follow-up keeps the prior terminal id instead of aborting the
        // conversation.
        match resolve_tools(ctx, &calls).await {
            Ok(outputs) => {
                turn_result.stats.tool_uses += calls.len() as u64;
                let follow_up = TurnRequest {
                    model: request.model.clone(),
                    input: outputs,
                    instructions: None,
                    conversation: conversation.clone(),
                    previous_response_id: if conversation.is_some() {
                        None
                    } else {
                        Some(response.id.clone())
                    },
                    tools: request.tools.clone(),
                    effort: request.effort.clone(),
                };
                match ctx.provider.execute_turn(&follow_up).await {
                    Ok(follow_response) => {
                        record_usage(ctx, &follow_response, &mut turn_result.stats);
                        let follow_text = follow_response.output_text();
                        if !follow_text.is_empty() {
                            println!("{}", follow_text);
                            let _ = ctx.transcript.borrow_mut().assistant_message(&follow_text);
                            match &mut turn_result.response_text {
                                Some(existing) => {
                                    existing.push_str("\n\n");
                                    existing.push_str(&follow_text);
                                }
                                None => turn_result.response_text = Some(follow_text),
                            }
                        }
                        turn_result.response_id = Some(follow_response.id.clone());
                    }
                    Err(e) => eprintln!("[agent] tool follow-up failed: {}", e),
                }
            }
            Err(e) => eprintln!("[agent] tool dispatch failed: {}", e),
        }
    }

    *ctx.last_response_id.borrow_mut() = turn_result.response_id.clone();
    Ok(turn_result)
}

/// Stream one request, retrying once with the web-search declaration
/// removed and the effort hint lowered when the model rejects it.
async fn stream_with_fallback(ctx: &Context, request: &mut TurnRequest) -> Result<ResponseBody> {
    match stream_once(ctx, request).await {
        Ok(response) => Ok(response),
        Err(e) if is_unsupported_tool_error(&e) => {
            eprintln!("[provider] {}; retrying without web search", e);
            request.tools = tools::without_web_search(&request.tools);
            request.effort = "low".to_string();
            stream_once(ctx, request).await
        }
        Err(e) => Err(e),
    }
}

fn is_unsupported_tool_error(e: &anyhow::Error) -> bool {
    let message = e.to_string().to_lowercase();
    message.contains(tools::WEB_SEARCH_TOOL)
        && (message.contains("not supported") || message.contains("unsupported"))
}

/// Open the streamed exchange and print text deltas as they arrive.
async fn stream_once(ctx: &Context, request: &TurnRequest) -> Result<ResponseBody> {
    let (event_tx, mut event_rx) = mpsc::channel::<TurnEvent>(100);

    let response_future = ctx.provider.stream_turn(request, event_tx);

    let mut printed = false;
    let response = tokio::select! {
        result = response_future => result?,
        _ = async {
            while let Some(event) = event_rx.recv().await {
                match event {
                    TurnEvent::TextDelta(delta) => {
                        print!("{}", delta);
                        let _ = io::stdout().flush();
                        printed = true;
                    }
                    TurnEvent::ToolCallStarted { name } => {
                        trace(ctx, "STREAM", &format!("tool call starting: {}", name));
                    }
                    TurnEvent::Failed(_) => {
                        // The error surfaces through the request future.
                    }
                    TurnEvent::Done => break,
                }
            }
            // This future never returns on its own
            futures::future::pending::<()>().await
        } => unreachable!(),
    };

    // Drain events that landed between Done and the future resolving
    while let Ok(event) = event_rx.try_recv() {
        if let TurnEvent::TextDelta(delta) = event {
            print!("{}", delta);
            let _ = io::stdout().flush();
            printed = true;
        }
    }

    if printed {
        println!();
    }

    Ok(response)
}

/// Dispatch every invocation and pair each output with its call id.
async fn resolve_tools(ctx: &Context, calls: &[FunctionCall]) -> Result<Vec<Value>> {
    let mut outputs = Vec::with_capacity(calls.len());
    for call in calls {
        trace(ctx, "CALL", &format!("{}({})", call.name, call.arguments));
        eprintln!("⏺ {}", call.name);
        let _ = ctx
            .transcript
            .borrow_mut()
            .tool_call(&call.name, &call.call_id);

        let payload = tools::dispatch(&call.name, &call.arguments, &ctx.enricher).await?;

        let ok = serde_json::from_str::<Value>(&payload)
            .map(|v| v.get("error").is_none())
            .unwrap_or(false);
        eprintln!("  ⎿ {} {}", if ok { "✓" } else { "✗" }, call.name);
        let _ = ctx
            .transcript
            .borrow_mut()
            .tool_result(&call.name, &call.call_id, ok);

        outputs.push(provider::function_output(&call.call_id, &payload));
    }
    Ok(outputs)
}

fn record_usage(ctx: &Context, response: &ResponseBody, stats: &mut TurnStats) {
    if let Some(usage) = &response.usage {
        stats.input_tokens += usage.input_tokens;
        stats.output_tokens += usage.output_tokens;
        let _ = ctx.transcript.borrow_mut().turn_usage(
            &response.id,
            usage.input_tokens,
            usage.output_tokens,
        );
    }
}
