//! Tool declarations and dispatch for model-requested side effects.
//!
//! Declarations are the provider's wire shape. Dispatch never surfaces
//! an error payload as a Rust error — failures become part of the tool
//! output so the model can react to them.

use anyhow::Result;
use serde_json::{json, Value};

use crate::enrich::{EnrichClient, EnrichOptions, EnrichmentResult};

pub const ENRICH_TOOL: &str = "enrich_email";
pub const AUTH_TOOL: &str = "google_auth";
pub const PAYMENT_TOOL: &str = "stripe_payment";
pub const WEB_SEARCH_TOOL: &str = "web_search";

/// The full tool set declared on every turn. `tool_choice` stays on
/// automatic selection; the model decides when to call.
pub fn declarations() -> Vec<Value> {
    vec![
        json!({ "type": WEB_SEARCH_TOOL }),
        json!({
            "type": "function",
            "name": ENRICH_TOOL,
            "description": "Look up a person by work email and return name, title, company and related profile fields.",
            "parameters": {
                "type": "object",
                "properties": {
                    "email": { "type": "string", "description": "The email address to look up" }
                },
                "required": ["email"]
            }
        }),
        json!({
            "type": "function",
            "name": AUTH_TOOL,
            "description": "Link the user's Google account for sign-in.",
            "parameters": { "type": "object", "properties": {} }
        }),
        json!({
            "type": "function",
            "name": PAYMENT_TOOL,
            "description": "Verify a payment method with Stripe.",
            "parameters": { "type": "object", "properties": {} }
        }),
    ]
}

/// The declared set minus the built-in web-search capability, for the
/// reduced retry when a model rejects it.
pub fn without_web_search(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) != Some(WEB_SEARCH_TOOL))
        .cloned()
        .collect()
}

/// Execute one tool invocation and serialize its output payload.
pub async fn dispatch(name: &str, arguments: &str, enricher: &EnrichClient) -> Result<String> {
    let payload = match name {
        ENRICH_TOOL => {
            let result = match parse_email_argument(arguments) {
                Some(email) => enricher.enrich(&email, &EnrichOptions::default()).await,
                None => EnrichmentResult::failure("", 400, "missing email"),
            };
            serde_json::to_value(result)?
        }
        AUTH_TOOL => json!({
            "status": 200,
            "message": "Authentication successful. Google account linked."
        }),
        PAYMENT_TOOL => json!({
            "status": 200,
            "message": "Payment method verified with Stripe. No charge was made."
        }),
        other => json!({
            "status": 400,
            "error": format!("unknown tool: {}", other)
        }),
    };
    Ok(payload.to_string())
}

fn parse_email_argument(arguments: &str) -> Option<String> {
    serde_json::from_str::<Value>(arguments)
        .ok()?
        .get("email")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::CountingTransport;
    use std::time::Duration;

    fn offline_enricher() -> EnrichClient {
        // No API key: the enrich path short-circuits before any
        // network activity.
        EnrichClient::with_transport(
            Box::new(CountingTransport::new()),
            "https://enrich.test/v1",
            None,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn declarations_cover_all_tools() {
        let tools = declarations();
        assert_eq!(tools.len(), 4);
        let names: Vec<&str> = tools
            .iter()
            .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
            .collect();
        assert_eq!(names, vec![ENRICH_TOOL, AUTH_TOOL, PAYMENT_TOOL]);
        assert_eq!(tools[0]["type"], WEB_SEARCH_TOOL);
    }

    #[test]
    fn without_web_search_drops_only_the_builtin() {
        let reduced = without_web_search(&declarations());
        assert_eq!(reduced.len(), 3);
        assert!(reduced
            .iter()
            .all(|t| t.get("type").and_then(|v| v.as_str()) == Some("function")));
    }

    #[tokio::test]
    async fn enrich_with_missing_email_synthesizes_local_failure() {
        for arguments in ["{}", "not json", r#"{"email": 42}"#] {
            let output = dispatch(ENRICH_TOOL, arguments, &offline_enricher())
                .await
                .unwrap();
            let payload: serde_json::Value = serde_json::from_str(&output).unwrap();
            assert_eq!(payload["status"], 400, "arguments: {}", arguments);
            assert_eq!(payload["error"], "missing email");
        }
    }

    #[tokio::test]
    async fn enrich_with_email_runs_the_client() {
        let output = dispatch(ENRICH_TOOL, r#"{"email":"ada@acme.com"}"#, &offline_enricher())
            .await
            .unwrap();
        let payload: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(payload["email"], "ada@acme.com");
        // Offline client has no key, so the client's own 401 comes back.
        assert_eq!(payload["status"], 401);
    }

    #[tokio::test]
    async fn mock_tools_return_fixed_success_payloads() {
        for (tool, fragment) in [(AUTH_TOOL, "Google"), (PAYMENT_TOOL, "Stripe")] {
            let output = dispatch(tool, "{}", &offline_enricher()).await.unwrap();
            let payload: serde_json::Value = serde_json::from_str(&output).unwrap();
            assert_eq!(payload["status"], 200);
            assert!(payload["message"].as_str().unwrap().contains(fragment));
        }
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_payload_not_a_rust_error() {
        let output = dispatch("teleport", "{}", &offline_enricher()).await.unwrap();
        let payload: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(payload["status"], 400);
        assert!(payload["error"].as_str().unwrap().contains("teleport"));
    }
}
