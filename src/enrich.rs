//! Person-lookup enrichment client.
//!
//! Every reachable failure comes back as a structured result — the
//! status and error fields carry all failure information, and the call
//! itself never returns an error. Field extraction is best-effort over
//! heterogeneous upstream schemas: each output field has its own
//! precedence chain and falls through independently.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::Settings;

/// Normalized fields pulled from the upstream payload. Absence of a
/// field is not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Enriched {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub email: String,
    /// HTTP-style status; 0 for transport-level failures.
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enriched: Option<Enriched>,
}

impl EnrichmentResult {
    pub fn failure(email: &str, status: u16, message: impl Into<String>) -> Self {
        Self {
            email: email.to_string(),
            status,
            data: None,
            error: Some(message.into()),
            enriched: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichOptions {
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
}

/// What came back over the wire, before classification.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[async_trait]
pub trait EnrichTransport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<UpstreamReply>;
}

pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnrichTransport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<UpstreamReply> {
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.unwrap_or_default();
        Ok(UpstreamReply {
            status,
            content_type,
            body,
        })
    }
}

pub struct EnrichClient {
    transport: Box<dyn EnrichTransport>,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl EnrichClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            transport: Box::new(HttpTransport::new()),
            base_url: settings.enrich_base_url.trim_end_matches('/').to_string(),
            api_key: settings.enrich_api_key.clone(),
            timeout: settings.enrich_timeout,
        }
    }

    pub fn with_transport(
        transport: Box<dyn EnrichTransport>,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    /// Look up a person by email. Never returns an error: validation,
    /// upstream and transport failures all land in the result's
    /// status/error fields.
    pub async fn enrich(&self, email: &str, opts: &EnrichOptions) -> EnrichmentResult {
        if !email.contains('@') {
            return EnrichmentResult::failure(
                email,
                400,
                "invalid email: expected an address containing '@'",
            );
        }

        let api_key = match opts.api_key.as_ref().or(self.api_key.as_ref()) {
            Some(key) => key.clone(),
            None => {
                return EnrichmentResult::failure(email, 401, "no enrichment API key configured")
            }
        };

        let url = match reqwest::Url::parse_with_params(
            &format!("{}/{}/person/match", self.base_url, api_key),
            &[("email", email), ("include_profile", "true")],
        ) {
            Ok(url) => url,
            Err(e) => return EnrichmentResult::failure(email, 0, format!("bad request URL: {}", e)),
        };

        let timeout = opts.timeout.unwrap_or(self.timeout);
        let reply = match tokio::time::timeout(timeout, self.transport.fetch(url.as_str())).await {
            Err(_) => {
                return EnrichmentResult::failure(
                    email,
                    0,
                    format!("enrichment request timed out after {:?}", timeout),
                )
            }
            Ok(Err(e)) => return EnrichmentResult::failure(email, 0, e.to_string()),
            Ok(Ok(reply)) => reply,
        };

        classify(email, reply)
    }
}

fn classify(email: &str, reply: UpstreamReply) -> EnrichmentResult {
    match reply.status {
        200 => {
            let data = parse_body(&reply);
            let enriched = data.as_ref().map(extract_fields);
            EnrichmentResult {
                email: email.to_string(),
                status: 200,
                data: data.or_else(|| Some(Value::String(reply.body))),
                error: None,
                enriched,
            }
        }
        202 => EnrichmentResult {
            email: email.to_string(),
            status: 202,
            data: None,
            error: Some("enrichment queued upstream; retry later".to_string()),
            enriched: None,
        },
        401 | 403 => EnrichmentResult::failure(
            email,
            reply.status,
            "unauthorized: enrichment API key rejected",
        ),
        404 => EnrichmentResult::failure(email, 404, "no person found for this email"),
        429 => EnrichmentResult::failure(email, 429, "rate limited by enrichment provider"),
        status => {
            let message = parse_body(&reply)
                .and_then(|v| upstream_error_message(&v))
                .unwrap_or_else(|| format!("unexpected enrichment error (status {})", status));
            EnrichmentResult::failure(email, status, message)
        }
    }
}

fn parse_body(reply: &UpstreamReply) -> Option<Value> {
    let is_json = reply
        .content_type
        .as_deref()
        .map(|ct| ct.contains("json"))
        .unwrap_or(false);
    if !is_json {
        return None;
    }
    serde_json::from_str(&reply.body).ok()
}

/// The upstream `error` field may be a bare string or an object with a
/// `message`.
fn upstream_error_message(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string),
        _ => None,
    }
}

// ============ Field extraction ============

/// Non-empty string at a nested key path.
fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn extract_name(root: &Value) -> Option<String> {
    str_at(root, &["profile", "name"])
        .or_else(|| str_at(root, &["profile", "full_name"]))
        .or_else(|| str_at(root, &["full_name"]))
        .or_else(|| str_at(root, &["name"]))
        .or_else(|| {
            let first = str_at(root, &["first_name"])?;
            match str_at(root, &["last_name"]) {
                Some(last) => Some(format!("{} {}", first, last)),
                None => Some(first),
            }
        })
}

fn extract_title(root: &Value) -> Option<String> {
    str_at(root, &["profile", "headline"])
        .or_else(|| str_at(root, &["profile", "title"]))
        .or_else(|| str_at(root, &["title"]))
        .or_else(|| str_at(root, &["job_title"]))
}

fn extract_company(root: &Value) -> Option<String> {
    str_at(root, &["profile", "company", "name"])
        .or_else(|| str_at(root, &["profile", "company"]))
        .or_else(|| str_at(root, &["company", "name"]))
        .or_else(|| str_at(root, &["company"]))
        .or_else(|| str_at(root, &["organization", "name"]))
}

fn extract_profile_url(root: &Value) -> Option<String> {
    str_at(root, &["profile", "url"])
        .or_else(|| str_at(root, &["linkedin_url"]))
        .or_else(|| str_at(root, &["profile_url"]))
        .or_else(|| str_at(root, &["url"]))
}

fn extract_location(root: &Value) -> Option<String> {
    str_at(root, &["profile", "location"])
        .or_else(|| str_at(root, &["location"]))
        .or_else(|| {
            let parts: Vec<String> = ["city", "state", "country"]
                .into_iter()
                .filter_map(|key| str_at(root, &[key]))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        })
}

fn extract_industry(root: &Value) -> Option<String> {
    str_at(root, &["profile", "industry"]).or_else(|| str_at(root, &["industry"]))
}

/// Best-effort extraction of the normalized fields. Each field is
/// evaluated independently; a missing source falls through to the next
/// candidate without affecting the others.
pub fn extract_fields(body: &Value) -> Enriched {
    let root = match body.get("person") {
        Some(person) if person.is_object() => person,
        _ => body,
    };
    Enriched {
        name: extract_name(root),
        title: extract_title(root),
        company: extract_company(root),
        profile_url: extract_profile_url(root),
        location: extract_location(root),
        industry: extract_industry(root),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CountingTransport, SlowTransport, StaticTransport};
    use serde_json::json;

    fn client(transport: Box<dyn EnrichTransport>) -> EnrichClient {
        EnrichClient::with_transport(
            transport,
            "https://enrich.test/v1",
            Some("key-123".to_string()),
            Duration::from_secs(12),
        )
    }

    fn json_reply(status: u16, body: Value) -> UpstreamReply {
        UpstreamReply {
            status,
            content_type: Some("application/json".to_string()),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn rejects_non_email_input_without_network_call() {
        let transport = CountingTransport::new();
        let calls = transport.calls();
        let result = client(Box::new(transport)).enrich("not-an-email", &Default::default()).await;
        assert_eq!(result.status, 400);
        assert!(result.error.is_some());
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn rejects_missing_credential_without_network_call() {
        let transport = CountingTransport::new();
        let calls = transport.calls();
        let client = EnrichClient::with_transport(
            Box::new(transport),
            "https://enrich.test/v1",
            None,
            Duration::from_secs(12),
        );
        let result = client.enrich("ada@acme.com", &Default::default()).await;
        assert_eq!(result.status, 401);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn explicit_key_in_options_wins() {
        let transport = StaticTransport::new(json_reply(200, json!({})));
        let urls = transport.urls();
        let client = EnrichClient::with_transport(
            Box::new(transport),
            "https://enrich.test/v1",
            None,
            Duration::from_secs(12),
        );
        let opts = EnrichOptions {
            api_key: Some("opt-key".to_string()),
            timeout: None,
        };
        let result = client.enrich("ada@acme.com", &opts).await;
        assert_eq!(result.status, 200);
        let urls = urls.lock().unwrap();
        assert!(urls[0].contains("/opt-key/person/match"));
        assert!(urls[0].contains("email=ada%40acme.com"));
        assert!(urls[0].contains("include_profile=true"));
    }

    #[tokio::test]
    async fn flat_name_fields_are_joined() {
        let body = json!({
            "first_name": "Ada",
            "last_name": "Lovelace",
            "title": "Engineer",
            "company": "Acme"
        });
        let transport = StaticTransport::new(json_reply(200, body));
        let result = client(Box::new(transport))
            .enrich("ada@acme.com", &Default::default())
            .await;
        assert_eq!(result.status, 200);
        let enriched = result.enriched.unwrap();
        assert_eq!(enriched.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(enriched.title.as_deref(), Some("Engineer"));
        assert_eq!(enriched.company.as_deref(), Some("Acme"));
        assert!(result.data.is_some());
    }

    #[tokio::test]
    async fn structured_profile_wins_over_flat_fallbacks() {
        let body = json!({
            "person": {
                "profile": {
                    "headline": "VP Engineering",
                    "company": {"name": "Acme Corp"},
                    "url": "https://linkedin.com/in/ada",
                    "industry": "Software"
                },
                "title": "Engineer",
                "company": "Acme",
                "full_name": "Ada Lovelace",
                "location": "London, UK"
            }
        });
        let transport = StaticTransport::new(json_reply(200, body));
        let result = client(Box::new(transport))
            .enrich("ada@acme.com", &Default::default())
            .await;
        let enriched = result.enriched.unwrap();
        // Structured source per field; the missing profile.name falls
        // through to full_name without failing the rest.
        assert_eq!(enriched.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(enriched.title.as_deref(), Some("VP Engineering"));
        assert_eq!(enriched.company.as_deref(), Some("Acme Corp"));
        assert_eq!(
            enriched.profile_url.as_deref(),
            Some("https://linkedin.com/in/ada")
        );
        assert_eq!(enriched.location.as_deref(), Some("London, UK"));
        assert_eq!(enriched.industry.as_deref(), Some("Software"));
    }

    #[tokio::test]
    async fn rate_limit_is_classified_regardless_of_body() {
        let transport = StaticTransport::new(UpstreamReply {
            status: 429,
            content_type: Some("text/html".to_string()),
            body: "<html>slow down</html>".to_string(),
        });
        let result = client(Box::new(transport))
            .enrich("ada@acme.com", &Default::default())
            .await;
        assert_eq!(result.status, 429);
        assert!(result.error.as_deref().unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn accepted_means_queued_not_error() {
        let transport = StaticTransport::new(json_reply(202, json!({})));
        let result = client(Box::new(transport))
            .enrich("ada@acme.com", &Default::default())
            .await;
        assert_eq!(result.status, 202);
        assert!(result.error.as_deref().unwrap().contains("retry later"));
        assert!(result.enriched.is_none());
    }

    #[tokio::test]
    async fn unexpected_status_preserves_code_and_reads_error_field() {
        let transport = StaticTransport::new(json_reply(500, json!({"error": "db down"})));
        let result = client(Box::new(transport))
            .enrich("ada@acme.com", &Default::default())
            .await;
        assert_eq!(result.status, 500);
        assert_eq!(result.error.as_deref(), Some("db down"));

        let transport = StaticTransport::new(UpstreamReply {
            status: 502,
            content_type: None,
            body: String::new(),
        });
        let result = client(Box::new(transport))
            .enrich("ada@acme.com", &Default::default())
            .await;
        assert_eq!(result.status, 502);
        assert!(result.error.as_deref().unwrap().contains("unexpected"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_status_zero_within_bounds() {
        let transport = SlowTransport::new(Duration::from_secs(3600));
        let client = client(Box::new(transport));
        let opts = EnrichOptions {
            api_key: None,
            timeout: Some(Duration::from_millis(200)),
        };
        let started = tokio::time::Instant::now();
        let result = client.enrich("ada@acme.com", &opts).await;
        assert_eq!(result.status, 0);
        assert!(!result.error.as_deref().unwrap_or_default().is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn transport_failure_becomes_status_zero() {
        struct FailingTransport;
        #[async_trait]
        impl EnrichTransport for FailingTransport {
            async fn fetch(&self, _url: &str) -> Result<UpstreamReply> {
                Err(anyhow::anyhow!("connection reset by peer"))
            }
        }
        let result = client(Box::new(FailingTransport))
            .enrich("ada@acme.com", &Default::default())
            .await;
        assert_eq!(result.status, 0);
        assert!(result.error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn non_json_success_keeps_raw_body() {
        let transport = StaticTransport::new(UpstreamReply {
            status: 200,
            content_type: Some("text/plain".to_string()),
            body: "ok".to_string(),
        });
        let result = client(Box::new(transport))
            .enrich("ada@acme.com", &Default::default())
            .await;
        assert_eq!(result.status, 200);
        assert_eq!(result.data, Some(Value::String("ok".to_string())));
        assert!(result.enriched.is_none());
    }

    #[test]
    fn location_is_assembled_from_parts() {
        let enriched = extract_fields(&json!({
            "city": "London",
            "country": "UK"
        }));
        assert_eq!(enriched.location.as_deref(), Some("London, UK"));
    }
}
