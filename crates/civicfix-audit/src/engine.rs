use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use civicfix_core::AiSettings;

use crate::evidence::{TransportPayload, MIME_TYPE};
use crate::AuditError;

/// One outbound audit call.
#[derive(Debug, Clone)]
pub struct AuditRequest {
    pub image: TransportPayload,
    pub mime_type: &'static str,
    /// Instruction text with the location context appended.
    pub text: String,
    pub response_schema: Value,
}

impl AuditRequest {
    pub fn new(image: TransportPayload, text: String, response_schema: Value) -> Self {
        Self {
            image,
            mime_type: MIME_TYPE,
            text,
            response_schema,
        }
    }
}

/// What came back: the structured reply text plus opaque grounding sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub sources: Vec<Value>,
}

/// Seam between the audit pipeline and the hosted model.
#[async_trait]
pub trait AuditTransport: Send + Sync {
    async fn generate(&self, request: &AuditRequest) -> Result<ModelResponse, AuditError>;
}

/// Stands in until an API key is configured; every call fails.
pub struct Unconfigured;

#[async_trait]
impl AuditTransport for Unconfigured {
    async fn generate(&self, _request: &AuditRequest) -> Result<ModelResponse, AuditError> {
        Err(AuditError::NotConfigured)
    }
}

/// Transport for `settings`, or [`Unconfigured`] when no key is set.
pub fn connect(settings: &AiSettings) -> Arc<dyn AuditTransport> {
    match GeminiClient::new(settings.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::warn!(error = %e, "audit service unavailable");
            Arc::new(Unconfigured)
        }
    }
}

// --- Gemini REST transport ---

/// Headroom so the session's own bound fires before the HTTP client's.
const HTTP_GRACE: Duration = Duration::from_secs(5);

pub(crate) fn http_timeout(settings: &AiSettings) -> Duration {
    settings.timeout() + HTTP_GRACE
}

/// A client-side timeout is still a timeout, not a generic failure.
pub(crate) fn classify(err: reqwest::Error, limit: Duration) -> AuditError {
    if err.is_timeout() {
        AuditError::Timeout(limit)
    } else {
        err.into()
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    settings: AiSettings,
}

impl GeminiClient {
    pub fn new(settings: AiSettings) -> Result<Self, AuditError> {
        if !civicfix_core::ai_configured(&settings) {
            return Err(AuditError::NotConfigured);
        }
        let http = reqwest::Client::builder()
            .timeout(http_timeout(&settings))
            .build()?;
        Ok(Self { http, settings })
    }

    pub fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        )
    }
}

#[async_trait]
impl AuditTransport for GeminiClient {
    async fn generate(&self, request: &AuditRequest) -> Result<ModelResponse, AuditError> {
        tracing::info!(model = %self.settings.model, payload_bytes = request.image.len(), "sending audit request");

        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.settings.api_key)
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| classify(e, self.settings.timeout()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "audit service rejected request");
            return Err(AuditError::Service {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AuditError::Timeout(self.settings.timeout())
            } else {
                AuditError::MalformedResponse(e.to_string())
            }
        })?;
        Ok(extract_response(&body))
    }
}

/// `generateContent` body: inline image, text part, JSON-constrained output.
pub fn request_body(request: &AuditRequest) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "inlineData": { "mimeType": request.mime_type, "data": request.image.as_str() } },
                { "text": request.text }
            ]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": request.response_schema
        }
    })
}

/// Pull the reply text and grounding chunks out of the first candidate.
pub fn extract_response(body: &Value) -> ModelResponse {
    let candidate = body.pointer("/candidates/0");

    let text: String = candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    let sources = candidate
        .and_then(|c| c.pointer("/groundingMetadata/groundingChunks"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    ModelResponse {
        text: (!text.trim().is_empty()).then_some(text),
        sources,
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_image_text_and_schema() {
        let req = AuditRequest::new(
            TransportPayload::new("QUJD"),
            "inspect\n\nLocation context: Uppal".to_string(),
            json!({"type": "OBJECT"}),
        );
        let body = request_body(&req);
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["data"], "QUJD");
        assert_eq!(
            body["contents"][0]["parts"][1]["text"],
            "inspect\n\nLocation context: Uppal"
        );
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "OBJECT");
    }

    #[test]
    fn extract_joins_text_parts_and_keeps_sources() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [ { "text": "{\"isCivic" }, { "text": "Issue\":false}" } ] },
                "groundingMetadata": { "groundingChunks": [ { "web": { "uri": "https://ghmc.gov.in" } } ] }
            }]
        });
        let resp = extract_response(&body);
        assert_eq!(resp.text.as_deref(), Some("{\"isCivicIssue\":false}"));
        assert_eq!(resp.sources.len(), 1);
        assert_eq!(resp.sources[0]["web"]["uri"], "https://ghmc.gov.in");
    }

    #[test]
    fn extract_without_candidates_is_empty() {
        assert_eq!(extract_response(&json!({})), ModelResponse::default());
        let blank = json!({"candidates": [{"content": {"parts": [{"text": "  "}]}}]});
        assert!(extract_response(&blank).text.is_none());
    }

    #[test]
    fn client_requires_key() {
        assert!(matches!(
            GeminiClient::new(AiSettings::default()),
            Err(AuditError::NotConfigured)
        ));
        let client = GeminiClient::new(AiSettings {
            api_key: "k".into(),
            endpoint: "https://example.test/v1beta/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            client.url(),
            "https://example.test/v1beta/models/gemini-3-flash-preview:generateContent"
        );
    }

    #[tokio::test]
    async fn unconfigured_transport_always_fails() {
        let transport = connect(&AiSettings::default());
        let req = AuditRequest::new(TransportPayload::new("QUJD"), String::new(), json!({}));
        assert!(matches!(
            transport.generate(&req).await,
            Err(AuditError::NotConfigured)
        ));
    }

    #[test]
    fn http_client_outlasts_session_bound() {
        let settings = AiSettings {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(http_timeout(&settings) > settings.timeout());
        assert!(http_timeout(&AiSettings::default()) > AiSettings::default().timeout());
    }

    #[tokio::test]
    async fn client_timeout_maps_to_timeout_error() {
        // Accepts the connection into the backlog but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let err = reqwest::Client::new()
            .get(url)
            .timeout(Duration::from_millis(50))
            .send()
            .await
            .unwrap_err();
        let limit = Duration::from_secs(7);
        let mapped = classify(err, limit);
        assert!(matches!(mapped, AuditError::Timeout(d) if d == limit));
        assert_eq!(mapped.user_message(), crate::MSG_TIMEOUT);
        drop(listener);
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("₹₹₹", 2), "₹₹...");
        assert_eq!(truncate("ok", 5), "ok");
    }
}
