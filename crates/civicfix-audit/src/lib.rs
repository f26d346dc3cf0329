pub mod engine;
mod error;
pub mod evidence;
pub mod parse;
pub mod prompt;
pub mod session;

use serde_json::Value;

use civicfix_core::{AuditRecord, AuthorityDirectory};

pub use engine::{connect, AuditRequest, AuditTransport, GeminiClient, ModelResponse, Unconfigured};
pub use error::*;
pub use evidence::{prepare_image, prepare_image_file, PreparedImage, TransportPayload};
pub use parse::RoutedBy;
pub use session::{AuditSession, AuditStatus, CurrentAudit};

pub const GATEKEEPER_MESSAGE: &str = "GATEKEEPER REJECTION: No infrastructure failure detected.";

/// Why an image was turned away by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The model explained itself.
    Reason(String),
    /// No reason given.
    Gatekeeper,
}

impl Rejection {
    pub fn from_record(record: &AuditRecord) -> Self {
        match &record.error {
            Some(reason) => Rejection::Reason(reason.clone()),
            None => Rejection::Gatekeeper,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Rejection::Reason(reason) => reason,
            Rejection::Gatekeeper => GATEKEEPER_MESSAGE,
        }
    }
}

/// Accepted audit with its routing provenance and grounding sources.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditReply {
    pub record: AuditRecord,
    pub routed_by: RoutedBy,
    pub sources: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuditOutcome {
    Accepted(AuditReply),
    Rejected(Rejection),
}

/// Build the request, make the single call, parse and route the reply.
pub async fn submit_audit(
    transport: &dyn AuditTransport,
    directory: &AuthorityDirectory,
    payload: &TransportPayload,
    location: &str,
) -> Result<AuditOutcome, AuditError> {
    if payload.is_empty() {
        return Err(AuditError::MissingImage);
    }
    let location = location.trim();
    if location.is_empty() {
        return Err(AuditError::MissingLocation);
    }

    let request = AuditRequest::new(
        payload.clone(),
        prompt::user_text(directory, location),
        prompt::response_schema(),
    );
    let response = transport.generate(&request).await?;
    let text = response.text.ok_or(AuditError::EmptyResponse)?;
    let mut record = parse::parse_audit(&text)?;

    if !record.is_civic_issue {
        let rejection = Rejection::from_record(&record);
        tracing::info!(location, reason = rejection.message(), "audit rejected by gatekeeper");
        return Ok(AuditOutcome::Rejected(rejection));
    }

    let routed_by = parse::apply_routing(&mut record, directory, location);
    tracing::info!(
        location,
        issue = record.display_issue_name(),
        severity = ?record.severity,
        ?routed_by,
        "audit accepted"
    );
    Ok(AuditOutcome::Accepted(AuditReply {
        record,
        routed_by,
        sources: response.sources,
    }))
}
