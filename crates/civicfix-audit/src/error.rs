use std::time::Duration;

use thiserror::Error;

pub const MSG_MISSING_LOCATION: &str = "Please select or enter an incident location first.";
pub const MSG_MISSING_IMAGE: &str = "No image data available for audit.";
pub const MSG_LOAD_FAILURE: &str = "LOAD FAILURE: Could not process image evidence.";
pub const MSG_AUDIT_FAILURE: &str = "AUDIT FAILURE: Neural link failed. Check municipal connection.";
pub const MSG_TIMEOUT: &str = "AUDIT TIMEOUT: The audit service did not respond in time. Try again.";
pub const MSG_BUSY: &str = "An audit is already in progress.";
pub const MSG_SIGNED_OUT: &str = "Sign in to run an audit.";
pub const MSG_CANCELLED: &str = "Audit discarded: the session was reset while it was running.";
pub const MSG_NOT_CONFIGURED: &str =
    "AUDIT FAILURE: No AI service key configured. Set GEMINI_API_KEY and retry.";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("no incident location selected")]
    MissingLocation,

    #[error("no image loaded")]
    MissingImage,

    #[error("image could not be processed: {0}")]
    ImageLoad(String),

    #[error("audit service request failed: {0}")]
    Transport(String),

    #[error("audit service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    #[error("audit service returned an empty response")]
    EmptyResponse,

    #[error("audit response did not match the declared shape: {0}")]
    MalformedResponse(String),

    #[error("audit timed out after {0:?}")]
    Timeout(Duration),

    #[error("an audit is already in flight")]
    Busy,

    #[error("session is signed out")]
    SignedOut,

    #[error("session was reset before the audit returned")]
    Cancelled,

    #[error("AI service is not configured")]
    NotConfigured,
}

impl AuditError {
    /// The single message shown to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuditError::MissingLocation => MSG_MISSING_LOCATION,
            AuditError::MissingImage => MSG_MISSING_IMAGE,
            AuditError::ImageLoad(_) => MSG_LOAD_FAILURE,
            AuditError::Transport(_)
            | AuditError::Service { .. }
            | AuditError::EmptyResponse
            | AuditError::MalformedResponse(_) => MSG_AUDIT_FAILURE,
            AuditError::Timeout(_) => MSG_TIMEOUT,
            AuditError::Busy => MSG_BUSY,
            AuditError::SignedOut => MSG_SIGNED_OUT,
            AuditError::Cancelled => MSG_CANCELLED,
            AuditError::NotConfigured => MSG_NOT_CONFIGURED,
        }
    }

    /// Input errors the user fixes in place, as opposed to service failures.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            AuditError::MissingLocation
                | AuditError::MissingImage
                | AuditError::ImageLoad(_)
                | AuditError::SignedOut
        )
    }
}

impl From<reqwest::Error> for AuditError {
    fn from(e: reqwest::Error) -> Self {
        AuditError::Transport(e.to_string())
    }
}
