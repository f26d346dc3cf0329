pub mod directory;
pub mod outbound;
pub mod store;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub use directory::{
    filter_locations, AuthorityDirectory, AuthorityEntry, DirectoryError, IssueCategory,
    LocationChoice, RoutingMap, LOCATIONS, OTHER_LOCATION,
};
pub use store::{FileStore, HistoryStore, KeyValueStore, MemoryStore, StoreError, HISTORY_LIMIT};

// --- Audit record (wire shape shared with the AI service and the history store) ---

/// One structured audit. Only `is_civic_issue` is guaranteed by the service
/// contract; everything else may be missing and is modeled as `Option`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub is_civic_issue: bool,
    /// Rejection reason, set only when `is_civic_issue` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_category: Option<IssueCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
    /// 1-10 once validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_needed: Option<String>,
    #[serde(default, rename = "costINR", skip_serializing_if = "Option::is_none")]
    pub cost_inr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_fix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formal_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viral_tweet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_email: Option<String>,
}

impl AuditRecord {
    /// Issue name for subject lines and file names, tolerant of a missing field.
    pub fn display_issue_name(&self) -> &str {
        self.issue_name.as_deref().unwrap_or("Civic Issue")
    }
}

/// Denormalized history entry. `image` is the display data URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedReport {
    pub id: String,
    pub audit: AuditRecord,
    pub image: String,
    pub location: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl SavedReport {
    pub fn new(audit: AuditRecord, image: String, location: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            audit,
            image,
            location,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

// --- Data directory ---

/// Resolve the data directory: `$CIVICFIX_HOME`, else `~/.civicfix/`.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("CIVICFIX_HOME") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".civicfix")
}

// --- AI Settings ---

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AiSettings {
    /// Audit request bound. A stored zero would fail every call, so the
    /// floor is one second.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Settings as stored on disk, without environment overrides.
/// A missing or unreadable file falls back to defaults.
pub fn read_settings_file() -> AiSettings {
    let path = settings_path();
    fs::read_to_string(&path)
        .ok()
        .and_then(|s| match serde_json::from_str(&s) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable settings file");
                None
            }
        })
        .unwrap_or_default()
}

/// Stored settings with environment overrides applied.
pub fn read_settings() -> AiSettings {
    let mut settings = read_settings_file();
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// `GEMINI_API_KEY` wins over `API_KEY`; `CIVICFIX_MODEL` replaces the model.
pub fn apply_env_overrides<F>(settings: &mut AiSettings, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = var("GEMINI_API_KEY")
        .or_else(|| var("API_KEY"))
        .filter(|k| !k.is_empty())
    {
        settings.api_key = key;
    }
    if let Some(model) = var("CIVICFIX_MODEL").filter(|m| !m.is_empty()) {
        settings.model = model;
    }
}

pub fn write_settings(settings: &AiSettings) -> Result<(), StoreError> {
    let dir = data_dir();
    fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(settings_path(), json)?;
    Ok(())
}

pub fn ai_configured(settings: &AiSettings) -> bool {
    !settings.api_key.is_empty() && !settings.model.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn record_reads_service_field_names() {
        let raw = r#"{"isCivicIssue":true,"issueName":"Pothole","costINR":4500,"severity":7}"#;
        let record: AuditRecord = serde_json::from_str(raw).unwrap();
        assert!(record.is_civic_issue);
        assert_eq!(record.issue_name.as_deref(), Some("Pothole"));
        assert_eq!(record.cost_inr, Some(4500.0));
        assert_eq!(record.severity, Some(7));
        assert!(record.formal_email.is_none());

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["costINR"], 4500.0);
        assert!(back.get("error").is_none());
    }

    #[test]
    fn missing_issue_name_has_display_fallback() {
        let record = AuditRecord {
            is_civic_issue: true,
            ..Default::default()
        };
        assert_eq!(record.display_issue_name(), "Civic Issue");
    }

    #[test]
    fn env_overrides_prefer_gemini_key() {
        let env: HashMap<&str, &str> = [
            ("GEMINI_API_KEY", "g-key"),
            ("API_KEY", "plain-key"),
            ("CIVICFIX_MODEL", "gemini-2.5-flash"),
        ]
        .into_iter()
        .collect();
        let mut settings = AiSettings::default();
        apply_env_overrides(&mut settings, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(settings.api_key, "g-key");
        assert_eq!(settings.model, "gemini-2.5-flash");
        assert!(ai_configured(&settings));
    }

    #[test]
    fn settings_defaults_fill_partial_file() {
        let settings: AiSettings = serde_json::from_str(r#"{"apiKey":"k"}"#).unwrap();
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(!ai_configured(&AiSettings::default()));
    }

    #[test]
    fn zero_timeout_is_floored() {
        let settings: AiSettings = serde_json::from_str(r#"{"timeoutSecs":0}"#).unwrap();
        assert_eq!(settings.timeout(), Duration::from_secs(1));
        assert_eq!(AiSettings::default().timeout(), Duration::from_secs(60));
    }
}
