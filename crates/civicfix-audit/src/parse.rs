use serde::Deserialize;
use serde_json::Value;

use civicfix_core::{AuditRecord, AuthorityDirectory, IssueCategory};

use crate::AuditError;

/// Reply as the model sends it, before validation. Numbers arrive as
/// `Value` so numeric strings ("4,500") still parse.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAudit {
    is_civic_issue: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    issue_name: Option<String>,
    #[serde(default)]
    issue_category: Option<String>,
    #[serde(default)]
    dimensions: Option<String>,
    #[serde(default)]
    severity: Option<Value>,
    #[serde(default)]
    material_needed: Option<String>,
    #[serde(default, rename = "costINR")]
    cost_inr: Option<Value>,
    #[serde(default)]
    time_to_fix: Option<String>,
    #[serde(default)]
    formal_email: Option<String>,
    #[serde(default)]
    viral_tweet: Option<String>,
    #[serde(default)]
    target_authority: Option<String>,
    #[serde(default)]
    authority_email: Option<String>,
}

/// Who decided `targetAuthority`/`authorityEmail` on an accepted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RoutedBy {
    /// Resolved locally from the authority directory.
    Directory,
    /// Category unknown; the model's values were kept.
    Model,
}

/// Parse and validate the structured reply text.
pub fn parse_audit(raw: &str) -> Result<AuditRecord, AuditError> {
    if raw.trim().is_empty() {
        return Err(AuditError::EmptyResponse);
    }
    let json = extract_json_object(raw)
        .ok_or_else(|| AuditError::MalformedResponse("no JSON object in reply".to_string()))?;
    let parsed: RawAudit =
        serde_json::from_str(json).map_err(|e| AuditError::MalformedResponse(e.to_string()))?;
    Ok(validate(parsed))
}

/// The reply may be wrapped in a code fence or prose.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&raw[start..=end])
}

fn validate(raw: RawAudit) -> AuditRecord {
    let severity = raw.severity.as_ref().and_then(as_number).map(|s| {
        let clamped = s.round().clamp(1.0, 10.0);
        if clamped != s {
            tracing::debug!(reported = s, clamped, "severity adjusted into 1-10");
        }
        clamped as u8
    });

    let cost_inr = raw
        .cost_inr
        .as_ref()
        .and_then(as_number)
        .filter(|c| {
            let ok = *c >= 0.0;
            if !ok {
                tracing::warn!(reported = c, "dropping negative repair cost");
            }
            ok
        });

    AuditRecord {
        is_civic_issue: raw.is_civic_issue,
        error: if raw.is_civic_issue {
            None
        } else {
            non_empty(raw.error)
        },
        issue_name: non_empty(raw.issue_name),
        issue_category: raw
            .issue_category
            .as_deref()
            .and_then(IssueCategory::from_label),
        dimensions: non_empty(raw.dimensions),
        severity,
        material_needed: non_empty(raw.material_needed),
        cost_inr,
        time_to_fix: non_empty(raw.time_to_fix),
        formal_email: non_empty(raw.formal_email),
        viral_tweet: non_empty(raw.viral_tweet),
        target_authority: non_empty(raw.target_authority),
        authority_email: non_empty(raw.authority_email),
    }
}

/// Finite number from a JSON number or a numeric string like "₹4,500".
fn as_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Re-apply the directory lookup on an accepted record. The category comes
/// from `issueCategory`, else is inferred from the authority or issue name.
pub fn apply_routing(
    record: &mut AuditRecord,
    directory: &AuthorityDirectory,
    location: &str,
) -> RoutedBy {
    let category = record
        .issue_category
        .or_else(|| record.target_authority.as_deref().and_then(IssueCategory::infer))
        .or_else(|| record.issue_name.as_deref().and_then(IssueCategory::infer));

    let Some(category) = category else {
        tracing::warn!(location, "no issue category; keeping model routing");
        return RoutedBy::Model;
    };
    let Some(email) = directory.resolve(category, location) else {
        tracing::warn!(category = category.label(), "category missing from directory; keeping model routing");
        return RoutedBy::Model;
    };

    if record.authority_email.as_deref() != Some(email) {
        tracing::info!(
            category = category.label(),
            location,
            model_email = record.authority_email.as_deref().unwrap_or("-"),
            directory_email = email,
            "routing corrected from directory"
        );
    }
    record.issue_category = Some(category);
    record.target_authority = Some(category.label().to_string());
    record.authority_email = Some(email.to_string());
    RoutedBy::Directory
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_reply() {
        let raw = r#"{
            "isCivicIssue": true,
            "issueName": "Pothole",
            "issueCategory": "GHMC (Roads & Garbage)",
            "dimensions": "1.2m x 0.8m x 0.15m",
            "severity": 7,
            "materialNeeded": "Cold mix asphalt",
            "costINR": 4500,
            "timeToFix": "1 day",
            "formalEmail": "Dear Commissioner,...",
            "viralTweet": "Huge pothole at Uppal",
            "targetAuthority": "GHMC (Roads & Garbage)",
            "authorityEmail": "commissioner-ghmc@gov.in"
        }"#;
        let record = parse_audit(raw).unwrap();
        assert!(record.is_civic_issue);
        assert_eq!(record.severity, Some(7));
        assert_eq!(record.cost_inr, Some(4500.0));
        assert_eq!(record.issue_category, Some(IssueCategory::RoadsAndGarbage));
        assert_eq!(record.time_to_fix.as_deref(), Some("1 day"));
    }

    #[test]
    fn fenced_reply_is_unwrapped() {
        let raw = "```json\n{\"isCivicIssue\": false, \"error\": \"This is a selfie.\"}\n```";
        let record = parse_audit(raw).unwrap();
        assert!(!record.is_civic_issue);
        assert_eq!(record.error.as_deref(), Some("This is a selfie."));
    }

    #[test]
    fn empty_and_malformed_replies() {
        assert!(matches!(parse_audit("  \n"), Err(AuditError::EmptyResponse)));
        assert!(matches!(
            parse_audit("I cannot help with that"),
            Err(AuditError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_audit(r#"{"issueName": "Pothole"}"#),
            Err(AuditError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_audit(r#"{"isCivicIssue": "yes"}"#),
            Err(AuditError::MalformedResponse(_))
        ));
    }

    #[test]
    fn severity_is_clamped_and_rounded() {
        let high = parse_audit(r#"{"isCivicIssue": true, "severity": 14}"#).unwrap();
        assert_eq!(high.severity, Some(10));
        let low = parse_audit(r#"{"isCivicIssue": true, "severity": -3}"#).unwrap();
        assert_eq!(low.severity, Some(1));
        let frac = parse_audit(r#"{"isCivicIssue": true, "severity": 6.6}"#).unwrap();
        assert_eq!(frac.severity, Some(7));
        let text = parse_audit(r#"{"isCivicIssue": true, "severity": "8"}"#).unwrap();
        assert_eq!(text.severity, Some(8));
    }

    #[test]
    fn negative_or_garbage_cost_is_dropped() {
        let neg = parse_audit(r#"{"isCivicIssue": true, "costINR": -200}"#).unwrap();
        assert_eq!(neg.cost_inr, None);
        let junk = parse_audit(r#"{"isCivicIssue": true, "costINR": "unknown"}"#).unwrap();
        assert_eq!(junk.cost_inr, None);
        let formatted = parse_audit(r#"{"isCivicIssue": true, "costINR": "₹4,500"}"#).unwrap();
        assert_eq!(formatted.cost_inr, Some(4500.0));
    }

    #[test]
    fn blank_strings_become_missing() {
        let record =
            parse_audit(r#"{"isCivicIssue": false, "error": "  ", "issueName": ""}"#).unwrap();
        assert!(record.error.is_none());
        assert!(record.issue_name.is_none());
    }

    #[test]
    fn error_text_is_dropped_on_accepted_record() {
        let record = parse_audit(r#"{"isCivicIssue": true, "error": "n/a"}"#).unwrap();
        assert!(record.error.is_none());
    }

    #[test]
    fn routing_overrides_model_email_with_zone() {
        let dir = AuthorityDirectory::builtin();
        let mut record = AuditRecord {
            is_civic_issue: true,
            issue_name: Some("Pothole".into()),
            issue_category: Some(IssueCategory::RoadsAndGarbage),
            target_authority: Some("GHMC".into()),
            authority_email: Some("commissioner-ghmc@gov.in".into()),
            ..Default::default()
        };
        let routed = apply_routing(&mut record, &dir, "Anurag University");
        assert_eq!(routed, RoutedBy::Directory);
        assert_eq!(
            record.authority_email.as_deref(),
            Some("commissioner.ghatkesar@gmail.com")
        );
        assert_eq!(record.target_authority.as_deref(), Some("GHMC (Roads & Garbage)"));
    }

    #[test]
    fn routing_infers_category_from_issue_name() {
        let dir = AuthorityDirectory::builtin();
        let mut record = AuditRecord {
            is_civic_issue: true,
            issue_name: Some("Exposed Wiring".into()),
            ..Default::default()
        };
        assert_eq!(apply_routing(&mut record, &dir, "Gachibowli"), RoutedBy::Directory);
        assert_eq!(
            record.authority_email.as_deref(),
            Some("customerservice@tssouthernpower.com")
        );
        assert_eq!(record.issue_category, Some(IssueCategory::Electricity));
    }

    #[test]
    fn routing_keeps_model_values_without_category() {
        let dir = AuthorityDirectory::builtin();
        let mut record = AuditRecord {
            is_civic_issue: true,
            issue_name: Some("Fallen tree".into()),
            target_authority: Some("Urban Forestry".into()),
            authority_email: Some("forest@example.in".into()),
            ..Default::default()
        };
        assert_eq!(apply_routing(&mut record, &dir, "Abids"), RoutedBy::Model);
        assert_eq!(record.authority_email.as_deref(), Some("forest@example.in"));
    }
}
