//! Follow-up actions on a finished audit: display strings, `mailto:` and
//! social intent links, and the plain-text letter export. None of these feed
//! back into the audit itself.

use std::fs;
use std::path::{Path, PathBuf};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;

use crate::{AuditRecord, RoutingMap};

/// Characters left unescaped by `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const HASHTAGS: &str = "#CivicHub #UrbanAudit";
const TWEET_INTENT: &str = "https://twitter.com/intent/tweet?text=";
const RESERVED_IN_FILENAME: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

pub fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, URI_COMPONENT).to_string()
}

pub fn email_subject(issue_name: &str, location: &str) -> String {
    format!("URGENT: Safety Hazard Report - {issue_name} at {location}")
}

pub fn mailto_link(to: &str, subject: &str, body: &str) -> String {
    format!(
        "mailto:{to}?subject={}&body={}",
        encode_component(subject),
        encode_component(body)
    )
}

pub fn social_post_text(handle: &str, message: &str) -> String {
    format!("{handle} {message} {HASHTAGS}")
}

pub fn tweet_intent_url(routing: &RoutingMap, location: &str, message: &str) -> String {
    let text = social_post_text(routing.handle_for(location), message);
    format!("{TWEET_INTENT}{}", encode_component(&text))
}

/// `CivicFix_Report_<name>.txt`. Each run of whitespace, path separators or
/// other characters reserved in file names becomes a single `_`.
pub fn download_filename(issue_name: &str) -> String {
    let mut name = String::with_capacity(issue_name.len());
    let mut in_gap = false;
    for ch in issue_name.chars() {
        if ch.is_whitespace() || ch.is_control() || RESERVED_IN_FILENAME.contains(&ch) {
            if !in_gap {
                name.push('_');
            }
            in_gap = true;
        } else {
            name.push(ch);
            in_gap = false;
        }
    }
    format!("CivicFix_Report_{name}.txt")
}

/// Rupee amount with Indian digit grouping (`₹1,50,000`), up to three
/// fraction digits.
pub fn format_cost_inr(amount: f64) -> String {
    let fixed = format!("{:.3}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac = frac_part.trim_end_matches('0');

    let mut out = String::from("₹");
    if amount < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    out.push_str(&group_indian(int_part));
    if !frac.is_empty() {
        out.push('.');
        out.push_str(frac);
    }
    out
}

fn group_indian(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }
    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();
    format!("{},{}", groups.join(","), tail)
}

pub fn format_severity(severity: u8) -> String {
    format!("{severity} / 10")
}

// --- Report view ---

/// Everything a front end needs to render one accepted audit.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportView {
    pub issue_name: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity_display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_needed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_fix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_authority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority_email: Option<String>,
    pub email_subject: String,
    /// Letter body, possibly edited by the user.
    pub letter: String,
    pub draft_letter_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tweet_intent: Option<String>,
    pub download_filename: String,
}

impl ReportView {
    /// `edited_letter` replaces the model's letter in the mail link and export.
    pub fn build(
        record: &AuditRecord,
        location: &str,
        routing: &RoutingMap,
        edited_letter: Option<&str>,
    ) -> Self {
        let issue_name = record.display_issue_name().to_string();
        let letter = edited_letter
            .map(str::to_string)
            .or_else(|| record.formal_email.clone())
            .unwrap_or_default();
        let subject = email_subject(&issue_name, location);
        let mailto = record
            .authority_email
            .as_deref()
            .map(|to| mailto_link(to, &subject, &letter));
        let tweet_intent = record
            .viral_tweet
            .as_deref()
            .map(|tweet| tweet_intent_url(routing, location, tweet));

        Self {
            download_filename: download_filename(&issue_name),
            issue_name,
            location: location.to_string(),
            cost_display: record.cost_inr.map(format_cost_inr),
            severity_display: record.severity.map(format_severity),
            dimensions: record.dimensions.clone(),
            material_needed: record.material_needed.clone(),
            time_to_fix: record.time_to_fix.clone(),
            target_authority: record.target_authority.clone(),
            authority_email: record.authority_email.clone(),
            email_subject: subject,
            draft_letter_available: !letter.trim().is_empty(),
            letter,
            mailto,
            tweet_intent,
        }
    }
}

/// Write the letter as a plain-text file in `dir`, returning its path.
pub fn export_letter(dir: &Path, issue_name: &str, letter: &str) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(download_filename(issue_name));
    fs::write(&path, letter)?;
    Ok(path)
}
