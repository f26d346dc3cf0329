use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use civicfix_audit::{AuditError, AuditOutcome, AuditSession, AuditStatus};
use civicfix_core::outbound::{self, ReportView};
use civicfix_core::{AiSettings, FileStore, IssueCategory, SavedReport};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ListLocationsRequest {
    /// Case-insensitive substring to filter by. Omit to list every location.
    query: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct LookupAuthorityRequest {
    /// Issue category label, e.g. "GHMC (Roads & Garbage)". A loose description such as "streetlight" is also accepted.
    category: String,
    /// Location name. Zone-specific contacts take priority over the category default.
    location: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ConfigureRequest {
    /// Gemini API key. Stored in the CivicFix settings file.
    api_key: Option<String>,
    /// Model name, e.g. "gemini-3-flash-preview"
    model: Option<String>,
    /// Request timeout in seconds
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SelectLocationRequest {
    /// A listed location, or "Other (Type Manually)" to use manual_location
    location: String,
    /// Free-text location used when location is "Other (Type Manually)"
    manual_location: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct LoadImageRequest {
    /// Path to the photo of the suspected hazard (JPEG, PNG, WebP, GIF or BMP)
    path: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct RunAuditRequest {
    /// Optional photo to load before auditing. Defaults to the image already loaded.
    image_path: Option<String>,
    /// Optional location to select before auditing. Defaults to the current selection.
    location: Option<String>,
    /// Free-text location when location is "Other (Type Manually)"
    manual_location: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct EditLetterRequest {
    /// Replacement text for the drafted complaint letter
    text: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GetReportRequest {
    /// ID of a saved report, as listed by list_history
    id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ExportLetterRequest {
    /// Directory to write the letter into. Defaults to the working directory.
    dir: Option<String>,
}

// --- Server ---

#[derive(Clone)]
pub struct CivicFixServer {
    session: Arc<AuditSession>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CivicFixServer {
    pub fn new(session: Arc<AuditSession>) -> Self {
        Self {
            session,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "List the incident locations in the picker. The last entry, \"Other (Type Manually)\", switches to free-text entry.")]
    fn list_locations(
        &self,
        Parameters(req): Parameters<ListLocationsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let found = civicfix_core::filter_locations(req.query.as_deref().unwrap_or(""));
        let text = if found.is_empty() {
            "No matching locations.".to_string()
        } else {
            found.join("\n")
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Get the authority directory as JSON: issue category -> {default, zones, emergency?}")]
    fn get_directory(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(
            self.session.directory().to_pretty_json(),
        )]))
    }

    #[tool(description = "Resolve the contact email for an issue category at a location, using the same zone-over-default rule the audit applies.")]
    fn lookup_authority(
        &self,
        Parameters(req): Parameters<LookupAuthorityRequest>,
    ) -> Result<CallToolResult, McpError> {
        let Some(category) =
            IssueCategory::from_label(&req.category).or_else(|| IssueCategory::infer(&req.category))
        else {
            return Ok(CallToolResult::error(vec![Content::text(format!(
                "Unknown issue category '{}'. Expected one of: {}",
                req.category,
                self.session.directory().categories().collect::<Vec<_>>().join(", ")
            ))]));
        };
        let directory = self.session.directory();
        match directory.resolve(category, &req.location) {
            Some(email) => {
                let mut text = format!("{}: {}", category.label(), email);
                if let Some(emergency) = directory.emergency(category) {
                    text.push_str(&format!("\nEmergency: {emergency}"));
                }
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            None => Ok(CallToolResult::error(vec![Content::text(format!(
                "No directory entry for '{}'",
                category.label()
            ))])),
        }
    }

    #[tool(description = "Store the AI service settings and reconnect. Environment variables GEMINI_API_KEY, API_KEY and CIVICFIX_MODEL still take precedence. A new timeout applies from the next audit and must be at least 1 second.")]
    fn configure(
        &self,
        Parameters(req): Parameters<ConfigureRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut settings = civicfix_core::read_settings_file();
        if let Some(key) = req.api_key {
            settings.api_key = key;
        }
        if let Some(model) = req.model {
            settings.model = model;
        }
        if let Some(secs) = req.timeout_secs {
            if secs == 0 {
                return Ok(CallToolResult::error(vec![Content::text(
                    "timeout_secs must be at least 1.",
                )]));
            }
            settings.timeout_secs = secs;
        }
        if let Err(e) = civicfix_core::write_settings(&settings) {
            return Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to save settings: {e}"
            ))]));
        }
        let settings = civicfix_core::read_settings();
        self.session.set_transport(civicfix_audit::connect(&settings));
        self.session.set_timeout(settings.timeout());
        let text = if civicfix_core::ai_configured(&settings) {
            format!("Audit service configured (model {}).", settings.model)
        } else {
            civicfix_audit::MSG_NOT_CONFIGURED.to_string()
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Sign in. Audits are only available to a signed-in session; the flag survives restarts.")]
    fn login(&self) -> Result<CallToolResult, McpError> {
        match self.session.login() {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text("Signed in.")])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to persist session: {e}"
            ))])),
        }
    }

    #[tool(description = "Sign out and clear the loaded image, location and current audit. Saved history is kept.")]
    fn logout(&self) -> Result<CallToolResult, McpError> {
        match self.session.logout() {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text("Signed out.")])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to persist session: {e}"
            ))])),
        }
    }

    #[tool(description = "Show session state: sign-in, selected location, loaded image, pending audit, current issue, error message and history size.")]
    fn session_status(&self) -> Result<CallToolResult, McpError> {
        let json = serde_json::to_string_pretty(&status_json(&self.session))
            .unwrap_or_else(|e| format!("Serialization error: {}", e));
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Select the incident location. Use \"Other (Type Manually)\" together with manual_location for places not in the list.")]
    fn select_location(
        &self,
        Parameters(req): Parameters<SelectLocationRequest>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(manual) = &req.manual_location {
            if let Err(e) = self.session.set_manual_location(manual) {
                return Ok(CallToolResult::error(vec![Content::text(e.user_message())]));
            }
        }
        match self.session.select_location(&req.location) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Ok(CallToolResult::error(vec![Content::text(
                    civicfix_audit::MSG_MISSING_LOCATION,
                )]))
            }
            Err(e) => return Ok(CallToolResult::error(vec![Content::text(e.user_message())])),
        }
        let text = match self.session.resolved_location() {
            Some(loc) => format!("Location: {loc}"),
            None => "Manual entry selected. Provide manual_location before auditing.".to_string(),
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Load a photo as audit evidence. It is downscaled to fit 800x800 and re-encoded as JPEG. Replaces any previous image and clears the current audit.")]
    fn load_image(
        &self,
        Parameters(req): Parameters<LoadImageRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self.session.load_image_file(Path::new(&req.path)) {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text(image_summary(
                &self.session,
            ))])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.user_message())])),
        }
    }

    #[tool(description = "Run the AI audit on the loaded image and selected location. Returns the report (issue, dimensions, severity, material, cost in INR, time to fix, responsible authority, drafted letter, mailto and social links) or the rejection/error message.")]
    async fn run_audit(
        &self,
        Parameters(req): Parameters<RunAuditRequest>,
    ) -> Result<CallToolResult, McpError> {
        // Inputs belong to the pending audit until it returns.
        if self.session.is_in_flight() {
            return Ok(CallToolResult::error(vec![Content::text(civicfix_audit::MSG_BUSY)]));
        }
        if let Some(manual) = &req.manual_location {
            if let Err(e) = self.session.set_manual_location(manual) {
                return Ok(CallToolResult::error(vec![Content::text(e.user_message())]));
            }
        }
        if let Some(location) = &req.location {
            match self.session.select_location(location) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Ok(CallToolResult::error(vec![Content::text(
                        civicfix_audit::MSG_MISSING_LOCATION,
                    )]))
                }
                Err(e) => return Ok(CallToolResult::error(vec![Content::text(e.user_message())])),
            }
        }
        if let Some(path) = &req.image_path {
            if let Err(e) = self.session.load_image_file(Path::new(path)) {
                return Ok(CallToolResult::error(vec![Content::text(e.user_message())]));
            }
        }

        match self.session.run_audit().await {
            AuditStatus::Completed(_) => match self.session.report_view() {
                Some(view) => Ok(CallToolResult::success(vec![Content::text(view_json(&view))])),
                None => Ok(CallToolResult::error(vec![Content::text(
                    civicfix_audit::MSG_AUDIT_FAILURE,
                )])),
            },
            status => Ok(CallToolResult::error(vec![Content::text(
                status.message().unwrap_or(civicfix_audit::MSG_AUDIT_FAILURE),
            )])),
        }
    }

    #[tool(description = "Get the report for the audit currently on screen, including any letter edits.")]
    fn current_report(&self) -> Result<CallToolResult, McpError> {
        match self.session.report_view() {
            Some(view) => Ok(CallToolResult::success(vec![Content::text(view_json(&view))])),
            None => Ok(CallToolResult::error(vec![Content::text(
                "No audit on screen. Use run_audit first.",
            )])),
        }
    }

    #[tool(description = "Replace the drafted complaint letter. The mailto link and exported file use the edited text.")]
    fn edit_letter(
        &self,
        Parameters(req): Parameters<EditLetterRequest>,
    ) -> Result<CallToolResult, McpError> {
        if self.session.edit_letter(&req.text) {
            Ok(CallToolResult::success(vec![Content::text("Letter updated.")]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(
                "No audit on screen. Use run_audit first.",
            )]))
        }
    }

    #[tool(description = "Write the current letter to CivicFix_Report_<issue>.txt and return the file path.")]
    fn export_letter(
        &self,
        Parameters(req): Parameters<ExportLetterRequest>,
    ) -> Result<CallToolResult, McpError> {
        let Some(view) = self.session.report_view() else {
            return Ok(CallToolResult::error(vec![Content::text(
                "No audit on screen. Use run_audit first.",
            )]));
        };
        let dir = req.dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        match outbound::export_letter(&dir, &view.issue_name, &view.letter) {
            Ok(path) => Ok(CallToolResult::success(vec![Content::text(
                path.display().to_string(),
            )])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to write letter to {}: {e}",
                dir.display()
            ))])),
        }
    }

    #[tool(description = "Clear the visible error message.")]
    fn dismiss_error(&self) -> Result<CallToolResult, McpError> {
        self.session.dismiss_error();
        Ok(CallToolResult::success(vec![Content::text("Error cleared.")]))
    }

    #[tool(description = "Start a new report: clear the image, location, current audit and error.")]
    fn reset(&self) -> Result<CallToolResult, McpError> {
        self.session.reset();
        Ok(CallToolResult::success(vec![Content::text("Ready for a new report.")]))
    }

    #[tool(description = "List saved reports, newest first (at most 10): id, date, issue and location.")]
    fn list_history(&self) -> Result<CallToolResult, McpError> {
        let history = self.session.history();
        let text = if history.is_empty() {
            "No saved reports.".to_string()
        } else {
            history_lines(&history).join("\n")
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Delete every saved report.")]
    fn clear_history(&self) -> Result<CallToolResult, McpError> {
        match self.session.clear_history() {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text("History cleared.")])),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!(
                "Failed to clear history: {e}"
            ))])),
        }
    }

    #[tool(description = "Get a saved report by id.")]
    fn get_report(
        &self,
        Parameters(req): Parameters<GetReportRequest>,
    ) -> Result<CallToolResult, McpError> {
        match self.session.saved_report_view(&req.id) {
            Some(view) => Ok(CallToolResult::success(vec![Content::text(view_json(&view))])),
            None => Ok(CallToolResult::error(vec![Content::text(format!(
                "No saved report with id '{}'",
                req.id
            ))])),
        }
    }
}

const INSTRUCTIONS: &str = r#"CivicFix audits photos of urban infrastructure hazards in Hyderabad (potholes, garbage, leaks, exposed wiring, broken signals) and drafts a complaint to the responsible authority.

## Workflow
1. `login` once. The sign-in flag is persisted.
2. `select_location` with a listed place (see `list_locations`) or "Other (Type Manually)" plus `manual_location`.
3. `load_image` with a path to the photo.
4. `run_audit`. On success you get the report; non-civic photos are rejected with a message.
5. Optionally `edit_letter`, then use the report's `mailto` / `tweetIntent` links or `export_letter`.

Accepted audits are saved to history (newest 10). The authority email is always taken from the local directory when the issue category is known."#;

#[tool_handler]
impl ServerHandler for CivicFixServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// --- Helpers ---

fn view_json(view: &ReportView) -> String {
    serde_json::to_string_pretty(view).unwrap_or_else(|e| format!("Serialization error: {}", e))
}

fn image_summary(session: &AuditSession) -> String {
    match session.image() {
        Some(img) => format!(
            "Image loaded ({}x{}, {} bytes base64).",
            img.width,
            img.height,
            img.payload.len()
        ),
        None => "No image loaded.".to_string(),
    }
}

fn status_json(session: &AuditSession) -> serde_json::Value {
    let image = session.image().map(|img| {
        serde_json::json!({ "width": img.width, "height": img.height })
    });
    let current = session.current().map(|c| {
        serde_json::json!({
            "issueName": c.record.display_issue_name(),
            "location": c.location,
            "routedBy": c.routed_by,
            "sources": c.sources.len(),
        })
    });
    serde_json::json!({
        "loggedIn": session.is_logged_in(),
        "location": session.resolved_location(),
        "image": image,
        "auditInFlight": session.is_in_flight(),
        "current": current,
        "error": session.error(),
        "historyCount": session.history().len(),
    })
}

fn history_lines(history: &[SavedReport]) -> Vec<String> {
    history
        .iter()
        .map(|r| {
            let when = chrono::DateTime::from_timestamp_millis(r.timestamp)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "{}  {}  {} @ {}",
                r.id,
                when,
                r.audit.display_issue_name(),
                r.location
            )
        })
        .collect()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the MCP protocol
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    // Handle `civicfix-mcp audit <image> <location>` one-shot subcommand
    if let Some("audit") = args.next().as_deref() {
        let (Some(image), Some(location)) = (args.next(), args.next()) else {
            eprintln!("usage: civicfix-mcp audit <image> <location>");
            std::process::exit(2);
        };
        return audit_once(Path::new(&image), &location).await;
    }

    let settings = civicfix_core::read_settings();
    let session = AuditSession::new(
        Arc::new(FileStore::open_default()),
        civicfix_audit::connect(&settings),
    )
    .with_timeout(settings.timeout());
    tracing::info!(
        data_dir = %civicfix_core::data_dir().display(),
        configured = civicfix_core::ai_configured(&settings),
        "starting civicfix MCP server"
    );

    let service = CivicFixServer::new(Arc::new(session))
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| eprintln!("MCP server error: {}", e))?;
    service.waiting().await?;
    Ok(())
}

/// Audit a single photo and print the report as JSON. Nothing is saved.
async fn audit_once(image: &Path, location: &str) -> Result<(), Box<dyn std::error::Error>> {
    let settings: AiSettings = civicfix_core::read_settings();
    let transport = civicfix_audit::connect(&settings);
    let prepared = civicfix_audit::prepare_image_file(image)?;
    let timeout = settings.timeout();

    let call = civicfix_audit::submit_audit(
        transport.as_ref(),
        civicfix_core::directory::directory(),
        &prepared.payload,
        location,
    );
    let outcome = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(AuditError::Timeout(timeout)),
    };

    match outcome {
        Ok(AuditOutcome::Accepted(reply)) => {
            let view = ReportView::build(
                &reply.record,
                location.trim(),
                civicfix_core::directory::routing(),
                None,
            );
            println!("{}", view_json(&view));
            Ok(())
        }
        Ok(AuditOutcome::Rejected(rejection)) => {
            eprintln!("{}", rejection.message());
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "audit failed");
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }
}
