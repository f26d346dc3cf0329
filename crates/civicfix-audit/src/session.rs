//! Application state for one user: sign-in flag, selected location, loaded
//! evidence, the current audit and its error, plus the persisted history.
//!
//! Every audit-path failure is caught here and turned into a single message
//! in [`AuditSession::error`]; the in-flight flag is always released.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use civicfix_core::outbound::ReportView;
use civicfix_core::store::{self, HistoryStore, KeyValueStore, StoreError};
use civicfix_core::{
    AuditRecord, AuthorityDirectory, LocationChoice, RoutingMap, SavedReport, DEFAULT_TIMEOUT_SECS,
};

use crate::engine::AuditTransport;
use crate::evidence::{self, PreparedImage};
use crate::parse::RoutedBy;
use crate::{AuditError, AuditOutcome, Rejection};

/// The accepted audit currently on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentAudit {
    pub record: AuditRecord,
    pub location: String,
    pub routed_by: RoutedBy,
    pub sources: Vec<Value>,
    /// User edits to the drafted letter.
    pub edited_letter: Option<String>,
}

#[derive(Debug)]
pub enum AuditStatus {
    Completed(CurrentAudit),
    Rejected(Rejection),
    Failed(AuditError),
}

impl AuditStatus {
    /// Message to surface, `None` on success.
    pub fn message(&self) -> Option<&str> {
        match self {
            AuditStatus::Completed(_) => None,
            AuditStatus::Rejected(r) => Some(r.message()),
            AuditStatus::Failed(e) => Some(e.user_message()),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    selection: Option<LocationChoice>,
    manual_location: String,
    image: Option<PreparedImage>,
    current: Option<CurrentAudit>,
    error: Option<String>,
    /// Bumped by reset and logout; a pending audit from an older
    /// generation is discarded when it returns.
    generation: u64,
}

/// Clears the in-flight flag on every exit path.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AuditSession {
    store: Arc<dyn KeyValueStore>,
    transport: Mutex<Arc<dyn AuditTransport>>,
    directory: AuthorityDirectory,
    routing: RoutingMap,
    timeout: Mutex<Duration>,
    logged_in: AtomicBool,
    in_flight: AtomicBool,
    state: Mutex<SessionState>,
    history: Mutex<HistoryStore>,
}

impl AuditSession {
    /// Restore the sign-in flag and history from `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, transport: Arc<dyn AuditTransport>) -> Self {
        let logged_in = store::is_logged_in(store.as_ref());
        let history = HistoryStore::open(store.clone());
        tracing::debug!(logged_in, history = history.len(), "session restored");
        Self {
            store,
            transport: Mutex::new(transport),
            directory: civicfix_core::directory::directory().clone(),
            routing: civicfix_core::directory::routing().clone(),
            timeout: Mutex::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            logged_in: AtomicBool::new(logged_in),
            in_flight: AtomicBool::new(false),
            state: Mutex::new(SessionState::default()),
            history: Mutex::new(history),
        }
    }

    pub fn with_directory(mut self, directory: AuthorityDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_routing(mut self, routing: RoutingMap) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    /// Applies to audits started after the call.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock().unwrap() = timeout;
    }

    pub fn timeout(&self) -> Duration {
        *self.timeout.lock().unwrap()
    }

    /// Swap the audit service, e.g. after the API key changes.
    pub fn set_transport(&self, transport: Arc<dyn AuditTransport>) {
        *self.transport.lock().unwrap() = transport;
    }

    pub fn directory(&self) -> &AuthorityDirectory {
        &self.directory
    }

    pub fn routing(&self) -> &RoutingMap {
        &self.routing
    }

    // --- Sign-in ---

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    pub fn login(&self) -> Result<(), StoreError> {
        store::set_logged_in(self.store.as_ref(), true)?;
        self.logged_in.store(true, Ordering::Release);
        Ok(())
    }

    /// Sign out and clear the working state. History is kept.
    pub fn logout(&self) -> Result<(), StoreError> {
        self.logged_in.store(false, Ordering::Release);
        self.reset();
        store::set_logged_in(self.store.as_ref(), false)
    }

    // --- Inputs ---

    /// Refused with `Busy` while an audit is pending.
    pub fn select_location(&self, selection: &str) -> Result<Option<LocationChoice>, AuditError> {
        if self.is_in_flight() {
            return Err(AuditError::Busy);
        }
        let choice = LocationChoice::from_selection(selection);
        self.state.lock().unwrap().selection = choice.clone();
        Ok(choice)
    }

    pub fn set_manual_location(&self, text: &str) -> Result<(), AuditError> {
        if self.is_in_flight() {
            return Err(AuditError::Busy);
        }
        self.state.lock().unwrap().manual_location = text.to_string();
        Ok(())
    }

    pub fn resolved_location(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .selection
            .as_ref()
            .and_then(|c| c.resolve(&state.manual_location))
    }

    /// Prepare new evidence. Replaces the image and clears any previous audit
    /// or error; on failure the previous image stays and the load error is set.
    pub fn load_image(&self, bytes: &[u8]) -> Result<(), AuditError> {
        if self.is_in_flight() {
            return Err(AuditError::Busy);
        }
        match evidence::prepare_image(bytes) {
            Ok(prepared) => {
                let mut state = self.state.lock().unwrap();
                state.image = Some(prepared);
                state.current = None;
                state.error = None;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "image evidence rejected");
                self.state.lock().unwrap().error = Some(e.user_message().to_string());
                Err(e)
            }
        }
    }

    pub fn load_image_file(&self, path: &Path) -> Result<(), AuditError> {
        match std::fs::read(path) {
            Ok(bytes) => self.load_image(&bytes),
            Err(e) => {
                let err = AuditError::ImageLoad(format!("{}: {e}", path.display()));
                self.state.lock().unwrap().error = Some(err.user_message().to_string());
                Err(err)
            }
        }
    }

    // --- Audit ---

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn begin_flight(&self) -> Option<FlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(&self.in_flight))
    }

    fn fail(&self, err: AuditError) -> AuditStatus {
        log_failure(&err);
        self.state.lock().unwrap().error = Some(err.user_message().to_string());
        AuditStatus::Failed(err)
    }

    /// Run one audit on the loaded image and resolved location.
    ///
    /// A duplicate call while one is pending returns `Busy` and leaves state
    /// alone. Input errors never reach the transport. A result that returns
    /// after a reset or logout is dropped with `Cancelled`.
    pub async fn run_audit(&self) -> AuditStatus {
        let Some(_flight) = self.begin_flight() else {
            return AuditStatus::Failed(AuditError::Busy);
        };
        if !self.is_logged_in() {
            return self.fail(AuditError::SignedOut);
        }

        let (location, image, generation) = {
            let mut state = self.state.lock().unwrap();
            let location = state
                .selection
                .as_ref()
                .and_then(|c| c.resolve(&state.manual_location));
            let Some(location) = location else {
                drop(state);
                return self.fail(AuditError::MissingLocation);
            };
            let Some(image) = state.image.clone() else {
                drop(state);
                return self.fail(AuditError::MissingImage);
            };
            state.error = None;
            state.current = None;
            (location, image, state.generation)
        };

        let transport = self.transport.lock().unwrap().clone();
        let timeout = self.timeout();
        let call = crate::submit_audit(
            transport.as_ref(),
            &self.directory,
            &image.payload,
            &location,
        );
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AuditError::Timeout(timeout)),
        };

        let mut state = self.state.lock().unwrap();
        if state.generation != generation || !self.is_logged_in() {
            tracing::info!(location = %location, "session reset during audit; result discarded");
            return AuditStatus::Failed(AuditError::Cancelled);
        }
        match result {
            Ok(AuditOutcome::Accepted(reply)) => {
                let current = CurrentAudit {
                    record: reply.record,
                    location,
                    routed_by: reply.routed_by,
                    sources: reply.sources,
                    edited_letter: None,
                };
                self.record_history(&current, &image);
                state.current = Some(current.clone());
                AuditStatus::Completed(current)
            }
            Ok(AuditOutcome::Rejected(rejection)) => {
                state.error = Some(rejection.message().to_string());
                AuditStatus::Rejected(rejection)
            }
            Err(e) => {
                log_failure(&e);
                state.error = Some(e.user_message().to_string());
                AuditStatus::Failed(e)
            }
        }
    }

    fn record_history(&self, current: &CurrentAudit, image: &PreparedImage) {
        let report = SavedReport::new(
            current.record.clone(),
            image.display.clone(),
            current.location.clone(),
        );
        if let Err(e) = self.history.lock().unwrap().push(report) {
            tracing::warn!(error = %e, "could not persist report history");
        }
    }

    // --- Presentation state ---

    pub fn image(&self) -> Option<PreparedImage> {
        self.state.lock().unwrap().image.clone()
    }

    pub fn current(&self) -> Option<CurrentAudit> {
        self.state.lock().unwrap().current.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().unwrap().error.clone()
    }

    pub fn dismiss_error(&self) {
        self.state.lock().unwrap().error = None;
    }

    /// Replace the drafted letter text. `false` when no audit is showing.
    pub fn edit_letter(&self, text: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.current.as_mut() {
            Some(current) => {
                current.edited_letter = Some(text.to_string());
                true
            }
            None => false,
        }
    }

    pub fn report_view(&self) -> Option<ReportView> {
        let state = self.state.lock().unwrap();
        state.current.as_ref().map(|c| {
            ReportView::build(
                &c.record,
                &c.location,
                &self.routing,
                c.edited_letter.as_deref(),
            )
        })
    }

    /// Drop the image, audit, error and location selection. Any audit still
    /// pending will be discarded when it returns.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        let generation = state.generation.wrapping_add(1);
        *state = SessionState {
            generation,
            ..SessionState::default()
        };
    }

    // --- History ---

    pub fn history(&self) -> Vec<SavedReport> {
        self.history.lock().unwrap().entries().to_vec()
    }

    pub fn clear_history(&self) -> Result<(), StoreError> {
        self.history.lock().unwrap().clear()
    }

    pub fn saved_report(&self, id: &str) -> Option<SavedReport> {
        self.history.lock().unwrap().get(id).cloned()
    }

    pub fn saved_report_view(&self, id: &str) -> Option<ReportView> {
        self.saved_report(id)
            .map(|r| ReportView::build(&r.audit, &r.location, &self.routing, None))
    }
}

fn log_failure(err: &AuditError) {
    if err.is_input_error() {
        tracing::debug!(error = %err, "audit input incomplete");
    } else {
        tracing::error!(error = %err, "audit failed");
    }
}
