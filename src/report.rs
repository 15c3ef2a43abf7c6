// AI coaching report generation: trigger once per session, then poll until settled

use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    backend::{self, FetchError, Method, Resource},
    cache::QueryCache,
    config::REPORT_POLL_INTERVAL_MS,
    errors::PitwallError,
    session::SessionId,
    store::Store,
    timer::{TaskScope, TimerHandle},
};

/// Status reported by the data service for an existing report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Generating,
    Ready,
    Error,
}

impl ReportStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportStatus::Generating)
    }
}

/// Report resource as stored by the data service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub session_id: SessionId,
    pub status: ReportStatus,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What the report panel shows for the active session.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ReportPhase {
    /// Nothing is known yet, or the last read failed transiently
    #[default]
    Loading,
    /// No report exists and none was requested
    NotRequested,
    Generating,
    Ready { content: String },
    /// The service finished the job with an error
    Failed { message: String },
}

impl ReportPhase {
    fn from_document(document: &ReportDocument) -> Self {
        match document.status {
            ReportStatus::Generating => ReportPhase::Generating,
            ReportStatus::Ready => ReportPhase::Ready {
                content: document.content.clone().unwrap_or_default(),
            },
            ReportStatus::Error => ReportPhase::Failed {
                message: document
                    .error
                    .clone()
                    .unwrap_or_else(|| "report generation failed".to_string()),
            },
        }
    }
}

impl fmt::Display for ReportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportPhase::Loading => write!(f, "loading"),
            ReportPhase::NotRequested => write!(f, "not requested"),
            ReportPhase::Generating => write!(f, "generating"),
            ReportPhase::Ready { .. } => write!(f, "ready"),
            ReportPhase::Failed { message } => write!(f, "error: {message}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportView {
    pub session: Option<SessionId>,
    pub phase: ReportPhase,
    /// Error from the generation request itself. Absence of a report is
    /// never reported here.
    pub trigger_error: Option<String>,
    pub polling: bool,
}

/// Result of asking for a report to be generated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    Issued,
    /// A request for this session was already issued or is still in flight
    Deduplicated,
    /// The session is not the active one, nothing was sent
    Inactive,
    Failed { message: String },
}

/// Deduplication bookkeeping.
#[derive(Debug, Default)]
struct Latch {
    /// Session a request was issued for since it became active
    requested: Option<SessionId>,
    /// Sessions whose generation request has not answered yet
    in_flight: HashSet<SessionId>,
}

/// Whether the poller should keep going after observing `status`.
pub fn should_keep_polling(status: Option<ReportStatus>) -> bool {
    matches!(status, Some(ReportStatus::Generating))
}

/// Tracks the report of the active session.
///
/// Generation is requested at most once per session activation, and never
/// while a request for the same session is still in flight. Both are checked
/// and recorded before the request goes out, so overlapping reconciliations
/// can't issue a second one. Switching sessions clears the per-activation
/// flag and cancels polling, but never cancels or forgets an in-flight
/// request. A late answer for a session that is no longer active still lands
/// in the cache.
#[derive(Clone)]
pub struct ReportOrchestrator {
    cache: QueryCache,
    store: Store<ReportView>,
    latch: Arc<Mutex<Latch>>,
    poller: Arc<Mutex<Option<TimerHandle>>>,
    scope: TaskScope,
    poll_interval: Duration,
}

impl ReportOrchestrator {
    pub fn new(cache: QueryCache, scope: TaskScope) -> Self {
        Self {
            cache,
            store: Store::default(),
            latch: Arc::new(Mutex::new(Latch::default())),
            poller: Arc::new(Mutex::new(None)),
            scope,
            poll_interval: Duration::from_millis(REPORT_POLL_INTERVAL_MS),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn store(&self) -> &Store<ReportView> {
        &self.store
    }

    pub fn snapshot(&self) -> ReportView {
        self.store.snapshot()
    }

    /// Switch to `session` and reconcile its report.
    pub async fn activate(&self, session: Option<SessionId>) {
        self.stop_polling();
        self.reset_latch();

        // show whatever we cached for the session while we revalidate
        let phase = match &session {
            Some(id) => self
                .cache
                .peek(&Resource::Report(id.clone()))
                .and_then(|value| serde_json::from_value::<ReportDocument>(value).ok())
                .map(|document| ReportPhase::from_document(&document))
                .unwrap_or_default(),
            None => ReportPhase::NotRequested,
        };
        self.store.replace(ReportView {
            session: session.clone(),
            phase,
            trigger_error: None,
            polling: false,
        });

        if session.is_some() {
            self.reconcile().await;
        }
    }

    /// Read the active session's report and request generation when it
    /// doesn't exist yet.
    pub async fn reconcile(&self) {
        let Some(session) = self.active_session() else {
            return;
        };
        let resource = Resource::Report(session.clone());
        match self.cache.refetch(&resource).await {
            Ok(value) => match backend::decode::<ReportDocument>(&resource, value) {
                Ok(document) => self.observe(&session, document),
                Err(e) => warn!("Ignoring malformed report for {}: {}", session, e),
            },
            Err(FetchError::NotFound) => {
                debug!("No report for {}, requesting one", session);
                self.trigger(&session).await;
            }
            Err(e) => {
                // transient, the panel keeps loading until the next refresh
                warn!("Could not read report for {}: {}", session, e);
            }
        }
    }

    /// Request generation for the active `session` unless a request was
    /// already issued since it became active or one is still in flight.
    pub async fn trigger(&self, session: &SessionId) -> TriggerOutcome {
        if self.active_session().as_ref() != Some(session) {
            debug!("Not requesting a report for inactive session {}", session);
            return TriggerOutcome::Inactive;
        }
        if !self.acquire_latch(session) {
            debug!("Report generation for {} already requested", session);
            if self.is_in_flight(session) {
                self.update_if_active(session, |view| view.phase = ReportPhase::Generating);
            }
            return TriggerOutcome::Deduplicated;
        }

        info!("Requesting report generation for {}", session);
        self.update_if_active(session, |view| {
            view.phase = ReportPhase::Generating;
            view.trigger_error = None;
        });

        let resource = Resource::Report(session.clone());
        let response = self
            .cache
            .mutate(Method::Post, &resource, Value::Null)
            .await;
        self.release_in_flight(session);
        match response {
            Ok(value) => {
                // cached even if the user moved on, for when they come back
                self.cache.store(&resource, value.clone());
                self.cache.invalidate(&resource);
                // accepted but unreadable, poll to find out where it stands
                let document = backend::decode::<ReportDocument>(&resource, value)
                    .unwrap_or_else(|_| ReportDocument {
                        session_id: session.clone(),
                        status: ReportStatus::Generating,
                        content: None,
                        error: None,
                    });
                self.observe(session, document);
                TriggerOutcome::Issued
            }
            Err(e) => {
                let error = e.into_error(&resource);
                warn!("Report generation for {} failed: {}", session, error);
                let message = PitwallError::ReportGenerationError {
                    reason: error.to_string(),
                }
                .to_string();
                self.update_if_active(session, |view| {
                    view.phase = ReportPhase::Failed {
                        message: message.clone(),
                    };
                    view.trigger_error = Some(message.clone());
                });
                TriggerOutcome::Failed { message }
            }
        }
    }

    /// Clear the per-activation flag and request generation again for the
    /// active session, whatever state it is in. A request still in flight is
    /// not duplicated.
    pub async fn retry(&self) -> Result<TriggerOutcome, PitwallError> {
        let session = self.active_session().ok_or(PitwallError::NoActiveSession)?;
        self.stop_polling();
        self.reset_latch();
        Ok(self.trigger(&session).await)
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .map(|p| p.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    pub fn stop_polling(&self) {
        if let Ok(mut poller) = self.poller.lock()
            && let Some(handle) = poller.take()
        {
            debug!("Stopping report polling");
            handle.cancel();
        }
        self.store.update(|view| view.polling = false);
    }

    fn active_session(&self) -> Option<SessionId> {
        self.store.read(|view| view.session.clone())
    }

    fn acquire_latch(&self, session: &SessionId) -> bool {
        let Ok(mut latch) = self.latch.lock() else {
            return false;
        };
        if latch.requested.as_ref() == Some(session) || latch.in_flight.contains(session) {
            return false;
        }
        latch.requested = Some(session.clone());
        latch.in_flight.insert(session.clone());
        true
    }

    fn release_in_flight(&self, session: &SessionId) {
        if let Ok(mut latch) = self.latch.lock() {
            latch.in_flight.remove(session);
        }
    }

    fn is_in_flight(&self, session: &SessionId) -> bool {
        self.latch
            .lock()
            .map(|latch| latch.in_flight.contains(session))
            .unwrap_or(false)
    }

    fn reset_latch(&self) {
        if let Ok(mut latch) = self.latch.lock() {
            latch.requested = None;
        }
    }

    fn update_if_active(&self, session: &SessionId, f: impl FnOnce(&mut ReportView)) -> bool {
        apply_if_active(&self.store, session, f)
    }

    fn observe(&self, session: &SessionId, document: ReportDocument) {
        let status = document.status;
        let phase = ReportPhase::from_document(&document);
        if self.update_if_active(session, |view| view.phase = phase) {
            self.observe_status(session, status);
        }
    }

    fn observe_status(&self, session: &SessionId, status: ReportStatus) {
        if should_keep_polling(Some(status)) {
            self.start_polling(session);
        } else {
            self.stop_polling();
        }
    }

    fn start_polling(&self, session: &SessionId) {
        let Ok(mut poller) = self.poller.lock() else {
            return;
        };
        if poller.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        debug!("Polling report for {} every {:?}", session, self.poll_interval);
        let task = poll_report(
            self.cache.clone(),
            self.store.clone(),
            session.clone(),
            self.poll_interval,
        );
        *poller = Some(self.scope.spawn(task));
        drop(poller);
        self.store.update(|view| view.polling = true);
    }
}

fn apply_if_active(
    store: &Store<ReportView>,
    session: &SessionId,
    f: impl FnOnce(&mut ReportView),
) -> bool {
    store.update(|view| {
        if view.session.as_ref() == Some(session) {
            f(view);
            true
        } else {
            debug!("Dropping report update for inactive session {}", session);
            false
        }
    })
}

/// Re-read the report every `interval` until it leaves `generating`.
async fn poll_report(
    cache: QueryCache,
    store: Store<ReportView>,
    session: SessionId,
    interval: Duration,
) {
    let resource = Resource::Report(session.clone());
    loop {
        tokio::time::sleep(interval).await;
        let status = match cache.refetch(&resource).await {
            Ok(value) => match backend::decode::<ReportDocument>(&resource, value) {
                Ok(document) => {
                    let status = document.status;
                    let phase = ReportPhase::from_document(&document);
                    apply_if_active(&store, &session, |view| view.phase = phase);
                    Some(status)
                }
                Err(e) => {
                    warn!("Malformed report while polling {}: {}", session, e);
                    continue;
                }
            },
            Err(FetchError::NotFound) => {
                // gone from the service, let the panel offer a retry
                warn!("Report for {} disappeared while generating", session);
                apply_if_active(&store, &session, |view| view.phase = ReportPhase::NotRequested);
                None
            }
            Err(e) => {
                warn!("Report poll for {} failed, retrying: {}", session, e);
                continue;
            }
        };
        if !should_keep_polling(status) {
            info!("Report for {} settled: {:?}", session, status);
            apply_if_active(&store, &session, |view| view.polling = false);
            return;
        }
    }
}
