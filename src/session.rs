// Session registry: which session is active, the known sessions, and upload progress

use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    backend::{self, FetchError, Method, Resource},
    cache::QueryCache,
    errors::PitwallError,
    store::Store,
};

/// Opaque identifier of one recorded track outing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Summary of an uploaded session as listed by the data service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub track_name: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub lap_count: u32,
    #[serde(default)]
    pub best_lap_time_s: Option<f32>,
}

/// Stage of the upload pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadState {
    #[default]
    Idle,
    Uploading,
    Processing,
    Done,
    Error {
        message: String,
    },
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Done | UploadState::Error { .. })
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, UploadState::Uploading | UploadState::Processing)
    }

    /// Whether the pipeline may move from `self` to `next`.
    pub fn can_transition_to(&self, next: &UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Idle, Uploading)
                | (Uploading, Processing)
                | (Uploading, Error { .. })
                | (Processing, Done)
                | (Processing, Error { .. })
                | (Done, Idle)
                | (Error { .. }, Idle)
        )
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Idle => write!(f, "idle"),
            UploadState::Uploading => write!(f, "uploading"),
            UploadState::Processing => write!(f, "processing"),
            UploadState::Done => write!(f, "done"),
            UploadState::Error { message } => write!(f, "error ({message})"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegistryState {
    pub active_session: Option<SessionId>,
    /// Newest first, as listed by the data service
    pub sessions: Vec<SessionSummary>,
    pub upload_state: UploadState,
    /// 0-100, never decreases within one upload job
    pub upload_progress: u8,
}

impl RegistryState {
    pub fn active_summary(&self) -> Option<&SessionSummary> {
        let active = self.active_session.as_ref()?;
        self.sessions.iter().find(|s| &s.session_id == active)
    }
}

/// Owns the [`RegistryState`] store. All writes go through its mutators.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    store: Store<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &Store<RegistryState> {
        &self.store
    }

    pub fn snapshot(&self) -> RegistryState {
        self.store.snapshot()
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.store.read(|s| s.active_session.clone())
    }

    pub fn set_active_session(&self, session_id: Option<SessionId>) {
        self.store.update(|state| {
            if state.active_session != session_id {
                info!("Active session: {:?} -> {:?}", state.active_session, session_id);
                state.active_session = session_id;
            }
        });
    }

    /// Replace the session list. When nothing is active, the most recently
    /// listed session becomes active. Returns the auto-selected id, if any.
    pub fn set_sessions(&self, sessions: Vec<SessionSummary>) -> Option<SessionId> {
        self.store.update(|state| {
            state.sessions = sessions;
            if state.active_session.is_none()
                && let Some(newest) = state.sessions.first()
            {
                info!("Auto-selecting most recent session {}", newest.session_id);
                state.active_session = Some(newest.session_id.clone());
                return state.active_session.clone();
            }
            None
        })
    }

    pub fn set_upload_state(&self, next: UploadState) -> Result<(), PitwallError> {
        self.store.update(|state| {
            if state.upload_state == next {
                return Ok(());
            }
            if !state.upload_state.can_transition_to(&next) {
                warn!("Rejected upload transition {} -> {}", state.upload_state, next);
                return Err(PitwallError::invalid_input(
                    "upload_state",
                    format!("cannot move from {} to {}", state.upload_state, next),
                ));
            }
            debug!("Upload state {} -> {}", state.upload_state, next);
            match next {
                // a new job starts from zero, an idle pipeline shows nothing
                UploadState::Uploading | UploadState::Idle => state.upload_progress = 0,
                UploadState::Done => state.upload_progress = 100,
                _ => {}
            }
            state.upload_state = next;
            Ok(())
        })
    }

    /// Record transfer progress. Values lower than the current progress are
    /// ignored so progress never moves backwards within a job.
    pub fn set_upload_progress(&self, pct: u8) -> Result<(), PitwallError> {
        if pct > 100 {
            return Err(PitwallError::invalid_input(
                "upload_progress",
                format!("{pct} is above 100"),
            ));
        }
        self.store.update(|state| {
            if pct > state.upload_progress {
                state.upload_progress = pct;
            }
        });
        Ok(())
    }

    /// Fetch the session list through the cache and apply it.
    pub async fn refresh(&self, cache: &QueryCache) -> Result<Option<SessionId>, PitwallError> {
        let value = cache
            .read(&Resource::Sessions)
            .await
            .map_err(|e| e.into_error(&Resource::Sessions))?;
        let sessions: Vec<SessionSummary> = backend::decode(&Resource::Sessions, value)?;
        debug!("Fetched {} sessions", sessions.len());
        Ok(self.set_sessions(sessions))
    }

    /// Delete a session on the data service. Clears the active session if it
    /// was the one deleted.
    pub async fn delete_session(
        &self,
        cache: &QueryCache,
        session_id: &SessionId,
    ) -> Result<(), PitwallError> {
        let resource = Resource::Session(session_id.clone());
        cache
            .mutate(Method::Delete, &resource, Value::Null)
            .await
            .map_err(|e: FetchError| e.into_error(&resource))?;
        cache.invalidate(&Resource::Sessions);
        cache.invalidate(&Resource::Report(session_id.clone()));

        self.store.update(|state| {
            state.sessions.retain(|s| &s.session_id != session_id);
            if state.active_session.as_ref() == Some(session_id) {
                info!("Deleted the active session {}", session_id);
                state.active_session = None;
            }
        });
        Ok(())
    }
}
