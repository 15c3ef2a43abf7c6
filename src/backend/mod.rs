// Contracts with the remote data-processing service
//
// The dashboard core never talks to the network directly. Everything goes
// through a `Backend`, which only has to keep "not found" apart from every
// other failure.

mod emulation;
pub mod file;
pub mod memory;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::Snafu;

use crate::{errors::PitwallError, session::SessionId};

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// A named resource exposed by the data service.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    /// List of every uploaded session
    Sessions,
    /// A single session
    Session(SessionId),
    /// AI coaching report for a session
    Report(SessionId),
    /// Milestones (personal bests) recorded for a track
    Milestones { track: String },
    /// Upload endpoint
    Upload,
    /// Coach chat thread for a session
    CoachChat(SessionId),
}

impl Resource {
    /// Stable string key, used for caching and for file names.
    pub fn key(&self) -> String {
        match self {
            Resource::Sessions => "sessions".to_string(),
            Resource::Session(id) => format!("sessions/{id}"),
            Resource::Report(id) => format!("reports/{id}"),
            Resource::Milestones { track } => format!("milestones/{track}"),
            Resource::Upload => "uploads".to_string(),
            Resource::CoachChat(id) => format!("coach/{id}"),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Post,
    Put,
    Delete,
}

/// Outcome of a failed request. `NotFound` is an expected answer, not a fault.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum FetchError {
    #[snafu(display("resource not found"))]
    NotFound,
    #[snafu(display("request failed: {reason}"))]
    Failed { reason: String },
}

impl FetchError {
    pub fn failed(reason: impl Into<String>) -> Self {
        FetchError::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound)
    }

    pub(crate) fn into_error(self, resource: &Resource) -> PitwallError {
        match self {
            FetchError::NotFound => PitwallError::ResourceNotFound {
                resource: resource.key(),
            },
            FetchError::Failed { reason } => PitwallError::BackendRequestError {
                resource: resource.key(),
                reason,
            },
        }
    }
}

/// A telemetry file queued for upload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadFile {
    pub name: String,
    pub contents: String,
}

/// Receives upload progress in percent (0-100).
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// Request/response access to the data service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read a resource.
    async fn fetch(&self, resource: &Resource) -> Result<Value, FetchError>;

    /// Create, replace or delete a resource.
    async fn mutate(
        &self,
        method: Method,
        resource: &Resource,
        body: Value,
    ) -> Result<Value, FetchError>;

    /// Send telemetry files, reporting transfer progress as it goes. Services
    /// that cannot report partial progress only report completion.
    async fn upload(
        &self,
        files: Vec<UploadFile>,
        progress: ProgressSink,
    ) -> Result<Value, FetchError> {
        let body =
            serde_json::to_value(&files).map_err(|e| FetchError::failed(e.to_string()))?;
        progress(100);
        self.mutate(Method::Post, &Resource::Upload, body).await
    }
}

/// Decode a JSON payload returned for `resource`.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    resource: &Resource,
    value: Value,
) -> Result<T, PitwallError> {
    serde_json::from_value(value).map_err(|e| PitwallError::PayloadDecodeError {
        resource: resource.key(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_keys() {
        let id = SessionId::from("abc");
        assert_eq!(Resource::Sessions.key(), "sessions");
        assert_eq!(Resource::Report(id.clone()).key(), "reports/abc");
        assert_eq!(Resource::CoachChat(id).key(), "coach/abc");
        assert_eq!(
            Resource::Milestones {
                track: "Laguna Seca".to_string()
            }
            .key(),
            "milestones/Laguna Seca"
        );
    }

    #[test]
    fn test_not_found_maps_to_resource_not_found() {
        let err = FetchError::NotFound.into_error(&Resource::Sessions);
        assert!(matches!(err, PitwallError::ResourceNotFound { .. }));

        let err = FetchError::failed("boom").into_error(&Resource::Sessions);
        match err {
            PitwallError::BackendRequestError { resource, reason } => {
                assert_eq!(resource, "sessions");
                assert_eq!(reason, "boom");
            }
            _ => panic!("Expected BackendRequestError"),
        }
    }
}
