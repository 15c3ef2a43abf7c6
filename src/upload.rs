// Multi-stage upload pipeline: uploading -> processing -> done/error -> idle

use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    backend::{self, FetchError, ProgressSink, Resource, UploadFile},
    cache::QueryCache,
    config::{UPLOAD_DONE_RESET_MS, UPLOAD_ERROR_RESET_MS},
    errors::PitwallError,
    session::{SessionId, SessionRegistry, UploadState},
    timer::TaskScope,
    toast::{ToastCategory, ToastQueue, ToastRequest},
};

/// What the data service answers to a successful upload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub session_ids: Vec<SessionId>,
    #[serde(default)]
    pub track_name: Option<String>,
}

/// Personal best bookkeeping for one track.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMilestones {
    pub track_name: String,
    #[serde(default)]
    pub personal_best_session: Option<SessionId>,
    #[serde(default)]
    pub personal_best_lap_s: Option<f32>,
}

/// Drives the upload state held by the [`SessionRegistry`].
///
/// Terminal states (`Done`, `Error`) always fall back to `Idle` on their own
/// after a fixed delay. A successful upload invalidates the session list and
/// announces itself with a toast; working out whether that toast celebrates a
/// personal best is best-effort and never turns a success into a failure.
#[derive(Clone)]
pub struct UploadPipeline {
    registry: SessionRegistry,
    cache: QueryCache,
    toasts: ToastQueue,
    scope: TaskScope,
    done_reset: Duration,
    error_reset: Duration,
}

impl UploadPipeline {
    pub fn new(
        registry: SessionRegistry,
        cache: QueryCache,
        toasts: ToastQueue,
        scope: TaskScope,
    ) -> Self {
        Self {
            registry,
            cache,
            toasts,
            scope,
            done_reset: Duration::from_millis(UPLOAD_DONE_RESET_MS),
            error_reset: Duration::from_millis(UPLOAD_ERROR_RESET_MS),
        }
    }

    pub fn with_reset_delays(mut self, done_reset: Duration, error_reset: Duration) -> Self {
        self.done_reset = done_reset;
        self.error_reset = error_reset;
        self
    }

    /// Upload `files`. Returns `Ok(None)` when the upload failed: the failure
    /// is recorded in the registry's upload state rather than returned.
    /// `Err` is reserved for calls that should not have been made (nothing to
    /// upload, or a job already running).
    pub async fn submit(
        &self,
        files: Vec<UploadFile>,
    ) -> Result<Option<UploadReceipt>, PitwallError> {
        if files.is_empty() {
            return Err(PitwallError::EmptyUpload);
        }
        if self.registry.snapshot().upload_state != UploadState::Idle {
            return Err(PitwallError::UploadInProgress);
        }

        info!("Uploading {} files", files.len());
        self.registry.set_upload_state(UploadState::Uploading)?;

        let registry = self.registry.clone();
        let progress: ProgressSink = Arc::new(move |pct| {
            if let Err(e) = registry.set_upload_progress(pct) {
                warn!("Ignoring upload progress: {}", e);
                return;
            }
            // every byte is on the server, it is processing from here on
            if pct >= 100 && registry.snapshot().upload_state == UploadState::Uploading {
                if let Err(e) = registry.set_upload_state(UploadState::Processing) {
                    debug!("Upload left uploading before completion: {}", e);
                }
            }
        });

        let response = self.cache.backend().upload(files, progress).await;
        let receipt = response
            .map_err(|e| e.into_error(&Resource::Upload))
            .and_then(|value| backend::decode::<UploadReceipt>(&Resource::Upload, value));

        match receipt {
            Ok(receipt) => match self.finish_success(&receipt).await {
                Ok(()) => Ok(Some(receipt)),
                Err(e) => {
                    warn!("Could not complete upload: {}", e);
                    if let Err(e) = self.registry.set_upload_state(UploadState::Error {
                        message: e.to_string(),
                    }) {
                        debug!("Upload error not recorded: {}", e);
                    }
                    self.schedule_reset(self.error_reset);
                    Err(e)
                }
            },
            Err(e) => {
                warn!("Upload failed: {}", e);
                self.registry.set_upload_state(UploadState::Error {
                    message: e.to_string(),
                })?;
                self.schedule_reset(self.error_reset);
                Ok(None)
            }
        }
    }

    async fn finish_success(&self, receipt: &UploadReceipt) -> Result<(), PitwallError> {
        // services that never report 100% still have to pass through processing
        if self.registry.snapshot().upload_state == UploadState::Uploading {
            self.registry.set_upload_state(UploadState::Processing)?;
        }
        self.registry.set_upload_state(UploadState::Done)?;
        info!("Upload created sessions {:?}", receipt.session_ids);
        self.cache.invalidate(&Resource::Sessions);

        let toast = self.completion_toast(receipt).await;
        self.toasts.add_toast(toast);
        self.schedule_reset(self.done_reset);
        Ok(())
    }

    fn schedule_reset(&self, delay: Duration) {
        let registry = self.registry.clone();
        self.scope.schedule(delay, async move {
            if let Err(e) = registry.set_upload_state(UploadState::Idle) {
                debug!("Upload reset skipped: {}", e);
            }
        });
    }

    /// Pick the toast announcing a finished upload.
    async fn completion_toast(&self, receipt: &UploadReceipt) -> ToastRequest {
        match self.personal_best_track(receipt).await {
            Ok(Some(track)) => ToastRequest::new(
                format!("New personal best at {track}!"),
                ToastCategory::PersonalBest,
            ),
            Ok(None) => generic_toast(receipt),
            Err(e) => {
                warn!("Skipping personal best check: {}", e);
                generic_toast(receipt)
            }
        }
    }

    /// The track name if one of the uploaded sessions is now the track's
    /// personal best.
    async fn personal_best_track(
        &self,
        receipt: &UploadReceipt,
    ) -> Result<Option<String>, PitwallError> {
        let Some(track) = receipt.track_name.clone() else {
            return Ok(None);
        };
        let resource = Resource::Milestones {
            track: track.clone(),
        };
        let milestones: TrackMilestones = match self.cache.refetch(&resource).await {
            Ok(value) => backend::decode(&resource, value)?,
            Err(FetchError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into_error(&resource)),
        };
        let is_best = milestones
            .personal_best_session
            .is_some_and(|best| receipt.session_ids.contains(&best));
        Ok(is_best.then_some(track))
    }
}

fn generic_toast(receipt: &UploadReceipt) -> ToastRequest {
    let count = receipt.session_ids.len();
    let noun = if count == 1 { "session" } else { "sessions" };
    ToastRequest::info(format!("Upload complete: {count} {noun} added"))
}
