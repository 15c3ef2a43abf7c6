// Library interface for pitwall
// This allows integration tests and the CLI to drive the dashboard core

pub mod analysis;
pub mod app;
pub mod backend;
pub mod cache;
pub mod coach;
pub mod config;
pub mod errors;
pub mod keyboard;
pub mod report;
pub mod session;
pub mod store;
pub mod timer;
pub mod toast;
pub mod upload;
pub mod view;

// Re-export commonly used types
pub use analysis::{AnalysisSelection, Corner, CornerId, DeepDiveMode, NavDirection, ZoomRange};
pub use app::Dashboard;
pub use backend::{Backend, FetchError, FileBackend, MemoryBackend, Method, Resource, UploadFile};
pub use config::AppConfig;
pub use errors::PitwallError;
pub use keyboard::{Key, KeyEvent, KeyOutcome};
pub use report::{ReportPhase, ReportStatus};
pub use session::{SessionId, SessionSummary, UploadState};
pub use toast::{Toast, ToastCategory};
pub use view::View;
