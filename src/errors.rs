// Error types for pitwall

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum PitwallError {
    // Errors talking to the data service
    #[snafu(display("Resource not found: {resource}"))]
    ResourceNotFound { resource: String },
    #[snafu(display("Request for {resource} failed: {reason}"))]
    BackendRequestError { resource: String, reason: String },
    #[snafu(display("Unexpected payload for {resource}"))]
    PayloadDecodeError {
        resource: String,
        source: serde_json::Error,
    },

    // Errors for the file backed data service
    #[snafu(display("Error reading data directory"))]
    DataDirIOError { source: io::Error },

    // Upload pipeline errors
    #[snafu(display("Upload already in progress"))]
    UploadInProgress,
    #[snafu(display("Nothing to upload"))]
    EmptyUpload,

    // Report generation errors
    #[snafu(display("No active session to generate a report for"))]
    NoActiveSession,
    #[snafu(display("Report generation failed: {reason}"))]
    ReportGenerationError { reason: String },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // CLI errors
    #[snafu(display("Error loading telemetry file {path}"))]
    TelemetryFileError { path: String, source: io::Error },
    #[snafu(display("Could not start the async runtime"))]
    RuntimeError { source: io::Error },
    #[snafu(display("Timed out waiting for the report of {session}"))]
    ReportTimeout { session: String },

    // User input validation errors
    #[snafu(display("Invalid user input: {field} - {reason}"))]
    InvalidUserInput { field: String, reason: String },
}

impl PitwallError {
    pub(crate) fn invalid_input(field: &str, reason: impl Into<String>) -> Self {
        PitwallError::InvalidUserInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
