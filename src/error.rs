//! Error types for the docsconv library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`DocsconvError`] (**fatal / lifecycle**): the service cannot become
//!   ready (engine install or start failed, bad configuration) or a lifecycle
//!   operation misbehaved. Returned from `start`/`stop` and from collaborators
//!   such as the file store.
//!
//! * [`TaskError`] (**per-request**): one conversion failed (missing input,
//!   timeout, engine rejected the document, queue closed). Returned as the
//!   `Err` half of a [`crate::output::ConversionResult`]; never affects other
//!   requests and never crashes the process.
//!
//! * [`EngineError`]: what an [`crate::engine::Engine`] implementation
//!   reports to the supervisor. The supervisor classifies it into one of the
//!   two types above.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Lifecycle errors returned by the docsconv library.
#[derive(Debug, Error)]
pub enum DocsconvError {
    // ── Startup ───────────────────────────────────────────────────────────
    /// The engine was missing and the bootstrap procedure failed.
    #[error("Conversion engine installation failed: {detail}\nInstall LibreOffice and unoconv manually, or fix the bootstrap command.")]
    Install { detail: String },

    /// The engine could not bind its port or never became ready.
    #[error("Conversion engine failed to start on port {port}: {detail}")]
    Start { port: u16, detail: String },

    /// `init` was called on a queue that is not in the NotStarted state.
    #[error("Conversion queue was already initialised")]
    QueueAlreadyStarted,

    /// `start` was called after `stop`. A stopped service cannot be restarted.
    #[error("Conversion service has been stopped and cannot be restarted; create a new service")]
    Stopped,

    // ── Shutdown ──────────────────────────────────────────────────────────
    /// The engine refused to terminate (even after a forced kill).
    #[error("Conversion engine did not stop cleanly: {detail}")]
    Stop { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Collaborators ─────────────────────────────────────────────────────
    /// The file store could not read or write a file.
    #[error("Storage error for '{id}': {detail}")]
    Storage { id: String, detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A per-request conversion error.
///
/// Delivered to the caller of [`crate::ConversionService::convert`] as a
/// value. Other queued requests are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TaskError {
    /// Input file does not exist.
    #[error("Input file not found: '{path}'")]
    InputNotFound { path: PathBuf },

    /// Input exists but cannot be read (permissions, directory, …).
    #[error("Input file '{path}' is not readable: {detail}")]
    InputUnreadable { path: PathBuf, detail: String },

    /// Downloading a URL input failed.
    #[error("Failed to download '{url}': {detail}")]
    InputDownload { url: String, detail: String },

    /// The task exceeded its execution budget.
    #[error("Task {task} timed out after {timeout_ms}ms")]
    Timeout { task: u64, timeout_ms: u64 },

    /// The engine rejected or failed the conversion.
    #[error("Engine failed task {task}: {detail}")]
    EngineFailure { task: u64, detail: String },

    /// The engine was down and could not be restarted.
    #[error("Conversion engine unavailable: {detail}")]
    EngineUnavailable { detail: String },

    /// The service was never started (or failed to start).
    #[error("Conversion service is not started")]
    NotStarted,

    /// The queue is draining or stopped; nothing new is accepted.
    #[error("Conversion queue is closed")]
    QueueClosed,

    /// The task was abandoned during shutdown.
    #[error("Task {task} was cancelled during shutdown")]
    Cancelled { task: u64 },
}

impl TaskError {
    /// `true` for errors caused by the request's input rather than the engine.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TaskError::InputNotFound { .. }
                | TaskError::InputUnreadable { .. }
                | TaskError::InputDownload { .. }
        )
    }
}

/// Errors reported by an engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine process could not be launched or never became ready.
    #[error("launch failed: {0}")]
    Launch(String),

    /// The engine processed the request but reported a failure.
    #[error("{0}")]
    Conversion(String),

    /// The connection to the engine is gone; it must be restarted.
    #[error("engine connection lost: {0}")]
    ConnectionLost(String),

    /// Terminating the engine failed.
    #[error("termination failed: {0}")]
    Terminate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display() {
        let e = TaskError::Timeout {
            task: 7,
            timeout_ms: 120_000,
        };
        let msg = e.to_string();
        assert!(msg.contains("Task 7"), "got: {msg}");
        assert!(msg.contains("120000ms"), "got: {msg}");
    }

    #[test]
    fn start_display_names_port() {
        let e = DocsconvError::Start {
            port: 2002,
            detail: "address in use".into(),
        };
        assert!(e.to_string().contains("2002"));
        assert!(e.to_string().contains("address in use"));
    }

    #[test]
    fn stopped_display_says_what_happened() {
        let msg = DocsconvError::Stopped.to_string();
        assert!(msg.contains("stopped"), "got: {msg}");
        assert!(!msg.contains("initialised"), "got: {msg}");
    }

    #[test]
    fn input_errors_are_classified() {
        assert!(TaskError::InputNotFound {
            path: PathBuf::from("/nope.docx")
        }
        .is_input_error());
        assert!(!TaskError::QueueClosed.is_input_error());
        assert!(!TaskError::Cancelled { task: 1 }.is_input_error());
    }

    #[test]
    fn task_error_serialises_with_variant_tag() {
        let json = serde_json::to_string(&TaskError::Cancelled { task: 3 }).unwrap();
        assert_eq!(json, r#"{"Cancelled":{"task":3}}"#);
    }
}
