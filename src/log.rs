//! Injected logger for service lifecycle and task events.
//!
//! The supervisor, the queue and the façade all report through a
//! [`SharedLog`] rather than writing to a global. Hosts that already run a
//! `tracing` subscriber get [`TracingLog`]; everything else falls back to
//! [`ConsoleLog`], which writes plain lines to stderr.
//!
//! # Example
//!
//! ```rust
//! use docsconv::log::ServiceLog;
//! use std::sync::Mutex;
//!
//! #[derive(Default)]
//! struct Collecting(Mutex<Vec<String>>);
//!
//! impl ServiceLog for Collecting {
//!     fn info(&self, message: &str) {
//!         self.0.lock().unwrap().push(message.to_string());
//!     }
//!     fn error(&self, message: &str) {
//!         self.0.lock().unwrap().push(format!("ERROR {message}"));
//!     }
//! }
//!
//! let log = Collecting::default();
//! log.info("engine started");
//! assert_eq!(log.0.lock().unwrap().len(), 1);
//! ```

use std::sync::Arc;

/// Sink for service log lines.
///
/// Implementations must be `Send + Sync`: the queue worker, the bootstrap
/// output forwarder and the caller's task may log at the same time.
pub trait ServiceLog: Send + Sync {
    fn info(&self, message: &str);

    fn error(&self, message: &str);
}

/// Forwards to the `tracing` macros under the `docsconv` target.
pub struct TracingLog;

impl ServiceLog for TracingLog {
    fn info(&self, message: &str) {
        tracing::info!(target: "docsconv", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "docsconv", "{message}");
    }
}

/// Writes `[docsconv] …` lines to stderr.
pub struct ConsoleLog;

impl ServiceLog for ConsoleLog {
    fn info(&self, message: &str) {
        eprintln!("[docsconv] {message}");
    }

    fn error(&self, message: &str) {
        eprintln!("[docsconv] ERROR {message}");
    }
}

/// Drops everything. Handy in tests.
pub struct NoopLog;

impl ServiceLog for NoopLog {
    fn info(&self, _message: &str) {}

    fn error(&self, _message: &str) {}
}

/// The type stored by every component that logs.
pub type SharedLog = Arc<dyn ServiceLog>;

/// [`TracingLog`] when a global `tracing` dispatcher is installed, else [`ConsoleLog`].
pub fn default_log() -> SharedLog {
    if tracing::dispatcher::has_been_set() {
        Arc::new(TracingLog)
    } else {
        Arc::new(ConsoleLog)
    }
}
