//! # docsconv
//!
//! Convert office documents (docx, odt, xlsx, pptx, rtf, …) to other formats
//! through a supervised headless LibreOffice process.
//!
//! ## Why a supervised engine?
//!
//! LibreOffice is a large stateful process that is not safe to drive from
//! several callers at once, leaks memory over long runs and occasionally hangs
//! on a hostile document. This crate owns exactly one engine process, feeds it
//! one document at a time from a FIFO queue, and replaces it after a timeout,
//! a crash or a fixed number of conversions.
//!
//! ## Architecture
//!
//! ```text
//! convert() ─┐
//! convert() ─┼─► ConversionQueue ──► worker ──► EngineSupervisor ──► soffice
//! convert() ─┘   (FIFO, unbounded)   (single)   (install / start /    (unoconv
//!                                                health / recycle)    client)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsconv::{ConversionService, ConverterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ConversionService::new(ConverterConfig::default());
//!     service.start().await?;
//!
//!     let out = service.convert("slides.pptx", "slides.pdf").await?;
//!     eprintln!("{} bytes in {}ms", out.bytes, out.duration_ms);
//!
//!     service.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docsconv` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docsconv = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod function;
pub mod input;
pub mod log;
pub mod output;
pub mod queue;
pub mod service;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConverterConfig, ConverterConfigBuilder};
pub use engine::{Engine, EngineInfo, EngineLauncher, EngineSupervisor, OfficeLauncher};
pub use error::{DocsconvError, EngineError, TaskError};
pub use format::{extension_for, sniff, FileKind};
pub use function::{convert_document, ConvertRequest, ConvertResponse};
pub use log::{ServiceLog, SharedLog};
pub use output::{ConversionOutput, ConversionResult};
pub use queue::{ConversionQueue, QueueState};
pub use service::ConversionService;
pub use storage::{DirectoryStore, FileStore, StoredFile};
