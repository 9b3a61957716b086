//! The conversion engine seam.
//!
//! An [`EngineLauncher`] installs and starts engine processes; each running
//! process is an [`Engine`]. The supervisor owns at most one engine at a
//! time and replaces it when it dies, hangs or has served its quota.
//!
//! ## Implementations
//!
//! | Type | Backing process |
//! |------|-----------------|
//! | [`office::OfficeLauncher`] | headless `soffice` listening on a loopback socket, driven by `unoconv` |
//!
//! Tests plug in scripted launchers through the same traits.

pub mod office;
pub mod supervisor;

use crate::config::ConverterConfig;
use crate::error::{DocsconvError, EngineError};
use crate::log::SharedLog;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use office::OfficeLauncher;
pub use supervisor::EngineSupervisor;

/// One running engine process.
#[async_trait]
pub trait Engine: Send + Sync {
    /// OS process id, if the engine is a separate process.
    fn pid(&self) -> Option<u32>;

    /// Non-blocking liveness check. `false` once the process has exited.
    fn is_alive(&mut self) -> bool;

    /// Check that the engine still answers on its endpoint.
    async fn probe(&self) -> bool;

    /// Convert `input` to `output`; the target format follows the output extension.
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), EngineError>;

    /// Ask the engine to exit, forcing it after `grace`.
    async fn terminate(&mut self, grace: Duration) -> Result<(), EngineError>;
}

/// Installs and launches engines.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    /// Make sure the engine software is present, bootstrapping it if needed.
    async fn ensure_installed(
        &self,
        config: &ConverterConfig,
        log: &SharedLog,
    ) -> Result<(), DocsconvError>;

    /// Start a fresh engine. `generation` numbers launches from 1.
    async fn launch(
        &self,
        config: &ConverterConfig,
        generation: u64,
        log: &SharedLog,
    ) -> Result<Box<dyn Engine>, EngineError>;
}

/// Snapshot of the supervised engine, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub generation: u64,
    pub pid: Option<u32>,
    pub port: u16,
    pub office_home: PathBuf,
    pub tasks_served: u32,
    pub uptime_ms: u64,
}
