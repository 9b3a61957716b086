//! Engine supervisor: owns the single engine process and its lifecycle.
//!
//! The supervisor is the only component that starts or stops engines. The
//! queue worker calls [`EngineSupervisor::prepare`] before every task, which
//! is where recycling happens: a missing, dead, unresponsive, poisoned or
//! worn-out engine is replaced before the task runs, never while it runs.

use super::{Engine, EngineInfo, EngineLauncher, OfficeLauncher};
use crate::config::ConverterConfig;
use crate::error::{DocsconvError, EngineError, TaskError};
use crate::log::SharedLog;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

struct EngineHandle {
    engine: Box<dyn Engine>,
    generation: u64,
    started_at: Instant,
    tasks_served: u32,
    // Set after a timeout: the engine may still be chewing on the abandoned document.
    poisoned: bool,
}

/// Starts, watches, recycles and stops the conversion engine.
pub struct EngineSupervisor {
    config: Arc<ConverterConfig>,
    launcher: Arc<dyn EngineLauncher>,
    log: SharedLog,
    current: Option<EngineHandle>,
    generation: u64,
    office_home: PathBuf,
}

impl EngineSupervisor {
    pub fn new(
        config: Arc<ConverterConfig>,
        launcher: Arc<dyn EngineLauncher>,
        log: SharedLog,
    ) -> Self {
        let office_home = office_auto::resolve_office_home(&config.office_home);
        Self {
            config,
            launcher,
            log,
            current: None,
            generation: 0,
            office_home,
        }
    }

    /// A supervisor for the LibreOffice engine.
    pub fn office(config: Arc<ConverterConfig>, log: SharedLog) -> Self {
        Self::new(config, Arc::new(OfficeLauncher), log)
    }

    pub fn office_home(&self) -> &Path {
        &self.office_home
    }

    /// Ensure the engine software is installed. Runs the bootstrap only when
    /// the install probe is missing.
    pub async fn ensure_installed(&self) -> Result<(), DocsconvError> {
        self.launcher.ensure_installed(&self.config, &self.log).await
    }

    /// Launch the engine and wait until it accepts connections.
    ///
    /// A no-op when an engine is already running.
    pub async fn start(&mut self) -> Result<(), DocsconvError> {
        if self.is_running() {
            return Ok(());
        }
        // A dead engine may still hold its profile; clear it first.
        if let Some(mut stale) = self.current.take() {
            let _ = stale.engine.terminate(self.config.stop_grace()).await;
        }

        self.generation += 1;
        let generation = self.generation;
        self.log.info(&format!(
            "Starting conversion engine (generation {generation}, port {})",
            self.config.port
        ));

        match self
            .launcher
            .launch(&self.config, generation, &self.log)
            .await
        {
            Ok(engine) => {
                self.current = Some(EngineHandle {
                    engine,
                    generation,
                    started_at: Instant::now(),
                    tasks_served: 0,
                    poisoned: false,
                });
                Ok(())
            }
            Err(e) => {
                self.log
                    .error(&format!("Conversion engine failed to start: {e}"));
                Err(DocsconvError::Start {
                    port: self.config.port,
                    detail: e.to_string(),
                })
            }
        }
    }

    /// Non-blocking liveness check of the current engine process.
    pub fn is_running(&mut self) -> bool {
        self.current
            .as_mut()
            .map(|h| h.engine.is_alive())
            .unwrap_or(false)
    }

    /// Terminate the engine. Idempotent: stopping a stopped supervisor is a no-op.
    pub async fn stop(&mut self) -> Result<(), DocsconvError> {
        let Some(mut handle) = self.current.take() else {
            return Ok(());
        };
        self.log.info(&format!(
            "Stopping conversion engine (generation {}, {} task(s) served)",
            handle.generation, handle.tasks_served
        ));
        handle
            .engine
            .terminate(self.config.stop_grace())
            .await
            .map_err(|e| DocsconvError::Stop {
                detail: e.to_string(),
            })
    }

    /// Snapshot of the current engine, if one is running.
    pub fn info(&self) -> Option<EngineInfo> {
        self.current.as_ref().map(|h| EngineInfo {
            generation: h.generation,
            pid: h.engine.pid(),
            port: self.config.port,
            office_home: self.office_home.clone(),
            tasks_served: h.tasks_served,
            uptime_ms: h.started_at.elapsed().as_millis() as u64,
        })
    }

    /// Force a restart before the next task.
    pub fn mark_poisoned(&mut self) {
        if let Some(h) = self.current.as_mut() {
            h.poisoned = true;
        }
    }

    /// Why the current engine cannot take the next task, if it cannot.
    async fn recycle_reason(&mut self) -> Option<String> {
        let limit = self.config.max_tasks_per_process;
        let handle = match self.current.as_mut() {
            None => return Some("no engine running".into()),
            Some(h) => h,
        };
        if handle.poisoned {
            return Some("previous task timed out".into());
        }
        if !handle.engine.is_alive() {
            return Some("engine process exited".into());
        }
        if handle.tasks_served >= limit {
            return Some(format!("served {} task(s)", handle.tasks_served));
        }
        if !handle.engine.probe().await {
            return Some("engine stopped answering".into());
        }
        None
    }

    /// Make sure a healthy engine is ready for the next task, restarting it if needed.
    ///
    /// Returns the generation that will serve the task.
    pub async fn prepare(&mut self) -> Result<u64, TaskError> {
        if let Some(reason) = self.recycle_reason().await {
            if self.current.is_some() {
                self.log
                    .info(&format!("Recycling conversion engine: {reason}"));
                if let Err(e) = self.stop().await {
                    self.log.error(&e.to_string());
                }
            } else {
                debug!("Engine not running, starting on demand");
            }
            self.start()
                .await
                .map_err(|e| TaskError::EngineUnavailable {
                    detail: e.to_string(),
                })?;
        }
        Ok(self.generation)
    }

    /// Run one conversion on the prepared engine.
    ///
    /// Every attempt counts towards the recycle limit, successful or not.
    pub async fn execute(&mut self, task: u64, input: &Path, output: &Path) -> Result<(), TaskError> {
        let handle = self
            .current
            .as_mut()
            .ok_or_else(|| TaskError::EngineUnavailable {
                detail: "no engine running".into(),
            })?;
        handle.tasks_served += 1;

        match handle.engine.convert(input, output).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if matches!(e, EngineError::ConnectionLost(_)) {
                    handle.poisoned = true;
                }
                Err(TaskError::EngineFailure {
                    task,
                    detail: e.to_string(),
                })
            }
        }
    }
}
