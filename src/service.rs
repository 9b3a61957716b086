//! [`ConversionService`]: the façade wiring the supervisor and the queue together.

use crate::config::ConverterConfig;
use crate::engine::{EngineInfo, EngineLauncher, EngineSupervisor, OfficeLauncher};
use crate::error::{DocsconvError, TaskError};
use crate::input;
use crate::log::{default_log, SharedLog};
use crate::output::ConversionResult;
use crate::queue::{ConversionQueue, QueueState, SharedSupervisor};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Document conversion service.
///
/// ```rust,no_run
/// use docsconv::{ConversionService, ConverterConfig};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let service = ConversionService::new(ConverterConfig::default());
/// service.start().await?;
/// let out = service.convert("report.docx", "report.pdf").await?;
/// println!("{} bytes", out.bytes);
/// service.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConversionService {
    config: Arc<ConverterConfig>,
    supervisor: SharedSupervisor,
    queue: ConversionQueue,
    log: SharedLog,
}

impl ConversionService {
    /// A service backed by LibreOffice, logging through [`default_log`].
    pub fn new(config: ConverterConfig) -> Self {
        Self::with_launcher(config, Arc::new(OfficeLauncher), default_log())
    }

    /// A service with a custom engine launcher and log sink.
    pub fn with_launcher(
        config: ConverterConfig,
        launcher: Arc<dyn EngineLauncher>,
        log: SharedLog,
    ) -> Self {
        let config = Arc::new(config);
        let supervisor = Arc::new(tokio::sync::Mutex::new(EngineSupervisor::new(
            Arc::clone(&config),
            launcher,
            Arc::clone(&log),
        )));
        let queue = ConversionQueue::new(
            Arc::clone(&supervisor),
            Arc::clone(&log),
            config.task_timeout(),
        );
        Self {
            config,
            supervisor,
            queue,
            log,
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn queue_state(&self) -> QueueState {
        self.queue.state()
    }

    /// Install check, engine start, then queue init.
    ///
    /// On failure the service stays un-started and `convert` fails fast.
    /// Calling `start` on a running service does nothing. Concurrent calls
    /// are serialized on the supervisor lock: one launches, the rest see a
    /// running queue.
    pub async fn start(&self) -> Result<(), DocsconvError> {
        let mut sup = self.supervisor.lock().await;
        match self.queue.state() {
            QueueState::Running => return Ok(()),
            QueueState::Draining | QueueState::Stopped => return Err(DocsconvError::Stopped),
            QueueState::NotStarted => {}
        }

        self.log.info("Initializing document conversion service");
        sup.ensure_installed().await.inspect_err(|e| {
            self.log.error(&e.to_string());
        })?;
        sup.start().await?;

        // Only a concurrent `stop` can move the queue out of NotStarted here.
        if self.queue.init().is_err() {
            if let Err(e) = sup.stop().await {
                self.log.error(&e.to_string());
            }
            return Err(DocsconvError::Stopped);
        }
        drop(sup);

        self.log.info(&format!(
            "Conversion service ready (port {}, timeout {}ms, recycle every {} task(s))",
            self.config.port, self.config.task_timeout_ms, self.config.max_tasks_per_process
        ));
        Ok(())
    }

    /// Convert `input` to `output` with the configured timeout.
    ///
    /// The output format follows the output file's extension.
    pub async fn convert(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> ConversionResult {
        self.convert_with_timeout(input, output, None).await
    }

    /// Like [`convert`](Self::convert) with a per-call timeout override.
    pub async fn convert_with_timeout(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        timeout: Option<Duration>,
    ) -> ConversionResult {
        if self.queue.state() == QueueState::NotStarted {
            return Err(TaskError::NotStarted);
        }
        let input = input.as_ref();
        input::validate_local(input)?;
        debug!("Submitting {}", input.display());
        self.queue
            .submit(input.to_path_buf(), output.as_ref().to_path_buf(), timeout)
            .await
    }

    /// Drain the queue, then stop the engine. Idempotent.
    pub async fn stop(&self) -> Result<(), DocsconvError> {
        let already_stopped = self.queue.state() == QueueState::Stopped;
        let drained = self.queue.shutdown(self.config.drain_grace()).await;
        if !drained {
            info!("Stopping with abandoned tasks");
        }

        let result = self.supervisor.lock().await.stop().await;
        if let Err(e) = &result {
            self.log.error(&e.to_string());
        }
        if !already_stopped {
            self.log.info("Conversion service stopped");
        }
        result
    }

    /// `true` if the engine process is alive. Never waits: while a conversion
    /// holds the engine, a running queue counts as a running engine.
    pub fn is_running(&self) -> bool {
        match self.supervisor.try_lock() {
            Ok(mut sup) => sup.is_running(),
            Err(_) => self.queue.state() == QueueState::Running,
        }
    }

    /// Snapshot of the engine, or `None` while it is busy or stopped.
    pub fn engine_info(&self) -> Option<EngineInfo> {
        self.supervisor.try_lock().ok().and_then(|s| s.info())
    }
}
