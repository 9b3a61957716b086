//! Serialized conversion queue.
//!
//! ## Design
//!
//! All callers share one unbounded channel feeding a single worker task, so
//! the engine never sees more than one document at a time and tasks run in
//! submission order. Each job carries a `oneshot` sender for its result.
//!
//! ```text
//! submit() ──► mpsc ──► worker ──► supervisor.prepare() ──► timeout(execute)
//!    ▲                                                            │
//!    └─────────────────────── oneshot reply ◄─────────────────────┘
//! ```
//!
//! Shutdown closes the channel, lets the worker drain what is already queued
//! for up to the grace period, then aborts it. Aborting drops every
//! outstanding reply sender, which callers observe as `TaskError::Cancelled`.

use crate::engine::EngineSupervisor;
use crate::error::{DocsconvError, TaskError};
use crate::format;
use crate::log::SharedLog;
use crate::output::{ConversionOutput, ConversionResult};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tracing::debug;

/// The supervisor, shared between the queue worker and the façade.
pub type SharedSupervisor = Arc<tokio::sync::Mutex<EngineSupervisor>>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a [`ConversionQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueueState {
    NotStarted,
    Running,
    Draining,
    Stopped,
}

/// One unit of work.
#[derive(Debug, Clone)]
pub struct ConversionTask {
    pub id: u64,
    pub input: PathBuf,
    pub output: PathBuf,
    pub submitted_at: Instant,
    pub timeout: Duration,
    /// `submitted_at + timeout`: the caller is answered by then at the latest.
    pub deadline: Instant,
}

struct Job {
    task: ConversionTask,
    reply: oneshot::Sender<ConversionResult>,
}

struct Inner {
    state: QueueState,
    sender: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

/// FIFO queue that runs conversions one at a time against the supervised engine.
pub struct ConversionQueue {
    inner: Mutex<Inner>,
    supervisor: SharedSupervisor,
    log: SharedLog,
    default_timeout: Duration,
    queued: Arc<AtomicUsize>,
}

impl ConversionQueue {
    pub fn new(supervisor: SharedSupervisor, log: SharedLog, default_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: QueueState::NotStarted,
                sender: None,
                worker: None,
            }),
            supervisor,
            log,
            default_timeout,
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    /// Tasks accepted but not yet picked up by the worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Spawn the worker and start accepting tasks. Must run inside a Tokio runtime.
    pub fn init(&self) -> Result<(), DocsconvError> {
        let mut inner = self.lock();
        if inner.state != QueueState::NotStarted {
            return Err(DocsconvError::QueueAlreadyStarted);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            rx,
            Arc::clone(&self.supervisor),
            Arc::clone(&self.log),
            Arc::clone(&self.queued),
        ));

        inner.sender = Some(tx);
        inner.worker = Some(worker);
        inner.state = QueueState::Running;
        debug!("Conversion queue running");
        Ok(())
    }

    /// Enqueue a conversion and wait for its result.
    ///
    /// `timeout` overrides the default per-task budget.
    pub async fn submit(
        &self,
        input: PathBuf,
        output: PathBuf,
        timeout: Option<Duration>,
    ) -> ConversionResult {
        let submitted_at = Instant::now();
        let timeout = timeout.unwrap_or(self.default_timeout);
        let task = ConversionTask {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::SeqCst),
            input,
            output,
            submitted_at,
            timeout,
            deadline: submitted_at + timeout,
        };
        let id = task.id;
        let deadline = task.deadline;
        let (reply, rx) = oneshot::channel();

        {
            let inner = self.lock();
            match inner.state {
                QueueState::Running => {}
                QueueState::NotStarted => return Err(TaskError::NotStarted),
                QueueState::Draining | QueueState::Stopped => return Err(TaskError::QueueClosed),
            }
            let sender = inner.sender.as_ref().ok_or(TaskError::QueueClosed)?;
            self.queued.fetch_add(1, Ordering::SeqCst);
            if sender.send(Job { task, reply }).is_err() {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                return Err(TaskError::QueueClosed);
            }
        }
        debug!("Task {id} queued");

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TaskError::Cancelled { task: id }),
            // The worker enforces the same deadline and recycles the engine.
            Err(_) => Err(TaskError::Timeout {
                task: id,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Stop accepting work, drain for up to `grace`, then abandon the rest.
    ///
    /// Returns `true` if every queued task finished within the grace period.
    /// Safe to call more than once.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let worker = {
            let mut inner = self.lock();
            match inner.state {
                QueueState::NotStarted | QueueState::Stopped => {
                    inner.state = QueueState::Stopped;
                    return true;
                }
                QueueState::Running | QueueState::Draining => {}
            }
            inner.state = QueueState::Draining;
            inner.sender = None;
            inner.worker.take()
        };

        let Some(mut worker) = worker else {
            // Another caller is already draining.
            return true;
        };

        let pending = self.queued();
        if pending > 0 {
            self.log.info(&format!(
                "Draining conversion queue ({pending} task(s) waiting, grace {}ms)",
                grace.as_millis()
            ));
        }

        let drained = match tokio::time::timeout(grace, &mut worker).await {
            Ok(_) => true,
            Err(_) => {
                worker.abort();
                let _ = worker.await;
                self.queued.store(0, Ordering::SeqCst);
                self.log.error(&format!(
                    "Conversion queue did not drain within {}ms; remaining tasks cancelled",
                    grace.as_millis()
                ));
                false
            }
        };

        self.lock().state = QueueState::Stopped;
        drained
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Job>,
    supervisor: SharedSupervisor,
    log: SharedLog,
    queued: Arc<AtomicUsize>,
) {
    while let Some(job) = rx.recv().await {
        queued.fetch_sub(1, Ordering::SeqCst);
        if job.reply.is_closed() {
            debug!("Task {} skipped: caller went away", job.task.id);
            continue;
        }
        let result = process(&job, &supervisor, &log).await;
        let _ = job.reply.send(result);
    }
    debug!("Conversion queue worker exiting");
}

async fn process(job: &Job, supervisor: &SharedSupervisor, log: &SharedLog) -> ConversionResult {
    let task = &job.task;
    let queue_ms = task.submitted_at.elapsed().as_millis() as u64;
    let mut sup = supervisor.lock().await;

    let generation = sup.prepare().await?;

    // The budget may have run out while the engine was being replaced. The
    // fresh engine is healthy, so answer without running or poisoning it.
    if job.reply.is_closed() || Instant::now() >= task.deadline {
        debug!("Task {} expired before reaching the engine", task.id);
        return Err(TaskError::Timeout {
            task: task.id,
            timeout_ms: task.timeout.as_millis() as u64,
        });
    }

    debug!(
        "Task {} started: {} -> {}",
        task.id,
        task.input.display(),
        task.output.display()
    );
    let started = Instant::now();
    let outcome = tokio::time::timeout_at(
        task.deadline,
        sup.execute(task.id, &task.input, &task.output),
    )
    .await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(())) => {
            let bytes = tokio::fs::metadata(&task.output)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            let kind = format::sniff(&task.output).unwrap_or(format::FileKind::Unknown);
            log.info(&format!(
                "Task {} converted {} in {duration_ms}ms ({bytes} bytes)",
                task.id,
                task.input.display()
            ));
            Ok(ConversionOutput {
                task_id: task.id,
                input: task.input.clone(),
                output: task.output.clone(),
                bytes,
                format: kind,
                queue_ms,
                duration_ms,
                engine_generation: generation,
            })
        }
        Ok(Err(e)) => {
            log.error(&format!("Task {} failed: {e}", task.id));
            Err(e)
        }
        Err(_) => {
            sup.mark_poisoned();
            let e = TaskError::Timeout {
                task: task.id,
                timeout_ms: task.timeout.as_millis() as u64,
            };
            log.error(&format!("{e}; engine will be restarted"));
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConverterConfig;
    use crate::engine::{Engine, EngineLauncher};
    use crate::error::EngineError;
    use crate::log::NoopLog;
    use async_trait::async_trait;

    struct NoEngine;

    #[async_trait]
    impl EngineLauncher for NoEngine {
        async fn ensure_installed(
            &self,
            _config: &ConverterConfig,
            _log: &SharedLog,
        ) -> Result<(), DocsconvError> {
            Ok(())
        }

        async fn launch(
            &self,
            _config: &ConverterConfig,
            _generation: u64,
            _log: &SharedLog,
        ) -> Result<Box<dyn Engine>, EngineError> {
            Err(EngineError::Launch("no engine in unit tests".into()))
        }
    }

    fn queue() -> ConversionQueue {
        let log: SharedLog = Arc::new(NoopLog);
        let sup = EngineSupervisor::new(
            Arc::new(ConverterConfig::default()),
            Arc::new(NoEngine),
            Arc::clone(&log),
        );
        ConversionQueue::new(
            Arc::new(tokio::sync::Mutex::new(sup)),
            log,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn submit_before_init_is_not_started() {
        let q = queue();
        let r = q.submit("a.docx".into(), "a.pdf".into(), None).await;
        assert_eq!(r.unwrap_err(), TaskError::NotStarted);
    }

    #[tokio::test]
    async fn init_twice_is_rejected() {
        let q = queue();
        q.init().unwrap();
        assert!(matches!(q.init(), Err(DocsconvError::QueueAlreadyStarted)));
        assert_eq!(q.state(), QueueState::Running);
        q.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn unavailable_engine_is_reported_per_task() {
        let q = queue();
        q.init().unwrap();
        let r = q.submit("a.docx".into(), "a.pdf".into(), None).await;
        assert!(matches!(r, Err(TaskError::EngineUnavailable { .. })), "got: {r:?}");
        assert!(q.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_closes_queue() {
        let q = queue();
        q.init().unwrap();
        assert!(q.shutdown(Duration::from_secs(1)).await);
        assert!(q.shutdown(Duration::from_secs(1)).await);
        assert_eq!(q.state(), QueueState::Stopped);

        let r = q.submit("a.docx".into(), "a.pdf".into(), None).await;
        assert_eq!(r.unwrap_err(), TaskError::QueueClosed);
        assert!(matches!(q.init(), Err(DocsconvError::QueueAlreadyStarted)));
    }

    #[tokio::test]
    async fn shutdown_before_init_stops() {
        let q = queue();
        assert!(q.shutdown(Duration::from_millis(10)).await);
        assert_eq!(q.state(), QueueState::Stopped);
    }

    #[test]
    fn task_ids_increase() {
        let a = NEXT_TASK_ID.fetch_add(1, Ordering::SeqCst);
        let b = NEXT_TASK_ID.fetch_add(1, Ordering::SeqCst);
        assert!(b > a);
    }
}
