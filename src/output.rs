//! Result types returned by a conversion.

use crate::error::TaskError;
use crate::format::FileKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A successfully converted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Queue-assigned task id, increasing in submission order.
    pub task_id: u64,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Size of the written output in bytes.
    pub bytes: u64,
    /// What the output file contains, judged from its leading bytes.
    pub format: FileKind,
    /// Time spent waiting in the queue.
    pub queue_ms: u64,
    /// Time spent in the engine.
    pub duration_ms: u64,
    /// Which engine process served the task (1 for the first, +1 per restart).
    pub engine_generation: u64,
}

/// What every caller of `convert` receives.
pub type ConversionResult = Result<ConversionOutput, TaskError>;
