//! Checkpointing
//!
//! Snapshots of the run (graph state, completed-task details, registry) are
//! serialized to paired artifacts: a structured `.data` record and a
//! human-readable `.view`. Writes are atomic (temp file, fsync, rename) and
//! never fatal to execution; the `latest.*` artifacts are replaced after
//! each successful write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::domain::{now_ms, Task, TaskStatus};
use crate::graph::TaskGraph;
use crate::registry::RegistrySnapshot;

/// Checkpoint I/O errors; logged and suppressed by callers
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Overall run state recorded in a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Complete,
    Partial,
    Fatal,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Partial => write!(f, "partial"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// One run snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unix millis when the snapshot was taken
    pub timestamp: i64,
    pub request: String,
    pub execution_status: ExecutionStatus,
    pub total_tasks: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub pending_count: usize,
    /// Full detail for completed tasks: source, summary, attempt count
    pub completed: Vec<Task>,
    pub pending_ids: Vec<String>,
    pub failed_ids: Vec<String>,
    pub skipped_ids: Vec<String>,
    /// Dependency adjacency: task id -> dependency ids
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub registry: RegistrySnapshot,
}

impl Checkpoint {
    /// Capture the current run state
    pub fn capture(request: &str, graph: &TaskGraph, registry: RegistrySnapshot, status: ExecutionStatus) -> Self {
        let completed: Vec<Task> = graph
            .tasks()
            .filter(|t| t.status == TaskStatus::Validated)
            .cloned()
            .collect();
        let failed_ids = graph.ids_in_status(TaskStatus::Failed);
        let skipped_ids = graph.ids_in_status(TaskStatus::Skipped);
        let pending_ids: Vec<String> = graph
            .tasks()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Ready | TaskStatus::Running))
            .map(|t| t.id.clone())
            .collect();
        let dependencies = graph
            .tasks()
            .map(|t| (t.id.clone(), t.dependencies.iter().cloned().collect()))
            .collect();

        Self {
            timestamp: now_ms(),
            request: request.to_string(),
            execution_status: status,
            total_tasks: graph.len(),
            completed_count: completed.len(),
            failed_count: failed_ids.len(),
            skipped_count: skipped_ids.len(),
            pending_count: pending_ids.len(),
            completed,
            pending_ids,
            failed_ids,
            skipped_ids,
            dependencies,
            registry,
        }
    }

    /// Human-readable digest written next to the data record
    pub fn render_view(&self) -> String {
        let mut out = String::new();
        out.push_str("# Run checkpoint\n\n");
        out.push_str(&format!("- Captured: {} (unix ms)\n", self.timestamp));
        out.push_str(&format!("- Status: {}\n", self.execution_status));
        out.push_str(&format!(
            "- Tasks: {} total, {} completed, {} failed, {} skipped, {} pending\n\n",
            self.total_tasks, self.completed_count, self.failed_count, self.skipped_count, self.pending_count
        ));
        out.push_str("## Request\n\n");
        out.push_str(&self.request);
        out.push_str("\n\n## Completed tasks\n\n");
        for task in &self.completed {
            let purpose = task.summary.as_ref().map(|s| s.purpose.as_str()).unwrap_or("-");
            out.push_str(&format!(
                "- {} (attempts: {}, lines: {}): {}\n",
                task.id,
                task.attempt_count,
                task.generated_line_count(),
                purpose
            ));
        }
        if !self.failed_ids.is_empty() {
            out.push_str("\n## Failed tasks\n\n");
            for id in &self.failed_ids {
                out.push_str(&format!("- {}\n", id));
            }
        }
        if !self.skipped_ids.is_empty() {
            out.push_str("\n## Skipped tasks\n\n");
            for id in &self.skipped_ids {
                out.push_str(&format!("- {}\n", id));
            }
        }
        out
    }
}

/// Paths produced by one checkpoint write
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    pub data: PathBuf,
    pub view: PathBuf,
}

/// Writes and loads checkpoint artifacts under `<output>/checkpoints/`
pub struct Checkpointer {
    dir: PathBuf,
    /// Disambiguates snapshots taken within the same second
    seq: AtomicU64,
}

impl Checkpointer {
    pub fn new(output_directory: impl AsRef<Path>) -> Self {
        Self {
            dir: output_directory.as_ref().join("checkpoints"),
            seq: AtomicU64::new(0),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Write one snapshot pair and replace the latest pointers
    ///
    /// Serialized writes: callers hold the snapshot sequence; artifacts land
    /// via temp-file + fsync + rename so readers never observe a torn file.
    pub async fn write(&self, checkpoint: &Checkpoint) -> Result<CheckpointPaths, CheckpointError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let stamp = format!(
            "{}-{:04}",
            chrono::DateTime::from_timestamp_millis(checkpoint.timestamp)
                .unwrap_or_default()
                .format("%Y%m%d-%H%M%S"),
            seq
        );

        let data_path = self.dir.join(format!("{}.data", stamp));
        let view_path = self.dir.join(format!("{}.view", stamp));
        let data = serde_json::to_string_pretty(checkpoint)?;
        let view = checkpoint.render_view();

        self.write_atomic(&data_path, data.as_bytes()).await?;
        self.write_atomic(&view_path, view.as_bytes()).await?;

        // Replace the latest pointers only after both artifacts landed
        self.write_atomic(&self.dir.join("latest.data"), data.as_bytes()).await?;
        self.write_atomic(&self.dir.join("latest.view"), view.as_bytes()).await?;

        debug!(stamp = %stamp, "checkpoint written");
        Ok(CheckpointPaths {
            data: data_path,
            view: view_path,
        })
    }

    /// Atomic write: temp file in the same directory, fsync, rename
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<(), CheckpointError> {
        let tmp = PathBuf::from(format!("{}.tmp", path.display()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Load the most recent snapshot: latest pointer first, newest stamp
    /// as fallback
    pub async fn load_latest(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let latest = self.dir.join("latest.data");
        if let Ok(content) = tokio::fs::read_to_string(&latest).await {
            match serde_json::from_str(&content) {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(e) => warn!(error = %e, "latest checkpoint unreadable, falling back to scan"),
            }
        }

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };
        // Stamps sort chronologically by name
        let mut newest: Option<PathBuf> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path.extension().and_then(|ext| ext.to_str()) == Some("data")
                && path.file_stem().and_then(|stem| stem.to_str()) != Some("latest");
            if is_snapshot && newest.as_ref().is_none_or(|n| path > *n) {
                newest = Some(path);
            }
        }
        let Some(path) = newest else {
            return Ok(None);
        };
        let content = tokio::fs::read_to_string(&path).await?;
        let checkpoint = serde_json::from_str(&content)?;
        info!(path = %path.display(), "loaded checkpoint");
        Ok(Some(checkpoint))
    }
}
