//! Group partitioning and per-group concatenation.
//!
//! # Ordering
//!
//! Groups run concurrently up to the configured worker count and may finish
//! in any order. Each result is placed in the slot of its group index, so the
//! returned outputs always follow upload order.
//!
//! # Failure Policy
//!
//! The first failing group aborts the request. The remaining in-flight group
//! futures are dropped, which kills their child processes, and the workspace
//! is released when the error propagates.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::concat::AudioConcatenator;
use super::validator::{ValidatedFile, ValidatedUpload};
use super::workspace::Workspace;
use crate::error::{ConcatError, MergeError};

/// Default number of groups processed concurrently per request.
pub const DEFAULT_MERGE_WORKERS: usize = 4;

/// Split `items` into consecutive chunks of `group_size`.
///
/// Produces `ceil(len / group_size)` groups; only the last may be shorter.
/// A zero group size yields no groups.
pub fn partition<T>(items: &[T], group_size: usize) -> Vec<&[T]> {
    if group_size == 0 {
        return Vec::new();
    }
    items.chunks(group_size).collect()
}

/// Result of concatenating one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedOutput {
    /// 1-based group index
    pub index: usize,

    /// Merged file inside the request workspace
    pub path: PathBuf,

    /// Number of input files in the group
    pub file_count: usize,
}

impl MergedOutput {
    /// Name of this output inside the archive.
    pub fn archive_name(&self) -> String {
        let ext = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3");
        format!("merged_{}.{}", self.index, ext)
    }
}

/// Completed merge: ordered outputs and the workspace that holds them.
///
/// Dropping the job removes every file it references.
#[derive(Debug)]
pub struct MergeJob {
    workspace: Workspace,
    outputs: Vec<MergedOutput>,
}

impl MergeJob {
    pub fn outputs(&self) -> &[MergedOutput] {
        &self.outputs
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }
}

/// Drives concatenation for every group of a validated upload.
pub struct MergeOrchestrator {
    concatenator: Arc<dyn AudioConcatenator>,
    workers: usize,
}

impl MergeOrchestrator {
    pub fn new(concatenator: Arc<dyn AudioConcatenator>, workers: usize) -> Self {
        Self {
            concatenator,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Merge `upload` inside a fresh workspace.
    pub async fn run(&self, upload: ValidatedUpload) -> Result<MergeJob, MergeError> {
        let workspace = Workspace::create().map_err(|e| MergeError::Workspace(e.to_string()))?;
        self.run_in(workspace, upload).await
    }

    /// Merge `upload` inside `workspace`, taking ownership of it.
    pub async fn run_in(
        &self,
        workspace: Workspace,
        upload: ValidatedUpload,
    ) -> Result<MergeJob, MergeError> {
        let started = Instant::now();
        let groups = partition(&upload.files, upload.group_size);
        let group_count = groups.len();
        let mut slots: Vec<Option<MergedOutput>> = vec![None; group_count];

        let workspace_ref = &workspace;
        let groups_ref = &groups;
        let mut pending = stream::iter(0..group_count)
            .map(move |position| async move {
                let index = position + 1;
                let group = groups_ref[position];
                self.merge_group(workspace_ref, index, group)
                    .await
                    .map_err(|source| {
                        warn!(event = "group_failed", group = index, error = %source, "Group concatenation failed");
                        MergeError::Group {
                            group: index,
                            source,
                        }
                    })
            })
            .buffer_unordered(self.workers);

        while let Some(result) = pending.next().await {
            let output = result?;
            let slot = output.index - 1;
            slots[slot] = Some(output);
        }
        drop(pending);

        let outputs: Vec<MergedOutput> = slots.into_iter().flatten().collect();
        info!(
            event = "merge_completed",
            files = upload.files.len(),
            groups = outputs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Merge completed"
        );

        Ok(MergeJob { workspace, outputs })
    }

    async fn merge_group(
        &self,
        workspace: &Workspace,
        index: usize,
        group: &[ValidatedFile],
    ) -> Result<MergedOutput, ConcatError> {
        if group.is_empty() {
            return Err(ConcatError::EmptyGroup);
        }

        let dir = workspace.group_dir(index);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ConcatError::Staging(e.to_string()))?;

        let mut inputs = Vec::with_capacity(group.len());
        for (position, file) in group.iter().enumerate() {
            let path = dir.join(format!("input_{:03}.{}", position, file.kind.extension()));
            tokio::fs::write(&path, &file.file.data)
                .await
                .map_err(|e| ConcatError::Staging(e.to_string()))?;
            inputs.push(path);
        }

        let output = dir.join(format!("merged.{}", self.concatenator.output_extension()));
        self.concatenator.concat(&inputs, &output).await?;

        debug!(group = index, files = group.len(), "Group merged");
        Ok(MergedOutput {
            index,
            path: output,
            file_count: group.len(),
        })
    }
}
