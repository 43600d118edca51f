//! ZIP packaging of merged outputs.
//!
//! The archive is written into the request workspace on a blocking thread and
//! then streamed from disk. [`ArchiveStream`] owns the [`MergeJob`], so the
//! workspace stays alive while the body is being sent and is removed as soon
//! as the stream reaches its end or the response is dropped.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio_util::io::ReaderStream;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::orchestrator::MergeJob;
use crate::error::ArchiveError;

/// Download file name of the bundle.
pub const ARCHIVE_NAME: &str = "merged_files.zip";

/// Builds the download bundle for a completed [`MergeJob`].
pub struct ArchiveBuilder;

impl ArchiveBuilder {
    /// Write the ZIP for `job` into its workspace and return its path.
    ///
    /// Entries appear in group order and are stored without recompression.
    pub async fn build(job: &MergeJob) -> Result<PathBuf, ArchiveError> {
        if job.outputs().is_empty() {
            return Err(ArchiveError::Empty);
        }

        let entries: Vec<(String, PathBuf)> = job
            .outputs()
            .iter()
            .map(|output| (output.archive_name(), output.path.clone()))
            .collect();
        let target = job.workspace().path().join(ARCHIVE_NAME);

        let written = target.clone();
        tokio::task::spawn_blocking(move || write_zip(&written, &entries))
            .await
            .map_err(|e| ArchiveError::Io(e.to_string()))??;

        Ok(target)
    }

    /// Build the ZIP and open it as a response body stream.
    pub async fn stream(job: MergeJob) -> Result<BuiltArchive, ArchiveError> {
        let path = Self::build(&job).await?;
        let file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();

        debug!(path = %path.display(), bytes = len, entries = job.outputs().len(), "Archive ready");
        Ok(BuiltArchive {
            len,
            stream: ArchiveStream {
                inner: ReaderStream::new(file),
                job: Some(job),
            },
        })
    }
}

fn write_zip(target: &Path, entries: &[(String, PathBuf)]) -> Result<(), ArchiveError> {
    let file = std::fs::File::create(target)?;
    let mut zip = ZipWriter::new(std::io::BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for (name, path) in entries {
        zip.start_file(name.as_str(), options)?;
        let mut source = std::fs::File::open(path)?;
        std::io::copy(&mut source, &mut zip)?;
    }

    let mut inner = zip.finish()?;
    inner.flush()?;
    Ok(())
}

/// A finished archive ready to be sent.
pub struct BuiltArchive {
    /// Size in bytes
    pub len: u64,

    /// Body stream
    pub stream: ArchiveStream,
}

/// Streams the archive file and releases the workspace at end of stream.
pub struct ArchiveStream {
    inner: ReaderStream<tokio::fs::File>,
    job: Option<MergeJob>,
}

impl ArchiveStream {
    /// Whether the underlying workspace is still held.
    pub fn holds_workspace(&self) -> bool {
        self.job.is_some()
    }
}

impl Stream for ArchiveStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = polled {
            self.job = None;
        }
        polled
    }
}
