//! The merge pipeline.
//!
//! An [`UploadBatch`] collected from the request is checked by the
//! [`UploadValidator`], split into groups and concatenated by the
//! [`MergeOrchestrator`] through an [`AudioConcatenator`], and packaged by the
//! [`ArchiveBuilder`]. All intermediate files live in one [`Workspace`] per
//! request.

mod archive;
mod concat;
mod orchestrator;
mod upload;
mod validator;
mod workspace;

pub use archive::{ArchiveBuilder, ArchiveStream, BuiltArchive, ARCHIVE_NAME};
pub use concat::{
    probe_tool, AudioConcatenator, FfmpegConcatenator, DEFAULT_TOOL_PATH, DEFAULT_TOOL_TIMEOUT,
};
pub use orchestrator::{partition, MergeJob, MergeOrchestrator, MergedOutput, DEFAULT_MERGE_WORKERS};
pub use upload::{UploadBatch, UploadedFile};
pub use validator::{
    AudioKind, UploadLimits, UploadValidator, ValidatedFile, ValidatedUpload,
    DEFAULT_MAX_CONTENT_LENGTH_MB, DEFAULT_MAX_FILES, DEFAULT_MAX_PER_FILE_MB,
};
pub use workspace::Workspace;
