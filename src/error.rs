//! Error types for validation, concatenation, archiving and the token store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while validating an uploaded batch.
///
/// Every variant is caller-fixable and is surfaced immediately; nothing is
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Request body is not `multipart/form-data` (maps to HTTP 415)
    #[error("Content-Type must be multipart/form-data")]
    UnsupportedContentType,

    /// Multipart body could not be parsed
    #[error("Malformed upload: {0}")]
    MalformedBody(String),

    /// No `files` part was supplied
    #[error("No files provided")]
    NoFiles,

    /// More files than the configured maximum
    #[error("Too many files (>{max}). Reduce the number of files.")]
    TooManyFiles { count: usize, max: usize },

    /// A single file exceeds the per-file limit
    #[error("File '{name}' is too large (> {max_mb} MB)")]
    FileTooLarge { name: String, size: u64, max_mb: u64 },

    /// Aggregate request size exceeds the content-length ceiling (maps to HTTP 413)
    #[error("The total upload is too large (> {max_mb} MB).")]
    PayloadTooLarge { max_mb: u64 },

    /// File extension or declared content type is not an accepted audio type
    #[error("File {name} is not a supported audio file")]
    UnsupportedFileType { name: String },

    /// File contents do not match the container its extension claims
    #[error("File {name} is not a valid {kind}")]
    CorruptFile { name: String, kind: &'static str },

    /// `count` is missing or not an integer
    #[error("Parameter 'count' is required and must be integer")]
    MissingCount,

    /// `count` is zero or negative
    #[error("Parameter 'count' must be > 0")]
    NonPositiveCount,

    /// `count` is larger than the number of files
    #[error("Parameter 'count' must be <= number of files")]
    CountExceedsFiles { count: usize, files: usize },
}

/// Failures of the external concatenation step for one group.
#[derive(Debug, Clone, Error)]
pub enum ConcatError {
    /// A group with no inputs was submitted
    #[error("No input files for concatenation")]
    EmptyGroup,

    /// The tool could not be started
    #[error("Failed to launch {tool}: {message}")]
    Spawn { tool: String, message: String },

    /// The tool exited with a non-zero status
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    /// The tool did not finish within its time budget
    #[error("{tool} timed out after {timeout_secs}s")]
    TimedOut { tool: String, timeout_secs: u64 },

    /// The tool reported success but left no output file
    #[error("{tool} produced no output at {}", path.display())]
    MissingOutput { tool: String, path: PathBuf },

    /// Writing the group's inputs into the workspace failed
    #[error("Failed to stage input files: {0}")]
    Staging(String),
}

/// Errors from loading or reloading the bearer token file.
#[derive(Debug, Clone, Error)]
pub enum TokenStoreError {
    /// No token file path has been configured
    #[error("No token file configured")]
    NoPath,

    /// The token file could not be read
    #[error("Failed to read token file {}: {message}", path.display())]
    Read { path: PathBuf, message: String },
}

/// Errors while packaging merged outputs into the download bundle.
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    /// Nothing to archive
    #[error("No files to archive")]
    Empty,

    /// File system error
    #[error("Archive I/O error: {0}")]
    Io(String),

    /// ZIP encoder error
    #[error("ZIP error: {0}")]
    Zip(String),
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Io(err.to_string())
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        ArchiveError::Zip(err.to_string())
    }
}

/// Top-level error for one `/merge` request after admission.
#[derive(Debug, Clone, Error)]
pub enum MergeError {
    /// The upload was rejected by validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The external tool was not found at startup
    #[error("FFmpeg is not available in runtime")]
    ToolUnavailable,

    /// Concatenation of one group failed; the whole request is aborted
    #[error("Group {group} failed: {source}")]
    Group {
        /// 1-based group index
        group: usize,
        #[source]
        source: ConcatError,
    },

    /// Building the archive failed
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The temporary workspace could not be created
    #[error("Workspace error: {0}")]
    Workspace(String),
}
