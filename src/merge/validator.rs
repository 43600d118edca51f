//! Upload validation.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. at least one file
//! 2. file count within the configured maximum
//! 3. every file within the per-file limit
//! 4. aggregate size within the content-length ceiling
//! 5. every file is an accepted audio type (extension, declared content type,
//!    and leading container signature)
//! 6. `count` is a positive integer no larger than the number of files

use tracing::debug;

use super::upload::{UploadBatch, UploadedFile};
use crate::error::ValidationError;

const MEGABYTE: u64 = 1024 * 1024;

/// Default maximum number of files per request.
pub const DEFAULT_MAX_FILES: usize = 50;

/// Default per-file limit in megabytes.
pub const DEFAULT_MAX_PER_FILE_MB: u64 = 50;

/// Default aggregate request limit in megabytes.
pub const DEFAULT_MAX_CONTENT_LENGTH_MB: u64 = 100;

/// Declared content types accepted for any audio kind.
const GENERIC_CONTENT_TYPES: &[&str] = &["application/octet-stream"];

/// Size limits applied to one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
}

impl UploadLimits {
    /// Build limits from megabyte values.
    pub fn from_megabytes(max_files: usize, max_per_file_mb: u64, max_content_length_mb: u64) -> Self {
        Self {
            max_files,
            max_file_bytes: max_per_file_mb.saturating_mul(MEGABYTE),
            max_total_bytes: max_content_length_mb.saturating_mul(MEGABYTE),
        }
    }

    pub fn max_per_file_mb(&self) -> u64 {
        self.max_file_bytes / MEGABYTE
    }

    pub fn max_content_length_mb(&self) -> u64 {
        self.max_total_bytes / MEGABYTE
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self::from_megabytes(
            DEFAULT_MAX_FILES,
            DEFAULT_MAX_PER_FILE_MB,
            DEFAULT_MAX_CONTENT_LENGTH_MB,
        )
    }
}

/// Accepted audio containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioKind {
    Mp3,
    Wav,
    Ogg,
    Flac,
    M4a,
}

impl AudioKind {
    /// Map a lowercased file extension to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "mp3" => Some(AudioKind::Mp3),
            "wav" => Some(AudioKind::Wav),
            "ogg" | "oga" => Some(AudioKind::Ogg),
            "flac" => Some(AudioKind::Flac),
            "m4a" => Some(AudioKind::M4a),
            _ => None,
        }
    }

    /// Canonical extension used when staging the file.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioKind::Mp3 => "mp3",
            AudioKind::Wav => "wav",
            AudioKind::Ogg => "ogg",
            AudioKind::Flac => "flac",
            AudioKind::M4a => "m4a",
        }
    }

    /// Human-readable container name.
    pub fn label(&self) -> &'static str {
        match self {
            AudioKind::Mp3 => "MP3",
            AudioKind::Wav => "WAV",
            AudioKind::Ogg => "OGG",
            AudioKind::Flac => "FLAC",
            AudioKind::M4a => "M4A",
        }
    }

    fn content_types(&self) -> &'static [&'static str] {
        match self {
            AudioKind::Mp3 => &["audio/mpeg", "audio/mp3", "audio/mpeg3", "audio/x-mpeg-3"],
            AudioKind::Wav => &["audio/wav", "audio/x-wav", "audio/wave", "audio/vnd.wave"],
            AudioKind::Ogg => &["audio/ogg", "application/ogg"],
            AudioKind::Flac => &["audio/flac", "audio/x-flac"],
            AudioKind::M4a => &["audio/mp4", "audio/x-m4a", "audio/m4a"],
        }
    }

    /// Whether a declared content type is compatible with this kind.
    pub fn accepts_content_type(&self, declared: Option<&str>) -> bool {
        let Some(declared) = declared else {
            return true;
        };
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence.is_empty() {
            return true;
        }
        GENERIC_CONTENT_TYPES.contains(&essence.as_str())
            || self.content_types().contains(&essence.as_str())
    }

    /// Whether `data` starts with this container's signature.
    pub fn matches_signature(&self, data: &[u8]) -> bool {
        match self {
            AudioKind::Mp3 => {
                data.starts_with(b"ID3")
                    || (data.len() >= 2 && data[0] == 0xFF && (data[1] & 0xE0) == 0xE0)
            }
            AudioKind::Wav => data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE",
            AudioKind::Ogg => data.starts_with(b"OggS"),
            AudioKind::Flac => data.starts_with(b"fLaC"),
            AudioKind::M4a => data.len() >= 8 && &data[4..8] == b"ftyp",
        }
    }
}

/// An uploaded file that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedFile {
    pub file: UploadedFile,
    pub kind: AudioKind,
}

/// Validated files in upload order plus the requested group size.
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub files: Vec<ValidatedFile>,
    pub group_size: usize,
}

impl ValidatedUpload {
    /// Number of groups the upload will produce.
    pub fn group_count(&self) -> usize {
        if self.group_size == 0 {
            return 0;
        }
        self.files.len().div_ceil(self.group_size)
    }
}

/// Applies [`UploadLimits`] and type checks to an [`UploadBatch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadValidator {
    limits: UploadLimits,
}

impl UploadValidator {
    pub fn new(limits: UploadLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Validate a collected batch.
    pub fn validate(&self, batch: UploadBatch) -> Result<ValidatedUpload, ValidationError> {
        let UploadBatch { files, count, .. } = batch;

        if files.is_empty() {
            return Err(ValidationError::NoFiles);
        }

        if files.len() > self.limits.max_files {
            return Err(ValidationError::TooManyFiles {
                count: files.len(),
                max: self.limits.max_files,
            });
        }

        if let Some(file) = files.iter().find(|f| f.size() > self.limits.max_file_bytes) {
            return Err(ValidationError::FileTooLarge {
                name: file.name.clone(),
                size: file.size(),
                max_mb: self.limits.max_per_file_mb(),
            });
        }

        let total: u64 = files.iter().map(UploadedFile::size).sum();
        if total > self.limits.max_total_bytes {
            return Err(ValidationError::PayloadTooLarge {
                max_mb: self.limits.max_content_length_mb(),
            });
        }

        let files = files
            .into_iter()
            .map(check_type)
            .collect::<Result<Vec<_>, _>>()?;

        let group_size = parse_count(count.as_deref(), files.len())?;

        debug!(files = files.len(), group_size, total_bytes = total, "Upload validated");
        Ok(ValidatedUpload { files, group_size })
    }
}

fn check_type(file: UploadedFile) -> Result<ValidatedFile, ValidationError> {
    let kind = file
        .extension()
        .as_deref()
        .and_then(AudioKind::from_extension)
        .filter(|kind| kind.accepts_content_type(file.content_type.as_deref()))
        .ok_or_else(|| ValidationError::UnsupportedFileType {
            name: file.name.clone(),
        })?;

    if !kind.matches_signature(&file.data) {
        return Err(ValidationError::CorruptFile {
            name: file.name.clone(),
            kind: kind.label(),
        });
    }

    Ok(ValidatedFile { file, kind })
}

fn parse_count(raw: Option<&str>, files: usize) -> Result<usize, ValidationError> {
    let value: i64 = raw
        .map(str::trim)
        .and_then(|s| s.parse().ok())
        .ok_or(ValidationError::MissingCount)?;

    if value <= 0 {
        return Err(ValidationError::NonPositiveCount);
    }

    let count = usize::try_from(value).unwrap_or(usize::MAX);
    if count > files {
        return Err(ValidationError::CountExceedsFiles { count, files });
    }
    Ok(count)
}
