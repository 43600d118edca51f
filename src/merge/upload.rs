use bytes::Bytes;

/// One file received in the `files` part of a merge request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client-supplied file name
    pub name: String,

    /// Declared `Content-Type` of the part
    pub content_type: Option<String>,

    /// Raw contents
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, content_type: Option<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type,
            data: data.into(),
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Lowercased extension of the file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// Everything collected from a merge form before validation.
#[derive(Debug, Clone, Default)]
pub struct UploadBatch {
    /// Files in upload order
    pub files: Vec<UploadedFile>,

    /// Raw `count` field
    pub count: Option<String>,

    /// Raw `csrf_token` field
    pub csrf_token: Option<String>,
}

impl UploadBatch {
    /// Sum of all file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(UploadedFile::size).sum()
    }
}
