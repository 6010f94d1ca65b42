//! Uploaded audio payloads.

use std::path::Path;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// MIME type sent for files whose extension is not recognized.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// MIME type of an audio file, judged by its extension.
pub fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3" | "mpga" | "mpeg") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("ogg" | "oga" | "opus") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("webm") => "audio/webm",
        Some("mp4") => "video/mp4",
        _ => FALLBACK_MIME_TYPE,
    }
}

/// An uploaded audio file held in memory for the duration of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAudio {
    bytes: Vec<u8>,
    name: String,
    mime_type: String,
}

impl UploadedAudio {
    pub fn new(bytes: Vec<u8>, name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            name: name.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Payload size in MiB.
    pub fn size_mb(&self) -> f64 {
        self.size() as f64 / BYTES_PER_MB
    }

    /// File extension including the leading dot, if the name has one.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{ext}"))
    }
}
