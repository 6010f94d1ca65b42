//! File signatures for change detection.
//!
//! A signature hashes a bounded prefix of the payload together with its size
//! and name. Two uploads that share a prefix, size and name are treated as the
//! same file; distinct files can alias if they only differ after the window.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::upload::UploadedAudio;

/// Number of leading payload bytes that feed the signature.
pub const SIGNATURE_WINDOW: usize = 1024 * 1024;

/// SHA-256 identity of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileSignature([u8; 32]);

impl FileSignature {
    /// Signature of an upload, hashing at most [`SIGNATURE_WINDOW`] bytes.
    pub fn of(upload: &UploadedAudio) -> Self {
        let bytes = upload.bytes();
        let prefix = &bytes[..bytes.len().min(SIGNATURE_WINDOW)];
        signature(prefix, upload.size(), upload.name())
    }
}

impl fmt::Display for FileSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Hash `(prefix, total_size, name)` into a signature.
pub fn signature(prefix: &[u8], total_size: u64, name: &str) -> FileSignature {
    let mut hasher = Sha256::new();
    hasher.update(prefix);
    hasher.update(total_size.to_le_bytes());
    hasher.update(name.as_bytes());
    FileSignature(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_inputs_match() {
        let a = signature(b"RIFF....WAVE", 3_000_000, "a.wav");
        let b = signature(b"RIFF....WAVE", 3_000_000, "a.wav");
        assert_eq!(a, b);
    }

    #[test]
    fn test_size_changes_signature() {
        let a = signature(b"RIFF", 1000, "a.wav");
        let b = signature(b"RIFF", 1001, "a.wav");
        assert_ne!(a, b);
    }

    #[test]
    fn test_name_changes_signature() {
        let a = signature(b"RIFF", 1000, "a.wav");
        let b = signature(b"RIFF", 1000, "b.wav");
        assert_ne!(a, b);
    }

    #[test]
    fn test_bytes_past_window_are_ignored() {
        let mut first = vec![7u8; SIGNATURE_WINDOW + 16];
        let mut second = first.clone();
        first[SIGNATURE_WINDOW + 3] = 1;
        second[SIGNATURE_WINDOW + 3] = 2;

        let a = FileSignature::of(&UploadedAudio::new(first, "long.wav", "audio/wav"));
        let b = FileSignature::of(&UploadedAudio::new(second, "long.wav", "audio/wav"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_bytes_inside_window_matter() {
        let first = UploadedAudio::new(vec![1, 2, 3], "a.wav", "audio/wav");
        let second = UploadedAudio::new(vec![1, 2, 4], "a.wav", "audio/wav");
        assert_ne!(FileSignature::of(&first), FileSignature::of(&second));
    }

    #[test]
    fn test_display_is_lowercase_hex() {
        let sig = signature(b"", 0, "");
        let hex = sig.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
