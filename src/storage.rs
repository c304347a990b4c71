//! Attachment storage on disk
//!
//! When a session is configured with an attachment directory, every
//! attachment of a fully fetched message is written there under a sanitized
//! name. Existing files are never overwritten.

use std::path::{Path, PathBuf};

use crate::errors::{MailError, MailResult};
use crate::filename::sanitize_file_name;

/// Attachment directory
#[derive(Debug, Clone)]
pub struct AttachmentStorage {
    dir: PathBuf,
}

impl AttachmentStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for the `index`-th (1-based) attachment of a message
    ///
    /// Derived from the Message-ID when present, the sequence number
    /// otherwise, then sanitized.
    pub fn file_name_for(message_id: Option<&str>, number: u32, index: usize) -> String {
        let stem = match message_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_owned(),
            _ => format!("message-{number}"),
        };
        sanitize_file_name(&format!("{stem}-{index}"))
    }

    /// Write `bytes` under `file_name` and return the path used
    ///
    /// The directory is created on first use. A numeric suffix is appended
    /// when the name is taken.
    pub fn store(&self, file_name: &str, bytes: &[u8]) -> MailResult<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|source| MailError::Storage {
            path: self.dir.clone(),
            source,
        })?;

        let path = unique_path(&self.dir.join(sanitize_file_name(file_name)));
        std::fs::write(&path, bytes).map_err(|source| MailError::Storage {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "stored attachment");
        Ok(path)
    }
}

/// If `path` already exists, append a counter to make it unique
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut i = 1usize;
    loop {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::AttachmentStorage;

    #[test]
    fn names_follow_message_id_and_are_sanitized() {
        assert_eq!(
            AttachmentStorage::file_name_for(Some("<abc@mail.example>"), 7, 2),
            "_abc_mail.example_-2"
        );
        assert_eq!(AttachmentStorage::file_name_for(None, 7, 1), "message-7-1");
        assert_eq!(AttachmentStorage::file_name_for(Some("  "), 3, 1), "message-3-1");
    }

    #[test]
    fn store_never_overwrites() {
        let dir = tempfile::tempdir().expect("temp dir");
        let storage = AttachmentStorage::new(dir.path().join("nested"));

        let first = storage.store("a.jpg", b"XZX").expect("first store");
        let second = storage.store("a.jpg", b"other").expect("second store");

        assert_ne!(first, second);
        assert_eq!(second.file_name().and_then(|n| n.to_str()), Some("a_1.jpg"));
        assert_eq!(std::fs::read(&first).expect("read first"), b"XZX");
        assert_eq!(std::fs::read(&second).expect("read second"), b"other");
    }

    #[test]
    fn store_sanitizes_unsafe_names() {
        let dir = tempfile::tempdir().expect("temp dir");
        let storage = AttachmentStorage::new(dir.path());

        let path = storage.store("../escape me.txt", b"x").expect("store");
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(".._escape_me.txt"));
    }
}
