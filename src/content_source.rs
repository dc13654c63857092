use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Read-only view of a document's current content plus identity and
/// freshness metadata. Implementations must return an absolute path, and
/// content reads must be idempotent within one render cycle.
pub trait ContentSource: Send + Sync {
    /// Absolute path identifying the document. For non-file sources (e.g.
    /// one side of a diff view) this is a virtual path.
    fn path(&self) -> &Path;

    /// True if the content is guaranteed to match the on-disk file's
    /// current bytes. False for unsaved editor buffers.
    fn is_synced(&self) -> bool;

    fn last_modified(&self) -> Result<SystemTime>;

    fn content(&self) -> Result<String>;

    fn content_bytes(&self) -> Result<Vec<u8>>;

    /// Content-type classification tags, e.g. "text/markdown".
    fn content_types(&self) -> &[String];
}

/// A source backed by a file on disk. Content is read on demand, so it is
/// only valid while the file is not being concurrently modified.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    content_types: Vec<String>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let path = if path.is_absolute() {
            path
        } else {
            fs::canonicalize(&path)
                .with_context(|| format!("Failed to resolve path: {:?}", path))?
        };
        Ok(Self {
            path,
            content_types: Vec::new(),
        })
    }

    pub fn with_content_types(mut self, types: impl IntoIterator<Item = String>) -> Self {
        self.content_types = types.into_iter().collect();
        self
    }
}

impl ContentSource for FileSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_synced(&self) -> bool {
        true
    }

    fn last_modified(&self) -> Result<SystemTime> {
        let meta = fs::metadata(&self.path)
            .with_context(|| format!("Failed to stat source: {:?}", self.path))?;
        meta.modified()
            .with_context(|| format!("No modification time for: {:?}", self.path))
    }

    fn content(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read source: {:?}", self.path))
    }

    fn content_bytes(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).with_context(|| format!("Failed to read source: {:?}", self.path))
    }

    fn content_types(&self) -> &[String] {
        &self.content_types
    }
}

/// Snapshot of an unsaved in-memory buffer. The text is captured at
/// construction time so repeated reads within a render cycle are
/// deterministic even while the live buffer keeps changing.
#[derive(Debug, Clone)]
pub struct BufferSource {
    path: PathBuf,
    text: String,
    modified: SystemTime,
    content_types: Vec<String>,
}

impl BufferSource {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
            modified: SystemTime::now(),
            content_types: Vec::new(),
        }
    }

    pub fn with_content_types(mut self, types: impl IntoIterator<Item = String>) -> Self {
        self.content_types = types.into_iter().collect();
        self
    }
}

impl ContentSource for BufferSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_synced(&self) -> bool {
        false
    }

    fn last_modified(&self) -> Result<SystemTime> {
        Ok(self.modified)
    }

    fn content(&self) -> Result<String> {
        Ok(self.text.clone())
    }

    fn content_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.text.clone().into_bytes())
    }

    fn content_types(&self) -> &[String] {
        &self.content_types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_source_reads_disk_content() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("doc.md");
        fs::write(&file, "# hello").unwrap();

        let source = FileSource::new(&file).unwrap();
        assert!(source.is_synced());
        assert!(source.path().is_absolute());
        assert_eq!(source.content().unwrap(), "# hello");

        fs::write(&file, "# changed").unwrap();
        assert_eq!(source.content().unwrap(), "# changed");
    }

    #[test]
    fn test_buffer_source_is_a_snapshot() {
        let source = BufferSource::new("/virtual/doc.md", "draft text");
        assert!(!source.is_synced());
        assert_eq!(source.content().unwrap(), "draft text");
        assert_eq!(source.content_bytes().unwrap(), b"draft text");
    }

    #[test]
    fn test_content_types_tagging() {
        let source = BufferSource::new("/virtual/doc.md", "x")
            .with_content_types(["text/markdown".to_string()]);
        assert_eq!(source.content_types(), ["text/markdown".to_string()]);
    }
}
