use anyhow::{Context, Result};
use log::error;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{RenderCache, RenderFn};
use crate::content_source::ContentSource;

/// Cache for file-synced sources. Validity: the artifact's filesystem mtime
/// equals the source's `last_modified()`. On store the artifact's mtime is
/// set to the source's timestamp, repurposing fs mtime as the validity
/// token so checks are a metadata stat instead of a content read.
pub struct ByMtimeCache {
    root: PathBuf,
}

impl ByMtimeCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        super::init_cache_root(&root)?;
        Ok(Self { root })
    }

    fn rendered_content_path(&self, entry_dir: &Path, ext: &str) -> PathBuf {
        entry_dir.join(format!("rendered_content.{ext}"))
    }
}

impl RenderCache for ByMtimeCache {
    fn compute_if_absent(
        &self,
        source: &dyn ContentSource,
        render: RenderFn,
        ext: &str,
    ) -> Result<Option<PathBuf>> {
        if let Some(path) = self.get(source, ext) {
            return Ok(Some(path));
        }
        match render(source)? {
            Some(rendered) => Ok(Some(self.put(source, &rendered, ext)?)),
            None => Ok(None),
        }
    }

    fn replace(
        &self,
        source: &dyn ContentSource,
        render: RenderFn,
        ext: &str,
    ) -> Result<Option<PathBuf>> {
        match render(source)? {
            Some(rendered) => Ok(Some(self.put(source, &rendered, ext)?)),
            None => {
                super::delete_entry_dir(&super::entry_dir(&self.root, source.path()))?;
                Ok(None)
            }
        }
    }

    fn get(&self, source: &dyn ContentSource, ext: &str) -> Option<PathBuf> {
        let entry_dir = super::entry_dir(&self.root, source.path());
        if !entry_dir.exists() {
            return None;
        }
        let artifact = self.rendered_content_path(&entry_dir, ext);
        let check = || -> Result<bool> {
            let artifact_mtime = fs::metadata(&artifact)?.modified()?;
            Ok(artifact_mtime == source.last_modified()?)
        };
        match check() {
            Ok(true) => Some(artifact),
            Ok(false) => None,
            Err(e) => {
                error!("Cache check failed for {:?}: {}", artifact, e);
                None
            }
        }
    }

    fn put(&self, source: &dyn ContentSource, rendered: &str, ext: &str) -> Result<PathBuf> {
        let entry_dir = super::prepare_entry_dir(&self.root, source.path())?;
        let artifact = self.rendered_content_path(&entry_dir, ext);
        let result = (|| -> Result<()> {
            fs::write(&artifact, rendered)
                .with_context(|| format!("Failed to write artifact: {:?}", artifact))?;
            let file = fs::File::options().write(true).open(&artifact)?;
            file.set_modified(source.last_modified()?)
                .with_context(|| format!("Failed to stamp artifact mtime: {:?}", artifact))?;
            Ok(())
        })();
        if let Err(e) = result {
            // roll back the half-written entry before re-raising
            if let Err(cleanup) = super::delete_entry_dir(&entry_dir) {
                error!("Rollback of cache entry dir failed: {}", cleanup);
            }
            return Err(e);
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SOURCE_PATH_FILE;
    use crate::content_source::FileSource;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn file_source(dir: &Path, name: &str, content: &str) -> FileSource {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        FileSource::new(path).unwrap()
    }

    #[test]
    fn test_compute_if_absent_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ByMtimeCache::new(temp_dir.path().join("cache")).unwrap();
        let source = file_source(temp_dir.path(), "doc.md", "# a");

        let mut calls = 0;
        let mut render = |_: &dyn ContentSource| -> Result<Option<String>> {
            calls += 1;
            Ok(Some("<p>a</p>".to_string()))
        };
        let first = cache
            .compute_if_absent(&source, &mut render, "html")
            .unwrap()
            .unwrap();
        let second = cache
            .compute_if_absent(&source, &mut render, "html")
            .unwrap()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls, 1, "renderer must be invoked at most once");
        assert_eq!(fs::read_to_string(&first).unwrap(), "<p>a</p>");
    }

    #[test]
    fn test_mtime_change_invalidates() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ByMtimeCache::new(temp_dir.path().join("cache")).unwrap();
        let source = file_source(temp_dir.path(), "doc.md", "# a");

        cache.put(&source, "<p>a</p>", "html").unwrap();
        assert!(cache.get(&source, "html").is_some());

        // bump the source's mtime without touching the cache
        let file = fs::File::options().write(true).open(source.path()).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();

        assert!(cache.get(&source, "html").is_none());
    }

    #[test]
    fn test_artifact_mtime_matches_source() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ByMtimeCache::new(temp_dir.path().join("cache")).unwrap();
        let source = file_source(temp_dir.path(), "doc.md", "# a");

        let artifact = cache.put(&source, "<p>a</p>", "html").unwrap();
        let artifact_mtime = fs::metadata(&artifact).unwrap().modified().unwrap();
        assert_eq!(artifact_mtime, source.last_modified().unwrap());
    }

    #[test]
    fn test_replace_with_none_deletes_entry() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ByMtimeCache::new(temp_dir.path().join("cache")).unwrap();
        let source = file_source(temp_dir.path(), "doc.md", "# a");

        cache.put(&source, "<p>a</p>", "html").unwrap();
        let entry = crate::cache::entry_dir(&cache.root, source.path());
        assert!(entry.exists());

        let mut render = |_: &dyn ContentSource| -> Result<Option<String>> { Ok(None) };
        let result = cache.replace(&source, &mut render, "html").unwrap();
        assert!(result.is_none());
        assert!(!entry.exists());
        assert!(cache.get(&source, "html").is_none());
    }

    #[test]
    fn test_replace_rerenders_even_when_cached() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ByMtimeCache::new(temp_dir.path().join("cache")).unwrap();
        let source = file_source(temp_dir.path(), "doc.md", "# a");

        cache.put(&source, "old", "html").unwrap();
        let mut render =
            |_: &dyn ContentSource| -> Result<Option<String>> { Ok(Some("new".to_string())) };
        let artifact = cache.replace(&source, &mut render, "html").unwrap().unwrap();
        assert_eq!(fs::read_to_string(artifact).unwrap(), "new");
    }

    #[test]
    fn test_entry_records_source_path() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ByMtimeCache::new(temp_dir.path().join("cache")).unwrap();
        let source = file_source(temp_dir.path(), "doc.md", "# a");

        cache.put(&source, "<p>a</p>", "html").unwrap();
        let entry = crate::cache::entry_dir(&cache.root, source.path());
        let recorded = fs::read_to_string(entry.join(SOURCE_PATH_FILE)).unwrap();
        assert_eq!(Path::new(&recorded), source.path());
    }

    #[test]
    fn test_startup_sweep_removes_deleted_sources() {
        let temp_dir = TempDir::new().unwrap();
        let cache_root = temp_dir.path().join("cache");
        {
            let cache = ByMtimeCache::new(&cache_root).unwrap();
            let source = file_source(temp_dir.path(), "doomed.md", "# a");
            cache.put(&source, "<p>a</p>", "html").unwrap();
            fs::remove_file(source.path()).unwrap();
        }
        // new instance sweeps the orphaned entry before returning
        let _cache = ByMtimeCache::new(&cache_root).unwrap();
        assert_eq!(fs::read_dir(&cache_root).unwrap().count(), 0);
    }
}
