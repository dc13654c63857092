use anyhow::{Context, Result};
use log::error;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{RenderCache, RenderFn};
use crate::content_source::ContentSource;

const SOURCE_CONTENT_HASH_FILE: &str = "source_content.sha1";

/// Cache for buffer-backed sources. Editor buffers change without a
/// reliable mtime, so validity is a SHA-1 over the full content bytes,
/// stored next to the artifact. A hash mismatch deletes the stale entry
/// instead of merely ignoring it, keeping the entry dir from accumulating
/// dead files.
pub struct ByHashCache {
    root: PathBuf,
}

impl ByHashCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        super::init_cache_root(&root)?;
        Ok(Self { root })
    }

    fn rendered_content_path(&self, entry_dir: &Path, ext: &str) -> PathBuf {
        entry_dir.join(format!("rendered_content.{ext}"))
    }

    // hash is computed once per operation and threaded through, so the
    // validity check and the store always agree on the content identity
    fn get_with_hash(&self, source: &dyn ContentSource, hash: &str, ext: &str) -> Option<PathBuf> {
        let entry_dir = super::entry_dir(&self.root, source.path());
        if !entry_dir.exists() {
            return None;
        }
        let artifact = self.rendered_content_path(&entry_dir, ext);
        if !artifact.is_file() {
            return None;
        }
        match fs::read_to_string(entry_dir.join(SOURCE_CONTENT_HASH_FILE)) {
            Ok(stored) if stored == hash => Some(artifact),
            Ok(_) => {
                // stale content: drop the whole entry so it cannot linger
                if let Err(e) = super::delete_entry_dir(&entry_dir) {
                    error!("Failed to delete stale cache entry {:?}: {}", entry_dir, e);
                }
                None
            }
            Err(e) => {
                error!("Cache check failed for {:?}: {}", entry_dir, e);
                None
            }
        }
    }

    fn put_with_hash(
        &self,
        source: &dyn ContentSource,
        rendered: &str,
        hash: &str,
        ext: &str,
    ) -> Result<PathBuf> {
        let entry_dir = super::prepare_entry_dir(&self.root, source.path())?;
        let artifact = self.rendered_content_path(&entry_dir, ext);
        let result = (|| -> Result<()> {
            fs::write(&artifact, rendered)
                .with_context(|| format!("Failed to write artifact: {:?}", artifact))?;
            fs::write(entry_dir.join(SOURCE_CONTENT_HASH_FILE), hash)
                .with_context(|| format!("Failed to write content hash in: {:?}", entry_dir))?;
            Ok(())
        })();
        if let Err(e) = result {
            if let Err(cleanup) = super::delete_entry_dir(&entry_dir) {
                error!("Rollback of cache entry dir failed: {}", cleanup);
            }
            return Err(e);
        }
        Ok(artifact)
    }
}

impl RenderCache for ByHashCache {
    fn compute_if_absent(
        &self,
        source: &dyn ContentSource,
        render: RenderFn,
        ext: &str,
    ) -> Result<Option<PathBuf>> {
        let hash = super::content_sha1(source)?;
        if let Some(path) = self.get_with_hash(source, &hash, ext) {
            return Ok(Some(path));
        }
        match render(source)? {
            Some(rendered) => Ok(Some(self.put_with_hash(source, &rendered, &hash, ext)?)),
            None => Ok(None),
        }
    }

    fn replace(
        &self,
        source: &dyn ContentSource,
        render: RenderFn,
        ext: &str,
    ) -> Result<Option<PathBuf>> {
        let hash = super::content_sha1(source)?;
        match render(source)? {
            Some(rendered) => Ok(Some(self.put_with_hash(source, &rendered, &hash, ext)?)),
            None => {
                super::delete_entry_dir(&super::entry_dir(&self.root, source.path()))?;
                Ok(None)
            }
        }
    }

    fn get(&self, source: &dyn ContentSource, ext: &str) -> Option<PathBuf> {
        let hash = match super::content_sha1(source) {
            Ok(hash) => hash,
            Err(e) => {
                error!("Failed to hash source {:?}: {}", source.path(), e);
                return None;
            }
        };
        self.get_with_hash(source, &hash, ext)
    }

    fn put(&self, source: &dyn ContentSource, rendered: &str, ext: &str) -> Result<PathBuf> {
        let hash = super::content_sha1(source)?;
        self.put_with_hash(source, rendered, &hash, ext)
    }
}
