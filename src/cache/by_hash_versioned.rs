use anyhow::{Context, Result};
use log::error;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{RenderCache, RenderFn};
use crate::content_source::ContentSource;

/// Content-hash cache that keeps renderings of prior contents around: the
/// artifact filename embeds the hash, so reverting a buffer to earlier text
/// (undo, diff navigation) hits a warm version instead of re-rendering.
///
/// `versions_to_keep` bounds retention. On every `put`, existing version
/// files are sorted by mtime descending and everything beyond the bound is
/// pruned; 0 means all prior versions are deleted before storing, which
/// degenerates to plain hash caching.
pub struct ByHashVersionedCache {
    root: PathBuf,
    versions_to_keep: usize,
}

impl ByHashVersionedCache {
    pub fn new(root: impl Into<PathBuf>, versions_to_keep: usize) -> Result<Self> {
        let root = root.into();
        super::init_cache_root(&root)?;
        Ok(Self {
            root,
            versions_to_keep,
        })
    }

    fn rendered_content_path(&self, entry_dir: &Path, hash: &str, ext: &str) -> PathBuf {
        entry_dir.join(format!("rendered_content_{hash}.{ext}"))
    }

    fn get_with_hash(&self, source: &dyn ContentSource, hash: &str, ext: &str) -> Option<PathBuf> {
        let entry_dir = super::entry_dir(&self.root, source.path());
        if !entry_dir.exists() {
            return None;
        }
        let artifact = self.rendered_content_path(&entry_dir, hash, ext);
        artifact.is_file().then_some(artifact)
    }

    fn list_versions(entry_dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(fs::read_dir(entry_dir)
            .with_context(|| format!("Failed to list cache entry dir: {:?}", entry_dir))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("rendered_content_"))
            })
            .collect())
    }

    /// Keep the `versions_to_keep` most recently modified version files,
    /// delete the rest. Called after the new version was written, so the
    /// bound includes it.
    fn prune_versions(&self, entry_dir: &Path) -> Result<()> {
        let mut versions = Self::list_versions(entry_dir)?;
        if versions.len() <= self.versions_to_keep {
            return Ok(());
        }
        // newest first; mtime of unreadable files sorts last
        versions.sort_by_key(|p| {
            std::cmp::Reverse(
                fs::metadata(p)
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            )
        });
        for stale in &versions[self.versions_to_keep..] {
            if let Err(e) = fs::remove_file(stale) {
                error!("Failed to prune cache version {:?}: {}", stale, e);
            }
        }
        Ok(())
    }

    fn put_with_hash(
        &self,
        source: &dyn ContentSource,
        rendered: &str,
        hash: &str,
        ext: &str,
    ) -> Result<PathBuf> {
        let entry_dir = super::prepare_entry_dir(&self.root, source.path())?;
        let artifact = self.rendered_content_path(&entry_dir, hash, ext);
        let result = (|| -> Result<()> {
            if self.versions_to_keep == 0 {
                // delete all prior versions before storing the new one
                for stale in Self::list_versions(&entry_dir)? {
                    fs::remove_file(&stale)
                        .with_context(|| format!("Failed to delete version: {:?}", stale))?;
                }
            }
            fs::write(&artifact, rendered)
                .with_context(|| format!("Failed to write artifact: {:?}", artifact))?;
            if self.versions_to_keep > 0 {
                self.prune_versions(&entry_dir)?;
            }
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

impl RenderCache for ByHashVersionedCache {
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
