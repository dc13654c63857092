//! On-disk render caches: one directory per source path, three
//! interchangeable invalidation strategies (mtime, content hash, content
//! hash with retained versions).

mod by_hash;
mod by_hash_versioned;
mod by_mtime;

pub use by_hash::ByHashCache;
pub use by_hash_versioned::ByHashVersionedCache;
pub use by_mtime::ByMtimeCache;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use log::{error, info};
use sha1::{Digest, Sha1};
use std::fs;
use std::path::{Path, PathBuf};

use crate::content_source::ContentSource;

/// Text record of the originating path inside each cache entry directory,
/// used to detect orphaned entries at startup.
pub(crate) const SOURCE_PATH_FILE: &str = "source_path";

/// Render callback handed to the cache: `Ok(None)` means "this source has
/// no renderable form" (defer to passthrough), not an error.
pub type RenderFn<'a> = &'a mut dyn FnMut(&dyn ContentSource) -> Result<Option<String>>;

/// Shared contract of the three cache strategies. The `ext` parameter is
/// the file extension of the rendered artifact ("html", "xml", "svg").
pub trait RenderCache: Send + Sync {
    /// Return a still-valid cached artifact, or invoke `render` and store
    /// the result. Returns `None` if rendering produced no output.
    fn compute_if_absent(
        &self,
        source: &dyn ContentSource,
        render: RenderFn,
        ext: &str,
    ) -> Result<Option<PathBuf>>;

    /// Always re-render, ignoring any existing entry. A `None` render
    /// result deletes the existing entry (cache invalidation signal).
    fn replace(
        &self,
        source: &dyn ContentSource,
        render: RenderFn,
        ext: &str,
    ) -> Result<Option<PathBuf>>;

    /// Cache lookup without render fallback.
    fn get(&self, source: &dyn ContentSource, ext: &str) -> Option<PathBuf>;

    /// Unconditional store.
    fn put(&self, source: &dyn ContentSource, rendered: &str, ext: &str) -> Result<PathBuf>;
}

/// Initialize a cache root: replace a regular file squatting on the path,
/// create the directory and sweep entries whose source no longer exists.
pub(crate) fn init_cache_root(root: &Path) -> Result<()> {
    info!("Initializing render cache folder {:?}", root);
    if root.is_file() {
        fs::remove_file(root)
            .with_context(|| format!("Failed to remove file squatting cache root: {:?}", root))?;
    }
    fs::create_dir_all(root)
        .with_context(|| format!("Failed to create cache root: {:?}", root))?;
    sweep_stale_entries(root);
    Ok(())
}

/// Remove every entry directory whose recorded source path no longer exists
/// on disk, or whose record is missing/unreadable. Errors are logged and
/// skipped so one bad entry cannot poison the whole cache.
fn sweep_stale_entries(root: &Path) {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Failed to list cache root {:?}: {}", root, e);
            return;
        }
    };
    for entry in entries.flatten() {
        let entry_dir = entry.path();
        if !entry_dir.is_dir() {
            continue;
        }
        let record = entry_dir.join(SOURCE_PATH_FILE);
        let stale = match fs::read_to_string(&record) {
            Ok(source_path) => !Path::new(source_path.trim_end()).exists(),
            // Missing or unreadable record: treat as corrupt and self-heal.
            Err(_) => true,
        };
        if stale {
            info!("Deleting stale cache dir {:?}", entry_dir);
            if let Err(e) = fs::remove_dir_all(&entry_dir) {
                error!("Failed to delete stale cache dir {:?}: {}", entry_dir, e);
            }
        }
    }
}

/// Filesystem-safe, injective entry key: base64url of the source path.
pub(crate) fn entry_dir(root: &Path, source_path: &Path) -> PathBuf {
    root.join(URL_SAFE_NO_PAD.encode(source_path.to_string_lossy().as_bytes()))
}

pub(crate) fn delete_entry_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to delete cache entry dir: {:?}", dir))?;
    }
    Ok(())
}

/// Lowercase hex SHA-1 of the source's full byte content.
pub(crate) fn content_sha1(source: &dyn ContentSource) -> Result<String> {
    let bytes = source.content_bytes()?;
    let mut hasher = Sha1::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Create the entry dir and record the source path. On failure the
/// partially created directory is rolled back before the error propagates,
/// so a later `get` cannot misread a half-initialized entry as valid.
pub(crate) fn prepare_entry_dir(root: &Path, source_path: &Path) -> Result<PathBuf> {
    let dir = entry_dir(root, source_path);
    let result = (|| -> Result<()> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache entry dir: {:?}", dir))?;
        fs::write(
            dir.join(SOURCE_PATH_FILE),
            source_path.to_string_lossy().as_bytes(),
        )
        .with_context(|| format!("Failed to record source path in: {:?}", dir))?;
        Ok(())
    })();
    if let Err(e) = result {
        if let Err(cleanup) = delete_entry_dir(&dir) {
            error!("Rollback of cache entry dir failed: {}", cleanup);
        }
        return Err(e);
    }
    Ok(dir)
}
