use anyhow::Result;
use chrono::{DateTime, Utc};
use log::error;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;

use crate::display::DisplaySurface;

pub const DEFAULT_CAPACITY: usize = 500;

const DEFAULT_ZOOM: f32 = 1.0;

/// Per-document viewport state. Keyed by document identity (the absolute
/// path string), never by cache-artifact path: hash-based caches produce a
/// different artifact path per content version, but two renders of the same
/// logical document must resume the same scroll and zoom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub scroll_x: i32,
    pub scroll_y: i32,
    pub zoom: f32,
    pub last_seen: DateTime<Utc>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            scroll_x: 0,
            scroll_y: 0,
            zoom: DEFAULT_ZOOM,
            last_seen: Utc::now(),
        }
    }
}

struct Inner {
    states: LruCache<String, ViewState>,
    /// Key of the document currently shown on the surface.
    current: Option<String>,
}

/// Bounded, least-recently-used map from document identity to viewport
/// state. Synchronized: navigation and direct zoom changes mutate it from
/// different call sites.
pub struct ViewStateTracker {
    inner: Mutex<Inner>,
}

impl ViewStateTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY).unwrap());
        Self {
            inner: Mutex::new(Inner {
                states: LruCache::new(capacity),
                current: None,
            }),
        }
    }

    /// Persist the live scroll position of the currently displayed document
    /// into the map. Call before navigating away.
    pub fn save_current(&self, surface: &dyn DisplaySurface) {
        let mut inner = self.inner.lock().unwrap();
        let Some(current) = inner.current.clone() else {
            return;
        };
        let (x, y) = surface.scroll_pos();
        let state = inner.states.get_or_insert_mut(current, ViewState::default);
        state.scroll_x = x;
        state.scroll_y = y;
        state.last_seen = Utc::now();
    }

    /// Make `key` the displayed document and reapply its stored viewport
    /// state. Call after the surface finished loading the new artifact.
    /// State is created lazily on first navigation to a key.
    pub fn restore(&self, surface: &dyn DisplaySurface, key: &str) {
        let state = {
            let mut inner = self.inner.lock().unwrap();
            inner.current = Some(key.to_string());
            let state = inner
                .states
                .get_or_insert_mut(key.to_string(), ViewState::default);
            state.last_seen = Utc::now();
            *state
        };
        if (state.zoom - DEFAULT_ZOOM).abs() > f32::EPSILON {
            surface.set_zoom(state.zoom);
        }
        if (state.scroll_x, state.scroll_y) != (0, 0) {
            surface.set_scroll_pos(state.scroll_x, state.scroll_y);
        }
    }

    /// Change the zoom of the currently displayed document and apply it to
    /// the surface immediately.
    pub fn set_zoom(&self, surface: &dyn DisplaySurface, level: f32) {
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(current) = inner.current.clone() else {
                return;
            };
            let state = inner.states.get_or_insert_mut(current, ViewState::default);
            state.zoom = level;
            state.last_seen = Utc::now();
        }
        surface.set_zoom(level);
    }

    pub fn current_key(&self) -> Option<String> {
        self.inner.lock().unwrap().current.clone()
    }

    pub fn get(&self, key: &str) -> Option<ViewState> {
        self.inner.lock().unwrap().states.peek(key).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load previously saved states from a JSON file. A missing or corrupt
    /// file logs and starts empty rather than failing startup.
    pub fn load_or_empty(path: Option<&Path>, capacity: usize) -> Self {
        let tracker = Self::new(capacity);
        let Some(path) = path else {
            return tracker;
        };
        if !path.exists() {
            return tracker;
        }
        match Self::load_states(path) {
            Ok(states) => {
                let mut inner = tracker.inner.lock().unwrap();
                // oldest first, so the most recently seen documents end up
                // hottest in the LRU
                let mut entries: Vec<(String, ViewState)> = states.into_iter().collect();
                entries.sort_by_key(|(_, s)| s.last_seen);
                for (key, state) in entries {
                    inner.states.put(key, state);
                }
            }
            Err(e) => error!("Failed to load view states from {:?}: {}", path, e),
        }
        tracker
    }

    fn load_states(path: &Path) -> Result<HashMap<String, ViewState>> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let states: HashMap<&String, &ViewState> = inner.states.iter().collect();
        let content = serde_json::to_string_pretty(&states)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeSurface;
    use tempfile::TempDir;

    #[test]
    fn test_view_state_round_trip() {
        let surface = FakeSurface::new();
        let tracker = ViewStateTracker::new(10);

        // show X, scroll and zoom
        tracker.restore(&surface, "/docs/x.md");
        surface.set_scroll_pos(0, 500);
        tracker.set_zoom(&surface, 1.5);

        // navigate away to Y
        tracker.save_current(&surface);
        surface.reset_viewport();
        tracker.restore(&surface, "/docs/y.md");
        assert_eq!(surface.scroll_pos(), (0, 0));
        assert_eq!(surface.zoom(), 1.0);

        // back to X: scroll and zoom reapplied without caller resupplying
        tracker.save_current(&surface);
        surface.reset_viewport();
        tracker.restore(&surface, "/docs/x.md");
        assert_eq!(surface.scroll_pos(), (0, 500));
        assert_eq!(surface.zoom(), 1.5);
    }

    #[test]
    fn test_default_state_is_not_reapplied() {
        let surface = FakeSurface::new();
        let tracker = ViewStateTracker::new(10);

        tracker.restore(&surface, "/docs/x.md");
        assert!(surface.applied_zooms().is_empty());
        assert!(surface.applied_scrolls().is_empty());
    }

    #[test]
    fn test_set_zoom_without_current_key_is_a_no_op() {
        let surface = FakeSurface::new();
        let tracker = ViewStateTracker::new(10);
        tracker.set_zoom(&surface, 2.0);
        assert!(surface.applied_zooms().is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let surface = FakeSurface::new();
        let tracker = ViewStateTracker::new(2);

        tracker.restore(&surface, "/a");
        tracker.restore(&surface, "/b");
        tracker.restore(&surface, "/c");

        assert_eq!(tracker.len(), 2);
        assert!(tracker.get("/a").is_none(), "least recently used evicted");
        assert!(tracker.get("/b").is_some());
        assert!(tracker.get("/c").is_some());
    }

    #[test]
    fn test_persistence_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("view_states.json");

        let surface = FakeSurface::new();
        let tracker = ViewStateTracker::new(10);
        tracker.restore(&surface, "/docs/x.md");
        surface.set_scroll_pos(3, 42);
        tracker.set_zoom(&surface, 0.8);
        tracker.save_current(&surface);
        tracker.save(&file).unwrap();

        let restored = ViewStateTracker::load_or_empty(Some(&file), 10);
        let state = restored.get("/docs/x.md").unwrap();
        assert_eq!((state.scroll_x, state.scroll_y), (3, 42));
        assert!((state.zoom - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_corrupt_persistence_file_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("view_states.json");
        fs::write(&file, "{ not json").unwrap();

        let tracker = ViewStateTracker::load_or_empty(Some(&file), 10);
        assert!(tracker.is_empty());
    }
}
