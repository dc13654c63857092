//! Shared test doubles for pipeline and view-state tests.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::display::DisplaySurface;

#[derive(Default)]
struct FakeSurfaceState {
    navigations: Vec<PathBuf>,
    content: Option<String>,
    scroll: (i32, i32),
    zoom: f32,
    applied_scrolls: Vec<(i32, i32)>,
    applied_zooms: Vec<f32>,
}

/// In-memory display surface recording navigations, inline content and
/// every scroll/zoom application.
pub struct FakeSurface {
    state: Mutex<FakeSurfaceState>,
}

impl FakeSurface {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeSurfaceState {
                zoom: 1.0,
                ..Default::default()
            }),
        }
    }

    pub fn navigations(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().navigations.clone()
    }

    pub fn last_navigation(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().navigations.last().cloned()
    }

    pub fn content(&self) -> Option<String> {
        self.state.lock().unwrap().content.clone()
    }

    pub fn applied_scrolls(&self) -> Vec<(i32, i32)> {
        self.state.lock().unwrap().applied_scrolls.clone()
    }

    pub fn applied_zooms(&self) -> Vec<f32> {
        self.state.lock().unwrap().applied_zooms.clone()
    }

    /// Simulate a fresh page load: scroll back to origin, zoom to default.
    pub fn reset_viewport(&self) {
        let mut state = self.state.lock().unwrap();
        state.scroll = (0, 0);
        state.zoom = 1.0;
    }
}

impl Default for FakeSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySurface for FakeSurface {
    fn navigate_to(&self, target: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.navigations.push(target.to_path_buf());
        // loading a new page resets the viewport
        state.scroll = (0, 0);
        state.zoom = 1.0;
        Ok(())
    }

    fn set_content(&self, html: &str) {
        self.state.lock().unwrap().content = Some(html.to_string());
    }

    fn scroll_pos(&self) -> (i32, i32) {
        self.state.lock().unwrap().scroll
    }

    fn set_scroll_pos(&self, x: i32, y: i32) {
        let mut state = self.state.lock().unwrap();
        state.scroll = (x, y);
        state.applied_scrolls.push((x, y));
    }

    fn zoom(&self) -> f32 {
        self.state.lock().unwrap().zoom
    }

    fn set_zoom(&self, level: f32) {
        let mut state = self.state.lock().unwrap();
        state.zoom = level;
        state.applied_zooms.push(level);
    }
}
