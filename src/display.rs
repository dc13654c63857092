use anyhow::Result;
use std::path::Path;

/// The display surface the preview is shown on (a browser widget in a real
/// editor). Supplied by the embedding application; the pipeline only needs
/// navigation plus scroll/zoom access so viewport state can be carried
/// across re-renders.
pub trait DisplaySurface: Send + Sync {
    /// Navigate to a local artifact or source file. Returns once the
    /// surface has finished loading the target.
    fn navigate_to(&self, target: &Path) -> Result<()>;

    /// Replace the displayed content with inline HTML (used for diagnostic
    /// pages, not for rendered artifacts).
    fn set_content(&self, html: &str);

    fn scroll_pos(&self) -> (i32, i32);

    fn set_scroll_pos(&self, x: i32, y: i32);

    fn zoom(&self) -> f32;

    fn set_zoom(&self, level: f32);
}
