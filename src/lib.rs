// Render-caching preview core: resolves a content source (file on disk or
// unsaved editor buffer) to a renderer, caches the rendered HTML on disk and
// restores per-document viewport state across re-renders.
pub mod cache;
pub mod config;
pub mod content_source;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod renderers;
pub mod view_state;

pub mod test_utils;

pub use config::{CacheConfig, ExternalToolConfig, PreviewerConfig};
pub use content_source::{BufferSource, ContentSource, FileSource};
pub use display::DisplaySurface;
pub use error::RenderError;
pub use pipeline::Previewer;
pub use registry::{HtmlRenderer, RendererDescriptor, RendererKind, RendererRegistry, SourceMatcher};
pub use view_state::{ViewState, ViewStateTracker};
