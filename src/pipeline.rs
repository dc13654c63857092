use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, error, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::cache::{ByHashCache, ByHashVersionedCache, ByMtimeCache, RenderCache};
use crate::config::PreviewerConfig;
use crate::content_source::ContentSource;
use crate::display::DisplaySurface;
use crate::error::RenderError;
use crate::registry::RendererRegistry;
use crate::view_state::ViewStateTracker;

/// Script that keeps in-page `#anchor` links working while a `<base href>`
/// tag is present (without it the anchor would resolve against the base).
const ANCHOR_FIX_SCRIPT: &str = "<script>\n\
    document.addEventListener(\"click\", function(event) {\n\
      var elem = event.target;\n\
      if (elem.tagName.toLowerCase() == \"a\" && elem.getAttribute(\"href\").indexOf(\"#\") === 0) {\n\
        elem.href = location.href + elem.getAttribute(\"href\");\n\
      }\n\
    });\n\
    </script>\n";

/// Orchestrates cache, dispatcher and view-state into
/// `render(source, force_refresh)`.
///
/// Two cache instances are kept live, partitioned by the source's synced
/// flag and never mixed: file-synced sources get mtime validation (cheap
/// stat), buffer-backed sources get content-hash validation (the only
/// trustworthy signal for unsaved edits).
pub struct Previewer {
    registry: RendererRegistry,
    file_cache: ByMtimeCache,
    buffer_cache: Box<dyn RenderCache>,
    surface: Arc<dyn DisplaySurface>,
    view_states: ViewStateTracker,
    /// Per-document-identity generation counter. Overlapping render
    /// requests may finish out of order; a completion presenting against a
    /// superseded generation is discarded instead of clobbering the view.
    generations: Mutex<HashMap<String, u64>>,
}

impl Previewer {
    pub fn new(
        config: &PreviewerConfig,
        registry: RendererRegistry,
        surface: Arc<dyn DisplaySurface>,
    ) -> Result<Self> {
        let file_cache = ByMtimeCache::new(config.cache.root.join("render_cache_files"))?;
        let editors_root = config.cache.root.join("render_cache_editors");
        let buffer_cache: Box<dyn RenderCache> = if config.cache.keep_versions > 0 {
            Box::new(ByHashVersionedCache::new(editors_root, config.cache.keep_versions)?)
        } else {
            Box::new(ByHashCache::new(editors_root)?)
        };
        let view_states =
            ViewStateTracker::load_or_empty(config.view_state_file.as_deref(), config.view_state_capacity);
        Ok(Self {
            registry,
            file_cache,
            buffer_cache,
            surface,
            view_states,
            generations: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &RendererRegistry {
        &self.registry
    }

    pub fn view_states(&self) -> &ViewStateTracker {
        &self.view_states
    }

    /// Whether any renderer (or the HTML passthrough) can handle the
    /// source. Callers use this to decide if a preview makes sense before
    /// attempting a render.
    pub fn supports(&self, source: &dyn ContentSource) -> bool {
        self.registry.supports(source)
    }

    /// Render and display the source. Returns `Ok(true)` if something was
    /// displayed, `Ok(false)` if no renderer is available (a recoverable,
    /// user-visible condition, not an error).
    pub fn render(&self, source: &dyn ContentSource, force_refresh: bool) -> Result<bool> {
        match self.compute(source, force_refresh)? {
            Some(artifact) => {
                self.present(source, &artifact)?;
                Ok(true)
            }
            None => {
                info!("No renderer available for {:?}", source.path());
                Ok(false)
            }
        }
    }

    /// Like `render`, but recovers renderer failures into a diagnostic page
    /// on the display surface instead of propagating them. Only genuinely
    /// exceptional conditions (disk full, permission denied while touching
    /// the cache) still propagate.
    pub fn render_with_diagnostics(&self, source: &dyn ContentSource, force_refresh: bool) -> bool {
        match self.render(source, force_refresh) {
            Ok(displayed) => displayed,
            Err(err) => {
                error!("Render of {:?} failed: {:#}", source.path(), err);
                self.show_diagnostic(source, &err);
                true
            }
        }
    }

    /// Dispatch a render onto a worker thread so the caller (typically a
    /// UI thread) never blocks on disk I/O or external tools. The snapshot
    /// is rendered in the background; a completion that has been superseded
    /// by a newer request for the same document is dropped.
    pub fn render_async(
        self: &Arc<Self>,
        source: Box<dyn ContentSource>,
        force_refresh: bool,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let generation = this.next_generation(source.path());
        std::thread::spawn(move || {
            let result = this.compute(source.as_ref(), force_refresh);
            if !this.is_current_generation(source.path(), generation) {
                debug!("Discarding stale render of {:?}", source.path());
                return;
            }
            match result {
                Ok(Some(artifact)) => {
                    if let Err(err) = this.present(source.as_ref(), &artifact) {
                        error!("Failed to present {:?}: {:#}", artifact, err);
                    }
                }
                Ok(None) => info!("No renderer available for {:?}", source.path()),
                Err(err) => {
                    error!("Render of {:?} failed: {:#}", source.path(), err);
                    this.show_diagnostic(source.as_ref(), &err);
                }
            }
        })
    }

    /// Change the zoom of the currently displayed document.
    pub fn set_zoom(&self, level: f32) {
        self.view_states.set_zoom(self.surface.as_ref(), level);
    }

    /// Resolve the source to a displayable artifact path, rendering and
    /// caching as needed. `None` means no renderer is available.
    fn compute(&self, source: &dyn ContentSource, force_refresh: bool) -> Result<Option<PathBuf>> {
        let cache: &dyn RenderCache = if source.is_synced() {
            &self.file_cache
        } else {
            self.buffer_cache.as_ref()
        };

        let registry = &self.registry;
        let mut render_fn = |src: &dyn ContentSource| -> Result<Option<String>> {
            for descriptor in registry.iter() {
                if descriptor.matches(src) {
                    let mut html = String::new();
                    // first match is authoritative: a failure here stops
                    // dispatch instead of falling through to the next match
                    if let Err(cause) = descriptor.renderer().render_to_html(src, &mut html) {
                        return Err(RenderError::RendererFailed {
                            renderer: descriptor.name().to_string(),
                            cause,
                        }
                        .into());
                    }
                    postprocess_html(src.path(), &mut html);
                    return Ok(Some(html));
                }
            }
            Ok(None)
        };

        let artifact = if force_refresh {
            cache.replace(source, &mut render_fn, "html")?
        } else {
            cache.compute_if_absent(source, &mut render_fn, "html")?
        };
        if let Some(artifact) = artifact {
            return Ok(Some(artifact));
        }

        // passthrough fallbacks
        if source.is_synced() {
            // already in final form on disk, no caching needed
            if registry.passthrough_html().matches(source)
                || registry.passthrough_xml().matches(source)
            {
                return Ok(Some(source.path().to_path_buf()));
            }
        } else {
            // buffer-backed passthrough content still needs a stable
            // artifact path the display surface can load
            if registry.passthrough_html().matches(source) {
                let mut pass = |src: &dyn ContentSource| -> Result<Option<String>> {
                    let mut html = src.content()?;
                    postprocess_html(src.path(), &mut html);
                    Ok(Some(html))
                };
                let artifact = cache
                    .compute_if_absent(source, &mut pass, "html")?
                    .context("HTML passthrough produced no artifact")?;
                return Ok(Some(artifact));
            }
            if registry.passthrough_xml().matches(source) {
                let mut pass =
                    |src: &dyn ContentSource| -> Result<Option<String>> { Ok(Some(src.content()?)) };
                let artifact = cache
                    .compute_if_absent(source, &mut pass, "xml")?
                    .context("XML passthrough produced no artifact")?;
                return Ok(Some(artifact));
            }
        }
        Ok(None)
    }

    /// Navigate the surface to the artifact and carry viewport state over.
    /// View state is keyed by document identity, not artifact path: the
    /// hash caches hand out a different artifact per content version.
    fn present(&self, source: &dyn ContentSource, artifact: &Path) -> Result<()> {
        let key = source.path().to_string_lossy().to_string();
        let surface = self.surface.as_ref();
        self.view_states.save_current(surface);
        surface
            .navigate_to(artifact)
            .with_context(|| format!("Failed to navigate to {:?}", artifact))?;
        self.view_states.restore(surface, &key);
        Ok(())
    }

    fn show_diagnostic(&self, source: &dyn ContentSource, err: &anyhow::Error) {
        let renderer = err
            .downcast_ref::<RenderError>()
            .and_then(|e| e.renderer_name())
            .unwrap_or("unknown");
        let html = format!(
            "<!DOCTYPE html>\n<html><body>\
             Failed to render: <b>{}</b><br>\n\
             Renderer: <b>{}</b><br>\n\
             Time: <b>{}</b><br>\n\
             Reason:<pre>{:?}</pre>\n\
             </body></html>",
            source.path().display(),
            renderer,
            Local::now().format("%H:%M:%S"),
            err
        );
        self.surface.set_content(&html);
    }

    fn next_generation(&self, path: &Path) -> u64 {
        let mut generations = self.generations.lock().unwrap();
        let counter = generations
            .entry(path.to_string_lossy().to_string())
            .or_insert(0);
        *counter += 1;
        *counter
    }

    fn is_current_generation(&self, path: &Path, generation: u64) -> bool {
        let generations = self.generations.lock().unwrap();
        generations.get(path.to_string_lossy().as_ref()) == Some(&generation)
    }
}

/// Post-processing applied to every successfully rendered HTML buffer
/// before caching: a provenance comment (source URI + render time), a
/// `<base>` tag pointing at the source's parent directory so relatively
/// referenced resources resolve, and a script keeping `#` anchors working
/// alongside that base tag.
fn postprocess_html(source_path: &Path, html: &mut String) {
    html.push_str(&format!(
        "<!-- {} @ {} -->",
        path_to_file_uri(source_path),
        Local::now().format("%H:%M:%S%.3f")
    ));

    let head_end = html.find("</head>").unwrap_or(0);
    let parent_uri = source_path
        .parent()
        .map(path_to_file_uri)
        .unwrap_or_default();
    html.insert_str(head_end, &format!("<base href='{}/'>", parent_uri));
    html.insert_str(head_end, ANCHOR_FIX_SCRIPT);
}

fn path_to_file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}
