use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use livepreview::test_utils::FakeSurface;
use livepreview::{
    BufferSource, CacheConfig, ContentSource, DisplaySurface, FileSource, HtmlRenderer, Previewer,
    PreviewerConfig, RendererDescriptor, RendererKind, RendererRegistry, SourceMatcher,
};

struct CountingMarkdown {
    calls: Arc<AtomicUsize>,
}

impl HtmlRenderer for CountingMarkdown {
    fn render_to_html(&self, source: &dyn ContentSource, out: &mut String) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        out.push_str("<html><head></head><body>");
        out.push_str(&source.content()?);
        out.push_str("</body></html>");
        Ok(())
    }
}

fn config_for(temp_dir: &TempDir) -> PreviewerConfig {
    PreviewerConfig {
        cache: CacheConfig {
            root: temp_dir.path().join("cache"),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn previewer(
    config: &PreviewerConfig,
    calls: &Arc<AtomicUsize>,
) -> (Previewer, Arc<FakeSurface>) {
    let mut registry = RendererRegistry::new().unwrap();
    registry.register(Ok(RendererDescriptor::new(
        "markdown",
        RendererKind::Embedded,
        SourceMatcher::builder().extensions(["md"]).build().unwrap(),
        Box::new(CountingMarkdown {
            calls: calls.clone(),
        }),
    )));
    let surface = Arc::new(FakeSurface::new());
    let previewer =
        Previewer::new(config, registry, surface.clone() as Arc<dyn DisplaySurface>).unwrap();
    (previewer, surface)
}

#[test]
fn test_cached_artifact_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_for(&temp_dir);
    let file = temp_dir.path().join("doc.md");
    fs::write(&file, "# hello").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let (previewer, _surface) = previewer(&config, &calls);
        let source = FileSource::new(&file).unwrap();
        assert!(previewer.render(&source, false).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // a fresh instance over the same cache root reuses the artifact as long
    // as the file has not been modified
    let (previewer, surface) = previewer(&config, &calls);
    let source = FileSource::new(&file).unwrap();
    assert!(previewer.render(&source, false).unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(surface.last_navigation().is_some());
}

#[test]
fn test_deleted_source_is_swept_on_restart() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_for(&temp_dir);
    let file = temp_dir.path().join("doc.md");
    fs::write(&file, "# hello").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let (previewer, _surface) = previewer(&config, &calls);
        let source = FileSource::new(&file).unwrap();
        assert!(previewer.render(&source, false).unwrap());
    }

    let files_root = temp_dir.path().join("cache").join("render_cache_files");
    assert_eq!(entry_dirs(&files_root).len(), 1);

    fs::remove_file(&file).unwrap();
    let (_previewer, _surface) = previewer(&config, &calls);
    assert!(
        entry_dirs(&files_root).is_empty(),
        "entries for deleted sources are removed at startup"
    );
}

#[test]
fn test_buffer_versions_are_retained_up_to_limit() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = config_for(&temp_dir);
    config.cache.keep_versions = 2;

    let calls = Arc::new(AtomicUsize::new(0));
    let (previewer, _surface) = previewer(&config, &calls);

    for draft in ["draft 1", "draft 2", "draft 3"] {
        let source = BufferSource::new("/virtual/doc.md", draft);
        assert!(previewer.render(&source, false).unwrap());
        // version pruning orders by artifact mtime
        std::thread::sleep(Duration::from_millis(20));
    }

    let editors_root = temp_dir.path().join("cache").join("render_cache_editors");
    let entries = entry_dirs(&editors_root);
    assert_eq!(entries.len(), 1);

    let versions: Vec<PathBuf> = fs::read_dir(&entries[0])
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("rendered_content_"))
        })
        .collect();
    assert_eq!(versions.len(), 2, "only the two newest versions remain");
}

#[test]
fn test_viewport_survives_restart_via_state_file() {
    let temp_dir = TempDir::new().unwrap();
    let state_file = temp_dir.path().join("view_states.json");
    let mut config = config_for(&temp_dir);
    config.view_state_file = Some(state_file.clone());

    let calls = Arc::new(AtomicUsize::new(0));
    {
        let (previewer, surface) = previewer(&config, &calls);
        let source = BufferSource::new("/virtual/doc.md", "# hello");
        assert!(previewer.render(&source, false).unwrap());
        surface.set_scroll_pos(0, 250);
        previewer.set_zoom(1.4);
        previewer.view_states().save_current(surface.as_ref());
        previewer.view_states().save(&state_file).unwrap();
    }

    let (previewer, surface) = previewer(&config, &calls);
    let source = BufferSource::new("/virtual/doc.md", "# hello");
    assert!(previewer.render(&source, false).unwrap());
    assert_eq!(surface.scroll_pos(), (0, 250));
    assert!((surface.zoom() - 1.4).abs() < f32::EPSILON);
}

#[test]
fn test_file_and_buffer_caches_are_partitioned() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_for(&temp_dir);
    let file = temp_dir.path().join("doc.md");
    fs::write(&file, "# hello").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let (previewer, _surface) = previewer(&config, &calls);

    let synced = FileSource::new(&file).unwrap();
    assert!(previewer.render(&synced, false).unwrap());
    let buffered = BufferSource::new(&file, "# edited but unsaved");
    assert!(previewer.render(&buffered, false).unwrap());

    let cache_root = temp_dir.path().join("cache");
    assert_eq!(entry_dirs(&cache_root.join("render_cache_files")).len(), 1);
    assert_eq!(entry_dirs(&cache_root.join("render_cache_editors")).len(), 1);
}

fn entry_dirs(root: &std::path::Path) -> Vec<PathBuf> {
    fs::read_dir(root)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default()
}
