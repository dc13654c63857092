use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use simplelog::{LevelFilter, WriteLogger};

use livepreview::renderers::{ExternalToolRenderer, MarkdownRenderer, SvgRenderer};
use livepreview::{
    DisplaySurface, FileSource, Previewer, PreviewerConfig, RendererRegistry, SourceMatcher,
};

/// Render cached HTML previews of files and print the artifact paths.
#[derive(Parser, Debug)]
#[command(name = "livepreview", version, about)]
struct Args {
    /// Files to preview
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Re-render even if a cached artifact is still valid
    #[arg(short, long)]
    force: bool,

    /// Cache directory (defaults to the system temp directory)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rendered versions to retain per document (overrides config)
    #[arg(long)]
    keep_versions: Option<usize>,

    /// Log verbosity (-v, -vv)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Headless surface for the CLI: "navigation" prints the artifact path,
/// diagnostics land in a file next to the cache.
struct StdoutSurface {
    diagnostics_path: PathBuf,
    scroll: Mutex<(i32, i32)>,
    zoom: Mutex<f32>,
}

impl StdoutSurface {
    fn new(diagnostics_path: PathBuf) -> Self {
        Self {
            diagnostics_path,
            scroll: Mutex::new((0, 0)),
            zoom: Mutex::new(1.0),
        }
    }
}

impl DisplaySurface for StdoutSurface {
    fn navigate_to(&self, artifact: &Path) -> Result<()> {
        println!("{}", artifact.display());
        Ok(())
    }

    fn set_content(&self, html: &str) {
        if let Err(e) = std::fs::write(&self.diagnostics_path, html) {
            error!("Failed to write diagnostics page: {}", e);
            return;
        }
        println!("{}", self.diagnostics_path.display());
    }

    fn scroll_pos(&self) -> (i32, i32) {
        *self.scroll.lock().unwrap()
    }

    fn set_scroll_pos(&self, x: i32, y: i32) {
        *self.scroll.lock().unwrap() = (x, y);
    }

    fn zoom(&self) -> f32 {
        *self.zoom.lock().unwrap()
    }

    fn set_zoom(&self, level: f32) {
        *self.zoom.lock().unwrap() = level;
    }
}

fn build_registry(config: &PreviewerConfig) -> Result<RendererRegistry> {
    let mut registry = RendererRegistry::new()?;
    for tool in &config.tools {
        let matcher = SourceMatcher::builder()
            .extensions(tool.extensions.clone())
            .patterns(tool.patterns.clone())
            .content_types(tool.content_types.clone())
            .build()?;
        let mut renderer = ExternalToolRenderer::new(tool.program.clone(), tool.args.clone());
        if let Some(secs) = tool.timeout_secs {
            renderer = renderer.with_timeout(Duration::from_secs(secs));
        }
        registry.register(renderer.into_descriptor(tool.name.clone(), matcher));
    }
    registry.register(MarkdownRenderer::descriptor());
    registry.register(SvgRenderer::descriptor());
    Ok(registry)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    WriteLogger::init(
        level,
        simplelog::Config::default(),
        File::create("livepreview.log")?,
    )?;

    info!("Starting livepreview");

    let mut config = PreviewerConfig::load(args.config.as_deref());
    if let Some(cache_dir) = args.cache_dir {
        config.cache.root = cache_dir;
    }
    if let Some(keep_versions) = args.keep_versions {
        config.cache.keep_versions = keep_versions;
    }

    let registry = build_registry(&config)?;
    let surface = Arc::new(StdoutSurface::new(config.cache.root.join("diagnostics.html")));
    let previewer = Previewer::new(&config, registry, surface)?;

    let mut unsupported = Vec::new();
    for file in &args.files {
        let source =
            FileSource::new(file).with_context(|| format!("Cannot read {:?}", file))?;
        if !previewer.render_with_diagnostics(&source, args.force) {
            error!("No renderer available for {:?}", file);
            unsupported.push(file.clone());
        }
    }

    if let Some(path) = &config.view_state_file {
        if let Err(e) = previewer.view_states().save(path) {
            error!("Failed to save view states to {:?}: {}", path, e);
        }
    }

    if !unsupported.is_empty() {
        anyhow::bail!("no renderer available for {:?}", unsupported);
    }
    info!("Shutting down livepreview");
    Ok(())
}
