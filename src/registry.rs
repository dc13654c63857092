use anyhow::{Result, bail};
use globset::{Glob, GlobSet, GlobSetBuilder};
use log::error;
use std::collections::HashSet;

use crate::content_source::ContentSource;

/// Renderer that produces an HTML representation of a content source.
pub trait HtmlRenderer: Send + Sync {
    fn render_to_html(&self, source: &dyn ContentSource, out: &mut String) -> Result<()>;
}

/// How a renderer does its work. Resolved once at registration time and
/// carried on the descriptor; used for display labels and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    /// Shells out to an external tool.
    Native,
    /// Renders in-process.
    Embedded,
    /// Serves content (mostly) unmodified.
    Passthrough,
}

/// Predicates declaring what a renderer supports. A source matches if its
/// filename is declared, OR its extension is declared, OR any of its
/// content-type ids is declared, OR any glob pattern matches the absolute
/// path.
pub struct SourceMatcher {
    file_names: HashSet<String>,
    extensions: HashSet<String>,
    content_types: HashSet<String>,
    patterns: GlobSet,
}

impl SourceMatcher {
    pub fn builder() -> SourceMatcherBuilder {
        SourceMatcherBuilder::default()
    }

    pub fn matches(&self, source: &dyn ContentSource) -> bool {
        let path = source.path();

        if !self.file_names.is_empty() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if self.file_names.contains(name) {
                    return true;
                }
            }
        }

        if !self.extensions.is_empty() {
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if self.extensions.contains(&ext.to_lowercase()) {
                    return true;
                }
            }
        }

        if !self.content_types.is_empty()
            && source
                .content_types()
                .iter()
                .any(|id| self.content_types.contains(id))
        {
            return true;
        }

        self.patterns.is_match(path)
    }
}

#[derive(Default)]
pub struct SourceMatcherBuilder {
    file_names: Vec<String>,
    extensions: Vec<String>,
    content_types: Vec<String>,
    patterns: Vec<String>,
}

impl SourceMatcherBuilder {
    pub fn file_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions.extend(exts.into_iter().map(Into::into));
        self
    }

    pub fn content_types<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_types.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn patterns<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(globs.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<SourceMatcher> {
        let mut glob_builder = GlobSetBuilder::new();
        for pattern in &self.patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            glob_builder.add(Glob::new(pattern)?);
        }
        Ok(SourceMatcher {
            file_names: self
                .file_names
                .into_iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
            extensions: self
                .extensions
                .into_iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            content_types: self.content_types.into_iter().collect(),
            patterns: glob_builder.build()?,
        })
    }
}

/// Immutable binding of a renderer to the sources it claims to handle.
pub struct RendererDescriptor {
    name: String,
    kind: RendererKind,
    matcher: SourceMatcher,
    renderer: Box<dyn HtmlRenderer>,
}

impl RendererDescriptor {
    pub fn new(
        name: impl Into<String>,
        kind: RendererKind,
        matcher: SourceMatcher,
        renderer: Box<dyn HtmlRenderer>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            matcher,
            renderer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RendererKind {
        self.kind
    }

    pub fn matches(&self, source: &dyn ContentSource) -> bool {
        self.matcher.matches(source)
    }

    pub fn renderer(&self) -> &dyn HtmlRenderer {
        &*self.renderer
    }
}

/// Source is already HTML: serve its content as-is.
struct HtmlPassthrough;

impl HtmlRenderer for HtmlPassthrough {
    fn render_to_html(&self, source: &dyn ContentSource, out: &mut String) -> Result<()> {
        out.push_str(&source.content()?);
        Ok(())
    }
}

/// Recognized-but-untransformable marker: XML can be shown raw by the
/// display surface, so this exists only as a markable capability for the
/// pipeline's fallback routing and must never actually render.
struct XmlStub;

impl HtmlRenderer for XmlStub {
    fn render_to_html(&self, _source: &dyn ContentSource, _out: &mut String) -> Result<()> {
        bail!("XML passthrough has no HTML transform")
    }
}

/// Ordered renderer registry. Registration order is the dispatch tie-break:
/// `resolve` returns the first matching descriptor regardless of which
/// predicate kind matched. The two passthrough fallbacks are held outside
/// the ordered list and consulted only by the pipeline's fallback routing.
pub struct RendererRegistry {
    renderers: Vec<RendererDescriptor>,
    passthrough_html: RendererDescriptor,
    passthrough_xml: RendererDescriptor,
}

impl RendererRegistry {
    pub fn new() -> Result<Self> {
        let passthrough_html = RendererDescriptor::new(
            "html-passthrough",
            RendererKind::Passthrough,
            SourceMatcher::builder()
                .extensions(["html", "htm", "xhtml"])
                .content_types(["text/html"])
                .build()?,
            Box::new(HtmlPassthrough),
        );
        let passthrough_xml = RendererDescriptor::new(
            "xml-passthrough",
            RendererKind::Passthrough,
            SourceMatcher::builder()
                .extensions(["xml", "xsd", "xsl"])
                .content_types(["text/xml", "application/xml"])
                .build()?,
            Box::new(XmlStub),
        );
        Ok(Self {
            renderers: Vec::new(),
            passthrough_html,
            passthrough_xml,
        })
    }

    /// Register a descriptor. A failed descriptor construction is logged
    /// and excluded so one broken renderer cannot disable all others.
    pub fn register(&mut self, descriptor: Result<RendererDescriptor>) {
        match descriptor {
            Ok(descriptor) => self.renderers.push(descriptor),
            Err(e) => error!("Skipping renderer that failed to initialize: {:#}", e),
        }
    }

    /// First descriptor (in registration order) matching the source.
    pub fn resolve(&self, source: &dyn ContentSource) -> Option<&RendererDescriptor> {
        self.renderers.iter().find(|d| d.matches(source))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RendererDescriptor> {
        self.renderers.iter()
    }

    pub fn passthrough_html(&self) -> &RendererDescriptor {
        &self.passthrough_html
    }

    pub fn passthrough_xml(&self) -> &RendererDescriptor {
        &self.passthrough_xml
    }

    /// Whether the pipeline can handle the source at all: a registered
    /// renderer matches, or the source is already HTML.
    pub fn supports(&self, source: &dyn ContentSource) -> bool {
        self.passthrough_html.matches(source) || self.resolve(source).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_source::BufferSource;

    struct TagRenderer(&'static str);

    impl HtmlRenderer for TagRenderer {
        fn render_to_html(&self, _source: &dyn ContentSource, out: &mut String) -> Result<()> {
            out.push_str(self.0);
            Ok(())
        }
    }

    fn descriptor(name: &'static str, matcher: SourceMatcher) -> RendererDescriptor {
        RendererDescriptor::new(name, RendererKind::Embedded, matcher, Box::new(TagRenderer(name)))
    }

    #[test]
    fn test_matcher_by_extension_is_case_insensitive() {
        let matcher = SourceMatcher::builder()
            .extensions([".MD", "markdown"])
            .build()
            .unwrap();
        assert!(matcher.matches(&BufferSource::new("/d/a.md", "")));
        assert!(matcher.matches(&BufferSource::new("/d/a.MD", "")));
        assert!(matcher.matches(&BufferSource::new("/d/a.markdown", "")));
        assert!(!matcher.matches(&BufferSource::new("/d/a.txt", "")));
    }

    #[test]
    fn test_matcher_by_file_name_and_pattern() {
        let matcher = SourceMatcher::builder()
            .file_names(["Dockerfile"])
            .patterns(["**/diagrams/*.txt"])
            .build()
            .unwrap();
        assert!(matcher.matches(&BufferSource::new("/proj/Dockerfile", "")));
        assert!(matcher.matches(&BufferSource::new("/proj/diagrams/flow.txt", "")));
        assert!(!matcher.matches(&BufferSource::new("/proj/notes/flow.txt", "")));
    }

    #[test]
    fn test_matcher_by_content_type() {
        let matcher = SourceMatcher::builder()
            .content_types(["text/markdown"])
            .build()
            .unwrap();
        let tagged = BufferSource::new("/d/no-extension", "")
            .with_content_types(["text/markdown".to_string()]);
        assert!(matcher.matches(&tagged));
        assert!(!matcher.matches(&BufferSource::new("/d/no-extension", "")));
    }

    #[test]
    fn test_resolve_is_first_registered_wins() {
        let mut registry = RendererRegistry::new().unwrap();
        registry.register(Ok(descriptor(
            "by-extension",
            SourceMatcher::builder().extensions(["md"]).build().unwrap(),
        )));
        registry.register(Ok(descriptor(
            "by-content-type",
            SourceMatcher::builder()
                .content_types(["text/markdown"])
                .build()
                .unwrap(),
        )));

        // both match; registration order wins regardless of match kind
        let source = BufferSource::new("/d/a.md", "")
            .with_content_types(["text/markdown".to_string()]);
        assert_eq!(registry.resolve(&source).unwrap().name(), "by-extension");

        let mut registry = RendererRegistry::new().unwrap();
        registry.register(Ok(descriptor(
            "by-content-type",
            SourceMatcher::builder()
                .content_types(["text/markdown"])
                .build()
                .unwrap(),
        )));
        registry.register(Ok(descriptor(
            "by-extension",
            SourceMatcher::builder().extensions(["md"]).build().unwrap(),
        )));
        assert_eq!(registry.resolve(&source).unwrap().name(), "by-content-type");
    }

    #[test]
    fn test_failed_descriptor_construction_is_skipped() {
        let mut registry = RendererRegistry::new().unwrap();
        registry.register(Err(anyhow::anyhow!("native tool not found")));
        registry.register(Ok(descriptor(
            "markdown",
            SourceMatcher::builder().extensions(["md"]).build().unwrap(),
        )));

        let source = BufferSource::new("/d/a.md", "");
        assert_eq!(registry.resolve(&source).unwrap().name(), "markdown");
        assert_eq!(registry.iter().count(), 1);
    }

    #[test]
    fn test_supports_includes_html_passthrough() {
        let registry = RendererRegistry::new().unwrap();
        assert!(registry.supports(&BufferSource::new("/d/page.html", "")));
        // XML alone is not enough: supports() is registry OR html-passthrough
        assert!(!registry.supports(&BufferSource::new("/d/data.xml", "")));
        assert!(!registry.supports(&BufferSource::new("/d/a.md", "")));
    }

    #[test]
    fn test_xml_stub_always_fails_when_invoked() {
        let registry = RendererRegistry::new().unwrap();
        let source = BufferSource::new("/d/data.xml", "<a/>");
        assert!(registry.passthrough_xml().matches(&source));
        let mut out = String::new();
        assert!(
            registry
                .passthrough_xml()
                .renderer()
                .render_to_html(&source, &mut out)
                .is_err()
        );
    }
}
