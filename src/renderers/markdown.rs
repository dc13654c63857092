use anyhow::Result;
use pulldown_cmark::{Options, Parser, html};

use crate::content_source::ContentSource;
use crate::registry::{HtmlRenderer, RendererDescriptor, RendererKind, SourceMatcher};

/// CommonMark to HTML, rendered in-process.
pub struct MarkdownRenderer {
    options: Options,
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_TASKLISTS);
        Self { options }
    }

    pub fn descriptor() -> Result<RendererDescriptor> {
        Ok(RendererDescriptor::new(
            "markdown",
            RendererKind::Embedded,
            SourceMatcher::builder()
                .extensions(["md", "markdown", "mdown"])
                .content_types(["text/markdown"])
                .build()?,
            Box::new(Self::new()),
        ))
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlRenderer for MarkdownRenderer {
    fn render_to_html(&self, source: &dyn ContentSource, out: &mut String) -> Result<()> {
        let text = source.content()?;
        out.push_str(
            "<!DOCTYPE html>\n<html>\n<head>\n\
             <meta http-equiv=\"Content-Type\" content=\"text/html; charset=UTF-8\">\n\
             </head>\n<body class='markdown-body'>\n",
        );
        let parser = Parser::new_ext(&text, self.options);
        html::push_html(out, parser);
        out.push_str("</body></html>");
        Ok(())
    }
}
