use anyhow::Result;
use chrono::Local;

use crate::content_source::ContentSource;
use crate::registry::{HtmlRenderer, RendererDescriptor, RendererKind, SourceMatcher};

/// Embeds an SVG file into an HTML page with a small info box naming the
/// source and render time.
pub struct SvgRenderer;

impl SvgRenderer {
    pub fn descriptor() -> Result<RendererDescriptor> {
        Ok(RendererDescriptor::new(
            "svg",
            RendererKind::Embedded,
            SourceMatcher::builder()
                .extensions(["svg"])
                .content_types(["image/svg+xml"])
                .build()?,
            Box::new(SvgRenderer),
        ))
    }
}

impl HtmlRenderer for SvgRenderer {
    fn render_to_html(&self, source: &dyn ContentSource, out: &mut String) -> Result<()> {
        let svg = source.content()?;
        let short_path = source
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        out.push_str(
            "<!DOCTYPE html>\n<html>\n<head>\n\
             <meta http-equiv=\"Content-Type\" content=\"text/html; charset=UTF-8\">\n\
             </head>\n<body style='padding:5px'>\n",
        );
        out.push_str(&svg);
        out.push_str(&format!(
            "\n<div style='color:gray;font-size:smaller'>{} {}</div>\n",
            short_path,
            Local::now().format("%H:%M:%S")
        ));
        out.push_str("</body></html>");
        Ok(())
    }
}
