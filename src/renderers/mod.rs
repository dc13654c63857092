//! Thin renderer adapters. Each exposes a `descriptor()` constructor so the
//! composition root can register them; the caching/dispatch core treats
//! them as opaque `HtmlRenderer` implementations.

pub mod external;
pub mod markdown;
pub mod svg;

pub use external::ExternalToolRenderer;
pub use markdown::MarkdownRenderer;
pub use svg::SvgRenderer;
