use std::time::Duration;
use thiserror::Error;

/// Render failures the pipeline has to tell apart from plain I/O errors.
///
/// "No renderer available" is deliberately not a variant: the pipeline
/// reports it as `Ok(false)` because it is a recoverable, user-visible
/// condition rather than an error.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The first matching renderer failed. No further renderer is tried;
    /// first match is authoritative even on failure.
    #[error("renderer '{renderer}' failed: {cause}")]
    RendererFailed {
        renderer: String,
        cause: anyhow::Error,
    },

    /// An external rendering tool did not exit within the wait bound and
    /// was forcibly terminated.
    #[error("'{program}' did not finish within {timeout:?} and was terminated")]
    Timeout { program: String, timeout: Duration },
}

impl RenderError {
    /// Renderer identity for diagnostic pages, if the failure carries one.
    pub fn renderer_name(&self) -> Option<&str> {
        match self {
            RenderError::RendererFailed { renderer, .. } => Some(renderer),
            RenderError::Timeout { program, .. } => Some(program),
        }
    }
}
