use anyhow::{Context, Result, anyhow, bail};
use log::{debug, warn};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::content_source::ContentSource;
use crate::error::RenderError;
use crate::registry::{HtmlRenderer, RendererDescriptor, RendererKind, SourceMatcher};

/// How long an external tool may run before it is forcibly terminated.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Renderer that pipes the source content into an external tool's stdin and
/// wraps its stdout (expected to be SVG or HTML markup) into an HTML page.
/// Typical use: `dot -Tsvg`, `plantuml -pipe -tsvg`.
pub struct ExternalToolRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalToolRenderer {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Descriptor for an external tool. Fails if the program cannot be
    /// found, so the registry can log and exclude it instead of failing at
    /// render time.
    pub fn descriptor(
        name: impl Into<String>,
        program: impl Into<String>,
        args: impl IntoIterator<Item = String>,
        matcher: SourceMatcher,
    ) -> Result<RendererDescriptor> {
        Self::new(program, args).into_descriptor(name, matcher)
    }

    /// Like `descriptor`, but for an already configured renderer (e.g. with
    /// a non-default timeout).
    pub fn into_descriptor(
        self,
        name: impl Into<String>,
        matcher: SourceMatcher,
    ) -> Result<RendererDescriptor> {
        let name = name.into();
        let probe = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = probe {
            bail!("renderer '{}': cannot run '{}': {}", name, self.program, e);
        }
        Ok(RendererDescriptor::new(
            name,
            RendererKind::Native,
            matcher,
            Box::new(self),
        ))
    }

    fn run(&self, input: &[u8]) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", self.program))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("no stdin handle for '{}'", self.program))?;
        stdin
            .write_all(input)
            .with_context(|| format!("Failed to write to '{}' stdin", self.program))?;
        drop(stdin);

        // drain stdout on a separate thread so a large output cannot
        // deadlock against the bounded wait below
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("no stdout handle for '{}'", self.program))?;
        let reader = std::thread::spawn(move || -> std::io::Result<String> {
            let mut buf = String::new();
            stdout.read_to_string(&mut buf)?;
            Ok(buf)
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                warn!("'{}' timed out, terminating", self.program);
                if let Err(e) = child.kill() {
                    warn!("Failed to kill '{}': {}", self.program, e);
                }
                let _ = child.wait();
                return Err(RenderError::Timeout {
                    program: self.program.clone(),
                    timeout: self.timeout,
                }
                .into());
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let output = reader
            .join()
            .map_err(|_| anyhow!("stdout reader panicked for '{}'", self.program))?
            .with_context(|| format!("Failed to read '{}' stdout", self.program))?;

        if !status.success() {
            let mut stderr_text = String::new();
            if let Some(mut stderr) = child.stderr.take() {
                let _ = stderr.read_to_string(&mut stderr_text);
            }
            bail!(
                "'{}' exited with {}: {}",
                self.program,
                status,
                stderr_text.trim()
            );
        }
        debug!(
            "'{}' produced {} bytes in {:?}",
            self.program,
            output.len(),
            started.elapsed()
        );
        Ok(output)
    }
}

impl HtmlRenderer for ExternalToolRenderer {
    fn render_to_html(&self, source: &dyn ContentSource, out: &mut String) -> Result<()> {
        let markup = self.run(&source.content_bytes()?)?;
        out.push_str(
            "<!DOCTYPE html>\n<html>\n<head>\n\
             <meta http-equiv=\"Content-Type\" content=\"text/html; charset=UTF-8\">\n\
             </head>\n<body style='padding:5px'>\n",
        );
        out.push_str(&markup);
        out.push_str("\n</body></html>");
        Ok(())
    }
}
