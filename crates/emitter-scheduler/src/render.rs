//! Artifact renderer backed by an external command.
//!
//! The command writes the finished image to stdout. A non-zero exit, an
//! empty stdout or a timeout all count as a render failure, which aborts
//! the broadcast cycle before any recipient is contacted.

use async_trait::async_trait;
use std::time::Duration;

use emitter_core::config::RendererConfig;
use emitter_core::error::{EmitterError, Result};
use emitter_core::traits::ArtifactRenderer;
use emitter_core::types::Artifact;

pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    file_name: String,
    caption: Option<String>,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            file_name: "broadcast.png".into(),
            caption: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            program: config.command.clone(),
            args: config.args.clone(),
            file_name: config.file_name.clone(),
            caption: config.caption.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

#[async_trait]
impl ArtifactRenderer for CommandRenderer {
    async fn render(&self) -> Result<Artifact> {
        if self.program.trim().is_empty() {
            return Err(EmitterError::Render("renderer command is not configured".into()));
        }

        let run = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.program)
                .args(&self.args)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match run {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(EmitterError::Render(format!("spawn {}: {e}", self.program)));
            }
            Err(_) => {
                return Err(EmitterError::Render(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EmitterError::Render(format!(
                "{} exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(EmitterError::Render(format!("{} produced no output", self.program)));
        }

        tracing::debug!("🖼️ Rendered {} ({} bytes)", self.file_name, output.stdout.len());
        let artifact = Artifact::new(output.stdout, self.file_name.clone());
        Ok(match &self.caption {
            Some(caption) => artifact.with_caption(caption.clone()),
            None => artifact,
        })
    }
}
