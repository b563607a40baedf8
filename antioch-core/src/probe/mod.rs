mod parser;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ProbeSection;

pub use parser::parse_probe_output;

pub type ProbeResult<T> = Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run {program} on {path}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("{program} timed out after {after:?} on {path}")]
    Timeout {
        program: String,
        after: Duration,
        path: PathBuf,
    },
}

/// Produces free-form diagnostic text about a media file.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, media: &Path) -> ProbeResult<String>;
}

/// Runs an external probe executable, killing it when the wait runs out.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(section: &ProbeSection) -> Self {
        Self {
            program: section.program.clone(),
            args: section.args.clone(),
            timeout: section.timeout(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl MediaProbe for CommandProbe {
    async fn probe(&self, media: &Path) -> ProbeResult<String> {
        let mut command = Command::new(&self.program);
        command
            .kill_on_drop(true)
            .args(&self.args)
            .arg(media)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ProbeError::Spawn {
                    program: self.program.clone(),
                    source,
                    path: media.to_path_buf(),
                })
            }
            Err(_) => {
                return Err(ProbeError::Timeout {
                    program: self.program.clone(),
                    after: self.timeout,
                    path: media.to_path_buf(),
                })
            }
        };
        if !output.status.success() {
            debug!(
                program = %self.program,
                media = %media.display(),
                status = ?output.status.code(),
                "probe exited with non-zero status"
            );
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}
