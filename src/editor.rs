//! Editor focus bridge — drives the local editor CLI.
//!
//! Two operations: bring the editor window to the foreground (`code -r`) and
//! jump to a file/line (`code -g path:line`). Both await the subprocess exit
//! status, so a failed jump is visible to the HTTP handler before it writes
//! its response.

use std::path::Path;
use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("could not spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Seam between the request handlers and the editor process.
///
/// Production uses [`EditorCli`]; tests substitute a recording fake.
#[async_trait]
pub trait EditorBridge: Send + Sync {
    /// Bring the editor window to the foreground.
    async fn focus(&self) -> Result<(), EditorError>;

    /// Open `path` in the editor and place the cursor on `line` (1-based).
    async fn open_at(&self, path: &Path, line: u32) -> Result<(), EditorError>;
}

/// Shells out to the editor CLI configured as `editor_cmd` (default `code`).
pub struct EditorCli {
    program: String,
}

impl EditorCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<(), EditorError> {
        let rendered = format!("{} {}", self.program, args.join(" "));
        debug!(command = %rendered, "invoking editor CLI");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|source| EditorError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }
        Err(EditorError::Failed {
            command: rendered,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl EditorBridge for EditorCli {
    async fn focus(&self) -> Result<(), EditorError> {
        self.run(&["-r".to_string()]).await
    }

    async fn open_at(&self, path: &Path, line: u32) -> Result<(), EditorError> {
        self.run(&["-g".to_string(), format!("{}:{line}", path.display())])
            .await
    }
}
