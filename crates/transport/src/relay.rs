use crate::{redact_url, Fetcher, Result, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Host relay that shells out to an operator-configured command.
///
/// The URL is appended as the last argument and the command must print the response body
/// on stdout, e.g. `curl -fsS` or a host bridge script with broader network privileges.
#[derive(Debug, Clone)]
pub struct CommandRelay {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRelay {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Splits a command line on whitespace: `"curl -fsS"` → program `curl`, args `["-fsS"]`.
    #[must_use]
    pub fn from_command_line(line: &str, timeout: Duration) -> Option<Self> {
        let mut parts = line.split_whitespace().map(ToString::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), timeout))
    }
}

#[async_trait]
impl Fetcher for CommandRelay {
    fn name(&self) -> &str {
        &self.program
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let output = timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&self.args)
                .arg(url)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            TransportError::Blocked(format!(
                "relay `{}` timed out after {}ms",
                self.program,
                self.timeout.as_millis()
            ))
        })?
        .map_err(|e| TransportError::Blocked(format!("relay `{}` failed: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Blocked(format!(
                "relay `{}` exited with {} for {}: {}",
                self.program,
                output.status,
                redact_url(url),
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout).map_err(|e| {
            TransportError::Malformed(format!("relay `{}` wrote non-UTF-8 output: {e}", self.program))
        })
    }
}
