// Fetcher module - obtains the raw node inventory payload
//
// The collector never talks to the scheduler directly. It asks a Fetcher for
// the bytes of the current node inventory, which may come from running the
// scheduler's CLI or from reading a pre-generated snapshot on disk.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors that can occur while obtaining the node inventory payload
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {}: {stderr}", exit_code_label(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("'{program}' did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("failed to read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch throttled after recent failure: {last_error}")]
    Throttled { last_error: String },

    #[error("data source unavailable: {0}")]
    Unavailable(String),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Capability that returns the raw bytes of the current node inventory.
///
/// Implementations own their transport and their timeout policy. They never
/// retry; the scrape loop decides when to call again.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError>;
}

/// Runs an external command (by default `sinfo --json`) and returns its stdout.
pub struct CliFetcher {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CliFetcher {
    /// Creates a new CliFetcher
    ///
    /// # Arguments
    /// * `program` - Executable to run, resolved through `PATH`
    /// * `args` - Arguments passed verbatim
    /// * `timeout` - Upper bound on the command's run time; the child is killed past it
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        CliFetcher {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Builds a fetcher from a full command line such as `["sinfo", "--json"]`.
    ///
    /// Returns `None` for an empty command.
    pub fn from_command(command: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec(), timeout))
    }
}

#[async_trait]
impl Fetcher for CliFetcher {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        let started = Instant::now();

        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| FetchError::Timeout {
                program: self.program.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| FetchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(FetchError::Exit {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if output.stdout.is_empty() {
            return Err(FetchError::Unavailable(format!(
                "'{}' produced no output",
                self.program
            )));
        }

        debug!(
            program = %self.program,
            bytes = output.stdout.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Fetched node inventory from command"
        );

        Ok(output.stdout)
    }
}

/// Reads a node inventory snapshot from a file.
pub struct FileFetcher {
    path: PathBuf,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileFetcher { path: path.into() }
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        let started = Instant::now();
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| FetchError::Read {
                path: self.path.clone(),
                source,
            })?;

        debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Read node inventory snapshot"
        );

        Ok(bytes)
    }
}
