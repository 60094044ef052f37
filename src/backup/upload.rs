use crate::backup::command::{CommandRunner, CommandSpec, OutputLine};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::sink::LogSink;
use bon::Builder;
use derive_more::Display;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

static DEFAULT_MAX_ATTEMPTS: u32 = 3;
static DEFAULT_BACKOFF: Duration = Duration::from_secs(60);
static DEFAULT_TRANSIENT_MARKER: &str = "rateLimitExceeded";

#[derive(Clone, Copy, Debug, Display, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadFailureKind {
    #[display("rate limited on every attempt")]
    RetriesExhausted,
    #[display("non-transient error")]
    NonTransient,
}

/// Retry policy for transient upload failures.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters, CopyGetters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[validate(range(min = 1))]
    #[serde(default = "default_max_attempts")]
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    #[getset(get_copy = "pub")]
    max_attempts: u32,
    #[serde(default = "default_backoff", with = "humantime_serde")]
    #[builder(default = DEFAULT_BACKOFF)]
    #[getset(get_copy = "pub")]
    backoff: Duration,
    /// Substring of the sync tool's error output that marks a retryable failure.
    #[validate(length(min = 1))]
    #[serde(default = "default_transient_marker")]
    #[builder(default = default_transient_marker(), into)]
    #[getset(get = "pub")]
    transient_marker: String,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff() -> Duration {
    DEFAULT_BACKOFF
}

fn default_transient_marker() -> String {
    DEFAULT_TRANSIENT_MARKER.to_string()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Waits between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// Sends the archive to the remote.
pub trait Upload: Send + Sync {
    /// Returns the number of attempts it took.
    fn upload(&self, archive: &Path, remote: &str, folder: &str, sink: &dyn LogSink) -> Result<u32>;
}

/// Uploads with `rclone copy`.
#[derive(Clone, Builder, Getters)]
#[getset(get = "pub")]
pub struct RcloneUploader {
    runner: Arc<dyn CommandRunner>,
    #[builder(default = PathBuf::from("rclone"), into)]
    program: PathBuf,
    #[builder(default)]
    retry: RetryConfig,
    #[builder(default = Arc::new(ThreadSleeper))]
    sleeper: Arc<dyn Sleeper>,
}

/// `<remote>:<folder>/` as rclone expects it.
pub fn remote_destination(remote: &str, folder: &str) -> String {
    format!("{remote}:{}/", folder.trim_end_matches('/'))
}

impl RcloneUploader {
    pub fn command(&self, archive: &Path, remote: &str, folder: &str) -> CommandSpec {
        let destination = remote_destination(remote, folder);
        CommandSpec::builder()
            .program(self.program.clone())
            .args(vec![
                OsString::from("copy"),
                archive.into(),
                destination.into(),
            ])
            .build()
    }
}

impl Upload for RcloneUploader {
    fn upload(&self, archive: &Path, remote: &str, folder: &str, sink: &dyn LogSink) -> Result<u32> {
        let spec = self.command(archive, remote, folder);
        let max_attempts = self.retry.max_attempts.max(1);
        sink.info(&format!(
            "Uploading backup to {} ...",
            remote_destination(remote, folder)
        ));

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            tracing::debug!("Upload attempt {}/{}: {}", attempt, max_attempts, spec.display());
            let output = self
                .runner
                .run(&spec, &mut |OutputLine { line, .. }| sink.info(&line))
                .map_err(|e| {
                    Error::upload(attempt, e.to_string(), UploadFailureKind::NonTransient)
                })?;

            if output.success() {
                sink.info("Backup uploaded successfully.");
                return Ok(attempt);
            }

            let detail = if output.stderr.is_empty() {
                format!("{} exited with {:?}", spec.display(), output.exit_code)
            } else {
                output.stderr_text()
            };
            sink.error(&format!("Failed to upload backup. Error: {detail}"));

            if !detail.contains(self.retry.transient_marker.as_str()) {
                return Err(Error::upload(
                    attempt,
                    detail,
                    UploadFailureKind::NonTransient,
                ));
            }
            if attempt >= max_attempts {
                sink.error(&format!(
                    "Failed to upload backup after {attempt} tries. Last error: {detail}"
                ));
                return Err(Error::upload(
                    attempt,
                    detail,
                    UploadFailureKind::RetriesExhausted,
                ));
            }

            sink.warn(&format!(
                "Rate limit exceeded. Retrying {}/{} in {:?}...",
                attempt + 1,
                max_attempts,
                self.retry.backoff
            ));
            self.sleeper.sleep(self.retry.backoff);
        }
    }
}
