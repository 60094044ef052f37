//! # home-backup
//!
//! Archives a home directory, uploads the archive with `rclone` and cleans up after itself.
//!
//! ## Features
//!
//! - **Archiving**: `tar` with exclusion patterns, unreadable files are skipped, not fatal
//! - **Verification**: the produced archive is decoded and its members counted before upload
//! - **Upload with retry**: bounded retries when the remote reports rate limiting
//! - **Guaranteed cleanup**: the local archive is removed whatever the outcome
//! - **Single-slot jobs**: one run at a time on a worker thread, progress over a channel
//! - **Recurring runs**: idempotent `anacron` registration through `pkexec` or `sudo -A`
//!
//! ## Quick Start
//!
//! ```no_run
//! use home_backup::backup::backup_config::BackupConfig;
//! use home_backup::backup::command::SystemCommandRunner;
//! use home_backup::backup::sink::{LogSink, TracingSink};
//! use std::sync::Arc;
//!
//! let config = BackupConfig::from_file("config.yml")?;
//! let job = config.job(chrono::Local::now().date_naive());
//! let pipeline = config.pipeline(Arc::new(SystemCommandRunner));
//! let sink: Arc<dyn LogSink> = Arc::new(TracingSink);
//! let result = pipeline.run(&job, sink.as_ref());
//! assert!(result.success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
