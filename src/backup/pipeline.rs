//! Archive, upload, then always clean up.
//!
//! ```text
//! Idle -> Archiving -> Uploading -> CleaningUp -> Done
//!             |                         ^
//!             +------- on failure ------+
//! ```
//!
//! The first failing stage decides the outcome. A cleanup failure is logged, and only becomes
//! the outcome when nothing failed before it. A panic while archiving or uploading still goes
//! through cleanup before it is resumed.

use crate::backup::archive::Archive;
use crate::backup::cleanup::Cleanup;
use crate::backup::job::BackupJob;
use crate::backup::result_error::error::Error;
use crate::backup::sink::LogSink;
use crate::backup::upload::Upload;
use bon::Builder;
use derive_more::Display;
use getset::{CopyGetters, Getters};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Display, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Archiving,
    Uploading,
    CleaningUp,
    Done,
}

/// Authoritative outcome of one run.
#[derive(Clone, Debug, Serialize, PartialEq, Eq, Getters, CopyGetters)]
pub struct RunResult {
    #[getset(get_copy = "pub")]
    success: bool,
    /// `Done` on success, otherwise the stage that failed.
    #[getset(get_copy = "pub")]
    stage: Stage,
    #[getset(get = "pub")]
    error: Option<String>,
    /// Upload attempts made, when the upload stage was reached.
    #[getset(get_copy = "pub")]
    upload_attempts: Option<u32>,
}

impl RunResult {
    fn succeeded(upload_attempts: Option<u32>) -> Self {
        Self {
            success: true,
            stage: Stage::Done,
            error: None,
            upload_attempts,
        }
    }

    fn failed(stage: Stage, error: &Error, upload_attempts: Option<u32>) -> Self {
        Self {
            success: false,
            stage,
            error: Some(error.to_string()),
            upload_attempts,
        }
    }
}

#[derive(Clone, Builder)]
pub struct Pipeline {
    archiver: Arc<dyn Archive>,
    uploader: Arc<dyn Upload>,
    cleaner: Arc<dyn Cleanup>,
}

impl Pipeline {
    pub fn run(&self, job: &BackupJob, sink: &dyn LogSink) -> RunResult {
        self.run_observed(job, sink, &mut |_| {})
    }

    /// Like [`Pipeline::run`], reporting every stage entered to `on_stage`.
    pub fn run_observed(
        &self,
        job: &BackupJob,
        sink: &dyn LogSink,
        on_stage: &mut dyn FnMut(Stage),
    ) -> RunResult {
        let mut enter = |stage: Stage| {
            sink.info(&format!("Stage: {stage}"));
            on_stage(stage);
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.archive_and_upload(job, sink, &mut enter)
        }));
        let (mut failure, upload_attempts, panic_payload) = match outcome {
            Ok((failure, upload_attempts)) => (failure, upload_attempts, None),
            Err(payload) => {
                sink.error("Backup aborted by a panic, cleaning up.");
                (None, None, Some(payload))
            }
        };
        if let Some((stage, e)) = &failure {
            sink.error(&format!("{stage} failed: {e}"));
        }

        enter(Stage::CleaningUp);
        if let Err(e) = self.cleaner.cleanup(job.archive_path(), sink) {
            sink.error(&format!("Error during cleanup: {e}"));
            if failure.is_none() {
                failure = Some((Stage::CleaningUp, e));
            }
        }
        if let Some(payload) = panic_payload {
            panic::resume_unwind(payload);
        }

        enter(Stage::Done);
        let result = match &failure {
            None => RunResult::succeeded(upload_attempts),
            Some((stage, e)) => RunResult::failed(*stage, e, upload_attempts),
        };
        if result.success {
            sink.info("Backup finished successfully.");
        } else {
            sink.error(&format!("Backup failed during {}.", result.stage));
        }
        result
    }

    /// Returns the first failure and the number of upload attempts made.
    fn archive_and_upload(
        &self,
        job: &BackupJob,
        sink: &dyn LogSink,
        enter: &mut dyn FnMut(Stage),
    ) -> (Option<(Stage, Error)>, Option<u32>) {
        enter(Stage::Archiving);
        let archive = match self.archiver.archive(job, sink) {
            Ok(archive) => archive,
            Err(e) => return (Some((Stage::Archiving, e)), None),
        };

        enter(Stage::Uploading);
        match self
            .uploader
            .upload(&archive, job.remote(), job.folder(), sink)
        {
            Ok(attempts) => (None, Some(attempts)),
            Err(e) => {
                let attempts = match e.root() {
                    Error::Upload { attempts, .. } => Some(*attempts),
                    _ => None,
                };
                (Some((Stage::Uploading, e)), attempts)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::cleanup::FileCleaner;
    use crate::backup::result_error::result::Result;
    use crate::backup::sink::MemorySink;
    use crate::backup::upload::{Upload, UploadFailureKind};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Writes the archive file, then optionally fails like a tar exiting non-zero.
    struct FakeArchiver {
        fail: bool,
    }

    impl Archive for FakeArchiver {
        fn archive(&self, job: &BackupJob, _: &dyn LogSink) -> Result<PathBuf> {
            std::fs::write(job.archive_path(), "partial archive")?;
            if self.fail {
                Err(Error::archive(Some(2), "tar: Exiting with failure status"))
            } else {
                Ok(job.archive_path().clone())
            }
        }
    }

    struct FakeUploader {
        result: fn() -> Result<u32>,
        calls: AtomicUsize,
    }

    impl FakeUploader {
        fn new(result: fn() -> Result<u32>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Upload for FakeUploader {
        fn upload(&self, archive: &Path, _: &str, _: &str, _: &dyn LogSink) -> Result<u32> {
            assert!(archive.exists(), "archive must exist while uploading");
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    struct FailingCleaner;

    impl Cleanup for FailingCleaner {
        fn cleanup(&self, archive: &Path, sink: &dyn LogSink) -> Result<()> {
            FileCleaner.cleanup(archive, sink)?;
            Err(Error::Cleanup {
                path: archive.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }
    }

    fn job(dir: &Path) -> BackupJob {
        BackupJob::builder()
            .source_dir("/home/me")
            .remote("gdrive")
            .folder("backups")
            .archive_path(dir.join("backup-2024-10-09.tar.gz"))
            .log_path(dir.join("backup_log_2024-10-09.log"))
            .build()
    }

    fn pipeline(
        archive_fails: bool,
        uploader: Arc<FakeUploader>,
        cleaner: Arc<dyn Cleanup>,
    ) -> Pipeline {
        Pipeline::builder()
            .archiver(Arc::new(FakeArchiver {
                fail: archive_fails,
            }))
            .uploader(uploader)
            .cleaner(cleaner)
            .build()
    }

    fn upload_ok() -> Result<u32> {
        Ok(1)
    }

    fn upload_rate_limited() -> Result<u32> {
        Err(Error::upload(
            3u32,
            "rateLimitExceeded",
            UploadFailureKind::RetriesExhausted,
        ))
    }

    #[test]
    fn test_success_removes_archive() {
        let temp_dir = TempDir::new().unwrap();
        let job = job(temp_dir.path());
        let uploader = Arc::new(FakeUploader::new(upload_ok));
        let sink = MemorySink::default();
        let mut stages = vec![];

        let result = pipeline(false, uploader.clone(), Arc::new(FileCleaner))
            .run_observed(&job, &sink, &mut |s| stages.push(s));

        assert!(result.success());
        assert_eq!(result.stage(), Stage::Done);
        assert_eq!(result.upload_attempts(), Some(1));
        assert!(result.error().is_none());
        assert_eq!(
            stages,
            vec![
                Stage::Archiving,
                Stage::Uploading,
                Stage::CleaningUp,
                Stage::Done
            ]
        );
        assert!(!job.archive_path().exists());
    }

    #[test]
    fn test_archive_failure_skips_upload_and_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let job = job(temp_dir.path());
        let uploader = Arc::new(FakeUploader::new(upload_ok));
        let sink = MemorySink::default();
        let mut stages = vec![];

        let result = pipeline(true, uploader.clone(), Arc::new(FileCleaner))
            .run_observed(&job, &sink, &mut |s| stages.push(s));

        assert!(!result.success());
        assert_eq!(result.stage(), Stage::Archiving);
        assert!(result.error().as_ref().unwrap().contains("exit code 2"));
        assert_eq!(result.upload_attempts(), None);
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            stages,
            vec![Stage::Archiving, Stage::CleaningUp, Stage::Done]
        );
        assert!(!job.archive_path().exists());
        assert!(sink.contains("Archiving failed"));
    }

    #[test]
    fn test_upload_failure_still_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let job = job(temp_dir.path());
        let uploader = Arc::new(FakeUploader::new(upload_rate_limited));

        let result = pipeline(false, uploader.clone(), Arc::new(FileCleaner))
            .run(&job, &MemorySink::default());

        assert!(!result.success());
        assert_eq!(result.stage(), Stage::Uploading);
        assert_eq!(result.upload_attempts(), Some(3));
        assert!(result.error().as_ref().unwrap().contains("rateLimitExceeded"));
        assert!(!job.archive_path().exists());
    }

    #[test]
    fn test_cleanup_failure_does_not_mask_upload_failure() {
        let temp_dir = TempDir::new().unwrap();
        let job = job(temp_dir.path());
        let uploader = Arc::new(FakeUploader::new(upload_rate_limited));
        let sink = MemorySink::default();

        let result = pipeline(false, uploader, Arc::new(FailingCleaner)).run(&job, &sink);

        assert_eq!(result.stage(), Stage::Uploading);
        assert!(sink.contains("Error during cleanup"));
    }

    #[test]
    fn test_cleanup_failure_fails_otherwise_successful_run() {
        let temp_dir = TempDir::new().unwrap();
        let job = job(temp_dir.path());
        let uploader = Arc::new(FakeUploader::new(upload_ok));

        let result = pipeline(false, uploader, Arc::new(FailingCleaner))
            .run(&job, &MemorySink::default());

        assert!(!result.success());
        assert_eq!(result.stage(), Stage::CleaningUp);
    }

    struct PanickingUploader;

    impl Upload for PanickingUploader {
        fn upload(&self, archive: &Path, _: &str, _: &str, _: &dyn LogSink) -> Result<u32> {
            assert!(archive.exists());
            panic!("uploader exploded")
        }
    }

    #[test]
    fn test_panic_still_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let job = job(temp_dir.path());
        let pipeline = Pipeline::builder()
            .archiver(Arc::new(FakeArchiver { fail: false }))
            .uploader(Arc::new(PanickingUploader))
            .cleaner(Arc::new(FileCleaner))
            .build();
        let sink = MemorySink::default();
        let mut stages = vec![];

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            pipeline.run_observed(&job, &sink, &mut |s| stages.push(s))
        }));

        assert!(outcome.is_err());
        assert!(!job.archive_path().exists());
        assert_eq!(
            stages,
            vec![Stage::Archiving, Stage::Uploading, Stage::CleaningUp]
        );
        assert!(sink.contains("aborted by a panic"));
    }

    #[test]
    fn test_run_result_json() {
        let result = RunResult::failed(
            Stage::Uploading,
            &Error::upload(1u32, "boom", UploadFailureKind::NonTransient),
            Some(1),
        );
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["stage"], "uploading");
        assert_eq!(json["upload_attempts"], 1);
    }
}
