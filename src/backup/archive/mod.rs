pub mod verify;

use crate::backup::command::{CommandRunner, CommandSpec, OutputLine, StreamKind};
use crate::backup::compress::Compression;
use crate::backup::function_path;
use crate::backup::job::BackupJob;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::sink::LogSink;
use bon::Builder;
use function_name::named;
use getset::Getters;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

/// How many trailing stderr lines an `ArchiveError` keeps.
static STDERR_TAIL_LINES: usize = 20;

/// Markers GNU tar prints for files it could not read under `--ignore-failed-read`.
static SKIPPED_FILE_MARKERS: [&str; 2] = ["Cannot open", "Permission denied"];

/// Produces the archive for a job.
pub trait Archive: Send + Sync {
    /// Returns the path of the verified archive.
    fn archive(&self, job: &BackupJob, sink: &dyn LogSink) -> Result<PathBuf>;
}

/// Archives with the external `tar` tool.
#[derive(Clone, Builder, Getters)]
#[getset(get = "pub")]
pub struct TarArchiver {
    runner: Arc<dyn CommandRunner>,
    #[builder(default = PathBuf::from("tar"), into)]
    program: PathBuf,
    #[builder(default)]
    compression: Compression,
    /// Adds `-v` so every archived member is streamed to the sink.
    #[builder(default)]
    verbose: bool,
}

impl TarArchiver {
    pub fn command(&self, job: &BackupJob) -> CommandSpec {
        let mode = if self.verbose {
            format!("-cv{}f", self.compression.tar_flag())
        } else {
            format!("-c{}f", self.compression.tar_flag())
        };
        let mut args: Vec<OsString> = vec![
            mode.into(),
            job.archive_path().into(),
            "--ignore-failed-read".into(),
        ];
        // Exclusions only apply to the paths that follow them.
        args.extend(
            job.excludes()
                .iter()
                .map(|pattern| OsString::from(format!("--exclude={pattern}"))),
        );
        args.push(job.source_dir().into());

        CommandSpec::builder()
            .program(self.program.clone())
            .args(args)
            // Skip markers are matched on untranslated messages.
            .envs(vec![("LC_ALL".into(), "C".into())])
            .build()
    }
}

pub fn is_skipped_file_line(line: &str) -> bool {
    SKIPPED_FILE_MARKERS.iter().any(|marker| line.contains(marker))
}

impl Archive for TarArchiver {
    #[named]
    fn archive(&self, job: &BackupJob, sink: &dyn LogSink) -> Result<PathBuf> {
        let spec = self.command(job);
        sink.info(&format!("Creating backup: {:?}", job.archive_path()));
        tracing::debug!("Archive command: {}", spec.display());

        let mut skipped = 0usize;
        let output = self
            .runner
            .run(&spec, &mut |OutputLine { kind, line }| match kind {
                StreamKind::Stdout => sink.info(&line),
                StreamKind::Stderr if is_skipped_file_line(&line) => {
                    skipped += 1;
                    sink.warn(&format!("Skipped unreadable file: {line}"));
                }
                StreamKind::Stderr => sink.warn(&line),
            })
            .add_fn_name(function_path!())?;

        if !output.success() {
            return Err(Error::archive(
                output.exit_code,
                output.stderr_tail(STDERR_TAIL_LINES),
            ));
        }
        if skipped > 0 {
            sink.warn(&format!(
                "{skipped} file(s) were skipped because they could not be read"
            ));
        }

        let members = verify::verify_archive(job.archive_path(), self.compression)?;
        sink.info(&format!(
            "Backup created at {:?} ({members} members)",
            job.archive_path()
        ));
        Ok(job.archive_path().clone())
    }
}
