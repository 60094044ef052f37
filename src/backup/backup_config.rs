use crate::backup::archive::TarArchiver;
use crate::backup::cleanup::FileCleaner;
use crate::backup::command::CommandRunner;
use crate::backup::compress::Compression;
use crate::backup::function_path;
use crate::backup::job::{dated_archive_path, dated_log_path, resolve_exclude, BackupJob};
use crate::backup::pipeline::Pipeline;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::schedule::ScheduleConfig;
use crate::backup::upload::{RcloneUploader, RetryConfig};
use crate::backup::validate::{
    validate_dir_exist, validate_remote_name, validate_valid_archive_base_name,
    validate_writable_dir,
};
use bon::Builder;
use chrono::NaiveDate;
use function_name::named;
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

static DEFAULT_FOLDER: &str = "backups";
static DEFAULT_EXCLUDES: [&str; 5] = [
    "./.cache",
    "./.config",
    "./.mozilla",
    "./.google-chrome",
    "./.local/share/Trash",
];
static DEFAULT_TMP_DIR: &str = "/tmp";
static DEFAULT_ARCHIVE_BASE_NAME: &str = "backup";

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters, CopyGetters)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    #[validate(custom(function = validate_dir_exist))]
    #[builder(into)]
    #[getset(get = "pub")]
    source_dir: PathBuf,
    /// rclone remote name, without the trailing `:`.
    #[validate(custom(function = validate_remote_name))]
    #[builder(into)]
    #[getset(get = "pub")]
    remote: String,
    #[serde(default = "default_folder")]
    #[builder(default = default_folder(), into)]
    #[getset(get = "pub")]
    folder: String,
    /// tar `--exclude` patterns. Bare names match at any depth, `./` anchors a pattern
    /// at `source_dir`.
    #[serde(default = "default_excludes")]
    #[builder(default = default_excludes())]
    #[getset(get = "pub")]
    excludes: Vec<String>,
    #[validate(custom(function = validate_writable_dir))]
    #[serde(default = "default_tmp_dir")]
    #[builder(default = default_tmp_dir(), into)]
    #[getset(get = "pub")]
    archive_dir: PathBuf,
    #[validate(custom(function = validate_writable_dir))]
    #[serde(default = "default_tmp_dir")]
    #[builder(default = default_tmp_dir(), into)]
    #[getset(get = "pub")]
    log_dir: PathBuf,
    #[validate(custom(function = validate_valid_archive_base_name))]
    #[serde(default = "default_archive_base_name")]
    #[builder(default = default_archive_base_name(), into)]
    #[getset(get = "pub")]
    archive_base_name: String,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    compression: Compression,
    #[serde(default)]
    #[builder(default)]
    #[getset(get_copy = "pub")]
    verbose: bool,
    #[serde(default = "default_tar_program")]
    #[builder(default = default_tar_program(), into)]
    #[getset(get = "pub")]
    tar_program: PathBuf,
    #[serde(default = "default_rclone_program")]
    #[builder(default = default_rclone_program(), into)]
    #[getset(get = "pub")]
    rclone_program: PathBuf,
    #[validate(nested)]
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    retry: RetryConfig,
    #[validate(nested)]
    #[getset(get = "pub")]
    schedule: Option<ScheduleConfig>,
}

fn default_folder() -> String {
    DEFAULT_FOLDER.to_string()
}

fn default_excludes() -> Vec<String> {
    DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TMP_DIR)
}

fn default_archive_base_name() -> String {
    DEFAULT_ARCHIVE_BASE_NAME.to_string()
}

fn default_tar_program() -> PathBuf {
    PathBuf::from("tar")
}

fn default_rclone_program() -> PathBuf {
    PathBuf::from("rclone")
}

impl BackupConfig {
    /// Parses and validates a YAML config file.
    #[named]
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader::<_, BackupConfig>(f).map_err(Error::from))
            .add_msg(format!("Parse YAML config failed: {:?}", path))
            .add_fn_name(function_path!())?;
        config
            .validate()
            .map_err(Error::from)
            .add_msg(format!("Config validation failed: {:?}", path))
            .add_fn_name(function_path!())?;
        Ok(config)
    }

    pub fn resolved_excludes(&self) -> Vec<String> {
        self.excludes
            .iter()
            .map(|pattern| resolve_exclude(&self.source_dir, pattern))
            .unique()
            .collect()
    }

    /// The job for a run started on `date`.
    pub fn job(&self, date: NaiveDate) -> BackupJob {
        BackupJob::builder()
            .source_dir(self.source_dir.clone())
            .remote(self.remote.clone())
            .folder(self.folder.clone())
            .excludes(self.resolved_excludes())
            .archive_path(dated_archive_path(
                &self.archive_dir,
                &self.archive_base_name,
                self.compression.file_ext(),
                date,
            ))
            .log_path(dated_log_path(&self.log_dir, &self.archive_base_name, date))
            .build()
    }

    pub fn pipeline(&self, runner: Arc<dyn CommandRunner>) -> Pipeline {
        let archiver = TarArchiver::builder()
            .runner(runner.clone())
            .program(self.tar_program.clone())
            .compression(self.compression)
            .verbose(self.verbose)
            .build();
        let uploader = RcloneUploader::builder()
            .runner(runner)
            .program(self.rclone_program.clone())
            .retry(self.retry.clone())
            .build();

        Pipeline::builder()
            .archiver(Arc::new(archiver))
            .uploader(Arc::new(uploader))
            .cleaner(Arc::new(FileCleaner))
            .build()
    }
}
