//! Recurring runs through anacron.
//!
//! An anacrontab line is `<period in days> <delay in minutes> <job identifier> <command>`.
//! Registration appends that line to the system anacrontab unless it is already present.

pub mod elevated;

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::schedule::elevated::{Elevation, PrivilegedFileEditor};
use crate::backup::validate::validate_job_name;
use bon::Builder;
use derive_more::Display;
use function_name::named;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Formatter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use validator::Validate;

static DEFAULT_DELAY_MINUTES: u32 = 5;
static DEFAULT_JOB_NAME: &str = "backup-job";
static DEFAULT_ANACRONTAB: &str = "/etc/anacrontab";

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Period {
    #[display("daily")]
    Daily,
    #[display("weekly")]
    Weekly,
}

impl Period {
    pub fn days(&self) -> u32 {
        match self {
            Period::Daily => 1,
            Period::Weekly => 7,
        }
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            other => Err(Error::config(format!(
                "Unsupported schedule {other:?}, expected \"daily\" or \"weekly\""
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct AnacronEntry {
    #[getset(get_copy = "pub")]
    period: Period,
    #[getset(get_copy = "pub")]
    delay_minutes: u32,
    #[getset(get = "pub")]
    job_name: String,
    #[getset(get = "pub")]
    command: String,
}

impl std::fmt::Display for AnacronEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.period.days(),
            self.delay_minutes,
            self.job_name,
            self.command
        )
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters, CopyGetters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// `daily` or `weekly`; anything else is rejected when registering.
    #[builder(into)]
    #[getset(get = "pub")]
    period: String,
    #[serde(default = "default_delay_minutes")]
    #[builder(default = DEFAULT_DELAY_MINUTES)]
    #[getset(get_copy = "pub")]
    delay_minutes: u32,
    #[validate(custom(function = validate_job_name))]
    #[serde(default = "default_job_name")]
    #[builder(default = DEFAULT_JOB_NAME.to_string(), into)]
    #[getset(get = "pub")]
    job_name: String,
    /// Defaults to running this program against the same config file.
    #[validate(length(min = 1))]
    #[builder(into)]
    #[getset(get = "pub")]
    command: Option<String>,
    #[serde(default = "default_anacrontab")]
    #[builder(default = PathBuf::from(DEFAULT_ANACRONTAB), into)]
    #[getset(get = "pub")]
    anacrontab: PathBuf,
    #[serde(default)]
    #[builder(default)]
    #[getset(get = "pub")]
    elevation: Elevation,
}

fn default_delay_minutes() -> u32 {
    DEFAULT_DELAY_MINUTES
}

fn default_job_name() -> String {
    DEFAULT_JOB_NAME.to_string()
}

fn default_anacrontab() -> PathBuf {
    PathBuf::from(DEFAULT_ANACRONTAB)
}

impl ScheduleConfig {
    /// Builds the entry, using `fallback_command` when no command is configured.
    pub fn entry(&self, fallback_command: &str) -> Result<AnacronEntry> {
        let period = self.period.parse::<Period>()?;
        let command = self
            .command
            .clone()
            .unwrap_or_else(|| fallback_command.to_string());
        if command.trim().is_empty() {
            return Err(Error::config("Scheduled command must not be empty"));
        }
        if validate_job_name(&self.job_name).is_err() {
            return Err(Error::config(format!(
                "Invalid job name {:?}, it must not contain whitespace",
                self.job_name
            )));
        }
        Ok(AnacronEntry {
            period,
            delay_minutes: self.delay_minutes,
            job_name: self.job_name.clone(),
            command,
        })
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Registration {
    #[display("added")]
    Added,
    #[display("already present")]
    AlreadyPresent,
}

/// Appends `entry` to `anacrontab` unless an identical line is already there.
#[named]
pub fn register(
    editor: &dyn PrivilegedFileEditor,
    anacrontab: &Path,
    entry: &AnacronEntry,
) -> Result<Registration> {
    let line = entry.to_string();
    let current = editor
        .read(anacrontab)
        .add_msg(format!("Reading {:?} failed", anacrontab))
        .add_fn_name(function_path!())?;

    if current.lines().any(|existing| existing.trim() == line) {
        tracing::info!("The anacron job '{}' is already set.", entry.job_name);
        return Ok(Registration::AlreadyPresent);
    }

    // Never glue the entry onto an unterminated last line.
    let appended = if current.is_empty() || current.ends_with('\n') {
        line.clone()
    } else {
        format!("\n{line}")
    };
    editor
        .append(anacrontab, &appended)
        .add_msg(format!("Appending to {:?} failed", anacrontab))
        .add_fn_name(function_path!())?;
    tracing::info!("Anacron job set successfully: {}", line);
    Ok(Registration::Added)
}

/// Validates the schedule, then registers it. An invalid period never touches the file.
pub fn register_schedule(
    editor: &dyn PrivilegedFileEditor,
    config: &ScheduleConfig,
    fallback_command: &str,
) -> Result<Registration> {
    let entry = config.entry(fallback_command)?;
    register(editor, &config.anacrontab, &entry)
}
