use bon::Builder;
use chrono::NaiveDate;
use getset::Getters;
use serde::Serialize;
use std::path::{Path, PathBuf};

static DATE_FORMAT: &str = "%Y-%m-%d";

/// Everything a single run needs, fixed when the run starts.
#[derive(Clone, Debug, Serialize, Builder, Getters, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct BackupJob {
    #[builder(into)]
    source_dir: PathBuf,
    #[builder(into)]
    remote: String,
    #[builder(into)]
    folder: String,
    /// Already resolved against `source_dir`.
    #[builder(default)]
    excludes: Vec<String>,
    #[builder(into)]
    archive_path: PathBuf,
    #[builder(into)]
    log_path: PathBuf,
}

/// `<dir>/<base>-<YYYY-MM-DD>.<ext>`
pub fn dated_archive_path<P: AsRef<Path>>(dir: P, base: &str, ext: &str, date: NaiveDate) -> PathBuf {
    dir.as_ref()
        .join(format!("{base}-{}.{ext}", date.format(DATE_FORMAT)))
}

/// `<dir>/<base>_log_<YYYY-MM-DD>.log`
pub fn dated_log_path<P: AsRef<Path>>(dir: P, base: &str, date: NaiveDate) -> PathBuf {
    dir.as_ref()
        .join(format!("{base}_log_{}.log", date.format(DATE_FORMAT)))
}

/// A `./` prefix anchors the pattern at the source directory. Anything else goes to tar as
/// written, where a bare name matches at any depth.
pub fn resolve_exclude<P: AsRef<Path>>(source_dir: P, pattern: &str) -> String {
    match pattern.strip_prefix("./") {
        Some(anchored) => source_dir
            .as_ref()
            .join(anchored.trim_start_matches('/'))
            .to_string_lossy()
            .into_owned(),
        None => pattern.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 9).unwrap()
    }

    #[test]
    fn test_dated_paths() {
        assert_eq!(
            dated_archive_path("/tmp", "backup", "tar.gz", date()),
            PathBuf::from("/tmp/backup-2024-10-09.tar.gz")
        );
        assert_eq!(
            dated_log_path("/tmp", "backup", date()),
            PathBuf::from("/tmp/backup_log_2024-10-09.log")
        );
    }

    #[test]
    fn test_resolve_exclude() {
        assert_eq!(resolve_exclude("/home/me", "./.cache"), "/home/me/.cache");
        assert_eq!(
            resolve_exclude("/home/me", "./.local/share/Trash"),
            "/home/me/.local/share/Trash"
        );
        assert_eq!(resolve_exclude("/home/me", "node_modules"), "node_modules");
        assert_eq!(resolve_exclude("/home/me", "*.tmp"), "*.tmp");
        assert_eq!(resolve_exclude("/home/me", "/var/cache"), "/var/cache");
    }

    #[test]
    fn test_excludes_default_to_empty() {
        let job = BackupJob::builder()
            .source_dir("/home/me")
            .remote("gdrive")
            .folder("backups/")
            .archive_path("/tmp/backup-2024-10-09.tar.gz")
            .log_path("/tmp/backup_log_2024-10-09.log")
            .build();

        assert!(job.excludes().is_empty());
    }
}
