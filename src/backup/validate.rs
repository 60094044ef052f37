//! Validation functions for configuration values.
//!
//! Custom `validator` functions for source and output directories, archive names, rclone
//! remote names and anacron job identifiers.

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::Path;

pub fn validate_valid_archive_base_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || !is_sanitized(name) {
        return Err(ValidationError::new("InvalidArchiveBaseName").with_message(
            format!(
                "Invalid file name, try sanitizing like {:?}",
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }

    Ok(())
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory").with_message(
                format!("cannot create or access directory {:?}: {}", dir, e).into(),
            )
        });
    }

    Ok(())
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    validate_dir_exist_or_created(dir)?;
    let md = std::fs::metadata(dir).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot access metadata for {:?}: {}", dir, e).into())
    })?;
    if md.permissions().readonly() {
        Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot write to dir {:?}", dir).into()))
    } else {
        Ok(())
    }
}

/// The remote is joined as `<remote>:<folder>/`, so the name itself carries no colon.
pub fn validate_remote_name<S: AsRef<str>>(remote: S) -> Result<(), ValidationError> {
    let remote = remote.as_ref();
    if remote.trim().is_empty() {
        return Err(ValidationError::new("InvalidRemote")
            .with_message("remote must not be empty".into()));
    }
    if remote.contains(':') {
        return Err(ValidationError::new("InvalidRemote").with_message(
            format!("remote {remote:?} must be a bare rclone remote name without ':'").into(),
        ));
    }

    Ok(())
}

/// anacrontab fields are whitespace separated.
pub fn validate_job_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("InvalidJobName").with_message(
            format!("job name {name:?} must be non-empty and contain no whitespace").into(),
        ));
    }

    Ok(())
}
