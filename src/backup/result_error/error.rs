use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::upload::UploadFailureKind;
use std::path::PathBuf;
use thiserror::Error;
use thiserror_ext::Construct;

#[derive(Error, Debug, Construct)]
pub enum Error {
    #[error(transparent)]
    #[construct(skip)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    #[construct(skip)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    #[construct(skip)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    #[construct(skip)]
    SerdeJson(#[from] serde_json::Error),
    #[error("archive tool exited with {}:\n{}", display_exit_code(.exit_code), indent::indent_all_with("  ", .stderr_tail))]
    Archive {
        exit_code: Option<i32>,
        stderr_tail: String,
    },
    #[error("archive {path:?} failed verification: {reason}")]
    ArchiveVerify { path: PathBuf, reason: String },
    #[error("upload failed after {attempts} attempt(s), {kind}:\n{}", indent::indent_all_with("  ", .last_error))]
    Upload {
        attempts: u32,
        last_error: String,
        kind: UploadFailureKind,
    },
    #[error("failed to remove local archive {path:?}: {source}")]
    #[construct(skip)]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("privileged command `{command}` exited with {}:\n{}", display_exit_code(.exit_code), indent::indent_all_with("  ", .detail))]
    Privileged {
        command: String,
        exit_code: Option<i32>,
        detail: String,
    },
    #[error("a backup job is already running")]
    Busy,
    #[error("backup worker panicked: {0}")]
    WorkerPanic(String),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    #[construct(skip)]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    #[construct(skip)]
    WithFnName { error: Box<Error>, fn_name: String },
}

fn display_exit_code(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Error::WithFnName {
            error: Box::new(self),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl Error {
    /// Strips `WithMsg`/`WithFnName` context layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => error.root(),
            e => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);

        match error {
            Error::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_add_msg() {
        let error = Error::config("missing remote").add_msg("Custom message");

        match &error {
            Error::WithMsg { msg, .. } => assert_eq!(msg, "Custom message"),
            _ => panic!("Expected WithMsg error"),
        }
        let error_str = error.to_string();
        assert!(error_str.contains("Custom message"));
        assert!(error_str.contains("  configuration error: missing remote"));
    }

    #[test]
    fn test_error_add_fn_name_display() {
        let error = Error::busy().add_fn_name("try_submit");
        let error_str = error.to_string();

        assert!(error_str.contains("try_submit failed"));
        assert!(error_str.contains("already running"));
    }

    #[test]
    fn test_root_strips_context() {
        let error = Error::config("bad period")
            .add_msg("Loading schedule")
            .add_fn_name("register");

        assert!(matches!(error.root(), Error::Config(_)));
    }

    #[test]
    fn test_archive_error_display() {
        let error = Error::archive(Some(2), "tar: src: Cannot stat\ntar: Exiting with failure");
        let error_str = error.to_string();

        assert!(error_str.contains("exit code 2"));
        assert!(error_str.contains("  tar: Exiting with failure"));

        let error = Error::archive(None, "");
        assert!(error.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_upload_error_display() {
        let error = Error::upload(3u32, "rateLimitExceeded", UploadFailureKind::RetriesExhausted);
        let error_str = error.to_string();

        assert!(error_str.contains("after 3 attempt(s)"));
        assert!(error_str.contains("rateLimitExceeded"));
    }
}
