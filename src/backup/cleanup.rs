use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::sink::LogSink;
use std::io::ErrorKind;
use std::path::Path;

/// Removes local artifacts at the end of a run.
pub trait Cleanup: Send + Sync {
    fn cleanup(&self, archive: &Path, sink: &dyn LogSink) -> Result<()>;
}

/// Deletes the local archive file; a missing file is not an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileCleaner;

impl Cleanup for FileCleaner {
    fn cleanup(&self, archive: &Path, sink: &dyn LogSink) -> Result<()> {
        match std::fs::remove_file(archive) {
            Ok(()) => {
                sink.info(&format!("Local backup file {:?} deleted.", archive));
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("Nothing to clean up at {:?}", archive);
                Ok(())
            }
            Err(e) => Err(Error::Cleanup {
                path: archive.to_path_buf(),
                source: e,
            }),
        }
    }
}
