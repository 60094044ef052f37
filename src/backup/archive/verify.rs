use crate::backup::compress::Compression;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Member paths of a compressed tar archive, in archive order.
pub fn list_members<P: AsRef<Path>>(path: P, compression: Compression) -> Result<Vec<PathBuf>> {
    let file = File::open(path.as_ref())?;
    let mut archive = tar::Archive::new(compression.decoder(BufReader::new(file)));
    let mut members = Vec::new();
    for entry in archive.entries()? {
        members.push(entry?.path()?.into_owned());
    }
    Ok(members)
}

/// Decodes the whole archive and returns its member count; an empty archive is an error.
pub fn verify_archive<P: AsRef<Path>>(path: P, compression: Compression) -> Result<usize> {
    let path = path.as_ref();
    let count = list_members(path, compression)
        .map_err(|e| Error::archive_verify(path, e.to_string()))?
        .len();
    if count == 0 {
        return Err(Error::archive_verify(path, "archive has no members"));
    }
    tracing::debug!("Verified {:?}: {} members", path, count);
    Ok(count)
}
