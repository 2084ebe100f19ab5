mod file;

use serde::{de::DeserializeOwned, Serialize};
use std::io::{BufReader, BufWriter, ErrorKind, Result, Write};

pub use file::{Snapshot, StagedFile, VersionedFile};

/// Read the latest JSON value, let `operator` change it, and publish the
/// result as a new version. Lost races are retried against the fresher
/// version, so `operator` may run more than once.
pub fn modify_json<T: Serialize + DeserializeOwned>(
    file: &VersionedFile,
    mut operator: impl FnMut(&mut Option<T>),
) -> Result<()> {
    loop {
        let latest = file.load()?;
        let mut value = match latest.open()? {
            Some(reader) => {
                Some(serde_json::from_reader(BufReader::new(reader))?)
            }
            None => None,
        };
        operator(&mut value);

        let staged = file.stage()?;
        let mut writer = BufWriter::new(&staged);
        serde_json::to_writer(&mut writer, &value)?;
        writer.flush()?;
        drop(writer);

        match file.compare_and_swap(&latest, staged) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Latest JSON value, `None` when nothing was written yet.
pub fn read_json<T: DeserializeOwned>(
    file: &VersionedFile,
) -> Result<Option<T>> {
    match file.load()?.open()? {
        Some(reader) => Ok(serde_json::from_reader(BufReader::new(reader))?),
        None => Ok(None),
    }
}
