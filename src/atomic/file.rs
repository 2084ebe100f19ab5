use std::fs::{self, File};
use std::io::{Error, ErrorKind, Result};
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Number of versions kept on disk after a successful swap.
const KEPT_VERSIONS: usize = 10;
const STAGING_NAME_LENGTH: usize = 12;

/// A scratch file next to the versions, removed on drop.
pub struct StagedFile {
    file: File,
    path: PathBuf,
}

impl StagedFile {
    fn create_in(directory: impl AsRef<Path>) -> Result<Self> {
        let name: String = std::iter::repeat_with(fastrand::alphanumeric)
            .take(STAGING_NAME_LENGTH)
            .collect();
        let path = directory.as_ref().join(format!(".{name}.staged"));
        let file = File::create(&path)?;
        Ok(Self { file, path })
    }
}

impl std::io::Write for &StagedFile {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (&self.file).write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (&self.file).flush()
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// One version of a [`VersionedFile`] as seen when it was loaded.
/// Version `0` means nothing has been written yet.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub version: usize,
    pub path: PathBuf,
}

impl Snapshot {
    pub fn open(&self) -> Result<Option<File>> {
        if self.version == 0 {
            return Ok(None);
        }
        match File::open(&self.path) {
            Ok(file) => Ok(Some(file)),
            // pruned by a concurrent writer; caller retries on swap
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// A file replaced atomically by writing numbered versions into a
/// directory: `<name>.<version>`. A writer stages its content, then
/// links it as `latest + 1`; losing that race reports
/// [`ErrorKind::AlreadyExists`] so the caller can reload and retry.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VersionedFile {
    directory: PathBuf,
    prefix: String,
}

fn parse_version(filename: Option<&str>, prefix: &str) -> Option<usize> {
    filename?.strip_prefix(prefix)?.parse().ok()
}

impl VersionedFile {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        let name = directory
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidInput,
                    "`directory` must end with a valid directory name",
                )
            })?;
        let prefix = format!("{name}.");
        Ok(Self { directory, prefix })
    }

    pub fn path(&self, version: usize) -> PathBuf {
        self.directory
            .join(format!("{}{version}", self.prefix))
    }

    pub fn latest_version(&self) -> Result<usize> {
        let latest = fs::read_dir(&self.directory)?
            .flatten()
            .filter_map(|entry| {
                parse_version(entry.file_name().to_str(), &self.prefix)
            })
            .max()
            .unwrap_or(0);
        Ok(latest)
    }

    pub fn load(&self) -> Result<Snapshot> {
        let version = self.latest_version()?;
        Ok(Snapshot {
            version,
            path: self.path(version),
        })
    }

    pub fn stage(&self) -> Result<StagedFile> {
        StagedFile::create_in(&self.directory)
    }

    /// Publish `staged` as the version after `current`.
    ///
    /// # Errors
    /// [`ErrorKind::AlreadyExists`] when another writer published a newer
    /// version since `current` was loaded. Other I/O errors are forwarded.
    pub fn compare_and_swap(
        &self,
        current: &Snapshot,
        staged: StagedFile,
    ) -> Result<()> {
        staged.file.sync_data()?;
        let latest = self.latest_version()?;
        if latest > current.version {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                "the loaded snapshot is no longer the latest version",
            ));
        }
        let next = self.path(current.version + 1);
        // link(2) fails with EEXIST when a concurrent writer won
        if let Err(err) = fs::hard_link(&staged.path, &next) {
            #[cfg(unix)]
            if staged.path.metadata()?.nlink() == 2 {
                self.finish(current.version + 1);
                return Ok(());
            }
            return Err(err);
        }
        self.finish(current.version + 1);
        Ok(())
    }

    fn finish(&self, published: usize) {
        let pruned = self.prune(published);
        log::debug!(
            "published {} version {}, pruned {} old versions",
            self.prefix.trim_end_matches('.'),
            published,
            pruned
        );
    }

    fn prune(&self, latest: usize) -> usize {
        let Ok(entries) = fs::read_dir(&self.directory) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| {
                parse_version(entry.file_name().to_str(), &self.prefix)
                    .map_or(false, |v| v + KEPT_VERSIONS <= latest)
            })
            .filter(|entry| fs::remove_file(entry.path()).is_ok())
            .count()
    }
}
