use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::PreferenceStore;
use crate::atomic::{modify_json, read_json, VersionedFile};
use crate::{AgriError, Result};

const LOG_PREFIX: &str = "[file-preferences]";
const STORAGE_VERSION: i32 = 1;

/// On-disk layout of the preferences file.
#[derive(Serialize, Deserialize, Default)]
struct PreferencesData {
    version: i32,
    entries: BTreeMap<String, String>,
}

/// Preferences persisted as versioned JSON under a directory, so a
/// crash mid-write never leaves a half-written file behind.
pub struct FilePreferences {
    label: String,
    file: VersionedFile,
}

impl FilePreferences {
    /// Open (or create) the preferences stored in `directory`.
    pub fn open(label: &str, directory: &Path) -> Result<Self> {
        let file = VersionedFile::new(directory)?;
        log::info!(
            "{} {} opened at {}",
            LOG_PREFIX,
            label,
            directory.display()
        );
        Ok(Self {
            label: label.to_owned(),
            file,
        })
    }

    fn read(&self) -> Result<BTreeMap<String, String>> {
        match read_json::<PreferencesData>(&self.file)? {
            Some(data) => {
                self.verify_version(data.version)?;
                Ok(data.entries)
            }
            None => Ok(BTreeMap::new()),
        }
    }

    fn update(
        &self,
        mut change: impl FnMut(&mut BTreeMap<String, String>),
    ) -> Result<()> {
        self.read()?;
        modify_json(&self.file, |data: &mut Option<PreferencesData>| {
            let data = data.get_or_insert_with(|| PreferencesData {
                version: STORAGE_VERSION,
                entries: BTreeMap::new(),
            });
            change(&mut data.entries);
        })?;
        Ok(())
    }

    fn verify_version(&self, version: i32) -> Result<()> {
        match version.cmp(&STORAGE_VERSION) {
            std::cmp::Ordering::Equal => Ok(()),
            std::cmp::Ordering::Greater => Err(AgriError::Storage(
                self.label.clone(),
                "Storage format is newer than the app".to_owned(),
            )),
            std::cmp::Ordering::Less => Err(AgriError::Storage(
                self.label.clone(),
                "Storage format is older than the app".to_owned(),
            )),
        }
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })?;
        log::debug!("{} {} set {}", LOG_PREFIX, self.label, key);
        Ok(())
    }
}
