//! Startup resolution of the active profile.

use std::sync::Arc;

use crate::profile::Profile;
use crate::store::ProfileStore;
use crate::Result;

/// Whether the active profile is known. `Resolved` with no active
/// profile means the collection is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Resolution {
    #[default]
    Pending,
    Resolved,
    Failed(String),
}

impl Resolution {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Resolution::Pending)
    }
}

/// Loads the profile collection once so dependent pages know whom to
/// fetch for. A failure is terminal until [`resolve`](Self::resolve) is
/// called again or a save or switch succeeds.
#[derive(Clone)]
pub struct ActiveProfileResolver {
    store: Arc<ProfileStore>,
}

impl ActiveProfileResolver {
    pub fn new(store: Arc<ProfileStore>) -> Self {
        Self { store }
    }

    /// Returns the active profile, `None` when there are no profiles.
    pub async fn resolve(&self) -> Result<Option<Profile>> {
        self.store.begin_resolution();
        match self.store.load().await {
            Ok(()) => {
                let active = self.store.active();
                match &active {
                    Some(profile) => {
                        log::info!("resolved active profile {}", profile.phone)
                    }
                    None => log::info!("resolved with no profiles"),
                }
                Ok(active)
            }
            Err(e) => {
                self.store.fail_resolution(e.to_string());
                Err(e)
            }
        }
    }

    pub fn status(&self) -> Resolution {
        self.store.snapshot().resolution
    }

    /// Wait until resolution succeeds or fails.
    pub async fn wait(&self) -> Resolution {
        let mut snapshots = self.store.subscribe();
        let settled = snapshots
            .wait_for(|snapshot| snapshot.resolution.is_terminal())
            .await
            .map(|snapshot| snapshot.resolution.clone());
        match settled {
            Ok(resolution) => resolution,
            Err(_) => self.status(),
        }
    }
}
