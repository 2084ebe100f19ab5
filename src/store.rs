//! The profile collection and the active-identity signal derived from it.

use std::sync::{RwLock, RwLockReadGuard};

use tokio::sync::{watch, Mutex};

use crate::api::ApiClient;
use crate::profile::{Profile, ProfileCollection, SaveAction};
use crate::resolver::Resolution;
use crate::validation::validate;
use crate::{AgriError, Result};

/// What dependents observe: who is active, whether that is known yet,
/// and an epoch that moves whenever they must refetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSnapshot {
    /// Phone of the active profile.
    pub active: Option<String>,
    pub resolution: Resolution,
    pub epoch: u64,
}

impl ProfileSnapshot {
    /// The identity a dependent fetch may be issued for, if any.
    pub fn fetchable(&self) -> Option<&str> {
        match self.resolution {
            Resolution::Resolved => self.active.as_deref(),
            _ => None,
        }
    }
}

/// The collection together with the number of writes committed to it.
/// A listing requested at revision `n` is only applied while the
/// revision is still `n`.
#[derive(Default)]
struct Profiles {
    collection: ProfileCollection,
    revision: u64,
}

/// How a change reached the store.
enum Origin {
    /// A confirmed save or switch. Always moves the epoch.
    Write,
    /// A backend listing requested at the given revision.
    Listing { revision: u64 },
}

/// Sole owner of the [`ProfileCollection`]. Everyone else reads clones or
/// the published [`ProfileSnapshot`].
pub struct ProfileStore {
    api: ApiClient,
    profiles: RwLock<Profiles>,
    writes: Mutex<()>,
    snapshot: watch::Sender<ProfileSnapshot>,
}

impl ProfileStore {
    pub fn new(api: ApiClient) -> Self {
        let (snapshot, _) = watch::channel(ProfileSnapshot::default());
        Self {
            api,
            profiles: RwLock::new(Profiles::default()),
            writes: Mutex::new(()),
            snapshot,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn subscribe(&self) -> watch::Receiver<ProfileSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        self.snapshot.borrow().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Profiles> {
        self.profiles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn profiles(&self) -> ProfileCollection {
        self.read().collection.clone()
    }

    pub fn active(&self) -> Option<Profile> {
        self.read().collection.active().cloned()
    }

    /// Replace the collection with the backend listing. On failure the
    /// previous collection stays as it was. A listing that was requested
    /// before a save or switch committed is dropped, since it predates
    /// that write.
    pub async fn load(&self) -> Result<()> {
        let revision = self.read().revision;
        let listing = self.api.list_profiles().await?;
        let collection = ProfileCollection::from_listing(listing);
        let count = collection.len();
        let origin = Origin::Listing { revision };
        if self.commit(|profiles| *profiles = collection, origin) {
            log::info!("loaded {} profiles", count);
        }
        Ok(())
    }

    /// Validate `draft` and submit it. Validation failures never reach
    /// the backend. Rejected with [`AgriError::Busy`] while another write
    /// is outstanding.
    pub async fn save(&self, draft: Profile) -> Result<SaveAction> {
        validate(&draft)?;
        let _write = self.writes.try_lock().map_err(|_| AgriError::Busy)?;

        let action = self.api.save_profile(&draft).await?;
        log::info!("profile {} saved: {:?}", draft.phone, action);
        self.commit(
            |profiles| match action {
                SaveAction::Created => profiles.upsert(draft, true),
                SaveAction::Updated => profiles.upsert(draft, false),
                SaveAction::Unchanged => {}
            },
            Origin::Write,
        );
        Ok(action)
    }

    /// Make `phone` the active profile, then refresh the collection.
    pub async fn switch_active(&self, phone: &str) -> Result<()> {
        if !self.read().collection.contains(phone) {
            return Err(AgriError::UnknownProfile(phone.to_owned()));
        }
        let _write = self.writes.try_lock().map_err(|_| AgriError::Busy)?;

        let confirmed = self.api.switch_profile(phone).await?;
        let refreshed = match self.api.list_profiles().await {
            Ok(listing) => Some(ProfileCollection::from_listing(listing)),
            Err(e) => {
                log::warn!(
                    "switched to {} but could not refresh profiles: {}",
                    phone,
                    e
                );
                None
            }
        };

        log::info!("active profile is now {}", phone);
        self.commit(
            |profiles| {
                if let Some(refreshed) = refreshed {
                    *profiles = refreshed;
                }
                if !profiles.set_active(phone) {
                    profiles.upsert(confirmed, true);
                }
            },
            Origin::Write,
        );
        Ok(())
    }

    /// A resolution attempt started. A store that already resolved once
    /// stays resolved.
    pub(crate) fn begin_resolution(&self) {
        self.snapshot.send_if_modified(|snapshot| {
            if matches!(snapshot.resolution, Resolution::Failed(_)) {
                snapshot.resolution = Resolution::Pending;
                return true;
            }
            false
        });
    }

    pub(crate) fn fail_resolution(&self, reason: String) {
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.resolution == Resolution::Resolved {
                return false;
            }
            log::error!("active profile could not be resolved: {}", reason);
            snapshot.resolution = Resolution::Failed(reason);
            true
        });
    }

    /// Apply `change` and publish the outcome. The epoch moves on every
    /// write, and on a listing that changed the active identity or the
    /// resolution. Returns `false` when a stale listing was dropped.
    fn commit(
        &self,
        change: impl FnOnce(&mut ProfileCollection),
        origin: Origin,
    ) -> bool {
        let mut profiles = self
            .profiles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let refetch = match origin {
            Origin::Write => {
                profiles.revision += 1;
                true
            }
            Origin::Listing { revision } if revision != profiles.revision => {
                log::debug!(
                    "dropping profile listing from revision {}, now at {}",
                    revision,
                    profiles.revision
                );
                return false;
            }
            Origin::Listing { .. } => false,
        };
        change(&mut profiles.collection);
        let active = profiles.collection.active_phone().map(str::to_owned);

        self.snapshot.send_if_modified(|snapshot| {
            let moved = refetch
                || snapshot.active != active
                || snapshot.resolution != Resolution::Resolved;
            if moved {
                snapshot.active = active;
                snapshot.resolution = Resolution::Resolved;
                snapshot.epoch += 1;
                log::debug!(
                    "profile epoch {} (active: {:?})",
                    snapshot.epoch,
                    snapshot.active
                );
            }
            moved
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{PROFILES_PATH, SWITCH_PROFILE_PATH};
    use crate::locale::LocaleNegotiator;
    use crate::profile::Crop;
    use crate::storage::MemoryPreferences;
    use crate::transport::MemoryTransport;
    use crate::validation::ValidationError;
    use reqwest::Method;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> (ProfileStore, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let locale = Arc::new(LocaleNegotiator::new(
            Arc::new(MemoryPreferences::new()),
            None,
        ));
        let api = ApiClient::new(transport.clone(), locale);
        (ProfileStore::new(api), transport)
    }

    fn profile(phone: &str, active: bool) -> Profile {
        Profile {
            phone: phone.to_owned(),
            name: format!("Farmer {phone}"),
            location: "411001".to_owned(),
            crop: Some(Crop::Rice),
            farm_area: 1.5,
            sms_alerts: true,
            active,
        }
    }

    fn listing(profiles: &[Profile]) -> serde_json::Value {
        json!({"success": true, "data": profiles, "message": "ok"})
    }

    #[tokio::test]
    async fn load_settles_implicit_active() {
        let (store, transport) = store();
        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", false), profile("2", false)]),
        );

        store.load().await.unwrap();
        assert_eq!(store.active().unwrap().phone, "1");
        let snapshot = store.snapshot();
        assert_eq!(snapshot.fetchable(), Some("1"));
        assert_eq!(snapshot.epoch, 1);
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_collection() {
        let (store, transport) = store();
        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", true)]),
        );
        transport.respond(Method::GET, PROFILES_PATH, 500, json!({}));

        store.load().await.unwrap();
        assert!(store.load().await.is_err());
        assert_eq!(store.profiles().len(), 1);
        assert_eq!(store.snapshot().epoch, 1);
    }

    #[tokio::test]
    async fn reload_with_same_active_keeps_epoch() {
        let (store, transport) = store();
        transport.respond_always(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", true)]),
        );
        store.load().await.unwrap();
        store.load().await.unwrap();
        assert_eq!(store.snapshot().epoch, 1);
    }

    #[tokio::test]
    async fn listing_older_than_a_save_is_dropped() {
        let (store, transport) = store();
        let store = Arc::new(store);
        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", true)]),
        );
        store.load().await.unwrap();

        let release = transport.hold(Method::GET, PROFILES_PATH);
        let reload = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.load().await })
        };
        transport.wait_for(&Method::GET, PROFILES_PATH, 2).await;

        transport.respond(Method::POST, PROFILES_PATH, 200, json!({"action": "created"}));
        assert_eq!(
            store.save(profile("2", false)).await.unwrap(),
            SaveAction::Created
        );
        let epoch = store.snapshot().epoch;

        release
            .send(crate::api::ApiResponse::json(
                200,
                &listing(&[profile("1", true)]),
            ))
            .unwrap();
        reload.await.unwrap().unwrap();

        assert_eq!(store.active().unwrap().phone, "2");
        assert_eq!(store.profiles().len(), 2);
        assert_eq!(store.snapshot().epoch, epoch);
        assert_eq!(store.snapshot().active.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn listing_older_than_a_switch_is_dropped() {
        let (store, transport) = store();
        let store = Arc::new(store);
        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", true), profile("2", false)]),
        );
        store.load().await.unwrap();

        let release = transport.hold(Method::GET, PROFILES_PATH);
        let reload = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.load().await })
        };
        transport.wait_for(&Method::GET, PROFILES_PATH, 2).await;

        let path = format!("{SWITCH_PROFILE_PATH}2");
        transport.respond(
            Method::POST,
            &path,
            200,
            json!({"success": true, "data": profile("2", true)}),
        );
        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", false), profile("2", true)]),
        );
        store.switch_active("2").await.unwrap();

        release
            .send(crate::api::ApiResponse::json(
                200,
                &listing(&[profile("1", true), profile("2", false)]),
            ))
            .unwrap();
        reload.await.unwrap().unwrap();

        assert_eq!(store.active().unwrap().phone, "2");
        assert_eq!(store.profiles().active_count(), 1);
        assert_eq!(store.snapshot().fetchable(), Some("2"));
    }

    #[tokio::test]
    async fn listing_after_a_save_still_applies() {
        let (store, transport) = store();
        transport.respond(Method::POST, PROFILES_PATH, 200, json!({"action": "created"}));
        store.save(profile("1", false)).await.unwrap();

        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", false), profile("2", true)]),
        );
        store.load().await.unwrap();
        assert_eq!(store.active().unwrap().phone, "2");
        assert_eq!(store.profiles().len(), 2);
    }

    #[tokio::test]
    async fn invalid_draft_never_reaches_backend() {
        let (store, transport) = store();
        let draft = Profile {
            location: "12345".to_owned(),
            ..profile("1", false)
        };
        match store.save(draft).await {
            Err(AgriError::Validation(ValidationError::InvalidPostalCode)) => {}
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn save_results_are_applied() {
        let (store, transport) = store();
        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", true)]),
        );
        store.load().await.unwrap();

        transport.respond(Method::POST, PROFILES_PATH, 200, json!({"action": "created"}));
        assert_eq!(
            store.save(profile("2", false)).await.unwrap(),
            SaveAction::Created
        );
        assert_eq!(store.active().unwrap().phone, "2");
        assert_eq!(store.profiles().active_count(), 1);
        assert_eq!(store.snapshot().epoch, 2);

        transport.respond(Method::POST, PROFILES_PATH, 200, json!({"action": "updated"}));
        let renamed = Profile {
            name: "Sita".to_owned(),
            ..profile("1", false)
        };
        assert_eq!(store.save(renamed).await.unwrap(), SaveAction::Updated);
        let profiles = store.profiles();
        assert_eq!(profiles.get("1").unwrap().name, "Sita");
        assert!(!profiles.get("1").unwrap().active);
        assert_eq!(store.snapshot().active.as_deref(), Some("2"));
        assert_eq!(store.snapshot().epoch, 3);

        transport.respond(Method::POST, PROFILES_PATH, 200, json!({"action": "none"}));
        assert_eq!(
            store.save(profile("2", true)).await.unwrap(),
            SaveAction::Unchanged
        );
        assert_eq!(store.profiles().len(), 2);
        assert_eq!(store.snapshot().epoch, 4);
    }

    #[tokio::test]
    async fn failed_save_changes_nothing() {
        let (store, transport) = store();
        transport.respond(
            Method::POST,
            PROFILES_PATH,
            400,
            json!({"detail": "Phone already registered"}),
        );
        match store.save(profile("1", false)).await {
            Err(AgriError::Save { reason }) => {
                assert_eq!(reason, "Phone already registered")
            }
            other => panic!("expected save error, got {other:?}"),
        }
        assert!(store.profiles().is_empty());
        assert_eq!(store.snapshot(), ProfileSnapshot::default());
    }

    #[tokio::test]
    async fn second_write_is_busy() {
        let (store, transport) = store();
        let store = Arc::new(store);
        let release = transport.hold(Method::POST, PROFILES_PATH);

        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.save(profile("1", false)).await })
        };
        transport.wait_for(&Method::POST, PROFILES_PATH, 1).await;

        assert!(matches!(
            store.save(profile("2", false)).await,
            Err(AgriError::Busy)
        ));

        release
            .send(crate::api::ApiResponse::json(200, &json!({"action": "created"})))
            .unwrap();
        assert_eq!(first.await.unwrap().unwrap(), SaveAction::Created);
        assert_eq!(transport.count(&Method::POST, PROFILES_PATH), 1);
    }

    #[tokio::test]
    async fn unknown_switch_target() {
        let (store, transport) = store();
        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", true)]),
        );
        store.load().await.unwrap();
        let before = store.profiles();

        match store.switch_active("9999999999").await {
            Err(AgriError::UnknownProfile(phone)) => {
                assert_eq!(phone, "9999999999")
            }
            other => panic!("expected unknown profile, got {other:?}"),
        }
        assert_eq!(store.profiles(), before);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn switch_refreshes_collection() {
        let (store, transport) = store();
        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", true), profile("2", false)]),
        );
        store.load().await.unwrap();

        let path = format!("{SWITCH_PROFILE_PATH}2");
        transport.respond(
            Method::POST,
            &path,
            200,
            json!({"success": true, "data": profile("2", true)}),
        );
        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", false), profile("2", true)]),
        );

        store.switch_active("2").await.unwrap();
        assert_eq!(store.active().unwrap().phone, "2");
        assert_eq!(store.profiles().active_count(), 1);
        assert_eq!(store.snapshot().epoch, 2);
        assert_eq!(transport.count(&Method::GET, PROFILES_PATH), 2);
    }

    #[tokio::test]
    async fn switch_survives_failed_refresh() {
        let (store, transport) = store();
        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", true), profile("2", false)]),
        );
        store.load().await.unwrap();

        let path = format!("{SWITCH_PROFILE_PATH}2");
        transport.respond(
            Method::POST,
            &path,
            200,
            json!({"success": true, "data": profile("2", true)}),
        );
        transport.fail(Method::GET, PROFILES_PATH, "connection reset");

        store.switch_active("2").await.unwrap();
        assert_eq!(store.active().unwrap().phone, "2");
        assert_eq!(store.profiles().active_count(), 1);
    }

    #[tokio::test]
    async fn rejected_switch_leaves_collection() {
        let (store, transport) = store();
        transport.respond(
            Method::GET,
            PROFILES_PATH,
            200,
            listing(&[profile("1", true), profile("2", false)]),
        );
        store.load().await.unwrap();
        let before = store.profiles();

        let path = format!("{SWITCH_PROFILE_PATH}2");
        transport.respond(
            Method::POST,
            &path,
            404,
            json!({"detail": "Profile not found"}),
        );
        match store.switch_active("2").await {
            Err(AgriError::Switch { phone, reason }) => {
                assert_eq!(phone, "2");
                assert_eq!(reason, "Profile not found");
            }
            other => panic!("expected switch error, got {other:?}"),
        }
        assert_eq!(store.profiles(), before);
        assert_eq!(store.snapshot().epoch, 1);
    }
}
