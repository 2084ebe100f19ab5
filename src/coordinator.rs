//! Per-page fetch sequencing for profile-scoped resources.
//!
//! A mounted coordinator follows the store's [`ProfileSnapshot`]. Each
//! time the snapshot epoch moves it starts a new generation: anything
//! fetched for an older generation is dropped on arrival, so a slow
//! response for a previous profile can never replace a newer one.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::resources::DependentResource;
use crate::store::{ProfileSnapshot, ProfileStore};
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchState<R> {
    Idle,
    AwaitingProfile,
    Fetching { phone: String },
    Ready { phone: String, resource: R },
    Failed { phone: String, reason: String },
}

impl<R> FetchState<R> {
    pub fn is_settled(&self) -> bool {
        matches!(self, FetchState::Ready { .. } | FetchState::Failed { .. })
    }

    /// The identity this state belongs to, if any.
    pub fn phone(&self) -> Option<&str> {
        match self {
            FetchState::Fetching { phone }
            | FetchState::Ready { phone, .. }
            | FetchState::Failed { phone, .. } => Some(phone),
            FetchState::Idle | FetchState::AwaitingProfile => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FetchState::Idle => "idle",
            FetchState::AwaitingProfile => "awaiting profile",
            FetchState::Fetching { .. } => "fetching",
            FetchState::Ready { .. } => "ready",
            FetchState::Failed { .. } => "failed",
        }
    }
}

/// The identity a fetch was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchTicket {
    generation: u64,
    phone: String,
}

#[derive(Default)]
struct Cursor {
    generation: u64,
    seen_epoch: Option<u64>,
    mounted: bool,
}

pub struct DependentFetchCoordinator<R: DependentResource> {
    me: Weak<Self>,
    store: Arc<ProfileStore>,
    cursor: Mutex<Cursor>,
    state: watch::Sender<FetchState<R>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<R: DependentResource> DependentFetchCoordinator<R> {
    pub fn new(store: Arc<ProfileStore>) -> Arc<Self> {
        let (state, _) = watch::channel(FetchState::Idle);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            store,
            cursor: Mutex::new(Cursor::default()),
            state,
            driver: Mutex::new(None),
        })
    }

    /// Current page state, caught up with the latest profile snapshot:
    /// right after a switch this already shows the new identity.
    pub fn state(&self) -> FetchState<R> {
        self.catch_up();
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<R>> {
        self.state.subscribe()
    }

    /// Start following the active profile. Must be called from within a
    /// tokio runtime.
    pub fn mount(&self) {
        {
            let mut cursor = self.cursor();
            if cursor.mounted {
                return;
            }
            cursor.mounted = true;
            cursor.seen_epoch = None;
            self.publish(&cursor, FetchState::AwaitingProfile);
        }

        let snapshots = self.store.subscribe();
        let driver = tokio::spawn(Self::drive(self.me.clone(), snapshots));
        if let Some(previous) = self.driver().replace(driver) {
            previous.abort();
        }
    }

    /// Stop following the active profile. Responses still in flight are
    /// dropped when they arrive.
    pub fn unmount(&self) {
        if let Some(driver) = self.driver().take() {
            driver.abort();
        }
        let mut cursor = self.cursor();
        if !cursor.mounted {
            return;
        }
        cursor.mounted = false;
        cursor.generation += 1;
        cursor.seen_epoch = None;
        self.publish(&cursor, FetchState::Idle);
    }

    /// Fetch again for the current active profile. Does nothing while
    /// unmounted or before the profile is resolved.
    pub fn reload(&self) {
        let snapshot = self.store.snapshot();
        let mut cursor = self.cursor();
        if !cursor.mounted {
            return;
        }
        match snapshot.fetchable() {
            Some(phone) => {
                log::debug!("manual reload of {} for {}", R::NAME, phone);
                self.start(&mut cursor, phone.to_owned());
            }
            None => {
                log::debug!("ignoring reload of {}, no active profile", R::NAME)
            }
        }
    }

    /// Wait until the page shows a resource or an error for the profile
    /// that is active now. Does not return while no profile exists.
    pub async fn settled(&self) -> FetchState<R> {
        self.catch_up();
        let mut states = self.state.subscribe();
        let settled = states
            .wait_for(|state| {
                state.is_settled()
                    && state.phone() == self.store.snapshot().fetchable()
            })
            .await
            .map(|state| state.clone());
        match settled {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Apply the outcome of the fetch issued for `ticket`. Returns
    /// `false` when the ticket is stale and the outcome was dropped.
    pub(crate) fn complete(
        &self,
        ticket: &FetchTicket,
        result: Result<R>,
    ) -> bool {
        let cursor = self.cursor();
        if !cursor.mounted || cursor.generation != ticket.generation {
            log::debug!(
                "discarding {} response for {} (generation {}, current {})",
                R::NAME,
                ticket.phone,
                ticket.generation,
                cursor.generation
            );
            return false;
        }
        let phone = ticket.phone.clone();
        let next = match result {
            Ok(resource) => FetchState::Ready { phone, resource },
            Err(e) => {
                log::warn!("fetching {} for {} failed: {}", R::NAME, phone, e);
                FetchState::Failed {
                    phone,
                    reason: e.to_string(),
                }
            }
        };
        self.publish(&cursor, next);
        true
    }

    async fn drive(
        coordinator: Weak<Self>,
        mut snapshots: watch::Receiver<ProfileSnapshot>,
    ) {
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            match coordinator.upgrade() {
                Some(coordinator) => coordinator.observe(&snapshot),
                None => return,
            }
            if snapshots.changed().await.is_err() {
                return;
            }
        }
    }

    /// Apply the latest snapshot now instead of waiting for the driver.
    fn catch_up(&self) {
        let snapshot = self.store.snapshot();
        self.observe(&snapshot);
    }

    fn observe(&self, snapshot: &ProfileSnapshot) {
        let mut cursor = self.cursor();
        // the driver and `catch_up` may race; epochs only move forward
        let seen = matches!(
            cursor.seen_epoch,
            Some(epoch) if epoch >= snapshot.epoch
        );
        if !cursor.mounted || seen {
            return;
        }
        cursor.seen_epoch = Some(snapshot.epoch);
        match snapshot.fetchable() {
            Some(phone) => self.start(&mut cursor, phone.to_owned()),
            None => {
                cursor.generation += 1;
                self.publish(&cursor, FetchState::AwaitingProfile);
            }
        }
    }

    fn start(&self, cursor: &mut Cursor, phone: String) {
        cursor.generation += 1;
        let ticket = FetchTicket {
            generation: cursor.generation,
            phone: phone.clone(),
        };
        self.publish(cursor, FetchState::Fetching { phone });

        let Some(coordinator) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let result = coordinator.store.api().fetch::<R>().await;
            coordinator.complete(&ticket, result);
        });
    }

    /// Callers hold the cursor so transitions are published in order.
    fn publish(&self, cursor: &Cursor, next: FetchState<R>) {
        let previous = self.state.send_replace(next);
        log::debug!(
            "{} page: {} -> {} (generation {})",
            R::NAME,
            previous.label(),
            self.state.borrow().label(),
            cursor.generation
        );
    }

    fn cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn driver(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<R: DependentResource> Drop for DependentFetchCoordinator<R> {
    fn drop(&mut self) {
        let driver = self
            .driver
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(driver) = driver {
            driver.abort();
        }
    }
}
