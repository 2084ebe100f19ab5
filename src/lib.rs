//! Client-side orchestration for the AgriTwin farm advisory backend.
//!
//! A [`Session`] ties together the pieces a front end needs:
//!
//! - [`LocaleNegotiator`] stamps the selected language onto every
//!   request and remembers the choice across sessions.
//! - [`ProfileStore`] owns the farmer profiles and publishes which one
//!   is active.
//! - [`ActiveProfileResolver`] loads the profiles once at startup.
//! - [`DependentFetchCoordinator`] fetches a profile-scoped resource for
//!   a page and refetches whenever the active profile changes.

use std::sync::Once;

pub mod api;
pub mod atomic;
pub mod config;
pub mod coordinator;
mod errors;
pub mod locale;
pub mod profile;
pub mod resolver;
pub mod resources;
pub mod session;
pub mod storage;
pub mod store;
pub mod transport;
pub mod validation;

pub use api::{ApiClient, ApiRequest, ApiResponse, LocalizedRequest};
pub use config::ClientConfig;
pub use coordinator::{DependentFetchCoordinator, FetchState};
pub use errors::{AgriError, Result};
pub use locale::{Locale, LocaleNegotiator};
pub use profile::{Crop, Profile, ProfileCollection, SaveAction};
pub use resolver::{ActiveProfileResolver, Resolution};
pub use resources::{
    AdvisorDashboard, DependentResource, ForecastReport, IrrigationPlan,
};
pub use session::Session;
pub use store::{ProfileSnapshot, ProfileStore};
pub use validation::{validate, ValidationError};

/// Default directory for client state, relative to the working directory.
pub const AGRITWIN_FOLDER: &str = ".agritwin";

pub static INIT: Once = Once::new();

/// Install the logger. Safe to call any number of times.
pub fn initialize() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(cfg!(test)).try_init();
        log::info!("Initializing agritwin");
    });
}
