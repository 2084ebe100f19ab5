use std::sync::Arc;

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::coordinator::DependentFetchCoordinator;
use crate::locale::LocaleNegotiator;
use crate::profile::Profile;
use crate::resolver::ActiveProfileResolver;
use crate::resources::DependentResource;
use crate::storage::{FilePreferences, PreferenceStore};
use crate::store::ProfileStore;
use crate::transport::{HttpTransport, Transport};
use crate::Result;

const PREFERENCES_DIR: &str = "preferences";

/// Everything one client session shares: the locale, the API client and
/// the profile store every dependent page observes.
pub struct Session {
    config: ClientConfig,
    locale: Arc<LocaleNegotiator>,
    api: ApiClient,
    store: Arc<ProfileStore>,
    resolver: ActiveProfileResolver,
}

impl Session {
    /// Session against the configured backend, with preferences kept
    /// under the configured data directory.
    pub fn open(config: ClientConfig) -> Result<Self> {
        let preferences = FilePreferences::open(
            PREFERENCES_DIR,
            &config.data_dir.join(PREFERENCES_DIR),
        )?;
        let transport = HttpTransport::new(&config)?;
        log::info!("session against {}", transport.base_url());
        Ok(Self::with_parts(
            config,
            Arc::new(preferences),
            Arc::new(transport),
        ))
    }

    pub fn with_parts(
        config: ClientConfig,
        preferences: Arc<dyn PreferenceStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let locale = Arc::new(LocaleNegotiator::new(
            preferences,
            config.platform_language.as_deref(),
        ));
        let api = ApiClient::new(transport, Arc::clone(&locale));
        let store = Arc::new(ProfileStore::new(api.clone()));
        let resolver = ActiveProfileResolver::new(Arc::clone(&store));
        Self {
            config,
            locale,
            api,
            store,
            resolver,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn locale(&self) -> &LocaleNegotiator {
        &self.locale
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    pub fn resolver(&self) -> &ActiveProfileResolver {
        &self.resolver
    }

    /// Resolve the active profile; see [`ActiveProfileResolver::resolve`].
    pub async fn start(&self) -> Result<Option<Profile>> {
        self.resolver.resolve().await
    }

    /// A mounted coordinator for a page showing `R`.
    pub fn page<R: DependentResource>(
        &self,
    ) -> Arc<DependentFetchCoordinator<R>> {
        let page = DependentFetchCoordinator::new(Arc::clone(&self.store));
        page.mount();
        page
    }
}
