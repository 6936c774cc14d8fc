use std::path::PathBuf;
use std::sync::Arc;

use propdesk_core::{ConfigManager, Result, Settings};
use propdesk_integrations::stripe::PriceCatalog;
use propdesk_integrations::{
    mailer_from_config, push_from_config, search_from_config, Mailer, PushProvider,
    RailwayClient, SearchIndexer, StripeClient,
};
use propdesk_store::SqliteStore;
use tracing::info;

use crate::auth::{LoginLimiter, TokenService};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: SqliteStore,
    pub tokens: Arc<TokenService>,
    pub login_limiter: Arc<LoginLimiter>,
    pub mailer: Arc<dyn Mailer>,
    pub push: Arc<dyn PushProvider>,
    pub search: Arc<dyn SearchIndexer>,
    pub stripe: Option<Arc<StripeClient>>,
    pub prices: Arc<PriceCatalog>,
    pub railway: Option<Arc<RailwayClient>>,
}

impl AppState {
    pub async fn new(config: Arc<ConfigManager>) -> Result<Self> {
        let settings = config.settings();

        let store =
            SqliteStore::connect(&settings.database.url, settings.database.max_connections).await?;
        if settings.database.auto_migrate {
            store.run_migrations().await?;
        }

        let state = Self::with_store(settings, store)?;
        info!(
            stripe = state.stripe.is_some(),
            railway = state.railway.is_some(),
            "application state ready"
        );
        Ok(state)
    }

    /// Builds the state around an existing store, wiring the integrations
    /// from `settings`.
    pub fn with_store(settings: Arc<Settings>, store: SqliteStore) -> Result<Self> {
        Ok(Self {
            tokens: Arc::new(TokenService::from_settings(&settings)),
            login_limiter: Arc::new(LoginLimiter::new(settings.security.login_attempts_per_minute)),
            mailer: mailer_from_config(&settings.email)?,
            push: push_from_config(&settings.push)?,
            search: search_from_config(&settings.search)?,
            stripe: StripeClient::from_config(&settings.stripe)?.map(Arc::new),
            prices: Arc::new(PriceCatalog::from_config(&settings.stripe)),
            railway: RailwayClient::from_config(&settings.railway)?.map(Arc::new),
            store,
            settings,
        })
    }

    pub fn backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.settings.backups.dir)
    }

    /// Absolute link into the web app.
    pub fn app_link(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.settings.email.app_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
