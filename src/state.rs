use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::auth::{
    repo::{PgUserStore, UserStore},
    repo_types::Provider,
};
use crate::config::AppConfig;
use crate::oauth::client::{IdentityProvider, OidcClient};
use crate::views::{PlainRenderer, Renderer};

pub type Providers = HashMap<Provider, Arc<dyn IdentityProvider>>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub providers: Arc<Providers>,
    pub renderer: Arc<dyn Renderer>,
}

impl AppState {
    /// Connects the pool and builds the provider clients. Returns the pool so
    /// the caller can run migrations before serving.
    pub async fn init(config: AppConfig) -> anyhow::Result<(Self, PgPool)> {
        let config = Arc::new(config);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let google = OidcClient::new(
            Provider::Google,
            &config.oauth.google,
            config.callback_url(Provider::Google.as_str())?,
            config.oauth.http_timeout,
            config.oauth.discovery_ttl,
        )?;
        let mut providers = Providers::new();
        providers.insert(Provider::Google, Arc::new(google) as Arc<dyn IdentityProvider>);

        let state = Self::from_parts(
            config,
            Arc::new(PgUserStore::new(db.clone())),
            providers,
            Arc::new(PlainRenderer),
        );
        Ok((state, db))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        providers: Providers,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            config,
            users,
            providers: Arc::new(providers),
            renderer,
        }
    }
}
