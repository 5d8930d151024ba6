use std::sync::Arc;

use crate::auth::{
    credentials::CredentialStore,
    jwt::JwtKeys,
    memory::InMemoryUserStore,
    repo::{PgUserStore, UserStore},
    services::warm_dummy_hash,
};
use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub credentials: CredentialStore,
    pub keys: JwtKeys,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let users: Arc<dyn UserStore> = match &config.database_url {
            Some(url) => Arc::new(PgUserStore::new(db::connect(url).await?)),
            None => {
                tracing::warn!("DATABASE_URL not set; users live in memory and vanish on restart");
                Arc::new(InMemoryUserStore::new())
            }
        };

        tokio::task::spawn_blocking(warm_dummy_hash).await?;

        Ok(Self::from_parts(config, users))
    }

    pub fn from_parts(config: AppConfig, users: Arc<dyn UserStore>) -> Self {
        let keys = JwtKeys::from_config(&config.jwt);
        Self {
            config: Arc::new(config),
            credentials: CredentialStore::new(users),
            keys,
        }
    }

    /// Fresh state over an empty in-memory store.
    pub fn in_memory(config: AppConfig) -> Self {
        Self::from_parts(config, Arc::new(InMemoryUserStore::new()))
    }
}
