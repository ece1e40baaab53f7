use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use contestmate_api::HttpBackend;
use contestmate_cache::{CacheLayer, KvStore, SqliteKvStore};
use contestmate_core::{ChatSessionController, ClientConfig, ConversationStore, Identity, InsightsLoader};
use contestmate_schema::UserProfile;

pub const STORE_FILE: &str = "store.db";

/// Everything a command needs, wired from the data directory.
pub struct App {
    pub config: ClientConfig,
    pub cache: Arc<CacheLayer>,
    pub identity: Identity,
    backend: Arc<HttpBackend>,
}

impl App {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let config = ClientConfig::load(data_dir)?;
        let store_path = data_dir.join(STORE_FILE);
        let kv: Arc<dyn KvStore> = Arc::new(
            SqliteKvStore::open(&store_path)
                .with_context(|| format!("failed to open store: {}", store_path.display()))?,
        );
        let identity = Identity::new(Arc::clone(&kv));
        let backend = HttpBackend::new(config.api_base_url.clone(), config.request_timeout())
            .with_token(identity.token());
        tracing::debug!(base_url = %backend.base_url(), "backend configured");

        Ok(Self {
            config,
            cache: Arc::new(CacheLayer::new(kv)),
            identity,
            backend: Arc::new(backend),
        })
    }

    pub fn require_user(&self) -> Result<UserProfile> {
        self.identity
            .current_user()
            .context("nobody is signed in; run `contestmate login <user-id>` first")
    }

    pub fn controller(&self) -> ChatSessionController {
        ChatSessionController::new(
            self.backend.clone(),
            Arc::new(ConversationStore::new(self.backend.clone())),
            Arc::clone(&self.cache),
            self.identity.clone(),
            self.config.clone(),
        )
    }

    pub fn insights(&self) -> InsightsLoader {
        InsightsLoader::new(self.backend.clone(), Arc::clone(&self.cache))
    }
}
