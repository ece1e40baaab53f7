use std::sync::Arc;

use anyhow::{Context, Result};
use contestmate_cache::KvStore;
use contestmate_schema::UserProfile;
use tracing::{info, warn};

pub const USER_KEY: &str = "user";
pub const TOKEN_KEY: &str = "token";

/// The signed-in user, persisted in the durable store next to the cache.
#[derive(Clone)]
pub struct Identity {
    store: Arc<dyn KvStore>,
}

impl Identity {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// `None` when nobody is signed in or the stored profile is unreadable.
    pub fn current_user(&self) -> Option<UserProfile> {
        let raw = match self.store.get(USER_KEY) {
            Ok(raw) => raw?,
            Err(error) => {
                warn!(%error, "failed to read stored user");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(error) => {
                warn!(%error, "stored user profile is malformed");
                None
            }
        }
    }

    pub fn token(&self) -> Option<String> {
        self.store
            .get(TOKEN_KEY)
            .unwrap_or_else(|error| {
                warn!(%error, "failed to read stored token");
                None
            })
            .filter(|t| !t.trim().is_empty())
    }

    pub fn login(&self, profile: &UserProfile, token: Option<&str>) -> Result<()> {
        let encoded = serde_json::to_string(profile).context("failed to encode user profile")?;
        self.store.set(USER_KEY, &encoded)?;
        match token {
            Some(token) => self.store.set(TOKEN_KEY, token)?,
            None => self.store.remove(TOKEN_KEY)?,
        }
        info!(user = %profile.id, "signed in");
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        self.store.remove(USER_KEY)?;
        self.store.remove(TOKEN_KEY)?;
        info!("signed out");
        Ok(())
    }
}
