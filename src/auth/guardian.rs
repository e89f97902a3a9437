//! Credential guardian: hands out a valid credential, refreshing on expiry

use super::credential::{Credential, CredentialStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Exchanges a refresh token for a new credential.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credential: &Credential) -> Result<Credential>;
}

/// Full (interactive) authorization, used when no credential exists or
/// refreshing fails.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self) -> Result<Credential>;
}

/// Owns the credential and serializes every read-modify-write on it.
///
/// All stages share one guardian; the mutex guarantees that two callers
/// seeing an expired credential at the same time cause a single refresh.
pub struct CredentialGuardian {
    store: CredentialStore,
    refresher: Arc<dyn TokenRefresher>,
    authorizer: Arc<dyn Authorizer>,
    current: Mutex<Option<Credential>>,
}

impl CredentialGuardian {
    pub fn new(
        store: CredentialStore,
        refresher: Arc<dyn TokenRefresher>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            store,
            refresher,
            authorizer,
            current: Mutex::new(None),
        }
    }

    /// Return a credential that is not past its expiry.
    ///
    /// Loads the persisted credential on first use. An expired credential
    /// is refreshed; if refreshing fails, full authorization is attempted.
    /// The store is overwritten whenever the credential changes.
    pub async fn acquire(&self) -> Result<Credential> {
        let mut current = self.current.lock().await;

        let credential = match current.take() {
            Some(credential) => credential,
            None => match self.store.load().await? {
                Some(credential) => credential,
                None => {
                    tracing::info!("No stored credential, starting authorization");
                    let credential = self.authorize().await?;
                    self.store.save(&credential).await?;
                    credential
                }
            },
        };

        if !credential.is_expired_at(Utc::now()) {
            *current = Some(credential.clone());
            return Ok(credential);
        }

        tracing::debug!(expiry = %credential.expiry, "Credential expired, refreshing");
        let renewed = match self.refresher.refresh(&credential).await {
            Ok(renewed) => renewed,
            Err(e) => {
                tracing::warn!("Credential refresh failed, re-authorizing: {}", e);
                self.authorize().await?
            }
        };

        if renewed != credential {
            self.store.save(&renewed).await?;
        }
        *current = Some(renewed.clone());
        Ok(renewed)
    }

    async fn authorize(&self) -> Result<Credential> {
        self.authorizer.authorize().await.map_err(|e| match e {
            Error::Auth(msg) => Error::Auth(msg),
            other => Error::Auth(format!("Authorization failed: {}", other)),
        })
    }
}
