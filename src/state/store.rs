//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.
//! Every operation is keyed by husk name.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::Deployment;
use crate::error::{ConfigError, HuskError, Result};

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the deployment record of a husk.
    ///
    /// Returns `None` if the husk has not been initialized.
    async fn load(&self, husk: &str) -> Result<Option<Deployment>>;

    /// Saves a deployment record, backing up the previous one first.
    async fn save(&self, deployment: &Deployment) -> Result<()>;

    /// Deletes the deployment record of a husk, keeping a backup.
    async fn delete(&self, husk: &str) -> Result<()>;

    /// Checks if a record exists for the husk.
    async fn exists(&self, husk: &str) -> Result<bool>;

    /// Lists all husks with a record, sorted by name.
    async fn list(&self) -> Result<Vec<String>>;

    /// Acquires the lock of a husk.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, husk: &str, holder: &str) -> Result<LockInfo>;

    /// Releases the lock of a husk if `lock_id` still owns it.
    async fn release_lock(&self, husk: &str, lock_id: &str) -> Result<()>;

    /// Removes the lock of a husk regardless of its owner.
    async fn force_unlock(&self, husk: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self, husk: &str) -> Result<Option<LockInfo>>;

    /// Checks if the husk is locked by a live lock.
    async fn is_locked(&self, husk: &str) -> Result<bool> {
        Ok(self.get_lock_info(husk).await?.is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self, husk: &str) -> Result<Option<Deployment>> {
        (**self).load(husk).await
    }

    async fn save(&self, deployment: &Deployment) -> Result<()> {
        (**self).save(deployment).await
    }

    async fn delete(&self, husk: &str) -> Result<()> {
        (**self).delete(husk).await
    }

    async fn exists(&self, husk: &str) -> Result<bool> {
        (**self).exists(husk).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        (**self).list().await
    }

    async fn acquire_lock(&self, husk: &str, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(husk, holder).await
    }

    async fn release_lock(&self, husk: &str, lock_id: &str) -> Result<()> {
        (**self).release_lock(husk, lock_id).await
    }

    async fn force_unlock(&self, husk: &str) -> Result<()> {
        (**self).force_unlock(husk).await
    }

    async fn get_lock_info(&self, husk: &str) -> Result<Option<LockInfo>> {
        (**self).get_lock_info(husk).await
    }

    async fn is_locked(&self, husk: &str) -> Result<bool> {
        (**self).is_locked(husk).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Rejects husk names that cannot safely become file names or object keys.
pub(crate) fn ensure_husk_name(husk: &str) -> Result<()> {
    if crate::config::is_valid_husk_name(husk) {
        Ok(())
    } else {
        Err(HuskError::Config(ConfigError::InvalidHuskName {
            name: husk.to_string(),
        }))
    }
}
