//! Persistent storage of husk deployment records.
//!
//! Each husk has one record holding its latest snapshot and apply history,
//! plus a lock preventing concurrent applies. Records are written with a
//! backup of the previous version kept alongside.

mod encoding;
mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use encoding::Encoding;
pub use local::{HUSKS_DIR, LocalStateStore, export_record};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{Deployment, DeploymentHistoryEntry, DeploymentOperation, MAX_HISTORY, STATE_VERSION};

use tracing::debug;

use crate::config::{EngineConfig, StateBackend};
use crate::error::{ConfigError, HuskError, Result};

/// Opens the state store selected by the configuration.
///
/// # Errors
///
/// Returns an error if the S3 backend has no bucket or cannot be initialized.
pub async fn open_store(config: &EngineConfig) -> Result<Box<dyn StateStore>> {
    let store: Box<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            debug!("Using local state in {}", config.husks_dir().display());
            Box::new(
                LocalStateStore::new(&config.workspace)
                    .with_encoding(config.state.format)
                    .with_lock_expiry(config.lock_expiry_secs),
            )
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| HuskError::Config(ConfigError::validation("S3 backend requires a bucket", "state.bucket")))?;
            debug!("Using S3 state in bucket {bucket}");
            Box::new(
                S3StateStore::new(bucket, config.state.prefix.as_deref(), config.state.region.as_deref())
                    .await?
                    .with_encoding(config.state.format)
                    .with_lock_expiry(config.lock_expiry_secs),
            )
        }
    };
    Ok(store)
}
