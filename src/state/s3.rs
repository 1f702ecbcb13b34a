//! S3-based state storage backend.
//!
//! Records are stored as `<prefix>husks/<husk>.<ext>`. Before a record is
//! overwritten or deleted it is copied to `<key>.bak`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info, warn};

use crate::error::{HuskError, Result, StateError};

use super::encoding::Encoding;
use super::local::HUSKS_DIR;
use super::lock::{LOCK_EXPIRY_SECS, LockInfo, holder_or_generated};
use super::store::{StateStore, ensure_husk_name};
use super::types::Deployment;

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix, empty or ending in `/`.
    prefix: String,
    /// Encoding of newly created records.
    encoding: Encoding,
    /// Lifetime of acquired locks.
    lock_expiry_secs: i64,
}

impl S3StateStore {
    /// Creates a new S3 state store.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// Creates a new S3 state store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
            encoding: Encoding::default(),
            lock_expiry_secs: LOCK_EXPIRY_SECS,
        }
    }

    /// Sets the encoding used for new records.
    #[must_use]
    pub const fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets the lifetime of acquired locks.
    #[must_use]
    pub const fn with_lock_expiry(mut self, secs: i64) -> Self {
        self.lock_expiry_secs = secs;
        self
    }

    /// Key prefix under which all husks live.
    fn husks_prefix(&self) -> String {
        format!("{}{HUSKS_DIR}/", self.prefix)
    }

    fn record_key(&self, husk: &str, encoding: Encoding) -> String {
        format!("{}{husk}.{}", self.husks_prefix(), encoding.extension())
    }

    fn lock_key(&self, husk: &str) -> String {
        format!("{}{husk}.lock", self.husks_prefix())
    }

    /// Finds the key of an existing record, preferring the configured encoding.
    async fn find_record(&self, husk: &str) -> Result<Option<(String, Encoding)>> {
        let mut candidates = vec![self.encoding];
        candidates.extend([Encoding::Json, Encoding::Yaml].into_iter().filter(|e| *e != self.encoding));
        for encoding in candidates {
            let key = self.record_key(husk, encoding);
            if self.object_exists(&key).await? {
                return Ok(Some((key, encoding)));
            }
        }
        Ok(None)
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self.client.get_object().bucket(&self.bucket).key(key).send().await;

        match result {
            Ok(response) => {
                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| StateError::s3(format!("Failed to read S3 object: {e}")))?;

                let content = String::from_utf8(bytes.to_vec())
                    .map_err(|e| StateError::corrupted(format!("Invalid UTF-8 in S3 object: {e}")))?;

                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(HuskError::State(StateError::s3(format!("S3 get error: {service_err}"))))
                }
            }
        }
    }

    /// Puts an object to S3.
    async fn put_object(&self, key: &str, content: &str, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.as_bytes().to_vec().into())
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 put error: {e}")))?;

        Ok(())
    }

    /// Copies an object to `<key>.bak`.
    async fn backup_object(&self, key: &str) -> Result<()> {
        let backup = format!("{key}.bak");
        debug!("Backing up s3://{}/{key} to {backup}", self.bucket);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{key}", self.bucket))
            .key(&backup)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 backup error: {e}")))?;
        Ok(())
    }

    /// Deletes an object from S3.
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("S3 delete error: {e}")))?;

        Ok(())
    }

    /// Checks if an object exists in S3.
    async fn object_exists(&self, key: &str) -> Result<bool> {
        let result = self.client.head_object().bucket(&self.bucket).key(key).send().await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(HuskError::State(StateError::s3(format!("S3 head error: {service_err}"))))
                }
            }
        }
    }

    async fn read_lock(&self, husk: &str) -> Result<Option<LockInfo>> {
        let Some(content) = self.get_object(&self.lock_key(husk)).await? else {
            return Ok(None);
        };
        let lock_info: LockInfo = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse lock: {e}")))?;
        Ok(Some(lock_info))
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self, husk: &str) -> Result<Option<Deployment>> {
        ensure_husk_name(husk)?;
        let Some((key, encoding)) = self.find_record(husk).await? else {
            debug!("No record for husk {husk} in s3://{}", self.bucket);
            return Ok(None);
        };

        debug!("Loading state from s3://{}/{key}", self.bucket);
        let Some(content) = self.get_object(&key).await? else {
            return Ok(None);
        };

        let deployment: Deployment = encoding
            .unmarshal(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse {key}: {e}")))?;
        deployment.check_version()?;

        info!("Loaded state for husk: {}", deployment.husk);
        Ok(Some(deployment))
    }

    async fn save(&self, deployment: &Deployment) -> Result<()> {
        ensure_husk_name(&deployment.husk)?;

        let (key, encoding) = match self.find_record(&deployment.husk).await? {
            Some((key, encoding)) => {
                self.backup_object(&key).await?;
                (key, encoding)
            }
            None => (self.record_key(&deployment.husk, self.encoding), self.encoding),
        };

        info!("Saving state to s3://{}/{key}", self.bucket);
        let content = encoding.marshal(deployment)?;
        let content_type = match encoding {
            Encoding::Json => "application/json",
            Encoding::Yaml => "application/yaml",
        };
        self.put_object(&key, &content, content_type).await?;

        debug!("State saved successfully to S3");
        Ok(())
    }

    async fn delete(&self, husk: &str) -> Result<()> {
        ensure_husk_name(husk)?;
        if let Some((key, _)) = self.find_record(husk).await? {
            info!("Deleting state from s3://{}/{key}", self.bucket);
            self.backup_object(&key).await?;
            self.delete_object(&key).await?;
        }
        self.delete_object(&self.lock_key(husk)).await
    }

    async fn exists(&self, husk: &str) -> Result<bool> {
        ensure_husk_name(husk)?;
        Ok(self.find_record(husk).await?.is_some())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let prefix = self.husks_prefix();
        let mut husks = BTreeSet::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StateError::s3(format!("S3 list error: {e}")))?;

            for object in response.contents() {
                let Some(name) = object.key().and_then(|k| k.strip_prefix(&prefix)) else {
                    continue;
                };
                if let Some(husk) = husk_of_record(name) {
                    husks.insert(husk.to_string());
                }
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(husks.into_iter().collect())
    }

    async fn acquire_lock(&self, husk: &str, holder: &str) -> Result<LockInfo> {
        ensure_husk_name(husk)?;

        if let Some(existing) = self.read_lock(husk).await? {
            if !existing.is_expired() {
                return Err(HuskError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            warn!("Expired lock of {husk} held by {} found, taking over", existing.holder);
        }

        let lock_info = LockInfo::new(husk, &holder_or_generated(holder), self.lock_expiry_secs);
        let content = serde_json::to_string_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        self.put_object(&self.lock_key(husk), &content, "application/json").await?;

        info!(
            "Acquired state lock of {husk}: {} (expires in {}s)",
            lock_info.lock_id, self.lock_expiry_secs
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, husk: &str, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock(husk).await? {
            if existing.lock_id == lock_id {
                self.delete_object(&self.lock_key(husk)).await?;
                info!("Released state lock of {husk}: {lock_id}");
            } else {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
        }

        Ok(())
    }

    async fn force_unlock(&self, husk: &str) -> Result<()> {
        ensure_husk_name(husk)?;
        if let Some(existing) = self.read_lock(husk).await? {
            warn!("Force unlocking {husk}, lock held by {}", existing.holder);
            self.delete_object(&self.lock_key(husk)).await?;
        }
        Ok(())
    }

    async fn get_lock_info(&self, husk: &str) -> Result<Option<LockInfo>> {
        ensure_husk_name(husk)?;
        self.read_lock(husk).await
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() { String::new() } else { format!("{p}/") }
        })
        .unwrap_or_default()
}

/// Husk name of a record object name, `None` for backups, locks and nested keys.
fn husk_of_record(name: &str) -> Option<&str> {
    if name.contains('/') {
        return None;
    }
    let (stem, extension) = name.rsplit_once('.')?;
    Encoding::from_extension(extension).ok().map(|_| stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("/team/prod/")), "team/prod/");
        assert_eq!(normalize_prefix(Some("state")), "state/");
    }

    #[test]
    fn test_husk_of_record() {
        assert_eq!(husk_of_record("web.json"), Some("web"));
        assert_eq!(husk_of_record("web.yaml"), Some("web"));
        assert_eq!(husk_of_record("web.json.bak"), None);
        assert_eq!(husk_of_record("web.lock"), None);
        assert_eq!(husk_of_record("nested/web.json"), None);
        assert_eq!(husk_of_record("README"), None);
    }
}
