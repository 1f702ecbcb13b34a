//! Local file-based state storage backend.
//!
//! Records live in `<workspace>/husks/<husk>.<ext>`, where the extension
//! selects the encoding. Every overwrite moves the previous record to
//! `<husk>.<ext>.bak` before the new one is renamed into place.
//!
//! A save interrupted between those two renames leaves `<husk>.<ext>.tmp`
//! next to the backup and no record. The next access finishes the swap, or
//! restores the backup when the temp file does not hold a valid record.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{HuskError, Result, StateError};

use super::encoding::Encoding;
use super::lock::{LOCK_EXPIRY_SECS, LockInfo, holder_or_generated};
use super::store::{StateStore, ensure_husk_name};
use super::types::Deployment;

/// Directory under the workspace holding husk records.
pub const HUSKS_DIR: &str = "husks";

const LOCK_EXTENSION: &str = "lock";
const BACKUP_SUFFIX: &str = ".bak";
const TEMP_SUFFIX: &str = ".tmp";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Directory holding records and locks.
    base_dir: PathBuf,
    /// Encoding of newly created records.
    encoding: Encoding,
    /// Lifetime of acquired locks.
    lock_expiry_secs: i64,
}

impl LocalStateStore {
    /// Creates a store rooted at `<workspace>/husks`.
    #[must_use]
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self::with_base_dir(workspace.as_ref().join(HUSKS_DIR))
    }

    /// Creates a store using `base_dir` directly.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            encoding: Encoding::default(),
            lock_expiry_secs: LOCK_EXPIRY_SECS,
        }
    }

    /// Sets the encoding used for new records.
    ///
    /// Existing records keep the encoding they were written with.
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

    /// Directory holding the records.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, husk: &str, encoding: Encoding) -> PathBuf {
        self.base_dir.join(format!("{husk}.{}", encoding.extension()))
    }

    fn lock_path(&self, husk: &str) -> PathBuf {
        self.base_dir.join(format!("{husk}.{LOCK_EXTENSION}"))
    }

    /// Finds the existing record of a husk, preferring the configured encoding.
    fn find_record(&self, husk: &str) -> Option<PathBuf> {
        let preferred = self.record_path(husk, self.encoding);
        if preferred.exists() {
            return Some(preferred);
        }
        ["json", "yaml", "yml"]
            .iter()
            .map(|ext| self.base_dir.join(format!("{husk}.{ext}")))
            .find(|path| path.exists())
    }

    /// Finds the record of a husk, first repairing an interrupted save.
    async fn locate_record(&self, husk: &str) -> Result<Option<PathBuf>> {
        if let Some(path) = self.find_record(husk) {
            return Ok(Some(path));
        }

        let mut candidates = vec![self.record_path(husk, self.encoding)];
        candidates.extend(
            ["json", "yaml", "yml"]
                .iter()
                .map(|ext| self.base_dir.join(format!("{husk}.{ext}"))),
        );
        for path in candidates {
            let temp = with_suffix(&path, TEMP_SUFFIX);
            let backup = with_suffix(&path, BACKUP_SUFFIX);
            if temp.exists() && backup.exists() {
                Self::finish_interrupted_save(husk, &path, &temp, &backup).await?;
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    async fn finish_interrupted_save(husk: &str, path: &Path, temp: &Path, backup: &Path) -> Result<()> {
        let complete = match fs::read_to_string(temp).await {
            Ok(content) => Encoding::from_path(path)?
                .unmarshal::<Deployment>(&content)
                .is_ok_and(|d| d.husk == husk),
            Err(_) => false,
        };

        if complete {
            warn!("Completing interrupted save of {husk} from {}", temp.display());
            fs::rename(temp, path)
                .await
                .map_err(|e| StateError::io(format!("Failed to rename state file: {e}")))?;
        } else {
            warn!("Discarding partial {} and restoring {}", temp.display(), backup.display());
            fs::copy(backup, path)
                .await
                .map_err(|e| StateError::io(format!("Failed to restore backup: {e}")))?;
            fs::remove_file(temp)
                .await
                .map_err(|e| StateError::io(format!("Failed to remove temp state file: {e}")))?;
        }
        Ok(())
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StateError::io(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    /// Moves a record aside to `<path>.bak`, replacing an older backup.
    async fn backup(path: &Path) -> Result<()> {
        let backup = with_suffix(path, BACKUP_SUFFIX);
        debug!("Backing up {} to {}", path.display(), backup.display());
        fs::rename(path, &backup)
            .await
            .map_err(|e| StateError::io(format!("Failed to back up {}: {e}", path.display())))?;
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self, husk: &str) -> Result<Option<LockInfo>> {
        let path = self.lock_path(husk);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read lock file: {e}")))?;

        let lock_info: LockInfo = serde_json::from_str(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse lock file: {e}")))?;

        Ok(Some(lock_info))
    }

    /// Writes the lock file, failing if another process created it first.
    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(&lock_info.husk))
            .await
            .map_err(|e| {
                let message = if e.kind() == std::io::ErrorKind::AlreadyExists {
                    "lock was taken concurrently".to_string()
                } else {
                    format!("Failed to create lock file: {e}")
                };
                StateError::LockFailed { message }
            })?;

        file.write_all(content.as_bytes()).await.map_err(|e| StateError::LockFailed {
            message: format!("Failed to write lock file: {e}"),
        })?;

        file.sync_all().await.map_err(|e| StateError::LockFailed {
            message: format!("Failed to sync lock file: {e}"),
        })?;

        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self, husk: &str) -> Result<()> {
        let path = self.lock_path(husk);
        if path.exists() {
            fs::remove_file(&path).await.map_err(|e| StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self, husk: &str) -> Result<Option<Deployment>> {
        ensure_husk_name(husk)?;
        let Some(path) = self.locate_record(husk).await? else {
            debug!("No record for husk {husk} in {}", self.base_dir.display());
            return Ok(None);
        };

        info!("Loading state from: {}", path.display());

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StateError::corrupted(format!("Failed to read state file: {e}")))?;

        let deployment: Deployment = Encoding::from_path(&path)?
            .unmarshal(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse {}: {e}", path.display())))?;

        deployment.check_version()?;
        if deployment.husk != husk {
            return Err(HuskError::State(StateError::corrupted(format!(
                "{} holds the record of husk '{}'",
                path.display(),
                deployment.husk
            ))));
        }

        Ok(Some(deployment))
    }

    async fn save(&self, deployment: &Deployment) -> Result<()> {
        ensure_husk_name(&deployment.husk)?;
        self.ensure_dir().await?;

        let existing = self.locate_record(&deployment.husk).await?;
        let encoding = match &existing {
            Some(path) => Encoding::from_path(path)?,
            None => self.encoding,
        };
        let path = self.record_path(&deployment.husk, encoding);

        info!("Saving state to: {}", path.display());

        let content = encoding.marshal(deployment)?;

        // Write to a temporary file first, then rename
        let temp_path = with_suffix(&path, TEMP_SUFFIX);

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::io(format!("Failed to create temp state file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::io(format!("Failed to write state file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::io(format!("Failed to sync state file: {e}")))?;

        if let Some(previous) = existing {
            Self::backup(&previous).await?;
        }

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StateError::io(format!("Failed to rename state file: {e}")))?;

        debug!("State saved successfully");
        Ok(())
    }

    async fn delete(&self, husk: &str) -> Result<()> {
        ensure_husk_name(husk)?;
        if let Some(path) = self.locate_record(husk).await? {
            info!("Deleting state file: {}", path.display());
            Self::backup(&path).await?;

            let temp = with_suffix(&path, TEMP_SUFFIX);
            if temp.exists() {
                fs::remove_file(&temp)
                    .await
                    .map_err(|e| StateError::io(format!("Failed to remove temp state file: {e}")))?;
            }
        }

        self.delete_lock_file(husk).await?;

        Ok(())
    }

    async fn exists(&self, husk: &str) -> Result<bool> {
        ensure_husk_name(husk)?;
        Ok(self.locate_record(husk).await?.is_some())
    }

    async fn list(&self) -> Result<Vec<String>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| StateError::io(format!("Failed to list state directory: {e}")))?;

        let mut husks = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StateError::io(format!("Failed to list state directory: {e}")))?
        {
            let path = entry.path();
            if Encoding::from_path(&path).is_err() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                husks.insert(stem.to_string());
            }
        }

        Ok(husks.into_iter().collect())
    }

    async fn acquire_lock(&self, husk: &str, holder: &str) -> Result<LockInfo> {
        ensure_husk_name(husk)?;

        if let Some(existing) = self.read_lock_file(husk).await? {
            if !existing.is_expired() {
                return Err(HuskError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            warn!("Expired lock of {husk} held by {} found, taking over", existing.holder);
            self.delete_lock_file(husk).await?;
        }

        let lock_info = LockInfo::new(husk, &holder_or_generated(holder), self.lock_expiry_secs);
        self.write_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock of {husk}: {} (expires in {}s)",
            lock_info.lock_id, self.lock_expiry_secs
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, husk: &str, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file(husk).await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file(husk).await?;
                info!("Released state lock of {husk}: {lock_id}");
            } else {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
        }
        Ok(())
    }

    async fn force_unlock(&self, husk: &str) -> Result<()> {
        ensure_husk_name(husk)?;
        if let Some(existing) = self.read_lock_file(husk).await? {
            warn!("Force unlocking {husk}, lock held by {}", existing.holder);
        }
        self.delete_lock_file(husk).await
    }

    async fn get_lock_info(&self, husk: &str) -> Result<Option<LockInfo>> {
        ensure_husk_name(husk)?;
        self.read_lock_file(husk).await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

/// Writes a record to an arbitrary file, encoded by its extension.
///
/// An existing file is moved to `<path>.bak` first.
///
/// # Errors
///
/// Fails for unknown extensions and IO errors.
pub async fn export_record(path: &Path, deployment: &Deployment) -> Result<()> {
    let content = Encoding::from_path(path)?.marshal(deployment)?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| StateError::io(format!("Failed to create {}: {e}", dir.display())))?;
    }
    if path.exists() {
        LocalStateStore::backup(path).await?;
    }

    fs::write(path, content)
        .await
        .map_err(|e| StateError::io(format!("Failed to write {}: {e}", path.display())))?;
    info!("Wrote record of {} to {}", deployment.husk, path.display());
    Ok(())
}

/// Appends a suffix to the full file name, keeping the extension.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlanSummary;
    use crate::resource::{Moniker, PropertyMap, Resource, Snapshot, TypeToken};
    use crate::state::types::{DeploymentHistoryEntry, DeploymentOperation};
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::new(temp_dir.path());
        (store, temp_dir)
    }

    fn with_resource(deployment: &Deployment, name: &str) -> Deployment {
        let snapshot = Snapshot::new(vec![Resource::new(
            TypeToken::from("test:index:A"),
            Moniker::from(name),
            PropertyMap::new(),
        )])
        .expect("snapshot");
        let entry = DeploymentHistoryEntry::new(DeploymentOperation::Deploy, name, PlanSummary::default(), 1);
        deployment.advance(snapshot, PropertyMap::new(), entry)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, temp) = create_test_store();

        let deployment = Deployment::new("web");
        store.save(&deployment).await.expect("Failed to save state");

        assert!(temp.path().join("husks").join("web.json").exists());

        let loaded = store
            .load("web")
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded.husk, "web");
        assert!(loaded.latest.is_empty());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load("web").await.expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_exists() {
        let (store, _temp) = create_test_store();

        assert!(!store.exists("web").await.expect("exists check failed"));

        store.save(&Deployment::new("web")).await.expect("Failed to save state");

        assert!(store.exists("web").await.expect("exists check failed"));
        assert!(!store.exists("api").await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_overwrite_keeps_backup() {
        let (store, _temp) = create_test_store();

        let first = with_resource(&Deployment::new("web"), "first");
        store.save(&first).await.expect("save first");
        let second = with_resource(&first, "second");
        store.save(&second).await.expect("save second");

        let backup = store.base_dir().join("web.json.bak");
        let content = std::fs::read_to_string(backup).expect("backup exists");
        let previous: Deployment = serde_json::from_str(&content).expect("backup parses");
        assert!(previous.latest.contains(&Moniker::from("first")));

        let current = store.load("web").await.expect("load").expect("record");
        assert!(current.latest.contains(&Moniker::from("second")));
        assert_eq!(current.history.len(), 2);
        assert!(!store.base_dir().join("web.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_interrupted_swap_is_completed() {
        let (store, _temp) = create_test_store();
        let first = with_resource(&Deployment::new("web"), "first");
        store.save(&first).await.expect("save first");
        let second = with_resource(&first, "second");
        store.save(&second).await.expect("save second");

        // Crash after the backup rename, before the new record moved in.
        let record = store.base_dir().join("web.json");
        let temp = store.base_dir().join("web.json.tmp");
        std::fs::rename(&record, &temp).expect("simulate crash");

        assert!(store.exists("web").await.expect("exists"));
        let loaded = store.load("web").await.expect("load").expect("record");
        assert!(loaded.latest.contains(&Moniker::from("second")));
        assert!(record.exists());
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_partial_temp_falls_back_to_backup() {
        let (store, _temp) = create_test_store();
        let first = with_resource(&Deployment::new("web"), "first");
        store.save(&first).await.expect("save first");

        let record = store.base_dir().join("web.json");
        std::fs::rename(&record, store.base_dir().join("web.json.bak")).expect("move aside");
        std::fs::write(store.base_dir().join("web.json.tmp"), "{\"husk\": \"we").expect("partial");

        let loaded = store.load("web").await.expect("load").expect("record");
        assert!(loaded.latest.contains(&Moniker::from("first")));
        assert!(!store.base_dir().join("web.json.tmp").exists());
        assert!(store.base_dir().join("web.json.bak").exists());
    }

    #[tokio::test]
    async fn test_deleted_husk_is_not_recovered() {
        let (store, _temp) = create_test_store();
        store.save(&Deployment::new("web")).await.expect("save");
        std::fs::write(store.base_dir().join("web.json.tmp"), "{").expect("stale temp");

        store.delete("web").await.expect("delete");

        assert!(!store.base_dir().join("web.json.tmp").exists());
        assert!(!store.exists("web").await.expect("exists"));
        assert!(store.load("web").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_delete_keeps_backup() {
        let (store, _temp) = create_test_store();

        store.save(&Deployment::new("web")).await.expect("save");
        store.delete("web").await.expect("delete");

        assert!(store.load("web").await.expect("load").is_none());
        assert!(store.base_dir().join("web.json.bak").exists());

        store.delete("web").await.expect("deleting twice is fine");
    }

    #[tokio::test]
    async fn test_list_ignores_backups_and_locks() {
        let (store, _temp) = create_test_store();

        assert!(store.list().await.expect("list").is_empty());

        store.save(&Deployment::new("web")).await.expect("save");
        store.save(&Deployment::new("web")).await.expect("save again");
        store.save(&Deployment::new("api")).await.expect("save");
        let _lock = store.acquire_lock("api", "me").await.expect("lock");

        assert_eq!(store.list().await.expect("list"), vec!["api", "web"]);
    }

    #[tokio::test]
    async fn test_yaml_encoding() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::new(temp.path()).with_encoding(Encoding::Yaml);

        store.save(&with_resource(&Deployment::new("web"), "a")).await.expect("save");
        assert!(store.base_dir().join("web.yaml").exists());

        let loaded = store.load("web").await.expect("load").expect("record");
        assert_eq!(loaded.resource_count(), 1);

        // A json store keeps using the existing yaml record.
        let json_store = LocalStateStore::new(temp.path());
        json_store.save(&loaded).await.expect("save");
        assert!(!store.base_dir().join("web.json").exists());
        assert!(store.base_dir().join("web.yaml.bak").exists());
    }

    #[tokio::test]
    async fn test_mismatched_record_is_corrupt() {
        let (store, _temp) = create_test_store();
        store.save(&Deployment::new("web")).await.expect("save");
        std::fs::rename(store.base_dir().join("web.json"), store.base_dir().join("api.json")).expect("rename");

        let err = store.load("api").await.unwrap_err();
        assert!(matches!(err, HuskError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_invalid_husk_name_is_rejected() {
        let (store, _temp) = create_test_store();

        let err = store.load("../escape").await.unwrap_err();
        assert!(matches!(err, HuskError::Config(_)));
        assert!(store.save(&Deployment::new("a/b")).await.is_err());
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store.acquire_lock("web", "test-holder").await.expect("Failed to acquire lock");

        assert!(store.is_locked("web").await.expect("is_locked failed"));
        assert!(!store.is_locked("api").await.expect("is_locked failed"));

        store.release_lock("web", &lock.lock_id).await.expect("Failed to release lock");

        assert!(!store.is_locked("web").await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store.acquire_lock("web", "holder-1").await.expect("Failed to acquire first lock");

        let err = store.acquire_lock("web", "holder-2").await.unwrap_err();
        assert!(err.is_retryable());

        store.acquire_lock("api", "holder-2").await.expect("locks are per husk");
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let (store, _temp) = create_test_store();

        let _lock = store.acquire_lock("web", "holder").await.expect("lock");
        store.release_lock("web", "not-mine").await.expect("release");

        assert!(store.is_locked("web").await.expect("is_locked"));

        store.force_unlock("web").await.expect("force unlock");
        assert!(!store.is_locked("web").await.expect("is_locked"));
    }

    #[tokio::test]
    async fn test_export_record() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("out").join("web.yaml");
        let deployment = with_resource(&Deployment::new("web"), "a");

        export_record(&path, &deployment).await.expect("export");
        export_record(&path, &deployment).await.expect("export again");

        let content = std::fs::read_to_string(&path).expect("read");
        let parsed: Deployment = serde_yaml::from_str(&content).expect("yaml");
        assert_eq!(parsed.resource_count(), 1);
        assert!(temp.path().join("out").join("web.yaml.bak").exists());

        let err = export_record(&temp.path().join("web.txt"), &deployment).await.unwrap_err();
        assert!(matches!(err, HuskError::State(StateError::UnsupportedEncoding { .. })));
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let temp = TempDir::new().expect("temp dir");
        let stale = LocalStateStore::new(temp.path()).with_lock_expiry(-1);
        let store = LocalStateStore::new(temp.path());

        let old = stale.acquire_lock("web", "crashed").await.expect("lock");
        assert!(!store.is_locked("web").await.expect("is_locked"));

        let fresh = store.acquire_lock("web", "me").await.expect("take over");
        assert_ne!(old.lock_id, fresh.lock_id);
        assert_eq!(
            store.get_lock_info("web").await.expect("info").map(|l| l.holder),
            Some("me".to_string())
        );
    }
}
