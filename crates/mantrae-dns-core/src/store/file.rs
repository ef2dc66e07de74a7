// # File Config Store
//
// JSON-file implementation of ProviderStore and RouterSource.
//
// ## Purpose
//
// Lets the daemon run from a configuration document that other tools edit.
// The file is re-read whenever its modification time changes, so router and
// provider edits are picked up by the next sync cycle.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Automatic backup: Keeps .backup of last known good document
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "sync": { "interval_secs": 300 },
//   "providers": [
//     { "id": 1, "name": "cf", "type": "cloudflare",
//       "config": { "api_key": "...", "ip": "203.0.113.5", "proxied": true } }
//   ],
//   "routers": [
//     { "name": "app", "rule": "Host(`app.example.com`)", "provider_ids": [1] }
//   ]
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::{DnsConfigFile, RouterDns, StoredProvider, SyncConfig};
use crate::traits::{ProviderStore, RouterSource};

/// Config file format version
const CONFIG_FILE_VERSION: &str = "1.0";

/// File-backed configuration store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use mantrae_dns_core::store::FileConfigStore;
/// use mantrae_dns_core::traits::RouterSource;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileConfigStore::open("/etc/mantrae/dns.json").await?;
///     for router in store.active_routers().await? {
///         println!("{} -> {:?}", router.name, router.hostnames());
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

/// Internal state for file-based store
#[derive(Debug)]
struct FileState {
    document: DnsConfigFile,
    modified: Option<SystemTime>,
}

/// Serializable file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ConfigFileFormat {
    #[serde(default = "default_version")]
    version: String,
    #[serde(flatten)]
    document: DnsConfigFile,
}

fn default_version() -> String {
    CONFIG_FILE_VERSION.to_string()
}

impl FileConfigStore {
    /// Load a configuration file
    ///
    /// This will:
    /// 1. Load and validate the file
    /// 2. If corruption detected, load from backup
    /// 3. Fail if the file does not exist or both copies are unreadable
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(Error::config(format!(
                "Config file does not exist: {}",
                path.display()
            )));
        }

        let document = Self::load_with_recovery(&path).await?;
        document.validate()?;
        let modified = Self::modified_time(&path).await;

        tracing::debug!(
            "Loaded config from {}: {} provider(s), {} router(s)",
            path.display(),
            document.providers.len(),
            document.routers.len()
        );

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState { document, modified })),
        })
    }

    /// Create a new configuration file from a document
    pub async fn create<P: AsRef<Path>>(path: P, document: DnsConfigFile) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        document.validate()?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let store = Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                document,
                modified: None,
            })),
        };
        store.write_document().await?;
        Ok(store)
    }

    /// Sync driver settings from the document
    pub async fn sync_config(&self) -> SyncConfig {
        self.state.read().await.document.sync.clone()
    }

    /// Load the document from file with automatic recovery
    async fn load_with_recovery(path: &Path) -> Result<DnsConfigFile, Error> {
        match Self::load(path).await {
            Ok(document) => Ok(document),
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Config file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    return Err(Error::config(format!(
                        "Config file {} is corrupted and no backup exists: {}",
                        path.display(),
                        e
                    )));
                }

                let document = Self::load(&backup_path).await.map_err(|backup_err| {
                    Error::config(format!(
                        "Config file and backup are both unreadable: {}",
                        backup_err
                    ))
                })?;

                tracing::info!("Recovered config from backup");
                if let Err(restore_err) = fs::copy(&backup_path, path).await {
                    tracing::error!(
                        "Failed to restore config file from backup: {}",
                        restore_err
                    );
                }
                Ok(document)
            }
            Err(e) => Err(e),
        }
    }

    /// Load the document from file
    async fn load(path: &Path) -> Result<DnsConfigFile, Error> {
        let content = fs::read_to_string(path).await?;
        let file: ConfigFileFormat = serde_json::from_str(&content)?;

        if file.version != CONFIG_FILE_VERSION {
            tracing::warn!(
                "Config file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                CONFIG_FILE_VERSION,
                file.version
            );
        }

        Ok(file.document)
    }

    /// Re-read the file when another process changed it
    async fn refresh_if_changed(&self) -> Result<(), Error> {
        let modified = Self::modified_time(&self.path).await;
        if modified.is_none() || modified == self.state.read().await.modified {
            return Ok(());
        }

        match Self::load(&self.path).await.and_then(|d| d.validate().map(|_| d)) {
            Ok(document) => {
                tracing::info!("Config file changed, reloaded {}", self.path.display());
                let mut state = self.state.write().await;
                state.document = document;
                state.modified = modified;
            }
            Err(e) => {
                // keep serving the last good document
                tracing::warn!("Ignoring unreadable config change: {}", e);
                self.state.write().await.modified = modified;
            }
        }
        Ok(())
    }

    /// Write the document to file atomically
    async fn write_document(&self) -> Result<(), Error> {
        let json = {
            let state = self.state.read().await;
            serde_json::to_string_pretty(&ConfigFileFormat {
                version: CONFIG_FILE_VERSION.to_string(),
                document: state.document.clone(),
            })?
        };

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.flush().await?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await?;

        let modified = Self::modified_time(&self.path).await;
        self.state.write().await.modified = modified;

        tracing::trace!("Config written to file: {}", self.path.display());
        Ok(())
    }

    async fn modified_time(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).await.ok()?.modified().ok()
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl ProviderStore for FileConfigStore {
    async fn get_provider(&self, id: i64) -> Result<StoredProvider, Error> {
        self.refresh_if_changed().await?;
        let state = self.state.read().await;
        state
            .document
            .providers
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("provider {}", id)))
    }

    async fn list_providers(&self) -> Result<Vec<StoredProvider>, Error> {
        self.refresh_if_changed().await?;
        Ok(self.state.read().await.document.providers.clone())
    }

    async fn update_provider_ip(&self, id: i64, ip: &str) -> Result<(), Error> {
        self.refresh_if_changed().await?;
        {
            let mut state = self.state.write().await;
            let provider = state
                .document
                .providers
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| Error::not_found(format!("provider {}", id)))?;
            provider.config.ip = ip.to_string();
        }

        // Immediate write for durability
        self.write_document().await
    }
}

#[async_trait]
impl RouterSource for FileConfigStore {
    async fn active_routers(&self) -> Result<Vec<RouterDns>, Error> {
        self.refresh_if_changed().await?;
        let state = self.state.read().await;
        Ok(state
            .document
            .routers
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }
}
