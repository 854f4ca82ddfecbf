//! Persistent settings store
//!
//! Holds the settings document in memory behind a mutex, loads it lazily from
//! the backing file and writes it back atomically (temp file plus rename)
//! under a cross-process lock file. Typed accessors cover the `options`,
//! `credentials` and `baskets` sections.
//!
//! ```no_run
//! use price_network::settings::{ConfigStore, SettingsFlusher};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(ConfigStore::from_env());
//! let flusher = SettingsFlusher::spawn(store.clone());
//!
//! store.set_option("price_update_interval", 30).await?;
//! let interval: u64 = store.get_option("price_update_interval").await?;
//! assert_eq!(interval, 30);
//!
//! // joins the background task and writes the final state
//! flusher.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod flusher;
pub mod lock;
pub mod model;

pub use flusher::SettingsFlusher;
pub use lock::FileLock;
pub use model::{default_options, Basket, Credentials, Settings};

use crate::constants::{DEFAULT_SETTINGS_FILE, SETTINGS_PATH_ENV};
use crate::error::SettingsError;
use crate::types::Symbol;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};

const OPTIONS: &str = "options";
const CREDENTIALS: &str = "credentials";
const BASKETS: &str = "baskets";

struct StoreState {
    /// `None` until first access or after a reload request
    settings: Option<Settings>,
    /// Last in-memory modification
    modified_at: DateTime<Utc>,
}

/// Lock-guarded settings document backed by a JSON file
pub struct ConfigStore {
    path: PathBuf,
    lock_path: PathBuf,
    state: Mutex<StoreState>,
    /// Held from snapshot to rename so writes land in snapshot order
    write_guard: Mutex<()>,
}

impl ConfigStore {
    /// Creates a store backed by `path`; nothing is read until first access
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self {
            path,
            lock_path,
            state: Mutex::new(StoreState {
                settings: None,
                modified_at: Utc::now(),
            }),
            write_guard: Mutex::new(()),
        }
    }

    /// Creates a store at the path named by `PRICE_NETWORK_SETTINGS`
    ///
    /// Falls back to `price_network.json` in the working directory.
    pub fn from_env() -> Self {
        let path = std::env::var(SETTINGS_PATH_ENV)
            .unwrap_or_else(|_| DEFAULT_SETTINGS_FILE.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Locks the in-memory state, loading it first if needed
    async fn loaded(&self) -> Result<MutexGuard<'_, StoreState>, SettingsError> {
        let mut state = self.state.lock().await;
        if state.settings.is_none() {
            state.settings = Some(self.load().await?);
            state.modified_at = Utc::now();
        }
        Ok(state)
    }

    async fn load(&self) -> Result<Settings, SettingsError> {
        let exists = tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| SettingsError::persistence(&self.path, e))?;
        if !exists {
            tracing::info!(path = %self.path.display(), "No settings file, using defaults");
            return Ok(Settings::default());
        }

        let lock = FileLock::acquire(&self.lock_path).await?;
        let raw = tokio::fs::read(&self.path).await;
        lock.release().await;
        let raw = raw.map_err(|e| SettingsError::persistence(&self.path, e))?;
        let mut settings: Settings =
            serde_json::from_slice(&raw).map_err(|source| SettingsError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        settings.normalize();

        tracing::debug!(path = %self.path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Runs `f` against the current settings
    async fn read<R>(
        &self,
        f: impl FnOnce(&Settings) -> Result<R, SettingsError>,
    ) -> Result<R, SettingsError> {
        let state = self.loaded().await?;
        match state.settings.as_ref() {
            Some(settings) => f(settings),
            None => Err(SettingsError::invalid("settings not loaded")),
        }
    }

    /// Applies `f` to a copy of the settings and commits it only on success
    async fn update<R>(
        &self,
        f: impl FnOnce(&mut Settings) -> Result<R, SettingsError>,
    ) -> Result<R, SettingsError> {
        let mut state = self.loaded().await?;
        let mut next = match state.settings.clone() {
            Some(settings) => settings,
            None => return Err(SettingsError::invalid("settings not loaded")),
        };
        let result = f(&mut next)?;
        state.settings = Some(next);
        state.modified_at = Utc::now();
        Ok(result)
    }

    /// Returns a copy of the current settings, loading them if needed
    pub async fn get_settings(&self) -> Result<Settings, SettingsError> {
        self.read(|settings| Ok(settings.clone())).await
    }

    /// Shallow-merges the top-level keys of `patch` into the settings
    ///
    /// `patch` must be a JSON object, and the merged document must still be a
    /// valid settings document; otherwise nothing changes.
    pub async fn set_settings(&self, patch: Value) -> Result<(), SettingsError> {
        let Value::Object(patch) = patch else {
            return Err(SettingsError::invalid("settings patch must be a JSON object"));
        };
        self.update(move |settings| {
            let mut merged = serde_json::to_value(&*settings).map_err(SettingsError::Serialize)?;
            if let Value::Object(fields) = &mut merged {
                fields.extend(patch);
            }
            *settings =
                serde_json::from_value(merged).map_err(|e| SettingsError::invalid(e.to_string()))?;
            Ok(())
        })
        .await
    }

    /// Discards the in-memory settings and reads them again from disk
    pub async fn reload_settings(&self) -> Result<Settings, SettingsError> {
        {
            let mut state = self.state.lock().await;
            state.settings = None;
            state.modified_at = Utc::now();
        }
        self.get_settings().await
    }

    /// Persists the settings to the backing file
    ///
    /// The document goes to a temp sibling first and is renamed over the
    /// backing file, so a failed write leaves the previous file intact.
    pub async fn write_settings(&self) -> Result<(), SettingsError> {
        let _writing = self.write_guard.lock().await;

        let (json, persisted_at) = {
            let state = self.loaded().await?;
            let Some(settings) = state.settings.as_ref() else {
                return Err(SettingsError::invalid("settings not loaded"));
            };
            let mut snapshot = settings.clone();
            snapshot.last_updated = state.modified_at;
            let json = serde_json::to_vec_pretty(&snapshot).map_err(SettingsError::Serialize)?;
            (json, state.modified_at)
        };

        let lock = FileLock::acquire(&self.lock_path).await?;
        let written = self.write_atomically(&json).await;
        lock.release().await;
        written?;

        if let Some(settings) = self.state.lock().await.settings.as_mut() {
            if persisted_at > settings.last_updated {
                settings.last_updated = persisted_at;
            }
        }
        tracing::debug!(path = %self.path.display(), bytes = json.len(), "Wrote settings");
        Ok(())
    }

    async fn write_atomically(&self, contents: &[u8]) -> Result<(), SettingsError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_SETTINGS_FILE.to_string());
        let temp_path = self.path.with_file_name(format!(".{}.tmp", file_name));

        let result = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(SettingsError::persistence(&self.path, e));
        }
        Ok(())
    }

    /// Returns an option from the options section
    pub async fn get_option<T: DeserializeOwned>(&self, name: &str) -> Result<T, SettingsError> {
        self.read(|settings| {
            let value = options(settings)?
                .get(name)
                .ok_or_else(|| SettingsError::NoSuchOption(name.to_string()))?;
            serde_json::from_value(value.clone())
                .map_err(|e| SettingsError::invalid(format!("option {}: {}", name, e)))
        })
        .await
    }

    /// Returns whether an option exists
    pub async fn has_option(&self, name: &str) -> Result<bool, SettingsError> {
        self.read(|settings| Ok(options(settings)?.contains_key(name)))
            .await
    }

    /// Sets an option in the options section
    pub async fn set_option<T: Serialize>(&self, name: &str, value: T) -> Result<(), SettingsError> {
        let value = serde_json::to_value(value)
            .map_err(|e| SettingsError::invalid(format!("option {}: {}", name, e)))?;
        self.update(|settings| {
            options_mut(settings)?.insert(name.to_string(), value);
            Ok(())
        })
        .await
    }

    /// Removes an option from the options section
    pub async fn remove_option(&self, name: &str) -> Result<(), SettingsError> {
        self.update(|settings| {
            options_mut(settings)?
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| SettingsError::NoSuchOption(name.to_string()))
        })
        .await
    }

    /// Returns the whole options section
    pub async fn get_options(&self) -> Result<BTreeMap<String, Value>, SettingsError> {
        self.read(|settings| Ok(options(settings)?.clone())).await
    }

    /// Returns the API key and secret for `site`
    pub async fn get_creds(&self, site: &str) -> Result<Credentials, SettingsError> {
        self.read(|settings| {
            credentials(settings)?
                .get(site)
                .cloned()
                .ok_or_else(|| SettingsError::NoSuchSite(site.to_string()))
        })
        .await
    }

    /// Sets the API key and secret for `site`
    pub async fn set_creds(
        &self,
        site: &str,
        key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<(), SettingsError> {
        let creds = Credentials {
            key: key.into(),
            secret: secret.into(),
        };
        self.update(|settings| {
            credentials_mut(settings)?.insert(site.to_string(), creds);
            Ok(())
        })
        .await
    }

    /// Removes the credentials for `site`
    pub async fn remove_creds(&self, site: &str) -> Result<(), SettingsError> {
        self.update(|settings| {
            credentials_mut(settings)?
                .remove(site)
                .map(|_| ())
                .ok_or_else(|| SettingsError::NoSuchSite(site.to_string()))
        })
        .await
    }

    /// Returns the whole credentials section
    pub async fn get_all_creds(&self) -> Result<BTreeMap<String, Credentials>, SettingsError> {
        self.read(|settings| Ok(credentials(settings)?.clone())).await
    }

    /// Creates an empty baskets section if there is none
    pub async fn ensure_baskets_section(&self) -> Result<(), SettingsError> {
        let present = self.read(|settings| Ok(settings.baskets.is_some())).await?;
        if !present {
            self.update(|settings| {
                settings.baskets.get_or_insert_with(BTreeMap::new);
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    /// Returns every basket definition
    pub async fn get_baskets(&self) -> Result<BTreeMap<Symbol, Basket>, SettingsError> {
        self.read(|settings| Ok(baskets(settings)?.clone())).await
    }

    pub async fn get_basket(&self, name: &Symbol) -> Result<Basket, SettingsError> {
        self.read(|settings| {
            baskets(settings)?
                .get(name)
                .cloned()
                .ok_or_else(|| SettingsError::NoSuchBasket(name.to_string()))
        })
        .await
    }

    /// Adds or replaces a basket definition
    pub async fn set_basket(&self, name: &Symbol, basket: Basket) -> Result<(), SettingsError> {
        self.update(|settings| {
            baskets_mut(settings)?.insert(name.clone(), basket);
            Ok(())
        })
        .await
    }

    pub async fn remove_basket(&self, name: &Symbol) -> Result<(), SettingsError> {
        self.update(|settings| {
            baskets_mut(settings)?
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| SettingsError::NoSuchBasket(name.to_string()))
        })
        .await
    }

    /// Returns when the settings were last persisted
    pub async fn get_last_updated(&self) -> Result<DateTime<Utc>, SettingsError> {
        self.read(|settings| Ok(settings.last_updated)).await
    }

    /// Returns when the in-memory settings last changed
    pub async fn modified_at(&self) -> DateTime<Utc> {
        self.state.lock().await.modified_at
    }
}

/// `.<filename>.lock` next to the settings file
fn lock_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_SETTINGS_FILE.to_string());
    path.with_file_name(format!(".{}.lock", file_name))
}

fn options(settings: &Settings) -> Result<&BTreeMap<String, Value>, SettingsError> {
    settings
        .options
        .as_ref()
        .ok_or(SettingsError::MissingSection(OPTIONS))
}

fn options_mut(settings: &mut Settings) -> Result<&mut BTreeMap<String, Value>, SettingsError> {
    settings
        .options
        .as_mut()
        .ok_or(SettingsError::MissingSection(OPTIONS))
}

fn credentials(settings: &Settings) -> Result<&BTreeMap<String, Credentials>, SettingsError> {
    settings
        .credentials
        .as_ref()
        .ok_or(SettingsError::MissingSection(CREDENTIALS))
}

fn credentials_mut(
    settings: &mut Settings,
) -> Result<&mut BTreeMap<String, Credentials>, SettingsError> {
    settings
        .credentials
        .as_mut()
        .ok_or(SettingsError::MissingSection(CREDENTIALS))
}

fn baskets(settings: &Settings) -> Result<&BTreeMap<Symbol, Basket>, SettingsError> {
    settings
        .baskets
        .as_ref()
        .ok_or(SettingsError::MissingSection(BASKETS))
}

fn baskets_mut(settings: &mut Settings) -> Result<&mut BTreeMap<Symbol, Basket>, SettingsError> {
    settings
        .baskets
        .as_mut()
        .ok_or(SettingsError::MissingSection(BASKETS))
}
