//! Background task that periodically writes the settings to disk

use super::ConfigStore;
use crate::constants::{DEFAULT_SETTINGS_UPDATE_INTERVAL_SECS, SETTINGS_UPDATE_INTERVAL};
use crate::error::SettingsError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Handle to the periodic settings flush task
///
/// The interval is re-read from the `settings_update_interval` option on every
/// cycle, so a change takes effect after the current sleep.
pub struct SettingsFlusher {
    store: Arc<ConfigStore>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SettingsFlusher {
    /// Starts the flush task on the current tokio runtime
    pub fn spawn(store: Arc<ConfigStore>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task_store = store.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(path = %task_store.path().display(), "Starting settings flush task");

            loop {
                let interval = flush_interval(&task_store).await;
                tokio::select! {
                    _ = sleep(interval) => {}
                    _ = shutdown_rx.changed() => break,
                }

                tracing::debug!("Writing settings");
                if let Err(e) = task_store.write_settings().await {
                    tracing::warn!(error = %e, "Failed to write settings");
                }
            }

            tracing::debug!("Settings flush task stopped");
        });

        Self {
            store,
            shutdown_tx,
            handle,
        }
    }

    /// Stops the task, waits for it, then writes the final state
    pub async fn shutdown(self) -> Result<(), SettingsError> {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Settings flush task ended abnormally");
        }
        self.store.write_settings().await
    }
}

/// Current flush interval, falling back to the default on a bad option
async fn flush_interval(store: &ConfigStore) -> Duration {
    match store.get_option::<f64>(SETTINGS_UPDATE_INTERVAL).await {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
        Ok(secs) => {
            tracing::warn!(secs, "Invalid settings update interval, using default");
            Duration::from_secs(DEFAULT_SETTINGS_UPDATE_INTERVAL_SECS)
        }
        Err(e) => {
            tracing::warn!(error = %e, "No settings update interval, using default");
            Duration::from_secs(DEFAULT_SETTINGS_UPDATE_INTERVAL_SECS)
        }
    }
}
