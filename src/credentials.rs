//! # Snapshot Manager Credentials
//!
//! Published credential state for the embedded snapshot management service,
//! plus the background task that keeps it fresh.
//!
//! The credential values are shared between the background refresher and the
//! secret synchronizer. Both sides go through the same
//! `Arc<tokio::sync::Mutex<CredentialStore>>`; the synchronizer holds the
//! lock for its whole read-then-write window against the Kubernetes API, so
//! a refresh can never interleave with a secret write.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The raw credential material needed to reach the snapshot manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotCredentials {
    /// URL of the snapshot management service.
    pub url: String,
    /// Read-only password for the snapshot manager service account.
    pub ro_pwd: String,
    /// PEM encoded X509 certificate of the snapshot management service.
    pub certificate: String,
}

/// Published-value slot for the current snapshot manager credentials.
///
/// Wrapped in a shared mutex by the caller; see the module documentation for
/// the lock discipline.
#[derive(Debug, Default)]
pub struct CredentialStore {
    current: SnapshotCredentials,
}

impl CredentialStore {
    #[must_use]
    pub fn new(initial: SnapshotCredentials) -> Self {
        Self { current: initial }
    }

    #[must_use]
    pub fn current(&self) -> &SnapshotCredentials {
        &self.current
    }

    pub fn publish(&mut self, creds: SnapshotCredentials) {
        self.current = creds;
    }
}

/// Source of truth for snapshot manager credentials.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Fetch the current credential values.
    async fn fetch(&self) -> Result<SnapshotCredentials>;
}

/// Credential source backed by process environment variables.
///
/// Used when the snapshot management service runs alongside the operator and
/// exposes its connection details through the pod environment
/// (`SNAPSHOT_MGR_URL`, `SNAPSHOT_MGR_RO_PWD`, `SNAPSHOT_MGR_CACERT`).
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialSource;

#[async_trait]
impl CredentialSource for EnvCredentialSource {
    async fn fetch(&self) -> Result<SnapshotCredentials> {
        Ok(SnapshotCredentials {
            url: std::env::var("SNAPSHOT_MGR_URL").unwrap_or_default(),
            ro_pwd: std::env::var("SNAPSHOT_MGR_RO_PWD").unwrap_or_default(),
            certificate: std::env::var("SNAPSHOT_MGR_CACERT").unwrap_or_default(),
        })
    }
}

/// Handle for the background credential refresh task.
///
/// The task periodically fetches from the [`CredentialSource`] and publishes
/// the result into the shared store. Dropping the handle leaves the task
/// running; call [`CredentialRefresher::shutdown`] for an orderly stop.
#[derive(Debug)]
pub struct CredentialRefresher {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl CredentialRefresher {
    /// Spawn the refresh task.
    ///
    /// The store is populated once immediately so that the first
    /// reconciliation does not race an empty slot, then refreshed on the
    /// given interval until shut down.
    pub fn spawn(
        source: Arc<dyn CredentialSource>,
        store: Arc<Mutex<CredentialStore>>,
        interval: Duration,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            refresh_once(&*source, &store).await;

            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately

            loop {
                tokio::select! {
                    _ = ticker.tick() => refresh_once(&*source, &store).await,
                    _ = stopped.changed() => {
                        info!("Credential refresher stopping");
                        return;
                    }
                }
            }
        });

        Self { handle, stop }
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

async fn refresh_once(source: &dyn CredentialSource, store: &Mutex<CredentialStore>) {
    match source.fetch().await {
        Ok(creds) => {
            let mut slot = store.lock().await;
            if *slot.current() != creds {
                info!("Publishing refreshed snapshot manager credentials");
                slot.publish(creds);
            }
        }
        Err(e) => {
            // Keep the previously published values; the next tick retries.
            warn!("Failed to refresh snapshot manager credentials: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(SnapshotCredentials);

    #[async_trait]
    impl CredentialSource for FixedSource {
        async fn fetch(&self) -> Result<SnapshotCredentials> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl CredentialSource for FailingSource {
        async fn fetch(&self) -> Result<SnapshotCredentials> {
            anyhow::bail!("source unavailable")
        }
    }

    fn creds(url: &str) -> SnapshotCredentials {
        SnapshotCredentials {
            url: url.to_string(),
            ro_pwd: "secret".to_string(),
            certificate: "cert".to_string(),
        }
    }

    #[tokio::test]
    async fn refresher_publishes_into_store_and_shuts_down() {
        let store = Arc::new(Mutex::new(CredentialStore::default()));
        let source = Arc::new(FixedSource(creds("https://snapshot-mgr:9443")));

        let refresher = CredentialRefresher::spawn(
            source,
            Arc::clone(&store),
            Duration::from_secs(3600),
        );

        // The initial publish happens before the interval loop starts, so a
        // short yield is enough for it to land.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            store.lock().await.current().url,
            "https://snapshot-mgr:9443"
        );

        refresher.shutdown().await;
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_value() {
        let store = Arc::new(Mutex::new(CredentialStore::new(creds("https://old"))));

        refresh_once(&FailingSource, &store).await;

        assert_eq!(store.lock().await.current().url, "https://old");
    }
}
