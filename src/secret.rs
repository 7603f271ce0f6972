//! # Secret Synchronizer
//!
//! Keeps the well-known credential secret in each target namespace aligned
//! with the currently published snapshot manager credentials.
//!
//! Every deployment in a namespace shares the one secret, so concurrent
//! reconciliations of different resources can race on it. All access goes
//! through the shared credential-store mutex: the lock is taken before the
//! secret is read and held until the write (if any) completes.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::credentials::{CredentialStore, SnapshotCredentials};

/// Naming configuration for the credential secret.
///
/// The field keys are the lookup keys used both in the secret data and by
/// the secret-reference environment variables injected into the containers.
#[derive(Debug, Clone)]
pub struct SecretConfig {
    /// Well-known name of the secret, one per namespace.
    pub secret_name: String,
    /// Fixed service-account identity stored under [`Self::user_key`].
    pub user: String,
    pub user_key: String,
    pub url_key: String,
    pub ro_pwd_key: String,
    pub cert_key: String,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            secret_name: "verify-access-operator".to_string(),
            user: "apikey".to_string(),
            user_key: "user".to_string(),
            url_key: "url".to_string(),
            ro_pwd_key: "ro.pwd".to_string(),
            cert_key: "tls.cert".to_string(),
        }
    }
}

impl SecretConfig {
    /// The string data the secret should hold for the given credentials.
    #[must_use]
    pub fn desired_data(&self, creds: &SnapshotCredentials) -> BTreeMap<String, String> {
        BTreeMap::from([
            (self.user_key.clone(), self.user.clone()),
            (self.url_key.clone(), creds.url.clone()),
            (self.ro_pwd_key.clone(), creds.ro_pwd.clone()),
            (self.cert_key.clone(), creds.certificate.clone()),
        ])
    }
}

/// Decide whether an existing secret needs to be rewritten.
///
/// The stored data must match the desired map exactly: a missing key, a
/// differing decoded value, and a stale field that no longer corresponds to
/// any desired key all count as drift.
#[must_use]
pub fn secret_needs_update(existing: &Secret, desired: &BTreeMap<String, String>) -> bool {
    let Some(stored) = existing.data.as_ref() else {
        return true;
    };

    stored.len() != desired.len()
        || desired.iter().any(|(key, value)| {
            stored
                .get(key)
                .is_none_or(|bytes| bytes.0 != value.as_bytes())
        })
}

/// Idempotently ensures the per-namespace credential secret exists and holds
/// the currently published credential values.
#[derive(Clone)]
pub struct SecretSynchronizer {
    client: Client,
    config: SecretConfig,
    store: Arc<Mutex<CredentialStore>>,
}

impl SecretSynchronizer {
    #[must_use]
    pub fn new(client: Client, config: SecretConfig, store: Arc<Mutex<CredentialStore>>) -> Self {
        Self {
            client,
            config,
            store,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SecretConfig {
        &self.config
    }

    /// Create or refresh the credential secret in `namespace`.
    ///
    /// The credential-store lock is held for the entire read-then-write
    /// sequence and released on every exit path when the guard drops.
    pub async fn ensure(&self, namespace: &str, owner: &OwnerReference) -> Result<(), kube::Error> {
        let store = self.store.lock().await;
        let desired = self.config.desired_data(store.current());

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        match api.get(&self.config.secret_name).await {
            Ok(existing) => {
                if secret_needs_update(&existing, &desired) {
                    info!(
                        namespace,
                        secret = %self.config.secret_name,
                        "Credential secret has stale values, rewriting"
                    );

                    // Replace wholesale rather than patching individual keys;
                    // the resource version from the live object is carried
                    // over so the update is rejected if someone else won.
                    let mut fresh =
                        self.build_secret(namespace, &desired, owner.clone());
                    fresh.metadata.resource_version =
                        existing.metadata.resource_version.clone();

                    api.replace(&self.config.secret_name, &PostParams::default(), &fresh)
                        .await?;
                    crate::metrics::increment_secret_writes();
                } else {
                    debug!(
                        namespace,
                        secret = %self.config.secret_name,
                        "Credential secret is up to date"
                    );
                }

                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                info!(
                    namespace,
                    secret = %self.config.secret_name,
                    "Creating the credential secret"
                );

                let secret = self.build_secret(namespace, &desired, owner.clone());
                api.create(&PostParams::default(), &secret).await?;
                crate::metrics::increment_secret_writes();

                Ok(())
            }
            Err(e) => {
                error!(
                    namespace,
                    secret = %self.config.secret_name,
                    "Failed to retrieve the credential secret: {}",
                    e
                );
                Err(e)
            }
        }
    }

    fn build_secret(
        &self,
        namespace: &str,
        data: &BTreeMap<String, String>,
        owner: OwnerReference,
    ) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.config.secret_name.clone()),
                namespace: Some(namespace.to_string()),
                owner_references: Some(vec![owner]),
                ..ObjectMeta::default()
            },
            type_: Some("Opaque".to_string()),
            string_data: Some(data.clone()),
            ..Secret::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    fn creds() -> SnapshotCredentials {
        SnapshotCredentials {
            url: "https://verify-access-operator.default.svc:7443".to_string(),
            ro_pwd: "read-only".to_string(),
            certificate: "-----BEGIN CERTIFICATE-----".to_string(),
        }
    }

    fn stored_secret(data: &BTreeMap<String, String>) -> Secret {
        Secret {
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.clone(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Secret::default()
        }
    }

    #[test]
    fn desired_data_covers_all_four_fields() {
        let config = SecretConfig::default();
        let data = config.desired_data(&creds());

        assert_eq!(data.len(), 4);
        assert_eq!(data["user"], "apikey");
        assert_eq!(data["url"], "https://verify-access-operator.default.svc:7443");
        assert_eq!(data["ro.pwd"], "read-only");
        assert_eq!(data["tls.cert"], "-----BEGIN CERTIFICATE-----");
    }

    #[test]
    fn matching_secret_requires_no_update() {
        let config = SecretConfig::default();
        let desired = config.desired_data(&creds());
        let existing = stored_secret(&desired);

        assert!(!secret_needs_update(&existing, &desired));
    }

    #[test]
    fn changed_password_requires_update() {
        let config = SecretConfig::default();
        let desired = config.desired_data(&creds());

        let mut stale = desired.clone();
        stale.insert("ro.pwd".to_string(), "rotated".to_string());
        let existing = stored_secret(&stale);

        assert!(secret_needs_update(&existing, &desired));
    }

    #[test]
    fn missing_field_requires_update() {
        let config = SecretConfig::default();
        let desired = config.desired_data(&creds());

        let mut partial = desired.clone();
        partial.remove("tls.cert");
        let existing = stored_secret(&partial);

        assert!(secret_needs_update(&existing, &desired));
    }

    #[test]
    fn stale_extra_field_requires_update() {
        let config = SecretConfig::default();
        let desired = config.desired_data(&creds());

        let mut extended = desired.clone();
        extended.insert("legacy.pwd".to_string(), "left-behind".to_string());
        let existing = stored_secret(&extended);

        assert!(secret_needs_update(&existing, &desired));
    }

    #[test]
    fn empty_secret_requires_update() {
        let config = SecretConfig::default();
        let desired = config.desired_data(&creds());

        assert!(secret_needs_update(&Secret::default(), &desired));
    }
}
