//! Gateway signing key lifecycle.
//!
//! [`KeyStore`] owns every key the gateway has generated. Readers (signing,
//! local verification, the discovery document) load an immutable
//! [`KeyRing`] snapshot and never wait on key generation. Generation,
//! rotation, and purging are serialized behind one async mutex, so at most
//! one operation at a time decides which key is current.

use crate::crypto::{self, RsaPublicParams};
use crate::errors::GatewayError;
use crate::models::SigningKeyInfo;
use crate::observability::metrics::{record_key_rotation, set_active_signing_keys};
use crate::repositories::signing_keys::key_file_names;
use crate::repositories::{KeyRecord, KeyRegistry, SigningKeyRepository};
use chrono::{DateTime, Utc};
use common::jwks::{Jwk, JwkSet, USE_SIG};
use common::secret::{duplicate, SecretString};
use common::snapshot::Snapshot;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Prefix of every generated key id.
pub const KEY_ID_PREFIX: &str = "gateway-key-";

/// A gateway signing key with its material loaded.
pub struct SigningKey {
    pub kid: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub private_key_pem: SecretString,
    pub public_key_pem: String,
    pub public_params: RsaPublicParams,
    pub active: bool,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .field("private_key_pem", &"[REDACTED]")
            .field("active", &self.active)
            .finish()
    }
}

impl SigningKey {
    fn deactivated(&self) -> Self {
        Self {
            kid: self.kid.clone(),
            algorithm: self.algorithm.clone(),
            created_at: self.created_at,
            private_key_pem: duplicate(&self.private_key_pem),
            public_key_pem: self.public_key_pem.clone(),
            public_params: self.public_params.clone(),
            active: false,
        }
    }

    fn to_jwk(&self) -> Jwk {
        Jwk::rsa_signing(
            self.kid.clone(),
            self.public_params.n.clone(),
            self.public_params.e.clone(),
        )
    }
}

/// Immutable view of all keys and which one is current.
#[derive(Debug, Default)]
pub struct KeyRing {
    /// Keys in creation order.
    keys: Vec<Arc<SigningKey>>,
    current_kid: Option<String>,
}

impl KeyRing {
    pub fn get(&self, kid: &str) -> Option<&Arc<SigningKey>> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    pub fn current(&self) -> Option<&Arc<SigningKey>> {
        self.current_kid.as_deref().and_then(|kid| self.get(kid))
    }

    pub fn active_count(&self) -> usize {
        self.keys.iter().filter(|k| k.active).count()
    }

    fn to_registry(&self) -> KeyRegistry {
        KeyRegistry {
            keys: self
                .keys
                .iter()
                .map(|k| {
                    let (private_key_file, public_key_file) = key_file_names(&k.kid);
                    KeyRecord {
                        kid: k.kid.clone(),
                        algorithm: k.algorithm.clone(),
                        key_use: USE_SIG.to_string(),
                        created_at: k.created_at,
                        private_key_file,
                        public_key_file,
                        active: k.active,
                    }
                })
                .collect(),
            current_kid: self.current_kid.clone(),
        }
    }

    /// Generate a kid not present in this ring.
    fn next_kid(&self, now: DateTime<Utc>) -> String {
        let base = format!("{}{}", KEY_ID_PREFIX, now.timestamp_millis());
        if self.get(&base).is_none() {
            return base;
        }
        let mut n = 1u32;
        loop {
            let kid = format!("{}-{}", base, n);
            if self.get(&kid).is_none() {
                return kid;
            }
            n += 1;
        }
    }
}

/// Owner of the gateway's signing keys.
pub struct KeyStore {
    repository: SigningKeyRepository,
    ring: Snapshot<KeyRing>,
    lifecycle_lock: Mutex<()>,
    max_keys: usize,
}

impl KeyStore {
    /// Open the key store at `dir`, loading any keys already registered.
    ///
    /// Does not generate a key; the first [`current_key`](Self::current_key)
    /// call does if none exists.
    #[instrument(skip_all)]
    pub async fn open(dir: impl Into<PathBuf>, max_keys: usize) -> Result<Self, GatewayError> {
        let repository = SigningKeyRepository::new(dir);
        let registry = repository.load_registry().await?;

        let mut keys = Vec::with_capacity(registry.keys.len());
        for record in &registry.keys {
            let private_key_pem = repository.read_private_key(record).await?;
            let public_key_pem = repository.read_public_key(record).await?;
            let public_params = crypto::public_params(&public_key_pem)?;

            keys.push(Arc::new(SigningKey {
                kid: record.kid.clone(),
                algorithm: record.algorithm.clone(),
                created_at: record.created_at,
                private_key_pem,
                public_key_pem,
                public_params,
                active: record.active,
            }));
        }

        let ring = KeyRing {
            keys,
            current_kid: registry.current_kid,
        };

        if ring.current_kid.is_some() && ring.current().is_none() {
            return Err(GatewayError::KeyStorage(
                "Key registry names a current key that is not registered".to_string(),
            ));
        }

        tracing::info!(
            target: "gateway.keys",
            dir = %repository.dir().display(),
            key_count = ring.keys.len(),
            active_keys = ring.active_count(),
            current_kid = ?ring.current_kid,
            "Key store opened"
        );
        set_active_signing_keys(ring.active_count());

        Ok(Self {
            repository,
            ring: Snapshot::new(ring),
            lifecycle_lock: Mutex::new(()),
            max_keys: max_keys.max(1),
        })
    }

    /// The key used for new signatures, generating one if none exists.
    pub async fn current_key(&self) -> Result<Arc<SigningKey>, GatewayError> {
        if let Some(key) = self.ring.load().current() {
            return Ok(Arc::clone(key));
        }

        let _guard = self.lifecycle_lock.lock().await;

        // Another caller may have bootstrapped while we waited
        if let Some(key) = self.ring.load().current() {
            return Ok(Arc::clone(key));
        }

        tracing::info!(target: "gateway.keys", "No current signing key, generating initial key");
        self.generate_current_locked().await
    }

    /// Private key PEM for `kid`, active or not.
    pub fn private_key(&self, kid: &str) -> Option<SecretString> {
        self.ring
            .load()
            .get(kid)
            .map(|k| duplicate(&k.private_key_pem))
    }

    /// Public key PEM for `kid`, active or not.
    pub fn public_key(&self, kid: &str) -> Option<String> {
        self.ring.load().get(kid).map(|k| k.public_key_pem.clone())
    }

    /// Loaded key for `kid`, active or not.
    pub fn key(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.ring.load().get(kid).cloned()
    }

    /// Discovery document: every active key.
    pub fn publishable_key_set(&self) -> JwkSet {
        JwkSet {
            keys: self
                .ring
                .load()
                .keys
                .iter()
                .filter(|k| k.active)
                .map(|k| k.to_jwk())
                .collect(),
        }
    }

    /// Registry metadata for the admin endpoint.
    pub fn key_infos(&self) -> Vec<SigningKeyInfo> {
        let ring = self.ring.load();
        ring.keys
            .iter()
            .map(|k| SigningKeyInfo {
                kid: k.kid.clone(),
                algorithm: k.algorithm.clone(),
                created_at: k.created_at,
                active: k.active,
                current: ring.current_kid.as_deref() == Some(k.kid.as_str()),
            })
            .collect()
    }

    /// Generate a new key and make it current.
    ///
    /// The previous key stays active, so tokens it signed keep verifying,
    /// until more than `max_keys` keys are active; then the oldest are
    /// deactivated.
    #[instrument(skip_all)]
    pub async fn rotate(&self) -> Result<Arc<SigningKey>, GatewayError> {
        let _guard = self.lifecycle_lock.lock().await;

        match self.generate_current_locked().await {
            Ok(key) => {
                record_key_rotation("success");
                Ok(key)
            }
            Err(e) => {
                record_key_rotation("error");
                Err(e)
            }
        }
    }

    /// Remove inactive keys and their files. Returns the purged kids.
    #[instrument(skip_all)]
    pub async fn purge_inactive(&self) -> Result<Vec<String>, GatewayError> {
        let _guard = self.lifecycle_lock.lock().await;
        let ring = self.ring.load();

        let (retained, purged): (Vec<_>, Vec<_>) =
            ring.keys.iter().cloned().partition(|k| k.active);

        if purged.is_empty() {
            return Ok(Vec::new());
        }

        let next = KeyRing {
            keys: retained,
            current_kid: ring.current_kid.clone(),
        };
        let purged_records: Vec<KeyRecord> = ring
            .to_registry()
            .keys
            .into_iter()
            .filter(|r| !r.active)
            .collect();

        // Registry first: a crash afterwards leaves only unreferenced files
        self.repository.save_registry(&next.to_registry()).await?;
        self.ring.store(next);

        for record in &purged_records {
            if let Err(e) = self.repository.remove_key_material(record).await {
                tracing::warn!(target: "gateway.keys", kid = %record.kid, error = %e, "Failed to remove purged key files");
            }
        }

        let kids: Vec<String> = purged.iter().map(|k| k.kid.clone()).collect();
        tracing::info!(target: "gateway.keys", purged = ?kids, "Inactive signing keys purged");
        Ok(kids)
    }

    /// Generate, persist, and publish a new current key.
    ///
    /// Caller must hold `lifecycle_lock`.
    async fn generate_current_locked(&self) -> Result<Arc<SigningKey>, GatewayError> {
        let ring = self.ring.load();
        let now = Utc::now();
        let kid = ring.next_kid(now);

        let pair = tokio::task::spawn_blocking(crypto::generate_signing_key)
            .await
            .map_err(|e| {
                GatewayError::Crypto(format!("Key generation task failed: {}", e))
            })??;
        let public_params = crypto::public_params(&pair.public_key_pem)?;

        let record = self.repository.write_key_material(&kid, &pair, now).await?;

        let new_key = Arc::new(SigningKey {
            kid: kid.clone(),
            algorithm: crypto::SIGNING_ALGORITHM_NAME.to_string(),
            created_at: now,
            private_key_pem: pair.private_key_pem,
            public_key_pem: pair.public_key_pem,
            public_params,
            active: true,
        });

        let mut keys: Vec<Arc<SigningKey>> = ring.keys.clone();
        keys.push(Arc::clone(&new_key));
        let deactivated = deactivate_oldest(&mut keys, self.max_keys);

        let next = KeyRing {
            keys,
            current_kid: Some(kid.clone()),
        };

        if let Err(e) = self.repository.save_registry(&next.to_registry()).await {
            let _ = self.repository.remove_key_material(&record).await;
            return Err(e);
        }

        let active = next.active_count();
        self.ring.store(next);
        set_active_signing_keys(active);

        tracing::info!(
            target: "gateway.keys",
            kid = %kid,
            previous_kid = ?ring.current_kid,
            deactivated = ?deactivated,
            active_keys = active,
            "Signing key generated and made current"
        );

        Ok(new_key)
    }
}

/// Deactivate the oldest active keys until at most `max_keys` remain active.
///
/// The newest key is never deactivated. Returns the deactivated kids.
fn deactivate_oldest(keys: &mut [Arc<SigningKey>], max_keys: usize) -> Vec<String> {
    let mut active = keys.iter().filter(|k| k.active).count();
    let mut deactivated = Vec::new();
    let newest = keys.len().saturating_sub(1);

    for (index, key) in keys.iter_mut().enumerate() {
        if active <= max_keys {
            break;
        }
        if key.active && index != newest {
            deactivated.push(key.kid.clone());
            *key = Arc::new(key.deactivated());
            active -= 1;
        }
    }

    deactivated
}
