//! On-disk registry of gateway signing keys.
//!
//! Layout under the keys directory:
//!
//! ```text
//! keys.json                         registry (metadata only)
//! <kid>.private.pem                 PKCS#8 private key, mode 0600
//! <kid>.public.pem                  SPKI public key
//! ```
//!
//! Key files are always written under fresh names before the registry that
//! references them, and the registry is replaced by rename. A crash between
//! the two steps leaves only unreferenced PEM files behind.

use crate::crypto::{GeneratedKeyPair, SIGNING_ALGORITHM_NAME};
use crate::errors::GatewayError;
use chrono::{DateTime, Utc};
use common::jwks::USE_SIG;
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Registry file name inside the keys directory.
pub const REGISTRY_FILE: &str = "keys.json";

/// PEM file names for `kid`, relative to the keys directory.
pub fn key_file_names(kid: &str) -> (String, String) {
    (format!("{}.private.pem", kid), format!("{}.public.pem", kid))
}

/// Metadata for one key, as stored in `keys.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    pub kid: String,
    pub algorithm: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub created_at: DateTime<Utc>,
    /// File name relative to the keys directory.
    pub private_key_file: String,
    /// File name relative to the keys directory.
    pub public_key_file: String,
    pub active: bool,
}

/// Contents of `keys.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRegistry {
    pub keys: Vec<KeyRecord>,
    pub current_kid: Option<String>,
}

/// File-backed signing key storage.
#[derive(Debug, Clone)]
pub struct SigningKeyRepository {
    dir: PathBuf,
}

impl SigningKeyRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the registry, creating the keys directory if needed.
    ///
    /// A missing registry file is an empty registry.
    pub async fn load_registry(&self) -> Result<KeyRegistry, GatewayError> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            GatewayError::KeyStorage(format!(
                "Failed to create keys directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let path = self.dir.join(REGISTRY_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(KeyRegistry::default());
            }
            Err(e) => {
                return Err(GatewayError::KeyStorage(format!(
                    "Failed to read key registry: {}",
                    e
                )))
            }
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::KeyStorage(format!("Corrupt key registry: {}", e)))
    }

    /// Write both PEM files for `kid` under fresh names.
    ///
    /// Fails if either file already exists. Returns the record to add to the
    /// registry; the caller must still persist the registry.
    pub async fn write_key_material(
        &self,
        kid: &str,
        pair: &GeneratedKeyPair,
        created_at: DateTime<Utc>,
    ) -> Result<KeyRecord, GatewayError> {
        let (private_key_file, public_key_file) = key_file_names(kid);

        write_new_file(
            &self.dir.join(&private_key_file),
            pair.private_key_pem.expose_secret().as_bytes(),
            true,
        )
        .await?;

        if let Err(e) = write_new_file(
            &self.dir.join(&public_key_file),
            pair.public_key_pem.as_bytes(),
            false,
        )
        .await
        {
            let _ = fs::remove_file(self.dir.join(&private_key_file)).await;
            return Err(e);
        }

        Ok(KeyRecord {
            kid: kid.to_string(),
            algorithm: SIGNING_ALGORITHM_NAME.to_string(),
            key_use: USE_SIG.to_string(),
            created_at,
            private_key_file,
            public_key_file,
            active: true,
        })
    }

    /// Replace `keys.json` atomically (temp file, sync, rename).
    pub async fn save_registry(&self, registry: &KeyRegistry) -> Result<(), GatewayError> {
        let json = serde_json::to_vec_pretty(registry)
            .map_err(|e| GatewayError::KeyStorage(format!("Failed to encode registry: {}", e)))?;

        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", REGISTRY_FILE, uuid::Uuid::new_v4()));

        if let Err(e) = write_new_file(&tmp, &json, false).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        fs::rename(&tmp, self.dir.join(REGISTRY_FILE))
            .await
            .map_err(|e| {
                GatewayError::KeyStorage(format!("Failed to replace key registry: {}", e))
            })
    }

    pub async fn read_private_key(&self, record: &KeyRecord) -> Result<SecretString, GatewayError> {
        let pem = fs::read_to_string(self.dir.join(&record.private_key_file))
            .await
            .map_err(|e| {
                GatewayError::KeyStorage(format!(
                    "Failed to read private key for {}: {}",
                    record.kid, e
                ))
            })?;
        Ok(SecretString::from(pem))
    }

    pub async fn read_public_key(&self, record: &KeyRecord) -> Result<String, GatewayError> {
        fs::read_to_string(self.dir.join(&record.public_key_file))
            .await
            .map_err(|e| {
                GatewayError::KeyStorage(format!(
                    "Failed to read public key for {}: {}",
                    record.kid, e
                ))
            })
    }

    /// Delete both PEM files for a record. Missing files are ignored.
    pub async fn remove_key_material(&self, record: &KeyRecord) -> Result<(), GatewayError> {
        for file in [&record.private_key_file, &record.public_key_file] {
            match fs::remove_file(self.dir.join(file)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(GatewayError::KeyStorage(format!(
                        "Failed to remove {}: {}",
                        file, e
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Create `path` (must not exist), write `contents`, and sync to disk.
async fn write_new_file(path: &Path, contents: &[u8], private: bool) -> Result<(), GatewayError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        options.mode(if private { 0o600 } else { 0o644 });
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(path).await.map_err(|e| {
        GatewayError::KeyStorage(format!("Failed to create {}: {}", path.display(), e))
    })?;

    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fake_pair() -> GeneratedKeyPair {
        GeneratedKeyPair {
            private_key_pem: SecretString::from("private-pem".to_string()),
            public_key_pem: "public-pem".to_string(),
        }
    }

    #[tokio::test]
    async fn test_load_registry_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SigningKeyRepository::new(dir.path().join("keys"));

        let registry = repo.load_registry().await.unwrap();

        assert!(registry.keys.is_empty());
        assert!(registry.current_kid.is_none());
        assert!(dir.path().join("keys").is_dir());
    }

    #[tokio::test]
    async fn test_save_and_load_registry() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SigningKeyRepository::new(dir.path());
        repo.load_registry().await.unwrap();

        let record = repo
            .write_key_material("gateway-key-1", &fake_pair(), Utc::now())
            .await
            .unwrap();
        let registry = KeyRegistry {
            keys: vec![record.clone()],
            current_kid: Some("gateway-key-1".to_string()),
        };
        repo.save_registry(&registry).await.unwrap();

        let loaded = repo.load_registry().await.unwrap();
        assert_eq!(loaded, registry);

        assert_eq!(
            repo.read_private_key(&record).await.unwrap().expose_secret(),
            "private-pem"
        );
        assert_eq!(repo.read_public_key(&record).await.unwrap(), "public-pem");

        // No temp files left behind
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }

    #[tokio::test]
    async fn test_registry_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SigningKeyRepository::new(dir.path());
        let record = repo
            .write_key_material("gateway-key-1", &fake_pair(), Utc::now())
            .await
            .unwrap();
        repo.save_registry(&KeyRegistry {
            keys: vec![record],
            current_kid: Some("gateway-key-1".to_string()),
        })
        .await
        .unwrap();

        let raw = std::fs::read_to_string(dir.path().join(REGISTRY_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["currentKid"], "gateway-key-1");
        assert_eq!(value["keys"][0]["use"], "sig");
        assert_eq!(value["keys"][0]["privateKeyFile"], "gateway-key-1.private.pem");
    }

    #[tokio::test]
    async fn test_write_key_material_refuses_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SigningKeyRepository::new(dir.path());

        repo.write_key_material("k", &fake_pair(), Utc::now())
            .await
            .unwrap();
        let result = repo.write_key_material("k", &fake_pair(), Utc::now()).await;

        assert!(matches!(result, Err(GatewayError::KeyStorage(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_key_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let repo = SigningKeyRepository::new(dir.path());
        let record = repo
            .write_key_material("k", &fake_pair(), Utc::now())
            .await
            .unwrap();

        let mode = std::fs::metadata(dir.path().join(&record.private_key_file))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_corrupt_registry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(REGISTRY_FILE), b"{not json").unwrap();
        let repo = SigningKeyRepository::new(dir.path());

        assert!(matches!(
            repo.load_registry().await,
            Err(GatewayError::KeyStorage(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_key_material_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SigningKeyRepository::new(dir.path());
        let record = repo
            .write_key_material("k", &fake_pair(), Utc::now())
            .await
            .unwrap();

        repo.remove_key_material(&record).await.unwrap();
        repo.remove_key_material(&record).await.unwrap();
        assert!(!dir.path().join(&record.private_key_file).exists());
    }
}
