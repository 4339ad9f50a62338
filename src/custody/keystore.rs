//! Encrypted keypair store
//!
//! Each wallet name maps to one JSON record. The secret seed is sealed with
//! AES-256-GCM under a key derived by Argon2id from the process passphrase
//! and a per-record salt. Salt and nonce are drawn fresh for every record and
//! a record is never rewritten once created.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::keypair::Keypair;
use crate::error::{Result, SigilError};

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;
const MAX_NAME_LEN: usize = 64;

/// Argon2id cost parameters, stored with every record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Time cost (iterations)
    pub iterations: u32,
    /// Parallelism factor
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

impl KdfParams {
    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| SigilError::Configuration(format!("invalid argon2 parameters: {}", e)))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Persisted keypair record. Byte fields are base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    pub name: String,
    pub public_key: String,
    pub cipher_text: String,
    pub iv: String,
    pub salt: String,
    pub auth_tag: String,
    pub created_at: DateTime<Utc>,
    pub kdf: KdfParams,
}

/// File-backed custody of agent keypairs
pub struct KeyStore {
    dir: PathBuf,
    passphrase: Option<Zeroizing<String>>,
    kdf: KdfParams,
}

impl KeyStore {
    /// Create a store rooted at `dir`.
    ///
    /// The passphrase is fixed for the life of the store. Without one, `list`
    /// and `public_key` still work but `create` and `load` fail with a
    /// configuration error.
    pub fn new(dir: impl Into<PathBuf>, passphrase: Option<Zeroizing<String>>, kdf: KdfParams) -> Self {
        Self {
            dir: dir.into(),
            passphrase,
            kdf,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn passphrase(&self) -> Result<Zeroizing<String>> {
        self.passphrase.clone().ok_or_else(|| {
            SigilError::Configuration(
                "wallet passphrase not configured (set SIGIL_WALLET_PASSPHRASE)".to_string(),
            )
        })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Generate, seal, and persist a new keypair under `name`
    pub async fn create(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        let passphrase = self.passphrase()?;
        let kdf = self.kdf;
        let owned_name = name.to_string();

        let (record, public_key) = tokio::task::spawn_blocking(move || {
            let keypair = Keypair::generate();
            let record = seal(&owned_name, &keypair, &passphrase, kdf)?;
            Ok::<_, SigilError>((record, keypair.public_key()))
        })
        .await
        .map_err(|e| SigilError::Internal(format!("sealing task failed: {}", e)))??;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.record_path(name);
        let body = serde_json::to_vec_pretty(&record)?;

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SigilError::WalletExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        restrict_permissions(&path)?;

        info!(wallet = %name, public_key = %public_key, "Created wallet");
        Ok(public_key)
    }

    /// Read and decrypt the keypair stored under `name`
    pub async fn load(&self, name: &str) -> Result<Keypair> {
        validate_name(name)?;
        let passphrase = self.passphrase()?;
        let record = self.read_record(name).await?;

        let keypair = tokio::task::spawn_blocking(move || open(&record, &passphrase))
            .await
            .map_err(|e| SigilError::Internal(format!("unsealing task failed: {}", e)))??;

        debug!(wallet = %name, "Loaded wallet");
        Ok(keypair)
    }

    /// Public key recorded for `name`, without decrypting anything
    pub async fn public_key(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        Ok(self.read_record(name).await?.public_key)
    }

    pub async fn exists(&self, name: &str) -> bool {
        validate_name(name).is_ok()
            && tokio::fs::try_exists(self.record_path(name))
                .await
                .unwrap_or(false)
    }

    /// Names of every stored wallet, sorted. A missing directory is empty.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_record(&self, name: &str) -> Result<KeyRecord> {
        let raw = match tokio::fs::read(self.record_path(name)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SigilError::not_found(format!("wallet {}", name)));
            }
            Err(e) => return Err(e.into()),
        };
        // A record that no longer parses is indistinguishable from tampering.
        serde_json::from_slice(&raw).map_err(|_| SigilError::Authentication)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(SigilError::Validation(format!(
            "invalid wallet name {:?}: use 1-{} characters from [A-Za-z0-9_-]",
            name, MAX_NAME_LEN
        )))
    }
}

fn derive_key(passphrase: &str, salt: &[u8], kdf: KdfParams) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    kdf.argon2()?
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|_| SigilError::Authentication)?;
    Ok(key)
}

fn seal(name: &str, keypair: &Keypair, passphrase: &str, kdf: KdfParams) -> Result<KeyRecord> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(passphrase, &salt, kdf)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| SigilError::Internal(format!("cipher init failed: {}", e)))?;

    let secret = keypair.secret_bytes();
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), &secret[..])
        .map_err(|_| SigilError::Internal("encryption failed".to_string()))?;
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(KeyRecord {
        name: name.to_string(),
        public_key: keypair.public_key(),
        cipher_text: STANDARD.encode(&sealed),
        iv: STANDARD.encode(nonce_bytes),
        salt: STANDARD.encode(salt),
        auth_tag: STANDARD.encode(&tag),
        created_at: Utc::now(),
        kdf,
    })
}

fn open(record: &KeyRecord, passphrase: &str) -> Result<Keypair> {
    let decode = |field: &str| STANDARD.decode(field).map_err(|_| SigilError::Authentication);

    let cipher_text = decode(&record.cipher_text)?;
    let nonce_bytes = decode(&record.iv)?;
    let salt = decode(&record.salt)?;
    let tag = decode(&record.auth_tag)?;
    if nonce_bytes.len() != NONCE_LEN || tag.len() != TAG_LEN || salt.len() < 8 {
        return Err(SigilError::Authentication);
    }

    let key = derive_key(passphrase, &salt, record.kdf)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| SigilError::Internal(format!("cipher init failed: {}", e)))?;

    let mut sealed = cipher_text;
    sealed.extend_from_slice(&tag);
    let secret = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), sealed.as_slice())
            .map_err(|_| SigilError::Authentication)?,
    );

    let keypair = Keypair::from_secret_bytes(&secret).map_err(|_| SigilError::Authentication)?;
    if keypair.public_key() != record.public_key {
        return Err(SigilError::Authentication);
    }
    Ok(keypair)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Cheap argon2 settings so tests stay fast
    pub(crate) const TEST_KDF: KdfParams = KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    };

    pub(crate) fn test_store(dir: &TempDir) -> KeyStore {
        KeyStore::new(
            dir.path().join("wallets"),
            Some(Zeroizing::new("correct horse battery staple".to_string())),
            TEST_KDF,
        )
    }

    fn flip_bit(field: &str, bit: usize) -> String {
        let mut bytes = STANDARD.decode(field).unwrap();
        let idx = (bit / 8) % bytes.len();
        bytes[idx] ^= 1 << (bit % 8);
        STANDARD.encode(bytes)
    }

    async fn rewrite(store: &KeyStore, name: &str, record: &KeyRecord) {
        tokio::fs::write(store.record_path(name), serde_json::to_vec(record).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let public_key = store.create("alpha").await.unwrap();
        let loaded = store.load("alpha").await.unwrap();
        assert_eq!(loaded.public_key(), public_key);

        // The sealed secret decrypts to a seed that rebuilds the same identity.
        let rebuilt = Keypair::from_secret_bytes(&loaded.secret_bytes()[..]).unwrap();
        assert_eq!(rebuilt.secret_bytes()[..], loaded.secret_bytes()[..]);
        assert_eq!(store.public_key("alpha").await.unwrap(), public_key);
    }

    #[tokio::test]
    async fn each_record_gets_fresh_salt_and_nonce() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.create("a").await.unwrap();
        store.create("b").await.unwrap();

        let a = store.read_record("a").await.unwrap();
        let b = store.read_record("b").await.unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.public_key, b.public_key);
    }

    #[tokio::test]
    async fn create_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let original = store.create("alpha").await.unwrap();

        let err = store.create("alpha").await.unwrap_err();
        assert!(matches!(err, SigilError::WalletExists(_)));
        assert_eq!(store.load("alpha").await.unwrap().public_key(), original);
    }

    #[tokio::test]
    async fn tampering_any_field_fails_authentication() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        store.create("victim").await.unwrap();
        let pristine = store.read_record("victim").await.unwrap();

        type Field = fn(&mut KeyRecord) -> &mut String;
        let fields: [(&str, Field, usize); 4] = [
            ("cipherText", |r| &mut r.cipher_text, 32 * 8),
            ("iv", |r| &mut r.iv, NONCE_LEN * 8),
            ("salt", |r| &mut r.salt, SALT_LEN * 8),
            ("authTag", |r| &mut r.auth_tag, TAG_LEN * 8),
        ];

        for (label, field, bits) in fields {
            for bit in (0..bits).step_by(7) {
                let mut record = pristine.clone();
                let target = field(&mut record);
                *target = flip_bit(target, bit);
                rewrite(&store, "victim", &record).await;

                let err = store.load("victim").await.unwrap_err();
                assert!(
                    matches!(err, SigilError::Authentication),
                    "{} bit {} gave {:?}",
                    label,
                    bit,
                    err
                );
            }
        }

        rewrite(&store, "victim", &pristine).await;
        assert!(store.load("victim").await.is_ok());
    }

    #[tokio::test]
    async fn wrong_passphrase_looks_like_tampering() {
        let dir = TempDir::new().unwrap();
        test_store(&dir).create("alpha").await.unwrap();

        let other = KeyStore::new(
            dir.path().join("wallets"),
            Some(Zeroizing::new("wrong".to_string())),
            TEST_KDF,
        );
        let err = other.load("alpha").await.unwrap_err();
        assert!(matches!(err, SigilError::Authentication));
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = test_store(&dir).load("ghost").await.unwrap_err();
        assert!(matches!(err, SigilError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_passphrase_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path().join("wallets"), None, TEST_KDF);
        assert!(matches!(
            store.create("alpha").await,
            Err(SigilError::Configuration(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_is_sorted_and_tolerates_missing_dir() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        assert!(store.list().await.unwrap().is_empty());

        store.create("zulu").await.unwrap();
        store.create("alpha").await.unwrap();
        tokio::fs::write(store.dir().join("notes.txt"), b"x").await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["alpha", "zulu"]);
        assert!(store.exists("alpha").await);
        assert!(!store.exists("../alpha").await);
    }

    #[tokio::test]
    async fn rejects_path_like_names() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        for bad in ["", "../escape", "a/b", "name with space"] {
            assert!(matches!(
                store.create(bad).await,
                Err(SigilError::Validation(_))
            ));
        }
    }
}
