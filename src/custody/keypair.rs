use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Result, SigilError};

/// Length of an ed25519 secret seed in bytes
pub const SECRET_KEY_LEN: usize = 32;

/// An agent identity: an ed25519 signing key and its public half.
///
/// # Security
/// The secret seed never leaves this struct except through
/// [`Keypair::secret_bytes`], which hands out a zeroizing copy for sealing.
/// `Debug` prints only the public key.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a fresh identity from the OS random source
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; SECRET_KEY_LEN]);
        OsRng.fill_bytes(&mut seed[..]);
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Rebuild an identity from a 32-byte secret seed
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let seed: &[u8; SECRET_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| SigilError::Validation("secret key must be 32 bytes".to_string()))?;
        Ok(Self {
            signing: SigningKey::from_bytes(seed),
        })
    }

    /// Hex-encoded public key; this is the wallet address
    pub fn public_key(&self) -> String {
        hex::encode(self.signing.verifying_key().as_bytes())
    }

    /// Zeroizing copy of the secret seed
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LEN]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    /// Sign a message, returning the hex-encoded signature
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish()
    }
}

/// Check a hex signature against a hex public key
pub fn verify_signature(public_key: &str, message: &[u8], signature: &str) -> bool {
    let Ok(key_bytes) = hex::decode(public_key) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    verifying
        .verify(message, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}

/// Whether a string is a well-formed public key
pub fn is_valid_public_key(public_key: &str) -> bool {
    hex::decode(public_key)
        .ok()
        .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok())
        .map(|bytes| VerifyingKey::from_bytes(&bytes).is_ok())
        .unwrap_or(false)
}
