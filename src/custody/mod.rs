//! Key custody: agent identities sealed at rest under a process passphrase.

pub mod keypair;
pub mod keystore;

pub use keypair::{is_valid_public_key, verify_signature, Keypair};
pub use keystore::{KdfParams, KeyRecord, KeyStore};
