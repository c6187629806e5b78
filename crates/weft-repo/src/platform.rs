//! Clock and signing abstractions
//!
//! The repository never reads the system clock or touches key material
//! directly; both come in through these traits so hosts can substitute
//! deterministic implementations in tests and platform-native ones in
//! production.

use crate::error::{RepoError, Result};
use bytes::Bytes;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Timestamp source, milliseconds since the Unix epoch.
///
/// Must be monotonic non-decreasing within a single process so commit
/// ordering holds; monotonicity across restarts is not required.
pub trait Clock {
    /// Current timestamp in milliseconds since the Unix epoch
    fn now(&self) -> i64;
}

/// Wall-clock implementation backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at the given millisecond timestamp
    pub fn new(start: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Advance the clock by the given number of milliseconds
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Signing keypair held by a repository's identity.
///
/// Keys serialize as hex strings. The secret key only ever leaves the
/// repository inside a [`crate::Snapshot`] produced by `backup()`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypair {
    /// Public verification key bytes
    #[serde(with = "hex_bytes")]
    pub public: Bytes,
    /// Secret signing key bytes
    #[serde(with = "hex_bytes")]
    pub secret: Bytes,
}

impl fmt::Debug for Keypair {
    // keep the secret key out of logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &hex::encode(&self.public))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Cryptographic operations abstraction.
///
/// Key and signature formats are implementation-defined byte strings; the
/// repository treats them as opaque. Any conformant implementation must be
/// able to verify signatures produced by another instance of itself.
pub trait Crypto {
    /// Generate a fresh signing keypair
    fn generate_keypair(&self) -> Result<Keypair>;

    /// Sign data with the given secret key
    fn sign(&self, secret: &[u8], data: &[u8]) -> Result<Bytes>;

    /// Verify a signature against the given public key.
    ///
    /// Returns `Ok(false)` for a well-formed signature that does not verify;
    /// errors are reserved for malformed keys or signatures.
    fn verify(&self, public: &[u8], data: &[u8], sig: &[u8]) -> Result<bool>;
}

/// Ed25519 implementation of [`Crypto`] (32-byte keys, 64-byte signatures)
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Crypto;

impl Crypto for Ed25519Crypto {
    fn generate_keypair(&self) -> Result<Keypair> {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Ok(Keypair {
            public: Bytes::copy_from_slice(&signing_key.verifying_key().to_bytes()),
            secret: Bytes::copy_from_slice(&signing_key.to_bytes()),
        })
    }

    fn sign(&self, secret: &[u8], data: &[u8]) -> Result<Bytes> {
        let secret: &[u8; 32] = secret
            .try_into()
            .map_err(|_| RepoError::crypto_msg("secret key must be 32 bytes"))?;
        let signing_key = SigningKey::from_bytes(secret);
        let sig = signing_key.sign(data);
        Ok(Bytes::copy_from_slice(&sig.to_bytes()))
    }

    fn verify(&self, public: &[u8], data: &[u8], sig: &[u8]) -> Result<bool> {
        let public: &[u8; 32] = public
            .try_into()
            .map_err(|_| RepoError::crypto_msg("public key must be 32 bytes"))?;
        let verifying_key = VerifyingKey::from_bytes(public).map_err(RepoError::crypto)?;
        let sig = ed25519_dalek::Signature::from_slice(sig).map_err(RepoError::crypto)?;
        Ok(verifying_key.verify_strict(data, &sig).is_ok())
    }
}

/// Serde helper serializing [`Bytes`] as a hex string
pub(crate) mod hex_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let value = String::deserialize(deserializer)?;
        hex::decode(&value)
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_positive() {
        assert!(SystemClock.now() > 0);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now(), 1_500);

        // clones share the instant
        let other = clock.clone();
        other.advance(1);
        assert_eq!(clock.now(), 1_501);
    }

    #[test]
    fn sign_and_verify() {
        let crypto = Ed25519Crypto;
        let keypair = crypto.generate_keypair().unwrap();

        let sig = crypto.sign(&keypair.secret, b"message").unwrap();
        assert!(crypto.verify(&keypair.public, b"message", &sig).unwrap());
        assert!(!crypto.verify(&keypair.public, b"other", &sig).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let crypto = Ed25519Crypto;
        let alice = crypto.generate_keypair().unwrap();
        let bob = crypto.generate_keypair().unwrap();

        let sig = crypto.sign(&alice.secret, b"message").unwrap();
        assert!(!crypto.verify(&bob.public, b"message", &sig).unwrap());
    }

    #[test]
    fn malformed_keys_error() {
        let crypto = Ed25519Crypto;
        assert!(crypto.sign(b"short", b"message").is_err());
        assert!(crypto.verify(b"short", b"message", &[0u8; 64]).is_err());
    }

    #[test]
    fn keypair_serde_round_trip() {
        let keypair = Ed25519Crypto.generate_keypair().unwrap();
        let json = serde_json::to_string(&keypair).unwrap();
        let back: Keypair = serde_json::from_str(&json).unwrap();
        assert_eq!(back, keypair);
    }

    #[test]
    fn debug_redacts_secret() {
        let keypair = Ed25519Crypto.generate_keypair().unwrap();
        let debug = format!("{:?}", keypair);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&hex::encode(&keypair.secret)));
    }
}
