//! Peer identity — signing key pairs and the peer IDs derived from them.

use std::fmt;

use ed25519_dalek::{SECRET_KEY_LENGTH, SigningKey, VerifyingKey};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng, TryRngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::NetworkError;

/// A unique identifier for a peer host.
///
/// Always the hex-encoded SHA-256 digest of the peer's public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Derive the peer ID for a public key.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self(hex::encode(Sha256::digest(key.as_bytes())))
    }

    /// Wrap an already-encoded peer ID, e.g. one read off the wire.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A short prefix suitable for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The cryptographic identity of a peer host.
///
/// The peer ID is computed once from the public key and never changes.
pub struct Identity {
    signing_key: SigningKey,
    peer_id: PeerId,
}

impl Identity {
    fn from_secret(secret: [u8; SECRET_KEY_LENGTH]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret);
        let peer_id = PeerId::from_public_key(&signing_key.verifying_key());
        Self {
            signing_key,
            peer_id,
        }
    }

    /// The peer ID derived from this identity's public key.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// The public half of the key pair.
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

/// Where key material comes from.
///
/// A seed of `0` selects the operating system's secure RNG. Any other seed
/// selects a deterministic generator, so successive identities drawn from
/// one source are distinct but identical across runs with the same seed.
pub enum KeySource {
    Secure,
    Seeded(StdRng),
}

impl KeySource {
    pub fn from_seed(seed: i64) -> Self {
        if seed == 0 {
            Self::Secure
        } else {
            Self::Seeded(StdRng::seed_from_u64(seed as u64))
        }
    }

    pub fn is_deterministic(&self) -> bool {
        matches!(self, Self::Seeded(_))
    }

    /// Draw the next identity from this source.
    pub fn next_identity(&mut self) -> Result<Identity, NetworkError> {
        let mut secret = [0u8; SECRET_KEY_LENGTH];
        match self {
            Self::Secure => OsRng
                .try_fill_bytes(&mut secret)
                .map_err(|e| NetworkError::KeyGeneration(format!("Entropy source failed: {e}")))?,
            Self::Seeded(rng) => rng.fill_bytes(&mut secret),
        }
        Ok(Identity::from_secret(secret))
    }
}

/// Generate a single identity using the seed policy of [`KeySource`].
pub fn generate_identity(seed: i64) -> Result<Identity, NetworkError> {
    KeySource::from_seed(seed).next_identity()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_identity_is_reproducible() {
        let a = generate_identity(42).unwrap();
        let b = generate_identity(42).unwrap();
        assert_eq!(a.peer_id(), b.peer_id());
        assert_eq!(a.signing_key.to_bytes(), b.signing_key.to_bytes());
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = generate_identity(1).unwrap();
        let b = generate_identity(2).unwrap();
        assert_ne!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn test_negative_seed_is_deterministic() {
        let a = generate_identity(-7).unwrap();
        let b = generate_identity(-7).unwrap();
        assert_eq!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn test_zero_seed_uses_secure_randomness() {
        assert!(!KeySource::from_seed(0).is_deterministic());
        let a = generate_identity(0).unwrap();
        let b = generate_identity(0).unwrap();
        assert_ne!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn test_seeded_source_yields_distinct_reproducible_stream() {
        let mut first = KeySource::from_seed(42);
        let mut second = KeySource::from_seed(42);

        let run_a: Vec<PeerId> = (0..4)
            .map(|_| first.next_identity().unwrap().peer_id().clone())
            .collect();
        let run_b: Vec<PeerId> = (0..4)
            .map(|_| second.next_identity().unwrap().peer_id().clone())
            .collect();

        assert_eq!(run_a, run_b);
        let mut deduped = run_a.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), run_a.len());
    }

    #[test]
    fn test_peer_id_is_function_of_public_key() {
        let identity = generate_identity(9).unwrap();
        let derived = PeerId::from_public_key(&identity.public_key());
        assert_eq!(&derived, identity.peer_id());
        assert_eq!(derived.as_str().len(), 64);
        assert!(derived.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_peer_id_display_and_short() {
        let id = PeerId::from_string("0123456789abcdef");
        assert_eq!(format!("{id}"), "0123456789abcdef");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(PeerId::from_string("abc").short(), "abc");
    }

    #[test]
    fn test_peer_id_serialize_roundtrip() {
        let id = generate_identity(3).unwrap().peer_id().clone();
        let json = serde_json::to_string(&id).unwrap();
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
