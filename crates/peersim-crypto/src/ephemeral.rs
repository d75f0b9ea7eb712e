//! Ephemeral secp256k1 keys for the session handshake.
//!
//! Public keys travel as 64 bytes: the uncompressed SEC1 point with the
//! leading 0x04 tag stripped.

use k256::ecdh::diffie_hellman;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};

use crate::{CryptoError, PUBLIC_KEY_LENGTH, SECRET_LENGTH};

/// SEC1 tag for an uncompressed point.
const UNCOMPRESSED_TAG: u8 = 0x04;

/// One-shot key pair generated per session.
#[derive(Clone)]
pub struct EphemeralKey {
    secret: SecretKey,
}

impl EphemeralKey {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Load a key from a 32-byte big-endian scalar.
    pub fn from_bytes(bytes: &[u8; SECRET_LENGTH]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self { secret })
    }

    /// Public key in wire form (x || y).
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let point = self.secret.public_key().to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_LENGTH];
        // Skip the tag byte.
        out.copy_from_slice(&point.as_bytes()[1..]);
        out
    }

    /// ECDH with the peer's wire-form public key. Returns the x-coordinate
    /// of the shared point.
    pub fn shared_secret(
        &self,
        peer_public: &[u8; PUBLIC_KEY_LENGTH],
    ) -> Result<[u8; SECRET_LENGTH], CryptoError> {
        let peer = parse_public_key(peer_public)?;
        let shared = diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        let mut out = [0u8; SECRET_LENGTH];
        out.copy_from_slice(shared.raw_secret_bytes());
        Ok(out)
    }
}

impl std::fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKey").finish_non_exhaustive()
    }
}

fn parse_public_key(bytes: &[u8; PUBLIC_KEY_LENGTH]) -> Result<PublicKey, CryptoError> {
    let mut sec1 = [0u8; PUBLIC_KEY_LENGTH + 1];
    sec1[0] = UNCOMPRESSED_TAG;
    sec1[1..].copy_from_slice(bytes);
    PublicKey::from_sec1_bytes(&sec1).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}
