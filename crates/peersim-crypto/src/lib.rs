//! Peersim Crypto -- session key agreement, AES-256-CBC, BLAKE2b digests.
//!
//! Compatible with the node under test:
//! - secp256k1 ECDH, shared secret = x-coordinate of the shared point (32 bytes)
//! - AES-256-CBC with PKCS#7 padding, 16-byte IV supplied by the caller
//! - BLAKE2b with a 32-byte output, optionally keyed (message signatures)

use aes::Aes256;
use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::{Blake2b, Blake2bMac, Digest};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

pub mod ephemeral;

// Re-exports
pub use ephemeral::EphemeralKey;

/// Shared secret length in bytes (AES-256 key).
pub const SECRET_LENGTH: usize = 32;

/// Nonce / IV length in bytes.
pub const IV_LENGTH: usize = 16;

/// Uncompressed secp256k1 public key without the SEC1 tag byte.
pub const PUBLIC_KEY_LENGTH: usize = 64;

/// Maximum BLAKE2b key length.
const MAX_MAC_KEY_LENGTH: usize = 64;

/// IV used for the first nonce exchange, before either side knows the other's nonce.
pub const ZERO_IV: [u8; IV_LENGTH] = [0u8; IV_LENGTH];

type Blake2b256 = Blake2b<U32>;
type Blake2b256Mac = Blake2bMac<U32>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("decryption failed: bad padding or wrong key")]
    DecryptionFailed,
    #[error("ciphertext length {0} is not a multiple of the block size")]
    InvalidCiphertextLength(usize),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("invalid MAC key length: {0} (max {MAX_MAC_KEY_LENGTH})")]
    InvalidKeyLength(usize),
}

/// BLAKE2b-256 digest of `data`.
pub fn blake256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keyed BLAKE2b-256 digest of `data`. Used as the p2p message signature.
pub fn blake256_with_key(data: &[u8], key: &[u8]) -> Result<[u8; 32], CryptoError> {
    if key.len() > MAX_MAC_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    let mut mac = <Blake2b256Mac as Mac>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// AES-256-CBC cipher keyed with a session's shared secret.
///
/// The IV is chosen per call because the two directions of a session use
/// different nonces.
#[derive(Clone)]
pub struct SessionCipher {
    key: [u8; SECRET_LENGTH],
}

impl SessionCipher {
    pub fn new(secret: [u8; SECRET_LENGTH]) -> Self {
        Self { key: secret }
    }

    /// Encrypt with PKCS#7 padding. Output is always a non-empty multiple of 16 bytes.
    pub fn encrypt(&self, iv: &[u8; IV_LENGTH], plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.key.into(), &(*iv).into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub fn decrypt(&self, iv: &[u8; IV_LENGTH], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.is_empty() || ciphertext.len() % IV_LENGTH != 0 {
            return Err(CryptoError::InvalidCiphertextLength(ciphertext.len()));
        }
        Aes256CbcDec::new(&self.key.into(), &(*iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}
