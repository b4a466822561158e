//! Pairing key and challenge proofs for pairsync.
//!
//! This module provides:
//! - Argon2id derivation of a pairing secret from a shared passphrase
//! - HKDF-SHA256 derivation of the pairing key from that secret
//! - HMAC-SHA256 proofs for the mutual challenge/response handshake
//!
//! # Security Notes
//!
//! - The handshake proves both peers hold the same pairing key; it does not
//!   encrypt session traffic
//! - Proofs are domain-separated by role so a challenge cannot be reflected
//!   back at its sender
//! - Proof comparison is constant-time (`Mac::verify_slice`)

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use pairsync_types::NONCE_LEN;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Pairing secret and key size (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// The OS random source failed.
    #[error("random source unavailable: {0}")]
    RandomUnavailable(String),
}

/// Argon2id cost parameters for passphrase stretching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl Argon2Params {
    /// Explicit parameters.
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }

    /// Get memory in KiB.
    pub fn memory_kib(&self) -> u32 {
        self.memory_kib
    }

    /// Get iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Convert to argon2 Params.
    fn to_argon2_params(self) -> Result<Params, CryptoError> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))
    }
}

impl Default for Argon2Params {
    /// 19 MiB, 2 iterations, 1 lane.
    fn default() -> Self {
        Self::new(19 * 1024, 2, 1)
    }
}

/// Secret shared by two paired devices.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PairingSecret([u8; KEY_SIZE]);

impl PairingSecret {
    /// Stretch a passphrase with Argon2id.
    pub fn from_passphrase(passphrase: &str, params: Argon2Params) -> Result<Self, CryptoError> {
        // Domain-separated salt; both devices must derive the same secret
        let salt = b"pairsync-pairing-secret-v1";

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2_params()?);

        let mut output = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut output)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

        Ok(Self(output))
    }

    /// Create a random secret.
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; KEY_SIZE];
        getrandom::getrandom(&mut bytes)
            .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Wrap raw secret bytes (e.g. from a pairing QR code).
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for PairingSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PairingSecret([REDACTED])")
    }
}

/// Which half of the handshake a proof answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofRole {
    /// Responder answering the initiator's challenge.
    Response,
    /// Initiator answering the responder's counter-challenge.
    Confirmation,
}

impl ProofRole {
    fn label(&self) -> &'static [u8] {
        match self {
            ProofRole::Response => b"response",
            ProofRole::Confirmation => b"confirmation",
        }
    }
}

/// Key used to prove possession of the pairing secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PairingKey {
    auth_key: [u8; KEY_SIZE],
}

impl PairingKey {
    /// Derive the pairing key from a secret via HKDF-SHA256.
    pub fn derive(secret: &PairingSecret) -> Result<Self, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(b"pairsync-pairing-key-v1"), secret.as_bytes());

        let mut auth_key = [0u8; KEY_SIZE];
        hkdf.expand(b"handshake-authentication", &mut auth_key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

        Ok(Self { auth_key })
    }

    /// Shortcut: passphrase → secret → key.
    pub fn from_passphrase(passphrase: &str, params: Argon2Params) -> Result<Self, CryptoError> {
        Self::derive(&PairingSecret::from_passphrase(passphrase, params)?)
    }

    fn mac(&self, role: ProofRole, nonce: &[u8; NONCE_LEN]) -> Result<HmacSha256, CryptoError> {
        let mut mac = HmacSha256::new_from_slice(&self.auth_key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        mac.update(role.label());
        mac.update(nonce);
        Ok(mac)
    }

    /// Compute `HMAC(k, role || nonce)`.
    pub fn prove(
        &self,
        role: ProofRole,
        nonce: &[u8; NONCE_LEN],
    ) -> Result<[u8; NONCE_LEN], CryptoError> {
        let tag = self.mac(role, nonce)?.finalize().into_bytes();
        let mut out = [0u8; NONCE_LEN];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Check a proof in constant time.
    pub fn verify(&self, role: ProofRole, nonce: &[u8; NONCE_LEN], proof: &[u8; NONCE_LEN]) -> bool {
        match self.mac(role, nonce) {
            Ok(mac) => mac.verify_slice(proof).is_ok(),
            Err(_) => false,
        }
    }
}

// Don't leak key in debug output
impl std::fmt::Debug for PairingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PairingKey([REDACTED])")
    }
}

/// Fresh random challenge nonce.
pub fn fresh_nonce() -> Result<[u8; NONCE_LEN], CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::RandomUnavailable(e.to_string()))?;
    Ok(nonce)
}
