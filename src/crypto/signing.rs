//! Identity signing and verification
//!
//! Ed25519 key pairs backing log writer identities. A signing key is derived
//! deterministically from a 32-byte seed so the same key material always
//! yields the same identity.

use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
use rand::rngs::OsRng;

use crate::crypto::hash::{address_from_public_key, Hash256};

/// Ed25519 signature (64 bytes)
pub type Signature64 = [u8; SIGNATURE_LENGTH];

/// Ed25519 public key (32 bytes)
pub type PublicKey32 = [u8; PUBLIC_KEY_LENGTH];

/// Ed25519 secret key (32 bytes)
pub type SecretKey32 = [u8; SECRET_KEY_LENGTH];

/// Error type for signing operations
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("invalid signature format")]
    InvalidSignatureFormat,

    #[error("invalid public key format")]
    InvalidPublicKeyFormat,

    #[error("invalid secret key format")]
    InvalidSecretKeyFormat,

    #[error("signature verification failed")]
    VerificationFailed,
}

// ============================================================================
// Identity Signing Key
// ============================================================================

/// Signing half of a writer identity
#[derive(Clone)]
pub struct IdentitySigningKey {
    signing_key: SigningKey,
}

impl IdentitySigningKey {
    /// Generate a new random signing key
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create from a 32-byte seed
    pub fn from_seed(seed: &Hash256) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Create from a secret key slice of exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SigningError> {
        let secret: SecretKey32 = bytes
            .try_into()
            .map_err(|_| SigningError::InvalidSecretKeyFormat)?;
        Ok(Self::from_seed(&secret))
    }

    /// Get the secret key bytes
    pub fn to_bytes(&self) -> SecretKey32 {
        self.signing_key.to_bytes()
    }

    /// Get the verifying half
    pub fn public_key(&self) -> IdentityVerifyingKey {
        IdentityVerifyingKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> PublicKey32 {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Address derived from the public key
    pub fn address(&self) -> String {
        address_from_public_key(&self.public_key_bytes())
    }

    /// Sign an arbitrary message
    pub fn sign(&self, message: &[u8]) -> Signature64 {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for IdentitySigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySigningKey")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Identity Verifying Key
// ============================================================================

/// Public half of a writer identity
#[derive(Clone)]
pub struct IdentityVerifyingKey {
    verifying_key: VerifyingKey,
}

impl IdentityVerifyingKey {
    /// Create from public key bytes
    pub fn from_bytes(bytes: &PublicKey32) -> Result<Self, SigningError> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|_| SigningError::InvalidPublicKeyFormat)?;
        Ok(Self { verifying_key })
    }

    /// Create from a public key slice of exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SigningError> {
        let public: PublicKey32 = bytes
            .try_into()
            .map_err(|_| SigningError::InvalidPublicKeyFormat)?;
        Self::from_bytes(&public)
    }

    /// Get the public key bytes
    pub fn to_bytes(&self) -> PublicKey32 {
        self.verifying_key.to_bytes()
    }

    /// Verify a signature over `message`
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), SigningError> {
        let signature: Signature64 = signature
            .try_into()
            .map_err(|_| SigningError::InvalidSignatureFormat)?;
        let sig = Signature::from_bytes(&signature);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| SigningError::VerificationFailed)
    }
}

impl std::fmt::Debug for IdentityVerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityVerifyingKey")
            .field("public_key", &hex::encode(self.to_bytes()))
            .finish()
    }
}

// ============================================================================
// Hex Helpers
// ============================================================================

/// Decode a hex string with or without a `0x` prefix
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str)
}

/// Encode bytes as hex with a `0x` prefix
pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

// ============================================================================
// Tests
// ============================================================================
