//! Identity provider
//!
//! Derives a writer identity from raw key material, signs on its behalf,
//! and verifies identities carried by received log entries.
//!
//! An identity is `{id, public_key, signature}` where `id` is the address of
//! the public key and `signature` is the key's signature over `id`.
//! Verification fails closed: every malformed or missing field yields
//! `false`, never an error or a panic.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::keystore::{Keystore, KeystoreError};
use crate::crypto::{
    address_from_public_key, decode_hex, derive_key_seed, IdentitySigningKey,
    IdentityVerifyingKey,
};
use crate::domain::Identity;

/// Error type for identity operations
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Key material could not be turned into a key pair
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The keystore holds a different key under the derived id
    #[error("keystore holds a different key for {id}")]
    KeystoreMismatch { id: String },

    /// No signing key is stored for the id
    #[error("no key stored for {0}")]
    UnknownIdentity(String),

    #[error(transparent)]
    Keystore(#[from] KeystoreError),
}

/// Derive the signing key for hex-encoded key material.
///
/// Exactly 32 decoded bytes are used as the secret; any other non-empty
/// length is stretched with a domain-separated hash.
pub fn derive_signing_key(key_material: &str) -> Result<IdentitySigningKey, IdentityError> {
    let trimmed = key_material.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.is_empty() {
        return Err(IdentityError::KeyDerivation(
            "key material is empty".to_string(),
        ));
    }
    let bytes = decode_hex(hex_part)
        .map_err(|e| IdentityError::KeyDerivation(format!("key material is not hex: {e}")))?;
    Ok(IdentitySigningKey::from_seed(&derive_key_seed(&bytes)))
}

/// Sign `payload` with an identity key. Pure, no side effects.
pub fn sign(key: &IdentitySigningKey, payload: &[u8]) -> Vec<u8> {
    key.sign(payload).to_vec()
}

/// Why an identity failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    MissingField,
    MalformedPublicKey,
    MalformedSignature,
    AddressMismatch,
    BadSignature,
}

fn check_identity(identity: &Identity) -> Result<(), Rejection> {
    if identity.id.is_empty() || identity.public_key.is_empty() || identity.signature.is_empty() {
        return Err(Rejection::MissingField);
    }

    let public_key = decode_hex(&identity.public_key).map_err(|_| Rejection::MalformedPublicKey)?;
    let verifying_key =
        IdentityVerifyingKey::from_slice(&public_key).map_err(|_| Rejection::MalformedPublicKey)?;
    let signature = decode_hex(&identity.signature).map_err(|_| Rejection::MalformedSignature)?;

    if !address_from_public_key(&public_key).eq_ignore_ascii_case(&identity.id) {
        return Err(Rejection::AddressMismatch);
    }

    verifying_key
        .verify(identity.id.as_bytes(), &signature)
        .map_err(|_| Rejection::BadSignature)
}

/// Verify the id-signature of an identity. Never panics.
pub fn verify_identity(identity: &Identity) -> bool {
    match check_identity(identity) {
        Ok(()) => true,
        Err(reason) => {
            warn!(id = %identity.id, reason = ?reason, "Identity verification failed");
            false
        }
    }
}

/// Creates identities backed by a keystore
#[derive(Clone)]
pub struct IdentityProvider {
    keystore: Arc<dyn Keystore>,
}

impl IdentityProvider {
    pub fn new(keystore: Arc<dyn Keystore>) -> Self {
        Self { keystore }
    }

    pub fn keystore(&self) -> &Arc<dyn Keystore> {
        &self.keystore
    }

    /// Derive an identity from key material, registering its key in the
    /// keystore on first use.
    pub async fn create_identity(&self, key_material: &str) -> Result<Identity, IdentityError> {
        let key = derive_signing_key(key_material)?;
        let id = key.address();

        match self.keystore.get_key(&id).await? {
            Some(stored) if stored.public_key_bytes() != key.public_key_bytes() => {
                return Err(IdentityError::KeystoreMismatch { id });
            }
            Some(_) => debug!(id = %id, "Reusing stored identity key"),
            None => {
                self.keystore.put_key(&id, &key).await?;
                debug!(id = %id, "Registered new identity key");
            }
        }

        let signature = sign(&key, id.as_bytes());
        Ok(Identity {
            public_key: hex::encode(key.public_key_bytes()),
            signature: hex::encode(signature),
            id,
        })
    }

    /// Sign `payload` with the stored key of `id`
    pub async fn sign(&self, id: &str, payload: &[u8]) -> Result<Vec<u8>, IdentityError> {
        let key = self
            .keystore
            .get_key(id)
            .await?
            .ok_or_else(|| IdentityError::UnknownIdentity(id.to_string()))?;
        Ok(sign(&key, payload))
    }

    pub fn verify_identity(&self, identity: &Identity) -> bool {
        verify_identity(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::keystore::{InMemoryKeystore, MockKeystore};

    const MATERIAL: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    fn provider() -> IdentityProvider {
        IdentityProvider::new(Arc::new(InMemoryKeystore::new()))
    }

    #[tokio::test]
    async fn test_create_identity_is_deterministic() {
        let a = provider().create_identity(MATERIAL).await.unwrap();
        let b = provider().create_identity(MATERIAL).await.unwrap();
        assert_eq!(a, b);
        assert!(a.id.starts_with("0x"));
        assert!(verify_identity(&a));
    }

    #[tokio::test]
    async fn test_create_identity_registers_key_once() {
        let provider = provider();
        let identity = provider.create_identity(MATERIAL).await.unwrap();
        assert!(provider.keystore().has_key(&identity.id).await.unwrap());

        let again = provider.create_identity(&MATERIAL[2..]).await.unwrap();
        assert_eq!(again.id, identity.id);
    }

    #[tokio::test]
    async fn test_short_material_is_stretched() {
        let identity = provider().create_identity("abcd").await.unwrap();
        assert!(verify_identity(&identity));
    }

    #[tokio::test]
    async fn test_invalid_key_material() {
        for material in ["", "0x", "xyz", "abc"] {
            let err = provider().create_identity(material).await.unwrap_err();
            assert!(
                matches!(err, IdentityError::KeyDerivation(_)),
                "material {material:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_keystore_mismatch() {
        let mut keystore = MockKeystore::new();
        keystore
            .expect_get_key()
            .returning(|_| Ok(Some(IdentitySigningKey::generate())));
        let provider = IdentityProvider::new(Arc::new(keystore));

        let err = provider.create_identity(MATERIAL).await.unwrap_err();
        assert!(matches!(err, IdentityError::KeystoreMismatch { .. }));
    }

    #[tokio::test]
    async fn test_sign_with_stored_key() {
        let provider = provider();
        let identity = provider.create_identity(MATERIAL).await.unwrap();
        let signature = provider.sign(&identity.id, b"payload").await.unwrap();

        let public_key = decode_hex(&identity.public_key).unwrap();
        let verifying = IdentityVerifyingKey::from_slice(&public_key).unwrap();
        assert!(verifying.verify(b"payload", &signature).is_ok());

        assert!(matches!(
            provider.sign("0xdead", b"payload").await,
            Err(IdentityError::UnknownIdentity(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_fails_closed() {
        let identity = provider().create_identity(MATERIAL).await.unwrap();

        let mut missing_sig = identity.clone();
        missing_sig.signature.clear();
        assert!(!verify_identity(&missing_sig));

        let mut bad_hex = identity.clone();
        bad_hex.public_key = "zz".into();
        assert!(!verify_identity(&bad_hex));

        let mut wrong_id = identity.clone();
        wrong_id.id = "0x0000000000000000000000000000000000000000".into();
        assert!(!verify_identity(&wrong_id));

        let other = provider().create_identity("22").await.unwrap();
        let mut swapped_sig = identity.clone();
        swapped_sig.signature = other.signature;
        assert!(!verify_identity(&swapped_sig));

        assert!(!verify_identity(&Identity::default()));
    }
}
