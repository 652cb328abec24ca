//! Write-access control for a log
//!
//! Admission of an entry requires, in order:
//! 1. a valid id-signature on the writer identity
//! 2. the writer id in the policy's writer set
//! 3. for the policy owner only, a key record for the writer in the local
//!    keystore
//!
//! The writer does not have to be the controller's own identity. Replicas
//! skip the keystore check, since they only hold their own keys.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::identity::verify_identity;
use crate::auth::keystore::Keystore;
use crate::domain::{AccessPolicy, Identity, LogEntry, PeerRole};

/// Error type for policy replication
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("stale policy: version {offered} is older than {current}")]
    StalePolicy { offered: u64, current: u64 },

    #[error("only the policy owner can {0}")]
    NotOwner(&'static str),
}

/// Decides whether candidate appends are admissible
pub struct AccessController {
    policy: RwLock<AccessPolicy>,
    keystore: Arc<dyn Keystore>,
    role: PeerRole,
}

impl AccessController {
    pub fn new(policy: AccessPolicy, keystore: Arc<dyn Keystore>, role: PeerRole) -> Self {
        Self {
            policy: RwLock::new(policy),
            keystore,
            role,
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Admission decision for an entry
    pub async fn can_append(&self, entry: &LogEntry) -> bool {
        self.can_write(&entry.identity).await
    }

    /// Admission decision for a writer identity
    pub async fn can_write(&self, identity: &Identity) -> bool {
        if !verify_identity(identity) {
            return false;
        }

        if !self.policy.read().await.allows(&identity.id) {
            debug!(writer = %identity.id, "Writer not in policy");
            return false;
        }

        if self.role == PeerRole::Owner {
            match self.keystore.has_key(&identity.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(writer = %identity.id, "Writer unknown to local keystore");
                    return false;
                }
                Err(e) => {
                    warn!(writer = %identity.id, error = %e, "Keystore lookup failed");
                    return false;
                }
            }
        }

        true
    }

    /// Authorize a writer. Returns false if it was already authorized.
    pub async fn grant(&self, writer_id: &str) -> Result<bool, AccessError> {
        self.require_owner("grant")?;
        let mut policy = self.policy.write().await;
        let changed = policy.grant(writer_id);
        if changed {
            info!(writer = writer_id, version = policy.version, "Granted write access");
        }
        Ok(changed)
    }

    /// Remove a writer. Returns false if it was not authorized.
    pub async fn revoke(&self, writer_id: &str) -> Result<bool, AccessError> {
        self.require_owner("revoke")?;
        let mut policy = self.policy.write().await;
        let changed = policy.revoke(writer_id);
        if changed {
            info!(writer = writer_id, version = policy.version, "Revoked write access");
        }
        Ok(changed)
    }

    /// Current policy
    pub async fn policy(&self) -> AccessPolicy {
        self.policy.read().await.clone()
    }

    /// Adopt a replicated policy. Older versions are refused; returns
    /// whether anything changed.
    pub async fn load_policy(&self, offered: AccessPolicy) -> Result<bool, AccessError> {
        let mut policy = self.policy.write().await;
        if offered.version < policy.version {
            return Err(AccessError::StalePolicy {
                offered: offered.version,
                current: policy.version,
            });
        }
        if *policy == offered {
            return Ok(false);
        }
        info!(
            version = offered.version,
            writers = offered.writer_ids.len(),
            "Adopted replicated policy"
        );
        *policy = offered;
        Ok(true)
    }

    fn require_owner(&self, operation: &'static str) -> Result<(), AccessError> {
        if self.role == PeerRole::Owner {
            Ok(())
        } else {
            Err(AccessError::NotOwner(operation))
        }
    }
}
