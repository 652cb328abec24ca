//! Writer identities and the write-access policy of a log

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Public identity of a log writer.
///
/// Every field may be absent or malformed on a received entry; missing
/// fields deserialize as empty strings and fail verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    /// Address derived from the public key (`0x` + 40 hex chars)
    pub id: String,

    /// Ed25519 public key, hex
    pub public_key: String,

    /// Signature by `public_key` over the UTF-8 bytes of `id`, hex
    pub signature: String,
}

/// Role a peer plays for a given log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// The peer that administers the access policy. Admission additionally
    /// requires the writer to be known to the local keystore.
    Owner,
    /// A replicating peer. Admission depends on the signed identity and the
    /// replicated policy only.
    Replica,
}

/// Set of identity ids authorized to append to one log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub writer_ids: BTreeSet<String>,

    /// Bumped on every effective mutation
    #[serde(default)]
    pub version: u64,
}

impl AccessPolicy {
    pub fn new<I, S>(writers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            writer_ids: writers.into_iter().map(Into::into).collect(),
            version: 0,
        }
    }

    pub fn allows(&self, id: &str) -> bool {
        self.writer_ids.contains(id)
    }

    /// Add a writer; returns false if it was already present
    pub fn grant(&mut self, id: impl Into<String>) -> bool {
        let added = self.writer_ids.insert(id.into());
        if added {
            self.version += 1;
        }
        added
    }

    /// Remove a writer; returns false if it was not present
    pub fn revoke(&mut self, id: &str) -> bool {
        let removed = self.writer_ids.remove(id);
        if removed {
            self.version += 1;
        }
        removed
    }

    /// Serialize the policy as a JSON manifest
    pub fn to_manifest(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_manifest(manifest: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_revoke_bump_version_only_on_change() {
        let mut policy = AccessPolicy::new(["0xa"]);
        assert_eq!(policy.version, 0);

        assert!(!policy.grant("0xa"));
        assert_eq!(policy.version, 0);

        assert!(policy.grant("0xb"));
        assert!(policy.revoke("0xa"));
        assert!(!policy.revoke("0xa"));
        assert_eq!(policy.version, 2);
        assert!(policy.allows("0xb"));
        assert!(!policy.allows("0xa"));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let mut policy = AccessPolicy::new(["0xa", "0xb"]);
        policy.grant("0xc");
        let parsed = AccessPolicy::from_manifest(&policy.to_manifest().unwrap()).unwrap();
        assert_eq!(parsed, policy);
    }

    #[test]
    fn test_identity_missing_fields_default_empty() {
        let identity: Identity = serde_json::from_str(r#"{"id":"0xabc"}"#).unwrap();
        assert_eq!(identity.id, "0xabc");
        assert!(identity.public_key.is_empty());
        assert!(identity.signature.is_empty());
    }
}
