//! Upload delegations: short-lived capabilities that let a client identity
//! upload straight to the content store, then register the result.

use crate::services::content_store::{CapabilityRequest, ContentError, ContentStoreRef};
use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::info;

/// Identities must be `did:key` DIDs.
const DID_KEY_PREFIX: &str = "did:key:";

/// Abilities granted to an uploading client.
const UPLOAD_ABILITIES: [&str; 4] = [
    "space/blob/add",
    "space/index/add",
    "filecoin/offer",
    "upload/add",
];

/// Lifetime of an upload delegation, independent of share link expiry.
const UPLOAD_DELEGATION_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("Invalid DID format. Expected did:key:...")]
    InvalidIdentity,
    #[error("content store request failed: {0}")]
    External(#[from] ContentError),
}

#[derive(Clone)]
pub struct DelegationService {
    content: ContentStoreRef,
}

impl DelegationService {
    pub fn new(content: ContentStoreRef) -> Self {
        Self { content }
    }

    /// Issue an upload capability for `did`. Returns the encoded capability.
    ///
    /// The identity is validated before the content store is contacted.
    pub async fn issue_upload_delegation(&self, did: &str) -> Result<Vec<u8>, DelegationError> {
        validate_did(did)?;

        let expires_at = Utc::now() + Duration::hours(UPLOAD_DELEGATION_HOURS);
        let capability = self
            .content
            .issue_capability(CapabilityRequest {
                audience: did.to_string(),
                abilities: UPLOAD_ABILITIES.iter().map(|a| a.to_string()).collect(),
                resource: None,
                expires_at,
            })
            .await?;

        info!(
            "Issued upload delegation {} to {} (expires {})",
            capability.delegation_id, did, expires_at
        );
        Ok(capability.bytes)
    }
}

/// `did:key:` followed by a non-empty alphanumeric key identifier.
fn validate_did(did: &str) -> Result<(), DelegationError> {
    let key = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or(DelegationError::InvalidIdentity)?;
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DelegationError::InvalidIdentity);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{content_store::LocalContentStore, repository::MemoryRepository};
    use base64::{Engine as _, engine::general_purpose};
    use std::sync::Arc;

    #[test]
    fn did_validation() {
        assert!(validate_did("did:key:z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK").is_ok());
        assert!(validate_did("").is_err());
        assert!(validate_did("did:key:").is_err());
        assert!(validate_did("did:web:example.com").is_err());
        assert!(validate_did("did:key:abc/../x").is_err());
    }

    #[tokio::test]
    async fn issues_fixed_upload_abilities() {
        let dir = tempfile::tempdir().unwrap();
        let content = Arc::new(LocalContentStore::new(
            dir.path(),
            "http://gw.test",
            "did:key:space",
            Arc::new(MemoryRepository::new()),
        ));
        let service = DelegationService::new(content);

        let bytes = service
            .issue_upload_delegation("did:key:z6Mkclient")
            .await
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&general_purpose::STANDARD.decode(bytes).unwrap()).unwrap();

        assert_eq!(json["aud"], "did:key:z6Mkclient");
        assert_eq!(json["iss"], "did:key:space");
        assert_eq!(json["att"].as_array().unwrap().len(), UPLOAD_ABILITIES.len());
        let exp = json["exp"].as_i64().unwrap();
        let expected = (Utc::now() + Duration::hours(UPLOAD_DELEGATION_HOURS)).timestamp();
        assert!((expected - exp).abs() <= 5);
    }

    #[tokio::test]
    async fn rejects_malformed_identity() {
        let dir = tempfile::tempdir().unwrap();
        let content = Arc::new(LocalContentStore::new(
            dir.path(),
            "http://gw",
            "did:key:s",
            Arc::new(MemoryRepository::new()),
        ));
        let service = DelegationService::new(content);
        assert!(matches!(
            service.issue_upload_delegation("not-a-did").await,
            Err(DelegationError::InvalidIdentity)
        ));
    }
}
