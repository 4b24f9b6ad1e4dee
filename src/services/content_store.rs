//! src/services/content_store.rs
//!
//! Content store boundary. The share engine only ever talks to a
//! `ContentStore`: it stores bytes and gets back a content address, and it
//! asks for capabilities (delegations) that it can later revoke.
//!
//! `LocalContentStore` is a self-contained implementation: payloads are
//! content-addressed by BLAKE3 and sharded on local disk beneath
//! `base_path/{aa}/{bb}/{address}`. Capabilities are encoded as base64 JSON
//! descriptors and recorded in a `DelegationLedger` so they can be revoked,
//! including after a restart when the ledger is durable.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    models::delegation::DelegationRecord,
    services::{
        ids,
        repository::{DelegationLedgerRef, RepositoryError},
    },
};

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content `{0}` not found")]
    NotFound(String),
    #[error("invalid content address `{0}`")]
    InvalidAddress(String),
    #[error("unknown delegation `{0}`")]
    UnknownDelegation(String),
    #[error("failed to encode capability: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Entropy(#[from] getrandom::Error),
    #[error("delegation ledger failure: {0}")]
    Ledger(#[from] RepositoryError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ContentResult<T> = Result<T, ContentError>;

/// Where stored bytes ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    pub content_address: String,
    pub retrieval_url: String,
}

/// Parameters for a capability grant.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    /// Identity the capability is granted to.
    pub audience: String,
    pub abilities: Vec<String>,
    /// Content address the grant is scoped to, if any.
    pub resource: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// A capability issued by the content store.
#[derive(Debug, Clone)]
pub struct IssuedCapability {
    /// Opaque handle used to revoke the capability later.
    pub delegation_id: String,
    /// Encoded capability for the audience to present.
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn store(
        &self,
        data: Bytes,
        filename: &str,
        content_type: &str,
    ) -> ContentResult<StoredContent>;

    async fn issue_capability(&self, request: CapabilityRequest) -> ContentResult<IssuedCapability> {
        let pruned = self.ledger.prune_delegations(Utc::now()).await?;
        if pruned > 0 {
            debug!("pruned {} lapsed delegations", pruned);
        }

        let delegation_id = ids::generate_id()?;
        let json = serde_json::to_vec(&CapabilityDescriptor {
            id: &delegation_id,
            iss: &self.issuer,
            aud: &request.audience,
            exp: request.expires_at.timestamp(),
            att: &request.abilities,
            rsc: request.resource.as_deref(),
        })?;
        let bytes = general_purpose::STANDARD.encode(json).into_bytes();

        self.ledger
            .record_delegation(DelegationRecord {
                id: delegation_id.clone(),
                audience: request.audience,
                expires_at: request.expires_at,
                revoked: false,
            })
            .await?;
        debug!("issued delegation {}", delegation_id);

        Ok(IssuedCapability {
            delegation_id,
            bytes,
        })
    }

    async fn revoke_capability(&self, delegation_id: &str) -> ContentResult<()> {
        if !self.ledger.revoke_delegation(delegation_id).await? {
            return Err(ContentError::UnknownDelegation(delegation_id.to_string()));
        }
        info!("Revoked delegation {}", delegation_id);
        Ok(())
    }

    fn retrieval_url(&self, content_address: &str) -> String {
        format!("{}/{}", self.gateway_url, content_address)
    }
}
