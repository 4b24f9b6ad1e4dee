//! src/services/share_service.rs
//!
//! ShareService: the share-link lifecycle engine. It owns the rules for
//! minting, resolving and revoking links, and passes file operations
//! through to the repository.
//!
//! A link is `Active` until it is revoked (stored), expires (derived from
//! `expires_at`) or is exhausted (derived from the access count). All three
//! are terminal. Calls to the content store are never made while a
//! repository lock is held; local state changes are applied afterwards.

use crate::{
    models::{
        file::{FileDetails, FileRecord, RegisterFileRequest},
        share_link::{
            CreatedShareLink, DenyReason, ResolvedShare, ShareLink, ShareLinkRequest, token_prefix,
        },
    },
    services::{
        content_store::{CapabilityRequest, ContentError, ContentStoreRef},
        ids::{self, parse_duration},
        repository::{AccessOutcome, RepositoryError, RepositoryRef},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Abilities granted to the capability backing each share link.
const SHARE_ABILITIES: [&str; 1] = ["space/content/serve"];

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("file `{0}` not found")]
    FileNotFound(String),
    #[error("share link not found")]
    LinkNotFound,
    #[error("file `{0}` no longer exists")]
    SharedFileMissing(String),
    #[error("{0}")]
    Denied(DenyReason),
    #[error("content store request failed: {0}")]
    External(#[from] ContentError),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Entropy(#[from] getrandom::Error),
}

pub type ShareResult<T> = Result<T, ShareError>;

/// Defaults applied to share link requests.
#[derive(Debug, Clone)]
pub struct SharePolicy {
    /// Lifetime used when `expiresIn` is absent or unparseable.
    pub default_ttl: Duration,
}

/// A share link request after defaults have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTerms {
    pub ttl: Duration,
    pub max_accesses: u32,
}

impl SharePolicy {
    /// Fill in defaults. Never fails: an unparseable `expiresIn` falls back
    /// to the default lifetime and a negative `maxAccesses` means unlimited.
    pub fn resolve(&self, request: &ShareLinkRequest) -> LinkTerms {
        let ttl = match request.expires_in.as_deref() {
            None => self.default_ttl,
            Some(raw) => parse_duration(raw).unwrap_or_else(|err| {
                warn!(
                    "unparseable expiresIn `{}` ({}), using default {}s",
                    raw,
                    err,
                    self.default_ttl.num_seconds()
                );
                self.default_ttl
            }),
        };
        let max_accesses = request
            .max_accesses
            .unwrap_or(0)
            .clamp(0, i64::from(u32::MAX)) as u32;
        LinkTerms { ttl, max_accesses }
    }
}

#[derive(Clone)]
pub struct ShareService {
    repo: RepositoryRef,
    content: ContentStoreRef,
    policy: SharePolicy,
}

impl ShareService {
    pub fn new(repo: RepositoryRef, content: ContentStoreRef, policy: SharePolicy) -> Self {
        Self {
            repo,
            content,
            policy,
        }
    }

    pub fn repository(&self) -> &RepositoryRef {
        &self.repo
    }

    // --- files ---

    /// Store bytes in the content store and register the resulting file.
    pub async fn upload_file(
        &self,
        data: Bytes,
        name: &str,
        content_type: &str,
    ) -> ShareResult<FileRecord> {
        let size = data.len() as i64;
        let stored = self.content.store(data, name, content_type).await?;
        let file = FileRecord {
            id: ids::generate_id()?,
            name: name.to_string(),
            size,
            content_type: content_type.to_string(),
            content_address: stored.content_address,
            retrieval_url: stored.retrieval_url,
            uploaded_at: Utc::now(),
        };
        self.repo.save_file(file.clone()).await?;
        info!("Registered uploaded file {} as {}", file.name, file.id);
        Ok(file)
    }

    /// Register a file whose bytes were pinned by the client directly.
    pub async fn register_file(&self, request: RegisterFileRequest) -> ShareResult<FileRecord> {
        let name = request.name.trim();
        let cid = request.cid.trim();
        if name.is_empty() {
            return Err(ShareError::Validation("name is required".into()));
        }
        if cid.is_empty() {
            return Err(ShareError::Validation("cid is required".into()));
        }
        if request.size < 0 {
            return Err(ShareError::Validation("size must not be negative".into()));
        }

        let retrieval_url = request
            .gateway_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.content.retrieval_url(cid));
        let file = FileRecord {
            id: ids::generate_id()?,
            name: name.to_string(),
            size: request.size,
            content_type: request
                .content_type
                .unwrap_or_else(|| "application/octet-stream".into()),
            content_address: cid.to_string(),
            retrieval_url,
            uploaded_at: Utc::now(),
        };
        self.repo.save_file(file.clone()).await?;
        info!("Registered file {} ({}) as {}", file.name, cid, file.id);
        Ok(file)
    }

    pub async fn list_files(&self) -> ShareResult<Vec<FileRecord>> {
        Ok(self.repo.list_files().await?)
    }

    pub async fn get_file(&self, id: &str) -> ShareResult<FileDetails> {
        let file = self
            .repo
            .get_file(id)
            .await?
            .ok_or_else(|| ShareError::FileNotFound(id.to_string()))?;
        let share_links = self.repo.share_links_for_file(id).await?;
        Ok(FileDetails { file, share_links })
    }

    /// Delete a file record. Outstanding share links are not revoked.
    pub async fn delete_file(&self, id: &str) -> ShareResult<()> {
        if !self.repo.delete_file(id).await? {
            return Err(ShareError::FileNotFound(id.to_string()));
        }
        info!("Deleted file {}", id);
        Ok(())
    }

    // --- share links ---

    /// Mint a share link for an existing file.
    ///
    /// `base_url` is the externally visible origin the share URL is built on.
    pub async fn create_share_link(
        &self,
        file_id: &str,
        request: &ShareLinkRequest,
        base_url: &str,
    ) -> ShareResult<CreatedShareLink> {
        let file = self
            .repo
            .get_file(file_id)
            .await?
            .ok_or_else(|| ShareError::FileNotFound(file_id.to_string()))?;

        let terms = self.policy.resolve(request);
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(terms.ttl)
            .or_else(|| {
                warn!("expiry out of range, using default lifetime");
                created_at.checked_add_signed(self.policy.default_ttl)
            })
            .ok_or_else(|| ShareError::Validation("expiry out of range".into()))?;

        let token = ids::generate_token()?;
        let capability = self
            .content
            .issue_capability(CapabilityRequest {
                audience: format!("share:{}", file.id),
                abilities: SHARE_ABILITIES.iter().map(|a| a.to_string()).collect(),
                resource: Some(file.content_address.clone()),
                expires_at,
            })
            .await?;

        let link = ShareLink {
            token,
            file_id: file.id.clone(),
            content_address: file.content_address.clone(),
            created_at,
            expires_at,
            is_revoked: false,
            revoked_at: None,
            access_count: 0,
            max_accesses: terms.max_accesses,
            delegation_id: capability.delegation_id,
        };
        if let Err(err) = self.repo.save_share_link(link.clone()).await {
            warn!(
                "Failed to persist share link {} for file {}: {}",
                link.log_id(),
                file.id,
                err
            );
            if let Err(revoke_err) = self.content.revoke_capability(&link.delegation_id).await {
                warn!(
                    "Orphaned delegation {} could not be revoked: {}",
                    link.delegation_id, revoke_err
                );
            }
            return Err(err.into());
        }

        info!(
            "Created share link {} for file {} (expires {}, max accesses {})",
            link.log_id(),
            file.id,
            link.expires_at,
            link.max_accesses
        );
        let url = format!("{}/api/share/{}", base_url.trim_end_matches('/'), link.token);
        Ok(CreatedShareLink {
            share_link: link,
            url,
        })
    }

    /// Resolve a share link, counting the access if it succeeds.
    pub async fn resolve_share_link(&self, token: &str) -> ShareResult<ResolvedShare> {
        self.resolve_share_link_at(token, Utc::now()).await
    }

    async fn resolve_share_link_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> ShareResult<ResolvedShare> {
        match self.repo.consume_share_link(token, now).await? {
            AccessOutcome::Granted { file, link } => {
                debug!(
                    "Share link {} resolved (access {})",
                    link.log_id(),
                    link.access_count
                );
                Ok(ResolvedShare {
                    gateway_url: self.content.retrieval_url(&link.content_address),
                    expires_at: link.expires_at,
                    file,
                    share_link: link,
                })
            }
            AccessOutcome::Denied(reason) => {
                debug!("Share link {} denied: {:?}", token_prefix(token), reason);
                Err(ShareError::Denied(reason))
            }
            AccessOutcome::FileMissing { file_id } => Err(ShareError::SharedFileMissing(file_id)),
            AccessOutcome::LinkMissing => Err(ShareError::LinkNotFound),
        }
    }

    /// Revoke a share link and the capability behind it.
    ///
    /// The external capability is revoked first; the local record is only
    /// marked once that succeeds. Already-revoked links return `Ok` without
    /// contacting the content store again, and so do expired links, whose
    /// capability lapsed with them.
    pub async fn revoke_share_link(&self, token: &str) -> ShareResult<()> {
        let link = self
            .repo
            .get_share_link(token)
            .await?
            .ok_or(ShareError::LinkNotFound)?;

        if link.is_revoked {
            debug!("Share link {} already revoked", link.log_id());
            return Ok(());
        }

        let now = Utc::now();
        if now >= link.expires_at {
            debug!(
                "Share link {} expired, capability already lapsed",
                link.log_id()
            );
        } else if let Err(err) = self.content.revoke_capability(&link.delegation_id).await {
            warn!(
                "Failed to revoke delegation for share link {}: {}",
                link.log_id(),
                err
            );
            return Err(err.into());
        }

        if !self.repo.revoke_share_link(token, now).await? {
            return Err(ShareError::LinkNotFound);
        }
        info!("Revoked share link {}", link.log_id());
        Ok(())
    }
}
