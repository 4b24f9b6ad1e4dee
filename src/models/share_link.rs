//! Represents a share link: a revocable, time-boxed bearer capability for a
//! single content address.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use super::file::FileRecord;

/// A share link as persisted by the repository.
///
/// `is_revoked` only ever moves from `false` to `true`, and `revoked_at` is
/// written on that transition and never again. `access_count` only grows,
/// and only when an access evaluation succeeds.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    /// Random bearer secret; also the lookup key.
    pub token: String,

    /// File the link was minted for. Not an ownership relation.
    pub file_id: String,

    /// Content address copied from the file at creation time.
    #[serde(rename = "cid")]
    pub content_address: String,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    pub is_revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,

    pub access_count: u32,

    /// Maximum successful accesses; `0` means unlimited.
    pub max_accesses: u32,

    /// Handle of the capability issued by the content store for this link.
    pub delegation_id: String,
}

/// Why a known link refused access.
///
/// When several conditions hold at once the strongest is reported, in the
/// order the variants are declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DenyReason {
    Revoked,
    Expired,
    Exhausted,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DenyReason::Revoked => "This share link has been revoked",
            DenyReason::Expired => "This share link has expired",
            DenyReason::Exhausted => "This share link has reached its maximum access count",
        };
        f.write_str(msg)
    }
}

impl ShareLink {
    /// Pure validity check. Returns the deny reason, if any, without
    /// touching any state.
    pub fn deny_reason(&self, now: DateTime<Utc>) -> Option<DenyReason> {
        if self.is_revoked {
            Some(DenyReason::Revoked)
        } else if now >= self.expires_at {
            Some(DenyReason::Expired)
        } else if self.is_exhausted() {
            Some(DenyReason::Exhausted)
        } else {
            None
        }
    }

    fn is_exhausted(&self) -> bool {
        self.max_accesses > 0 && self.access_count >= self.max_accesses
    }

    /// Short token prefix that is safe to log.
    pub fn log_id(&self) -> &str {
        token_prefix(&self.token)
    }
}

/// First eight characters of a bearer token, for log lines.
pub fn token_prefix(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

/// Request body for `POST /api/files/{id}/share`.
///
/// Every field is optional; the share policy fills in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLinkRequest {
    /// Duration string such as `24h`, `7d` or `1h30m`.
    pub expires_in: Option<String>,
    /// Negative values are treated as `0` (unlimited).
    pub max_accesses: Option<i64>,
}

/// Result of creating a share link.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedShareLink {
    pub share_link: ShareLink,
    /// Absolute URL a holder can open.
    pub url: String,
}

/// Result of a successful share link resolution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedShare {
    pub file: FileRecord,
    pub gateway_url: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub share_link: ShareLink,
}
