//! Represents an uploaded file whose bytes live in the content store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata for a file pinned to the content store.
///
/// The record never holds the bytes themselves. `content_address` is the
/// only field that identifies them; `retrieval_url` is a convenience derived
/// from the address and the configured gateway.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Opaque random identifier, assigned at registration.
    pub id: String,

    /// Original filename as supplied by the uploader.
    pub name: String,

    /// Size in bytes.
    pub size: i64,

    /// Content type (MIME type).
    pub content_type: String,

    /// Content identifier returned by the content store.
    #[serde(rename = "cid")]
    pub content_address: String,

    /// Gateway URL for the content address. Recomputable, not authoritative.
    #[serde(rename = "gatewayUrl")]
    pub retrieval_url: String,

    /// When the file was registered.
    pub uploaded_at: DateTime<Utc>,
}

/// A file together with every share link that references it.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileDetails {
    pub file: FileRecord,
    pub share_links: Vec<super::share_link::ShareLink>,
}

/// Request body for `POST /api/register`: a file the client already pinned
/// to the content store using an upload delegation.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFileRequest {
    pub name: String,
    #[serde(default)]
    pub size: i64,
    pub content_type: Option<String>,
    pub cid: String,
    pub gateway_url: Option<String>,
}
