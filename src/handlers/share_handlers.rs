//! HTTP handlers for minting, resolving and revoking share links.

use crate::{
    config::AppConfig,
    errors::AppError,
    models::share_link::{CreatedShareLink, ResolvedShare, ShareLinkRequest},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, header},
};
use bytes::Bytes;
use serde_json::{Value, json};

/// POST `/api/files/{id}/share`
///
/// The body is optional: an empty body uses every default.
pub async fn create_share_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CreatedShareLink>, AppError> {
    let request = parse_share_request(&body)?;
    let base_url = public_base_url(&state.config, &headers);
    let created = state
        .shares
        .create_share_link(&id, &request, &base_url)
        .await?;
    Ok(Json(created))
}

/// GET `/api/share/{token}` - resolve a link and count the access.
pub async fn get_shared_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ResolvedShare>, AppError> {
    Ok(Json(state.shares.resolve_share_link(&token).await?))
}

/// DELETE `/api/share/{token}`
pub async fn revoke_share_link(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.shares.revoke_share_link(&token).await?;
    Ok(Json(json!({ "message": "Share link revoked successfully" })))
}

fn parse_share_request(body: &[u8]) -> Result<ShareLinkRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ShareLinkRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| AppError::bad_request(format!("Invalid share link request: {}", err)))
}

/// Origin for share URLs: the configured public URL, else the request host.
fn public_base_url(config: &AppConfig, headers: &HeaderMap) -> String {
    if let Some(url) = &config.public_url {
        return url.trim_end_matches('/').to_string();
    }
    let header_str = |name| headers.get(name).and_then(|v| v.to_str().ok());
    let host = header_str(header::HOST).unwrap_or("localhost");
    let scheme = header_str(header::HeaderName::from_static("x-forwarded-proto")).unwrap_or("http");
    format!("{}://{}", scheme, host)
}
