//! Defines routes for file, share link and delegation operations.
//!
//! ## Structure
//! - **Files**
//!   - `POST   /api/upload`            - multipart upload (`files` or `file`)
//!   - `POST   /api/register`          - register a client-pinned CID
//!   - `GET    /api/files`             - list files
//!   - `GET    /api/files/{id}`        - file plus its share links
//!   - `DELETE /api/files/{id}`        - delete file record (links survive)
//!
//! - **Share links**
//!   - `POST   /api/files/{id}/share`  - mint a link
//!   - `GET    /api/share/{token}`     - resolve a link (counts an access)
//!   - `DELETE /api/share/{token}`     - revoke a link
//!
//! - **Other**
//!   - `GET    /api/delegation/{did}`  - upload delegation for a client DID
//!   - `GET    /content/{address}`     - stream stored content
//!   - `GET    /healthz`, `/readyz`, `/api/health`

use crate::{
    handlers::{
        content_handlers::get_content,
        delegation_handlers::create_delegation,
        file_handlers::{delete_file, get_file, list_files, register, upload},
        health_handlers::{healthz, readyz},
        share_handlers::{create_share_link, get_shared_file, revoke_share_link},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for the whole API.
///
/// The upload route gets its own body limit (see
/// `AppConfig::upload_body_limit`); every other route keeps axum's default.
pub fn routes(upload_limit: usize) -> Router<AppState> {
    let api = Router::new()
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/register", post(register))
        .route("/files", get(list_files))
        .route("/files/{id}", get(get_file).delete(delete_file))
        .route("/files/{id}/share", post(create_share_link))
        .route("/share/{token}", get(get_shared_file).delete(revoke_share_link))
        .route("/delegation/{did}", get(create_delegation))
        .route("/health", get(healthz));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/content/{address}", get(get_content))
        .nest("/api", api)
}
