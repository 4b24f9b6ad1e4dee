//! Upload delegation endpoint for clients that pin content themselves.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};

/// GET `/api/delegation/{did}` - returns the encoded capability bytes.
pub async fn create_delegation(
    State(state): State<AppState>,
    Path(did): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let delegation = state.delegations.issue_upload_delegation(&did).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        delegation,
    ))
}
