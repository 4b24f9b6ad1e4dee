//! HTTP handlers for uploading, registering and managing files.

use crate::{
    errors::AppError,
    models::file::{FileDetails, FileRecord, RegisterFileRequest},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Value, json};

/// Multipart field names accepted by `POST /api/upload`.
const UPLOAD_FIELDS: [&str; 2] = ["files", "file"];

#[derive(Serialize)]
pub struct UploadResponse {
    pub files: Vec<FileRecord>,
    pub message: String,
}

#[derive(Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileRecord>,
}

struct UploadPart {
    name: String,
    content_type: String,
    data: Bytes,
}

/// POST `/api/upload` - store one or more multipart files.
///
/// Every part is read and size-checked before anything is stored, so an
/// oversized part rejects the whole request.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let max = state.config.max_file_size;
    let max_files = state.config.max_files;
    let body_limit = state.config.upload_body_limit();
    let mut parts = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, "form", body_limit))?
    {
        if !field.name().is_some_and(|n| UPLOAD_FIELDS.contains(&n)) {
            continue;
        }
        if parts.len() == max_files {
            return Err(AppError::bad_request(format!(
                "Too many files, at most {} per upload",
                max_files
            )));
        }
        let name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|err| multipart_error(err, &name, body_limit))?;

        if data.len() > max {
            return Err(AppError::bad_request(format!(
                "File {} exceeds maximum size of {} bytes",
                name, max
            )));
        }
        parts.push(UploadPart {
            name,
            content_type,
            data,
        });
    }

    if parts.is_empty() {
        return Err(AppError::bad_request("No files provided"));
    }

    let mut files = Vec::with_capacity(parts.len());
    for part in parts {
        let file = state
            .shares
            .upload_file(part.data, &part.name, &part.content_type)
            .await?;
        files.push(file);
    }

    Ok(Json(UploadResponse {
        message: format!("Successfully uploaded {} file(s)", files.len()),
        files,
    }))
}

/// A body over the route limit surfaces as a multipart error; report it as
/// a size violation rather than a parse failure.
fn multipart_error(err: MultipartError, what: &str, body_limit: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::bad_request(format!(
            "Upload exceeds maximum size of {} bytes",
            body_limit
        ))
    } else {
        AppError::bad_request(format!("Failed to read {}: {}", what, err.body_text()))
    }
}

/// POST `/api/register` - record a file the client pinned itself.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterFileRequest>,
) -> Result<Json<FileRecord>, AppError> {
    let file = state.shares.register_file(payload).await?;
    Ok(Json(file))
}

/// GET `/api/files`
pub async fn list_files(
    State(state): State<AppState>,
) -> Result<Json<ListFilesResponse>, AppError> {
    let files = state.shares.list_files().await?;
    Ok(Json(ListFilesResponse { files }))
}

/// GET `/api/files/{id}` - file metadata plus its share links.
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileDetails>, AppError> {
    Ok(Json(state.shares.get_file(&id).await?))
}

/// DELETE `/api/files/{id}`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.shares.delete_file(&id).await?;
    Ok(Json(json!({ "message": "File deleted successfully" })))
}
