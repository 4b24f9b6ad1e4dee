//! Liveness and readiness endpoints.
//!
//! `/healthz` and `/api/health` never touch storage. `/readyz` pings the
//! repository and round-trips a scratch file through the content directory.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use std::path::Path;
use tokio::fs;
use uuid::Uuid;

/// GET `/healthz`, `/api/health`
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET `/readyz`. 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let repository = state
        .shares
        .repository()
        .ping()
        .await
        .map_err(|err| err.to_string());
    let disk = scratch_round_trip(state.blobs.base_path()).await;

    let ready = repository.is_ok() && disk.is_ok();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if ready { "ok" } else { "error" },
        "checks": {
            "repository": check(&repository),
            "disk": check(&disk),
        },
    });
    (status, Json(body))
}

fn check(result: &Result<(), String>) -> Value {
    match result {
        Ok(()) => json!({ "ok": true }),
        Err(err) => json!({ "ok": false, "error": err }),
    }
}

/// Write, read back and remove a scratch file under `dir`.
async fn scratch_round_trip(dir: &Path) -> Result<(), String> {
    const SCRATCH: &[u8] = b"capshare-ready";
    let path = dir.join(format!(".ready-{}", Uuid::new_v4()));

    fs::write(&path, SCRATCH)
        .await
        .map_err(|err| format!("write failed: {}", err))?;
    let read = fs::read(&path).await;
    // Removal failure leaves a stray file but does not make us unready.
    let _ = fs::remove_file(&path).await;

    match read {
        Ok(bytes) if bytes == SCRATCH => Ok(()),
        Ok(_) => Err("read back different bytes".to_string()),
        Err(err) => Err(format!("read failed: {}", err)),
    }
}
