use anyhow::Result;
use axum::Router;
use services::{
    content_store::LocalContentStore,
    delegation_service::DelegationService,
    repository::{DelegationLedgerRef, MemoryRepository, RepositoryRef},
    share_service::{SharePolicy, ShareService},
    sqlite_repository::SqliteRepository,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting capshare with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Pick the record store ---
    // One backend serves both share records and the delegation ledger.
    let (repo, ledger): (RepositoryRef, DelegationLedgerRef) = match &cfg.database_url {
        Some(db_url) => {
            let sqlite = connect_sqlite(db_url).await?;

            // --- Handle migration mode ---
            if migrate {
                sqlite.migrate().await?;
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            let sqlite = Arc::new(sqlite);
            (sqlite.clone() as RepositoryRef, sqlite as DelegationLedgerRef)
        }
        None => {
            if migrate {
                anyhow::bail!("--migrate requires a database URL");
            }
            tracing::warn!("No database URL configured; records are kept in memory");
            let memory = Arc::new(MemoryRepository::new());
            (memory.clone() as RepositoryRef, memory as DelegationLedgerRef)
        }
    };

    // --- Initialize core services ---
    let blobs = Arc::new(LocalContentStore::new(
        cfg.storage_dir.clone(),
        cfg.gateway_url.clone(),
        cfg.space_did.clone(),
        ledger,
    ));
    let shares = ShareService::new(
        repo,
        blobs.clone(),
        SharePolicy {
            default_ttl: cfg.default_expiry,
        },
    );
    let delegations = DelegationService::new(blobs.clone());
    let upload_limit = cfg.upload_body_limit();

    let state = state::AppState {
        shares,
        delegations,
        blobs,
        config: Arc::new(cfg.clone()),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(upload_limit).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Open (creating if needed) the SQLite database behind `db_url`.
async fn connect_sqlite(db_url: &str) -> Result<SqliteRepository> {
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");

    // Create parent directory if needed
    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(SqliteRepository::new(Arc::new(pool)))
}
