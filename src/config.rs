use crate::services::ids::parse_duration;
use anyhow::{Context, Result, anyhow};
use chrono::Duration;
use clap::Parser;
use std::{env, str::FromStr};

const DEFAULT_MAX_FILE_SIZE: usize = 100 * 1024 * 1024;
const DEFAULT_MAX_FILES: usize = 10;

/// Slack on top of the payload sizes for multipart framing.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    /// SQLite URL. `None` keeps all records in memory.
    pub database_url: Option<String>,
    /// Base for content retrieval URLs.
    pub gateway_url: String,
    /// Externally visible origin for share URLs. `None` derives it from the
    /// request `Host` header.
    pub public_url: Option<String>,
    pub default_expiry: Duration,
    pub max_file_size: usize,
    /// Parts accepted by one upload request.
    pub max_files: usize,
    /// Issuer identity written into capabilities.
    pub space_did: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Expiring, revocable share links for content-addressed files")]
pub struct Args {
    /// Host to bind to (overrides CAPSHARE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CAPSHARE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where content is stored (overrides CAPSHARE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// SQLite database URL; in-memory store when unset (overrides CAPSHARE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Gateway base URL for content retrieval (overrides CAPSHARE_GATEWAY_URL)
    #[arg(long)]
    pub gateway_url: Option<String>,

    /// Public origin used in share URLs (overrides CAPSHARE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Default share link lifetime, e.g. 24h or 7d (overrides CAPSHARE_DEFAULT_EXPIRY)
    #[arg(long)]
    pub default_expiry: Option<String>,

    /// Maximum upload size in bytes (overrides CAPSHARE_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<usize>,

    /// Maximum files per upload request (overrides CAPSHARE_MAX_FILES)
    #[arg(long)]
    pub max_files: Option<usize>,

    /// Issuer DID for capabilities (overrides CAPSHARE_SPACE_DID)
    #[arg(long)]
    pub space_did: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up by `env`, over defaults.
    fn merge(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match args.port {
            Some(port) => port,
            None => parse_env(&env, "CAPSHARE_PORT")?.unwrap_or(3000),
        };
        let max_file_size = match args.max_file_size {
            Some(size) => size,
            None => parse_env(&env, "CAPSHARE_MAX_FILE_SIZE")?.unwrap_or(DEFAULT_MAX_FILE_SIZE),
        };
        let max_files = match args.max_files {
            Some(count) => count,
            None => parse_env(&env, "CAPSHARE_MAX_FILES")?.unwrap_or(DEFAULT_MAX_FILES),
        };
        if max_files == 0 {
            return Err(anyhow!("max files per upload must be at least 1"));
        }

        let expiry_raw = args
            .default_expiry
            .or_else(|| env("CAPSHARE_DEFAULT_EXPIRY"))
            .unwrap_or_else(|| "24h".into());
        let default_expiry = parse_duration(&expiry_raw)
            .map_err(|err| anyhow!("invalid default expiry `{}`: {}", expiry_raw, err))?;

        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: args
                .host
                .or_else(|| env("CAPSHARE_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            storage_dir: args
                .storage_dir
                .or_else(|| env("CAPSHARE_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/blobs".into()),
            database_url: non_empty(args.database_url.or_else(|| env("CAPSHARE_DATABASE_URL"))),
            gateway_url: args
                .gateway_url
                .or_else(|| env("CAPSHARE_GATEWAY_URL"))
                .unwrap_or_else(|| format!("http://localhost:{}/content", port)),
            public_url: non_empty(args.public_url.or_else(|| env("CAPSHARE_PUBLIC_URL"))),
            default_expiry,
            max_file_size,
            max_files,
            space_did: args
                .space_did
                .or_else(|| env("CAPSHARE_SPACE_DID"))
                .unwrap_or_else(|| "did:key:capshare-local".into()),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Request body limit for uploads: every accepted part at full size.
    pub fn upload_body_limit(&self) -> usize {
        self.max_file_size
            .saturating_mul(self.max_files)
            .saturating_add(MULTIPART_OVERHEAD)
    }
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(key)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", key, value))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_args() -> Args {
        Args::parse_from(["capshare"])
    }

    #[test]
    fn defaults_apply_without_env() {
        let cfg = AppConfig::merge(no_args(), |_| None).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.default_expiry, Duration::hours(24));
        assert_eq!(cfg.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(cfg.max_files, DEFAULT_MAX_FILES);
        assert_eq!(cfg.gateway_url, "http://localhost:3000/content");
        assert!(cfg.database_url.is_none());
        assert!(cfg.public_url.is_none());
    }

    #[test]
    fn args_override_env() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CAPSHARE_PORT", "8080"),
            ("CAPSHARE_HOST", "127.0.0.1"),
            ("CAPSHARE_DEFAULT_EXPIRY", "7d"),
            ("CAPSHARE_DATABASE_URL", ""),
        ]);
        let args = Args::parse_from(["capshare", "--port", "9000", "--migrate"]);
        let cfg = AppConfig::merge(args, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:9000");
        assert_eq!(cfg.default_expiry, Duration::days(7));
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn bad_values_are_startup_errors() {
        assert!(AppConfig::merge(no_args(), |k| (k == "CAPSHARE_PORT").then(|| "x".into())).is_err());
        let args = Args::parse_from(["capshare", "--default-expiry", "banana"]);
        assert!(AppConfig::merge(args, |_| None).is_err());
    }

    #[test]
    fn upload_limit_covers_every_part() {
        let args = Args::parse_from(["capshare", "--max-file-size", "4096", "--max-files", "3"]);
        let cfg = AppConfig::merge(args, |_| None).unwrap();
        assert_eq!(cfg.upload_body_limit(), 3 * 4096 + MULTIPART_OVERHEAD);

        let huge = usize::MAX.to_string();
        let args = Args::parse_from(["capshare", "--max-file-size", huge.as_str()]);
        let cfg = AppConfig::merge(args, |_| None).unwrap();
        assert_eq!(cfg.upload_body_limit(), usize::MAX);

        let args = Args::parse_from(["capshare", "--max-files", "0"]);
        assert!(AppConfig::merge(args, |_| None).is_err());
    }
}
