use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub analysis_url: String,
    pub notify_url: String,
    pub blob_dir: PathBuf,
    pub public_base_url: String,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let bind_addr = var("BIND_ADDR", "0.0.0.0:3050");
        let timeout = var("HTTP_TIMEOUT_SECS", "60");

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            bind_addr: bind_addr
                .parse()
                .with_context(|| format!("BIND_ADDR is not a socket address: {bind_addr}"))?,
            analysis_url: var("ANALYSIS_URL", "http://127.0.0.1:6000/process"),
            notify_url: var("NOTIFY_URL", "http://127.0.0.1:6000"),
            blob_dir: PathBuf::from(var("BLOB_DIR", "./blobs")),
            public_base_url: var("PUBLIC_BASE_URL", "http://localhost:3050"),
            http_timeout: Duration::from_secs(
                timeout
                    .parse()
                    .with_context(|| format!("HTTP_TIMEOUT_SECS is not a number: {timeout}"))?,
            ),
        })
    }
}
