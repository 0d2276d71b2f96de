use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::core::cost::pricing::PricingTable;

/// Default location: `$XDG_CACHE_HOME/tokentally/pricing.json`.
pub fn default_cache_path() -> PathBuf {
    let base = std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join(".cache")
        });
    base.join("tokentally").join("pricing.json")
}

/// The pricing table persisted as `{ "models": {...}, "fetchedAt": ... }`.
#[derive(Debug, Clone)]
pub struct PricingCache {
    path: PathBuf,
}

impl PricingCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached table. A missing or unreadable cache is `None`.
    pub async fn load(&self) -> Option<PricingTable> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), "failed to read pricing cache: {e}");
                }
                return None;
            }
        };
        match serde_json::from_str::<PricingTable>(&content) {
            Ok(table) => Some(table),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "ignoring corrupt pricing cache: {e}");
                None
            }
        }
    }

    /// Replace the cache file with `table`.
    pub async fn save(&self, table: &PricingTable) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string(table).context("Failed to serialize pricing cache")?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to write cache to {}", self.path.display()))?;
        Ok(())
    }
}
