use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::core::cost::cache::PricingCache;
use crate::core::cost::fetch::{parse_pricing_document, PricingSource};
use crate::core::cost::pricing::{ModelPricing, PricingTable};

#[derive(Error, Debug)]
pub enum PricingError {
    #[error("Pricing unavailable: fetch failed and no cached table exists ({reason})")]
    Unavailable { reason: String },
}

/// Owns the resident pricing table.
///
/// All loads go through one async mutex, so a lookup never observes a table
/// that a concurrent fetch is halfway through replacing, and at most one
/// operation touches the cache file at a time.
pub struct PricingResolver {
    source: Box<dyn PricingSource>,
    cache: PricingCache,
    table: Mutex<Option<Arc<PricingTable>>>,
}

impl PricingResolver {
    pub fn new(source: Box<dyn PricingSource>, cache: PricingCache) -> Self {
        Self {
            source,
            cache,
            table: Mutex::new(None),
        }
    }

    pub async fn load_pricing(&self) -> Result<Arc<PricingTable>, PricingError> {
        self.load_pricing_at(Utc::now()).await
    }

    /// Make a pricing table resident and return it.
    ///
    /// Order: fresh resident table, fresh disk cache, remote fetch (persisted
    /// on success), then any cache or resident table regardless of age.
    pub async fn load_pricing_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Arc<PricingTable>, PricingError> {
        let mut resident = self.table.lock().await;

        if let Some(table) = resident.as_ref() {
            if !table.is_stale_at(now) {
                return Ok(Arc::clone(table));
            }
        }

        let cached = self.cache.load().await;
        if let Some(table) = cached.as_ref() {
            if !table.is_stale_at(now) {
                tracing::debug!(models = table.models.len(), "using cached pricing");
                let table = Arc::new(table.clone());
                *resident = Some(Arc::clone(&table));
                return Ok(table);
            }
        }

        match self.fetch_table(now).await {
            Ok(table) => {
                tracing::info!(models = table.models.len(), "fetched pricing table");
                if let Err(e) = self.cache.save(&table).await {
                    tracing::warn!("failed to persist pricing cache: {e:#}");
                }
                let table = Arc::new(table);
                *resident = Some(Arc::clone(&table));
                Ok(table)
            }
            Err(e) => {
                if let Some(table) = cached {
                    tracing::warn!(
                        fetched_at = %table.fetched_at,
                        "pricing fetch failed, using stale cache: {e:#}"
                    );
                    let table = Arc::new(table);
                    *resident = Some(Arc::clone(&table));
                    return Ok(table);
                }
                if let Some(table) = resident.as_ref() {
                    tracing::warn!("pricing fetch failed, keeping resident table: {e:#}");
                    return Ok(Arc::clone(table));
                }
                Err(PricingError::Unavailable {
                    reason: format!("{e:#}"),
                })
            }
        }
    }

    async fn fetch_table(&self, now: DateTime<Utc>) -> anyhow::Result<PricingTable> {
        let document = self.source.fetch().await?;
        let models = parse_pricing_document(&document)?;
        Ok(PricingTable::new(models, now))
    }

    /// The resident table, if one has been loaded.
    pub async fn current(&self) -> Option<Arc<PricingTable>> {
        self.table.lock().await.clone()
    }

    pub async fn get_pricing(&self, model: &str) -> Option<ModelPricing> {
        let table = self.current().await?;
        table.get_pricing(model).cloned()
    }
}
