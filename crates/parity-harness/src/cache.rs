//! Introspection cache using moka
//!
//! Catalog queries are answered once per table for the lifetime of a run.
//! Both environments are cloned from the same template, so one cache backed
//! by either environment's catalog serves both.

use crate::error::HarnessResult;
use async_trait::async_trait;
use moka::future::Cache;
use parity_model::{DbVariant, TableProfile};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Source of table metadata
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Columns, enum values and foreign keys of `table`; `None` when the
    /// table does not exist
    async fn table_profile(&self, table: &str) -> HarnessResult<Option<TableProfile>>;

    /// Names of every table in the public schema
    async fn table_names(&self) -> HarnessResult<BTreeSet<String>>;
}

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of cached profiles
    pub entry_count: u64,
}

/// Per-run table profile cache
#[derive(Clone)]
pub struct SchemaCache {
    profiles: Cache<String, Arc<Option<TableProfile>>>,
    tables: Arc<OnceCell<BTreeSet<String>>>,
    catalog: Arc<dyn Catalog>,
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("entries", &self.profiles.entry_count())
            .finish_non_exhaustive()
    }
}

impl SchemaCache {
    /// Default profile capacity
    pub const DEFAULT_CAPACITY: u64 = 512;

    /// Cache over `catalog`
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self::with_capacity(catalog, Self::DEFAULT_CAPACITY)
    }

    /// Cache with an explicit capacity
    #[must_use]
    pub fn with_capacity(catalog: Arc<dyn Catalog>, max_capacity: u64) -> Self {
        Self {
            profiles: Cache::new(max_capacity),
            tables: Arc::new(OnceCell::new()),
            catalog,
        }
    }

    /// Profile of `table`, loading it on first use
    ///
    /// Missing tables are cached as `None` too.
    ///
    /// # Errors
    /// Propagates catalog failures; nothing is cached for a failed load.
    pub async fn profile(&self, table: &str) -> HarnessResult<Arc<Option<TableProfile>>> {
        if let Some(cached) = self.profiles.get(table).await {
            return Ok(cached);
        }
        debug!(table, "introspecting");
        let loaded = Arc::new(self.catalog.table_profile(table).await?);
        self.profiles.insert(table.to_string(), Arc::clone(&loaded)).await;
        Ok(loaded)
    }

    /// Every table name, loaded once
    ///
    /// # Errors
    /// Propagates catalog failures.
    pub async fn tables(&self) -> HarnessResult<&BTreeSet<String>> {
        self.tables
            .get_or_try_init(|| async { self.catalog.table_names().await })
            .await
    }

    /// True when `table` exists
    ///
    /// # Errors
    /// Propagates catalog failures.
    pub async fn has_table(&self, table: &str) -> HarnessResult<bool> {
        Ok(self.tables().await?.contains(table))
    }

    /// State variants of `table`'s rows; empty for unknown tables
    ///
    /// # Errors
    /// Propagates catalog failures.
    pub async fn variants(&self, table: &str) -> HarnessResult<Vec<DbVariant>> {
        let profile = self.profile(table).await?;
        let Some(profile) = profile.as_ref() else {
            return Ok(Vec::new());
        };
        let tables = self.tables().await?;
        Ok(parity_synth::state::variants_for(profile, |t| tables.contains(t)))
    }

    /// Drop a cached profile
    pub async fn invalidate(&self, table: &str) {
        self.profiles.invalidate(table).await;
    }

    /// Cache statistics
    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.profiles.entry_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_test_utils::payments_profile;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCatalog {
        profile_calls: AtomicUsize,
        name_calls: AtomicUsize,
    }

    #[async_trait]
    impl Catalog for CountingCatalog {
        async fn table_profile(&self, table: &str) -> HarnessResult<Option<TableProfile>> {
            self.profile_calls.fetch_add(1, Ordering::SeqCst);
            Ok((table == "payments").then(payments_profile))
        }

        async fn table_names(&self) -> HarnessResult<BTreeSet<String>> {
            self.name_calls.fetch_add(1, Ordering::SeqCst);
            Ok(["payments".to_string()].into())
        }
    }

    #[tokio::test]
    async fn profiles_load_once() {
        let catalog = Arc::new(CountingCatalog::default());
        let cache = SchemaCache::new(catalog.clone());

        let first = cache.profile("payments").await.unwrap();
        let second = cache.profile("payments").await.unwrap();
        assert!(first.is_some());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(catalog.profile_calls.load(Ordering::SeqCst), 1);

        assert!(cache.profile("ghosts").await.unwrap().is_none());
        assert!(cache.profile("ghosts").await.unwrap().is_none());
        assert_eq!(catalog.profile_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn table_names_load_once() {
        let catalog = Arc::new(CountingCatalog::default());
        let cache = SchemaCache::new(catalog.clone());
        assert!(cache.has_table("payments").await.unwrap());
        assert!(!cache.has_table("refunds").await.unwrap());
        assert_eq!(catalog.name_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_reloads() {
        let catalog = Arc::new(CountingCatalog::default());
        let cache = SchemaCache::new(catalog.clone());
        cache.profile("payments").await.unwrap();
        cache.invalidate("payments").await;
        cache.profile("payments").await.unwrap();
        assert_eq!(catalog.profile_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn variants_for_known_table() {
        let cache = SchemaCache::new(Arc::new(CountingCatalog::default()));
        assert!(!cache.variants("payments").await.unwrap().is_empty());
        assert!(cache.variants("ghosts").await.unwrap().is_empty());
    }
}
