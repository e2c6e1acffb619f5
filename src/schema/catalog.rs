//! # Schema Catalog
//!
//! Lazily-populated cache of table → columns in front of a [`SchemaSource`].
//!
//! Each table has its own slot guarded by an async mutex, so concurrent
//! lookups of the same uncached table wait for a single introspection call
//! instead of issuing one each. Lookups of different tables never contend.
//! Failed lookups (unknown table, driver error) are not cached.

use super::{SchemaSource, TableSchema};
use crate::error::{IntentError, IntentResult};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug)]
struct CachedTable {
    schema: Arc<TableSchema>,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    cell: Arc<tokio::sync::Mutex<Option<CachedTable>>>,
}

/// Cached view of the target schema
pub struct SchemaCatalog {
    source: Arc<dyn SchemaSource>,
    /// `None` caches for the process lifetime
    ttl: Option<Duration>,
    slots: DashMap<String, Arc<Slot>>,
}

impl SchemaCatalog {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        SchemaCatalog {
            source,
            ttl: None,
            slots: DashMap::new(),
        }
    }

    /// Expire entries `ttl` after population. Expiry is checked on read.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl.filter(|d| !d.is_zero());
        self
    }

    /// Columns of `table`, fetching them on first use
    pub async fn columns_of(&self, table: &str) -> IntentResult<Arc<TableSchema>> {
        // Clone the slot out so no map shard lock is held across the await
        let (slot, mut cell) = loop {
            let slot = Arc::clone(self.slots.entry(table.to_string()).or_default().value());
            let cell = Arc::clone(&slot.cell).lock_owned().await;
            // Evicted while we waited: a newer slot owns this table now
            if self.is_current(table, &slot) {
                break (slot, cell);
            }
        };

        if let Some(cached) = cell.as_ref() {
            if self.is_fresh(cached) {
                return Ok(Arc::clone(&cached.schema));
            }
            debug!(table, "catalog entry expired");
        }

        let result = self.source.table_columns(table).await;
        let columns = match result {
            Ok(columns) if !columns.is_empty() => columns,
            Ok(_) => {
                *cell = None;
                self.evict_slot(table, &slot);
                return Err(IntentError::UnknownTable {
                    table: table.to_string(),
                });
            }
            Err(e) => {
                *cell = None;
                self.evict_slot(table, &slot);
                return Err(e);
            }
        };

        info!(table, columns = columns.len(), "catalog populated");
        let schema = Arc::new(TableSchema::new(table, columns));
        *cell = Some(CachedTable {
            schema: Arc::clone(&schema),
            fetched_at: Instant::now(),
        });
        Ok(schema)
    }

    /// Table names straight from the source (not cached)
    pub async fn list_tables(&self) -> IntentResult<Vec<String>> {
        self.source.list_tables().await
    }

    /// Drop one table's entry; the next lookup re-fetches it
    pub fn refresh(&self, table: &str) {
        if self.slots.remove(table).is_some() {
            debug!(table, "catalog entry invalidated");
        }
    }

    /// Drop every entry
    pub fn refresh_all(&self) {
        self.slots.clear();
        debug!("catalog cleared");
    }

    /// Whether `table` currently has a populated, unexpired entry
    pub fn is_cached(&self, table: &str) -> bool {
        let Some(slot) = self.slots.get(table).map(|s| Arc::clone(s.value())) else {
            return false;
        };
        let cached = match slot.cell.try_lock() {
            Ok(cell) => cell.as_ref().is_some_and(|c| self.is_fresh(c)),
            // Being populated right now
            Err(_) => false,
        };
        cached
    }

    fn is_fresh(&self, cached: &CachedTable) -> bool {
        self.ttl
            .is_none_or(|ttl| cached.fetched_at.elapsed() < ttl)
    }

    fn is_current(&self, table: &str, slot: &Arc<Slot>) -> bool {
        self.slots
            .get(table)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    fn evict_slot(&self, table: &str, slot: &Arc<Slot>) {
        self.slots.remove_if(table, |_, current| Arc::ptr_eq(current, slot));
    }
}

impl std::fmt::Debug for SchemaCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCatalog")
            .field("ttl", &self.ttl)
            .field("tables", &self.slots.len())
            .finish_non_exhaustive()
    }
}
