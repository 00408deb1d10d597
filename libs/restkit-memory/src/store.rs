use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use restkit::InvocationContext;
use restkit::model::ApiModel;
use restkit::provider::{
    ChangeTracker, ChangeTrackerFactory, ModelProvider, ProviderError, QueryProvider,
    QuerySourceProvider, Queryable,
};
use restkit::query::QueryExpr;
use restkit::record::{EntityRecord, KeyValues};

use crate::eval;
use crate::tracker::MemoryChangeTracker;

pub(crate) type Tables = HashMap<String, Vec<EntityRecord>>;

pub(crate) struct StoreInner {
    pub(crate) model: ApiModel,
    pub(crate) tables: RwLock<Tables>,
    pub(crate) fail_next_commit: AtomicBool,
}

impl StoreInner {
    pub(crate) fn key_names(&self, entity_set: &str) -> Result<&[String], ProviderError> {
        self.model
            .element_type_of(entity_set)
            .map(|t| t.key.as_slice())
            .ok_or_else(|| ProviderError::UnknownEntitySet(entity_set.to_owned()))
    }

    pub(crate) fn key_of(
        &self,
        entity_set: &str,
        record: &EntityRecord,
    ) -> Result<KeyValues, ProviderError> {
        let names = self.key_names(entity_set)?;
        record.key_values(names).ok_or_else(|| {
            ProviderError::conflict(entity_set, "record does not carry every key property")
        })
    }
}

/// Table-per-entity-set store backing one model.
///
/// Cloning shares the tables. Queries run under the read lock; commits apply a
/// whole change-set under the write lock or nothing at all.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<StoreInner>,
}

impl InMemoryStore {
    /// Empty tables for every non-composed entity set of `model`.
    #[must_use]
    pub fn new(model: ApiModel) -> Self {
        let tables = model
            .entity_sets()
            .filter(|s| !s.composed)
            .map(|s| (s.name.clone(), Vec::new()))
            .collect();
        Self {
            inner: Arc::new(StoreInner {
                model,
                tables: RwLock::new(tables),
                fail_next_commit: AtomicBool::new(false),
            }),
        }
    }

    /// Append rows to a table, bypassing hooks. Duplicate keys are rejected.
    ///
    /// # Errors
    /// `UnknownEntitySet` or `Conflict`.
    pub fn seed<I>(&self, entity_set: &str, rows: I) -> Result<(), ProviderError>
    where
        I: IntoIterator<Item = EntityRecord>,
    {
        let names = self.inner.key_names(entity_set)?.to_vec();
        let mut tables = self.inner.tables.write();
        let table = tables
            .get_mut(entity_set)
            .ok_or_else(|| ProviderError::UnknownEntitySet(entity_set.to_owned()))?;
        for row in rows {
            let key = row.key_values(&names).ok_or_else(|| {
                ProviderError::conflict(entity_set, "seed row does not carry every key property")
            })?;
            if table.iter().any(|r| r.matches_key(&key)) {
                return Err(ProviderError::conflict(
                    entity_set,
                    format!("duplicate key {}", restkit::record::format_key(&key)),
                ));
            }
            table.push(row);
        }
        tracing::debug!(entity_set, rows = table.len(), "Table seeded");
        Ok(())
    }

    /// Snapshot of a table's committed rows.
    #[must_use]
    pub fn rows(&self, entity_set: &str) -> Vec<EntityRecord> {
        self.inner
            .tables
            .read()
            .get(entity_set)
            .cloned()
            .unwrap_or_default()
    }

    /// Committed row with the given key.
    #[must_use]
    pub fn get(&self, entity_set: &str, key: &KeyValues) -> Option<EntityRecord> {
        self.inner
            .tables
            .read()
            .get(entity_set)
            .and_then(|t| t.iter().find(|r| r.matches_key(key)).cloned())
    }

    /// Make the next commit fail before anything is applied.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn model(&self) -> &ApiModel {
        &self.inner.model
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.inner.tables.read();
        let mut names: Vec<_> = tables.keys().collect();
        names.sort();
        f.debug_struct("InMemoryStore")
            .field("namespace", &self.inner.model.namespace())
            .field("tables", &names)
            .finish()
    }
}

#[async_trait]
impl ModelProvider for InMemoryStore {
    async fn base_model(&self, _ctx: &InvocationContext) -> Result<ApiModel, ProviderError> {
        Ok(self.inner.model.clone())
    }
}

impl QuerySourceProvider for InMemoryStore {
    fn queryable(&self, entity_set: &str, element_type: &str) -> Option<Arc<dyn Queryable>> {
        if !self.inner.tables.read().contains_key(entity_set) {
            return None;
        }
        Some(Arc::new(TableQueryable {
            store: Arc::clone(&self.inner),
            entity_set: entity_set.to_owned(),
            element_type: element_type.to_owned(),
        }))
    }
}

impl ChangeTrackerFactory for InMemoryStore {
    fn open(&self) -> Result<Arc<dyn ChangeTracker>, ProviderError> {
        Ok(Arc::new(MemoryChangeTracker::new(Arc::clone(&self.inner))))
    }
}

/// One table as a query root.
pub struct TableQueryable {
    store: Arc<StoreInner>,
    entity_set: String,
    element_type: String,
}

impl TableQueryable {
    pub(crate) fn belongs_to(&self, store: &Arc<StoreInner>) -> bool {
        Arc::ptr_eq(&self.store, store)
    }
}

impl fmt::Debug for TableQueryable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableQueryable")
            .field("entity_set", &self.entity_set)
            .field("element_type", &self.element_type)
            .finish()
    }
}

impl Queryable for TableQueryable {
    fn entity_set(&self) -> &str {
        &self.entity_set
    }

    fn element_type(&self) -> &str {
        &self.element_type
    }

    fn provider(&self) -> Arc<dyn QueryProvider> {
        Arc::new(MemoryQueryProvider {
            store: Arc::clone(&self.store),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MemoryQueryProvider {
    store: Arc<StoreInner>,
}

#[async_trait]
impl QueryProvider for MemoryQueryProvider {
    async fn execute(&self, query: &QueryExpr) -> Result<Vec<EntityRecord>, ProviderError> {
        let tables = self.store.tables.read();
        eval::evaluate(&self.store, &tables, query)
    }

    async fn count(&self, query: &QueryExpr) -> Result<u64, ProviderError> {
        let tables = self.store.tables.read();
        let rows = eval::evaluate(&self.store, &tables, query)?;
        Ok(u64::try_from(rows.len()).unwrap_or(u64::MAX))
    }
}
