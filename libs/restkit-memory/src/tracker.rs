use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::Mutex;

use restkit::provider::{ChangeTracker, ProviderError};
use restkit::record::{EntityRecord, KeyValues, format_key};

use crate::store::{StoreInner, Tables};

#[derive(Debug, Clone)]
enum Staged {
    Insert {
        entity_set: String,
        key: KeyValues,
        record: EntityRecord,
    },
    Update {
        entity_set: String,
        key: KeyValues,
        record: EntityRecord,
    },
    Delete {
        entity_set: String,
        key: KeyValues,
    },
}

impl Staged {
    fn reads_existing(&self) -> bool {
        matches!(self, Staged::Update { .. } | Staged::Delete { .. })
    }

    fn target(&self) -> (&str, &KeyValues) {
        match self {
            Staged::Insert {
                entity_set, key, ..
            }
            | Staged::Update {
                entity_set, key, ..
            }
            | Staged::Delete { entity_set, key } => (entity_set, key),
        }
    }
}

/// Unit of work over an [`crate::InMemoryStore`].
///
/// Changes are staged in order and applied together by `commit`. A commit that hits a
/// conflict leaves every table untouched.
///
/// The first `find` of an entity remembers the committed row it saw. Updates and
/// deletes of that entity only commit while the stored row is still the same, so a
/// change built on a stale read fails instead of overwriting a newer commit.
pub(crate) struct MemoryChangeTracker {
    store: Arc<StoreInner>,
    staged: Mutex<Vec<Staged>>,
    /// Committed row seen by the first read, by entity set and formatted key.
    reads: Mutex<HashMap<(String, String), Option<EntityRecord>>>,
}

impl MemoryChangeTracker {
    pub(crate) fn new(store: Arc<StoreInner>) -> Self {
        Self {
            store,
            staged: Mutex::new(Vec::new()),
            reads: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ChangeTracker for MemoryChangeTracker {
    async fn find(
        &self,
        entity_set: &str,
        key: &KeyValues,
    ) -> Result<Option<EntityRecord>, ProviderError> {
        let mut current = {
            let tables = self.store.tables.read();
            let table = tables
                .get(entity_set)
                .ok_or_else(|| ProviderError::UnknownEntitySet(entity_set.to_owned()))?;
            table.iter().find(|r| r.matches_key(key)).cloned()
        };
        self.reads
            .lock()
            .entry((entity_set.to_owned(), format_key(key)))
            .or_insert_with(|| current.clone());
        for change in self.staged.lock().iter() {
            if change.target() != (entity_set, key) {
                continue;
            }
            current = match change {
                Staged::Insert { record, .. } | Staged::Update { record, .. } => {
                    Some(record.clone())
                }
                Staged::Delete { .. } => None,
            };
        }
        Ok(current)
    }

    async fn track_insert(
        &self,
        entity_set: &str,
        record: EntityRecord,
    ) -> Result<(), ProviderError> {
        let key = self.store.key_of(entity_set, &record)?;
        self.staged.lock().push(Staged::Insert {
            entity_set: entity_set.to_owned(),
            key,
            record,
        });
        Ok(())
    }

    async fn track_update(
        &self,
        entity_set: &str,
        key: &KeyValues,
        record: EntityRecord,
    ) -> Result<(), ProviderError> {
        self.staged.lock().push(Staged::Update {
            entity_set: entity_set.to_owned(),
            key: key.clone(),
            record,
        });
        Ok(())
    }

    async fn track_delete(&self, entity_set: &str, key: &KeyValues) -> Result<(), ProviderError> {
        self.staged.lock().push(Staged::Delete {
            entity_set: entity_set.to_owned(),
            key: key.clone(),
        });
        Ok(())
    }

    async fn commit(&self) -> Result<u64, ProviderError> {
        let staged = std::mem::take(&mut *self.staged.lock());
        let mut tables = self.store.tables.write();
        if self.store.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(ProviderError::Other(anyhow::anyhow!(
                "commit rejected by the store"
            )));
        }

        {
            let reads = self.reads.lock();
            for change in staged.iter().filter(|c| c.reads_existing()) {
                let (entity_set, key) = change.target();
                let Some(seen) = reads.get(&(entity_set.to_owned(), format_key(key))) else {
                    continue;
                };
                let stored = tables
                    .get(entity_set)
                    .and_then(|t| t.iter().find(|r| r.matches_key(key)));
                if stored != seen.as_ref() {
                    return Err(ProviderError::conflict(
                        entity_set,
                        format!(
                            "entity with key {} was changed by another request",
                            format_key(key)
                        ),
                    ));
                }
            }
        }

        let mut working: Tables = Tables::new();
        for change in &staged {
            let (entity_set, _) = change.target();
            if !working.contains_key(entity_set) {
                let table = tables
                    .get(entity_set)
                    .ok_or_else(|| ProviderError::UnknownEntitySet(entity_set.to_owned()))?;
                working.insert(entity_set.to_owned(), table.clone());
            }
        }
        for change in &staged {
            apply(&mut working, change)?;
        }

        let affected = u64::try_from(staged.len()).unwrap_or(u64::MAX);
        tables.extend(working);
        tracing::debug!(affected, "In-memory change-set committed");
        Ok(affected)
    }
}

fn apply(tables: &mut Tables, change: &Staged) -> Result<(), ProviderError> {
    let (entity_set, key) = change.target();
    let table = tables
        .get_mut(entity_set)
        .ok_or_else(|| ProviderError::UnknownEntitySet(entity_set.to_owned()))?;
    let position = table.iter().position(|r| r.matches_key(key));
    match (change, position) {
        (Staged::Insert { record, .. }, None) => table.push(record.clone()),
        (Staged::Insert { .. }, Some(_)) => {
            return Err(ProviderError::conflict(
                entity_set,
                format!("an entity with key {} already exists", format_key(key)),
            ));
        }
        (Staged::Update { record, .. }, Some(i)) => table[i] = record.clone(),
        (Staged::Delete { .. }, Some(i)) => {
            table.remove(i);
        }
        (Staged::Update { .. } | Staged::Delete { .. }, None) => {
            return Err(ProviderError::conflict(
                entity_set,
                format!("no entity with key {} exists any more", format_key(key)),
            ));
        }
    }
    Ok(())
}
