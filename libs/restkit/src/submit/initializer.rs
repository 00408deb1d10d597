use async_trait::async_trait;
use serde_json::{Map, Value};

use super::change_set::{ChangeAction, DataModificationItem};
use super::hooks::ChangeSetInitializer;
use crate::context::InvocationContext;
use crate::error::ApiError;
use crate::model::{ApiModel, PropertyKind};
use crate::provider::ChangeTracker;
use crate::record::{EntityRecord, format_key};

/// Terminal initializer.
///
/// - insert: a new record built from the item's values
/// - update: the stored entity with the item's values applied (merged, or replacing
///   every non-key property when `replace` is set); `original_values` must still match
/// - delete: the stored entity
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultChangeSetInitializer;

#[async_trait]
impl ChangeSetInitializer for DefaultChangeSetInitializer {
    async fn initialize(
        &self,
        ctx: &InvocationContext,
        tracker: &dyn ChangeTracker,
        item: &mut DataModificationItem,
    ) -> Result<(), ApiError> {
        let model = ctx.model();
        let entity_type = model
            .element_type_of(&item.entity_set)
            .ok_or_else(|| ApiError::ResourceNotFound(item.entity_set.clone()))?;

        let resource = match item.action {
            ChangeAction::Insert => {
                let mut record = EntityRecord::new();
                assign(model, &entity_type.name, &mut record, item.values.as_map())?;
                record
            }
            ChangeAction::Update => {
                let mut current = find_existing(tracker, item).await?;
                if let Some(original) = &item.original_values {
                    check_original(&item.entity_set, &current, original)?;
                }
                if item.replace {
                    current = current
                        .iter()
                        .map(|(name, value)| {
                            if entity_type.is_key(name) {
                                (name.clone(), value.clone())
                            } else {
                                (name.clone(), Value::Null)
                            }
                        })
                        .collect();
                }
                assign(model, &entity_type.name, &mut current, item.values.as_map())?;
                current
            }
            ChangeAction::Delete => find_existing(tracker, item).await?,
        };

        tracing::debug!(item = %item.describe(), "Change-set item initialized");
        item.resource = Some(resource);
        Ok(())
    }
}

async fn find_existing(
    tracker: &dyn ChangeTracker,
    item: &DataModificationItem,
) -> Result<EntityRecord, ApiError> {
    tracker
        .find(&item.entity_set, &item.key)
        .await?
        .ok_or_else(|| ApiError::EntityNotFound {
            entity_set: item.entity_set.clone(),
            key: format_key(&item.key),
        })
}

/// Every original value must equal the stored one. Nested objects compare by the
/// sub-properties they list.
fn check_original(
    entity_set: &str,
    current: &EntityRecord,
    original: &EntityRecord,
) -> Result<(), ApiError> {
    fn matches(stored: Option<&Value>, expected: &Value) -> bool {
        match (stored, expected) {
            (Some(Value::Object(stored)), Value::Object(expected)) => expected
                .iter()
                .all(|(k, v)| matches(stored.get(k), v)),
            (Some(stored), expected) => stored == expected,
            (None, expected) => expected.is_null(),
        }
    }

    for (name, expected) in original.iter() {
        if !matches(current.get(name), expected) {
            return Err(ApiError::PreconditionFailed {
                entity_set: entity_set.to_owned(),
                reason: format!("'{name}' was modified by another request"),
            });
        }
    }
    Ok(())
}

/// Assign `values` onto `target` by property name. Nested objects are applied to the
/// existing complex value property by property, so siblings keep their values.
fn assign(
    model: &ApiModel,
    owner: &str,
    target: &mut EntityRecord,
    values: &Map<String, Value>,
) -> Result<(), ApiError> {
    let properties = model.properties_of(owner).unwrap_or_default();
    for (name, value) in values {
        let property = properties.iter().find(|p| &p.name == name).ok_or_else(|| {
            ApiError::InvalidRequest(format!("'{owner}' has no property '{name}'"))
        })?;

        match (&property.kind, value) {
            (PropertyKind::Complex(type_name), Value::Object(nested)) => {
                let mut inner = match target.remove(name) {
                    Some(Value::Object(existing)) => EntityRecord::from(existing),
                    _ => EntityRecord::new(),
                };
                assign(model, type_name, &mut inner, nested)?;
                target.set(name.clone(), inner.into_json());
            }
            _ => {
                target.set(name.clone(), value.clone());
            }
        }
    }
    Ok(())
}
