use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::change_set::{ChangeAction, DataModificationItem};
use super::hooks::ChangeSetItemValidator;
use crate::context::InvocationContext;
use crate::error::ApiError;
use crate::model::{ApiModel, PropertyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationSeverity {
    Error,
    Warning,
    Informational,
}

/// One finding of a validator. Serialized as `{Id, Message, PropertyName, Severity}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValidationResult {
    pub id: String,
    pub message: String,
    pub property_name: Option<String>,
    pub severity: ValidationSeverity,
    /// Position of the offending item in the change-set.
    #[serde(skip)]
    pub item_index: Option<usize>,
}

impl ValidationResult {
    #[must_use]
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            property_name: None,
            severity: ValidationSeverity::Error,
            item_index: None,
        }
    }

    #[must_use]
    pub fn warning(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ValidationSeverity::Warning,
            ..Self::error(id, message)
        }
    }

    #[must_use]
    pub fn for_property(mut self, property: impl Into<String>) -> Self {
        self.property_name = Some(property.into());
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == ValidationSeverity::Error
    }
}

/// A change-set failed validation; nothing was written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("change-set validation failed with {} error(s)", count_errors(.results))]
pub struct ChangeSetValidationError {
    results: Vec<ValidationResult>,
}

impl ChangeSetValidationError {
    #[must_use]
    pub fn new(results: Vec<ValidationResult>) -> Self {
        Self { results }
    }

    /// Every result collected, including warnings.
    #[must_use]
    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        count_errors(&self.results)
    }

    #[must_use]
    pub fn into_results(self) -> Vec<ValidationResult> {
        self.results
    }
}

fn count_errors(results: &[ValidationResult]) -> usize {
    results.iter().filter(|r| r.is_error()).count()
}

/// Terminal validator: checks an item against the model.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelValidator;

#[async_trait]
impl ChangeSetItemValidator for ModelValidator {
    async fn validate(
        &self,
        ctx: &InvocationContext,
        item: &DataModificationItem,
        results: &mut Vec<ValidationResult>,
    ) -> Result<(), ApiError> {
        let model = ctx.model();
        let Some(entity_type) = model.element_type_of(&item.entity_set) else {
            results.push(ValidationResult::error(
                "UnknownEntitySet",
                format!("entity set '{}' does not exist", item.entity_set),
            ));
            return Ok(());
        };

        if matches!(item.action, ChangeAction::Update | ChangeAction::Delete) {
            for key in &entity_type.key {
                if !item.key.contains_key(key) {
                    results.push(
                        ValidationResult::error(
                            "KeyMissing",
                            format!("key property '{key}' is missing"),
                        )
                        .for_property(key.clone()),
                    );
                }
            }
            for name in item.key.keys() {
                if !entity_type.is_key(name) {
                    results.push(
                        ValidationResult::error(
                            "UnknownKeyProperty",
                            format!("'{name}' is not a key property of '{}'", entity_type.name),
                        )
                        .for_property(name.clone()),
                    );
                }
            }
        }

        if item.action == ChangeAction::Delete {
            return Ok(());
        }

        check_values(model, &entity_type.name, item.values.as_map(), "", results);

        match item.action {
            ChangeAction::Insert => {
                for p in &entity_type.properties {
                    let mandatory = p.required || entity_type.is_key(&p.name);
                    if mandatory && item.values.get(&p.name).is_none_or(Value::is_null) {
                        results.push(
                            ValidationResult::error(
                                "RequiredPropertyMissing",
                                format!("property '{}' is required", p.name),
                            )
                            .for_property(p.name.clone()),
                        );
                    }
                }
            }
            ChangeAction::Update => {
                // A full replace resets every omitted non-key property to null.
                if item.replace {
                    for p in &entity_type.properties {
                        let mandatory = p.required || !p.nullable;
                        if mandatory
                            && !entity_type.is_key(&p.name)
                            && item.values.get(&p.name).is_none_or(Value::is_null)
                        {
                            results.push(
                                ValidationResult::error(
                                    "RequiredPropertyMissing",
                                    format!("property '{}' is required on replace", p.name),
                                )
                                .for_property(p.name.clone()),
                            );
                        }
                    }
                }
                for (name, key_value) in &item.key {
                    if let Some(new_value) = item.values.get(name)
                        && new_value != key_value
                    {
                        results.push(
                            ValidationResult::error(
                                "KeyPropertyChanged",
                                format!("key property '{name}' cannot be changed"),
                            )
                            .for_property(name.clone()),
                        );
                    }
                }
            }
            ChangeAction::Delete => {}
        }
        Ok(())
    }
}

/// Check `values` against the properties of `owner`, descending into complex values.
/// `prefix` is the path of `owner` inside the entity (`Addr/`).
fn check_values(
    model: &ApiModel,
    owner: &str,
    values: &Map<String, Value>,
    prefix: &str,
    results: &mut Vec<ValidationResult>,
) {
    let properties = model.properties_of(owner).unwrap_or_default();
    for (name, value) in values {
        let path = format!("{prefix}{name}");
        let declared = properties
            .iter()
            .find(|p| &p.name == name)
            .filter(|_| model.is_property_visible(owner, name));
        let Some(property) = declared else {
            results.push(
                ValidationResult::error(
                    "UnknownProperty",
                    format!("'{owner}' has no property '{name}'"),
                )
                .for_property(path),
            );
            continue;
        };

        if value.is_null() {
            if !property.nullable {
                results.push(
                    ValidationResult::error("NullNotAllowed", format!("'{path}' cannot be null"))
                        .for_property(path),
                );
            }
            continue;
        }

        match &property.kind {
            PropertyKind::Primitive(kind) => {
                if !kind.accepts(value) {
                    results.push(
                        ValidationResult::error(
                            "TypeMismatch",
                            format!("'{path}' expects a {kind} value"),
                        )
                        .for_property(path),
                    );
                    continue;
                }
                if let (Some(max), Some(text)) = (property.max_length, value.as_str())
                    && text.chars().count() > max
                {
                    results.push(
                        ValidationResult::error(
                            "MaxLengthExceeded",
                            format!("'{path}' is longer than {max} characters"),
                        )
                        .for_property(path),
                    );
                }
            }
            PropertyKind::Complex(type_name) => match value {
                Value::Object(nested) => {
                    check_values(model, type_name, nested, &format!("{path}/"), results);
                }
                _ => results.push(
                    ValidationResult::error(
                        "TypeMismatch",
                        format!("'{path}' expects a {type_name} object"),
                    )
                    .for_property(path),
                ),
            },
        }
    }
}
