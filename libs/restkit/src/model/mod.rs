//! Exposed schema: entity sets, entity and complex types, operations, visibility.
//!
//! The model is built once by [`ModelBuilder`] at startup, filtered through
//! [`ModelVisibilityFilter`] and validated as a whole. Hidden elements stay in the
//! model (providers and initializers still need them) but are reported as absent by
//! the `visible_*` accessors and the pipelines.

mod builder;
mod types;
mod visibility;

pub use builder::{ModelBuilder, ProviderModelBuilder};
pub use types::{
    ComplexType, EntitySet, EntityType, FieldKind, OperationDescriptor, OperationKind,
    ParameterDef, PropertyDef, PropertyKind,
};
pub use visibility::{AllVisible, ModelElement, ModelVisibilityFilter};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

/// One structural problem found while building the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIssue {
    /// Element the problem is attached to, e.g. `EntitySet:Orders`.
    pub element: String,
    pub message: String,
}

impl ModelIssue {
    #[must_use]
    pub fn new(element: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ModelIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.element, self.message)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model is invalid ({} issue(s)): {}", .0.len(), join_issues(.0))]
    Invalid(Vec<ModelIssue>),
}

impl ModelError {
    #[must_use]
    pub fn issues(&self) -> &[ModelIssue] {
        match self {
            ModelError::Invalid(issues) => issues,
        }
    }
}

fn join_issues(issues: &[ModelIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Default)]
struct Hidden {
    entity_sets: BTreeSet<String>,
    entity_types: BTreeSet<String>,
    properties: BTreeSet<(String, String)>,
    operations: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ApiModel {
    namespace: String,
    entity_sets: BTreeMap<String, EntitySet>,
    entity_types: BTreeMap<String, EntityType>,
    complex_types: BTreeMap<String, ComplexType>,
    operations: BTreeMap<String, OperationDescriptor>,
    hidden: Hidden,
    issues: Vec<ModelIssue>,
}

impl ApiModel {
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    // --- construction --------------------------------------------------------------------

    /// Add an entity type; a duplicate name is recorded as an issue.
    pub fn add_entity_type(&mut self, ty: EntityType) -> &mut Self {
        if self.entity_types.contains_key(&ty.name) || self.complex_types.contains_key(&ty.name)
        {
            self.record_issue(ModelIssue::new(
                format!("EntityType:{}", ty.name),
                "duplicate type name",
            ));
        } else {
            self.entity_types.insert(ty.name.clone(), ty);
        }
        self
    }

    pub fn add_complex_type(&mut self, ty: ComplexType) -> &mut Self {
        if self.entity_types.contains_key(&ty.name) || self.complex_types.contains_key(&ty.name)
        {
            self.record_issue(ModelIssue::new(
                format!("ComplexType:{}", ty.name),
                "duplicate type name",
            ));
        } else {
            self.complex_types.insert(ty.name.clone(), ty);
        }
        self
    }

    pub fn add_entity_set(&mut self, set: EntitySet) -> &mut Self {
        if self.entity_sets.contains_key(&set.name) {
            self.record_issue(ModelIssue::new(
                format!("EntitySet:{}", set.name),
                "duplicate entity set name",
            ));
        } else {
            self.entity_sets.insert(set.name.clone(), set);
        }
        self
    }

    pub fn add_operation(&mut self, op: OperationDescriptor) -> &mut Self {
        if self.operations.contains_key(&op.name) {
            self.record_issue(ModelIssue::new(
                format!("Operation:{}", op.name),
                "duplicate operation name",
            ));
        } else {
            self.operations.insert(op.name.clone(), op);
        }
        self
    }

    pub fn record_issue(&mut self, issue: ModelIssue) {
        tracing::debug!(element = %issue.element, message = %issue.message, "Model issue recorded");
        self.issues.push(issue);
    }

    #[must_use]
    pub fn issues(&self) -> &[ModelIssue] {
        &self.issues
    }

    /// Mark an element hidden. Unknown elements are ignored.
    pub fn hide(&mut self, element: &ModelElement<'_>) {
        match element {
            ModelElement::EntitySet(name) => {
                self.hidden.entity_sets.insert((*name).to_owned());
            }
            ModelElement::EntityType(name) => {
                self.hidden.entity_types.insert((*name).to_owned());
            }
            ModelElement::Property { owner, name } => {
                self.hidden
                    .properties
                    .insert(((*owner).to_owned(), (*name).to_owned()));
            }
            ModelElement::Operation(name) => {
                self.hidden.operations.insert((*name).to_owned());
            }
        }
    }

    /// Run `filter` over every element and hide the ones it rejects.
    pub fn apply_visibility(&mut self, filter: &dyn ModelVisibilityFilter) {
        let mut hidden_sets = Vec::new();
        let mut hidden_types = Vec::new();
        let mut hidden_props = Vec::new();
        let mut hidden_ops = Vec::new();

        for name in self.entity_sets.keys() {
            if !filter.is_visible(&ModelElement::EntitySet(name)) {
                hidden_sets.push(name.clone());
            }
        }
        let owners = self
            .entity_types
            .values()
            .map(|t| (&t.name, &t.properties))
            .chain(self.complex_types.values().map(|t| (&t.name, &t.properties)));
        for (owner, properties) in owners {
            if self.entity_types.contains_key(owner)
                && !filter.is_visible(&ModelElement::EntityType(owner))
            {
                hidden_types.push(owner.clone());
            }
            for p in properties {
                if !filter.is_visible(&ModelElement::Property {
                    owner,
                    name: &p.name,
                }) {
                    hidden_props.push((owner.clone(), p.name.clone()));
                }
            }
        }
        for name in self.operations.keys() {
            if !filter.is_visible(&ModelElement::Operation(name)) {
                hidden_ops.push(name.clone());
            }
        }

        tracing::debug!(
            entity_sets = hidden_sets.len(),
            entity_types = hidden_types.len(),
            properties = hidden_props.len(),
            operations = hidden_ops.len(),
            "Model visibility applied"
        );
        self.hidden.entity_sets.extend(hidden_sets);
        self.hidden.entity_types.extend(hidden_types);
        self.hidden.properties.extend(hidden_props);
        self.hidden.operations.extend(hidden_ops);
    }

    // --- lookup --------------------------------------------------------------------------

    /// Entity set regardless of visibility.
    #[must_use]
    pub fn entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.entity_sets.get(name)
    }

    /// Entity set if it exists, is visible and its element type is visible.
    #[must_use]
    pub fn visible_entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.entity_sets.get(name).filter(|set| {
            !self.hidden.entity_sets.contains(&set.name)
                && !self.hidden.entity_types.contains(&set.entity_type)
        })
    }

    pub fn entity_sets(&self) -> impl Iterator<Item = &EntitySet> {
        self.entity_sets.values()
    }

    pub fn visible_entity_sets(&self) -> impl Iterator<Item = &EntitySet> {
        self.entity_sets
            .values()
            .filter(|s| self.visible_entity_set(&s.name).is_some())
    }

    #[must_use]
    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.get(name)
    }

    #[must_use]
    pub fn complex_type(&self, name: &str) -> Option<&ComplexType> {
        self.complex_types.get(name)
    }

    /// Element type of an entity set.
    #[must_use]
    pub fn element_type_of(&self, entity_set: &str) -> Option<&EntityType> {
        self.entity_sets
            .get(entity_set)
            .and_then(|s| self.entity_types.get(&s.entity_type))
    }

    /// Declared properties of an entity or complex type.
    #[must_use]
    pub fn properties_of(&self, type_name: &str) -> Option<&[PropertyDef]> {
        self.entity_types
            .get(type_name)
            .map(|t| t.properties.as_slice())
            .or_else(|| {
                self.complex_types
                    .get(type_name)
                    .map(|t| t.properties.as_slice())
            })
    }

    #[must_use]
    pub fn is_property_visible(&self, owner: &str, property: &str) -> bool {
        !self
            .hidden
            .properties
            .contains(&(owner.to_owned(), property.to_owned()))
    }

    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.get(name)
    }

    #[must_use]
    pub fn visible_operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations
            .get(name)
            .filter(|op| !self.hidden.operations.contains(&op.name))
    }

    pub fn visible_operations(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.operations
            .values()
            .filter(|op| !self.hidden.operations.contains(&op.name))
    }

    // --- validation ----------------------------------------------------------------------

    /// Structural validation. Collects every problem instead of stopping at the first.
    ///
    /// # Errors
    /// Returns `ModelError::Invalid` with recorded and structural issues.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut issues = self.issues.clone();

        for set in self.entity_sets.values() {
            if !self.entity_types.contains_key(&set.entity_type) {
                issues.push(ModelIssue::new(
                    format!("EntitySet:{}", set.name),
                    format!("unknown entity type '{}'", set.entity_type),
                ));
            }
        }

        for ty in self.entity_types.values() {
            let element = format!("EntityType:{}", ty.name);
            if ty.key.is_empty() {
                issues.push(ModelIssue::new(element.clone(), "no key properties"));
            }
            for key in &ty.key {
                match ty.find(key) {
                    Some(p) if matches!(p.kind, PropertyKind::Primitive(_)) => {}
                    Some(_) => issues.push(ModelIssue::new(
                        element.clone(),
                        format!("key property '{key}' must be primitive"),
                    )),
                    None => issues.push(ModelIssue::new(
                        element.clone(),
                        format!("key property '{key}' is not declared"),
                    )),
                }
            }
            self.check_properties(&element, &ty.properties, &mut issues);
        }

        for ty in self.complex_types.values() {
            let element = format!("ComplexType:{}", ty.name);
            self.check_properties(&element, &ty.properties, &mut issues);
        }

        for op in self.operations.values() {
            if let Some(bound) = &op.bound_to
                && !self.entity_sets.contains_key(bound)
            {
                issues.push(ModelIssue::new(
                    format!("Operation:{}", op.name),
                    format!("bound to unknown entity set '{bound}'"),
                ));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ModelError::Invalid(issues))
        }
    }

    fn check_properties(&self, element: &str, props: &[PropertyDef], issues: &mut Vec<ModelIssue>) {
        let mut seen = BTreeSet::new();
        for p in props {
            if !seen.insert(p.name.as_str()) {
                issues.push(ModelIssue::new(
                    element,
                    format!("duplicate property '{}'", p.name),
                ));
            }
            if let PropertyKind::Complex(type_name) = &p.kind
                && !self.complex_types.contains_key(type_name)
            {
                issues.push(ModelIssue::new(
                    element,
                    format!(
                        "property '{}' references unknown complex type '{type_name}'",
                        p.name
                    ),
                ));
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn sample() -> ApiModel {
        let mut m = ApiModel::new("Northwind");
        m.add_complex_type(
            ComplexType::new("Address")
                .property(PropertyDef::primitive("Street", FieldKind::String))
                .property(PropertyDef::primitive("Zip", FieldKind::String)),
        );
        m.add_entity_type(
            EntityType::new("Customer")
                .key(["CustomerID"])
                .property(PropertyDef::primitive("CustomerID", FieldKind::String).not_null())
                .property(PropertyDef::primitive("CompanyName", FieldKind::String))
                .property(PropertyDef::primitive("Phone", FieldKind::String))
                .property(PropertyDef::complex("Addr", "Address")),
        );
        m.add_entity_set(EntitySet::new("Customers", "Customer"));
        m
    }

    #[test]
    fn valid_model_passes() {
        let m = sample();
        assert!(m.validate().is_ok());
        assert_eq!(m.element_type_of("Customers").unwrap().name, "Customer");
        assert_eq!(m.properties_of("Address").unwrap().len(), 2);
    }

    #[test]
    fn every_structural_issue_is_collected() {
        let mut m = sample();
        m.add_entity_set(EntitySet::new("Customers", "Customer"));
        m.add_entity_set(EntitySet::new("Ghosts", "Ghost"));
        m.add_entity_type(
            EntityType::new("Keyless").property(PropertyDef::complex("Where", "Nowhere")),
        );

        let err = m.validate().unwrap_err();
        let messages: Vec<String> = err.issues().iter().map(ToString::to_string).collect();
        assert_eq!(messages.len(), 4, "{messages:?}");
        assert!(messages.contains(&"EntitySet:Customers: duplicate entity set name".to_owned()));
        assert!(messages.contains(&"EntitySet:Ghosts: unknown entity type 'Ghost'".to_owned()));
        assert!(messages.contains(&"EntityType:Keyless: no key properties".to_owned()));
        assert!(
            messages
                .iter()
                .any(|m| m.contains("unknown complex type 'Nowhere'"))
        );
    }

    #[test]
    fn hidden_elements_are_not_visible() {
        let mut m = sample();
        m.hide(&ModelElement::Property {
            owner: "Customer",
            name: "Phone",
        });
        assert!(m.visible_entity_set("Customers").is_some());
        assert!(!m.is_property_visible("Customer", "Phone"));

        m.hide(&ModelElement::EntityType("Customer"));
        assert!(m.visible_entity_set("Customers").is_none());
        assert!(m.entity_set("Customers").is_some());
        assert_eq!(m.visible_entity_sets().count(), 0);
    }
}
