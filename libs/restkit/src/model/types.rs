use std::fmt;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    I64,
    F64,
    Bool,
    Uuid,
    DateTimeUtc,
    Date,
    Time,
    Decimal,
}

impl FieldKind {
    /// Whether a non-null JSON value is an acceptable representation of this kind.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::I64 => value.as_i64().is_some(),
            FieldKind::F64 => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Decimal => {
                value.is_number()
                    || value
                        .as_str()
                        .is_some_and(|s| s.parse::<BigDecimal>().is_ok())
            }
            FieldKind::Uuid => value.as_str().is_some_and(|s| Uuid::parse_str(s).is_ok()),
            FieldKind::DateTimeUtc => value
                .as_str()
                .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
            FieldKind::Date => value
                .as_str()
                .is_some_and(|s| s.parse::<NaiveDate>().is_ok()),
            FieldKind::Time => value
                .as_str()
                .is_some_and(|s| s.parse::<NaiveTime>().is_ok()),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::String => write!(f, "String"),
            FieldKind::I64 => write!(f, "I64"),
            FieldKind::F64 => write!(f, "F64"),
            FieldKind::Bool => write!(f, "Bool"),
            FieldKind::Uuid => write!(f, "Uuid"),
            FieldKind::DateTimeUtc => write!(f, "DateTimeUtc"),
            FieldKind::Date => write!(f, "Date"),
            FieldKind::Time => write!(f, "Time"),
            FieldKind::Decimal => write!(f, "Decimal"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    Primitive(FieldKind),
    /// Owned value of the named complex type.
    Complex(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: String,
    pub kind: PropertyKind,
    pub nullable: bool,
    pub max_length: Option<usize>,
    /// Must be supplied on insert.
    pub required: bool,
}

impl PropertyDef {
    #[must_use]
    pub fn primitive(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Primitive(kind),
            nullable: true,
            max_length: None,
            required: false,
        }
    }

    #[must_use]
    pub fn complex(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Complex(type_name.into()),
            nullable: true,
            max_length: None,
            required: false,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityType {
    pub name: String,
    pub key: Vec<String>,
    pub properties: Vec<PropertyDef>,
}

impl EntityType {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: Vec::new(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn key<I, S>(mut self, key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key = key.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn is_key(&self, name: &str) -> bool {
        self.key.iter().any(|k| k == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComplexType {
    pub name: String,
    pub properties: Vec<PropertyDef>,
}

impl ComplexType {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntitySet {
    pub name: String,
    pub entity_type: String,
    /// Declared through conventions as a view over other sets rather than backed by the
    /// provider directly.
    pub composed: bool,
}

impl EntitySet {
    #[must_use]
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            composed: false,
        }
    }

    #[must_use]
    pub fn composed(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            composed: true,
            ..Self::new(name, entity_type)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// Side-effect free, may be composed into queries.
    Function,
    Action,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterDef {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub name: String,
    pub kind: OperationKind,
    /// Entity set the operation is bound to; `None` for unbound operations.
    pub bound_to: Option<String>,
    pub parameters: Vec<ParameterDef>,
}

impl OperationDescriptor {
    #[must_use]
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: OperationKind::Function,
            bound_to: None,
            parameters: Vec::new(),
        }
    }

    #[must_use]
    pub fn action(name: impl Into<String>) -> Self {
        Self {
            kind: OperationKind::Action,
            ..Self::function(name)
        }
    }

    #[must_use]
    pub fn bound_to(mut self, entity_set: impl Into<String>) -> Self {
        self.bound_to = Some(entity_set.into());
        self
    }

    #[must_use]
    pub fn parameter(mut self, name: impl Into<String>, kind: FieldKind, nullable: bool) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind,
            nullable,
        });
        self
    }
}
