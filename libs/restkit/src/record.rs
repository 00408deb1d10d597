use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key property values of one entity, ordered by property name.
pub type KeyValues = BTreeMap<String, Value>;

/// Render a key as `(A=1,B='x')` for logs and error messages.
#[must_use]
pub fn format_key(key: &KeyValues) -> String {
    let parts: Vec<String> = key
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}='{s}'"),
            other => format!("{k}={other}"),
        })
        .collect();
    format!("({})", parts.join(","))
}

/// Property values of one entity instance.
///
/// Complex property values are nested objects; paths into them use `/` (`Addr/Zip`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRecord(Map<String, Value>);

impl EntityRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` unless `value` is a JSON object.
    #[must_use]
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.0.get_mut(name)
    }

    /// Follow a `/`-separated path through nested complex values.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('/');
        let first = segments.next()?;
        segments.try_fold(self.0.get(first)?, |current, segment| {
            current.as_object()?.get(segment)
        })
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Project the key properties; `None` if any of them is missing.
    #[must_use]
    pub fn key_values(&self, key_names: &[String]) -> Option<KeyValues> {
        key_names
            .iter()
            .map(|k| self.0.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// True when every pair in `key` is present with an equal value.
    #[must_use]
    pub fn matches_key(&self, key: &KeyValues) -> bool {
        key.iter().all(|(k, v)| self.0.get(k) == Some(v))
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    #[must_use]
    pub fn into_json(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for EntityRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for EntityRecord {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}
