use std::fmt;

use crate::error::AccessAction;
use crate::record::{EntityRecord, KeyValues, format_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

impl ChangeAction {
    #[must_use]
    pub fn access_action(self) -> AccessAction {
        match self {
            ChangeAction::Insert => AccessAction::Insert,
            ChangeAction::Update => AccessAction::Update,
            ChangeAction::Delete => AccessAction::Delete,
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeAction::Insert => write!(f, "insert"),
            ChangeAction::Update => write!(f, "update"),
            ChangeAction::Delete => write!(f, "delete"),
        }
    }
}

/// One pending mutation of a change-set.
#[derive(Debug, Clone, PartialEq)]
pub struct DataModificationItem {
    pub entity_set: String,
    /// Element type of `entity_set`, filled in during authorization.
    pub entity_type: Option<String>,
    pub action: ChangeAction,
    /// Key of the target entity (update and delete).
    pub key: KeyValues,
    /// Changed values. Nested objects address complex properties.
    pub values: EntityRecord,
    /// Values the client last saw; checked against the stored entity before updating.
    pub original_values: Option<EntityRecord>,
    /// Replace the whole entity (properties not in `values` are reset) instead of merging.
    pub replace: bool,
    /// Entity the provider will track, attached during pre-submit.
    pub resource: Option<EntityRecord>,
}

impl DataModificationItem {
    fn new(entity_set: impl Into<String>, action: ChangeAction) -> Self {
        Self {
            entity_set: entity_set.into(),
            entity_type: None,
            action,
            key: KeyValues::new(),
            values: EntityRecord::new(),
            original_values: None,
            replace: false,
            resource: None,
        }
    }

    #[must_use]
    pub fn insert(entity_set: impl Into<String>, values: EntityRecord) -> Self {
        Self {
            values,
            ..Self::new(entity_set, ChangeAction::Insert)
        }
    }

    #[must_use]
    pub fn update(entity_set: impl Into<String>, key: KeyValues, values: EntityRecord) -> Self {
        Self {
            key,
            values,
            ..Self::new(entity_set, ChangeAction::Update)
        }
    }

    #[must_use]
    pub fn delete(entity_set: impl Into<String>, key: KeyValues) -> Self {
        Self {
            key,
            ..Self::new(entity_set, ChangeAction::Delete)
        }
    }

    #[must_use]
    pub fn with_original_values(mut self, original: EntityRecord) -> Self {
        self.original_values = Some(original);
        self
    }

    #[must_use]
    pub fn full_replace(mut self) -> Self {
        self.replace = true;
        self
    }

    /// Short description for logs: `insert Customers(CustomerID='NEW01')`.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.key.is_empty() {
            format!("{} {}", self.action, self.entity_set)
        } else {
            format!("{} {}{}", self.action, self.entity_set, format_key(&self.key))
        }
    }
}

/// Ordered batch of mutations submitted together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    items: Vec<DataModificationItem>,
}

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, item: DataModificationItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn push(&mut self, item: DataModificationItem) {
        self.items.push(item);
    }

    #[must_use]
    pub fn items(&self) -> &[DataModificationItem] {
        &self.items
    }

    #[must_use]
    pub fn into_items(self) -> Vec<DataModificationItem> {
        self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<DataModificationItem> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = DataModificationItem>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// Stages of one submission, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStage {
    Authorization,
    Validation,
    PreSubmit,
    Submit,
    PostSubmit,
    Completed,
}

impl SubmitStage {
    /// Following stage; `None` once completed.
    #[must_use]
    pub fn next(self) -> Option<SubmitStage> {
        match self {
            SubmitStage::Authorization => Some(SubmitStage::Validation),
            SubmitStage::Validation => Some(SubmitStage::PreSubmit),
            SubmitStage::PreSubmit => Some(SubmitStage::Submit),
            SubmitStage::Submit => Some(SubmitStage::PostSubmit),
            SubmitStage::PostSubmit => Some(SubmitStage::Completed),
            SubmitStage::Completed => None,
        }
    }

    /// True for stages that run after the durable write.
    #[must_use]
    pub fn is_committed(self) -> bool {
        matches!(self, SubmitStage::PostSubmit | SubmitStage::Completed)
    }
}

impl fmt::Display for SubmitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A post-submit hook that failed after the change-set was committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostSubmitFailure {
    /// Position of the item in the change-set.
    pub index: usize,
    pub entity_set: String,
    pub action: ChangeAction,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitResult {
    /// Items with their resolved resources, in submission order.
    pub items: Vec<DataModificationItem>,
    /// Entities affected by the commit, as reported by the provider.
    pub affected: u64,
    /// Post-submit hook failures. The commit is not undone.
    pub post_submit_failures: Vec<PostSubmitFailure>,
}

impl SubmitResult {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.post_submit_failures.is_empty()
    }
}
