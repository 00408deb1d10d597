//! Explicitly registered convention hooks.
//!
//! Handlers are keyed by entity-set name and reported under their conventional method
//! names (`OnInsertingCustomers`, `OnFilterOrders`, `CanReadOrders`, ...) in logs and
//! errors. [`Conventions::install`] turns the tables into hook chain links for the model,
//! query and submission contracts.

mod layers;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::InvocationContext;
use crate::hooks::HookRegistryBuilder;
use crate::model::OperationDescriptor;
use crate::operation::OperationHandler;
use crate::query::QueryExpr;
use crate::record::EntityRecord;
use crate::submit::{ChangeAction, DataModificationItem, ValidationResult};

/// Points at which entity hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPoint {
    Inserting,
    Updating,
    Deleting,
    Inserted,
    Updated,
    Deleted,
}

impl HookPoint {
    /// Pre-submit point for an action.
    #[must_use]
    pub fn before(action: ChangeAction) -> Self {
        match action {
            ChangeAction::Insert => HookPoint::Inserting,
            ChangeAction::Update => HookPoint::Updating,
            ChangeAction::Delete => HookPoint::Deleting,
        }
    }

    /// Post-submit point for an action.
    #[must_use]
    pub fn after(action: ChangeAction) -> Self {
        match action {
            ChangeAction::Insert => HookPoint::Inserted,
            ChangeAction::Update => HookPoint::Updated,
            ChangeAction::Delete => HookPoint::Deleted,
        }
    }

    /// Conventional method name: `OnInsertingCustomers`.
    #[must_use]
    pub fn method_name(self, entity_set: &str) -> String {
        format!("On{self:?}{entity_set}")
    }
}

/// Pre-submit hook; may change the entity before it is committed.
#[async_trait]
pub trait EntityHook: Send + Sync {
    async fn call(&self, ctx: &InvocationContext, entity: &mut EntityRecord) -> anyhow::Result<()>;
}

/// Post-submit hook; sees the committed entity.
#[async_trait]
pub trait EntityObserver: Send + Sync {
    async fn call(&self, ctx: &InvocationContext, entity: &EntityRecord) -> anyhow::Result<()>;
}

/// `OnFilter{EntitySet}`: narrows every query over the set.
pub trait EntitySetFilter: Send + Sync {
    /// # Errors
    /// Errors abort the query as hook failures.
    fn filter(&self, ctx: &InvocationContext, query: QueryExpr) -> anyhow::Result<QueryExpr>;
}

/// Per-entity-set validation rule.
pub trait EntityValidator: Send + Sync {
    fn validate(
        &self,
        ctx: &InvocationContext,
        item: &DataModificationItem,
        results: &mut Vec<ValidationResult>,
    );
}

/// Synchronous closure as an [`EntityHook`].
pub struct FnHook<F>(F);

/// Wrap a closure as an [`EntityHook`].
pub fn hook_fn<F>(f: F) -> FnHook<F>
where
    F: Fn(&InvocationContext, &mut EntityRecord) -> anyhow::Result<()> + Send + Sync,
{
    FnHook(f)
}

#[async_trait]
impl<F> EntityHook for FnHook<F>
where
    F: Fn(&InvocationContext, &mut EntityRecord) -> anyhow::Result<()> + Send + Sync,
{
    async fn call(&self, ctx: &InvocationContext, entity: &mut EntityRecord) -> anyhow::Result<()> {
        (self.0)(ctx, entity)
    }
}

pub struct FnObserver<F>(F);

pub fn observer_fn<F>(f: F) -> FnObserver<F>
where
    F: Fn(&InvocationContext, &EntityRecord) -> anyhow::Result<()> + Send + Sync,
{
    FnObserver(f)
}

#[async_trait]
impl<F> EntityObserver for FnObserver<F>
where
    F: Fn(&InvocationContext, &EntityRecord) -> anyhow::Result<()> + Send + Sync,
{
    async fn call(&self, ctx: &InvocationContext, entity: &EntityRecord) -> anyhow::Result<()> {
        (self.0)(ctx, entity)
    }
}

pub struct FnFilter<F>(F);

pub fn filter_fn<F>(f: F) -> FnFilter<F>
where
    F: Fn(&InvocationContext, QueryExpr) -> anyhow::Result<QueryExpr> + Send + Sync,
{
    FnFilter(f)
}

impl<F> EntitySetFilter for FnFilter<F>
where
    F: Fn(&InvocationContext, QueryExpr) -> anyhow::Result<QueryExpr> + Send + Sync,
{
    fn filter(&self, ctx: &InvocationContext, query: QueryExpr) -> anyhow::Result<QueryExpr> {
        (self.0)(ctx, query)
    }
}

pub struct FnValidator<F>(F);

pub fn validator_fn<F>(f: F) -> FnValidator<F>
where
    F: Fn(&InvocationContext, &DataModificationItem, &mut Vec<ValidationResult>) + Send + Sync,
{
    FnValidator(f)
}

impl<F> EntityValidator for FnValidator<F>
where
    F: Fn(&InvocationContext, &DataModificationItem, &mut Vec<ValidationResult>) + Send + Sync,
{
    fn validate(
        &self,
        ctx: &InvocationContext,
        item: &DataModificationItem,
        results: &mut Vec<ValidationResult>,
    ) {
        (self.0)(ctx, item, results);
    }
}

/// Authorization predicate (`CanRead...`, `CanInsert...`, `CanExecute...`).
pub type Predicate = Arc<dyn Fn(&InvocationContext) -> bool + Send + Sync>;

/// Entity set defined as a query over other sets.
#[derive(Debug, Clone)]
pub struct ComposedSet {
    pub entity_type: String,
    pub definition: QueryExpr,
}

pub(crate) struct RegisteredOperation {
    pub(crate) descriptor: OperationDescriptor,
    pub(crate) handler: Arc<dyn OperationHandler>,
}

#[derive(Default)]
struct Hidden {
    entity_sets: BTreeSet<String>,
    entity_types: BTreeSet<String>,
    properties: BTreeSet<(String, String)>,
    operations: BTreeSet<String>,
}

/// Frozen convention tables of one API.
pub struct Conventions {
    entity_hooks: HashMap<(HookPoint, String), Vec<Arc<dyn EntityHook>>>,
    observers: HashMap<(HookPoint, String), Vec<Arc<dyn EntityObserver>>>,
    filters: HashMap<String, Vec<Arc<dyn EntitySetFilter>>>,
    can_read: HashMap<String, Predicate>,
    can_write: HashMap<(ChangeAction, String), Predicate>,
    can_execute: HashMap<String, Predicate>,
    validators: HashMap<String, Vec<Arc<dyn EntityValidator>>>,
    composed: BTreeMap<String, ComposedSet>,
    hidden: Hidden,
    operations: BTreeMap<String, RegisteredOperation>,
    duplicate_operations: Vec<String>,
}

impl Conventions {
    #[must_use]
    pub fn builder() -> ConventionsBuilder {
        ConventionsBuilder::default()
    }

    /// Register the convention layers on top of whatever is already in `hooks`.
    pub fn install(self: &Arc<Self>, hooks: &mut HookRegistryBuilder) {
        layers::install(self, hooks);
    }

    #[must_use]
    pub fn composed_set(&self, name: &str) -> Option<&ComposedSet> {
        self.composed.get(name)
    }

    /// Entity-set names referenced by any hook, rule or validator, with the
    /// conventional name of the first registration that references it.
    fn referenced_sets(&self) -> BTreeMap<&str, String> {
        let mut out: BTreeMap<&str, String> = BTreeMap::new();
        for (point, set) in self.entity_hooks.keys().chain(self.observers.keys()) {
            out.entry(set.as_str())
                .or_insert_with(|| point.method_name(set));
        }
        for set in self.filters.keys() {
            out.entry(set.as_str())
                .or_insert_with(|| format!("OnFilter{set}"));
        }
        for set in self.can_read.keys() {
            out.entry(set.as_str())
                .or_insert_with(|| format!("CanRead{set}"));
        }
        for (action, set) in self.can_write.keys() {
            out.entry(set.as_str())
                .or_insert_with(|| format!("Can{}{set}", capitalized(*action)));
        }
        for set in self.validators.keys() {
            out.entry(set.as_str())
                .or_insert_with(|| format!("Validate{set}"));
        }
        out
    }
}

impl fmt::Debug for Conventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conventions")
            .field("entity_hooks", &self.entity_hooks.len())
            .field("observers", &self.observers.len())
            .field("filters", &self.filters.len())
            .field("composed", &self.composed.keys().collect::<Vec<_>>())
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn capitalized(action: ChangeAction) -> &'static str {
    match action {
        ChangeAction::Insert => "Insert",
        ChangeAction::Update => "Update",
        ChangeAction::Delete => "Delete",
    }
}

/// Registration phase of [`Conventions`].
#[derive(Default)]
pub struct ConventionsBuilder {
    inner: ConventionsParts,
}

#[derive(Default)]
struct ConventionsParts {
    entity_hooks: HashMap<(HookPoint, String), Vec<Arc<dyn EntityHook>>>,
    observers: HashMap<(HookPoint, String), Vec<Arc<dyn EntityObserver>>>,
    filters: HashMap<String, Vec<Arc<dyn EntitySetFilter>>>,
    can_read: HashMap<String, Predicate>,
    can_write: HashMap<(ChangeAction, String), Predicate>,
    can_execute: HashMap<String, Predicate>,
    validators: HashMap<String, Vec<Arc<dyn EntityValidator>>>,
    composed: BTreeMap<String, ComposedSet>,
    hidden: Hidden,
    operations: BTreeMap<String, RegisteredOperation>,
    duplicate_operations: Vec<String>,
}

impl ConventionsBuilder {
    fn entity_hook(
        mut self,
        point: HookPoint,
        entity_set: impl Into<String>,
        hook: Arc<dyn EntityHook>,
    ) -> Self {
        self.inner
            .entity_hooks
            .entry((point, entity_set.into()))
            .or_default()
            .push(hook);
        self
    }

    fn observer(
        mut self,
        point: HookPoint,
        entity_set: impl Into<String>,
        hook: Arc<dyn EntityObserver>,
    ) -> Self {
        self.inner
            .observers
            .entry((point, entity_set.into()))
            .or_default()
            .push(hook);
        self
    }

    #[must_use]
    pub fn on_inserting(
        self,
        entity_set: impl Into<String>,
        hook: impl EntityHook + 'static,
    ) -> Self {
        self.entity_hook(HookPoint::Inserting, entity_set, Arc::new(hook))
    }

    #[must_use]
    pub fn on_updating(
        self,
        entity_set: impl Into<String>,
        hook: impl EntityHook + 'static,
    ) -> Self {
        self.entity_hook(HookPoint::Updating, entity_set, Arc::new(hook))
    }

    #[must_use]
    pub fn on_deleting(
        self,
        entity_set: impl Into<String>,
        hook: impl EntityHook + 'static,
    ) -> Self {
        self.entity_hook(HookPoint::Deleting, entity_set, Arc::new(hook))
    }

    #[must_use]
    pub fn on_inserted(
        self,
        entity_set: impl Into<String>,
        hook: impl EntityObserver + 'static,
    ) -> Self {
        self.observer(HookPoint::Inserted, entity_set, Arc::new(hook))
    }

    #[must_use]
    pub fn on_updated(
        self,
        entity_set: impl Into<String>,
        hook: impl EntityObserver + 'static,
    ) -> Self {
        self.observer(HookPoint::Updated, entity_set, Arc::new(hook))
    }

    #[must_use]
    pub fn on_deleted(
        self,
        entity_set: impl Into<String>,
        hook: impl EntityObserver + 'static,
    ) -> Self {
        self.observer(HookPoint::Deleted, entity_set, Arc::new(hook))
    }

    /// `OnFilter{EntitySet}`. Several filters on one set apply in registration order.
    #[must_use]
    pub fn on_filter(
        mut self,
        entity_set: impl Into<String>,
        filter: impl EntitySetFilter + 'static,
    ) -> Self {
        self.inner
            .filters
            .entry(entity_set.into())
            .or_default()
            .push(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn can_read<F>(mut self, entity_set: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&InvocationContext) -> bool + Send + Sync + 'static,
    {
        self.inner
            .can_read
            .insert(entity_set.into(), Arc::new(predicate));
        self
    }

    fn can_write<F>(
        mut self,
        action: ChangeAction,
        entity_set: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&InvocationContext) -> bool + Send + Sync + 'static,
    {
        self.inner
            .can_write
            .insert((action, entity_set.into()), Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn can_insert<F>(self, entity_set: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&InvocationContext) -> bool + Send + Sync + 'static,
    {
        self.can_write(ChangeAction::Insert, entity_set, predicate)
    }

    #[must_use]
    pub fn can_update<F>(self, entity_set: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&InvocationContext) -> bool + Send + Sync + 'static,
    {
        self.can_write(ChangeAction::Update, entity_set, predicate)
    }

    #[must_use]
    pub fn can_delete<F>(self, entity_set: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&InvocationContext) -> bool + Send + Sync + 'static,
    {
        self.can_write(ChangeAction::Delete, entity_set, predicate)
    }

    #[must_use]
    pub fn validator(
        mut self,
        entity_set: impl Into<String>,
        validator: impl EntityValidator + 'static,
    ) -> Self {
        self.inner
            .validators
            .entry(entity_set.into())
            .or_default()
            .push(Arc::new(validator));
        self
    }

    /// Declare `name` as a view: queries over it are rewritten to `definition`.
    #[must_use]
    pub fn composed_set(
        mut self,
        name: impl Into<String>,
        entity_type: impl Into<String>,
        definition: QueryExpr,
    ) -> Self {
        self.inner.composed.insert(
            name.into(),
            ComposedSet {
                entity_type: entity_type.into(),
                definition,
            },
        );
        self
    }

    #[must_use]
    pub fn hide_entity_set(mut self, name: impl Into<String>) -> Self {
        self.inner.hidden.entity_sets.insert(name.into());
        self
    }

    #[must_use]
    pub fn hide_entity_type(mut self, name: impl Into<String>) -> Self {
        self.inner.hidden.entity_types.insert(name.into());
        self
    }

    #[must_use]
    pub fn hide_property(mut self, owner: impl Into<String>, name: impl Into<String>) -> Self {
        self.inner
            .hidden
            .properties
            .insert((owner.into(), name.into()));
        self
    }

    #[must_use]
    pub fn hide_operation(mut self, name: impl Into<String>) -> Self {
        self.inner.hidden.operations.insert(name.into());
        self
    }

    /// Register an operation. A second registration under the same name is reported
    /// as a model issue at build time.
    #[must_use]
    pub fn operation(
        mut self,
        descriptor: OperationDescriptor,
        handler: impl OperationHandler + 'static,
    ) -> Self {
        let name = descriptor.name.clone();
        if self.inner.operations.contains_key(&name) {
            self.inner.duplicate_operations.push(name);
            return self;
        }
        self.inner.operations.insert(
            name,
            RegisteredOperation {
                descriptor,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// `CanExecute{Operation}`.
    #[must_use]
    pub fn can_execute<F>(mut self, operation: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&InvocationContext) -> bool + Send + Sync + 'static,
    {
        self.inner
            .can_execute
            .insert(operation.into(), Arc::new(predicate));
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<Conventions> {
        let p = self.inner;
        tracing::debug!(
            entity_hooks = p.entity_hooks.len(),
            observers = p.observers.len(),
            filters = p.filters.len(),
            composed = p.composed.len(),
            operations = p.operations.len(),
            "Conventions built"
        );
        Arc::new(Conventions {
            entity_hooks: p.entity_hooks,
            observers: p.observers,
            filters: p.filters,
            can_read: p.can_read,
            can_write: p.can_write,
            can_execute: p.can_execute,
            validators: p.validators,
            composed: p.composed,
            hidden: p.hidden,
            operations: p.operations,
            duplicate_operations: p.duplicate_operations,
        })
    }
}
