//! Ordered hook chains keyed by service contract.
//!
//! Design goals:
//! - Handlers register against an *interface type* (`dyn SomeContract`) without knowing
//!   about each other.
//! - Each registration receives the previously built, more inner handler as `next` and may
//!   delegate to it or short-circuit.
//! - A chain may carry a default terminal implementation that always sits innermost.
//!
//! Composition order:
//! - `resolve = fold(factories, terminal, |next, factory| factory(scope, next))`
//! - The first registration wraps the default, the last registration is outermost.
//!
//! Implementation details:
//! - Key = `TypeId` of the contract, with `type_name` kept for error messages.
//! - Value = `HookChain<T>` stored as `Box<dyn Any + Send + Sync>` (downcast on read).
//! - Registration happens on [`HookRegistryBuilder`] only. `build()` freezes the chains into an
//!   immutable [`HookRegistry`]; resolution goes through a per-request [`ServiceScope`].

mod scope;

pub use scope::ServiceScope;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigurationError;

/// Stable key for a service contract.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct ContractKey {
    id: TypeId,
    name: &'static str,
}

impl ContractKey {
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Builds one link of a chain around the more inner handler (if any).
pub type HookFactory<T> =
    Arc<dyn Fn(&ServiceScope, Option<Arc<T>>) -> Result<Arc<T>, ConfigurationError> + Send + Sync>;

/// Builds the innermost (terminal) handler of a chain.
pub type DefaultFactory<T> =
    Arc<dyn Fn(&ServiceScope) -> Result<Arc<T>, ConfigurationError> + Send + Sync>;

struct HookChain<T: ?Sized> {
    default: Option<DefaultFactory<T>>,
    factories: Vec<HookFactory<T>>,
}

impl<T: ?Sized> Default for HookChain<T> {
    fn default() -> Self {
        Self {
            default: None,
            factories: Vec::new(),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> HookChain<T> {
    fn is_empty(&self) -> bool {
        self.default.is_none() && self.factories.is_empty()
    }

    fn compose(&self, scope: &ServiceScope) -> Result<Option<Arc<T>>, ConfigurationError> {
        let terminal = match &self.default {
            Some(default) => Some(default(scope)?),
            None => None,
        };
        self.factories
            .iter()
            .try_fold(terminal, |next, factory| factory(scope, next).map(Some))
    }
}

type Boxed = Box<dyn Any + Send + Sync>;

/// Mutable registration phase. Consumed by [`HookRegistryBuilder::build`].
#[derive(Default)]
pub struct HookRegistryBuilder {
    chains: HashMap<ContractKey, Boxed>,
}

impl HookRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    fn chain_mut<T>(&mut self) -> &mut HookChain<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let slot = self
            .chains
            .entry(ContractKey::of::<T>())
            .or_insert_with(|| Box::new(HookChain::<T>::default()));
        slot.downcast_mut::<HookChain<T>>()
            .expect("hook chain slot is keyed by the contract TypeId")
    }

    /// Append a link to the chain for contract `T`.
    ///
    /// The factory receives the chain built so far (`None` when nothing is registered
    /// beneath it and no default exists) and must tolerate that.
    pub fn register<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceScope, Option<Arc<T>>) -> Result<Arc<T>, ConfigurationError>
            + Send
            + Sync
            + 'static,
    {
        self.chain_mut::<T>().factories.push(Arc::new(factory));
        self
    }

    /// Set the innermost implementation for contract `T`, replacing any previous default.
    pub fn register_default<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceScope) -> Result<Arc<T>, ConfigurationError> + Send + Sync + 'static,
    {
        self.chain_mut::<T>().default = Some(Arc::new(factory));
        self
    }

    /// Shorthand for a default that hands out one shared instance.
    pub fn register_default_instance<T>(&mut self, instance: Arc<T>) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register_default::<T, _>(move |_| Ok(instance.clone()))
    }

    #[must_use]
    pub fn is_registered<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.chains
            .get(&ContractKey::of::<T>())
            .and_then(|b| b.downcast_ref::<HookChain<T>>())
            .is_some_and(|c| !c.is_empty())
    }

    /// Freeze the registrations.
    #[must_use]
    pub fn build(self) -> Arc<HookRegistry> {
        tracing::debug!(contracts = self.chains.len(), "Hook registry built");
        Arc::new(HookRegistry {
            chains: self.chains,
        })
    }
}

/// Immutable, process-wide hook configuration.
pub struct HookRegistry {
    chains: HashMap<ContractKey, Boxed>,
}

impl HookRegistry {
    #[must_use]
    pub fn builder() -> HookRegistryBuilder {
        HookRegistryBuilder::new()
    }

    fn chain<T>(&self) -> Option<&HookChain<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.chains
            .get(&ContractKey::of::<T>())
            .and_then(|b| b.downcast_ref::<HookChain<T>>())
    }

    #[must_use]
    pub fn is_registered<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.chain::<T>().is_some_and(|c| !c.is_empty())
    }

    /// Number of links registered on top of the default.
    #[must_use]
    pub fn chain_len<T>(&self) -> usize
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.chain::<T>().map_or(0, |c| c.factories.len())
    }

    /// Fail fast when a mandatory contract has neither a default nor a registration.
    ///
    /// # Errors
    /// Returns `ConfigurationError::NotRegistered` naming the contract.
    pub fn ensure_registered<T>(&self) -> Result<(), ConfigurationError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.is_registered::<T>() {
            Ok(())
        } else {
            Err(ConfigurationError::NotRegistered {
                contract: ContractKey::of::<T>().name(),
            })
        }
    }

    /// Open a request scope.
    #[must_use]
    pub fn new_scope(self: &Arc<Self>) -> ServiceScope {
        ServiceScope::new(self.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("contracts", &self.chains.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self, name: &str) -> String;
    }

    struct Plain;
    impl Greeter for Plain {
        fn greet(&self, name: &str) -> String {
            format!("hello {name}")
        }
    }

    struct Decorate {
        tag: &'static str,
        next: Option<Arc<dyn Greeter>>,
    }
    impl Greeter for Decorate {
        fn greet(&self, name: &str) -> String {
            match &self.next {
                Some(next) => format!("{}({})", self.tag, next.greet(name)),
                None => format!("{}(-)", self.tag),
            }
        }
    }

    struct Deny;
    impl Greeter for Deny {
        fn greet(&self, _name: &str) -> String {
            "denied".to_owned()
        }
    }

    fn decorate(tag: &'static str) -> HookFactory<dyn Greeter> {
        Arc::new(
            move |_: &ServiceScope, next: Option<Arc<dyn Greeter>>| {
                Ok::<_, ConfigurationError>(Arc::new(Decorate { tag, next }) as Arc<dyn Greeter>)
            },
        )
    }

    fn registry_with(tags: &[&'static str]) -> Arc<HookRegistry> {
        let mut b = HookRegistry::builder();
        b.register_default_instance::<dyn Greeter>(Arc::new(Plain));
        for tag in tags {
            let f = decorate(tag);
            b.register::<dyn Greeter, _>(move |s, n| f(s, n));
        }
        b.build()
    }

    #[test]
    fn last_registration_is_outermost() {
        let registry = registry_with(&["a", "b", "c"]);
        let greeter = registry.new_scope().resolve::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet("x"), "c(b(a(hello x)))");
        assert_eq!(registry.chain_len::<dyn Greeter>(), 3);
    }

    #[test]
    fn missing_default_passes_none_to_innermost() {
        let mut b = HookRegistry::builder();
        let f = decorate("only");
        b.register::<dyn Greeter, _>(move |s, n| f(s, n));
        let registry = b.build();

        let greeter = registry.new_scope().resolve::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet("x"), "only(-)");
    }

    #[test]
    fn link_can_short_circuit() {
        let mut b = HookRegistry::builder();
        b.register_default_instance::<dyn Greeter>(Arc::new(Plain));
        b.register::<dyn Greeter, _>(|_, _next| Ok(Arc::new(Deny) as Arc<dyn Greeter>));
        let registry = b.build();

        let greeter = registry.new_scope().resolve::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet("x"), "denied");
    }

    #[test]
    fn unregistered_contract_fails_with_configuration_error() {
        let registry = HookRegistry::builder().build();
        let err = registry.new_scope().resolve::<dyn Greeter>().err().unwrap();
        match err {
            ConfigurationError::NotRegistered { contract } => {
                assert!(contract.contains("Greeter"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(registry.ensure_registered::<dyn Greeter>().is_err());
    }

    #[test]
    fn resolution_is_deterministic_across_scopes() {
        let registry = registry_with(&["a", "b"]);
        let first = registry.new_scope().resolve::<dyn Greeter>().unwrap();
        let second = registry.new_scope().resolve::<dyn Greeter>().unwrap();
        for name in ["x", "y", ""] {
            assert_eq!(first.greet(name), second.greet(name));
        }
    }

    #[test]
    fn default_can_be_replaced() {
        let mut b = HookRegistry::builder();
        b.register_default_instance::<dyn Greeter>(Arc::new(Deny));
        b.register_default_instance::<dyn Greeter>(Arc::new(Plain));
        assert!(b.is_registered::<dyn Greeter>());
        let registry = b.build();
        let greeter = registry.new_scope().resolve::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet("x"), "hello x");
        assert_eq!(registry.len(), 1);
    }
}
