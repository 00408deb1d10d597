use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ContractKey, HookRegistry};
use crate::error::ConfigurationError;

/// Request-scoped view over a [`HookRegistry`].
///
/// Resolved chains are cached for the lifetime of the scope, so every stage of one request
/// that resolves the same contract observes the same instance. Factories receive the scope
/// and may resolve other contracts from it; recursive resolution of a contract that is
/// still being composed is reported instead of overflowing the stack.
pub struct ServiceScope {
    registry: Arc<HookRegistry>,
    resolved: Mutex<HashMap<ContractKey, Box<dyn Any + Send + Sync>>>,
    resolving: Mutex<Vec<ContractKey>>,
}

impl ServiceScope {
    pub(super) fn new(registry: Arc<HookRegistry>) -> Self {
        Self {
            registry,
            resolved: Mutex::new(HashMap::new()),
            resolving: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// Resolve the composed chain for contract `T`.
    ///
    /// # Errors
    /// - `ConfigurationError::NotRegistered` if the chain is empty.
    /// - `ConfigurationError::CyclicResolution` if a factory (transitively) resolves `T`.
    /// - Any error returned by a factory.
    pub fn resolve<T>(&self) -> Result<Arc<T>, ConfigurationError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = ContractKey::of::<T>();

        let cached = self
            .resolved
            .lock()
            .get(&key)
            .and_then(|b| b.downcast_ref::<Arc<T>>())
            .cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let chain = self
            .registry
            .chain::<T>()
            .ok_or(ConfigurationError::NotRegistered {
                contract: key.name(),
            })?;

        {
            let mut resolving = self.resolving.lock();
            if resolving.contains(&key) {
                return Err(ConfigurationError::CyclicResolution {
                    contract: key.name(),
                });
            }
            resolving.push(key);
        }

        // No lock is held here: factories may resolve other contracts.
        let composed = chain.compose(self);
        self.resolving.lock().retain(|k| *k != key);

        let instance = composed?.ok_or(ConfigurationError::NotRegistered {
            contract: key.name(),
        })?;
        self.resolved.lock().insert(key, Box::new(instance.clone()));
        Ok(instance)
    }
}

impl fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceScope")
            .field("resolved", &self.resolved.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    trait Counter: Send + Sync {
        fn id(&self) -> usize;
    }

    struct Fixed(usize);
    impl Counter for Fixed {
        fn id(&self) -> usize {
            self.0
        }
    }

    trait Ping: Send + Sync {}
    trait Pong: Send + Sync {}
    struct Both;
    impl Ping for Both {}
    impl Pong for Both {}

    #[test]
    fn resolution_is_cached_per_scope() {
        let built = Arc::new(AtomicUsize::new(0));
        let mut b = HookRegistry::builder();
        let counter = built.clone();
        b.register_default::<dyn Counter, _>(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Fixed(n)) as Arc<dyn Counter>)
        });
        let registry = b.build();

        let scope = registry.new_scope();
        let a = scope.resolve::<dyn Counter>().unwrap();
        let again = scope.resolve::<dyn Counter>().unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        let other_scope = registry.new_scope();
        let b = other_scope.resolve::<dyn Counter>().unwrap();
        assert_eq!(b.id(), 1, "a new scope composes a fresh chain");
    }

    #[test]
    fn factories_can_resolve_other_contracts() {
        let mut b = HookRegistry::builder();
        b.register_default_instance::<dyn Counter>(Arc::new(Fixed(41)));
        b.register::<dyn Counter, _>(|scope, next| {
            let inner = next.ok_or(ConfigurationError::NotRegistered { contract: "inner" })?;
            // Resolving an unrelated contract from inside a factory is allowed.
            assert!(scope.resolve::<dyn Ping>().is_err());
            Ok(Arc::new(Fixed(inner.id() + 1)) as Arc<dyn Counter>)
        });
        let registry = b.build();

        let c = registry.new_scope().resolve::<dyn Counter>().unwrap();
        assert_eq!(c.id(), 42);
    }

    #[test]
    fn cyclic_factories_are_reported() {
        let mut b = HookRegistry::builder();
        b.register_default::<dyn Ping, _>(|scope| {
            scope.resolve::<dyn Pong>()?;
            Ok(Arc::new(Both) as Arc<dyn Ping>)
        });
        b.register_default::<dyn Pong, _>(|scope| {
            scope.resolve::<dyn Ping>()?;
            Ok(Arc::new(Both) as Arc<dyn Pong>)
        });
        let registry = b.build();

        let err = registry.new_scope().resolve::<dyn Ping>().err().unwrap();
        assert!(matches!(err, ConfigurationError::CyclicResolution { .. }));
    }
}
