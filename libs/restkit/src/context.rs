use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::hooks::{HookRegistry, ServiceScope};
use crate::model::ApiModel;

/// Invocation context - the ambient state of one inbound query, submission or operation.
///
/// Every pipeline stage receives it and can reach:
/// - **Configuration**: the active [`ApiConfig`]
/// - **Model**: the exposed schema built at startup
/// - **Services**: a request-scoped [`ServiceScope`] over the hook registry
/// - **Properties**: a string-keyed bag for passing values between stages
/// - **Lifecycle**: a cancellation token checked between pipeline steps
///
/// Created once per operation and dropped when it ends; it is never shared between
/// concurrent operations.
pub struct InvocationContext {
    id: Uuid,
    config: Arc<ApiConfig>,
    model: Arc<ApiModel>,
    services: ServiceScope,
    properties: PropertyBag,
    cancellation_token: CancellationToken,
}

impl InvocationContext {
    #[must_use]
    pub fn new(
        config: Arc<ApiConfig>,
        model: Arc<ApiModel>,
        registry: &Arc<HookRegistry>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            config,
            model,
            services: registry.new_scope(),
            properties: PropertyBag::default(),
            cancellation_token,
        }
    }

    /// Operation id, used to correlate log lines of one request.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn model(&self) -> &ApiModel {
        &self.model
    }

    #[inline]
    #[must_use]
    pub fn services(&self) -> &ServiceScope {
        &self.services
    }

    #[inline]
    #[must_use]
    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Check-and-exit point used between pipeline steps.
    ///
    /// # Errors
    /// Returns `ApiError::Cancelled` once the token has been cancelled.
    pub fn ensure_active(&self) -> Result<(), ApiError> {
        if self.is_cancelled() {
            tracing::debug!(operation_id = %self.id, "Operation cancelled");
            return Err(ApiError::Cancelled);
        }
        Ok(())
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .field("properties", &self.properties.len())
            .finish_non_exhaustive()
    }
}

/// String-keyed property bag with typed values.
#[derive(Default)]
pub struct PropertyBag {
    values: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl PropertyBag {
    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.values.lock().insert(key.into(), Arc::new(value));
    }

    /// Typed read; `None` if the key is absent or holds another type.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.values.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.values.lock().remove(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn context(token: CancellationToken) -> InvocationContext {
        let registry = HookRegistry::builder().build();
        InvocationContext::new(
            Arc::new(ApiConfig::default()),
            Arc::new(ApiModel::default()),
            &registry,
            token,
        )
    }

    #[test]
    fn property_bag_is_typed() {
        let ctx = context(CancellationToken::new());
        ctx.properties().set("count", 830_u64);
        ctx.properties().set("label", "orders".to_owned());

        assert_eq!(ctx.properties().get::<u64>("count").as_deref(), Some(&830));
        assert!(ctx.properties().get::<i32>("count").is_none());
        assert_eq!(
            ctx.properties().get::<String>("label").as_deref().map(String::as_str),
            Some("orders")
        );
        assert!(ctx.properties().remove("label"));
        assert!(!ctx.properties().contains("label"));
        assert_eq!(ctx.properties().len(), 1);
    }

    #[test]
    fn cancellation_is_observed() {
        let token = CancellationToken::new();
        let ctx = context(token.clone());
        assert!(ctx.ensure_active().is_ok());

        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.ensure_active(), Err(ApiError::Cancelled)));
    }

    #[test]
    fn each_context_has_its_own_id() {
        let a = context(CancellationToken::new());
        let b = context(CancellationToken::new());
        assert_ne!(a.id(), b.id());
    }
}
