use std::sync::Arc;

use async_trait::async_trait;

use super::ApiModel;
use crate::context::InvocationContext;
use crate::error::ApiError;
use crate::provider::ModelProvider;

/// Produces the model exposed by an API.
///
/// Each link receives the model produced by the inner links (ultimately the
/// provider's base model) and may extend it. Conflicts are recorded on the model with
/// [`ApiModel::record_issue`] so that every problem is reported together at build time.
#[async_trait]
pub trait ModelBuilder: Send + Sync {
    async fn build_model(&self, ctx: &InvocationContext) -> Result<ApiModel, ApiError>;
}

/// Terminal builder: asks the [`ModelProvider`] for the base model.
pub struct ProviderModelBuilder {
    provider: Arc<dyn ModelProvider>,
}

impl ProviderModelBuilder {
    #[must_use]
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ModelBuilder for ProviderModelBuilder {
    async fn build_model(&self, ctx: &InvocationContext) -> Result<ApiModel, ApiError> {
        let model = self.provider.base_model(ctx).await?;
        tracing::debug!(
            namespace = model.namespace(),
            entity_sets = model.entity_sets().count(),
            "Base model loaded"
        );
        Ok(model)
    }
}
