//! API assembly and the three entry points: query, submit, invoke.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::ApiConfig;
use crate::context::InvocationContext;
use crate::conventions::Conventions;
use crate::error::{AccessAction, ApiError};
use crate::hooks::{HookRegistry, HookRegistryBuilder};
use crate::model::{
    AllVisible, ApiModel, ModelBuilder, ModelVisibilityFilter, ProviderModelBuilder,
};
use crate::operation::{
    AllowAllOperations, OperationArguments, OperationAuthorizer, OperationExecutor,
    UnhandledOperations, validate_arguments,
};
use crate::provider::{ChangeTrackerFactory, ModelProvider, QuerySourceProvider};
use crate::query::{
    QueryExecutor, QueryPipeline, QueryPipelineServices, QueryRequest, QueryResult, limits,
    register_query_defaults,
};
use crate::submit::{
    ChangeSet, SubmitPipeline, SubmitPipelineServices, SubmitResult, register_submit_defaults,
};

type Configure = Box<dyn FnOnce(&mut HookRegistryBuilder) + Send>;

/// Wires providers, conventions and custom hooks into an [`Api`].
///
/// Registration order inside every chain:
/// 1. terminal defaults
/// 2. convention layers
/// 3. `configure_hooks` closures, in call order (the last one is outermost)
pub struct ApiBuilder {
    config: ApiConfig,
    model_provider: Option<Arc<dyn ModelProvider>>,
    query_source: Option<Arc<dyn QuerySourceProvider>>,
    change_tracking: Option<Arc<dyn ChangeTrackerFactory>>,
    conventions: Option<Arc<Conventions>>,
    configure: Vec<Configure>,
}

impl ApiBuilder {
    #[must_use]
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            model_provider: None,
            query_source: None,
            change_tracking: None,
            conventions: None,
            configure: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_model_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.model_provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_query_source(mut self, provider: Arc<dyn QuerySourceProvider>) -> Self {
        self.query_source = Some(provider);
        self
    }

    #[must_use]
    pub fn with_change_tracking(mut self, factory: Arc<dyn ChangeTrackerFactory>) -> Self {
        self.change_tracking = Some(factory);
        self
    }

    #[must_use]
    pub fn with_conventions(mut self, conventions: Arc<Conventions>) -> Self {
        self.conventions = Some(conventions);
        self
    }

    /// Register custom hook chain links.
    #[must_use]
    pub fn configure_hooks<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut HookRegistryBuilder) + Send + 'static,
    {
        self.configure.push(Box::new(f));
        self
    }

    /// Freeze the hook registry and build the exposed model.
    ///
    /// # Errors
    /// - `ConfigurationError::NotRegistered` when a provider is missing
    /// - `ApiError::Model` listing every model issue, including conventions that name
    ///   unknown entity sets
    /// - any error raised by the model builders
    pub async fn build(self) -> Result<Api, ApiError> {
        let mut hooks = HookRegistry::builder();
        register_query_defaults(&mut hooks);
        register_submit_defaults(&mut hooks);
        hooks
            .register_default::<dyn ModelBuilder, _>(|scope| {
                let provider = scope.resolve::<dyn ModelProvider>()?;
                Ok(Arc::new(ProviderModelBuilder::new(provider)))
            })
            .register_default_instance::<dyn ModelVisibilityFilter>(Arc::new(AllVisible))
            .register_default_instance::<dyn OperationAuthorizer>(Arc::new(AllowAllOperations))
            .register_default_instance::<dyn OperationExecutor>(Arc::new(UnhandledOperations));

        if let Some(provider) = self.model_provider {
            hooks.register_default_instance::<dyn ModelProvider>(provider);
        }
        if let Some(provider) = self.query_source {
            hooks.register_default_instance::<dyn QuerySourceProvider>(provider);
        }
        if let Some(factory) = self.change_tracking {
            hooks.register_default_instance::<dyn ChangeTrackerFactory>(factory);
        }
        if let Some(conventions) = &self.conventions {
            conventions.install(&mut hooks);
        }
        for configure in self.configure {
            configure(&mut hooks);
        }

        let registry = hooks.build();
        registry.ensure_registered::<dyn ModelProvider>()?;
        registry.ensure_registered::<dyn QuerySourceProvider>()?;
        registry.ensure_registered::<dyn ChangeTrackerFactory>()?;

        let config = Arc::new(self.config);
        let bootstrap = InvocationContext::new(
            Arc::clone(&config),
            Arc::new(ApiModel::new(config.namespace.clone())),
            &registry,
            CancellationToken::new(),
        );
        let builder = bootstrap.services().resolve::<dyn ModelBuilder>()?;
        let mut model = builder.build_model(&bootstrap).await?;
        model.validate()?;
        let visibility = bootstrap.services().resolve::<dyn ModelVisibilityFilter>()?;
        model.apply_visibility(visibility.as_ref());

        QueryPipelineServices::resolve(bootstrap.services())?;
        SubmitPipelineServices::resolve(bootstrap.services())?;
        bootstrap.services().resolve::<dyn QueryExecutor>()?;
        bootstrap.services().resolve::<dyn OperationAuthorizer>()?;
        bootstrap.services().resolve::<dyn OperationExecutor>()?;

        tracing::info!(
            namespace = model.namespace(),
            entity_sets = model.visible_entity_sets().count(),
            operations = model.visible_operations().count(),
            contracts = registry.len(),
            "API built"
        );

        Ok(Api {
            config,
            model: Arc::new(model),
            registry,
        })
    }
}

/// A built API. Cheap to clone; every clone shares the same model and hooks.
#[derive(Clone, Debug)]
pub struct Api {
    config: Arc<ApiConfig>,
    model: Arc<ApiModel>,
    registry: Arc<HookRegistry>,
}

impl Api {
    #[must_use]
    pub fn builder(config: ApiConfig) -> ApiBuilder {
        ApiBuilder::new(config)
    }

    #[must_use]
    pub fn model(&self) -> &Arc<ApiModel> {
        &self.model
    }

    #[must_use]
    pub fn config(&self) -> &Arc<ApiConfig> {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    /// Fresh context for one operation.
    #[must_use]
    pub fn context(&self, cancellation_token: CancellationToken) -> InvocationContext {
        InvocationContext::new(
            Arc::clone(&self.config),
            Arc::clone(&self.model),
            &self.registry,
            cancellation_token,
        )
    }

    /// Check limits, run the expression pipeline, execute.
    ///
    /// # Errors
    /// `InvalidQuery`, `ResourceNotFound`, `NotAuthorized`, configuration errors from
    /// the pipeline, provider errors and `Cancelled`.
    pub async fn query(
        &self,
        ctx: &InvocationContext,
        request: QueryRequest,
    ) -> Result<QueryResult, ApiError> {
        let span = tracing::info_span!(
            "restkit.query",
            operation_id = %ctx.id(),
            expression = %request.expression
        );
        async {
            limits::validate(&request.expression, &ctx.config().query)?;
            let sourced = QueryPipeline::new(ctx, &request)?.run()?;
            tracing::debug!(sourced = %sourced, "Query expression sourced");
            let executor = ctx.services().resolve::<dyn QueryExecutor>()?;
            let result = executor.execute_query(ctx, &request, sourced).await;
            if let Err(e) = &result {
                tracing::debug!(error = %e, category = ?e.category(), "Query failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Submit a change-set as one unit of work.
    ///
    /// # Errors
    /// See [`SubmitPipeline::run`].
    pub async fn submit(
        &self,
        ctx: &InvocationContext,
        change_set: ChangeSet,
    ) -> Result<SubmitResult, ApiError> {
        let span = tracing::info_span!(
            "restkit.submit",
            operation_id = %ctx.id(),
            items = change_set.len()
        );
        async {
            let result = SubmitPipeline::new(ctx)?.run(change_set).await;
            if let Err(e) = &result {
                tracing::debug!(error = %e, category = ?e.category(), "Submission failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Invoke a visible function or action by name.
    ///
    /// # Errors
    /// `ResourceNotFound` for unknown or hidden operations, `InvalidRequest` for bad
    /// arguments, `NotAuthorized` and handler failures.
    pub async fn invoke_operation(
        &self,
        ctx: &InvocationContext,
        name: &str,
        arguments: OperationArguments,
    ) -> Result<Value, ApiError> {
        let span = tracing::info_span!(
            "restkit.operation",
            operation_id = %ctx.id(),
            operation = name
        );
        async {
            ctx.ensure_active()?;
            let operation = ctx
                .model()
                .visible_operation(name)
                .ok_or_else(|| ApiError::ResourceNotFound(name.to_owned()))?;
            let authorizer = ctx.services().resolve::<dyn OperationAuthorizer>()?;
            if !authorizer.authorize(ctx, operation)? {
                return Err(ApiError::not_authorized(name, AccessAction::Execute));
            }
            validate_arguments(operation, &arguments)?;
            let executor = ctx.services().resolve::<dyn OperationExecutor>()?;
            executor.execute_operation(ctx, operation, &arguments).await
        }
        .instrument(span)
        .await
    }
}
