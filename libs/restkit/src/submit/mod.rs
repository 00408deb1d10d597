//! Change-set submission pipeline.

mod change_set;
mod hooks;
mod initializer;
mod pipeline;
mod validation;

pub use change_set::{
    ChangeAction, ChangeSet, DataModificationItem, PostSubmitFailure, SubmitResult, SubmitStage,
};
pub use hooks::{
    AllowAllWrites, ChangeSetInitializer, ChangeSetItemAuthorizer, ChangeSetItemFilter,
    ChangeSetItemValidator, NoItemFilter, SubmitExecutor, SubmitPipelineServices,
    TrackingSubmitExecutor,
};
pub use initializer::DefaultChangeSetInitializer;
pub use pipeline::SubmitPipeline;
pub use validation::{
    ChangeSetValidationError, ModelValidator, ValidationResult, ValidationSeverity,
};

use std::sync::Arc;

use crate::hooks::HookRegistryBuilder;

/// Terminal implementations of every submission contract.
pub fn register_submit_defaults(hooks: &mut HookRegistryBuilder) {
    hooks
        .register_default_instance::<dyn ChangeSetItemAuthorizer>(Arc::new(AllowAllWrites))
        .register_default_instance::<dyn ChangeSetItemValidator>(Arc::new(ModelValidator))
        .register_default_instance::<dyn ChangeSetInitializer>(Arc::new(
            DefaultChangeSetInitializer,
        ))
        .register_default_instance::<dyn ChangeSetItemFilter>(Arc::new(NoItemFilter))
        .register_default_instance::<dyn SubmitExecutor>(Arc::new(TrackingSubmitExecutor));
}
