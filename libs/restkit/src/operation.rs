//! Bound and unbound operations (functions and actions).

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::InvocationContext;
use crate::error::ApiError;
use crate::model::OperationDescriptor;

/// Arguments of one invocation, by parameter name.
pub type OperationArguments = Map<String, Value>;

/// User code behind an operation.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        arguments: &OperationArguments,
    ) -> anyhow::Result<Value>;
}

/// Hook chain contract that dispatches an invocation to its handler.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// # Errors
    /// `ResourceNotFound` for unhandled operations, and handler failures.
    async fn execute_operation(
        &self,
        ctx: &InvocationContext,
        operation: &OperationDescriptor,
        arguments: &OperationArguments,
    ) -> Result<Value, ApiError>;
}

/// Hook chain contract consulted before arguments are checked. `false` denies the call.
pub trait OperationAuthorizer: Send + Sync {
    /// # Errors
    /// Failures of the rule itself.
    fn authorize(
        &self,
        ctx: &InvocationContext,
        operation: &OperationDescriptor,
    ) -> Result<bool, ApiError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllOperations;

impl OperationAuthorizer for AllowAllOperations {
    fn authorize(
        &self,
        _ctx: &InvocationContext,
        _operation: &OperationDescriptor,
    ) -> Result<bool, ApiError> {
        Ok(true)
    }
}

/// Terminal executor: no handler claimed the operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnhandledOperations;

#[async_trait]
impl OperationExecutor for UnhandledOperations {
    async fn execute_operation(
        &self,
        _ctx: &InvocationContext,
        operation: &OperationDescriptor,
        _arguments: &OperationArguments,
    ) -> Result<Value, ApiError> {
        Err(ApiError::ResourceNotFound(operation.name.clone()))
    }
}

/// Check arguments against the declared parameters. Reports every problem at once.
///
/// # Errors
/// Returns `ApiError::InvalidRequest` listing unknown, missing and mistyped arguments.
pub fn validate_arguments(
    operation: &OperationDescriptor,
    arguments: &OperationArguments,
) -> Result<(), ApiError> {
    let mut problems = Vec::new();
    for name in arguments.keys() {
        if !operation.parameters.iter().any(|p| &p.name == name) {
            problems.push(format!("unknown parameter '{name}'"));
        }
    }
    for p in &operation.parameters {
        match arguments.get(&p.name) {
            None | Some(Value::Null) if !p.nullable => {
                problems.push(format!("parameter '{}' is required", p.name));
            }
            Some(v) if !v.is_null() && !p.kind.accepts(v) => {
                problems.push(format!("parameter '{}' expects a {} value", p.name, p.kind));
            }
            _ => {}
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ApiError::InvalidRequest(format!(
            "{}: {}",
            operation.name,
            problems.join("; ")
        )))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::FieldKind;

    fn args(v: Value) -> OperationArguments {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn arguments_are_checked_against_parameters() {
        let op = OperationDescriptor::function("MostExpensive")
            .parameter("Top", FieldKind::I64, false)
            .parameter("Country", FieldKind::String, true);

        assert!(validate_arguments(&op, &args(json!({"Top": 3}))).is_ok());
        assert!(validate_arguments(&op, &args(json!({"Top": 3, "Country": null}))).is_ok());

        let err = validate_arguments(&op, &args(json!({"Country": 7, "Bogus": true}))).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown parameter 'Bogus'"), "{msg}");
        assert!(msg.contains("parameter 'Top' is required"), "{msg}");
        assert!(msg.contains("parameter 'Country' expects a String value"), "{msg}");
    }
}
