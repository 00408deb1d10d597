//! Input caps checked before a query enters the pipeline:
//! - maximum `Take` value
//! - maximum number of `OrderBy` keys

use super::expr::QueryExpr;
use crate::config::QueryConfig;
use crate::error::ApiError;

/// Validate every operator of `query` against the configured caps.
///
/// # Errors
/// Returns `ApiError::InvalidQuery` naming the first violation found.
pub fn validate(query: &QueryExpr, limits: &QueryConfig) -> Result<(), ApiError> {
    match query {
        QueryExpr::Take { count, .. } if *count > limits.max_top => {
            return Err(ApiError::InvalidQuery(format!(
                "Take({count}) exceeds the maximum of {}",
                limits.max_top
            )));
        }
        QueryExpr::OrderBy { keys, .. } if keys.is_empty() => {
            return Err(ApiError::InvalidQuery("OrderBy without keys".to_owned()));
        }
        QueryExpr::OrderBy { keys, .. } if keys.len() > limits.max_order_by_keys => {
            return Err(ApiError::InvalidQuery(format!(
                "OrderBy with {} keys exceeds the maximum of {}",
                keys.len(),
                limits.max_order_by_keys
            )));
        }
        QueryExpr::SelectMany { collection, .. } => validate(collection, limits)?,
        _ => {}
    }
    match query.input() {
        Some(input) => validate(input, limits),
        None => Ok(()),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::query::ast::OrderKey;

    #[test]
    fn take_above_max_top_is_rejected() {
        let limits = QueryConfig::default();
        assert!(validate(&QueryExpr::resource("Orders").take(1000), &limits).is_ok());
        let err = validate(&QueryExpr::resource("Orders").take(1001), &limits).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid query: Take(1001) exceeds the maximum of 1000"
        );
    }

    #[test]
    fn order_by_key_count_is_capped() {
        let limits = QueryConfig {
            max_order_by_keys: 1,
            ..QueryConfig::default()
        };
        let ok = QueryExpr::resource("Orders").order_by([OrderKey::asc("OrderDate")]);
        assert!(validate(&ok, &limits).is_ok());

        let too_many = QueryExpr::resource("Orders")
            .order_by([OrderKey::asc("OrderDate"), OrderKey::desc("OrderID")])
            .take(5);
        assert!(matches!(
            validate(&too_many, &limits),
            Err(ApiError::InvalidQuery(_))
        ));
        let empty = QueryExpr::resource("Orders").order_by([]);
        assert!(validate(&empty, &limits).is_err());
    }

    #[test]
    fn embedded_operands_are_checked() {
        let q = QueryExpr::resource("Customers").select_many(
            QueryExpr::resource("Orders").take(5000),
            "CustomerID",
            "CustomerID",
        );
        assert!(validate(&q, &QueryConfig::default()).is_err());
    }
}
