//! Guard and bind expressions.
//!
//! Templates delegate every `test`, `value` and `collection` attribute to an
//! [`ExpressionEvaluator`]. The crate ships [`DefaultEvaluator`], a small
//! expression language over named bindings:
//!
//! ```text
//! title != null and title.trim().length() > 0
//! ids != null && ids.size() > 0
//! '%' + name + '%'
//! ```

mod ast;
mod eval;
mod parser;


use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::accessor::AttributeAccessor;
use crate::error::ExpressionError;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use eval::{concat_text, is_truthy, iterate, loose_eq};
pub use parser::parse_expression;

/// Names visible to an expression.
pub trait Scope {
    /// Resolve a root name. `None` when nothing by that name exists.
    fn resolve(&self, name: &str) -> Option<Value>;

    /// Accessor used for `a.b` property steps.
    fn accessor(&self) -> &dyn AttributeAccessor;
}

/// Evaluates expression strings against a [`Scope`].
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate_value(&self, expression: &str, scope: &dyn Scope) -> Result<Value, ExpressionError>;

    fn evaluate_boolean(&self, expression: &str, scope: &dyn Scope) -> Result<bool, ExpressionError> {
        self.evaluate_value(expression, scope).map(|v| is_truthy(&v))
    }

    /// Evaluate to a collection and return its `(index-or-key, item)` pairs.
    fn evaluate_iterable(
        &self,
        expression: &str,
        scope: &dyn Scope,
    ) -> Result<Vec<(Value, Value)>, ExpressionError> {
        let value = self.evaluate_value(expression, scope)?;
        iterate(&value).map_err(|reason| ExpressionError::new(expression, reason))
    }
}

/// The built-in evaluator. Parsed expressions are cached by source text.
#[derive(Debug, Default)]
pub struct DefaultEvaluator {
    cache: DashMap<String, Arc<Expr>>,
}

impl DefaultEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source`, reusing a cached tree when available.
    pub fn parsed(&self, source: &str) -> Result<Arc<Expr>, ExpressionError> {
        if let Some(hit) = self.cache.get(source) {
            return Ok(Arc::clone(hit.value()));
        }
        let expr = Arc::new(parse_expression(source)?);
        self.cache.insert(source.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    /// Number of distinct expressions parsed so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl ExpressionEvaluator for DefaultEvaluator {
    fn evaluate_value(&self, expression: &str, scope: &dyn Scope) -> Result<Value, ExpressionError> {
        let expr = self.parsed(expression)?;
        eval::evaluate(&expr, scope).map_err(|reason| ExpressionError::new(expression, reason))
    }
}
