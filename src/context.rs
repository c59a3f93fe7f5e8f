//! Per-invocation evaluation state.

use std::collections::HashMap;

use serde_json::Value;

use crate::accessor::AttributeAccessor;
use crate::engine::ScriptEngine;
use crate::error::{DynSqlError, DynSqlResult, ExpressionError, ExpressionFailure};
use crate::expression::{ExpressionEvaluator, Scope};
use crate::token::SUBSTITUTION;

/// Binding name of the raw parameter value.
pub const PARAMETER_OBJECT_KEY: &str = "_parameter";

/// Binding name of the active dialect id.
pub const DATABASE_ID_KEY: &str = "_databaseId";

/// Mutable state for one evaluation of a node tree.
///
/// Created fresh per call and never shared: the accumulated SQL, explicit
/// bindings and the synthetic-name counter all live here.
pub struct DynamicContext<'a> {
    parameter: &'a Value,
    bindings: HashMap<String, Value>,
    sql: String,
    unique_number: usize,
    accessor: &'a dyn AttributeAccessor,
    evaluator: &'a dyn ExpressionEvaluator,
    strict_substitution: bool,
}

impl<'a> DynamicContext<'a> {
    pub fn new(engine: &'a ScriptEngine, parameter: &'a Value, database_id: Option<&str>) -> Self {
        let mut bindings = HashMap::new();
        bindings.insert(
            DATABASE_ID_KEY.to_string(),
            database_id.map_or(Value::Null, |id| Value::String(id.to_string())),
        );
        Self {
            parameter,
            bindings,
            sql: String::new(),
            unique_number: 0,
            accessor: engine.accessor(),
            evaluator: engine.evaluator(),
            strict_substitution: engine.options().strict_substitution,
        }
    }

    pub fn parameter(&self) -> &Value {
        self.parameter
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    /// Remove an explicit binding, returning what it held.
    pub fn unbind(&mut self, name: &str) -> Option<Value> {
        self.bindings.remove(name)
    }

    /// Explicit binding only, without accessor fallback.
    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Resolve a name: explicit bindings, then the parameter itself under
    /// [`PARAMETER_OBJECT_KEY`], then an attribute of the parameter. With a
    /// null parameter every other name resolves to null.
    ///
    /// Fallback reads are never cached into the binding map.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.bindings.get(name) {
            return Some(v.clone());
        }
        if name == PARAMETER_OBJECT_KEY {
            return Some(self.parameter.clone());
        }
        // No parameter at all: every name reads as null.
        if self.parameter.is_null() {
            return Some(Value::Null);
        }
        self.accessor.get_attribute(self.parameter, name)
    }

    /// Next value of the synthetic-name counter.
    pub fn next_unique(&mut self) -> usize {
        let n = self.unique_number;
        self.unique_number += 1;
        n
    }

    /// Append a fragment, keeping a single space between words that would
    /// otherwise run together.
    pub fn append_sql(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let joins_word = self.sql.chars().last().is_some_and(|c| !c.is_whitespace())
            && !fragment.starts_with(char::is_whitespace);
        if joins_word {
            self.sql.push(' ');
        }
        self.sql.push_str(fragment);
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Run `f` against an empty buffer and hand back what it wrote. The outer
    /// buffer is restored untouched.
    pub fn capture<F>(&mut self, f: F) -> DynSqlResult<(bool, String)>
    where
        F: FnOnce(&mut Self) -> DynSqlResult<bool>,
    {
        let outer = std::mem::take(&mut self.sql);
        let result = f(self);
        let inner = std::mem::replace(&mut self.sql, outer);
        result.map(|produced| (produced, inner))
    }

    pub fn evaluate_boolean(&self, expression: &str) -> Result<bool, ExpressionError> {
        self.evaluator.evaluate_boolean(expression, self)
    }

    pub fn evaluate_value(&self, expression: &str) -> Result<Value, ExpressionError> {
        self.evaluator.evaluate_value(expression, self)
    }

    pub fn evaluate_iterable(&self, expression: &str) -> Result<Vec<(Value, Value)>, ExpressionError> {
        self.evaluator.evaluate_iterable(expression, self)
    }

    /// Replace `${…}` tokens with their current values.
    ///
    /// Names that don't resolve render as empty text unless strict
    /// substitution is enabled.
    pub fn substitute(&self, text: &str) -> DynSqlResult<String> {
        SUBSTITUTION.replace(text, |content| {
            let expression = content.trim();
            match self.evaluate_value(expression) {
                Ok(Value::Null) => Ok(String::new()),
                Ok(Value::String(s)) => Ok(s),
                Ok(other) => Ok(other.to_string()),
                Err(ExpressionError {
                    reason: ExpressionFailure::Unresolved(_) | ExpressionFailure::NullTarget(_),
                    ..
                }) => {
                    if self.strict_substitution {
                        Err(DynSqlError::UnresolvedSubstitution(expression.to_string()))
                    } else {
                        tracing::trace!(expression, "unresolved substitution rendered empty");
                        Ok(String::new())
                    }
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Consume the context into the trimmed SQL text and its explicit bindings.
    pub fn finish(self) -> (String, HashMap<String, Value>) {
        (self.sql.trim().to_string(), self.bindings)
    }
}

impl Scope for DynamicContext<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.lookup(name)
    }

    fn accessor(&self) -> &dyn AttributeAccessor {
        self.accessor
    }
}
