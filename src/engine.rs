//! Script engine: compiles templates and carries the evaluation capabilities.
//!
//! A [`ScriptEngine`] bundles the attribute accessor, the expression
//! evaluator and rendering options. Compiled [`SqlSource`]s keep a handle to
//! the engine that built them, so rendering needs only the parameter.
//!
//! ```rust,ignore
//! let engine = ScriptEngine::builder().placeholder(PlaceholderStyle::Dollar).build();
//! let source = engine.compile_str("SELECT * FROM t <where><if test=\"id != null\">id = #{id}</if></where>", None)?;
//! let bound = source.bound_sql(&json!({"id": 7}), None)?;
//! // => "SELECT * FROM t WHERE id = $1"
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::accessor::{AttributeAccessor, JsonAccessor};
use crate::builder::ScriptBuilder;
use crate::error::DynSqlResult;
use crate::expression::{DefaultEvaluator, ExpressionEvaluator};
use crate::markup::{self, Element};
use crate::source::SqlSource;

/// How `#{…}` markers are written in the final SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderStyle {
    /// `?`
    #[default]
    Question,
    /// `$1`, `$2`, …
    Dollar,
}

impl PlaceholderStyle {
    /// Placeholder for the `n`th (1-based) parameter.
    pub fn render(self, n: usize) -> String {
        match self {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Dollar => format!("${n}"),
        }
    }
}

/// Rendering options shared by every source an engine compiles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOptions {
    pub placeholder: PlaceholderStyle,
    /// Collapse whitespace runs in the final SQL to single spaces.
    pub shrink_whitespace: bool,
    /// Treat an unresolved `${…}` name as an error instead of empty text.
    pub strict_substitution: bool,
}

#[derive(Clone)]
pub struct ScriptEngine {
    accessor: Arc<dyn AttributeAccessor>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    options: ScriptOptions,
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self {
            accessor: Arc::new(JsonAccessor),
            evaluator: Arc::new(DefaultEvaluator::new()),
            options: ScriptOptions::default(),
        }
    }
}

impl fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ScriptEngine {
    pub fn builder() -> ScriptEngineBuilder {
        ScriptEngineBuilder::default()
    }

    pub fn accessor(&self) -> &dyn AttributeAccessor {
        self.accessor.as_ref()
    }

    pub fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.evaluator.as_ref()
    }

    pub fn options(&self) -> &ScriptOptions {
        &self.options
    }

    /// Compile a statement element's body.
    ///
    /// Only the element's children are compiled; its own attributes are
    /// statement metadata and are ignored here.
    pub fn compile(&self, script: &Element, parameter_type: Option<&str>) -> DynSqlResult<SqlSource> {
        let (root, is_dynamic) = ScriptBuilder::new().parse(script)?;
        SqlSource::new(self, root, is_dynamic, parameter_type)
    }

    /// Compile template markup given as text.
    pub fn compile_str(&self, script: &str, parameter_type: Option<&str>) -> DynSqlResult<SqlSource> {
        let children = markup::parse_fragment(script)?;
        let element = Element {
            name: "script".to_string(),
            attributes: Vec::new(),
            children,
        };
        self.compile(&element, parameter_type)
    }
}

/// Builder for [`ScriptEngine`].
#[derive(Default)]
pub struct ScriptEngineBuilder {
    engine: ScriptEngine,
}

impl ScriptEngineBuilder {
    /// Set the attribute accessor
    pub fn accessor(mut self, accessor: impl AttributeAccessor + 'static) -> Self {
        self.engine.accessor = Arc::new(accessor);
        self
    }

    /// Set the expression evaluator
    pub fn evaluator(mut self, evaluator: impl ExpressionEvaluator + 'static) -> Self {
        self.engine.evaluator = Arc::new(evaluator);
        self
    }

    pub fn placeholder(mut self, style: PlaceholderStyle) -> Self {
        self.engine.options.placeholder = style;
        self
    }

    pub fn shrink_whitespace(mut self, enabled: bool) -> Self {
        self.engine.options.shrink_whitespace = enabled;
        self
    }

    pub fn strict_substitution(mut self, enabled: bool) -> Self {
        self.engine.options.strict_substitution = enabled;
        self
    }

    pub fn build(self) -> ScriptEngine {
        self.engine
    }
}
