//! # dynsql: dynamic SQL templates
//!
//! Compiles XML-flavored SQL templates into sources that render, per call,
//! a final SQL string with positional placeholders plus an ordered list of
//! parameter bindings. Mapper documents register statements by id, with
//! per-dialect variants and key-generation strategies.
//!
//! ## Quick Example
//!
//! ```rust
//! use dynsql::prelude::*;
//! use serde_json::json;
//!
//! let source = dynsql::compile(
//!     "SELECT * FROM blog <where><if test=\"title != null\">AND title = #{title}</if></where>",
//! )
//! .unwrap();
//!
//! let bound = source.bound_sql(&json!({"title": "Rust"}), None).unwrap();
//! assert_eq!(bound.sql, "SELECT * FROM blog WHERE title = ?");
//! assert_eq!(bound.parameter_mappings[0].property, "title");
//! ```
//!
//! ## Directives
//!
//! | Element      | Function                                      |
//! |--------------|-----------------------------------------------|
//! | `<if>`       | Emit children when `test` is true             |
//! | `<choose>`   | First true `<when>`, else `<otherwise>`       |
//! | `<where>`    | `WHERE` prefix, strips leading `AND`/`OR`     |
//! | `<set>`      | `SET` prefix, strips stray commas             |
//! | `<trim>`     | Configurable prefix/suffix with overrides     |
//! | `<foreach>`  | Iterate a collection with open/close/separator|
//! | `<bind>`     | Bind an expression result to a name           |
//! | `<include>`  | Inline a `<sql>` fragment (mapper documents)  |

pub mod accessor;
pub mod builder;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod expression;
pub mod keygen;
pub mod mapper;
pub mod markup;
pub mod node;
pub mod registrar;
pub mod registry;
pub mod source;
pub mod statement;
pub mod token;

pub mod prelude {
    pub use crate::accessor::{AttributeAccessor, JsonAccessor};
    pub use crate::config::Settings;
    pub use crate::engine::{PlaceholderStyle, ScriptEngine};
    pub use crate::error::*;
    pub use crate::expression::{DefaultEvaluator, ExpressionEvaluator};
    pub use crate::keygen::{KeyExecutor, KeyGenerator};
    pub use crate::registry::{Configuration, ConfigurationBuilder};
    pub use crate::source::{BoundSql, ParameterMapping, SqlSource};
    pub use crate::statement::{CommandKind, MappedStatement};
}

/// Compile a template with the default engine.
///
/// # Example
///
/// ```
/// use serde_json::json;
///
/// let source = dynsql::compile("SELECT * FROM t WHERE id = #{id}").unwrap();
/// assert!(!source.is_dynamic());
/// assert_eq!(source.bound_sql(&json!({"id": 1}), None).unwrap().sql, "SELECT * FROM t WHERE id = ?");
/// ```
pub fn compile(script: &str) -> error::DynSqlResult<source::SqlSource> {
    engine::ScriptEngine::default().compile_str(script, None)
}
