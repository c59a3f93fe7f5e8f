//! Realized SQL sources and placeholder binding.
//!
//! A static statement is evaluated and placeholder-parsed once when it is
//! compiled. A dynamic one keeps its node tree and is walked per call.

use std::collections::HashMap;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::accessor::{resolve_path, split_path, AttributeAccessor, PathSegment};
use crate::context::DynamicContext;
use crate::engine::{PlaceholderStyle, ScriptEngine};
use crate::error::{DynSqlError, DynSqlResult};
use crate::node::SqlNode;
use crate::token::PLACEHOLDER;

/// Direction of a bound parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    InOut,
}

impl FromStr for ParameterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(ParameterMode::In),
            "OUT" => Ok(ParameterMode::Out),
            "INOUT" => Ok(ParameterMode::InOut),
            other => Err(format!("unknown parameter mode '{other}'")),
        }
    }
}

/// One `#{…}` marker, in the order it appears in the SQL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterMapping {
    pub property: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jdbc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_type: Option<String>,
    pub mode: ParameterMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_scale: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_handler: Option<String>,
}

impl ParameterMapping {
    /// Parse a marker body: `prop`, `prop:JDBCTYPE`, `prop,jdbcType=…,mode=…`.
    pub fn parse(content: &str, parameter_type: Option<&str>) -> DynSqlResult<Self> {
        let invalid = |message: String| DynSqlError::InvalidMapping {
            content: content.to_string(),
            message,
        };

        let mut parts = content.split(',');
        let head = parts.next().unwrap_or("").trim();
        let (property, old_style_jdbc) = match head.split_once(':') {
            Some((p, jdbc)) => (p.trim(), Some(jdbc.trim().to_string())),
            None => (head, None),
        };
        if property.is_empty() {
            return Err(invalid("missing property name".to_string()));
        }

        let mut mapping = ParameterMapping {
            property: property.to_string(),
            jdbc_type: old_style_jdbc,
            ..Default::default()
        };
        for part in parts {
            let Some((key, value)) = part.split_once('=') else {
                return Err(invalid(format!("expected name=value, found '{}'", part.trim())));
            };
            let value = value.trim().to_string();
            match key.trim() {
                "jdbcType" => mapping.jdbc_type = Some(value),
                "javaType" => mapping.java_type = Some(value),
                "mode" => mapping.mode = value.parse().map_err(invalid)?,
                "numericScale" => {
                    let scale = value
                        .parse()
                        .map_err(|_| invalid(format!("numericScale must be a non-negative integer, found '{value}'")))?;
                    mapping.numeric_scale = Some(scale);
                }
                "typeHandler" => mapping.type_handler = Some(value),
                // Result-side attributes, accepted and ignored.
                "resultMap" | "jdbcTypeName" => {}
                other => {
                    return Err(invalid(format!(
                        "unknown attribute '{other}'; valid attributes are javaType, jdbcType, mode, numericScale, resultMap, typeHandler, jdbcTypeName"
                    )));
                }
            }
        }

        if mapping.java_type.is_none() {
            mapping.java_type = parameter_type.filter(|t| is_simple_type(t)).map(str::to_string);
        }
        Ok(mapping)
    }
}

/// Whether a type hint names a scalar that binds as the whole parameter.
pub fn is_simple_type(hint: &str) -> bool {
    let name = hint.strip_prefix("java.lang.").unwrap_or(hint);
    let name = name.strip_prefix('_').unwrap_or(name);
    matches!(
        name.to_ascii_lowercase().as_str(),
        "string"
            | "int"
            | "integer"
            | "long"
            | "short"
            | "byte"
            | "float"
            | "double"
            | "boolean"
            | "char"
            | "character"
            | "bigdecimal"
            | "biginteger"
            | "decimal"
            | "date"
            | "uuid"
    )
}

/// Final SQL plus everything needed to bind its placeholders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundSql {
    pub sql: String,
    pub parameter_mappings: Vec<ParameterMapping>,
    pub parameter: Value,
    /// Bindings made during evaluation (`bind`, loop items).
    pub additional: HashMap<String, Value>,
}

impl BoundSql {
    pub fn additional_parameter(&self, name: &str) -> Option<&Value> {
        self.additional.get(name)
    }

    /// Value for each mapping, in placeholder order.
    ///
    /// A mapping resolves from an additional binding (by its root name), then
    /// from a scalar parameter itself, then as a path on the parameter.
    /// Anything else is null.
    pub fn parameter_values(&self, accessor: &dyn AttributeAccessor) -> Vec<Value> {
        self.parameter_mappings
            .iter()
            .map(|m| self.value_of(accessor, &m.property))
            .collect()
    }

    fn value_of(&self, accessor: &dyn AttributeAccessor, property: &str) -> Value {
        let root = match split_path(property).first() {
            Some(PathSegment::Name(name)) => *name,
            _ => property,
        };
        if let Some(bound) = self.additional.get(root) {
            let rest = property.trim_start()[root.len()..].trim_start_matches('.');
            return resolve_path(accessor, bound, rest).unwrap_or(Value::Null);
        }
        match &self.parameter {
            Value::Null => Value::Null,
            Value::Object(_) | Value::Array(_) => {
                resolve_path(accessor, &self.parameter, property).unwrap_or(Value::Null)
            }
            scalar => scalar.clone(),
        }
    }
}

/// A compiled statement body.
#[derive(Debug, Clone)]
pub enum SqlSource {
    Static(StaticSource),
    Dynamic(DynamicSource),
}

#[derive(Debug, Clone)]
pub struct StaticSource {
    text: String,
    sql: String,
    mappings: Vec<ParameterMapping>,
}

#[derive(Debug, Clone)]
pub struct DynamicSource {
    root: SqlNode,
    engine: ScriptEngine,
    parameter_type: Option<String>,
}

impl SqlSource {
    pub(crate) fn new(
        engine: &ScriptEngine,
        root: SqlNode,
        is_dynamic: bool,
        parameter_type: Option<&str>,
    ) -> DynSqlResult<Self> {
        if is_dynamic {
            return Ok(SqlSource::Dynamic(DynamicSource {
                root,
                engine: engine.clone(),
                parameter_type: parameter_type.map(str::to_string),
            }));
        }

        let (text, _) = evaluate(engine, &root, &Value::Null, None)?;
        let (sql, mappings) = bind_placeholders(engine, &text, parameter_type)?;
        Ok(SqlSource::Static(StaticSource { text, sql, mappings }))
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, SqlSource::Dynamic(_))
    }

    /// Evaluate to SQL text with `#{…}` markers left in place, plus the
    /// bindings the evaluation made.
    pub fn render(
        &self,
        parameter: &Value,
        database_id: Option<&str>,
    ) -> DynSqlResult<(String, HashMap<String, Value>)> {
        match self {
            SqlSource::Static(s) => Ok((s.text.clone(), HashMap::new())),
            SqlSource::Dynamic(d) => evaluate(&d.engine, &d.root, parameter, database_id),
        }
    }

    /// Evaluate and replace `#{…}` markers with placeholders.
    pub fn bound_sql(&self, parameter: &Value, database_id: Option<&str>) -> DynSqlResult<BoundSql> {
        match self {
            SqlSource::Static(s) => Ok(BoundSql {
                sql: s.sql.clone(),
                parameter_mappings: s.mappings.clone(),
                parameter: parameter.clone(),
                additional: HashMap::new(),
            }),
            SqlSource::Dynamic(d) => {
                let (text, additional) = evaluate(&d.engine, &d.root, parameter, database_id)?;
                let (sql, parameter_mappings) =
                    bind_placeholders(&d.engine, &text, d.parameter_type.as_deref())?;
                Ok(BoundSql {
                    sql,
                    parameter_mappings,
                    parameter: parameter.clone(),
                    additional,
                })
            }
        }
    }
}

fn evaluate(
    engine: &ScriptEngine,
    root: &SqlNode,
    parameter: &Value,
    database_id: Option<&str>,
) -> DynSqlResult<(String, HashMap<String, Value>)> {
    let mut ctx = DynamicContext::new(engine, parameter, database_id);
    root.apply(&mut ctx)?;
    let (sql, bindings) = ctx.finish();
    let sql = if engine.options().shrink_whitespace {
        shrink_whitespace(&sql)
    } else {
        sql
    };
    Ok((sql, bindings))
}

fn bind_placeholders(
    engine: &ScriptEngine,
    text: &str,
    parameter_type: Option<&str>,
) -> DynSqlResult<(String, Vec<ParameterMapping>)> {
    let style: PlaceholderStyle = engine.options().placeholder;
    let mut mappings = Vec::new();
    let sql = PLACEHOLDER.replace(text, |content| {
        mappings.push(ParameterMapping::parse(content, parameter_type)?);
        Ok::<_, DynSqlError>(style.render(mappings.len()))
    })?;
    Ok((sql, mappings))
}

/// Collapse every whitespace run to a single space.
pub fn shrink_whitespace(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
