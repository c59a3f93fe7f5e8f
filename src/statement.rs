//! Registered statements.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::error::{DynSqlError, DynSqlResult};
use crate::keygen::KeyGenerator;
use crate::source::{BoundSql, SqlSource};

/// Suffix appended to a statement id to name its select-key statement.
pub const SELECT_KEY_SUFFIX: &str = "!selectKey";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl CommandKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "select" => Some(CommandKind::Select),
            "insert" => Some(CommandKind::Insert),
            "update" => Some(CommandKind::Update),
            "delete" => Some(CommandKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Select => "SELECT",
            CommandKind::Insert => "INSERT",
            CommandKind::Update => "UPDATE",
            CommandKind::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// How the execution layer should prepare the statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementType {
    Statement,
    #[default]
    Prepared,
    Callable,
}

impl FromStr for StatementType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STATEMENT" => Ok(StatementType::Statement),
            "PREPARED" => Ok(StatementType::Prepared),
            "CALLABLE" => Ok(StatementType::Callable),
            _ => Err(()),
        }
    }
}

/// A compiled template plus its execution metadata, addressable by id.
///
/// Immutable once registered.
#[derive(Debug, Clone)]
pub struct MappedStatement {
    /// Namespace-qualified id.
    pub id: String,
    pub command: CommandKind,
    pub statement_type: StatementType,
    pub source: SqlSource,
    pub database_id: Option<String>,
    pub parameter_type: Option<String>,
    pub result_type: Option<String>,
    pub result_map: Option<String>,
    pub result_sets: Option<String>,
    pub fetch_size: Option<u32>,
    pub timeout: Option<u32>,
    pub flush_cache: bool,
    pub use_cache: bool,
    pub result_ordered: bool,
    pub key_generator: KeyGenerator,
    pub key_properties: Vec<String>,
    pub key_columns: Vec<String>,
}

impl MappedStatement {
    /// A statement with the defaults for its command kind.
    pub fn new(id: impl Into<String>, command: CommandKind, source: SqlSource) -> Self {
        let select = command == CommandKind::Select;
        Self {
            id: id.into(),
            command,
            statement_type: StatementType::default(),
            source,
            database_id: None,
            parameter_type: None,
            result_type: None,
            result_map: None,
            result_sets: None,
            fetch_size: None,
            timeout: None,
            flush_cache: !select,
            use_cache: select,
            result_ordered: false,
            key_generator: KeyGenerator::None,
            key_properties: Vec::new(),
            key_columns: Vec::new(),
        }
    }

    /// Id without its namespace.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    pub fn is_select_key(&self) -> bool {
        self.id.ends_with(SELECT_KEY_SUFFIX)
    }

    pub fn bound_sql(&self, parameter: &Value, database_id: Option<&str>) -> DynSqlResult<BoundSql> {
        let bound = self.source.bound_sql(parameter, database_id)?;
        tracing::trace!(statement = %self.id, sql = %bound.sql, "rendered statement");
        Ok(bound)
    }
}

/// Part of `id` after the last `.`.
pub fn short_id(id: &str) -> &str {
    id.rsplit_once('.').map_or(id, |(_, short)| short)
}

/// Split a comma-separated `keyProperty`/`keyColumn` list.
pub fn split_names(list: Option<&str>) -> Vec<String> {
    list.map(|l| {
        l.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

pub(crate) fn parse_statement_type(element: &str, value: Option<&str>) -> DynSqlResult<StatementType> {
    match value {
        None => Ok(StatementType::default()),
        Some(v) => v
            .parse()
            .map_err(|_| DynSqlError::invalid(element, "statementType", v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptEngine;

    #[test]
    fn test_defaults_follow_command() {
        let engine = ScriptEngine::default();
        let select = MappedStatement::new("a.b", CommandKind::Select, engine.compile_str("SELECT 1", None).unwrap());
        assert!(select.use_cache && !select.flush_cache);

        let insert = MappedStatement::new("a.c", CommandKind::Insert, engine.compile_str("INSERT", None).unwrap());
        assert!(!insert.use_cache && insert.flush_cache);
        assert_eq!(insert.statement_type, StatementType::Prepared);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("com.acme.UserMapper.find"), "find");
        assert_eq!(short_id("find"), "find");
    }

    #[test]
    fn test_statement_type() {
        assert_eq!(parse_statement_type("select", Some("callable")).unwrap(), StatementType::Callable);
        assert!(parse_statement_type("select", Some("weird")).is_err());
    }

    #[test]
    fn test_split_names() {
        assert_eq!(split_names(Some("id, code ,")), vec!["id", "code"]);
        assert!(split_names(None).is_empty());
    }
}
