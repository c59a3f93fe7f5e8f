//! Key generators: copy database-produced keys back into the parameter.
//!
//! Running SQL is the execution layer's job; it is reached through
//! [`KeyExecutor`]. This module only decides when to ask and where the
//! answers go.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::accessor::{assign_path, AttributeAccessor};
use crate::error::{DynSqlError, DynSqlResult};
use crate::source::BoundSql;
use crate::statement::MappedStatement;

/// One result row as ordered `(column, value)` pairs.
pub type KeyRow = Vec<(String, Value)>;

/// The execution layer, as seen by key generation.
pub trait KeyExecutor {
    /// Run a select-key statement and return its rows.
    fn query(&mut self, statement: &MappedStatement, bound: &BoundSql) -> DynSqlResult<Vec<KeyRow>>;

    /// Keys generated by the last insert of `statement`, one row per record.
    fn generated_keys(&mut self, statement: &MappedStatement) -> DynSqlResult<Vec<KeyRow>>;
}

#[derive(Clone, Default)]
pub enum KeyGenerator {
    #[default]
    None,
    /// Driver-generated keys, read after the insert.
    Generated,
    /// A `<selectKey>` statement run before or after the primary one.
    SelectKey {
        statement: Arc<MappedStatement>,
        execute_before: bool,
    },
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyGenerator::None => f.write_str("None"),
            KeyGenerator::Generated => f.write_str("Generated"),
            KeyGenerator::SelectKey {
                statement,
                execute_before,
            } => f
                .debug_struct("SelectKey")
                .field("statement", &statement.id)
                .field("execute_before", execute_before)
                .finish(),
        }
    }
}

impl fmt::Display for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyGenerator::None => f.write_str("none"),
            KeyGenerator::Generated => f.write_str("generated"),
            KeyGenerator::SelectKey { execute_before: true, .. } => f.write_str("selectKey(before)"),
            KeyGenerator::SelectKey { execute_before: false, .. } => f.write_str("selectKey(after)"),
        }
    }
}

impl KeyGenerator {
    /// Call before executing `statement`.
    pub fn process_before(
        &self,
        executor: &mut dyn KeyExecutor,
        _statement: &MappedStatement,
        parameter: &mut Value,
        accessor: &dyn AttributeAccessor,
    ) -> DynSqlResult<()> {
        match self {
            KeyGenerator::SelectKey {
                statement: key_statement,
                execute_before: true,
            } => run_select_key(executor, key_statement, parameter, accessor),
            _ => Ok(()),
        }
    }

    /// Call after executing `statement`.
    pub fn process_after(
        &self,
        executor: &mut dyn KeyExecutor,
        statement: &MappedStatement,
        parameter: &mut Value,
        accessor: &dyn AttributeAccessor,
    ) -> DynSqlResult<()> {
        match self {
            KeyGenerator::SelectKey {
                statement: key_statement,
                execute_before: false,
            } => run_select_key(executor, key_statement, parameter, accessor),
            KeyGenerator::Generated => {
                let rows = executor.generated_keys(statement)?;
                assign_generated(statement, rows, parameter, accessor)
            }
            _ => Ok(()),
        }
    }
}

fn run_select_key(
    executor: &mut dyn KeyExecutor,
    key_statement: &MappedStatement,
    parameter: &mut Value,
    accessor: &dyn AttributeAccessor,
) -> DynSqlResult<()> {
    if key_statement.key_properties.is_empty() {
        return Ok(());
    }
    let bound = key_statement.bound_sql(parameter, key_statement.database_id.as_deref())?;
    let mut rows = executor.query(key_statement, &bound)?;
    let row = match rows.len() {
        0 => {
            return Err(DynSqlError::KeyGeneration(format!(
                "{} returned no data",
                key_statement.id
            )));
        }
        1 => rows.remove(0),
        _ => {
            return Err(DynSqlError::KeyGeneration(format!(
                "{} returned more than one row",
                key_statement.id
            )));
        }
    };

    if let [property] = key_statement.key_properties.as_slice() {
        let value = match row.iter().find(|(column, _)| column == property) {
            Some((_, v)) => v.clone(),
            None if row.len() == 1 => row[0].1.clone(),
            None => {
                return Err(DynSqlError::KeyGeneration(format!(
                    "{} returned no column for key property '{property}'",
                    key_statement.id
                )));
            }
        };
        return write_key(accessor, parameter, property, value);
    }
    assign_columns(key_statement, &row, parameter, accessor)
}

/// Copy generated key rows into one record, or one row per record of a list.
fn assign_generated(
    statement: &MappedStatement,
    rows: Vec<KeyRow>,
    parameter: &mut Value,
    accessor: &dyn AttributeAccessor,
) -> DynSqlResult<()> {
    if statement.key_properties.is_empty() || rows.is_empty() {
        return Ok(());
    }
    match parameter {
        Value::Array(records) => {
            if rows.len() > records.len() {
                return Err(DynSqlError::KeyGeneration(format!(
                    "{} generated {} keys for {} records",
                    statement.id,
                    rows.len(),
                    records.len()
                )));
            }
            for (record, row) in records.iter_mut().zip(&rows) {
                assign_columns(statement, row, record, accessor)?;
            }
            Ok(())
        }
        record => assign_columns(statement, &rows[0], record, accessor),
    }
}

/// Copy `keyColumn`s (or, without them, columns by position) into `keyProperty`s.
fn assign_columns(
    statement: &MappedStatement,
    row: &KeyRow,
    target: &mut Value,
    accessor: &dyn AttributeAccessor,
) -> DynSqlResult<()> {
    for (i, property) in statement.key_properties.iter().enumerate() {
        let value = match statement.key_columns.get(i) {
            Some(column) => row
                .iter()
                .find(|(c, _)| c.eq_ignore_ascii_case(column))
                .map(|(_, v)| v.clone()),
            None => row.get(i).map(|(_, v)| v.clone()),
        };
        let Some(value) = value else {
            return Err(DynSqlError::KeyGeneration(format!(
                "{} returned no value for key property '{property}'",
                statement.id
            )));
        };
        write_key(accessor, target, property, value)?;
    }
    Ok(())
}

fn write_key(
    accessor: &dyn AttributeAccessor,
    target: &mut Value,
    property: &str,
    value: Value,
) -> DynSqlResult<()> {
    if assign_path(accessor, target, property, value) {
        Ok(())
    } else {
        Err(DynSqlError::KeyGeneration(format!(
            "cannot set key property '{property}' on the parameter"
        )))
    }
}
