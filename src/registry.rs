//! Statement registry.
//!
//! Loading goes through a [`ConfigurationBuilder`], which owns all mutable
//! state and is used from one thread. [`ConfigurationBuilder::build`] freezes
//! the result into an `Arc<Configuration>` that readers share without locks.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::config::Settings;
use crate::engine::ScriptEngine;
use crate::error::{DynSqlError, DynSqlResult};
use crate::markup::Element;
use crate::mapper::{self, PendingStatement};
use crate::source::BoundSql;
use crate::statement::{short_id, MappedStatement};

/// Whether an entry may join a [`DialectSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Declared for a dialect other than the active one.
    Skip,
    Duplicate,
}

/// All variants registered under one id: one per dialect plus one fallback.
#[derive(Debug, Clone)]
pub struct DialectSlot<T> {
    variants: BTreeMap<String, T>,
    fallback: Option<T>,
}

impl<T> Default for DialectSlot<T> {
    fn default() -> Self {
        Self {
            variants: BTreeMap::new(),
            fallback: None,
        }
    }
}

impl<T> DialectSlot<T> {
    pub fn admission(&self, database_id: Option<&str>, active: Option<&str>) -> Admission {
        match database_id {
            Some(d) if active.is_some_and(|a| a != d) => Admission::Skip,
            Some(d) if self.variants.contains_key(d) => Admission::Duplicate,
            Some(_) => Admission::Accept,
            None if self.fallback.is_some() => Admission::Duplicate,
            None => Admission::Accept,
        }
    }

    pub fn insert(&mut self, database_id: Option<String>, value: T) {
        match database_id {
            Some(d) => {
                self.variants.insert(d, value);
            }
            None => self.fallback = Some(value),
        }
    }

    /// The variant for `database_id`, else the fallback.
    pub fn resolve(&self, database_id: Option<&str>) -> Option<&T> {
        database_id
            .and_then(|d| self.variants.get(d))
            .or(self.fallback.as_ref())
    }

    /// Every entry: dialect variants in name order, then the fallback.
    pub fn entries(&self) -> impl Iterator<Item = &T> {
        self.variants.values().chain(self.fallback.as_ref())
    }
}

/// The frozen registry.
#[derive(Debug)]
pub struct Configuration {
    database_id: Option<String>,
    use_generated_keys: bool,
    engine: ScriptEngine,
    statements: HashMap<String, DialectSlot<Arc<MappedStatement>>>,
    /// Short id to every qualified id that declares it.
    short_ids: HashMap<String, Vec<String>>,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Build from settings, loading every mapper they list.
    pub fn from_settings(settings: &Settings) -> DynSqlResult<Arc<Self>> {
        let mut builder = ConfigurationBuilder::from_settings(settings);
        for path in &settings.mappers {
            builder.load_mapper_file(path)?;
        }
        builder.build()
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    pub fn database_id(&self) -> Option<&str> {
        self.database_id.as_deref()
    }

    pub fn use_generated_keys(&self) -> bool {
        self.use_generated_keys
    }

    /// Look up by qualified or short id, for the active dialect.
    pub fn statement(&self, id: &str) -> DynSqlResult<Arc<MappedStatement>> {
        self.statement_for(id, self.database_id.as_deref())
    }

    /// Look up by qualified or short id, for a given dialect.
    pub fn statement_for(&self, id: &str, database_id: Option<&str>) -> DynSqlResult<Arc<MappedStatement>> {
        let qualified = resolve_id(&self.statements, &self.short_ids, id)?;
        self.statements
            .get(qualified)
            .and_then(|slot| slot.resolve(database_id))
            .cloned()
            .ok_or_else(|| DynSqlError::StatementNotFound(id.to_string()))
    }

    pub fn has_statement(&self, id: &str) -> bool {
        self.statement(id).is_ok()
    }

    /// Caller-visible qualified ids, sorted. Select-key statements are hidden.
    pub fn statement_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .statements
            .iter()
            .filter(|(_, slot)| slot.entries().any(|s| !s.is_select_key()))
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Every registered caller-visible statement, all dialect variants included.
    pub fn statements(&self) -> Vec<Arc<MappedStatement>> {
        let mut all: Vec<Arc<MappedStatement>> = self
            .statements
            .values()
            .flat_map(|slot| slot.entries().cloned())
            .filter(|s| !s.is_select_key())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.database_id.cmp(&b.database_id)));
        all
    }

    /// Render a statement for `parameter` under the active dialect.
    pub fn bound_sql(&self, id: &str, parameter: &Value) -> DynSqlResult<BoundSql> {
        self.statement(id)?
            .bound_sql(parameter, self.database_id.as_deref())
    }
}

fn resolve_id<'a, T>(
    statements: &'a HashMap<String, T>,
    short_ids: &'a HashMap<String, Vec<String>>,
    id: &'a str,
) -> DynSqlResult<&'a str> {
    if statements.contains_key(id) {
        return Ok(id);
    }
    match short_ids.get(id).map(Vec::as_slice) {
        Some([only]) => Ok(only.as_str()),
        Some([_, _, ..]) => Err(DynSqlError::AmbiguousStatement(id.to_string())),
        _ => Err(DynSqlError::StatementNotFound(id.to_string())),
    }
}

/// Load-time registry. Not shared; freeze it with [`build`](Self::build).
#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
    config: Configuration,
    fragments: HashMap<String, DialectSlot<Element>>,
    pending: Vec<PendingStatement>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            database_id: None,
            use_generated_keys: false,
            engine: ScriptEngine::default(),
            statements: HashMap::new(),
            short_ids: HashMap::new(),
        }
    }
}

impl ConfigurationBuilder {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut builder = Self::default()
            .engine(settings.script_engine())
            .use_generated_keys(settings.use_generated_keys);
        builder.config.database_id = settings.database_id.clone();
        builder
    }

    /// Set the active dialect
    pub fn database_id(mut self, id: impl Into<String>) -> Self {
        self.config.database_id = Some(id.into());
        self
    }

    pub fn use_generated_keys(mut self, enabled: bool) -> Self {
        self.config.use_generated_keys = enabled;
        self
    }

    /// Set the script engine used to compile statements
    pub fn engine(mut self, engine: ScriptEngine) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn active_database_id(&self) -> Option<&str> {
        self.config.database_id.as_deref()
    }

    pub fn generated_keys_enabled(&self) -> bool {
        self.config.use_generated_keys
    }

    pub fn script_engine(&self) -> &ScriptEngine {
        &self.config.engine
    }

    /// Whether a statement with this id and dialect may be registered.
    ///
    /// `Ok(false)` means the statement belongs to another dialect and should
    /// be skipped.
    pub fn admits(&self, id: &str, database_id: Option<&str>) -> DynSqlResult<bool> {
        let empty: DialectSlot<Arc<MappedStatement>> = DialectSlot::default();
        let slot = self.config.statements.get(id).unwrap_or(&empty);
        match slot.admission(database_id, self.active_database_id()) {
            Admission::Accept => Ok(true),
            Admission::Skip => Ok(false),
            Admission::Duplicate => Err(DynSqlError::DuplicateIdentifier(id.to_string())),
        }
    }

    /// Publish a compiled statement. Fails on a duplicate; returns `None`
    /// when the statement is for another dialect.
    pub fn add_statement(&mut self, statement: MappedStatement) -> DynSqlResult<Option<Arc<MappedStatement>>> {
        if !self.admits(&statement.id, statement.database_id.as_deref())? {
            tracing::debug!(
                statement = %statement.id,
                database_id = ?statement.database_id,
                "skipping statement for inactive dialect"
            );
            return Ok(None);
        }

        let statement = Arc::new(statement);
        let id = statement.id.clone();
        let short = short_id(&id).to_string();
        if short != id {
            let owners = self.config.short_ids.entry(short).or_default();
            if !owners.contains(&id) {
                owners.push(id.clone());
            }
        }
        self.config
            .statements
            .entry(id)
            .or_default()
            .insert(statement.database_id.clone(), Arc::clone(&statement));
        tracing::debug!(statement = %statement.id, database_id = ?statement.database_id, "registered statement");
        Ok(Some(statement))
    }

    /// Look up a statement registered so far.
    pub fn statement(&self, id: &str) -> DynSqlResult<Arc<MappedStatement>> {
        let qualified = resolve_id(&self.config.statements, &self.config.short_ids, id)?;
        self.config
            .statements
            .get(qualified)
            .and_then(|slot| slot.resolve(self.active_database_id()))
            .cloned()
            .ok_or_else(|| DynSqlError::StatementNotFound(id.to_string()))
    }

    /// Register a `<sql>` fragment under its qualified id.
    pub fn add_fragment(&mut self, id: &str, database_id: Option<&str>, fragment: Element) -> DynSqlResult<()> {
        let active = self.config.database_id.clone();
        let slot = self.fragments.entry(id.to_string()).or_default();
        match slot.admission(database_id, active.as_deref()) {
            Admission::Accept => {
                slot.insert(database_id.map(str::to_string), fragment);
                Ok(())
            }
            Admission::Skip => {
                tracing::debug!(fragment = id, ?database_id, "skipping fragment for inactive dialect");
                Ok(())
            }
            Admission::Duplicate => Err(DynSqlError::DuplicateIdentifier(id.to_string())),
        }
    }

    /// Fragment by qualified id, for the active dialect.
    pub fn fragment(&self, id: &str) -> Option<&Element> {
        self.fragments
            .get(id)
            .and_then(|slot| slot.resolve(self.active_database_id()))
    }

    /// Load a mapper document from text. `resource` names it in errors.
    pub fn load_mapper(&mut self, source: &str, resource: &str) -> DynSqlResult<usize> {
        mapper::load(self, source, resource)
    }

    pub fn load_mapper_file(&mut self, path: &Path) -> DynSqlResult<usize> {
        let source = std::fs::read_to_string(path)?;
        self.load_mapper(&source, &path.display().to_string())
    }

    /// Defer a statement whose includes refer to fragments not loaded yet.
    pub(crate) fn defer(&mut self, pending: PendingStatement) {
        self.pending.push(pending);
    }

    /// Retry deferred statements and freeze.
    pub fn build(mut self) -> DynSqlResult<Arc<Configuration>> {
        for pending in std::mem::take(&mut self.pending) {
            mapper::register_pending(&mut self, pending)?;
        }
        tracing::info!(
            statements = self.config.statements.len(),
            database_id = ?self.config.database_id,
            "configuration ready"
        );
        Ok(Arc::new(self.config))
    }
}
