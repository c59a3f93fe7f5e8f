//! Settings, read from `dynsql.toml`.
//!
//! ```toml
//! database_id = "postgres"
//! placeholder = "dollar"
//! use_generated_keys = true
//! mappers = ["mappers/blog.xml", "mappers/user.xml"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::{PlaceholderStyle, ScriptEngine};
use crate::error::{DynSqlError, DynSqlResult};

/// Name of the settings file.
pub const SETTINGS_FILE: &str = "dynsql.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Active dialect.
    pub database_id: Option<String>,

    /// Allow driver-generated key retrieval for inserts that don't say otherwise.
    pub use_generated_keys: bool,

    pub placeholder: PlaceholderStyle,

    pub shrink_whitespace: bool,

    /// Make an unresolved `${…}` an error instead of empty text.
    pub strict_substitution: bool,

    /// Mapper documents to load. Relative paths resolve against the
    /// settings file's directory.
    pub mappers: Vec<PathBuf>,
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    pub fn from_toml(content: &str) -> DynSqlResult<Self> {
        toml::from_str(content).map_err(|e| DynSqlError::Config(e.to_string()))
    }

    /// Read a settings file, anchoring relative mapper paths at its directory.
    pub fn from_file(path: &Path) -> DynSqlResult<Self> {
        let content = fs::read_to_string(path)?;
        let mut settings = Self::from_toml(&content)
            .map_err(|e| DynSqlError::Config(format!("{}: {e}", path.display())))?;
        if let Some(dir) = path.parent() {
            for mapper in &mut settings.mappers {
                if mapper.is_relative() {
                    *mapper = dir.join(&*mapper);
                }
            }
        }
        Ok(settings)
    }

    /// Where [`Settings::discover`] looks, in order.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(SETTINGS_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("dynsql").join(SETTINGS_FILE));
        }
        paths
    }

    /// The first settings file found on the search path, or defaults.
    pub fn discover() -> DynSqlResult<Self> {
        match Self::search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading settings");
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// A script engine with these rendering options.
    pub fn script_engine(&self) -> ScriptEngine {
        ScriptEngine::builder()
            .placeholder(self.placeholder)
            .shrink_whitespace(self.shrink_whitespace)
            .strict_substitution(self.strict_substitution)
            .build()
    }
}

/// Builder for [`Settings`].
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Set the active dialect
    pub fn database_id(mut self, id: impl Into<String>) -> Self {
        self.settings.database_id = Some(id.into());
        self
    }

    pub fn use_generated_keys(mut self, enabled: bool) -> Self {
        self.settings.use_generated_keys = enabled;
        self
    }

    pub fn placeholder(mut self, style: PlaceholderStyle) -> Self {
        self.settings.placeholder = style;
        self
    }

    pub fn shrink_whitespace(mut self, enabled: bool) -> Self {
        self.settings.shrink_whitespace = enabled;
        self
    }

    pub fn strict_substitution(mut self, enabled: bool) -> Self {
        self.settings.strict_substitution = enabled;
        self
    }

    /// Add a mapper document
    pub fn mapper(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.mappers.push(path.into());
        self
    }

    pub fn build(self) -> Settings {
        self.settings
    }
}
