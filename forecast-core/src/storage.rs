//! Persistence of the last searched location.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Key under which the last query is stored.
pub const LAST_QUERY_KEY: &str = "location";

/// Single-value durable storage for the last committed query.
pub trait QueryStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, query: &str) -> Result<()>;
}

/// TOML file with one `location = "..."` entry. Other keys are preserved.
#[derive(Debug, Clone)]
pub struct FileQueryStore {
    path: PathBuf,
}

impl FileQueryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<toml::Table> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read query store: {}", self.path.display()))?;

        toml::from_str::<toml::Table>(&contents)
            .with_context(|| format!("Failed to parse query store: {}", self.path.display()))
    }
}

impl QueryStore for FileQueryStore {
    fn load(&self) -> Result<Option<String>> {
        let table = self.read_table()?;
        Ok(table
            .get(LAST_QUERY_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_owned))
    }

    fn save(&self, query: &str) -> Result<()> {
        let mut table = self.read_table()?;
        table.insert(
            LAST_QUERY_KEY.to_string(),
            toml::Value::String(query.to_owned()),
        );

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create storage directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string(&table).context("Failed to serialize query store")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write query store: {}", self.path.display()))?;

        Ok(())
    }
}

/// In-process store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryQueryStore {
    value: Mutex<Option<String>>,
}

impl MemoryQueryStore {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }
}

impl QueryStore for MemoryQueryStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save(&self, query: &str) -> Result<()> {
        *self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(query.to_owned());
        Ok(())
    }
}
