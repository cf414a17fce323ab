//! Tabular inputs and outputs.
//!
//! Rows are plain serde records; where they live is behind [`TableStore`], so
//! drivers never touch file paths directly. [`CsvTableStore`] reads and writes
//! CSV files under a data directory, [`MemoryTableStore`] keeps CSV text in
//! memory for tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::condition::ExperimentType;
use crate::error::HarnessError;

// =============================================================================
// Rows
// =============================================================================

/// A Fermi estimation question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetQuestion {
    pub id: u32,
    pub question: String,
    pub unit: String,
}

/// One row of `prompts.csv`: a named template for the context or target turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRow {
    pub turn: String,
    pub prompt: String,
    pub prefix: Option<String>,
    pub postfix: Option<String>,
}

/// One row of `context_question_prompts.csv`. Rows sharing a bias are the
/// turns of that bias, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPromptRow {
    pub bias: String,
    pub prefix: Option<String>,
    pub postfix: Option<String>,
}

/// A generated context question (also the first-turn table schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextQuestionRow {
    pub target_id: u32,
    pub source: String,
    pub bias: String,
    pub experiment_type: ExperimentType,
    pub question: String,
}

/// A model's answer to a context question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextAnswerRow {
    pub target_id: u32,
    pub sample: u32,
    pub model: String,
    pub context: String,
    pub context_prompt: String,
    pub context_bias: String,
    pub experiment_type: ExperimentType,
    pub response: String,
}

/// One sampled answer to a target question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetResponseRow {
    pub target_id: u32,
    pub sample: u32,
    pub model: String,
    pub context: String,
    pub context_prompt: String,
    pub context_bias: String,
    pub target_prompt: String,
    pub experiment_type: ExperimentType,
    pub response: String,
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("table {0} not found")]
    NotFound(String),
    #[error("malformed table {table}: {source}")]
    Csv {
        table: String,
        #[source]
        source: csv::Error,
    },
    #[error("io error on table {table}: {source}")]
    Io {
        table: String,
        #[source]
        source: io::Error,
    },
    #[error("table store lock poisoned")]
    Poisoned,
}

impl TableError {
    fn csv(table: &str, source: csv::Error) -> Self {
        Self::Csv {
            table: table.to_string(),
            source,
        }
    }

    fn io(table: &str, source: io::Error) -> Self {
        Self::Io {
            table: table.to_string(),
            source,
        }
    }
}

/// Where tables live. Names are `/`-separated relative paths such as
/// `experiment_data/target_questions.csv`.
pub trait TableStore {
    /// Load every row, or `None` when the table does not exist yet.
    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<Vec<T>>, TableError>;

    /// Replace the table with `rows`.
    fn save<T: Serialize>(&self, name: &str, rows: &[T]) -> Result<(), TableError>;

    /// Load a table that must exist.
    fn require<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, TableError> {
        self.load(name)?
            .ok_or_else(|| TableError::NotFound(name.to_string()))
    }
}

fn read_rows<T: DeserializeOwned, R: io::Read>(
    name: &str,
    mut reader: csv::Reader<R>,
) -> Result<Vec<T>, TableError> {
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| TableError::csv(name, e))
}

fn write_rows<T: Serialize, W: io::Write>(
    name: &str,
    mut writer: csv::Writer<W>,
    rows: &[T],
) -> Result<W, TableError> {
    for row in rows {
        writer.serialize(row).map_err(|e| TableError::csv(name, e))?;
    }
    writer
        .into_inner()
        .map_err(|e| TableError::io(name, io::Error::new(e.error().kind(), e.error().to_string())))
}

/// CSV files under a data directory.
#[derive(Debug, Clone)]
pub struct CsvTableStore {
    root: PathBuf,
}

impl CsvTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl TableStore for CsvTableStore {
    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<Vec<T>>, TableError> {
        let path = self.path_of(name);
        if !path.exists() {
            return Ok(None);
        }
        let reader = csv::Reader::from_path(&path).map_err(|e| TableError::csv(name, e))?;
        read_rows(name, reader).map(Some)
    }

    fn save<T: Serialize>(&self, name: &str, rows: &[T]) -> Result<(), TableError> {
        let path = self.path_of(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TableError::io(name, e))?;
        }
        let writer = csv::Writer::from_path(&path).map_err(|e| TableError::csv(name, e))?;
        let mut file = write_rows(name, writer, rows)?;
        io::Write::flush(&mut file).map_err(|e| TableError::io(name, e))
    }
}

/// CSV text held in memory, keyed by table name.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, String>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, csv_text: &str) -> Self {
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(name.to_string(), csv_text.to_string());
        }
        self
    }

    /// Raw CSV text of a table, if present.
    pub fn csv_text(&self, name: &str) -> Option<String> {
        self.tables.lock().ok()?.get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .lock()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl TableStore for MemoryTableStore {
    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<Vec<T>>, TableError> {
        let text = {
            let tables = self.tables.lock().map_err(|_| TableError::Poisoned)?;
            match tables.get(name) {
                Some(text) => text.clone(),
                None => return Ok(None),
            }
        };
        let reader = csv::Reader::from_reader(text.as_bytes());
        read_rows(name, reader).map(Some)
    }

    fn save<T: Serialize>(&self, name: &str, rows: &[T]) -> Result<(), TableError> {
        let buf = write_rows(name, csv::Writer::from_writer(Vec::new()), rows)?;
        let text = String::from_utf8(buf)
            .map_err(|e| TableError::io(name, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let mut tables = self.tables.lock().map_err(|_| TableError::Poisoned)?;
        tables.insert(name.to_string(), text);
        Ok(())
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// First row matching `pred`.
///
/// When several rows match, the earliest one wins and a warning names the
/// key, since duplicated upstream rows usually mean a condition was
/// generated twice.
pub fn first_match<'a, T>(
    rows: &'a [T],
    table: &'static str,
    key: &str,
    pred: impl Fn(&T) -> bool,
) -> Result<&'a T, HarnessError> {
    let mut matches = rows.iter().filter(|row| pred(row));
    let first = matches
        .next()
        .ok_or_else(|| HarnessError::lookup(table, key))?;
    let duplicates = matches.count();
    if duplicates > 0 {
        tracing::warn!(
            table,
            key,
            duplicates,
            "several rows match; using the first"
        );
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prompt_fields_load_as_none() {
        let store = MemoryTableStore::new().with_table(
            "prompts.csv",
            "turn,prompt,prefix,postfix\ntarget,onlyanswer,Answer only.,\ncontext,simple,,\n",
        );
        let rows: Vec<PromptRow> = store.require("prompts.csv").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].prefix.as_deref(), Some("Answer only."));
        assert_eq!(rows[0].postfix, None);
        assert_eq!(rows[1].prefix, None);
    }

    #[test]
    fn missing_table_is_none_and_require_fails() {
        let store = MemoryTableStore::new();
        let loaded: Option<Vec<TargetQuestion>> = store.load("nope.csv").unwrap();
        assert!(loaded.is_none());
        let err = store.require::<TargetQuestion>("nope.csv").unwrap_err();
        assert!(matches!(err, TableError::NotFound(_)));
    }

    #[test]
    fn first_match_prefers_earliest_row() {
        let rows = vec![(1, "a"), (2, "b"), (1, "c")];
        let hit = first_match(&rows, "pairs", "1", |r| r.0 == 1).unwrap();
        assert_eq!(hit.1, "a");
        let err = first_match(&rows, "pairs", "3", |r| r.0 == 3).unwrap_err();
        assert!(matches!(err, HarnessError::Lookup { table: "pairs", .. }));
    }

    #[test]
    fn malformed_rows_are_reported() {
        let store = MemoryTableStore::new()
            .with_table("t.csv", "id,question,unit\nnot-a-number,Q,U\n");
        let err = store.require::<TargetQuestion>("t.csv").unwrap_err();
        assert!(matches!(err, TableError::Csv { .. }));
    }
}
