//! Rule list persistence
//!
//! The process-wide ordered rule list and the JSON file behind it.
//!
//! # Design Notes
//!
//! Loading never fails. A missing, empty or unparsable file yields the
//! default (empty) rule set, and a record that cannot be turned into a rule
//! is logged and skipped so one bad rule does not take the rest down.
//! Saving writes keys sorted with four-space indentation so files diff
//! cleanly across edits.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Rule, RuleContext, RuleRecord};

/// Name of the rules file inside the configuration directory
pub const RULES_FILE_NAME: &str = "earconRules.json";

/// Rules used when no usable file exists
pub const DEFAULT_RULES: &str = "[]";

/// Error type for rule list operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Cannot access {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Cannot serialize rules: {0}")]
    Serialize(String),

    #[error("No rule at index {index} (have {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Where the last load got its rules from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    File,
    MissingFile,
    EmptyFile,
    Malformed,
}

/// Outcome of a reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub source: LoadSource,
    pub loaded: usize,
    /// Index in the file and reason for every skipped record
    pub skipped: Vec<(usize, String)>,
}

/// Direction for `RuleStore::move_rule`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

/// Ordered list of rules backed by a JSON file
pub struct RuleStore {
    path: PathBuf,
    rules: RwLock<Vec<Arc<Rule>>>,
}

impl RuleStore {
    /// Create an empty store bound to `path`; nothing is read yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rules: RwLock::new(Vec::new()),
        }
    }

    /// Create a store and load it
    pub fn open(path: impl Into<PathBuf>, ctx: &RuleContext) -> (Self, LoadReport) {
        let store = Self::new(path);
        let report = store.reload(ctx);
        (store, report)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory list with the file's contents
    pub fn reload(&self, ctx: &RuleContext) -> LoadReport {
        let (text, mut source) = match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => {
                debug!(path = %self.path.display(), "rules file is empty, using defaults");
                (DEFAULT_RULES.to_string(), LoadSource::EmptyFile)
            }
            Ok(text) => (text, LoadSource::File),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), "cannot read rules file: {}", e);
                }
                (DEFAULT_RULES.to_string(), LoadSource::MissingFile)
            }
        };

        let entries = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) => {
                warn!(path = %self.path.display(), "rules file is not a JSON array, using defaults");
                source = LoadSource::Malformed;
                Vec::new()
            }
            Err(e) => {
                warn!(path = %self.path.display(), "malformed rules file, using defaults: {}", e);
                source = LoadSource::Malformed;
                Vec::new()
            }
        };

        let (rules, skipped) = build_rules(entries, ctx);
        let report = LoadReport {
            source,
            loaded: rules.len(),
            skipped,
        };
        *self.rules.write() = rules;

        info!(
            path = %self.path.display(),
            loaded = report.loaded,
            skipped = report.skipped.len(),
            "rules loaded"
        );
        report
    }

    /// Snapshot of the current rules, in order
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        self.rules.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<Rule>> {
        self.rules.read().get(index).cloned()
    }

    fn checked(&self, index: usize) -> Result<Arc<Rule>, StoreError> {
        let rules = self.rules.read();
        rules.get(index).cloned().ok_or(StoreError::IndexOutOfRange {
            index,
            len: rules.len(),
        })
    }

    /// Enable or disable the rule at `index`
    pub fn set_enabled(&self, index: usize, enabled: bool) -> Result<(), StoreError> {
        self.checked(index)?.set_enabled(enabled);
        Ok(())
    }

    /// Flip the rule at `index`, returning its new state
    pub fn toggle(&self, index: usize) -> Result<bool, StoreError> {
        let rule = self.checked(index)?;
        let enabled = !rule.is_enabled();
        rule.set_enabled(enabled);
        Ok(enabled)
    }

    /// Swap the rule at `index` with its neighbour
    ///
    /// Moving past either end leaves the list unchanged.
    ///
    /// # Returns
    /// The rule's index after the move
    pub fn move_rule(&self, index: usize, direction: MoveDirection) -> Result<usize, StoreError> {
        let mut rules = self.rules.write();
        let len = rules.len();
        if index >= len {
            return Err(StoreError::IndexOutOfRange { index, len });
        }
        let target = match direction {
            MoveDirection::Up => index.checked_sub(1),
            MoveDirection::Down => Some(index + 1).filter(|&i| i < len),
        };
        match target {
            Some(target) => {
                rules.swap(index, target);
                Ok(target)
            }
            None => Ok(index),
        }
    }

    /// Append a rule, returning its index
    pub fn add(&self, rule: Rule) -> usize {
        let mut rules = self.rules.write();
        rules.push(Arc::new(rule));
        rules.len() - 1
    }

    /// Replace the rule at `index` with an edited one
    pub fn replace(&self, index: usize, rule: Rule) -> Result<Arc<Rule>, StoreError> {
        let mut rules = self.rules.write();
        let len = rules.len();
        let slot = rules
            .get_mut(index)
            .ok_or(StoreError::IndexOutOfRange { index, len })?;
        Ok(std::mem::replace(slot, Arc::new(rule)))
    }

    /// Remove and return the rule at `index`
    pub fn remove(&self, index: usize) -> Result<Arc<Rule>, StoreError> {
        let mut rules = self.rules.write();
        if index >= rules.len() {
            return Err(StoreError::IndexOutOfRange {
                index,
                len: rules.len(),
            });
        }
        Ok(rules.remove(index))
    }

    /// The rule list as it would be written to disk
    pub fn to_json(&self) -> Result<String, StoreError> {
        let records: Vec<RuleRecord> = self.rules.read().iter().map(|r| r.to_record()).collect();
        records_to_json(&records)
    }

    /// Write the rule list to the store's file
    pub fn save(&self) -> Result<(), StoreError> {
        let json = self.to_json()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        fs::write(&self.path, json).map_err(|e| self.io_error(e))?;
        info!(path = %self.path.display(), rules = self.len(), "rules saved");
        Ok(())
    }

    /// Save, then reload so every rule gets fresh commands
    pub fn save_and_reload(&self, ctx: &RuleContext) -> Result<LoadReport, StoreError> {
        self.save()?;
        Ok(self.reload(ctx))
    }

    fn io_error(&self, e: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

fn build_rules(entries: Vec<Value>, ctx: &RuleContext) -> (Vec<Arc<Rule>>, Vec<(usize, String)>) {
    let mut rules = Vec::with_capacity(entries.len());
    let mut skipped = Vec::new();

    for (index, entry) in entries.into_iter().enumerate() {
        let built = serde_json::from_value::<RuleRecord>(entry)
            .map_err(|e| e.to_string())
            .and_then(|record| Rule::from_record(&record, ctx).map_err(|e| e.to_string()));
        match built {
            Ok(rule) => rules.push(Arc::new(rule)),
            Err(reason) => {
                warn!(index, "failed to load audio rule: {}", reason);
                skipped.push((index, reason));
            }
        }
    }

    (rules, skipped)
}

/// Serialize records with sorted keys and four-space indentation
pub fn records_to_json(records: &[RuleRecord]) -> Result<String, StoreError> {
    // Going through `Value` sorts object keys.
    let value = serde_json::to_value(records).map_err(|e| StoreError::Serialize(e.to_string()))?;
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| StoreError::Serialize(e.to_string()))?;
    String::from_utf8(out).map_err(|e| StoreError::Serialize(e.to_string()))
}
