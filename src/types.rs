// src/types.rs

//! Core data model: catalog entries, participants and run parameters.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Run parameters supplied by the caller, keyed by declared parameter name.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// The live mapping experiment key -> catalog entry.
pub type Catalog = BTreeMap<String, Experiment>;

/// Participant names must stay free of `_` so that historical data files
/// (`<name>_<...>.psydat`) can be grouped back by name prefix.
pub static PARTICIPANT_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-]+$").expect("static pattern"));

/// Identifier-safe experiment file names (final path component, without the
/// extension).
pub static EXPERIMENT_FILENAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static pattern"));

/// A structured error attached to a catalog entry.
///
/// These are recoverable: a broken experiment stays in the catalog (so
/// subscribers can display it) but cannot be run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentError {
    pub title: String,
    pub details: String,
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Root-relative path of the definition file; unique.
    pub key: String,
    /// Logical experiment name declared in the definition. Must be unique
    /// across the catalog; collisions surface as a [`ExperimentError`].
    #[serde(default)]
    pub name: String,
    /// Declared required parameter names, hidden ones excluded.
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Resource path -> on-disk existence.
    #[serde(default)]
    pub resources: BTreeMap<String, bool>,
    /// Errors accumulated while loading or validating the entry.
    #[serde(default)]
    pub errors: Vec<ExperimentError>,
}

impl Experiment {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: String::new(),
            parameters: Vec::new(),
            resources: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    /// An experiment with any recorded error cannot be run.
    pub fn is_broken(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Insert or refresh the error with the given title.
    ///
    /// Returns whether the error set actually changed, so callers can decide
    /// whether a broadcast is warranted.
    pub fn set_error(&mut self, title: &str, details: impl Into<String>) -> bool {
        let details = details.into();
        if let Some(existing) = self.errors.iter_mut().find(|e| e.title == title) {
            if existing.details == details {
                return false;
            }
            existing.details = details;
            return true;
        }
        self.errors.push(ExperimentError {
            title: title.to_string(),
            details,
        });
        true
    }

    /// Remove the error with the given title, if present.
    pub fn clear_error(&mut self, title: &str) -> bool {
        let before = self.errors.len();
        self.errors.retain(|e| e.title != title);
        self.errors.len() != before
    }
}

/// A participant record: the next unused session number for a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    #[serde(rename = "nextSession")]
    pub next_session: i64,
}

impl Participant {
    pub fn new(name: impl Into<String>, next_session: i64) -> Self {
        Self {
            name: name.into(),
            next_session,
        }
    }

    /// Monotonic update: only applies when `next_session` strictly grows.
    ///
    /// Returns whether the record changed.
    pub fn update(&mut self, next_session: i64) -> bool {
        if next_session <= self.next_session {
            return false;
        }
        self.next_session = next_session;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_update_is_monotonic() {
        let mut p = Participant::new("Lolo", 1);
        assert!(p.update(3));
        assert!(!p.update(2));
        assert!(!p.update(3));
        assert_eq!(p.next_session, 3);
        assert!(p.update(4));
        assert_eq!(p.next_session, 4);
    }

    #[test]
    fn set_error_reports_changes_only() {
        let mut e = Experiment::new("a.psyexp");
        assert!(e.set_error("load error", "bad file"));
        assert!(!e.set_error("load error", "bad file"));
        assert!(e.set_error("load error", "worse file"));
        assert!(e.is_broken());
        assert!(e.clear_error("load error"));
        assert!(!e.clear_error("load error"));
        assert!(!e.is_broken());
    }

    #[test]
    fn participant_name_pattern_forbids_underscore() {
        assert!(PARTICIPANT_NAME_PATTERN.is_match("Lolo-2"));
        assert!(!PARTICIPANT_NAME_PATTERN.is_match("Lo_lo"));
        assert!(!PARTICIPANT_NAME_PATTERN.is_match(""));
    }
}
