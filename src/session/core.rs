// src/session/core.rs

//! Worker-thread side of the session orchestrator.
//!
//! `SessionCore` is owned by the single worker thread; every method here is
//! a synchronous surface, invoked either in-line by another core method or
//! through a closure submitted on the task queue. Nothing outside the worker
//! thread ever calls into the engine, except the thread-safe stop signal.

use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::deps::DependencyTracker;
use crate::engine::Engine;
use crate::errors::{Result, SessionError};
use crate::runner::Completion;
use crate::types::{Experiment, Parameters};
use crate::watch::relative_str;
use crate::UpdateBroadcaster;

use super::catalog::{
    refresh_duplicate_names, valid_experiment_filename, INVALID_FILENAME_ERROR, LOAD_ERROR,
};
use super::{SharedState, EXPERIMENT_EXTENSION};

/// Declared parameters carrying this marker are managed internally by the
/// engine and hidden from callers.
const HIDDEN_PARAMETER_MARKER: &str = "|hid";

pub(crate) struct SessionCore {
    shared: SharedState,
    engine: Box<dyn Engine>,
    tracker: DependencyTracker,
    updates: UpdateBroadcaster,
    window_open: bool,
}

impl SessionCore {
    pub(crate) fn new(
        shared: SharedState,
        engine: Box<dyn Engine>,
        updates: UpdateBroadcaster,
    ) -> Self {
        let tracker = DependencyTracker::new(shared.root.clone());
        Self {
            shared,
            engine,
            tracker,
            updates,
            window_open: false,
        }
    }

    /// Load (or reload) one experiment definition into the catalog.
    ///
    /// Load failures never propagate: the catalog still gets an entry, marked
    /// broken, so one bad definition cannot hide the others.
    pub(crate) fn add_experiment(&mut self, file: &Path, key: Option<&str>) -> Result<()> {
        let file = if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.shared.root.join(file)
        };
        let key = match key {
            Some(key) => key.to_string(),
            None => relative_str(&self.shared.root, &file)
                .unwrap_or_else(|| file.to_string_lossy().into_owned()),
        };

        let mut experiment = Experiment::new(&key);
        if !valid_experiment_filename(&file) {
            experiment.set_error(
                INVALID_FILENAME_ERROR,
                format!("{:?} is not an identifier-safe file name", file.file_name()),
            );
            self.tracker.remove_dependencies(&key);
        } else {
            match self.engine.load(&file, &key) {
                Ok(loaded) => {
                    experiment.name = loaded.name;
                    experiment.parameters = loaded
                        .parameters
                        .into_iter()
                        .filter(|p| !p.ends_with(HIDDEN_PARAMETER_MARKER))
                        .collect();
                    experiment.resources = self
                        .tracker
                        .add_dependencies(&key, loaded.resources)
                        .resources()
                        .clone();
                }
                Err(err) => {
                    warn!(key, error = %err, "experiment definition failed to load");
                    experiment.set_error(LOAD_ERROR, format!("{err:#}"));
                    self.tracker.remove_dependencies(&key);
                }
            }
        }

        info!(key, broken = experiment.is_broken(), "experiment added to catalog");
        let mut catalog = self.shared.lock_catalog();
        catalog.insert(key.clone(), experiment);
        let changed = refresh_duplicate_names(&mut catalog);

        self.updates
            .broadcast_entry("catalog", &key, json!(catalog[&key]));
        for other in changed.iter().filter(|k| **k != key) {
            self.updates
                .broadcast_entry("catalog", other, json!(catalog[other]));
        }
        Ok(())
    }

    pub(crate) fn remove_experiment(&mut self, key: &str) -> Result<()> {
        let mut catalog = self.shared.lock_catalog();
        if catalog.remove(key).is_none() {
            return Err(SessionError::ExperimentNotFound(key.to_string()));
        }
        self.tracker.remove_dependencies(key);
        let changed = refresh_duplicate_names(&mut catalog);

        info!(key, "experiment removed from catalog");
        self.updates
            .broadcast_entry("catalog", key, serde_json::Value::Null);
        for other in &changed {
            self.updates
                .broadcast_entry("catalog", other, json!(catalog[other]));
        }
        Ok(())
    }

    /// Idempotent: no-op when the window is already open.
    pub(crate) fn open_window(&mut self) -> Result<()> {
        if self.window_open {
            return Ok(());
        }
        self.engine.open_window()?;
        self.window_open = true;
        self.updates.broadcast("window", json!(true));
        Ok(())
    }

    pub(crate) fn close_window(&mut self) -> Result<()> {
        if let Some(running) = self.shared.lock_current().clone() {
            return Err(SessionError::AlreadyRunning(running));
        }
        if !self.window_open {
            return Err(SessionError::WindowNotOpen);
        }
        self.engine.close_window()?;
        self.window_open = false;
        self.updates.broadcast("window", json!(false));
        Ok(())
    }

    /// Admit and run one prepared experiment to completion.
    ///
    /// Validation ([`SharedState::prepare_run`]) already happened before this
    /// task was dispatched; the slot check here only guards the admission
    /// race between two callers that both validated against an idle session.
    ///
    /// The caller's wait is fulfilled at admission, once the slot is set and
    /// the blocking engine call is about to begin; whatever the engine
    /// returns afterwards can only be logged.
    pub(crate) fn execute_run(
        &mut self,
        key: &str,
        parameters: &Parameters,
        completion: &mut Completion<()>,
    ) -> Result<()> {
        if let Some(running) = self.shared.lock_current().clone() {
            return Err(SessionError::AlreadyRunning(running));
        }
        self.open_window()?;
        // Only this thread writes the slot, so the re-check above still holds.
        *self.shared.lock_current() = Some(key.to_string());
        self.updates.broadcast("experiment", json!(key));
        debug!(key, "experiment admitted");
        completion.fulfill(Ok(()));

        let result = self.engine.run(key, parameters);

        *self.shared.lock_current() = None;
        self.updates.broadcast("experiment", json!(""));
        match &result {
            Ok(()) => info!(key, "experiment completed"),
            Err(err) => warn!(key, error = %err, "experiment run failed"),
        }
        result
    }

    /// Revalidate every collection that depends on one of `paths` and emit
    /// one coalesced `catalog` broadcast for the entries whose validity
    /// flipped.
    pub(crate) fn validate_resources(&mut self, paths: &[PathBuf]) -> Result<()> {
        let flipped = self.tracker.validate(paths);
        if flipped.is_empty() {
            return Ok(());
        }

        let mut catalog = self.shared.lock_catalog();
        let mut entries = serde_json::Map::new();
        for key in &flipped {
            let Some(experiment) = catalog.get_mut(key) else {
                continue;
            };
            if let Some(collection) = self.tracker.collection(key) {
                experiment.resources = collection.resources().clone();
                entries.insert(key.clone(), json!(experiment));
            }
        }
        drop(catalog);

        debug!(keys = ?flipped, "resource validity changed");
        self.updates.broadcast_entries("catalog", entries);
        Ok(())
    }

    /// Initial catalog fill: recursively pick up every existing definition
    /// file under the root.
    pub(crate) fn scan_existing(&mut self) {
        let mut files = Vec::new();
        let mut pending = vec![self.shared.root.clone()];
        while let Some(dir) = pending.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().and_then(|e| e.to_str())
                    == Some(EXPERIMENT_EXTENSION)
                {
                    files.push(path);
                }
            }
        }
        files.sort();

        info!(count = files.len(), "scanning existing experiment definitions");
        for file in files {
            if let Err(err) = self.add_experiment(&file, None) {
                warn!(file = ?file, error = %err, "could not add experiment at startup");
            }
        }
    }

    pub(crate) fn shutdown_engine(&mut self) {
        self.engine.shutdown();
    }
}
