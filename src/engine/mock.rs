// src/engine/mock.rs

//! Scriptable in-memory engine used by tests.
//!
//! `MockEngine` reads experiment definitions as small JSON documents:
//!
//! ```json
//! {"name": "blue", "parameters": ["participant", "session"], "resources": ["foo.png"]}
//! ```
//!
//! so integration tests can drop real `.psyexp` files into a tempdir and
//! exercise the full load/watch/run pipeline without any toolkit installed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use anyhow::Context;
use serde::Deserialize;

use crate::errors::Result;
use crate::types::Parameters;

use super::{Engine, EngineStop, LoadedExperiment};

#[derive(Debug, Deserialize)]
struct Definition {
    name: String,
    #[serde(default)]
    parameters: Vec<String>,
    #[serde(default)]
    resources: Vec<PathBuf>,
}

#[derive(Default)]
struct Gate {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn wait(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        while !*stopped {
            stopped = self
                .cv
                .wait(stopped)
                .unwrap_or_else(|e| e.into_inner());
        }
        *stopped = false;
    }

    fn open(&self) {
        *self.stopped.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.cv.notify_all();
    }
}

struct MockStop {
    gate: Arc<Gate>,
}

impl EngineStop for MockStop {
    fn stop(&self) {
        self.gate.open();
    }
}

/// Journal of every engine call, shared with the test body.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub struct MockEngine {
    calls: CallLog,
    gate: Arc<Gate>,
    /// When set, `run` blocks until `stop()` fires, like a real experiment.
    block_runs: bool,
}

impl MockEngine {
    /// Runs complete immediately.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            gate: Arc::new(Gate::default()),
            block_runs: false,
        }
    }

    /// Runs block until stopped, so tests can observe the in-flight state.
    pub fn blocking() -> Self {
        Self {
            block_runs: true,
            ..Self::new()
        }
    }

    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.into());
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MockEngine {
    fn load(&mut self, file: &Path, key: &str) -> anyhow::Result<LoadedExperiment> {
        self.record(format!("load {key}"));
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("reading experiment definition {file:?}"))?;
        let def: Definition = serde_json::from_str(&raw)
            .with_context(|| format!("parsing experiment definition {file:?}"))?;
        Ok(LoadedExperiment {
            name: def.name,
            parameters: def.parameters,
            resources: def.resources,
        })
    }

    fn open_window(&mut self) -> Result<()> {
        self.record("open_window");
        Ok(())
    }

    fn close_window(&mut self) -> Result<()> {
        self.record("close_window");
        Ok(())
    }

    fn run(&mut self, key: &str, _parameters: &Parameters) -> Result<()> {
        self.record(format!("run {key}"));
        if self.block_runs {
            self.gate.wait();
        }
        self.record(format!("run {key} done"));
        Ok(())
    }

    fn stop_handle(&self) -> Arc<dyn EngineStop> {
        Arc::new(MockStop {
            gate: Arc::clone(&self.gate),
        })
    }

    fn shutdown(&mut self) {
        self.record("shutdown");
    }
}
