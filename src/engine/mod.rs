// src/engine/mod.rs

//! Execution-engine collaborator interface.
//!
//! The session core never renders, times or talks to hardware itself; it
//! drives an [`Engine`] implementation through this trait. Every method
//! except [`EngineStop::stop`] is only ever called from the worker thread,
//! mirroring the single-thread requirement of the underlying toolkit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::Result;
use crate::types::Parameters;

pub mod mock;

/// What the engine learned from parsing one experiment definition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadedExperiment {
    /// Logical experiment name declared in the definition.
    pub name: String,
    /// Declared parameter names, raw (hidden ones still carry their
    /// `|hid` marker; the catalog filters them out).
    pub parameters: Vec<String>,
    /// Resource files the experiment needs at run time.
    pub resources: Vec<PathBuf>,
}

/// Thread-safe cooperative stop signal.
///
/// The worker thread is blocked inside [`Engine::run`] while an experiment
/// is in flight, so stopping must reach the engine from another thread.
pub trait EngineStop: Send + Sync {
    fn stop(&self);
}

/// The blocking execution engine.
pub trait Engine: Send + 'static {
    /// Parse an experiment definition. Failures are recoverable: the caller
    /// records them as per-experiment errors instead of propagating.
    fn load(&mut self, file: &Path, key: &str) -> anyhow::Result<LoadedExperiment>;

    /// Open the stimulus window. Blocking; idempotency is handled by the
    /// caller.
    fn open_window(&mut self) -> Result<()>;

    fn close_window(&mut self) -> Result<()>;

    /// Run an experiment to completion. Blocks the worker thread for the
    /// whole run; returns early only through [`EngineStop::stop`].
    fn run(&mut self, key: &str, parameters: &Parameters) -> Result<()>;

    /// Handle used to signal a running experiment to stop, callable from any
    /// thread.
    fn stop_handle(&self) -> Arc<dyn EngineStop>;

    /// Release engine resources at session close.
    fn shutdown(&mut self) {}
}
