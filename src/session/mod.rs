// src/session/mod.rs

//! The session orchestrator.
//!
//! [`Session`] is the handle the transport layer talks to. Mutating
//! operations are packaged as closures and serialized onto one dedicated
//! worker thread through the [`crate::runner`] queue; run validation
//! ([`SharedState::prepare_run`]) executes on the calling context *before*
//! dispatch, so a second run attempt fails fast with a Conflict even while
//! the worker is blocked inside an experiment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use serde_json::json;
use tracing::{error, info};

use crate::broadcast::{Subscription, UpdateBroadcaster};
use crate::engine::{Engine, EngineStop};
use crate::errors::{Result, SessionError};
use crate::participants::{JsonFileStore, ParticipantRegistry, ParticipantStore};
use crate::runner::{run_worker, Completion, TaskRunner};
use crate::types::{Catalog, Parameters, Participant};
use crate::watch::{spawn_watcher, WatcherHandle};

mod catalog;
mod core;

pub(crate) use self::core::SessionCore;

/// Extension of experiment definition files, without the leading dot.
pub const EXPERIMENT_EXTENSION: &str = "psyexp";

/// Session directory layout and behaviour knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding the experiment definitions and their resources.
    pub root: PathBuf,
    /// Historical data root scanned for completed-session markers.
    /// Defaults to `<root>/data`.
    pub data_dir: Option<PathBuf>,
    /// Participant record file. Defaults to
    /// `<root>/.psysession/participants.json`.
    pub participants_file: Option<PathBuf>,
    /// Watch the root for definition/resource changes. On by default;
    /// tests that drive the session directly can switch it off.
    pub watch: bool,
}

impl SessionConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            data_dir: None,
            participants_file: None,
            watch: true,
        }
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn participants_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.participants_file = Some(file.into());
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }
}

/// State readable from any context. The worker thread is the single writer
/// of the catalog and the current-experiment slot.
#[derive(Clone)]
pub(crate) struct SharedState {
    pub(crate) root: PathBuf,
    pub(crate) catalog: Arc<Mutex<Catalog>>,
    pub(crate) current: Arc<Mutex<Option<String>>>,
    pub(crate) registry: ParticipantRegistry,
}

impl SharedState {
    pub(crate) fn lock_catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn lock_current(&self) -> MutexGuard<'_, Option<String>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validation phase of a run, always executed before dispatch and never
    /// mutating the catalog.
    ///
    /// The one side effect is deliberate: when both `participant` and
    /// `session` are supplied, the participant's next-session counter is
    /// advanced to `session + 1` right here, so the reservation survives
    /// even if the run is aborted between validation and dispatch. There is
    /// no compensating rollback.
    pub(crate) fn prepare_run(&self, key: &str, parameters: &Parameters) -> Result<()> {
        let catalog = self.lock_catalog();
        let experiment = catalog
            .get(key)
            .ok_or_else(|| SessionError::ExperimentNotFound(key.to_string()))?;

        if let Some(running) = self.lock_current().clone() {
            return Err(SessionError::AlreadyRunning(running));
        }
        if experiment.is_broken() {
            return Err(SessionError::ExperimentBroken(key.to_string()));
        }

        let mut missing: Vec<String> = experiment
            .parameters
            .iter()
            .filter(|p| !parameters.contains_key(*p))
            .cloned()
            .collect();
        missing.sort();
        if !missing.is_empty() {
            return Err(SessionError::MissingParameters(missing));
        }

        let unknown: Vec<String> = parameters
            .keys()
            .filter(|p| !experiment.parameters.contains(p))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(SessionError::UnknownParameters(unknown));
        }

        let missing_resources: Vec<String> = experiment
            .resources
            .iter()
            .filter(|(_, exists)| !**exists)
            .map(|(path, _)| path.clone())
            .collect();
        if !missing_resources.is_empty() {
            return Err(SessionError::ResourcesMissing {
                key: key.to_string(),
                missing: missing_resources,
            });
        }
        drop(catalog);

        let session = match parameters.get("session") {
            None => None,
            Some(value) => Some(
                value
                    .as_i64()
                    .filter(|s| *s >= 1)
                    .ok_or_else(|| SessionError::InvalidSession(value.to_string()))?,
            ),
        };
        if let (Some(participant), Some(session)) = (parameters.get("participant"), session) {
            let name = participant
                .as_str()
                .ok_or_else(|| SessionError::InvalidParticipantName(participant.to_string()))?;
            self.registry.set_session(name, session + 1)?;
        }

        Ok(())
    }
}

/// Handle over a running session. Dropping (or [`Session::close`]) shuts the
/// worker down.
pub struct Session {
    runner: TaskRunner<SessionCore>,
    shared: SharedState,
    updates: UpdateBroadcaster,
    stop: Arc<dyn EngineStop>,
    worker: Option<thread::JoinHandle<()>>,
    watcher: Option<WatcherHandle>,
}

impl Session {
    /// Start a session with participant records persisted as JSON under the
    /// session root.
    pub fn start(config: SessionConfig, engine: Box<dyn Engine>) -> Result<Session> {
        let participants_file = config
            .participants_file
            .clone()
            .unwrap_or_else(|| config.root.join(".psysession").join("participants.json"));
        Self::start_with_store(config, engine, Box::new(JsonFileStore::new(participants_file)))
    }

    /// Start a session with an explicit participant store.
    pub fn start_with_store(
        config: SessionConfig,
        engine: Box<dyn Engine>,
        store: Box<dyn ParticipantStore>,
    ) -> Result<Session> {
        let root = config.root.canonicalize()?;
        let data_dir = config.data_dir.unwrap_or_else(|| root.join("data"));
        info!(root = ?root, "starting session");

        let updates = UpdateBroadcaster::new();
        // Seed every topic so the first subscriber never sees a void state.
        updates.broadcast("experiment", json!(""));
        updates.broadcast("window", json!(false));
        updates.broadcast("catalog", json!({}));

        let registry = ParticipantRegistry::new(store, &data_dir, updates.clone());
        let shared = SharedState {
            root: root.clone(),
            catalog: Arc::new(Mutex::new(Catalog::new())),
            current: Arc::new(Mutex::new(None)),
            registry,
        };

        let stop = engine.stop_handle();
        let core = SessionCore::new(shared.clone(), engine, updates.clone());

        let (runner, rx) = TaskRunner::channel();
        let worker = thread::Builder::new()
            .name("session-worker".to_string())
            .spawn(move || run_worker(rx, core))?;

        // Initial catalog fill goes through the queue like everything else.
        runner.submit(|core: &mut SessionCore, _c: &mut Completion<()>| {
            core.scan_existing();
            Ok(())
        })?;

        let watcher = if config.watch {
            Some(spawn_watcher(root, runner.clone())?)
        } else {
            None
        };

        Ok(Session {
            runner,
            shared,
            updates,
            stop,
            worker: Some(worker),
            watcher,
        })
    }

    /// Snapshot of the live catalog.
    pub fn experiments(&self) -> Catalog {
        self.shared.lock_catalog().clone()
    }

    /// Key of the in-flight experiment, if any.
    pub fn current_experiment(&self) -> Option<String> {
        self.shared.lock_current().clone()
    }

    pub fn participants(&self) -> BTreeMap<String, Participant> {
        self.shared.registry.snapshot()
    }

    pub fn participant(&self, name: &str) -> Result<Participant> {
        self.shared.registry.get(name)
    }

    /// Advance a participant's next-session counter directly.
    pub fn set_participant_session(&self, name: &str, session: i64) -> Result<()> {
        self.shared.registry.set_session(name, session)
    }

    /// Subscribe to the update stream: full replay of every topic, then live
    /// deltas.
    pub fn updates(&self) -> Subscription {
        self.updates.updates()
    }

    /// Load (or reload) an experiment definition. `file` is resolved against
    /// the session root; `key` defaults to the root-relative path.
    pub async fn add_experiment(&self, file: impl AsRef<Path>, key: Option<&str>) -> Result<()> {
        let file = file.as_ref().to_path_buf();
        let key = key.map(str::to_string);
        self.runner
            .submit(move |core: &mut SessionCore, _c| {
                core.add_experiment(&file, key.as_deref())
            })?
            .join()
            .await
    }

    pub async fn remove_experiment(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.runner
            .submit(move |core: &mut SessionCore, _c| core.remove_experiment(&key))?
            .join()
            .await
    }

    pub async fn open_window(&self) -> Result<()> {
        self.runner
            .submit(|core: &mut SessionCore, _c| core.open_window())?
            .join()
            .await
    }

    /// Fails fast while an experiment is running instead of queueing behind
    /// the blocked worker; the core re-checks on execution.
    pub async fn close_window(&self) -> Result<()> {
        if let Some(running) = self.shared.lock_current().clone() {
            return Err(SessionError::AlreadyRunning(running));
        }
        self.runner
            .submit(|core: &mut SessionCore, _c| core.close_window())?
            .join()
            .await
    }

    /// Re-check dependency validity after the given paths changed.
    pub async fn validate_resources(&self, paths: Vec<PathBuf>) -> Result<()> {
        self.runner
            .submit(move |core: &mut SessionCore, _c| core.validate_resources(&paths))?
            .join()
            .await
    }

    /// Validate and admit a run.
    ///
    /// Resolves at admission: once the window is open, the slot is set and
    /// the blocking engine call has begun — not when the experiment ends.
    /// Validation happens on the calling context before dispatch, so a
    /// conflicting concurrent run fails immediately.
    pub async fn run_experiment(&self, key: &str, parameters: Parameters) -> Result<()> {
        self.shared.prepare_run(key, &parameters)?;
        let key = key.to_string();
        self.runner
            .submit(move |core: &mut SessionCore, completion| {
                core.execute_run(&key, &parameters, completion)
            })?
            .join()
            .await
    }

    /// Cooperatively stop the in-flight experiment.
    ///
    /// This does not go through the task queue — the worker is blocked inside
    /// the run — and it does not clear the slot; the run's completion path
    /// does.
    pub fn stop_experiment(&self) -> Result<()> {
        if self.shared.lock_current().is_none() {
            return Err(SessionError::NotRunning);
        }
        self.stop.stop();
        Ok(())
    }

    /// Stop watching, drain the task queue, release the engine and terminate
    /// every subscription. Idempotent; operations after this fail with
    /// [`SessionError::Closed`].
    pub fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        info!("closing session");
        self.watcher = None;

        // Best effort: unblock the worker if an experiment is in flight.
        if self.shared.lock_current().is_some() {
            self.stop.stop();
        }

        let _ = self
            .runner
            .submit(|core: &mut SessionCore, _c: &mut Completion<()>| {
                core.shutdown_engine();
                Ok(())
            });
        self.runner.shutdown();
        if worker.join().is_err() {
            error!("session worker panicked");
        }
        self.updates.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
