// src/watch/mod.rs

//! Filesystem watcher bridge.
//!
//! Translates raw `notify` events into orchestrator calls: definition files
//! become add/remove-experiment tasks, every other path becomes a resource
//! revalidation. All of it is routed through the single-writer task queue,
//! so filesystem-triggered mutations serialize with every other mutation
//! instead of racing the worker thread.

use std::path::{Path, PathBuf};

use anyhow::Result;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::runner::{Completion, TaskRunner};
use crate::session::{SessionCore, EXPERIMENT_EXTENSION};

mod path_utils;

pub use path_utils::relative_str;

/// One translated filesystem change. A move is reported as a deletion of the
/// source plus a modification of the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathChange {
    Modified(PathBuf),
    Deleted(PathBuf),
}

/// Map a raw notify event onto [`PathChange`]s. Directory events and pure
/// access events carry no catalog-relevant information and are dropped.
pub fn classify(event: &Event) -> Vec<PathChange> {
    let mut changes = Vec::new();
    match &event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {}
        EventKind::Create(_) => {
            changes.extend(event.paths.iter().cloned().map(PathChange::Modified));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                changes.push(PathChange::Deleted(from.clone()));
                changes.push(PathChange::Modified(to.clone()));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            changes.extend(event.paths.iter().cloned().map(PathChange::Deleted));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            changes.extend(event.paths.iter().cloned().map(PathChange::Modified));
        }
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => {}
        EventKind::Modify(_) => {
            changes.extend(event.paths.iter().cloned().map(PathChange::Modified));
        }
        EventKind::Remove(_) => {
            changes.extend(event.paths.iter().cloned().map(PathChange::Deleted));
        }
        _ => {}
    }
    // Live directories slip through kinds like Modify(Any); drop them here.
    changes.retain(|c| match c {
        PathChange::Modified(p) => !p.is_dir(),
        PathChange::Deleted(_) => true,
    });
    changes
}

fn is_definition(rel: &str) -> bool {
    Path::new(rel).extension().and_then(|e| e.to_str()) == Some(EXPERIMENT_EXTENSION)
}

/// Route translated changes onto the task queue.
///
/// Paths that cannot be relativized against the root are logged and dropped;
/// the watch loop itself never fails.
pub(crate) fn dispatch_changes(
    root: &Path,
    runner: &TaskRunner<SessionCore>,
    changes: Vec<PathChange>,
) {
    let mut to_validate: Vec<PathBuf> = Vec::new();

    for change in changes {
        let (path, deleted) = match &change {
            PathChange::Modified(p) => (p, false),
            PathChange::Deleted(p) => (p, true),
        };
        let Some(rel) = relative_str(root, path) else {
            warn!(path = ?path, "watch event path escapes session root; dropping");
            continue;
        };

        if !is_definition(&rel) {
            to_validate.push(PathBuf::from(rel));
            continue;
        }

        debug!(rel, deleted, "definition file changed on disk");
        let submitted = if deleted {
            runner.submit(move |core: &mut SessionCore, _c: &mut Completion<()>| {
                if let Err(err) = core.remove_experiment(&rel) {
                    warn!(key = rel, error = %err, "watched definition could not be removed");
                }
                Ok(())
            })
        } else {
            runner.submit(move |core: &mut SessionCore, _c: &mut Completion<()>| {
                if let Err(err) = core.add_experiment(Path::new(&rel), None) {
                    warn!(key = rel, error = %err, "watched definition could not be added");
                }
                Ok(())
            })
        };
        if submitted.is_err() {
            // Queue shut down under us; nothing left to watch for.
            return;
        }
    }

    if !to_validate.is_empty() {
        let _ = runner.submit(move |core: &mut SessionCore, _c: &mut Completion<()>| {
            core.validate_resources(&to_validate)
        });
    }
}

/// Handle keeping the OS watcher alive. Dropping it stops file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Watch `root` recursively and feed every relevant change into the task
/// queue. The notify callback runs on the watcher's own thread; enqueueing
/// is a plain non-blocking channel send, so no async context is required
/// there.
pub(crate) fn spawn_watcher(
    root: PathBuf,
    runner: TaskRunner<SessionCore>,
) -> Result<WatcherHandle> {
    let callback_root = root.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let changes = classify(&event);
                if !changes.is_empty() {
                    dispatch_changes(&callback_root, &runner, changes);
                }
            }
            Err(err) => {
                warn!(error = %err, "file watch error");
            }
        },
        Config::default(),
    )?;

    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(root = ?root, "file watcher started");

    Ok(WatcherHandle { _inner: watcher })
}
