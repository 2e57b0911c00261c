// src/runner/mod.rs

//! Single-consumer task queue bridging async callers and one worker thread.
//!
//! Every mutating operation on the session is packaged as a closure over the
//! worker-owned state `S` and enqueued here. The dedicated worker thread
//! drains the queue in strict FIFO order; it is the only thread that ever
//! touches `S` (and, through it, the blocking execution engine).
//!
//! A `None` enqueued value is the sentinel that makes the worker exit its
//! loop; this is the only supported shutdown path.

use std::sync::mpsc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::{Result, SessionError};

/// A unit of work executed on the worker thread.
pub type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Completion signal handed to each task closure.
///
/// A task may fulfill its caller's wait early (admission semantics): the run
/// task resolves its caller once the experiment slot is set and the blocking
/// engine call is about to begin. Whatever the closure returns afterwards
/// can no longer be delivered and is logged instead.
pub struct Completion<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
}

impl<T> Completion<T> {
    /// A completion nobody is waiting on (synchronous in-line execution).
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn fulfill(&mut self, result: Result<T>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(result);
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        self.tx.is_none()
    }
}

/// Awaitable handle for a submitted task.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Suspend until the worker signals completion, then return the worker's
    /// result or re-raise its error in the calling context.
    pub async fn join(self) -> Result<T> {
        match self.rx.await {
            Ok(result) => result,
            // Worker gone without answering: the queue was shut down.
            Err(_) => Err(SessionError::Closed),
        }
    }
}

/// Producer half of the task queue. Cheap to clone; every clone feeds the
/// same single consumer.
pub struct TaskRunner<S> {
    tx: mpsc::Sender<Option<Job<S>>>,
}

impl<S> Clone for TaskRunner<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: 'static> TaskRunner<S> {
    /// Create the queue. The receiver side must be handed to [`run_worker`]
    /// on a dedicated thread.
    pub fn channel() -> (Self, mpsc::Receiver<Option<Job<S>>>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    /// Enqueue a task bound to a fresh completion signal.
    ///
    /// The returned handle resolves with the closure's result, unless the
    /// closure fulfilled the completion early, in which case a later error
    /// is logged (it cannot be delivered twice).
    pub fn submit<T, F>(&self, f: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut S, &mut Completion<T>) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut completion = Completion { tx: Some(tx) };

        let job: Job<S> = Box::new(move |state| {
            let result = f(state, &mut completion);
            if completion.is_fulfilled() {
                if let Err(err) = result {
                    warn!(error = %err, "task failed after its completion was already delivered");
                }
            } else {
                completion.fulfill(result);
            }
        });

        self.tx
            .send(Some(job))
            .map_err(|_| SessionError::Closed)?;
        Ok(TaskHandle { rx })
    }

    /// Enqueue the shutdown sentinel. Tasks already queued still execute.
    pub fn shutdown(&self) {
        let _ = self.tx.send(None);
    }
}

/// Worker loop: drain the queue in FIFO order until the sentinel arrives.
///
/// Blocks in `recv` between tasks; tasks themselves may block (the engine
/// run call does). Owns `state` for its whole lifetime.
pub fn run_worker<S>(rx: mpsc::Receiver<Option<Job<S>>>, mut state: S) {
    debug!("session worker started");
    while let Ok(message) = rx.recv() {
        match message {
            Some(job) => job(&mut state),
            None => break,
        }
    }
    debug!("session worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Default)]
    struct Counter {
        history: Vec<u32>,
    }

    fn spawn_counter_worker() -> (TaskRunner<Counter>, thread::JoinHandle<()>) {
        let (runner, rx) = TaskRunner::<Counter>::channel();
        let worker = thread::spawn(move || run_worker(rx, Counter::default()));
        (runner, worker)
    }

    #[tokio::test]
    async fn tasks_execute_in_fifo_order() {
        let (runner, worker) = spawn_counter_worker();

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let handle = runner
                .submit(move |state: &mut Counter, _c| {
                    state.history.push(i);
                    Ok(i)
                })
                .unwrap();
            handles.push(handle);
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().await.unwrap(), i as u32);
        }

        let history = runner
            .submit(|state: &mut Counter, _c| Ok(state.history.clone()))
            .unwrap()
            .join()
            .await
            .unwrap();
        assert_eq!(history, (0..16).collect::<Vec<_>>());

        runner.shutdown();
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn errors_are_reraised_in_the_caller() {
        let (runner, worker) = spawn_counter_worker();

        let err = runner
            .submit(|_s: &mut Counter, _c: &mut Completion<()>| {
                Err(SessionError::NotRunning)
            })
            .unwrap()
            .join()
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotRunning));

        runner.shutdown();
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn early_completion_resolves_before_task_end() {
        let (runner, worker) = spawn_counter_worker();

        // The task fulfills at "admission" and then keeps going; the caller
        // resumes with the early value, and the later error is only logged.
        let value = runner
            .submit(|state: &mut Counter, c: &mut Completion<u32>| {
                c.fulfill(Ok(7));
                state.history.push(7);
                Err(SessionError::NotRunning)
            })
            .unwrap()
            .join()
            .await
            .unwrap();
        assert_eq!(value, 7);

        runner.shutdown();
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn queued_tasks_drain_before_shutdown() {
        let (runner, worker) = spawn_counter_worker();

        let handle = runner
            .submit(|state: &mut Counter, _c| {
                state.history.push(1);
                Ok(())
            })
            .unwrap();
        runner.shutdown();
        assert!(handle.join().await.is_ok());

        worker.join().unwrap();
        let err = runner
            .submit(|_s: &mut Counter, _c: &mut Completion<()>| Ok(()))
            .err();
        assert!(matches!(err, Some(SessionError::Closed)));
    }
}
