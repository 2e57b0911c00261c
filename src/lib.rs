// src/lib.rs

//! Experiment session orchestration core.
//!
//! This crate coordinates a long-running experiment session:
//!
//! - it watches a session directory for experiment definition files
//!   (`*.psyexp`) and their declared resource files,
//! - it keeps a live catalog of which experiments are currently runnable,
//! - it serializes every run onto a single dedicated worker thread (the only
//!   thread allowed to call into the blocking execution engine),
//! - it broadcasts every state change to any number of subscribers as an
//!   ordered event stream with replay-on-subscribe.
//!
//! The HTTP transport, the execution engine itself and participant record
//! storage are external collaborators, expressed as the [`engine::Engine`]
//! and [`participants::ParticipantStore`] traits.

pub mod broadcast;
pub mod deps;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod participants;
pub mod runner;
pub mod session;
pub mod types;
pub mod watch;

pub use broadcast::{Subscription, UpdateBroadcaster, UpdateEvent};
pub use errors::{ErrorClass, Result, SessionError};
pub use session::{Session, SessionConfig};
pub use types::{Catalog, Experiment, ExperimentError, Parameters, Participant};
