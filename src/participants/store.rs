// src/participants/store.rs

//! Durable participant-record storage.
//!
//! The registry loads the whole map once at construction and rewrites it in
//! full on every change; there is no append path.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::types::Participant;

/// Abstract storage for the name -> participant map.
pub trait ParticipantStore: Send {
    fn load(&self) -> Result<BTreeMap<String, Participant>>;
    fn save(&mut self, participants: &BTreeMap<String, Participant>) -> Result<()>;
}

/// Stores participants as one pretty-printed JSON file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParticipantStore for JsonFileStore {
    fn load(&self) -> Result<BTreeMap<String, Participant>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        info!(path = ?self.path, "loading participant records");
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading participant file {:?}", self.path))?;
        let values: BTreeMap<String, serde_json::Value> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing participant file {:?}", self.path))?;

        // One malformed record must not take the whole file down.
        let mut participants = BTreeMap::new();
        for (name, value) in values {
            match serde_json::from_value::<Participant>(value) {
                Ok(participant) => {
                    participants.insert(name, participant);
                }
                Err(err) => {
                    warn!(name, error = %err, "skipping invalid participant record");
                }
            }
        }
        Ok(participants)
    }

    fn save(&mut self, participants: &BTreeMap<String, Participant>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating participant directory {parent:?}"))?;
        }
        let raw = serde_json::to_string_pretty(participants)
            .context("serializing participant records")?;
        fs::write(&self.path, raw)
            .with_context(|| format!("writing participant file {:?}", self.path))?;
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: BTreeMap<String, Participant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(map: BTreeMap<String, Participant>) -> Self {
        Self { map }
    }
}

impl ParticipantStore for MemoryStore {
    fn load(&self) -> Result<BTreeMap<String, Participant>> {
        Ok(self.map.clone())
    }

    fn save(&mut self, participants: &BTreeMap<String, Participant>) -> Result<()> {
        self.map = participants.clone();
        Ok(())
    }
}
