use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::Participant;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Participants,
    Results,
    LastDraw,
}

impl Slot {
    pub fn key(self) -> &'static str {
        match self {
            Slot::Participants => "secret-santa:people",
            Slot::Results => "secret-santa:results",
            Slot::LastDraw => "secret-santa:lastDrawList",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedState {
    pub participants: Vec<Participant>,
    pub results: Vec<String>,
    pub last_draw: Vec<Participant>,
}

pub struct Persistence<S> {
    store: S,
}

impl<S: KeyValueStore> Persistence<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reads all three slots, upgrading a legacy results slot in place.
    pub fn load(&mut self) -> SavedState {
        let participants = self.read(Slot::Participants).map(string_entries);
        let last_draw = self.read(Slot::LastDraw).map(string_entries);

        let raw_results = self.read_raw(Slot::Results);
        let results = raw_results
            .as_deref()
            .and_then(parse)
            .and_then(|value| normalize_results(&value));

        if let (Some(raw), Some(results)) = (raw_results.as_deref(), results.as_ref()) {
            match serde_json::to_string(results) {
                Ok(canonical) if canonical != raw => {
                    debug!(entries = results.len(), "rewriting legacy results slot");
                    self.write(Slot::Results.key(), &canonical);
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "failed to encode migrated results"),
            }
        }

        SavedState {
            participants: participants.unwrap_or_default(),
            results: results.unwrap_or_default(),
            last_draw: last_draw.unwrap_or_default(),
        }
    }

    pub fn save(&mut self, slot: Slot, values: &[String]) {
        match serde_json::to_string(values) {
            Ok(json) => self.write(slot.key(), &json),
            Err(err) => warn!(%err, key = slot.key(), "failed to encode slot"),
        }
    }

    pub fn save_all(&mut self, state: &SavedState) {
        self.save(Slot::Participants, &state.participants);
        self.save(Slot::Results, &state.results);
        self.save(Slot::LastDraw, &state.last_draw);
    }

    fn read(&self, slot: Slot) -> Option<Value> {
        self.read_raw(slot).as_deref().and_then(parse)
    }

    fn read_raw(&self, slot: Slot) -> Option<String> {
        match self.store.get(slot.key()) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, key = slot.key(), "storage read failed");
                None
            }
        }
    }

    fn write(&mut self, key: &str, value: &str) {
        if let Err(err) = self.store.set(key, value) {
            warn!(%err, key, "storage write failed; keeping state in memory");
        }
    }
}

fn parse(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(%err, "ignoring corrupt stored value");
            None
        }
    }
}

fn string_entries(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Older builds stored rendered nodes instead of strings; their text lives
/// under `props.children`. Returns `None` when nothing usable remains.
pub fn normalize_results(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    let out: Vec<String> = items.iter().filter_map(extract_text).collect();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn extract_text(item: &Value) -> Option<String> {
    let text = match item {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => item
            .pointer("/props/children")
            .or_else(|| item.get("children"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) => None,
    };
    text.filter(|t| !t.is_empty())
}
