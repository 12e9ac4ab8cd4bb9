//! Observed device status.
//!
//! A [`StatusSnapshot`] is an ordered list of [`StatusEntry`] values, unique
//! by property name. Repeated updates to the same name replace the entry in
//! place so ordering is stable across cycles and notifications never grow the
//! list.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// Desired and reported value of one property.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct StatusEntry {
    /// Property name.
    pub name: String,
    /// Label of the value last written, empty for read and notify properties.
    pub desired: String,
    /// Value last observed on the peripheral.
    pub reported: String,
    /// When this entry was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Ordered status of all properties seen so far.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StatusSnapshot {
    /// Entries in first-seen order.
    pub properties: Vec<StatusEntry>,
}

impl StatusSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `name`, stamping it with the current time.
    pub fn upsert(&mut self, name: &str, desired: &str, reported: &str) {
        let entry = StatusEntry {
            name: name.to_string(),
            desired: desired.to_string(),
            reported: reported.to_string(),
            updated_at: Utc::now(),
        };

        match self.properties.iter_mut().find(|e| e.name == name) {
            Some(existing) => *existing = entry,
            None => self.properties.push(entry),
        }
    }

    /// Get the entry for a property.
    pub fn get(&self, name: &str) -> Option<&StatusEntry> {
        self.properties.iter().find(|e| e.name == name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Iterate over entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &StatusEntry> {
        self.properties.iter()
    }

    /// Property names in order.
    pub fn names(&self) -> Vec<&str> {
        self.properties.iter().map(|e| e.name.as_str()).collect()
    }
}

/// Synchronized owner of one resync cycle's snapshot.
///
/// Characteristic processing and notification handlers mutate the snapshot
/// from different tasks; all access goes through this lock, which is never
/// held across an await point.
#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    inner: Arc<Mutex<StatusSnapshot>>,
}

impl StatusStore {
    /// Create a store seeded with `snapshot`.
    pub fn new(snapshot: StatusSnapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(snapshot)),
        }
    }

    /// Insert or replace the entry for `name`.
    pub fn upsert(&self, name: &str, desired: &str, reported: &str) {
        self.inner.lock().upsert(name, desired, reported);
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock().clone()
    }

    /// Get a copy of the entry for a property.
    pub fn get(&self, name: &str) -> Option<StatusEntry> {
        self.inner.lock().get(name).cloned()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
