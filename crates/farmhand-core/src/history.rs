//! Recency-ordered, capacity-bounded history log.
//!
//! The log doubles as the result cache: an entry is found by its
//! (image fingerprint, normalized question) key, and a hit moves the entry
//! to the front. Capacity is enforced only on insert, by dropping entries
//! from the back.

use chrono::{DateTime, Utc};
use farmhand_types::HistoryEntry;
use uuid::Uuid;

/// Number of entries kept when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 20;

/// Case-fold and trim a question for cache matching.
pub fn normalize_question(question: &str) -> String {
    question.trim().to_lowercase()
}

/// History entries, most recently touched first.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    capacity: usize,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl HistoryLog {
    /// Create an empty log. A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Rebuild a log from persisted entries.
    ///
    /// Entries are taken in stored order; later duplicates of a key are
    /// dropped and the result is cut to capacity.
    pub fn from_entries(entries: Vec<HistoryEntry>, capacity: usize) -> Self {
        let mut log = Self::with_capacity(capacity);
        for entry in entries {
            if log.entries.len() == log.capacity {
                break;
            }
            if log.position_of_key(&entry.image_fingerprint, &entry.question).is_none() {
                log.entries.push(entry);
            }
        }
        log
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, most recent first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn get(&self, id: Uuid) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Exact match on fingerprint and normalized question.
    pub fn lookup(&self, fingerprint: &str, question: &str) -> Option<&HistoryEntry> {
        self.position_of_key(fingerprint, question)
            .map(|idx| &self.entries[idx])
    }

    /// Move an entry to the front and refresh its touch time.
    ///
    /// Returns the promoted entry, or `None` if the id is unknown.
    pub fn promote(&mut self, id: Uuid) -> Option<&HistoryEntry> {
        let idx = self.entries.iter().position(|e| e.id == id)?;
        let touched = self.next_touch();
        let mut entry = self.entries.remove(idx);
        entry.last_touched_at = touched;
        self.entries.insert(0, entry);
        self.entries.first()
    }

    /// Put an entry at the front, evicting from the back past capacity.
    ///
    /// An existing entry with the same key is replaced. Returns every
    /// entry that left the log.
    pub fn insert(&mut self, mut entry: HistoryEntry) -> Vec<HistoryEntry> {
        let mut removed = Vec::new();
        if let Some(idx) = self.position_of_key(&entry.image_fingerprint, &entry.question) {
            removed.push(self.entries.remove(idx));
        }

        entry.last_touched_at = self.next_touch();
        self.entries.insert(0, entry);

        if self.entries.len() > self.capacity {
            removed.extend(self.entries.drain(self.capacity..));
        }
        removed
    }

    /// Remove an entry by id. Absent ids are a no-op.
    pub fn delete_by_id(&mut self, id: Uuid) -> Option<HistoryEntry> {
        let idx = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(idx))
    }

    fn position_of_key(&self, fingerprint: &str, question: &str) -> Option<usize> {
        let question = normalize_question(question);
        self.entries.iter().position(|e| {
            e.image_fingerprint == fingerprint && normalize_question(&e.question) == question
        })
    }

    // Touch times never go backwards relative to the current front entry,
    // so timestamp order agrees with list order even on coarse clocks.
    fn next_touch(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.entries.first() {
            Some(front) if front.last_touched_at > now => front.last_touched_at,
            _ => now,
        }
    }
}
