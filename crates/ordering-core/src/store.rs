//! ============================================================================
//! Session Stores - bounded log and transcript sequences
//! ============================================================================
//! Both stores are append-only with a cap: once full, the oldest entry is
//! dropped first. They live for one desk and are cleared by the desk on
//! call boundaries.
//! ============================================================================

use std::collections::VecDeque;

use serde::Serialize;

use crate::types::{LogEntry, LogKind, Role, TranscriptTurn};

/// Default number of log entries kept
pub const DEFAULT_LOG_CAP: usize = 50;

/// Default number of transcript turns kept
pub const DEFAULT_TRANSCRIPT_CAP: usize = 20;

/// Append-only ring of at most `cap` items
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct BoundedLog<T> {
    #[serde(skip)]
    cap: usize,
    items: VecDeque<T>,
}

impl<T> BoundedLog<T> {
    /// A cap of zero is treated as one
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            items: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, item: T) {
        while self.items.len() >= self.cap {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Admin log panel contents
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct LogStore {
    entries: BoundedLog<LogEntry>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::with_cap(DEFAULT_LOG_CAP)
    }
}

impl LogStore {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: BoundedLog::new(cap),
        }
    }

    /// Append an entry stamped with a fresh id and the current time
    pub fn append(&mut self, kind: LogKind, message: impl Into<String>) {
        let entry = LogEntry::new(kind, message);
        tracing::debug!("[{}] {}", entry.kind, entry.message);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.latest()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Final transcript turns for the current call
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct TranscriptStore {
    turns: BoundedLog<TranscriptTurn>,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::with_cap(DEFAULT_TRANSCRIPT_CAP)
    }
}

impl TranscriptStore {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            turns: BoundedLog::new(cap),
        }
    }

    /// Append a turn. Blank text is ignored; returns whether a turn was added.
    pub fn push(&mut self, role: Role, text: impl Into<String>) -> bool {
        let text = text.into();
        if text.trim().is_empty() {
            return false;
        }
        self.turns.push(TranscriptTurn { role, text });
        true
    }

    pub fn turns(&self) -> impl Iterator<Item = &TranscriptTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
