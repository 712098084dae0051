//! Append-only audit trail. Every denial, violation, and internal error is
//! logged here with category and severity; [`sa_domain::trace::TraceEvent`]
//! is the same events' structured-logging face.

use std::collections::VecDeque;

use chrono::Utc;
use parking_lot::RwLock;
use sa_domain::audit::{AuditCategory, AuditEntry, AuditEntryBuilder, Outcome};
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 10_000;

pub struct AuditLog {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        AuditLog {
            entries: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn append(&self, builder: AuditEntryBuilder) -> AuditEntry {
        let entry = builder.build(Uuid::new_v4().to_string(), Utc::now());
        let mut entries = self.entries.write();
        entries.push_back(entry.clone());
        if entries.len() > self.capacity {
            entries.pop_front();
        }
        entry
    }

    pub fn list(&self) -> Vec<AuditEntry> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn list_for_actor(&self, actor_id: &str) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.actor_id == actor_id)
            .cloned()
            .collect()
    }

    pub fn count_by_outcome(&self, outcome: Outcome) -> usize {
        self.entries.read().iter().filter(|e| e.outcome == outcome).count()
    }

    pub fn count_by_category(&self, category: AuditCategory) -> usize {
        self.entries.read().iter().filter(|e| e.category == category).count()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
