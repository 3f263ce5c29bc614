// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::SystemTime;

/// Snapshot of one spooled file taken during a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogEntry {
    pub path: PathBuf,
    /// Index of the owning directory in the spool registry
    pub directory: usize,
    pub last_modified: SystemTime,
    pub size: u64,
}

/// Outcome of fitting a backlog into a byte quota.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    pub retained: Vec<BacklogEntry>,
    pub evicted: Vec<BacklogEntry>,
}

impl EvictionPlan {
    pub fn retained_bytes(&self) -> u64 {
        self.retained.iter().map(|entry| entry.size).sum()
    }
}

/// Every file that survived a sweep's retry pass, across all spool directories.
#[derive(Debug, Default)]
pub struct Backlog {
    entries: Vec<BacklogEntry>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: BacklogEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|entry| entry.size).sum()
    }

    pub fn entries(&self) -> &[BacklogEntry] {
        &self.entries
    }

    /// Orders entries by modification time, newest first. Equal timestamps keep their
    /// insertion order.
    pub fn sort_newest_first(&mut self) {
        self.entries
            .sort_by(|first, second| second.last_modified.cmp(&first.last_modified));
    }

    /// Walks the backlog newest first, keeping entries while their combined size fits in the
    /// quota. The first entry that does not fit and every older entry after it are evicted, so
    /// no evicted entry is ever newer than a retained one.
    pub fn plan_eviction(mut self, max_bytes: u64) -> EvictionPlan {
        self.sort_newest_first();

        let mut plan = EvictionPlan::default();
        let mut running_total: u64 = 0;
        let mut entries = self.entries.into_iter();
        for entry in entries.by_ref() {
            match running_total.checked_add(entry.size) {
                Some(total) if total <= max_bytes => {
                    running_total = total;
                    plan.retained.push(entry);
                }
                _ => {
                    plan.evicted.push(entry);
                    break;
                }
            }
        }
        plan.evicted.extend(entries);
        plan
    }
}
