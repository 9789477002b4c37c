//! Gap-aware replicated log
//!
//! Every node (the coordinator and each replica) owns exactly one log.
//! Indices are issued by the coordinator only; a node's own appends never
//! rebind an index to a different payload. Divergence between nodes is
//! repaired exclusively through [`reconcile`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::watch;

/// One log position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub payload: String,
}

impl LogEntry {
    pub fn new(index: u64, payload: impl Into<String>) -> Self {
        Self {
            index,
            payload: payload.into(),
        }
    }

    /// Line shown by the read surfaces
    pub fn render(&self) -> String {
        format!("Message number - {}, message - {}", self.index, self.payload)
    }
}

/// Result of [`ReplicatedLog::append`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// Same index and payload already present
    Duplicate,
    /// Index bound to a different payload; nothing was written
    Conflict { existing: String },
    /// Index was deleted; it is never bound again
    Retired,
}

/// Ordered index → payload store.
///
/// Deleted indices are remembered as retired: they no longer carry a
/// payload but still count as present for [`is_contiguous`](Self::is_contiguous).
#[derive(Debug, Clone, Default)]
pub struct ReplicatedLog {
    entries: BTreeMap<u64, String>,
    retired: BTreeSet<u64>,
}

impl ReplicatedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, index: u64, payload: &str) -> AppendOutcome {
        if self.retired.contains(&index) {
            return AppendOutcome::Retired;
        }
        match self.entries.get(&index) {
            Some(existing) if existing == payload => AppendOutcome::Duplicate,
            Some(existing) => AppendOutcome::Conflict {
                existing: existing.clone(),
            },
            None => {
                self.entries.insert(index, payload.to_string());
                AppendOutcome::Inserted
            }
        }
    }

    /// Delete an index, returning its payload if it was live.
    pub fn retire(&mut self, index: u64) -> Option<String> {
        self.retired.insert(index);
        self.entries.remove(&index)
    }

    pub fn get(&self, index: u64) -> Option<&str> {
        self.entries.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First index never used by this log (live or retired).
    pub fn next_index(&self) -> u64 {
        let live = self.entries.keys().next_back().copied();
        let retired = self.retired.iter().next_back().copied();
        live.max(retired).map_or(0, |max| max + 1)
    }

    /// True iff the used indices form an unbroken range (or there are none).
    pub fn is_contiguous(&self) -> bool {
        let first_live = self.entries.keys().next().copied();
        let first_retired = self.retired.iter().next().copied();
        let min = match (first_live, first_retired) {
            (Some(live), Some(retired)) => live.min(retired),
            (Some(first), None) | (None, Some(first)) => first,
            (None, None) => return true,
        };
        // live and retired indices are disjoint
        let count = (self.entries.len() + self.retired.len()) as u64;
        self.next_index() - min == count
    }

    /// Live entries sorted by index
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries
            .iter()
            .map(|(index, payload)| LogEntry::new(*index, payload.clone()))
            .collect()
    }

    /// Live entries as an index → payload map (the sync wire form)
    pub fn to_map(&self) -> BTreeMap<u64, String> {
        self.entries.clone()
    }

    pub fn retired(&self) -> &BTreeSet<u64> {
        &self.retired
    }

    /// Install a merged log received from the coordinator.
    ///
    /// Every index in `retired` is retired locally. Every other merged key
    /// takes the merged value, unless this log retired it in the meantime.
    /// Local keys absent from the merge were appended after the snapshot
    /// was sent and are kept.
    pub fn adopt(&mut self, merged: BTreeMap<u64, String>, retired: &BTreeSet<u64>) {
        for index in retired {
            self.retire(*index);
        }
        for (index, payload) in merged {
            if !self.retired.contains(&index) {
                self.entries.insert(index, payload);
            }
        }
    }
}

/// Coordinator-biased merge of a replica's log into the coordinator's.
///
/// Keys both sides hold take the coordinator's payload, keys only the
/// coordinator holds are added, and keys only the replica holds are kept
/// unless the coordinator retired them.
pub fn reconcile(
    coordinator: &BTreeMap<u64, String>,
    retired: &BTreeSet<u64>,
    mut replica: BTreeMap<u64, String>,
) -> BTreeMap<u64, String> {
    replica.retain(|index, _| !retired.contains(index));
    for (index, payload) in coordinator {
        replica.insert(*index, payload.clone());
    }
    replica
}

/// A node's log behind a lock, with change notification for blocking readers.
#[derive(Clone)]
pub struct SharedLog {
    inner: Arc<RwLock<ReplicatedLog>>,
    changed: Arc<watch::Sender<u64>>,
}

impl Default for SharedLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedLog {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(ReplicatedLog::new())),
            changed: Arc::new(changed),
        }
    }

    fn bump(&self) {
        self.changed.send_modify(|version| *version += 1);
    }

    pub fn append(&self, entry: &LogEntry) -> AppendOutcome {
        let outcome = self.inner.write().append(entry.index, &entry.payload);
        if outcome == AppendOutcome::Inserted {
            self.bump();
        }
        outcome
    }

    /// Bind `payload` to the next free index; index issue and insert are atomic.
    pub fn append_next(&self, payload: &str) -> LogEntry {
        let entry = {
            let mut log = self.inner.write();
            let index = log.next_index();
            log.append(index, payload);
            LogEntry::new(index, payload)
        };
        self.bump();
        entry
    }

    pub fn retire(&self, index: u64) -> Option<String> {
        let removed = self.inner.write().retire(index);
        self.bump();
        removed
    }

    /// Retire `index` only if it holds a live entry, in one step.
    pub fn retire_live(&self, index: u64) -> Option<String> {
        let removed = {
            let mut log = self.inner.write();
            log.get(index)?;
            log.retire(index)
        };
        self.bump();
        removed
    }

    pub fn get(&self, index: u64) -> Option<String> {
        self.inner.read().get(index).map(str::to_string)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn is_contiguous(&self) -> bool {
        self.inner.read().is_contiguous()
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.inner.read().snapshot()
    }

    pub fn to_map(&self) -> BTreeMap<u64, String> {
        self.inner.read().to_map()
    }

    /// Live entries and retired indices, read under one lock
    pub fn sync_view(&self) -> (BTreeMap<u64, String>, BTreeSet<u64>) {
        let log = self.inner.read();
        (log.to_map(), log.retired().clone())
    }

    pub fn adopt(&self, merged: BTreeMap<u64, String>, retired: &BTreeSet<u64>) {
        self.inner.write().adopt(merged, retired);
        self.bump();
    }

    /// Wait until the log has no gaps, then return its snapshot.
    pub async fn wait_contiguous(&self) -> Vec<LogEntry> {
        let mut rx = self.changed.subscribe();
        loop {
            {
                let log = self.inner.read();
                if log.is_contiguous() {
                    return log.snapshot();
                }
            }
            if rx.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }
}
