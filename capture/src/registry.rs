use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureId(Uuid);

impl CaptureId {
    fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CaptureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An open capture window: lines stamped at or after `opened_at` stay
/// buffered while it is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureEntry {
    pub id: CaptureId,
    pub opened_at: i64,
}

/// Live capture windows, keyed by id.
#[derive(Debug, Default)]
pub(crate) struct CaptureRegistry {
    live: Mutex<HashMap<CaptureId, CaptureEntry>>,
}

impl CaptureRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn live(&self) -> MutexGuard<'_, HashMap<CaptureId, CaptureEntry>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a window stamped by `stamp`, which runs under the registry lock
    /// so no eviction can compute a floor between the stamp and the insert.
    pub(crate) fn open(&self, stamp: impl FnOnce() -> i64) -> CaptureEntry {
        let mut live = self.live();
        let mut id = CaptureId::random();
        while live.contains_key(&id) {
            id = CaptureId::random();
        }
        let entry = CaptureEntry {
            id,
            opened_at: stamp(),
        };
        live.insert(id, entry.clone());
        entry
    }

    /// Removes the window. Unknown or already-closed ids are ignored.
    pub(crate) fn close(&self, entry: &CaptureEntry) -> bool {
        self.live().remove(&entry.id).is_some()
    }

    /// Snapshot of the live windows, oldest first.
    pub(crate) fn live_entries(&self) -> Vec<CaptureEntry> {
        let mut entries: Vec<CaptureEntry> = self.live().values().cloned().collect();
        entries.sort_by_key(|entry| entry.opened_at);
        entries
    }

    /// Runs `f` with the earliest `opened_at` among live windows while holding
    /// the registry lock, so no window can open until `f` returns.
    pub(crate) fn with_floor<R>(&self, f: impl FnOnce(Option<i64>) -> R) -> R {
        let live = self.live();
        f(live.values().map(|entry| entry.opened_at).min())
    }

    /// Closes every window opened before `cutoff` and returns them.
    pub(crate) fn close_opened_before(&self, cutoff: i64) -> Vec<CaptureEntry> {
        let mut live = self.live();
        let stale: Vec<CaptureId> = live
            .values()
            .filter(|entry| entry.opened_at < cutoff)
            .map(|entry| entry.id)
            .collect();
        stale.iter().filter_map(|id| live.remove(id)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.live().len()
    }
}
