//! Sliding Window Store
//!
//! Bounded, insertion-ordered snapshot history per symbol. Eviction is
//! purely by count (oldest first); time-based scans happen in the rules.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::market::Snapshot;

/// Default number of snapshots kept per symbol.
pub const DEFAULT_WINDOW_CAP: usize = 200;

// =============================================================================
// Sliding Window
// =============================================================================

/// A bounded FIFO of snapshots for one symbol.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    cap: usize,
    points: VecDeque<Snapshot>,
}

impl SlidingWindow {
    /// Create an empty window. A cap of zero is treated as one.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            points: VecDeque::with_capacity(cap.min(DEFAULT_WINDOW_CAP)),
        }
    }

    /// Append a snapshot, evicting the oldest beyond the cap.
    pub fn push(&mut self, snapshot: Snapshot) {
        self.points.push_back(snapshot);
        while self.points.len() > self.cap {
            self.points.pop_front();
        }
    }

    /// Number of snapshots held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the window holds no snapshots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn cap(&self) -> usize {
        self.cap
    }

    /// Most recent snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<&Snapshot> {
        self.points.back()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Snapshot> {
        self.points.iter()
    }

    /// Copy the window out, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Snapshot> {
        self.points.iter().cloned().collect()
    }
}

// =============================================================================
// Window Store
// =============================================================================

/// Per-symbol windows behind a single lock.
///
/// Appends for one symbol are serialized, so every caller observes a
/// window that grew by exactly its own snapshot.
#[derive(Debug)]
pub struct WindowStore {
    cap: usize,
    windows: Mutex<HashMap<String, SlidingWindow>>,
}

impl WindowStore {
    /// Create a store whose windows hold at most `cap` snapshots.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Append a snapshot and return a copy of the updated window.
    pub fn append(&self, snapshot: Snapshot) -> Vec<Snapshot> {
        let mut windows = self.windows.lock();
        let window = windows
            .entry(snapshot.symbol.clone())
            .or_insert_with(|| SlidingWindow::new(self.cap));
        window.push(snapshot);
        window.to_vec()
    }

    /// Current length of a symbol's window.
    #[must_use]
    pub fn len_of(&self, symbol: &str) -> usize {
        self.windows.lock().get(symbol).map_or(0, SlidingWindow::len)
    }

    /// Copy of a symbol's window, if any.
    #[must_use]
    pub fn snapshot_of(&self, symbol: &str) -> Option<Vec<Snapshot>> {
        self.windows.lock().get(symbol).map(SlidingWindow::to_vec)
    }
}

// =============================================================================
// Tests
// =============================================================================
