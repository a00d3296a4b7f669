//! The discovered-cell set: every cell any player has ever stepped onto.
//!
//! Shared across players, append-only from the core's point of view. The
//! minimap is cut from this set by a square-radius query.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::journal::Journal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryEntry {
    pub level: i32,
    pub x: i64,
    pub y: i64,
}

#[derive(Debug)]
pub struct DiscoveryStore {
    cells: HashMap<(i32, i64, i64), u64>,
    journal: Option<Journal<DiscoveryEntry>>,
}

impl DiscoveryStore {
    pub fn in_memory() -> Self {
        Self {
            cells: HashMap::new(),
            journal: None,
        }
    }

    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let (journal, replay) = Journal::open(path)?;
        let mut store = Self {
            cells: HashMap::new(),
            journal: Some(journal),
        };
        for env in replay {
            store.apply(env.entry, env.ms);
        }
        Ok(store)
    }

    /// Idempotent insert; the most recent timestamp wins on collision.
    pub fn mark(&mut self, level: i32, x: i64, y: i64, at_ms: u64) -> anyhow::Result<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(at_ms, DiscoveryEntry { level, x, y })?;
        }
        self.apply(DiscoveryEntry { level, x, y }, at_ms);
        Ok(())
    }

    pub fn is_discovered(&self, level: i32, x: i64, y: i64) -> bool {
        self.cells.contains_key(&(level, x, y))
    }

    /// All discovered cells with |x-cx| <= r and |y-cy| <= r on the level,
    /// ordered by (y asc, x asc).
    pub fn in_radius(&self, level: i32, cx: i64, cy: i64, r: i64) -> Vec<(i64, i64)> {
        let mut out: Vec<(i64, i64)> = self
            .cells
            .keys()
            .filter(|(l, x, y)| *l == level && (x - cx).abs() <= r && (y - cy).abs() <= r)
            .map(|(_, x, y)| (*x, *y))
            .collect();
        out.sort_unstable_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));
        out
    }

    fn apply(&mut self, entry: DiscoveryEntry, at_ms: u64) {
        let slot = self.cells.entry((entry.level, entry.x, entry.y)).or_insert(at_ms);
        *slot = (*slot).max(at_ms);
    }
}
