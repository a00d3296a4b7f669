//! Sparse authoritative overrides: per-edge kinds and per-cell metadata.
//!
//! Overlay rows always win over generated base. Edge writes are symmetric:
//! writing (x, y, dir) also writes the mirror row on the neighbor cell, so the
//! edge reads the same from both sides no matter which key a caller uses.
//! Writes are idempotent given the same arguments; the row timestamp is
//! refreshed on every write.

use std::collections::HashMap;
use std::path::PathBuf;

use delveproto::kinds::{CellKind, Dir, EdgeKind};
use serde::{Deserialize, Serialize};

use crate::journal::Journal;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockMeta {
    pub difficulty: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_entity: Option<String>,
    #[serde(default)]
    pub locked_on_reset: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeMeta {
    #[serde(default)]
    pub frontier: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockMeta>,
}

impl EdgeMeta {
    pub fn frontier() -> Self {
        Self {
            frontier: true,
            lock: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeOverride {
    pub kind: EdgeKind,
    pub meta: EdgeMeta,
    pub updated_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellMeta {
    pub kind: CellKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

/// One journaled write. Metadata rides as raw JSON so a malformed row degrades
/// to "no override" on replay instead of poisoning the whole store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OverlayEntry {
    Edge {
        level: i32,
        x: i64,
        y: i64,
        dir: Dir,
        kind: EdgeKind,
        meta: serde_json::Value,
    },
    Cell {
        level: i32,
        x: i64,
        y: i64,
        meta: serde_json::Value,
    },
}

#[derive(Debug)]
pub struct OverlayStore {
    edges: HashMap<(i32, i64, i64, Dir), EdgeOverride>,
    cells: HashMap<(i32, i64, i64), CellMeta>,
    journal: Option<Journal<OverlayEntry>>,
}

impl OverlayStore {
    pub fn in_memory() -> Self {
        Self {
            edges: HashMap::new(),
            cells: HashMap::new(),
            journal: None,
        }
    }

    /// Open with a JSONL journal, replaying every prior write.
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let (journal, replay) = Journal::open(path)?;
        let mut store = Self {
            edges: HashMap::new(),
            cells: HashMap::new(),
            journal: Some(journal),
        };
        for env in replay {
            store.apply(env.entry, env.ms);
        }
        Ok(store)
    }

    pub fn edge(&self, level: i32, x: i64, y: i64, dir: Dir) -> Option<&EdgeOverride> {
        self.edges.get(&(level, x, y, dir))
    }

    pub fn cell(&self, level: i32, x: i64, y: i64) -> Option<&CellMeta> {
        self.cells.get(&(level, x, y))
    }

    /// Write an edge and its mirror on the neighbor cell, both carrying the
    /// same kind and metadata.
    pub fn write_edge_both_ways(
        &mut self,
        level: i32,
        x: i64,
        y: i64,
        dir: Dir,
        kind: EdgeKind,
        meta: EdgeMeta,
        now_ms: u64,
    ) -> anyhow::Result<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(
                now_ms,
                OverlayEntry::Edge {
                    level,
                    x,
                    y,
                    dir,
                    kind,
                    meta: serde_json::to_value(&meta)?,
                },
            )?;
        }
        self.apply_edge(level, x, y, dir, kind, meta, now_ms);
        Ok(())
    }

    pub fn write_cell(
        &mut self,
        level: i32,
        x: i64,
        y: i64,
        meta: CellMeta,
        now_ms: u64,
    ) -> anyhow::Result<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(
                now_ms,
                OverlayEntry::Cell {
                    level,
                    x,
                    y,
                    meta: serde_json::to_value(&meta)?,
                },
            )?;
        }
        self.cells.insert((level, x, y), meta);
        Ok(())
    }

    fn apply(&mut self, entry: OverlayEntry, ms: u64) {
        match entry {
            OverlayEntry::Edge {
                level,
                x,
                y,
                dir,
                kind,
                meta,
            } => {
                // Malformed metadata means no override at all.
                let Ok(meta) = serde_json::from_value::<EdgeMeta>(meta) else {
                    return;
                };
                self.apply_edge(level, x, y, dir, kind, meta, ms);
            }
            OverlayEntry::Cell { level, x, y, meta } => {
                let Ok(meta) = serde_json::from_value::<CellMeta>(meta) else {
                    return;
                };
                self.cells.insert((level, x, y), meta);
            }
        }
    }

    fn apply_edge(
        &mut self,
        level: i32,
        x: i64,
        y: i64,
        dir: Dir,
        kind: EdgeKind,
        meta: EdgeMeta,
        now_ms: u64,
    ) {
        let (nx, ny) = dir.step(x, y);
        let row = EdgeOverride {
            kind,
            meta,
            updated_ms: now_ms,
        };
        self.edges.insert((level, nx, ny, dir.opposite()), row.clone());
        self.edges.insert((level, x, y, dir), row);
    }
}
