//! Cell registry: stable identifiers, current code and execution status.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Set of variable names, ordered for deterministic iteration.
pub type NameSet = BTreeSet<String>;

/// Opaque identifier of a cell, supplied by the front end.
///
/// Must stay stable across resubmissions of the same logical cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CellId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Cell execution status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    /// Registered but never scheduled.
    #[default]
    Idle,
    /// Waiting in the current batch.
    Queued,
    /// Body is executing.
    Running,
    /// Last run completed.
    Success,
    /// Last run failed.
    Error,
    /// Result may be outdated (ancestor changed or failed).
    Stale,
}

/// A notebook cell as known to the kernel.
#[derive(Debug, Clone)]
pub struct Cell {
    /// Stable identifier
    pub id: CellId,
    /// Current source text
    pub code: String,
    /// Current execution status
    pub status: CellStatus,
    /// Names defined by the last successfully analyzed code
    pub defines: NameSet,
    /// Names used by the last successfully analyzed code
    pub uses: NameSet,
    /// Registration index (insertion order)
    pub order: usize,
    /// Why the cell is stale, when it is stale because of a failure or an
    /// interruption. `None` for a plain "ancestor changed" stale.
    pub stale_reason: Option<ErrorKind>,
    /// Kind of the last failure, cleared on success
    pub last_error: Option<ErrorKind>,
    /// Number of times the body was entered
    pub run_count: u64,
}

/// Registry of all cells in the session, in registration order.
///
/// Not synchronized; only the execution thread touches it.
#[derive(Debug, Default)]
pub struct CellRegistry {
    cells: Vec<Cell>,
    index: FxHashMap<CellId, usize>,
}

impl CellRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a cell's code and reset its status to queued.
    pub fn register(&mut self, id: CellId, code: impl Into<String>) -> &Cell {
        let code = code.into();
        let slot = match self.index.get(&id) {
            Some(&slot) => {
                let cell = &mut self.cells[slot];
                cell.code = code;
                cell.status = CellStatus::Queued;
                cell.stale_reason = None;
                slot
            }
            None => {
                let slot = self.cells.len();
                self.index.insert(id.clone(), slot);
                self.cells.push(Cell {
                    id,
                    code,
                    status: CellStatus::Queued,
                    defines: NameSet::new(),
                    uses: NameSet::new(),
                    order: slot,
                    stale_reason: None,
                    last_error: None,
                    run_count: 0,
                });
                slot
            }
        };
        &self.cells[slot]
    }

    /// Get a cell by ID.
    pub fn get(&self, id: &CellId) -> Result<&Cell> {
        self.index
            .get(id)
            .map(|&slot| &self.cells[slot])
            .ok_or_else(|| Error::CellNotFound(id.clone()))
    }

    /// Get a mutable reference to a cell by ID.
    pub fn get_mut(&mut self, id: &CellId) -> Result<&mut Cell> {
        match self.index.get(id) {
            Some(&slot) => Ok(&mut self.cells[slot]),
            None => Err(Error::CellNotFound(id.clone())),
        }
    }

    pub fn contains(&self, id: &CellId) -> bool {
        self.index.contains_key(id)
    }

    /// Iterate cells in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Store the names reported by the analyzer for a cell.
    pub fn record_names(&mut self, id: &CellId, defines: NameSet, uses: NameSet) -> Result<()> {
        let cell = self.get_mut(id)?;
        cell.defines = defines;
        cell.uses = uses;
        Ok(())
    }

    /// Set a cell's status. Leaving `stale` clears the stale reason.
    pub fn set_status(&mut self, id: &CellId, status: CellStatus) -> Result<()> {
        let cell = self.get_mut(id)?;
        cell.status = status;
        if status != CellStatus::Stale {
            cell.stale_reason = None;
        }
        Ok(())
    }

    /// Mark a cell stale, optionally recording the failure that caused it.
    pub fn mark_stale(&mut self, id: &CellId, reason: Option<ErrorKind>) -> Result<()> {
        let cell = self.get_mut(id)?;
        cell.status = CellStatus::Stale;
        cell.stale_reason = reason;
        Ok(())
    }
}
