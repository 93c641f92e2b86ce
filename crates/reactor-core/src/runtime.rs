//! Seams to the language layer: static analysis and cell execution.

use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::error::CellFailure;
use crate::registry::{CellId, NameSet};

/// Names a piece of cell code defines and uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub defines: NameSet,
    pub uses: NameSet,
}

impl Analysis {
    pub fn new<D, U>(defines: D, uses: U) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        U: IntoIterator,
        U::Item: Into<String>,
    {
        Self {
            defines: defines.into_iter().map(Into::into).collect(),
            uses: uses.into_iter().map(Into::into).collect(),
        }
    }
}

/// Static analysis of cell code.
pub trait Analyzer: Send {
    /// Report the names `code` defines and uses, or a message explaining why
    /// it cannot be analyzed.
    fn analyze(&self, code: &str) -> std::result::Result<Analysis, String>;
}

impl<F> Analyzer for F
where
    F: Fn(&str) -> std::result::Result<Analysis, String> + Send,
{
    fn analyze(&self, code: &str) -> std::result::Result<Analysis, String> {
        self(code)
    }
}

/// Executes cell bodies against a shared namespace.
pub trait CellRuntime: Send {
    /// Run `code`, routing console I/O through `ctx`.
    fn execute(&mut self, code: &str, ctx: &ExecutionContext) -> std::result::Result<(), CellFailure>;

    /// Forget `names` before the cell that defines them runs again.
    fn retract(&mut self, _names: &NameSet) {}
}

/// A request to (re)run one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub cell_id: CellId,
    pub code: String,
}

impl ExecutionRequest {
    pub fn new(cell_id: impl Into<CellId>, code: impl Into<String>) -> Self {
        Self {
            cell_id: cell_id.into(),
            code: code.into(),
        }
    }
}
