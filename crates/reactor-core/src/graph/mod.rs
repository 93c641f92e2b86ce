//! Dependency graph over cells.
//!
//! This module provides:
//! - Incremental edge maintenance from each cell's defined and used names
//! - Shadowing of redefined names (the most recent definer wins)
//! - Ancestor/descendant queries
//! - Staleness propagation in topological order with cycle detection

mod dependency;
mod propagate;

pub use dependency::DependencyGraph;
