//! Core engine for the Reactor notebook kernel.
//!
//! This crate provides:
//! - Cell registry and incremental name-based dependency graph
//! - Staleness propagation in topological order
//! - Batch scheduler with failure, interrupt and lazy-mode semantics
//! - Per-cell execution contexts multiplexing console I/O onto one stream
//! - Post-mortem debug hook
//! - A reference script language implementing the analyzer and runtime seams

pub mod config;
pub mod context;
pub mod debug;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod registry;
pub mod runtime;
pub mod script;
pub mod stream;

pub use config::{ExecutionMode, KernelConfig};
pub use context::{ContextGuard, ExecutionContext, InputBroker, InterruptHandle};
pub use debug::{Debugger, PostMortem};
pub use error::{CellFailure, Error, ErrorKind, Result};
pub use graph::DependencyGraph;
pub use kernel::{BatchReport, Kernel, KernelHandle, Scheduler};
pub use registry::{Cell, CellId, CellRegistry, CellStatus, NameSet};
pub use runtime::{Analysis, Analyzer, CellRuntime, ExecutionRequest};
pub use script::{ScriptAnalyzer, ScriptRuntime};
pub use stream::{OutputMessage, Stream, StreamReceiver};
