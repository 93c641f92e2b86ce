//! The execution kernel.
//!
//! - [`Scheduler`] owns the registry and dependency graph and runs batches
//!   synchronously on the calling thread.
//! - [`Kernel`] hosts a scheduler on a dedicated thread fed by a command queue;
//!   [`KernelHandle`] is the cloneable way in.

mod handle;
mod scheduler;

pub use handle::{Kernel, KernelHandle};
pub use scheduler::{BatchReport, Scheduler};
