//! Kernel thread and its command queue.

use std::thread::JoinHandle;

use tokio::sync::mpsc;

use super::Scheduler;
use crate::config::KernelConfig;
use crate::context::{InputBroker, InterruptHandle};
use crate::error::{Error, Result};
use crate::runtime::ExecutionRequest;

/// Work items processed in order by the kernel thread.
#[derive(Debug)]
enum Command {
    Submit(Vec<ExecutionRequest>),
    RunStale,
    UpdateConfig(KernelConfig),
    Shutdown,
}

/// A scheduler running on its own thread.
pub struct Kernel {
    handle: KernelHandle,
    thread: JoinHandle<Scheduler>,
}

impl Kernel {
    /// Move `scheduler` onto a dedicated `reactor-kernel` thread.
    pub fn spawn(scheduler: Scheduler) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = KernelHandle {
            tx: tx.clone(),
            interrupt: scheduler.interrupt_handle(),
            input: scheduler.input_broker(),
        };

        // The loop only holds a weak sender for requeueing, so dropping every
        // handle ends it.
        let requeue = tx.downgrade();
        drop(tx);

        let thread = std::thread::Builder::new()
            .name("reactor-kernel".to_string())
            .spawn(move || command_loop(scheduler, rx, requeue))?;

        Ok(Self { handle, thread })
    }

    /// A new handle to this kernel.
    pub fn handle(&self) -> KernelHandle {
        self.handle.clone()
    }

    /// Wait for the kernel thread to stop and take back the scheduler.
    ///
    /// The thread stops after a [`shutdown`](KernelHandle::shutdown) or once
    /// every handle is dropped.
    pub fn join(self) -> Result<Scheduler> {
        drop(self.handle);
        self.thread.join().map_err(|_| Error::KernelUnavailable)
    }
}

fn command_loop(
    mut scheduler: Scheduler,
    mut rx: mpsc::UnboundedReceiver<Command>,
    requeue: mpsc::WeakUnboundedSender<Command>,
) -> Scheduler {
    tracing::debug!("kernel thread started");
    while let Some(command) = rx.blocking_recv() {
        let outcome = match command {
            Command::Submit(requests) => scheduler.submit_batch(requests).map(drop),
            Command::RunStale => scheduler.run_stale().map(drop),
            Command::UpdateConfig(config) => {
                scheduler.update_config(config);
                Ok(())
            }
            Command::Shutdown => break,
        };
        if let Err(err) = outcome {
            tracing::warn!("batch failed: {}", err);
        }

        if scheduler.needs_stale_rerun() {
            match requeue.upgrade() {
                Some(tx) => {
                    tracing::debug!("queueing stale rerun");
                    let _ = tx.send(Command::RunStale);
                }
                None => tracing::debug!("no handles left, skipping stale rerun"),
            }
        }
    }
    tracing::debug!("kernel thread stopped");
    scheduler
}

/// Cloneable, thread-safe front door to a running [`Kernel`].
///
/// Submissions are queued and run in order; `interrupt` and `respond_input`
/// take effect immediately, even while a cell is running.
#[derive(Debug, Clone)]
pub struct KernelHandle {
    tx: mpsc::UnboundedSender<Command>,
    interrupt: InterruptHandle,
    input: InputBroker,
}

impl KernelHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::KernelUnavailable)
    }

    /// Queue one cell for execution.
    pub fn submit(&self, request: ExecutionRequest) -> Result<()> {
        self.send(Command::Submit(vec![request]))
    }

    /// Queue several cells as one batch.
    pub fn submit_batch(&self, requests: Vec<ExecutionRequest>) -> Result<()> {
        self.send(Command::Submit(requests))
    }

    /// Queue a rerun of every runnable stale cell.
    pub fn run_stale(&self) -> Result<()> {
        self.send(Command::RunStale)
    }

    /// Queue a configuration update.
    pub fn update_config(&self, config: KernelConfig) -> Result<()> {
        self.send(Command::UpdateConfig(config))
    }

    /// Interrupt the running cell, if any.
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    /// Answer an outstanding input request.
    pub fn respond_input(&self, request_id: u64, text: impl Into<String>) -> Result<()> {
        self.input.respond(request_id, text)
    }

    /// Stop the kernel once the commands queued before this one are done.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Whether the kernel thread has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
