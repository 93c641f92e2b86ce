//! Execution context for running cells.
//!
//! An [`ExecutionContext`] routes one cell's console I/O onto the shared
//! [`Stream`]: writes become `stdout`/`stderr` messages tagged with the cell
//! id, and input reads become `input-request` messages answered through the
//! [`InputBroker`].
//!
//! The context is passed explicitly to the runtime. For code that cannot be
//! handed a context (helpers, library callbacks), [`ExecutionContext::enter`]
//! also binds it to the current thread; [`print`], [`eprint`] and [`input`]
//! resolve against the innermost binding and fall back to the process console
//! when nothing is bound. Bindings nest and unwind last-in-first-out.

use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::registry::CellId;
use crate::stream::{OutputMessage, Stream};

/// How often a blocked input read re-checks the interrupt flag.
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Handle for cooperative interruption of the running cell.
///
/// Clones share one flag; any clone can trigger the interrupt.
///
/// # Example
///
/// ```
/// use reactor_core::context::InterruptHandle;
///
/// let handle = InterruptHandle::new();
/// let remote = handle.clone();
///
/// assert!(!handle.is_interrupted());
/// remote.interrupt();
/// assert!(handle.is_interrupted());
/// ```
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    interrupted: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an interrupt has been requested.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Request interruption of the running cell.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Clear the flag. Called by the scheduler at the start of each batch.
    pub fn reset(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }
}

/// Inbound side-channel delivering responses to outstanding input reads.
///
/// Cloneable and thread-safe; the transport calls [`respond`](Self::respond)
/// while the execution thread is blocked in [`ExecutionContext::read_input`].
#[derive(Debug, Clone, Default)]
pub struct InputBroker {
    inner: Arc<BrokerInner>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    next_id: AtomicU64,
    pending: Mutex<FxHashMap<u64, mpsc::Sender<String>>>,
}

impl InputBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, FxHashMap<u64, mpsc::Sender<String>>> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> (u64, mpsc::Receiver<String>) {
        let request_id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel();
        self.pending().insert(request_id, tx);
        (request_id, rx)
    }

    fn close(&self, request_id: u64) {
        self.pending().remove(&request_id);
    }

    /// Deliver the response to an outstanding input request.
    pub fn respond(&self, request_id: u64, text: impl Into<String>) -> Result<()> {
        let tx = self
            .pending()
            .remove(&request_id)
            .ok_or(Error::UnknownInputRequest(request_id))?;
        tx.send(text.into())
            .map_err(|_| Error::UnknownInputRequest(request_id))
    }

    /// Ids of the requests still waiting for a response.
    pub fn outstanding(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.pending().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Console routing for a single cell run.
///
/// Cheap to clone; clones may be moved to other threads, and their output is
/// still attributed to the owning cell.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    cell_id: CellId,
    stream: Stream,
    input: InputBroker,
    interrupt: InterruptHandle,
    input_timeout: Option<Duration>,
}

impl ExecutionContext {
    /// Create a context for one run of `cell_id`.
    pub fn new(
        cell_id: CellId,
        stream: Stream,
        input: InputBroker,
        interrupt: InterruptHandle,
        input_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                cell_id,
                stream,
                input,
                interrupt,
                input_timeout,
            }),
        }
    }

    /// The cell this context belongs to.
    pub fn cell_id(&self) -> &CellId {
        &self.inner.cell_id
    }

    /// Emit text on the cell's standard output.
    pub fn write_stdout(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.inner.stream.send(OutputMessage::Stdout {
            cell_id: self.inner.cell_id.clone(),
            text: text.to_string(),
        });
    }

    /// Emit text on the cell's standard error.
    pub fn write_stderr(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.inner.stream.send(OutputMessage::Stderr {
            cell_id: self.inner.cell_id.clone(),
            text: text.to_string(),
        });
    }

    /// A `std::io::Write` handle for the cell's standard output.
    pub fn stdout(&self) -> CellWriter {
        CellWriter {
            ctx: self.clone(),
            channel: Channel::Stdout,
        }
    }

    /// A `std::io::Write` handle for the cell's standard error.
    pub fn stderr(&self) -> CellWriter {
        CellWriter {
            ctx: self.clone(),
            channel: Channel::Stderr,
        }
    }

    /// Request a line of input from the front end and block until it arrives.
    ///
    /// Fails with `InputTimeout` once the configured bound elapses and with
    /// `Interrupted` as soon as an interrupt is requested.
    pub fn read_input(&self, prompt: &str) -> Result<String> {
        let broker = &self.inner.input;
        let (request_id, rx) = broker.open();
        self.inner.stream.send(OutputMessage::InputRequest {
            cell_id: self.inner.cell_id.clone(),
            request_id,
            prompt: prompt.to_string(),
        });

        let deadline = self.inner.input_timeout.map(|bound| Instant::now() + bound);
        loop {
            if self.is_interrupted() {
                broker.close(request_id);
                return Err(Error::Interrupted);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        broker.close(request_id);
                        return Err(Error::InputTimeout {
                            request_id,
                            timeout_ms: self
                                .inner
                                .input_timeout
                                .map_or(0, |bound| bound.as_millis() as u64),
                        });
                    }
                    (deadline - now).min(INPUT_POLL_INTERVAL)
                }
                None => INPUT_POLL_INTERVAL,
            };

            match rx.recv_timeout(wait) {
                Ok(text) => return Ok(text),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::UnknownInputRequest(request_id));
                }
            }
        }
    }

    /// Whether an interrupt has been requested for this run.
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupt.is_interrupted()
    }

    /// Fail with `Interrupted` if an interrupt has been requested.
    pub fn check_interrupted(&self) -> Result<()> {
        if self.is_interrupted() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Bind this context to the current thread until the guard is dropped.
    pub fn enter(&self) -> ContextGuard {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(self.clone());
            stack.len()
        });
        tracing::trace!(cell = %self.inner.cell_id, depth, "entered execution context");
        ContextGuard {
            depth,
            _not_send: PhantomData,
        }
    }
}

thread_local! {
    /// Execution contexts bound to this thread, innermost last.
    static CONTEXT_STACK: RefCell<Vec<ExecutionContext>> = const { RefCell::new(Vec::new()) };
}

/// Scope of a thread binding created by [`ExecutionContext::enter`].
///
/// Dropping the guard restores the binding that was active before, also when
/// the cell body unwinds.
#[must_use = "the context is unbound as soon as the guard is dropped"]
pub struct ContextGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let _ = CONTEXT_STACK.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "execution contexts released out of order");
            stack.truncate(self.depth.saturating_sub(1));
        });
    }
}

/// The innermost context bound to this thread.
pub fn current() -> Option<ExecutionContext> {
    CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
}

/// The cell whose context is bound to this thread.
pub fn current_cell() -> Option<CellId> {
    current().map(|ctx| ctx.cell_id().clone())
}

/// Write to the bound cell's standard output, or the process stdout.
pub fn print(text: &str) {
    match current() {
        Some(ctx) => ctx.write_stdout(text),
        None => {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }
}

/// Write to the bound cell's standard error, or the process stderr.
pub fn eprint(text: &str) {
    match current() {
        Some(ctx) => ctx.write_stderr(text),
        None => {
            let _ = std::io::stderr().lock().write_all(text.as_bytes());
        }
    }
}

/// Read a line through the bound cell's context, or from the process stdin.
pub fn input(prompt: &str) -> Result<String> {
    match current() {
        Some(ctx) => ctx.read_input(prompt),
        None => {
            print(prompt);
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        }
    }
}

/// Console channel of a [`CellWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdout,
    Stderr,
}

/// `std::io::Write` adapter emitting stream messages for one cell.
#[derive(Debug, Clone)]
pub struct CellWriter {
    ctx: ExecutionContext,
    channel: Channel,
}

impl CellWriter {
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl Write for CellWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        match self.channel {
            Channel::Stdout => self.ctx.write_stdout(&text),
            Channel::Stderr => self.ctx.write_stderr(&text),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
