//! Batch scheduler: owns the registry and graph and runs affected cells.

use std::panic::{AssertUnwindSafe, catch_unwind};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::{ExecutionMode, KernelConfig};
use crate::context::{ExecutionContext, InputBroker, InterruptHandle};
use crate::debug::{Debugger, PostMortem};
use crate::error::{CellFailure, Error, ErrorKind, Result};
use crate::graph::DependencyGraph;
use crate::registry::{CellId, CellRegistry, CellStatus, NameSet};
use crate::runtime::{Analyzer, CellRuntime, ExecutionRequest};
use crate::stream::{OutputMessage, Stream};

type ConfigObserver = Box<dyn FnMut(&KernelConfig) + Send>;

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Every cell the batch covered, in execution order.
    pub order: Vec<CellId>,
    /// Cells whose body completed.
    pub succeeded: Vec<CellId>,
    /// Cells that failed analysis, raised, or were interrupted.
    pub failed: Vec<CellId>,
    /// Cells not run because an ancestor failed.
    pub skipped: Vec<CellId>,
    /// Cells left stale without running (lazy mode or after an interrupt).
    pub stale: Vec<CellId>,
    /// Whether the batch was cut short by an interrupt.
    pub interrupted: bool,
}

/// What the scheduler does with one cell of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Run,
    MarkStale,
}

/// Single-threaded execution scheduler.
///
/// Runs cell bodies strictly one at a time on the calling thread. Use
/// [`Kernel`](super::Kernel) to host it on a dedicated thread.
pub struct Scheduler {
    registry: CellRegistry,
    graph: DependencyGraph,
    analyzer: Box<dyn Analyzer>,
    runtime: Box<dyn CellRuntime>,
    config: KernelConfig,
    stream: Stream,
    input: InputBroker,
    interrupt: InterruptHandle,
    debugger: Option<Box<dyn Debugger>>,
    post_mortem: PostMortem,
    observers: Vec<ConfigObserver>,
    /// Cells that failed analysis in the pending batch.
    analysis_failures: FxHashMap<CellId, String>,
    /// Names a cell stopped defining that no other cell defines, per cell.
    retired: FxHashMap<CellId, NameSet>,
    /// Set after an interrupted or cyclic batch; suppresses auto-rerun.
    rerun_blocked: bool,
}

impl Scheduler {
    pub fn new(
        analyzer: impl Analyzer + 'static,
        runtime: impl CellRuntime + 'static,
        config: KernelConfig,
        stream: Stream,
    ) -> Self {
        Self {
            registry: CellRegistry::new(),
            graph: DependencyGraph::new(),
            analyzer: Box::new(analyzer),
            runtime: Box::new(runtime),
            config,
            stream,
            input: InputBroker::new(),
            interrupt: InterruptHandle::new(),
            debugger: None,
            post_mortem: PostMortem::default(),
            observers: Vec::new(),
            analysis_failures: FxHashMap::default(),
            retired: FxHashMap::default(),
            rerun_blocked: false,
        }
    }

    /// Install a debugger override for uncaught failures.
    pub fn set_debugger(&mut self, debugger: impl Debugger + 'static) {
        self.debugger = Some(Box::new(debugger));
    }

    /// Register an observer called after every configuration update.
    pub fn on_config_change(&mut self, observer: impl FnMut(&KernelConfig) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Replace the configuration, announce it and notify observers.
    pub fn update_config(&mut self, config: KernelConfig) {
        if config.auto_rerun_stale && !self.config.auto_rerun_stale {
            self.rerun_blocked = false;
        }
        tracing::debug!(?config, "kernel configuration updated");
        self.config = config;
        self.stream.send(OutputMessage::ConfigChanged {
            config: self.config.clone(),
        });
        for observer in &mut self.observers {
            observer(&self.config);
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn registry(&self) -> &CellRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// Handle for interrupting the running cell from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Broker for answering input requests from another thread.
    pub fn input_broker(&self) -> InputBroker {
        self.input.clone()
    }

    /// Run one cell and everything affected by it.
    pub fn submit(&mut self, request: ExecutionRequest) -> Result<BatchReport> {
        self.submit_batch(vec![request])
    }

    /// Register, analyze and run several cells as one batch.
    ///
    /// Cells of one batch share a definition epoch. A cell submitted twice
    /// keeps its last code.
    pub fn submit_batch(&mut self, requests: Vec<ExecutionRequest>) -> Result<BatchReport> {
        let mut submitted: Vec<CellId> = Vec::with_capacity(requests.len());
        let mut updates: Vec<(CellId, NameSet, NameSet)> = Vec::with_capacity(requests.len());
        self.analysis_failures.clear();

        for ExecutionRequest { cell_id, code } in requests {
            self.registry.register(cell_id.clone(), code.as_str());
            self.graph.add_cell(&cell_id);
            if !submitted.contains(&cell_id) {
                submitted.push(cell_id.clone());
            }

            match self.analyzer.analyze(&code) {
                Ok(analysis) => {
                    self.analysis_failures.remove(&cell_id);
                    updates.retain(|(id, _, _)| id != &cell_id);
                    updates.push((cell_id, analysis.defines, analysis.uses));
                }
                Err(message) => {
                    tracing::debug!(cell = %cell_id, "analysis failed: {}", message);
                    updates.retain(|(id, _, _)| id != &cell_id);
                    self.analysis_failures.insert(cell_id, message);
                }
            }
        }

        // Former dependents and owned names, captured before edges move.
        let mut former_children: Vec<CellId> = Vec::new();
        let mut owned: Vec<(CellId, String)> = Vec::new();
        for (id, _, _) in &updates {
            former_children.extend(self.graph.children(id));
            if let Ok(cell) = self.registry.get(id) {
                for name in &cell.defines {
                    if self.graph.definer_of(name) == Some(id) {
                        owned.push((id.clone(), name.clone()));
                    }
                }
            }
        }
        for (id, defines, uses) in &updates {
            self.registry.record_names(id, defines.clone(), uses.clone())?;
        }
        self.graph.update_batch(updates);

        let mut roots: Vec<CellId> = submitted.clone();
        for (id, name) in owned {
            match self.graph.definer_of(&name) {
                None => {
                    self.retired.entry(id).or_default().insert(name);
                }
                // A shadowed definer is authoritative again and must restore
                // its value.
                Some(definer) if definer != &id => {
                    if !roots.contains(definer) {
                        roots.push(definer.clone());
                    }
                }
                Some(_) => {}
            }
        }

        // A cell reading a name before redefining it needs the upstream value.
        for cell in &submitted {
            let Ok(entry) = self.registry.get(cell) else {
                continue;
            };
            for name in entry.uses.intersection(&entry.defines) {
                if let Some(upstream) = self.graph.upstream_definer(name, cell) {
                    if !roots.contains(upstream) {
                        roots.push(upstream.clone());
                    }
                }
            }
        }

        // Ancestors left stale by lazy mode or an interrupt run before their
        // users.
        let mut pending: Vec<CellId> = Vec::new();
        for cell in &roots {
            for ancestor in self.graph.ancestors(cell) {
                if self.is_pending_stale(&ancestor)
                    && !roots.contains(&ancestor)
                    && !pending.contains(&ancestor)
                {
                    pending.push(ancestor);
                }
            }
        }
        roots.extend(pending);

        // Cells that lost an input must see the change too.
        let mut seeds = roots.clone();
        for child in former_children {
            if !seeds.contains(&child) {
                seeds.push(child);
            }
        }

        let order = match self.graph.affected(&seeds) {
            Ok(order) => order,
            Err(err) => return Err(self.abort_batch(&submitted, err)),
        };

        let run: FxHashSet<CellId> = match self.config.mode {
            ExecutionMode::Autorun => order.iter().cloned().collect(),
            ExecutionMode::Lazy => roots.into_iter().collect(),
        };
        let plan: Vec<(CellId, Step)> = order
            .into_iter()
            .map(|id| {
                let step = if run.contains(&id) {
                    Step::Run
                } else {
                    Step::MarkStale
                };
                (id, step)
            })
            .collect();

        Ok(self.execute_plan(plan))
    }

    /// Re-run every runnable stale cell together with all of its descendants,
    /// regardless of the execution mode.
    pub fn run_stale(&mut self) -> Result<BatchReport> {
        self.analysis_failures.clear();
        let roots = self.runnable_stale();
        if roots.is_empty() {
            return Ok(BatchReport::default());
        }

        let order = match self.graph.affected(&roots) {
            Ok(order) => order,
            Err(err) => return Err(self.abort_batch(&roots, err)),
        };
        let plan = order.into_iter().map(|id| (id, Step::Run)).collect();
        Ok(self.execute_plan(plan))
    }

    /// Stale cells that can run: outdated because an ancestor changed (not
    /// because of a failure), with no failed ancestor. Registration order.
    pub fn runnable_stale(&self) -> Vec<CellId> {
        self.registry
            .iter()
            .filter(|cell| self.is_runnable_stale(&cell.id))
            .map(|cell| cell.id.clone())
            .collect()
    }

    /// Whether the auto-rerun policy wants a stale rerun right now.
    pub fn needs_stale_rerun(&self) -> bool {
        self.config.auto_rerun_stale && !self.rerun_blocked && !self.runnable_stale().is_empty()
    }

    fn is_runnable_stale(&self, id: &CellId) -> bool {
        self.is_stale_with(id, |reason| reason.is_none())
    }

    /// Stale without a failure behind it: outdated by lazy mode or cut short
    /// by an interrupt. Only explicit submissions pick up interrupted cells.
    fn is_pending_stale(&self, id: &CellId) -> bool {
        self.is_stale_with(id, |reason| {
            matches!(reason, None | Some(ErrorKind::Interrupted))
        })
    }

    fn is_stale_with(&self, id: &CellId, accept: impl Fn(Option<ErrorKind>) -> bool) -> bool {
        let Ok(cell) = self.registry.get(id) else {
            return false;
        };
        cell.status == CellStatus::Stale
            && accept(cell.stale_reason)
            && !self
                .graph
                .ancestors(id)
                .iter()
                .any(|ancestor| self.is_failed(ancestor))
    }

    /// Error, or skipped because an ancestor failed.
    fn is_failed(&self, id: &CellId) -> bool {
        self.registry.get(id).is_ok_and(|cell| match cell.status {
            CellStatus::Error => true,
            CellStatus::Stale => {
                cell.stale_reason == Some(ErrorKind::SkippedDueToAncestorFailure)
            }
            _ => false,
        })
    }

    fn has_failed_parent(&self, id: &CellId) -> bool {
        self.graph
            .parents(id)
            .iter()
            .any(|parent| self.is_failed(parent))
    }

    /// Report a graph failure for the whole batch and reset the submitted
    /// cells.
    fn abort_batch(&mut self, submitted: &[CellId], err: Error) -> Error {
        tracing::error!("batch aborted: {}", err);
        self.rerun_blocked = true;
        self.stream.send(OutputMessage::KernelError {
            kind: ErrorKind::CycleDetected,
            message: err.to_string(),
        });
        for id in submitted {
            self.set_status(id, CellStatus::Idle, None);
        }
        err
    }

    fn execute_plan(&mut self, plan: Vec<(CellId, Step)>) -> BatchReport {
        self.interrupt.reset();
        tracing::debug!(
            cells = plan.len(),
            "planned batch: {}",
            plan.iter()
                .map(|(id, _)| id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        for (id, step) in &plan {
            if *step == Step::Run {
                self.set_status(id, CellStatus::Queued, None);
            }
        }

        let mut report = BatchReport {
            order: plan.iter().map(|(id, _)| id.clone()).collect(),
            ..BatchReport::default()
        };

        for (id, step) in plan {
            if self.has_failed_parent(&id) {
                self.mark_stale(&id, Some(ErrorKind::SkippedDueToAncestorFailure));
                report.skipped.push(id);
                continue;
            }

            if report.interrupted || self.interrupt.is_interrupted() {
                report.interrupted = true;
                self.mark_stale(&id, Some(ErrorKind::Interrupted));
                report.stale.push(id);
                continue;
            }

            if step == Step::MarkStale {
                self.mark_stale(&id, None);
                report.stale.push(id);
                continue;
            }

            if let Some(message) = self.analysis_failures.remove(&id) {
                let failure = CellFailure::new(ErrorKind::AnalysisError, message);
                self.record_failure(&id, &failure);
                report.failed.push(id);
                continue;
            }

            match self.run_cell(&id) {
                Ok(()) => report.succeeded.push(id),
                Err(failure) => {
                    if failure.kind == ErrorKind::Interrupted {
                        report.interrupted = true;
                    }
                    report.failed.push(id);
                }
            }
        }

        self.rerun_blocked = report.interrupted;
        tracing::info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            stale = report.stale.len(),
            interrupted = report.interrupted,
            "batch completed"
        );
        self.stream.send(OutputMessage::CompletedRun {
            cells: report.order.clone(),
        });
        report
    }

    /// Execute one cell body inside its execution context.
    fn run_cell(&mut self, id: &CellId) -> std::result::Result<(), CellFailure> {
        let code = match self.registry.get_mut(id) {
            Ok(cell) => {
                cell.run_count += 1;
                cell.code.clone()
            }
            Err(err) => return Err(CellFailure::from(err)),
        };
        self.set_status(id, CellStatus::Running, None);

        // Names the cell also reads keep their upstream value.
        let mut retract = self.retired.remove(id).unwrap_or_default();
        if let Ok(cell) = self.registry.get(id) {
            retract.extend(
                cell.defines
                    .iter()
                    .filter(|name| !cell.uses.contains(*name))
                    .filter(|name| self.graph.definer_of(name) == Some(id))
                    .cloned(),
            );
        }
        if !retract.is_empty() {
            self.runtime.retract(&retract);
        }

        let ctx = ExecutionContext::new(
            id.clone(),
            self.stream.clone(),
            self.input.clone(),
            self.interrupt.clone(),
            self.config.input_timeout(),
        );

        let result = {
            let _guard = ctx.enter();
            let runtime = &mut self.runtime;
            let outcome = catch_unwind(AssertUnwindSafe(|| runtime.execute(&code, &ctx)))
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(cell = %id, "cell body panicked: {}", message);
                    Err(CellFailure::runtime(format!("panic: {message}")))
                });

            // The debugger talks through the still-bound context.
            if let Err(failure) = &outcome {
                if failure.kind != ErrorKind::Interrupted {
                    if let Some(debugger) = self.debugger.as_mut() {
                        debugger.on_uncaught(failure, &ctx);
                    } else if self.config.post_mortem {
                        self.post_mortem.on_uncaught(failure, &ctx);
                    }
                }
            }
            outcome
        };

        match result {
            Ok(()) => {
                if let Ok(cell) = self.registry.get_mut(id) {
                    cell.last_error = None;
                }
                self.set_status(id, CellStatus::Success, None);
                Ok(())
            }
            Err(failure) => {
                self.record_failure(id, &failure);
                Err(failure)
            }
        }
    }

    fn record_failure(&mut self, id: &CellId, failure: &CellFailure) {
        if let Ok(cell) = self.registry.get_mut(id) {
            cell.last_error = Some(failure.kind);
        }
        self.stream.send(OutputMessage::Error {
            cell_id: id.clone(),
            kind: failure.kind,
            message: failure.message.clone(),
            traceback: failure.traceback.clone(),
        });
        self.set_status(id, CellStatus::Error, Some(failure.kind));
    }

    fn set_status(&mut self, id: &CellId, status: CellStatus, kind: Option<ErrorKind>) {
        if self.registry.set_status(id, status).is_err() {
            return;
        }
        self.stream.send(OutputMessage::CellStatus {
            cell_id: id.clone(),
            status,
            kind,
        });
    }

    fn mark_stale(&mut self, id: &CellId, reason: Option<ErrorKind>) {
        if self.registry.mark_stale(id, reason).is_err() {
            return;
        }
        self.stream.send(OutputMessage::CellStatus {
            cell_id: id.clone(),
            status: CellStatus::Stale,
            kind: reason,
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
