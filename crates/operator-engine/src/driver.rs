//! Execution driver
//!
//! Runs a [`Process`] on a dedicated task, translating pause, stop and
//! breakpoint requests into cooperative suspension points. Suspension is a
//! channel rendezvous: the driver parks on the control channel until the
//! external controller answers with resume or stop. A stop answer converts
//! the suspension into [`EngineError::Stopped`], which unwinds the run
//! without executing further operators.
//!
//! The process lives behind `Arc<parking_lot::Mutex<..>>` for the duration
//! of a run. The driver takes the lock per execution step and never holds
//! it across a suspension point or a running computation, so the authoring
//! side stays responsive while a run is in flight.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSink, NullEventSink};
use crate::operator::OperatorKind;
use crate::port::IoPayload;
use crate::process::{ExecutionMode, Process, RunState};

/// Which side of an operator's computation a breakpoint suspends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointSite {
    Before,
    After,
}

/// Snapshot delivered to the breakpoint listener on each suspension
#[derive(Debug, Clone)]
pub struct BreakpointHit {
    /// Name of the suspended process
    pub process: String,
    /// Operator the breakpoint belongs to
    pub operator: String,
    pub site: BreakpointSite,
    /// Input data (before) or output data (after) of the operator
    pub data: HashMap<String, Value>,
}

/// External listener notified on every breakpoint suspension
///
/// The listener answers through the run's [`ProcessControl`], with either
/// [`ProcessControl::resume`] or [`ProcessControl::request_stop`]. This is
/// the only synchronous callback across the engine boundary.
pub trait BreakpointListener: Send + Sync {
    fn breakpoint_reached(&self, hit: &BreakpointHit);
}

/// Answer delivered to a suspended driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Resume,
    Stop,
}

/// Shared handle for steering a run from other threads
///
/// Stop and pause are advisory flags observed at the driver's cooperative
/// checkpoints; resume and stop answers travel over the control channel to
/// wake a suspended driver.
pub struct ProcessControl {
    stop: AtomicBool,
    pause: AtomicBool,
    tx: mpsc::UnboundedSender<ControlSignal>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<ControlSignal>>,
}

impl ProcessControl {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            stop: AtomicBool::new(false),
            pause: AtomicBool::new(false),
            tx,
            rx: AsyncMutex::new(rx),
        })
    }

    /// A control handle not connected to any driver, for running
    /// computations standalone.
    pub fn detached() -> Arc<Self> {
        Self::new()
    }

    /// Request a stop. No new operator begins executing after the request
    /// is observed; a suspended driver aborts immediately.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.tx.send(ControlSignal::Stop);
    }

    /// Request a pause. Takes effect at the next cooperative checkpoint;
    /// resumable via [`ProcessControl::resume`].
    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    /// Wake a suspended driver (pause or breakpoint).
    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
        let _ = self.tx.send(ControlSignal::Resume);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Drop signals left over from answers that arrived while nobody was
    /// suspended. A stop is never lost: the flag is checked after draining.
    pub(crate) async fn drain_stale(&self) {
        let mut rx = self.rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    pub(crate) async fn wait_for_resume(&self) -> ControlSignal {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(signal) => signal,
            // All senders gone: treat as stop
            None => ControlSignal::Stop,
        }
    }

    /// Cooperative checkpoint for long-running computations: observes stop
    /// immediately and parks on the control channel while paused.
    pub(crate) async fn checkpoint(&self) -> Result<()> {
        if self.stop_requested() {
            return Err(EngineError::Stopped);
        }
        if self.pause_requested() {
            self.drain_stale().await;
            if self.stop_requested() {
                return Err(EngineError::Stopped);
            }
            match self.wait_for_resume().await {
                ControlSignal::Stop => return Err(EngineError::Stopped),
                ControlSignal::Resume => {}
            }
        }
        Ok(())
    }
}

/// How a finished run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
}

/// Record of one finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub execution_id: String,
    pub outcome: RunOutcome,
    /// Number of operators actually applied (skipped ones don't count)
    pub operators_applied: u32,
    pub wall_ms: u64,
}

/// Drives one process run at a time
pub struct ExecutionDriver {
    listener: Option<Arc<dyn BreakpointListener>>,
    events: Arc<dyn EventSink>,
}

impl ExecutionDriver {
    pub fn new() -> Self {
        Self {
            listener: None,
            events: Arc::new(NullEventSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn BreakpointListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Spawn the run on its own task and return the steering handle.
    pub fn spawn(self, process: Arc<Mutex<Process>>) -> ProcessRun {
        let control = ProcessControl::new();
        let task_control = control.clone();
        let handle =
            tokio::spawn(async move { self.run_with_control(&process, &task_control).await });
        ProcessRun { control, handle }
    }

    /// Run to completion on the current task with a fresh control handle.
    pub async fn run(&self, process: &Arc<Mutex<Process>>) -> Result<RunSummary> {
        let control = ProcessControl::new();
        self.run_with_control(process, &control).await
    }

    /// Run to completion, steering through the given control handle.
    pub async fn run_with_control(
        &self,
        process: &Arc<Mutex<Process>>,
        control: &Arc<ProcessControl>,
    ) -> Result<RunSummary> {
        let execution_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        {
            let mut p = process.lock();
            if p.run_state() != RunState::Stopped {
                return Err(EngineError::AlreadyRunning);
            }
            p.set_run_state(RunState::Running);
            p.propagate_dirtiness();
        }
        let _ = self.events.send(EngineEvent::ProcessStarted {
            execution_id: execution_id.clone(),
        });
        log::info!("run {}: process started", execution_id);

        let applied = AtomicU32::new(0);
        let result = self
            .execute_operator(process, control, Vec::new(), &execution_id, &applied)
            .await;

        {
            let mut p = process.lock();
            p.set_run_state(RunState::Stopped);
        }

        let summary = RunSummary {
            execution_id: execution_id.clone(),
            outcome: RunOutcome::Completed,
            operators_applied: applied.load(Ordering::SeqCst),
            wall_ms: started.elapsed().as_millis() as u64,
        };

        match result {
            Ok(()) => {
                let _ = self.events.send(EngineEvent::ProcessCompleted {
                    execution_id: execution_id.clone(),
                });
                log::info!(
                    "run {}: completed, {} operators applied in {} ms",
                    execution_id,
                    summary.operators_applied,
                    summary.wall_ms
                );
                Ok(summary)
            }
            Err(EngineError::Stopped) => {
                let _ = self.events.send(EngineEvent::ProcessStopped {
                    execution_id: execution_id.clone(),
                });
                log::info!("run {}: stopped on request", execution_id);
                Ok(RunSummary {
                    outcome: RunOutcome::Stopped,
                    ..summary
                })
            }
            Err(error) => {
                let operator = match &error {
                    EngineError::OperatorFailed { operator, .. } => operator.clone(),
                    _ => String::new(),
                };
                let _ = self.events.send(EngineEvent::ProcessFailed {
                    execution_id: execution_id.clone(),
                    operator: operator.clone(),
                    error: error.to_string(),
                });
                log::error!("run {}: failed at '{}': {}", execution_id, operator, error);
                Err(error)
            }
        }
    }

    /// Execute the operator at `path` (the root chain for an empty path).
    fn execute_operator<'a>(
        &'a self,
        process: &'a Arc<Mutex<Process>>,
        control: &'a Arc<ProcessControl>,
        path: Vec<(usize, usize)>,
        execution_id: &'a str,
        applied: &'a AtomicU32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.entry_checkpoint(process, control, execution_id).await?;

            // Step under lock: skip checks, input staging, apply bookkeeping
            let (name, bp_before, staged, input_snapshot, is_chain) = {
                let mut p = process.lock();
                let only_dirty = p.execution_mode() == ExecutionMode::OnlyDirty;
                let (name, enabled, skip_clean) = {
                    let op = p
                        .operator_at_path(&path)
                        .ok_or_else(|| EngineError::Driver("dangling operator path".into()))?;
                    (
                        op.name().to_string(),
                        op.is_enabled(),
                        only_dirty && !op.is_dirty() && !op.has_dirty_descendant(),
                    )
                };
                if !enabled {
                    log::debug!("operator '{}' is disabled, skipping", name);
                    let _ = self.events.send(EngineEvent::OperatorSkipped {
                        operator: name,
                        execution_id: execution_id.to_string(),
                    });
                    return Ok(());
                }
                if skip_clean {
                    log::debug!("operator '{}' is clean, skipping", name);
                    let _ = self.events.send(EngineEvent::OperatorSkipped {
                        operator: name,
                        execution_id: execution_id.to_string(),
                    });
                    return Ok(());
                }

                let staged = p.stage_inputs_at(&path);
                let op = p
                    .operator_at_path_mut(&path)
                    .ok_or_else(|| EngineError::Driver("dangling operator path".into()))?;
                op.begin_apply();
                let input_snapshot: HashMap<String, Value> = staged
                    .iter()
                    .map(|(port, payload)| (port.clone(), payload.value.clone()))
                    .collect();
                let _ = self.events.send(EngineEvent::OperatorStarted {
                    operator: name.clone(),
                    execution_id: execution_id.to_string(),
                });
                (
                    name,
                    op.breakpoint(BreakpointSite::Before),
                    staged,
                    input_snapshot,
                    matches!(op.kind(), OperatorKind::Chain(_)),
                )
            };

            if bp_before {
                self.suspend_on_breakpoint(
                    process,
                    control,
                    &name,
                    BreakpointSite::Before,
                    input_snapshot,
                    execution_id,
                )
                .await?;
            }

            let compute_started = Instant::now();
            let result: Result<()> = if is_chain {
                self.execute_chain_body(process, control, &path, execution_id, applied)
                    .await
            } else {
                self.execute_leaf(process, control, &path, &name, staged).await
            };

            match result {
                Ok(()) => {
                    let wall_ms = compute_started.elapsed().as_millis() as u64;
                    let (bp_after, output_snapshot, apply_count) = {
                        let mut p = process.lock();
                        let op = p
                            .operator_at_path_mut(&path)
                            .ok_or_else(|| EngineError::Driver("dangling operator path".into()))?;
                        op.finish_apply(wall_ms);
                        (
                            op.breakpoint(BreakpointSite::After),
                            op.output_data_snapshot(),
                            op.apply_count(),
                        )
                    };
                    applied.fetch_add(1, Ordering::SeqCst);
                    let _ = self.events.send(EngineEvent::OperatorCompleted {
                        operator: name.clone(),
                        execution_id: execution_id.to_string(),
                        apply_count,
                    });
                    log::debug!("operator '{}' completed in {} ms", name, wall_ms);

                    if bp_after {
                        self.suspend_on_breakpoint(
                            process,
                            control,
                            &name,
                            BreakpointSite::After,
                            output_snapshot,
                            execution_id,
                        )
                        .await?;
                    }
                    Ok(())
                }
                Err(error) => Err(error.tag(&name)),
            }
        })
    }

    /// Run the nested units of a chain operator, then lift boundary sink
    /// data up to the chain's output ports.
    async fn execute_chain_body(
        &self,
        process: &Arc<Mutex<Process>>,
        control: &Arc<ProcessControl>,
        path: &[(usize, usize)],
        execution_id: &str,
        applied: &AtomicU32,
    ) -> Result<()> {
        let unit_count = {
            let mut p = process.lock();
            let op = p
                .operator_at_path_mut(path)
                .ok_or_else(|| EngineError::Driver("dangling operator path".into()))?;
            op.clear_output_data();
            op.units().map(|u| u.len()).unwrap_or(0)
        };

        for unit_idx in 0..unit_count {
            let order = {
                let p = process.lock();
                let op = p
                    .operator_at_path(path)
                    .ok_or_else(|| EngineError::Driver("dangling operator path".into()))?;
                op.units()
                    .and_then(|units| units.get(unit_idx))
                    .ok_or_else(|| EngineError::Driver("dangling unit index".into()))?
                    .execution_order()?
            };
            for op_idx in order {
                let mut child_path = path.to_vec();
                child_path.push((unit_idx, op_idx));
                self.execute_operator(process, control, child_path, execution_id, applied)
                    .await?;
            }
        }

        let mut p = process.lock();
        let op = p
            .operator_at_path_mut(path)
            .ok_or_else(|| EngineError::Driver("dangling operator path".into()))?;
        let mut collected: HashMap<String, IoPayload> = HashMap::new();
        if let Some(units) = op.units() {
            for unit in units {
                collected.extend(unit.collect_boundary_outputs());
            }
        }
        for (port, payload) in collected {
            op.output_port_set_data(&port, payload);
        }
        Ok(())
    }

    /// Run a leaf computation without holding the process lock.
    async fn execute_leaf(
        &self,
        process: &Arc<Mutex<Process>>,
        control: &Arc<ProcessControl>,
        path: &[(usize, usize)],
        name: &str,
        staged: HashMap<String, IoPayload>,
    ) -> Result<()> {
        let (computation, params, config) = {
            let mut p = process.lock();
            let params = p.resolved_parameters(name)?;
            let config = p.config().clone();
            let op = p
                .operator_at_path_mut(path)
                .ok_or_else(|| EngineError::Driver("dangling operator path".into()))?;
            op.clear_output_data();
            let computation = match op.kind() {
                OperatorKind::Leaf(c) => c.clone(),
                OperatorKind::Chain(_) => {
                    return Err(EngineError::Driver("chain reached leaf execution".into()))
                }
            };
            (computation, params, config)
        };

        let mut ctx =
            crate::operator::ComputeContext::new(name, staged, params, config, control.clone());
        computation.compute(&mut ctx).await?;

        let outputs = ctx.take_outputs();
        let published = ctx.take_published();

        let mut p = process.lock();
        let op = p
            .operator_at_path_mut(path)
            .ok_or_else(|| EngineError::Driver("dangling operator path".into()))?;
        for (port, mut payload) in outputs {
            if op.output(&port).is_none() {
                return Err(EngineError::UnknownPort {
                    operator: name.to_string(),
                    port,
                });
            }
            payload.stamp(name);
            op.output_port_set_data(&port, payload);
        }
        op.extend_published(published);
        Ok(())
    }

    /// Global pause/stop checkpoint at operator entry.
    async fn entry_checkpoint(
        &self,
        process: &Arc<Mutex<Process>>,
        control: &Arc<ProcessControl>,
        execution_id: &str,
    ) -> Result<()> {
        if control.stop_requested() {
            return Err(EngineError::Stopped);
        }
        if !control.pause_requested() {
            return Ok(());
        }

        {
            process.lock().set_run_state(RunState::Paused);
        }
        let _ = self.events.send(EngineEvent::ProcessPaused {
            execution_id: execution_id.to_string(),
        });
        log::info!("run {}: paused", execution_id);

        control.drain_stale().await;
        if control.stop_requested() {
            return Err(EngineError::Stopped);
        }
        match control.wait_for_resume().await {
            ControlSignal::Stop => Err(EngineError::Stopped),
            ControlSignal::Resume => {
                {
                    process.lock().set_run_state(RunState::Running);
                }
                let _ = self.events.send(EngineEvent::ProcessResumed {
                    execution_id: execution_id.to_string(),
                });
                log::info!("run {}: resumed", execution_id);
                Ok(())
            }
        }
    }

    /// Suspend on a breakpoint: deliver the snapshot, park until the
    /// controller answers.
    async fn suspend_on_breakpoint(
        &self,
        process: &Arc<Mutex<Process>>,
        control: &Arc<ProcessControl>,
        operator: &str,
        site: BreakpointSite,
        data: HashMap<String, Value>,
        execution_id: &str,
    ) -> Result<()> {
        let process_name = {
            let mut p = process.lock();
            p.set_run_state(RunState::Paused);
            p.name().to_string()
        };
        let _ = self.events.send(EngineEvent::BreakpointReached {
            operator: operator.to_string(),
            execution_id: execution_id.to_string(),
            site,
        });
        log::debug!("breakpoint {:?} reached at '{}'", site, operator);

        control.drain_stale().await;
        if control.stop_requested() {
            return Err(EngineError::Stopped);
        }
        if let Some(listener) = &self.listener {
            listener.breakpoint_reached(&BreakpointHit {
                process: process_name,
                operator: operator.to_string(),
                site,
                data,
            });
        }

        match control.wait_for_resume().await {
            ControlSignal::Stop => Err(EngineError::Stopped),
            ControlSignal::Resume => {
                {
                    process.lock().set_run_state(RunState::Running);
                }
                let _ = self.events.send(EngineEvent::ProcessResumed {
                    execution_id: execution_id.to_string(),
                });
                Ok(())
            }
        }
    }
}

impl Default for ExecutionDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a spawned run
pub struct ProcessRun {
    control: Arc<ProcessControl>,
    handle: tokio::task::JoinHandle<Result<RunSummary>>,
}

impl ProcessRun {
    pub fn control(&self) -> Arc<ProcessControl> {
        self.control.clone()
    }

    pub fn pause(&self) {
        self.control.request_pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn stop(&self) {
        self.control.request_stop();
    }

    /// Wait for the run to finish and return its summary.
    pub async fn wait(self) -> Result<RunSummary> {
        self.handle
            .await
            .map_err(|e| EngineError::Driver(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_checkpoint_observes_stop() {
        let control = ProcessControl::new();
        control.request_stop();
        assert!(control.checkpoint().await.is_err());
    }

    #[tokio::test]
    async fn test_checkpoint_passes_when_idle() {
        let control = ProcessControl::new();
        assert!(control.checkpoint().await.is_ok());
    }

    #[tokio::test]
    async fn test_checkpoint_parks_on_pause_until_resume() {
        let control = ProcessControl::new();
        control.request_pause();

        let waiter = control.clone();
        let task = tokio::spawn(async move { waiter.checkpoint().await });

        // Give the checkpoint a moment to park
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        control.resume();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_wins_over_resume_while_parked() {
        let control = ProcessControl::new();
        control.request_pause();

        let waiter = control.clone();
        let task = tokio::spawn(async move { waiter.checkpoint().await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        control.request_stop();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(EngineError::Stopped)));
    }
}
