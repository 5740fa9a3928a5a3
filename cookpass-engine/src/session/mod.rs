//! Processing session
//!
//! Drives one source through every pass of the schedule.
//!
//! # State Progression
//! IDLE → SCHEDULING → (PASS_INIT → PASS_RUN → PASS_FINALIZE) per pass → IDLE
//!
//! - **SCHEDULING**: level the dependency graph, apply the pass budget,
//!   report disabled cookers, build every dependency view once
//! - **PASS_INIT**: activate the pass's cookers and call `begin_pass`
//! - **PASS_RUN**: invoke the reader once; elements go to active cookers only
//! - **PASS_FINALIZE**: force progress to 100, call `end_pass`, publish outputs
//!
//! With no cookers registered the source still gets one PASS_INIT → PASS_RUN
//! cycle, and its progress is forwarded unmodified.

pub mod isolation;
pub mod progress;
mod router;

pub use router::PassStatistics;

use crate::error::{HookKind, ProcessingError, ScheduleError};
use crate::schedule::{
    enforce_pass_budget, level_cookers, CookerDescriptor, CookerHandle, DisabledCooker, Schedule,
};
use crate::types::{
    CookedData, Cooker, CookerPath, PassCapability, ReaderError, SinkError, SourceElement,
    SourceReader,
};
use chrono::{DateTime, Utc};
use cookpass_common::config::SessionSettings;
use cookpass_common::events::{EventBus, SessionEvent};
use isolation::{DependencyView, ResultStore};
use progress::{session_progress, ProgressSink, ProgressTracker};
use router::{ActiveSet, ElementRouter};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Processing session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Scheduling,
    PassInit { pass: usize },
    PassRun { pass: usize },
    PassFinalize { pass: usize },
}

/// Summary of a completed `process_source`
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub session_id: Uuid,
    /// Cooker paths per executed pass
    pub plan: Vec<Vec<CookerPath>>,
    pub disabled: Vec<DisabledCooker>,
    pub passes: Vec<PassStatistics>,
    /// True when no cookers were registered and the source ran alone
    pub source_only: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ProcessingReport {
    pub fn passes_executed(&self) -> usize {
        self.passes.len()
    }
}

/// Dependency views of one pass, paired with their cooker handles
type StagedPass = Vec<(CookerHandle, DependencyView)>;

/// Owns the cookers for one source and runs them pass by pass
pub struct ProcessingSession<E: SourceElement> {
    session_id: Uuid,
    cookers: Vec<Box<dyn Cooker<E>>>,
    settings: SessionSettings,
    event_bus: EventBus,
    results: ResultStore,
    state: SessionState,
}

impl<E: SourceElement> ProcessingSession<E> {
    /// Create a session with default settings
    pub fn new(cookers: Vec<Box<dyn Cooker<E>>>) -> Self {
        Self::with_settings(cookers, SessionSettings::default())
    }

    /// Create a session with explicit settings
    pub fn with_settings(cookers: Vec<Box<dyn Cooker<E>>>, settings: SessionSettings) -> Self {
        let event_bus = EventBus::new(settings.event_capacity.max(1));
        Self {
            session_id: Uuid::new_v4(),
            cookers,
            settings,
            event_bus,
            results: ResultStore::new(),
            state: SessionState::Idle,
        }
    }

    /// Share an existing event bus instead of the session's own
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Supply the result of a cooker outside this session's set
    pub fn with_external_result(self, path: impl Into<CookerPath>, data: CookedData) -> Self {
        self.results.supply_external(path.into(), data);
        self
    }

    /// Add a cooker; takes effect at the next `process_source`
    pub fn register(&mut self, cooker: Box<dyn Cooker<E>>) {
        self.cookers.push(cooker);
    }

    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Outputs published by the latest run, plus external results
    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn cooker_count(&self) -> usize {
        self.cookers.len()
    }

    /// Hand the cookers back to the caller
    pub fn into_cookers(self) -> Vec<Box<dyn Cooker<E>>> {
        self.cookers
    }

    /// Run every scheduled pass over `reader`
    ///
    /// Progress is reported to `progress` as one session-wide 0-100 stream.
    /// Cancellation through `cancel` stops the session after the current
    /// step and returns [`ProcessingError::Cancelled`].
    pub async fn process_source<R>(
        &mut self,
        reader: &mut R,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<ProcessingReport, ProcessingError>
    where
        R: SourceReader<E> + ?Sized,
    {
        let started_at = Utc::now();

        info!(
            session_id = %self.session_id,
            cookers = self.cookers.len(),
            "Starting source processing"
        );
        self.event_bus.emit_lossy(SessionEvent::SessionStarted {
            session_id: self.session_id,
            cooker_count: self.cookers.len(),
            timestamp: started_at,
        });

        let outcome = self.run(reader, progress, cancel, started_at).await;

        match &outcome {
            Ok(report) => {
                info!(
                    session_id = %self.session_id,
                    passes = report.passes_executed(),
                    disabled = report.disabled.len(),
                    "Source processing completed"
                );
                self.event_bus.emit_lossy(SessionEvent::SessionCompleted {
                    session_id: self.session_id,
                    passes_executed: report.passes_executed(),
                    timestamp: Utc::now(),
                });
            }
            Err(ProcessingError::Cancelled { pass }) => {
                info!(session_id = %self.session_id, pass = ?pass, "Source processing cancelled");
                self.event_bus.emit_lossy(SessionEvent::SessionCancelled {
                    session_id: self.session_id,
                    pass: *pass,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, "Source processing failed");
                self.event_bus.emit_lossy(SessionEvent::SessionFailed {
                    session_id: self.session_id,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        self.transition(SessionState::Idle);
        outcome
    }

    async fn run<R>(
        &mut self,
        reader: &mut R,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
        started_at: DateTime<Utc>,
    ) -> Result<ProcessingReport, ProcessingError>
    where
        R: SourceReader<E> + ?Sized,
    {
        self.transition(SessionState::Scheduling);
        // Outputs of an earlier run must not satisfy this run's dependencies
        self.results.clear_published();
        let (schedule, descriptors) = self.schedule(reader.max_passes())?;

        if cancel.is_cancelled() {
            return Err(ProcessingError::Cancelled { pass: None });
        }

        if schedule.pass_count() == 0 {
            let stats = self.run_source_only_pass(reader, progress, cancel).await?;
            return Ok(ProcessingReport {
                session_id: self.session_id,
                plan: Vec::new(),
                disabled: Vec::new(),
                passes: vec![stats],
                source_only: true,
                started_at,
                ended_at: Utc::now(),
            });
        }

        // Every view is built once, up front; each reads the shared store,
        // which fills as passes complete
        let staged = self.stage_views(&schedule, &descriptors);
        let total_passes = schedule.pass_count();
        let mut passes = Vec::with_capacity(total_passes);

        for (index, pass) in staged.iter().enumerate() {
            let stats = self
                .run_pass(index, total_passes, pass, &mut *reader, &progress, cancel)
                .await?;
            passes.push(stats);
        }

        Ok(ProcessingReport {
            session_id: self.session_id,
            plan: schedule.plan(),
            disabled: schedule.disabled().to_vec(),
            passes,
            source_only: false,
            started_at,
            ended_at: Utc::now(),
        })
    }

    /// Level, enforce the pass budget and report disabled cookers
    fn schedule(
        &self,
        source_capability: PassCapability,
    ) -> Result<(Schedule, Vec<CookerDescriptor>), ScheduleError> {
        let descriptors: Vec<CookerDescriptor> = self
            .cookers
            .iter()
            .map(|cooker| CookerDescriptor::new(cooker.path().clone(), cooker.dependencies()))
            .collect();

        let capability = source_capability.tighten(self.settings.max_passes);
        let leveled = level_cookers(&descriptors)?;
        let required = leveled.pass_count();
        let schedule = enforce_pass_budget(leveled, capability);

        if self.settings.strict_external_dependencies {
            if let Some(missing) = schedule
                .external_dependencies()
                .find(|dep| !self.results.contains(&dep.dependency))
            {
                return Err(ScheduleError::UnresolvedDependency {
                    cooker: descriptors[missing.cooker].path.clone(),
                    dependency: missing.dependency.clone(),
                });
            }
        }

        for disabled in schedule.disabled() {
            self.event_bus.emit_lossy(SessionEvent::CookerDisabled {
                session_id: self.session_id,
                cooker: disabled.path.to_string(),
                reason: disabled.reason,
                timestamp: Utc::now(),
            });
        }

        info!(
            session_id = %self.session_id,
            required_passes = required,
            capability = %capability,
            passes = schedule.pass_count(),
            disabled = schedule.disabled().len(),
            "Schedule computed"
        );
        self.event_bus.emit_lossy(SessionEvent::ScheduleComputed {
            session_id: self.session_id,
            pass_count: schedule.pass_count(),
            disabled_count: schedule.disabled().len(),
            timestamp: Utc::now(),
        });

        Ok((schedule, descriptors))
    }

    fn stage_views(&self, schedule: &Schedule, descriptors: &[CookerDescriptor]) -> Vec<StagedPass> {
        schedule
            .passes()
            .iter()
            .map(|pass| {
                pass.cookers
                    .iter()
                    .map(|&handle| {
                        let descriptor = &descriptors[handle];
                        let view = DependencyView::new(
                            descriptor.path.clone(),
                            descriptor.dependencies.iter().cloned(),
                            self.results.clone(),
                        );
                        (handle, view)
                    })
                    .collect()
            })
            .collect()
    }

    async fn run_pass<R>(
        &mut self,
        index: usize,
        total_passes: usize,
        staged: &[(CookerHandle, DependencyView)],
        reader: &mut R,
        progress: &Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<PassStatistics, ProcessingError>
    where
        R: SourceReader<E> + ?Sized,
    {
        let started = Instant::now();

        // PASS_INIT
        self.transition(SessionState::PassInit { pass: index });
        if cancel.is_cancelled() {
            return Err(ProcessingError::Cancelled { pass: Some(index) });
        }

        for (handle, view) in staged {
            let cooker = &mut self.cookers[*handle];
            debug!(cooker = %cooker.path(), pass = index, "begin_pass");
            cooker
                .begin_pass(view, cancel)
                .map_err(|source| hook_error(cancel, index, cooker.path().clone(), HookKind::BeginPass, source))?;
        }
        if cancel.is_cancelled() {
            return Err(ProcessingError::Cancelled { pass: Some(index) });
        }

        let active = ActiveSet::new(
            staged
                .iter()
                .map(|(handle, _)| (*handle, self.cookers[*handle].subscription()))
                .collect(),
        );

        info!(
            session_id = %self.session_id,
            pass = index,
            total_passes,
            cookers = active.len(),
            "Pass started"
        );
        self.event_bus.emit_lossy(SessionEvent::PassStarted {
            session_id: self.session_id,
            pass: index,
            total_passes,
            cookers: active
                .handles()
                .map(|handle| self.cookers[handle].path().to_string())
                .collect(),
            timestamp: Utc::now(),
        });

        // PASS_RUN
        self.transition(SessionState::PassRun { pass: index });
        let tracker = ProgressTracker::new();
        let sink = Arc::clone(progress);
        let subscription = tracker.subscribe(move |local| {
            sink.report(session_progress(index, total_passes, local));
        });

        let (read_result, mut stats, failure) = {
            let mut router = ElementRouter::new(index, &mut self.cookers[..], &active, cancel);
            let read_result = reader.run_pass(&mut router, &tracker, cancel).await;
            let (stats, failure) = router.finish();
            (read_result, stats, failure)
        };

        if let Some((cooker, source)) = failure {
            return Err(hook_error(cancel, index, cooker, HookKind::Process, source));
        }
        reader_outcome(read_result, index, cancel)?;
        if cancel.is_cancelled() {
            return Err(ProcessingError::Cancelled { pass: Some(index) });
        }

        // PASS_FINALIZE
        self.transition(SessionState::PassFinalize { pass: index });
        tracker.complete();
        drop(subscription);

        for handle in active.handles() {
            let cooker = &mut self.cookers[handle];
            debug!(cooker = %cooker.path(), pass = index, "end_pass");
            cooker
                .end_pass(cancel)
                .map_err(|source| hook_error(cancel, index, cooker.path().clone(), HookKind::EndPass, source))?;
        }

        for handle in active.handles() {
            let cooker = &self.cookers[handle];
            if let Some(output) = cooker.output() {
                self.results.publish(cooker.path().clone(), output);
            }
        }

        stats.elapsed = started.elapsed();
        info!(
            session_id = %self.session_id,
            pass = index,
            elements = stats.elements,
            deliveries = stats.deliveries,
            corrupt = stats.corrupt,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Pass completed"
        );
        self.event_bus.emit_lossy(SessionEvent::PassCompleted {
            session_id: self.session_id,
            pass: index,
            total_passes,
            elements_delivered: stats.elements,
            elapsed_ms: stats.elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });

        Ok(stats)
    }

    /// Single pass with no cookers, for sources with internal work of their own
    async fn run_source_only_pass<R>(
        &mut self,
        reader: &mut R,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<PassStatistics, ProcessingError>
    where
        R: SourceReader<E> + ?Sized,
    {
        let started = Instant::now();

        self.transition(SessionState::PassInit { pass: 0 });
        info!(session_id = %self.session_id, "No cookers registered, running source-only pass");
        self.event_bus.emit_lossy(SessionEvent::PassStarted {
            session_id: self.session_id,
            pass: 0,
            total_passes: 1,
            cookers: Vec::new(),
            timestamp: Utc::now(),
        });

        self.transition(SessionState::PassRun { pass: 0 });
        let tracker = ProgressTracker::passthrough();
        let _subscription = tracker.subscribe(move |local| progress.report(local));
        let active = ActiveSet::new(Vec::new());

        let (read_result, mut stats) = {
            let mut router = ElementRouter::new(0, &mut self.cookers[..], &active, cancel);
            let read_result = reader.run_pass(&mut router, &tracker, cancel).await;
            let (stats, _) = router.finish();
            (read_result, stats)
        };
        reader_outcome(read_result, 0, cancel)?;

        stats.elapsed = started.elapsed();
        self.event_bus.emit_lossy(SessionEvent::PassCompleted {
            session_id: self.session_id,
            pass: 0,
            total_passes: 1,
            elements_delivered: stats.elements,
            elapsed_ms: stats.elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });

        Ok(stats)
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session_id = %self.session_id, from = ?self.state, to = ?next, "Session state transition");
        self.state = next;
    }
}

/// Hook failures observed after cancellation count as cancellation
fn hook_error(
    cancel: &CancellationToken,
    pass: usize,
    cooker: CookerPath,
    hook: HookKind,
    source: anyhow::Error,
) -> ProcessingError {
    if cancel.is_cancelled() {
        debug!(cooker = %cooker, %hook, error = %source, "Hook failed after cancellation");
        return ProcessingError::Cancelled { pass: Some(pass) };
    }
    ProcessingError::Hook {
        cooker,
        hook,
        source,
    }
}

fn reader_outcome(
    result: Result<(), ReaderError>,
    pass: usize,
    cancel: &CancellationToken,
) -> Result<(), ProcessingError> {
    match result {
        Ok(()) => Ok(()),
        Err(ReaderError::Cancelled) | Err(ReaderError::Sink(SinkError::Cancelled)) => {
            Err(ProcessingError::Cancelled { pass: Some(pass) })
        }
        Err(_) if cancel.is_cancelled() => Err(ProcessingError::Cancelled { pass: Some(pass) }),
        Err(ReaderError::Sink(SinkError::CookerFailed { cooker })) => Err(ProcessingError::Reader {
            pass,
            source: anyhow::anyhow!("reader stopped after cooker {} failed", cooker),
        }),
        Err(ReaderError::Failed(source)) => Err(ProcessingError::Reader { pass, source }),
    }
}
