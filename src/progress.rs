//! Progress tracking for the bootstrap run
//!
//! An ordered list of named steps with estimated durations. Observers are
//! notified synchronously on every transition; a panicking observer is
//! caught and logged so it can never abort the tracked operation.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::{BootstrapError, BootstrapResult};

/// Lifecycle of a tracked step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// One named step owned by a [`ProgressTracker`]
#[derive(Debug, Clone)]
pub struct ProgressStep {
    pub id: String,
    pub name: String,
    pub status: StepStatus,
    /// Completion percentage (0-100); terminal steps report 100
    pub percent: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub metadata: HashMap<String, String>,
    estimated: Duration,
    started_instant: Option<Instant>,
}

impl ProgressStep {
    fn new(id: &str, name: &str, estimated: Duration) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: StepStatus::NotStarted,
            percent: 0.0,
            started_at: None,
            ended_at: None,
            duration: None,
            metadata: HashMap::new(),
            estimated,
            started_instant: None,
        }
    }

    fn completion(&self) -> f64 {
        if self.status.is_terminal() {
            100.0
        } else {
            self.percent
        }
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        self.percent = 100.0;
        self.ended_at = Some(Utc::now());
        self.duration = self.started_instant.map(|t| t.elapsed());
    }
}

/// Observer notified on every step transition
pub trait ProgressObserver: Send + Sync {
    fn on_transition(&self, step: &ProgressStep, overall_percent: f64);
}

/// Tracks ordered steps, computes overall progress and a time-remaining
/// estimate, and auto-finalizes once every step reaches a terminal state.
pub struct ProgressTracker {
    steps: Vec<ProgressStep>,
    observers: Vec<Arc<dyn ProgressObserver>>,
    started_at: Instant,
    finalized: bool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            observers: Vec::new(),
            started_at: Instant::now(),
            finalized: false,
        }
    }

    /// Register a step; insertion order is execution order
    pub fn add_step(&mut self, id: &str, name: &str, estimated: Duration) {
        self.steps.push(ProgressStep::new(id, name, estimated));
    }

    pub fn register_observer(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    pub fn steps(&self) -> &[ProgressStep] {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&ProgressStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn start_step(&mut self, id: &str) -> BootstrapResult<()> {
        self.transition(id, |step| {
            step.status = StepStatus::InProgress;
            step.started_at = Some(Utc::now());
            step.started_instant = Some(Instant::now());
        })
    }

    /// Update the in-progress percentage of a step (clamped to 0-100)
    pub fn update_percent(&mut self, id: &str, percent: f64) -> BootstrapResult<()> {
        self.transition(id, |step| {
            step.percent = percent.clamp(0.0, 100.0);
        })
    }

    pub fn complete_step(&mut self, id: &str) -> BootstrapResult<()> {
        self.transition(id, |step| step.finish(StepStatus::Completed))
    }

    pub fn fail_step(&mut self, id: &str, reason: &str) -> BootstrapResult<()> {
        let reason = reason.to_string();
        self.transition(id, move |step| {
            step.metadata.insert("failure".to_string(), reason);
            step.finish(StepStatus::Failed);
        })
    }

    pub fn skip_step(&mut self, id: &str, reason: &str) -> BootstrapResult<()> {
        let reason = reason.to_string();
        self.transition(id, move |step| {
            step.metadata.insert("skip_reason".to_string(), reason);
            step.finish(StepStatus::Skipped);
        })
    }

    pub fn set_metadata(&mut self, id: &str, key: &str, value: &str) -> BootstrapResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.transition(id, move |step| {
            step.metadata.insert(key, value);
        })
    }

    /// Overall completion: mean of per-step completion percentages
    pub fn overall_percent(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let total: f64 = self.steps.iter().map(|s| s.completion()).sum();
        total / self.steps.len() as f64
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time-remaining estimate.
    ///
    /// Before any step completes this is the sum of unfinished step
    /// estimates; afterwards it extrapolates from the observed progress rate.
    pub fn eta(&self) -> Option<Duration> {
        let overall = self.overall_percent();
        if overall >= 100.0 {
            return Some(Duration::ZERO);
        }
        let any_terminal = self.steps.iter().any(|s| s.status.is_terminal());
        if !any_terminal {
            let remaining: Duration = self
                .steps
                .iter()
                .filter(|s| !s.status.is_terminal())
                .map(|s| s.estimated)
                .sum();
            return Some(remaining);
        }
        if overall <= 0.0 {
            return None;
        }
        let elapsed = self.elapsed().as_secs_f64();
        let total_projected = elapsed / (overall / 100.0);
        Some(Duration::from_secs_f64(
            (total_projected - elapsed).max(0.0),
        ))
    }

    fn transition<F>(&mut self, id: &str, apply: F) -> BootstrapResult<()>
    where
        F: FnOnce(&mut ProgressStep),
    {
        let index = self
            .steps
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| {
                BootstrapError::Configuration(format!("unknown progress step '{}'", id))
            })?;
        apply(&mut self.steps[index]);

        let overall = self.overall_percent();
        let step_snapshot = self.steps[index].clone();
        for observer in &self.observers {
            let result = catch_unwind(AssertUnwindSafe(|| {
                observer.on_transition(&step_snapshot, overall)
            }));
            if result.is_err() {
                tracing::warn!(step = %id, "progress observer panicked; continuing");
            }
        }

        if !self.finalized && self.steps.iter().all(|s| s.status.is_terminal()) {
            self.finalized = true;
            tracing::debug!(
                elapsed_ms = self.elapsed().as_millis() as u64,
                "progress tracker finalized"
            );
        }
        Ok(())
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
