//! # Telemetry: Logging and Failure Reporting
//!
//! Callback failures are isolated from the resolution walk; this module is
//! where they surface. The default reporter writes a `tracing` warning, and a
//! custom [`FailureReporter`] can be installed process-wide or on a single
//! deferral.

use crate::queue::Phase;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

static REPORTER: RwLock<Option<Arc<dyn FailureReporter>>> = parking_lot::const_rwlock(None);

/// Initialize a simple stdout tracing subscriber for development.
///
/// Does nothing if a global subscriber is already set.
pub fn init_stdout_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,fate_core=debug"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// What went wrong inside one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The callback returned `Err`.
    Error(String),
    /// The callback panicked.
    Panic(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Error(msg) => write!(f, "callback returned an error: {msg}"),
            FailureKind::Panic(msg) => write!(f, "callback panicked: {msg}"),
        }
    }
}

/// A caught callback failure, reported after the fact.
#[derive(Debug, Clone)]
pub struct CallbackFailure {
    pub deferral: Uuid,
    /// Path of the queue the callback was registered on.
    pub state: String,
    /// `None` for late registrations invoked immediately.
    pub phase: Option<Phase>,
    pub kind: FailureKind,
}

/// Sink for callback failures.
pub trait FailureReporter: Send + Sync + 'static {
    fn report(&self, failure: &CallbackFailure);
}

impl<F> FailureReporter for F
where
    F: Fn(&CallbackFailure) + Send + Sync + 'static,
{
    fn report(&self, failure: &CallbackFailure) {
        self(failure)
    }
}

/// Default sink: a structured `tracing` warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl FailureReporter for TracingReporter {
    fn report(&self, failure: &CallbackFailure) {
        tracing::warn!(
            fate.deferral = %failure.deferral,
            fate.state = %failure.state,
            phase = ?failure.phase,
            error = %failure.kind,
            "callback failed during dispatch"
        );
    }
}

/// Install a process-wide reporter, replacing the tracing default.
pub fn set_failure_reporter(reporter: impl FailureReporter) {
    *REPORTER.write() = Some(Arc::new(reporter));
}

/// Restore the tracing default.
pub fn clear_failure_reporter() {
    *REPORTER.write() = None;
}

pub(crate) fn report(local: Option<&Arc<dyn FailureReporter>>, failure: &CallbackFailure) {
    if let Some(reporter) = local {
        reporter.report(failure);
        return;
    }
    let global = REPORTER.read().clone();
    match global {
        Some(reporter) => reporter.report(failure),
        None => TracingReporter.report(failure),
    }
}
