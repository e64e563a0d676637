//! Callbacks and the isolated dispatch helper.

use crate::config::FateConfig;
use crate::queue::Phase;
use crate::resolution::Resolution;
use crate::telemetry::{self, CallbackFailure, FailureKind, FailureReporter};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

type Invoke<A> = Box<dyn FnOnce(&Resolution<A>) -> anyhow::Result<()> + Send>;

/// A one-shot observer of a resolution.
pub struct Callback<A> {
    pub(crate) invoke: Invoke<A>,
}

impl<A: 'static> Callback<A> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&Resolution<A>) + Send + 'static,
    {
        Callback {
            invoke: Box::new(move |resolution: &Resolution<A>| {
                f(resolution);
                Ok(())
            }),
        }
    }

    /// A callback whose `Err` is reported instead of silently dropped.
    pub fn fallible<F>(f: F) -> Self
    where
        F: FnOnce(&Resolution<A>) -> anyhow::Result<()> + Send + 'static,
    {
        Callback { invoke: Box::new(f) }
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").finish_non_exhaustive()
    }
}

/// Invokes callbacks against one frozen resolution, one at a time.
///
/// A failing callback is reported and skipped; it never stops the walk.
pub(crate) struct Dispatch<'a, A> {
    pub(crate) deferral: Uuid,
    pub(crate) resolution: &'a Resolution<A>,
    pub(crate) reporter: Option<&'a Arc<dyn FailureReporter>>,
    pub(crate) config: FateConfig,
}

impl<A> Dispatch<'_, A> {
    pub(crate) fn invoke(&self, callback: Callback<A>, queue: &str, phase: Option<Phase>) {
        let resolution = self.resolution;
        let outcome = if self.config.catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| (callback.invoke)(resolution)))
                .unwrap_or_else(|payload| Err(PanicPayload(panic_message(payload.as_ref())).into()))
        } else {
            (callback.invoke)(resolution)
        };

        let Err(error) = outcome else {
            return;
        };
        if !self.config.report_failures {
            return;
        }
        let kind = match error.downcast::<PanicPayload>() {
            Ok(PanicPayload(msg)) => FailureKind::Panic(msg),
            Err(other) => FailureKind::Error(format!("{other:#}")),
        };
        telemetry::report(
            self.reporter,
            &CallbackFailure {
                deferral: self.deferral,
                state: queue.to_string(),
                phase,
                kind,
            },
        );
    }
}

#[derive(Debug)]
struct PanicPayload(String);

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for PanicPayload {}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fate_flow::Potential;
    use parking_lot::Mutex;

    type Kinds = Arc<Mutex<Vec<FailureKind>>>;

    fn collector(kinds: &Kinds) -> Arc<dyn FailureReporter> {
        let kinds = Arc::clone(kinds);
        Arc::new(move |failure: &CallbackFailure| kinds.lock().push(failure.kind.clone()))
    }

    fn affirmed() -> Resolution<i32> {
        Resolution::new(Potential::binary().affirmative(), "yes".to_string(), None, vec![1])
    }

    fn dispatch<'a>(
        resolution: &'a Resolution<i32>,
        reporter: &'a Arc<dyn FailureReporter>,
        config: FateConfig,
    ) -> Dispatch<'a, i32> {
        Dispatch {
            deferral: Uuid::new_v4(),
            resolution,
            reporter: Some(reporter),
            config,
        }
    }

    #[test]
    fn test_errors_and_panics_are_reported() {
        let kinds: Kinds = Arc::default();
        let reporter = collector(&kinds);
        let resolution = affirmed();
        let dispatch = dispatch(&resolution, &reporter, FateConfig::default());

        dispatch.invoke(Callback::fallible(|_| Err(anyhow::anyhow!("denied"))), "resolved.yes", None);
        dispatch.invoke(Callback::new(|_| panic!("{}", "formatted")), "resolved.yes", None);
        dispatch.invoke(Callback::new(|r| assert_eq!(r.args(), &[1])), "resolved.yes", None);

        assert_eq!(
            *kinds.lock(),
            [
                FailureKind::Error("denied".to_string()),
                FailureKind::Panic("formatted".to_string()),
            ]
        );
    }

    #[test]
    fn test_report_failures_off_suppresses_reports() {
        let kinds: Kinds = Arc::default();
        let reporter = collector(&kinds);
        let resolution = affirmed();
        let config = FateConfig {
            report_failures: false,
            ..FateConfig::default()
        };
        let dispatch = dispatch(&resolution, &reporter, config);

        dispatch.invoke(Callback::fallible(|_| Err(anyhow::anyhow!("quiet"))), "resolved.yes", None);
        dispatch.invoke(Callback::new(|_| panic!("quiet")), "resolved.yes", None);
        assert!(kinds.lock().is_empty());
    }

    #[test]
    fn test_catch_panics_off_unwinds_through_dispatch() {
        let kinds: Kinds = Arc::default();
        let reporter = collector(&kinds);
        let resolution = affirmed();
        let config = FateConfig {
            catch_panics: false,
            ..FateConfig::default()
        };
        let dispatch = dispatch(&resolution, &reporter, config);

        let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
            dispatch.invoke(Callback::new(|_| panic!("escapes")), "resolved.yes", None);
        }));
        assert!(unwound.is_err());
        assert!(kinds.lock().is_empty());

        // Errors are still caught and reported.
        dispatch.invoke(Callback::fallible(|_| Err(anyhow::anyhow!("kept"))), "resolved.yes", None);
        assert_eq!(*kinds.lock(), [FailureKind::Error("kept".to_string())]);
    }
}
