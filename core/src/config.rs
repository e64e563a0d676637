//! Process-wide dispatch policy.
//!
//! Defaults isolate observers from each other: a failing callback is caught,
//! reported and skipped. The policy can be loaded from TOML and overridden
//! from the environment.
//!
//! ```toml
//! catch_panics = true
//! report_failures = false
//! ```

use crate::error::{FateError, FateResult};
use parking_lot::RwLock;
use serde::Deserialize;

static CONFIG: RwLock<FateConfig> = parking_lot::const_rwlock(FateConfig::DEFAULT);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FateConfig {
    /// Catch panics raised by callbacks instead of unwinding through the resolver.
    pub catch_panics: bool,
    /// Hand caught failures to the active `FailureReporter`.
    pub report_failures: bool,
}

impl FateConfig {
    const DEFAULT: FateConfig = FateConfig {
        catch_panics: true,
        report_failures: true,
    };

    pub fn from_toml_str(source: &str) -> FateResult<Self> {
        toml::from_str(source).map_err(|e| FateError::Config(e.to_string()))
    }

    /// Overlay `FATE_CATCH_PANICS` / `FATE_REPORT_FAILURES` onto `self`.
    pub fn from_env(self) -> FateResult<Self> {
        self.overlay(|key| std::env::var(key).ok())
    }

    fn overlay<F>(self, lookup: F) -> FateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(FateConfig {
            catch_panics: flag(&lookup, "FATE_CATCH_PANICS")?.unwrap_or(self.catch_panics),
            report_failures: flag(&lookup, "FATE_REPORT_FAILURES")?
                .unwrap_or(self.report_failures),
        })
    }

    /// Snapshot of the installed configuration.
    pub fn current() -> Self {
        *CONFIG.read()
    }

    /// Make this the process-wide configuration.
    pub fn install(self) {
        *CONFIG.write() = self;
        tracing::debug!(config = ?self, "fate configuration installed");
    }
}

impl Default for FateConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn flag<F>(lookup: &F, key: &str) -> FateResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            parse_flag(&raw)
                .ok_or_else(|| FateError::Config(format!("{key}: expected a boolean, got `{raw}`")))
        })
        .transpose()
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Serializes tests that touch the installed config or the global reporter.
#[cfg(test)]
pub(crate) mod testing {
    use super::FateConfig;
    use crate::telemetry;
    use parking_lot::{Mutex, MutexGuard};

    static GLOBALS: Mutex<()> = parking_lot::const_mutex(());

    /// Holds the lock and restores the defaults on drop.
    pub(crate) struct Globals {
        _lock: MutexGuard<'static, ()>,
    }

    pub(crate) fn globals() -> Globals {
        let lock = GLOBALS.lock();
        reset();
        Globals { _lock: lock }
    }

    impl Drop for Globals {
        fn drop(&mut self) {
            reset();
        }
    }

    fn reset() {
        FateConfig::default().install();
        telemetry::clear_failure_reporter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Callback;
    use crate::deferral::Deferral;
    use crate::telemetry::{self, CallbackFailure};
    use parking_lot::Mutex;
    use ahash::AHashMap;
    use std::sync::Arc;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: AHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_toml_fills_missing_fields_with_defaults() {
        let config = FateConfig::from_toml_str("report_failures = false").unwrap();
        assert!(config.catch_panics);
        assert!(!config.report_failures);
    }

    #[test]
    fn test_rejects_bad_toml() {
        assert!(matches!(
            FateConfig::from_toml_str("catch_panics = \"sometimes\""),
            Err(FateError::Config(_))
        ));
    }

    #[test]
    fn test_overlay_replaces_only_present_flags() {
        let base = FateConfig {
            catch_panics: true,
            report_failures: true,
        };
        let config = base.overlay(lookup(&[("FATE_REPORT_FAILURES", "off")])).unwrap();
        assert!(config.catch_panics);
        assert!(!config.report_failures);

        assert_eq!(base.overlay(lookup(&[])).unwrap(), base);
    }

    #[test]
    fn test_overlay_rejects_non_boolean_values() {
        let error = FateConfig::default()
            .overlay(lookup(&[("FATE_CATCH_PANICS", "sometimes")]))
            .unwrap_err();
        assert!(matches!(error, FateError::Config(msg) if msg.contains("FATE_CATCH_PANICS")));
    }

    #[test]
    fn test_from_env_reads_process_environment() {
        let _globals = testing::globals();
        // SAFETY: the globals lock serializes every test touching FATE_* variables.
        unsafe { std::env::set_var("FATE_CATCH_PANICS", "no") };
        let config = FateConfig::default().from_env();
        unsafe { std::env::remove_var("FATE_CATCH_PANICS") };

        let config = config.unwrap();
        assert!(!config.catch_panics);
        assert!(config.report_failures);
    }

    #[test]
    fn test_install_changes_dispatch() {
        let _globals = testing::globals();
        let reported = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&reported);
        telemetry::set_failure_reporter(move |_: &CallbackFailure| *sink.lock() += 1);

        let failing = || {
            let deferral = Deferral::<i32>::binary();
            deferral
                .register_state(
                    &deferral.potential().affirmative(),
                    crate::queue::Phase::Capture,
                    [Callback::fallible(|_| Err(anyhow::anyhow!("refused")))],
                )
                .unwrap();
            deferral.affirm(vec![]);
        };

        FateConfig::from_toml_str("report_failures = false").unwrap().install();
        assert!(!FateConfig::current().report_failures);
        failing();
        assert_eq!(*reported.lock(), 0);

        FateConfig::default().install();
        failing();
        assert_eq!(*reported.lock(), 1);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag(" On "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
