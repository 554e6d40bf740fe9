//! Polling loop over a set of checks.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::{
    AvailableCheck, Check, HttpTransport, InstanceHttp, MetadataCheck, StateBag, StatusLogger,
    UnavailableCheck, PASSED_STATUS,
};
use crate::config::CheckConfig;
use crate::context::InvocationContext;
use crate::error::{AppError, Result};
use crate::instance::{Instance, LocalInstance};

/// What a check sees during one iteration.
pub struct CheckGroup<'a> {
    pub instance: &'a Instance,
    pub http: InstanceHttp<'a>,
    pub context: &'a InvocationContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl CheckSettings {
    pub fn up(config: &CheckConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            timeout: Duration::from_millis(config.up_timeout_ms),
        }
    }

    pub fn down(config: &CheckConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            timeout: Duration::from_millis(config.down_timeout_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub passed: bool,
    pub status: String,
    pub results: Vec<(&'static str, StatusLogger)>,
}

pub struct CheckRunner {
    transport: Arc<dyn HttpTransport>,
}

impl CheckRunner {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Checks confirming an instance is up and serving.
    pub fn up_checks(config: &CheckConfig) -> Vec<Box<dyn Check>> {
        vec![
            Box::new(AvailableCheck {
                path: config.available_path.clone(),
            }),
            Box::new(MetadataCheck),
        ]
    }

    pub fn down_checks() -> Vec<Box<dyn Check>> {
        vec![Box::new(UnavailableCheck)]
    }

    /// One iteration over the enabled checks. Failures never abort siblings.
    pub async fn check_once(
        &self,
        context: &InvocationContext,
        instance: &Instance,
        checks: &[Box<dyn Check>],
        state: &StateBag,
    ) -> CheckOutcome {
        let initialized = LocalInstance::of(instance).map_or(true, |local| local.initialized());
        let group = CheckGroup {
            instance,
            http: InstanceHttp::new(self.transport.as_ref(), instance, state, initialized),
            context,
        };

        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            if !context.config.checks.is_enabled(check.name()) {
                continue;
            }
            let mut status = StatusLogger::default();
            check.check(&group, &mut status).await;
            results.push((check.name(), status));
        }

        let passed = results.iter().all(|(_, status)| status.success());
        let status = results
            .iter()
            .find(|(_, status)| !status.success())
            .map_or_else(|| PASSED_STATUS.to_string(), |(_, status)| status.status());
        CheckOutcome {
            passed,
            status,
            results,
        }
    }

    /// Poll until every enabled check passes or `settings.timeout` elapses.
    ///
    /// The state bag lives for this call only.
    pub async fn await_checks(
        &self,
        context: &InvocationContext,
        instance: &Instance,
        checks: &[Box<dyn Check>],
        settings: CheckSettings,
    ) -> Result<CheckOutcome> {
        let state = StateBag::default();
        let deadline = Instant::now() + settings.timeout;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = self.check_once(context, instance, checks, &state).await;
            if outcome.passed {
                log::info!(
                    "Instance '{}' checks passed after {} attempt(s)",
                    instance.name,
                    attempt
                );
                return Ok(outcome);
            }
            log::debug!(
                "Instance '{}' attempt {}: {}",
                instance.name,
                attempt,
                outcome.status
            );

            let now = Instant::now();
            if now >= deadline {
                return Err(AppError::health_check(&instance.name, outcome.status));
            }
            tokio::time::sleep(settings.interval.min(deadline - now)).await;
        }
    }
}
