//! Health checks run against one instance, polled until they pass.

mod builtin;
mod http;
mod runner;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

pub use builtin::{AvailableCheck, MetadataCheck, UnavailableCheck, METADATA_PATH};
pub use http::{HttpResponse, HttpTransport, InstanceHttp, ReqwestTransport, STATE_AUTH_INIT};
pub use runner::{CheckGroup, CheckOutcome, CheckRunner, CheckSettings};

/// Status of a run or check without errors.
pub const PASSED_STATUS: &str = "Check passed";

/// Maximum values listed in a status detail.
pub const LOG_VALUES_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub summary: String,
    pub details: String,
    pub level: Level,
}

/// Entries produced by one check in one polling iteration.
#[derive(Debug, Clone, Default)]
pub struct StatusLogger {
    pub entries: Vec<StatusEntry>,
}

impl StatusLogger {
    pub fn info(&mut self, summary: impl Into<String>, details: impl Into<String>) {
        self.push(Level::Info, summary.into(), details.into());
    }

    pub fn error(&mut self, summary: impl Into<String>, details: impl Into<String>) {
        self.push(Level::Error, summary.into(), details.into());
    }

    fn push(&mut self, level: Level, summary: String, details: String) {
        self.entries.push(StatusEntry {
            summary,
            details,
            level,
        });
    }

    pub fn success(&self) -> bool {
        self.entries.iter().all(|e| e.level != Level::Error)
    }

    /// First error summary, or [`PASSED_STATUS`].
    pub fn status(&self) -> String {
        self.entries
            .iter()
            .find(|e| e.level == Level::Error)
            .map_or_else(|| PASSED_STATUS.to_string(), |e| e.summary.clone())
    }
}

/// Untyped values kept across the iterations of one polling run.
///
/// Owned by the run, never by the instance, so nothing leaks between runs
/// or between instances.
#[derive(Debug, Default)]
pub struct StateBag {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl StateBag {
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(key).and_then(serde_json::Value::as_bool)
    }

    pub fn set(&self, key: &str, value: impl Into<serde_json::Value>) {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.into());
    }
}

/// A named probe; it records outcomes instead of failing.
#[async_trait]
pub trait Check: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, group: &CheckGroup<'_>, status: &mut StatusLogger);
}

/// Join up to [`LOG_VALUES_COUNT`] values, mentioning how many were left out.
pub fn log_values<S: AsRef<str>>(values: &[S]) -> String {
    let shown = values
        .iter()
        .take(LOG_VALUES_COUNT)
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\n");
    match values.len().saturating_sub(LOG_VALUES_COUNT) {
        0 => shown,
        other => format!("{shown}\n... and other ({other})"),
    }
}
