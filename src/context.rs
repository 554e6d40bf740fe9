//! Per-invocation state shared by every unit of one orchestrated call.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::FleetConfig;
use crate::instance::DeployProgress;

/// Operator-facing messages at the end of an operation.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Step-by-step progress of long-running instance work.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: DeployProgress);
}

#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        log::info!("{}: {}", title, message);
    }
}

#[derive(Debug, Default)]
pub struct LogProgressReporter;

impl ProgressReporter for LogProgressReporter {
    fn report(&self, progress: DeployProgress) {
        log::info!(
            "[{}] {:>3}% {} - {}",
            progress.instance,
            progress.progress,
            progress.step,
            progress.message
        );
    }
}

type CacheEntry = Arc<dyn Any + Send + Sync>;

/// Config, collaborators and a typed cache for one invocation.
///
/// Dropping the context drops everything memoized during the call.
pub struct InvocationContext {
    pub config: FleetConfig,
    cache: Mutex<HashMap<String, CacheEntry>>,
    notifier: Arc<dyn Notifier>,
    progress: Arc<dyn ProgressReporter>,
}

impl InvocationContext {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
            notifier: Arc::new(LogNotifier),
            progress: Arc::new(LogProgressReporter),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn notify(&self, title: &str, message: &str) {
        self.notifier.notify(title, message);
    }

    pub fn progress(&self, instance: &str, step: &str, message: &str, progress: u8) {
        self.progress.report(DeployProgress {
            instance: instance.to_string(),
            step: step.to_string(),
            message: message.to_string(),
            progress,
        });
    }

    /// Cached value under `key`, if one of type `T` was stored.
    pub fn cached<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(key)
            .and_then(|entry| entry.downcast_ref::<T>())
            .cloned()
    }

    pub fn put<T>(&self, key: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.insert(key.to_string(), Arc::new(value));
    }
}
