//! Fan-out of operations over a fleet.
//!
//! Units on different instances may run concurrently (bounded by a worker
//! semaphore); units on the same instance always run one at a time through
//! a per-instance lock. Every unit is joined before a call returns.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::FleetConfig;
use crate::error::{AppError, Result};
use crate::instance::Instance;

/// Outcome of one unit, keyed by instance name.
#[derive(Debug)]
pub struct UnitResult<T> {
    pub instance: String,
    pub result: Result<T>,
}

type InstanceLock = Arc<tokio::sync::Mutex<()>>;

pub struct Orchestrator {
    parallel: bool,
    workers: Arc<Semaphore>,
    locks: Mutex<HashMap<String, InstanceLock>>,
}

impl Orchestrator {
    pub fn new(parallel: bool, max_workers: usize) -> Self {
        Self {
            parallel,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(config.parallel, config.workers())
    }

    fn lock_for(&self, instance: &Instance) -> InstanceLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(instance.id.clone()).or_default())
    }

    /// Run `action` once per instance; results come back in instance order.
    pub async fn each<T, F, Fut>(&self, instances: &[Instance], action: F) -> Vec<UnitResult<T>>
    where
        T: Send + 'static,
        F: Fn(Instance) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.parallel {
            let mut results = Vec::with_capacity(instances.len());
            for instance in instances {
                let lock = self.lock_for(instance);
                let _guard = lock.lock().await;
                results.push(UnitResult {
                    instance: instance.name.clone(),
                    result: action(instance.clone()).await,
                });
            }
            return results;
        }

        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::with_capacity(instances.len());
        for (index, instance) in instances.iter().enumerate() {
            let lock = self.lock_for(instance);
            let workers = Arc::clone(&self.workers);
            let action = action.clone();
            let instance = instance.clone();
            let name = instance.name.clone();
            let handle = tasks.spawn(async move {
                let _guard = lock.lock().await;
                match workers.acquire_owned().await {
                    Ok(_permit) => action(instance).await,
                    Err(e) => Err(AppError::other(format!("Worker pool closed: {e}"))),
                }
            });
            spawned.insert(handle.id(), (index, name));
        }

        let mut indexed = Vec::with_capacity(instances.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => {
                    let id = e.id();
                    (id, Err(AppError::other(format!("Instance task aborted: {e}"))))
                }
            };
            if let Some((index, instance)) = spawned.remove(&id) {
                indexed.push((index, UnitResult { instance, result }));
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, unit)| unit).collect()
    }

    /// Like [`Self::each`], but fails once all units are done if any failed.
    pub async fn run_all<T, F, Fut>(&self, instances: &[Instance], action: F) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(Instance) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        aggregate(self.each(instances, action).await)
    }

    /// Apply every artifact to every instance.
    ///
    /// Artifacts go one after another; each is applied to all instances
    /// before the next starts. All artifacts are validated up front, and a
    /// stage with failures stops the rollout.
    pub async fn deploy<A, V, F, Fut>(
        &self,
        artifacts: &[A],
        instances: &[Instance],
        validate: V,
        action: F,
    ) -> Result<()>
    where
        A: Clone + Send + Sync + std::fmt::Display + 'static,
        V: Fn(&A) -> Result<()>,
        F: Fn(A, Instance) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        for artifact in artifacts {
            validate(artifact)?;
        }
        for artifact in artifacts {
            log::info!("Deploying {} to {} instance(s)", artifact, instances.len());
            let action = action.clone();
            let artifact = artifact.clone();
            self.run_all(instances, move |instance| action(artifact.clone(), instance))
                .await?;
        }
        Ok(())
    }
}

/// Collect successes, or an orchestration error naming every failed instance.
pub fn aggregate<T>(units: Vec<UnitResult<T>>) -> Result<Vec<T>> {
    let mut values = Vec::with_capacity(units.len());
    let mut failed = Vec::new();
    let mut cause = None;
    for unit in units {
        match unit.result {
            Ok(value) => values.push(value),
            Err(e) => {
                log::error!("Instance '{}' failed: {}", unit.instance, e);
                failed.push(unit.instance);
                cause.get_or_insert(e);
            }
        }
    }
    match cause {
        Some(cause) => Err(AppError::orchestration(&failed, &cause)),
        None => Ok(values),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::ErrorKind;
    use crate::instance::build_fleet;

    fn fleet() -> Vec<Instance> {
        let mut config = FleetConfig::default();
        config.environment = "local".to_string();
        build_fleet(&config).unwrap()
    }

    #[tokio::test]
    async fn artifacts_reach_all_instances_before_the_next() {
        let fleet = fleet();
        let events: Arc<Mutex<Vec<(String, String, &'static str)>>> = Arc::default();
        let orchestrator = Orchestrator::new(true, 4);

        let recorded = Arc::clone(&events);
        orchestrator
            .deploy(
                &["A".to_string(), "B".to_string()],
                &fleet,
                |_| Ok(()),
                move |artifact: String, instance: Instance| {
                    let events = Arc::clone(&recorded);
                    async move {
                        let name = instance.name.clone();
                        events
                            .lock()
                            .unwrap()
                            .push((artifact.clone(), name.clone(), "start"));
                        let delay = if instance.id == "author" { 30 } else { 5 };
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        events.lock().unwrap().push((artifact, name, "end"));
                        Ok(())
                    }
                },
            )
            .await
            .unwrap();

        let events = events.lock().unwrap();
        let last_a_end = events
            .iter()
            .rposition(|(a, _, phase)| a == "A" && *phase == "end")
            .unwrap();
        let first_b_start = events
            .iter()
            .position(|(a, _, phase)| a == "B" && *phase == "start")
            .unwrap();
        assert!(last_a_end < first_b_start);
        assert_eq!(events.len(), 8);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_siblings() {
        let fleet = fleet();
        let completed = Arc::new(AtomicUsize::new(0));
        let orchestrator = Orchestrator::new(true, 4);

        let counter = Arc::clone(&completed);
        let err = orchestrator
            .run_all(&fleet, move |instance: Instance| {
                let counter = Arc::clone(&counter);
                async move {
                    if instance.id == "author" {
                        return Err(AppError::script_failed("start", Some(1), ""));
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Orchestration);
        assert_eq!(err.payload("failed"), Some("local-author"));
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_unit_is_reported_as_failed() {
        let fleet = fleet();
        let orchestrator = Orchestrator::new(true, 4);

        let units = orchestrator
            .each(&fleet, |instance: Instance| async move {
                if instance.id == "author" {
                    std::panic::panic_any("author unit crashed");
                }
                Ok(instance.name)
            })
            .await;
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].instance, "local-author");
        assert!(units[0].result.is_err());
        assert_eq!(units[1].result.as_deref().ok(), Some("local-publish"));

        let err = aggregate(units).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Orchestration);
        assert_eq!(err.payload("failed"), Some("local-author"));
    }

    #[tokio::test]
    async fn same_instance_is_never_processed_concurrently() {
        let fleet = fleet();
        let author = vec![fleet[0].clone()];
        let orchestrator = Arc::new(Orchestrator::new(true, 8));
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let action = {
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            move |_instance: Instance| {
                let active = Arc::clone(&active);
                let overlaps = Arc::clone(&overlaps);
                async move {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        };

        let calls = (0..4).map(|_| orchestrator.run_all(&author, action.clone()));
        for result in futures_util::future::join_all(calls).await {
            result.unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sequential_mode_keeps_order() {
        let fleet = fleet();
        let order: Arc<Mutex<Vec<String>>> = Arc::default();
        let orchestrator = Orchestrator::new(false, 4);

        let recorded = Arc::clone(&order);
        let names = orchestrator
            .run_all(&fleet, move |instance: Instance| {
                let recorded = Arc::clone(&recorded);
                async move {
                    recorded.lock().unwrap().push(instance.name.clone());
                    Ok(instance.name)
                }
            })
            .await
            .unwrap();
        assert_eq!(names, vec!["local-author", "local-publish"]);
        assert_eq!(*order.lock().unwrap(), names);
    }

    #[tokio::test]
    async fn invalid_artifact_stops_before_any_work() {
        let fleet = fleet();
        let touched = Arc::new(AtomicUsize::new(0));
        let orchestrator = Orchestrator::new(true, 4);

        let counter = Arc::clone(&touched);
        let err = orchestrator
            .deploy(
                &["ok.zip".to_string(), "missing.zip".to_string()],
                &fleet,
                |artifact| {
                    if artifact.starts_with("missing") {
                        Err(AppError::config(format!("Artifact not found: {artifact}")))
                    } else {
                        Ok(())
                    }
                },
                move |_artifact: String, _instance: Instance| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(touched.load(Ordering::SeqCst), 0);
    }
}
