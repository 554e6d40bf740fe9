//! Command handlers behind the CLI; each one runs against a selected fleet.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::artifact::{
    Artifact, ArtifactDeployer, ConfiguredSource, FleetDeployer, QuickstartSource as _,
};
use crate::backup::{store_from_config, BackupManager, BackupMode, BackupReport};
use crate::check::{CheckRunner, HttpTransport, ReqwestTransport};
use crate::config::FleetConfig;
use crate::context::{InvocationContext, Notifier};
use crate::error::Result;
use crate::instance::{
    build_fleet, filter_instances, local_instances, Instance, LocalInstanceManager, LocalStatus,
};
use crate::orchestrator::Orchestrator;

/// Everything one invocation works with. Dropped when the command is done.
pub struct Launcher {
    context: Arc<InvocationContext>,
    manager: LocalInstanceManager,
    orchestrator: Orchestrator,
    instances: Vec<Instance>,
}

impl Launcher {
    /// Build the fleet, narrowed to the instances whose name matches `pattern`.
    pub fn new(
        config: FleetConfig,
        pattern: Option<&str>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let transport = ReqwestTransport::new(Duration::from_millis(
            config.checks.connection_timeout_ms,
        ))?;
        Self::with_collaborators(config, pattern, Arc::new(transport), notifier)
    }

    pub fn with_collaborators(
        config: FleetConfig,
        pattern: Option<&str>,
        transport: Arc<dyn HttpTransport>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let fleet = build_fleet(&config)?;
        let instances = match pattern {
            Some(pattern) => filter_instances(&fleet, pattern)?,
            None => fleet,
        };
        let orchestrator = Orchestrator::from_config(&config);
        let context = Arc::new(InvocationContext::new(config).with_notifier(notifier));
        let manager = LocalInstanceManager::new(
            Arc::clone(&context),
            Arc::new(CheckRunner::new(transport)),
        );
        Ok(Self {
            context,
            manager,
            orchestrator,
            instances,
        })
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    fn config(&self) -> &FleetConfig {
        &self.context.config
    }

    async fn on_locals<F, Fut>(&self, action: F) -> Result<()>
    where
        F: Fn(LocalInstanceManager, Instance) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let locals = local_instances(&self.instances);
        if locals.is_empty() {
            log::warn!("No local instances selected");
            return Ok(());
        }
        let manager = self.manager.clone();
        self.orchestrator
            .run_all(&locals, move |instance| action(manager.clone(), instance))
            .await?;
        Ok(())
    }

    // === Local instances ===

    pub async fn create(&self) -> Result<()> {
        let source = ConfiguredSource::new(
            self.config().local.quickstart.clone(),
            Duration::from_millis(self.config().checks.connection_timeout_ms),
        )?;
        let staged = Arc::new(source.stage().await?);
        self.on_locals(move |manager, instance| {
            let staged = Arc::clone(&staged);
            async move { manager.create(&instance, &staged).await }
        })
        .await
    }

    pub async fn up(&self) -> Result<()> {
        self.on_locals(|manager, instance| async move { manager.up(&instance).await })
            .await
    }

    pub async fn down(&self) -> Result<()> {
        self.on_locals(|manager, instance| async move { manager.down(&instance).await })
            .await
    }

    pub async fn restart(&self) -> Result<()> {
        self.on_locals(|manager, instance| async move { manager.restart(&instance).await })
            .await
    }

    pub async fn kill(&self) -> Result<()> {
        self.on_locals(|manager, instance| async move { manager.kill(&instance).await })
            .await
    }

    pub async fn destroy(&self) -> Result<()> {
        self.on_locals(|manager, instance| async move { manager.destroy(&instance).await })
            .await
    }

    /// Status of every selected local instance, in fleet order.
    pub async fn status(&self) -> Vec<(String, LocalStatus)> {
        let manager = self.manager.clone();
        self.orchestrator
            .each(&local_instances(&self.instances), move |instance| {
                let manager = manager.clone();
                async move { Ok(manager.check_status(&instance).await) }
            })
            .await
            .into_iter()
            .map(|unit| {
                let status = unit.result.unwrap_or(LocalStatus::Unrecognized);
                (unit.instance, status)
            })
            .collect()
    }

    // === Whole fleet ===

    /// Wait until every selected instance, local or remote, passes its up checks.
    pub async fn await_up(&self) -> Result<()> {
        let manager = self.manager.clone();
        self.orchestrator
            .run_all(&self.instances, move |instance| {
                let manager = manager.clone();
                async move { manager.await_up(&instance).await }
            })
            .await?;
        Ok(())
    }

    pub async fn deploy(&self, paths: &[PathBuf]) -> Result<()> {
        let artifacts: Vec<Artifact> = paths.iter().map(Artifact::new).collect();
        let deployer: Arc<dyn ArtifactDeployer> = Arc::new(FleetDeployer::new(
            Duration::from_millis(self.config().checks.connection_timeout_ms),
        )?);
        let validator = Arc::clone(&deployer);
        self.orchestrator
            .deploy(
                &artifacts,
                &self.instances,
                move |artifact| validator.validate(artifact),
                move |artifact: Artifact, instance: Instance| {
                    let deployer = Arc::clone(&deployer);
                    async move { deployer.deploy(&artifact, &instance).await }
                },
            )
            .await?;
        self.context
            .notify("Deployed", &format!("{} artifact(s)", artifacts.len()));
        Ok(())
    }

    // === Backup ===

    /// Back up the selected local instances; `mode` defaults to the configured one.
    pub async fn backup(&self, mode: Option<&str>) -> Result<BackupReport> {
        let mode: BackupMode = mode.unwrap_or(&self.config().backup.mode).parse()?;
        let store = store_from_config(&self.config().backup)?;
        BackupManager::new(self.manager.clone(), store)
            .run(mode, &self.instances)
            .await
    }

    pub async fn restore(&self, archive: &Path) -> Result<()> {
        BackupManager::new(self.manager.clone(), None)
            .restore(archive, &self.instances)
            .await
    }
}
