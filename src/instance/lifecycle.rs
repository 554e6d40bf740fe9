//! Local instance process control (up/down/kill/status/destroy).

use std::sync::Arc;
use std::time::Duration;

use super::local::LocalInstance;
use super::status::LocalStatus;
use super::types::Instance;
use crate::check::{CheckRunner, CheckSettings};
use crate::context::InvocationContext;
use crate::error::{AppError, Result};
use crate::process::{execute, force_kill, is_process_alive, OutputMode, Script, ScriptKind};

const START_HINT: &str =
    "Instance start script failed! Check resources like disk free space, open HTTP ports etc.";

/// Drives provisioning and process control of local instances.
///
/// Cheap to clone; every clone shares the invocation context.
#[derive(Clone)]
pub struct LocalInstanceManager {
    pub(crate) context: Arc<InvocationContext>,
    pub(crate) checks: Arc<CheckRunner>,
}

impl LocalInstanceManager {
    pub fn new(context: Arc<InvocationContext>, checks: Arc<CheckRunner>) -> Self {
        Self { context, checks }
    }

    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    fn timeout(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    async fn run_script(
        &self,
        local: &LocalInstance<'_>,
        kind: ScriptKind,
        timeout: Duration,
        mode: OutputMode,
    ) -> Result<Option<i32>> {
        let script = Script::new(local.dir(), kind);
        let mut command = script.command(local.dir(), local.script_env());
        command.tag = format!("{} {}", local.name(), kind.as_str());
        let output = execute(&command, timeout, &[0], mode).await?;
        Ok(output.exit_code)
    }

    /// Start the instance and wait until its checks pass.
    pub async fn up(&self, instance: &Instance) -> Result<()> {
        let local = LocalInstance::of(instance)?;
        if !local.created() {
            return Err(AppError::invalid_instance(
                local.name(),
                "instance is not created, run create first",
            ));
        }

        log::info!("Starting instance '{}'", local.name());
        let config = &self.context.config;
        self.run_script(
            &local,
            ScriptKind::Start,
            Self::timeout(config.local.start_timeout_ms),
            OutputMode::Verbose,
        )
        .await
        .map_err(|e| {
            e.context(
                local.name(),
                format!("{START_HINT} Output is in {}", local.stdout_log().display()),
            )
        })?;

        self.await_up(instance).await?;

        let state = local.lock_state();
        if !state.is_initialized() {
            state.mark_initialized(local.dir())?;
            log::info!("Instance '{}' initialized", local.name());
        }
        self.context
            .notify("Instance up", &format!("{} at {}", local.name(), local.http_open_url()));
        Ok(())
    }

    /// Stop gracefully, falling back to a forced kill when allowed.
    pub async fn down(&self, instance: &Instance) -> Result<()> {
        let local = LocalInstance::of(instance)?;
        if !local.created() {
            log::info!("Instance '{}' is not created, nothing to stop", local.name());
            return Ok(());
        }

        let pid = local.pid();
        log::info!("Stopping instance '{}' (PID {})", local.name(), pid);
        let config = &self.context.config;
        let stopped = self
            .run_script(
                &local,
                ScriptKind::Stop,
                Self::timeout(config.local.stop_timeout_ms),
                OutputMode::Verbose,
            )
            .await;

        if let Err(e) = stopped {
            if config.local.fallback_kill && pid > 0 {
                log::warn!(
                    "Stop script of '{}' failed ({}), killing PID {}",
                    local.name(),
                    e,
                    pid
                );
                self.kill(instance).await?;
            } else {
                return Err(e.context(
                    local.name(),
                    format!(
                        "Instance stop script failed! Consider killing process manually using PID: {pid}."
                    ),
                ));
            }
        }

        self.await_down(instance).await?;
        self.context.notify("Instance down", local.name());
        Ok(())
    }

    /// Forced termination of the recorded PID, bypassing the stop script.
    pub async fn kill(&self, instance: &Instance) -> Result<()> {
        let local = LocalInstance::of(instance)?;
        let pid = local.pid();
        if pid == 0 {
            return Err(AppError::process(format!(
                "No PID recorded for instance '{}'",
                local.name()
            )));
        }
        if !is_process_alive(pid) {
            log::info!("Instance '{}' PID {} is not running", local.name(), pid);
            return Ok(());
        }
        log::info!("Killing instance '{}' (PID {})", local.name(), pid);
        tokio::task::spawn_blocking(move || force_kill(pid))
            .await
            .map_err(|e| AppError::process(format!("Kill task failed: {}", e)))??;
        Ok(())
    }

    pub async fn restart(&self, instance: &Instance) -> Result<()> {
        self.down(instance).await?;
        self.up(instance).await
    }

    /// Remove the instance directory; a never-created instance is fine.
    pub async fn destroy(&self, instance: &Instance) -> Result<()> {
        let local = LocalInstance::of(instance)?;
        if !local.touched() {
            log::debug!("Instance '{}' has no directory", local.name());
            return Ok(());
        }
        log::info!("Destroying instance '{}' at {:?}", local.name(), local.dir());
        std::fs::remove_dir_all(local.dir()).map_err(|e| {
            AppError::io(format!("Failed to delete {:?}: {}", local.dir(), e))
        })?;
        self.context.notify("Instance destroyed", local.name());
        Ok(())
    }

    /// Status script verdict. Never fails; problems read as unrecognized.
    pub async fn check_status(&self, instance: &Instance) -> LocalStatus {
        let Ok(local) = LocalInstance::of(instance) else {
            return LocalStatus::Unrecognized;
        };
        if !local.created() {
            return LocalStatus::Unrecognized;
        }
        let timeout = Self::timeout(self.context.config.local.status_timeout_ms);
        match self
            .run_script(&local, ScriptKind::Status, timeout, OutputMode::Quiet)
            .await
        {
            Ok(code) => {
                let status = LocalStatus::by_exit_code(code);
                log::debug!("Instance status of '{}' is {}", local.name(), status);
                status
            }
            Err(e) => {
                log::debug!("Instance status checking error of '{}': {}", local.name(), e);
                log::info!("Instance status of '{}' is not available", local.name());
                LocalStatus::Unrecognized
            }
        }
    }

    pub async fn running(&self, instance: &Instance) -> bool {
        self.check_status(instance).await.running()
    }

    /// Wait for the up checks; works for remote instances too.
    pub async fn await_up(&self, instance: &Instance) -> Result<()> {
        let config = &self.context.config.checks;
        let checks = CheckRunner::up_checks(config);
        self.checks
            .await_checks(&self.context, instance, &checks, CheckSettings::up(config))
            .await?;
        Ok(())
    }

    pub async fn await_down(&self, instance: &Instance) -> Result<()> {
        let config = &self.context.config.checks;
        self.checks
            .await_checks(
                &self.context,
                instance,
                &CheckRunner::down_checks(),
                CheckSettings::down(config),
            )
            .await?;
        Ok(())
    }
}
