//! Creating a local instance directory from staged quickstart files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::customize::customize;
use super::lifecycle::LocalInstanceManager;
use super::local::LocalInstance;
use super::lock::LockState;
use super::patch::{apply_patch_table, use_java_executable, PATCH_TABLE};
use super::types::Instance;
use crate::error::{AppError, Result};
use crate::fileset::FileSet;
use crate::paths::JAR_FILE;
use crate::process::{execute, OutputMode, ScriptCommand};

/// Quickstart files already fetched by a [`crate::artifact::QuickstartSource`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedQuickstart {
    pub jar: Option<PathBuf>,
    pub license: Option<PathBuf>,
}

fn copy_staged(source: Option<&Path>, target: &Path) -> Result<()> {
    if let Some(source) = source {
        log::info!("Copying {:?} to {:?}", source, target);
        fs::copy(source, target).map_err(|e| {
            AppError::io(format!("Failed to copy {:?} to {:?}: {}", source, target, e))
        })?;
    }
    Ok(())
}

fn patch_scripts(dir: &Path, executable_files: &[String]) -> Result<(usize, usize)> {
    let patched = apply_patch_table(dir, PATCH_TABLE)?;
    let executables = FileSet::new(executable_files)?;
    let java = use_java_executable(dir, &executables)?;
    Ok((patched, java))
}

/// `{java}` and `{jar}` placeholders of the unpack command.
fn unpack_argv(template: &[String], java: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace("{java}", java).replace("{jar}", JAR_FILE))
        .collect()
}

impl LocalInstanceManager {
    /// Provision the instance from scratch.
    ///
    /// Any failure aborts before `create.lock` is written, leaving the
    /// directory for diagnosis; re-running starts over from an empty dir.
    pub async fn create(&self, instance: &Instance, staged: &StagedQuickstart) -> Result<()> {
        let local = LocalInstance::of(instance)?;
        let name = local.name();
        let config = &self.context.config.local;
        log::info!("Creating instance '{}' at {:?}", name, local.dir());

        self.context.progress(name, "clean", "Preparing directory", 5);
        if local.dir().exists() {
            fs::remove_dir_all(local.dir()).map_err(|e| {
                AppError::provisioning(name, format!("Failed to clean {:?}: {}", local.dir(), e))
            })?;
        }
        fs::create_dir_all(local.dir())?;

        self.context.progress(name, "copy", "Copying quickstart files", 15);
        copy_staged(staged.jar.as_deref(), &local.jar())
            .and_then(|()| copy_staged(staged.license.as_deref(), &local.license()))
            .map_err(|e| {
                AppError::provisioning(name, format!("Copying staged files failed: {e}"))
            })?;

        if !local.jar().exists() {
            return Err(AppError::missing_staged_file(
                name,
                "Instance JAR file",
                &local.jar(),
            ));
        }
        if !local.license().exists() {
            return Err(AppError::missing_staged_file(
                name,
                "License file",
                &local.license(),
            ));
        }

        match local.standalone_version() {
            Some(version) => log::info!("Instance '{}' runs quickstart {}", name, version),
            None => log::debug!("Quickstart version of '{}' not determinable", name),
        }

        self.context.progress(name, "unpack", "Unpacking quickstart", 30);
        let argv = unpack_argv(&config.unpack_command, &config.java_executable);
        let mut command = ScriptCommand::from_argv(&argv, local.dir(), &format!("{name} unpack"))?;
        command.env = local.script_env();
        execute(
            &command,
            Duration::from_millis(config.start_timeout_ms),
            &[0],
            OutputMode::Verbose,
        )
        .await
        .map_err(|e| AppError::provisioning(name, format!("Unpacking failed: {e}")))?;

        self.context.progress(name, "patch", "Correcting control scripts", 60);
        let (patched, java) = patch_scripts(local.dir(), &config.executable_files)
            .map_err(|e| AppError::provisioning(name, format!("Patching scripts failed: {e}")))?;
        log::debug!("Patched {} script(s), {} java invocation(s)", patched, java);
        fs::create_dir_all(local.logs_dir())?;

        self.context.progress(name, "customize", "Customizing files", 80);
        customize(&local, config)
            .map_err(|e| AppError::provisioning(name, format!("Customizing failed: {e}")))?;

        LockState::mark_created(local.dir())?;
        self.context.progress(name, "done", "Instance created", 100);
        self.context.notify("Instance created", name);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::check::testing::ScriptedTransport;
    use crate::check::CheckRunner;
    use crate::context::tests::RecordingProgress;
    use crate::context::{InvocationContext, ProgressReporter};
    use crate::error::ErrorKind;
    use crate::instance::build_fleet;
    use crate::instance::lifecycle::tests::test_config;

    const FAKE_UNPACK: &str = "mkdir -p crx-quickstart/bin && echo 'java -jar app.jar' > crx-quickstart/bin/start";

    fn staged(root: &Path) -> StagedQuickstart {
        let jar = root.join("cq-quickstart.jar");
        let license = root.join("license.properties");
        fs::write(&jar, "jar").unwrap();
        fs::write(&license, "license.product.name=Quickstart").unwrap();
        StagedQuickstart {
            jar: Some(jar),
            license: Some(license),
        }
    }

    fn manager(
        root: &Path,
        unpack: &str,
    ) -> (LocalInstanceManager, Arc<RecordingProgress>, Vec<Instance>) {
        let mut config = test_config(root);
        config.local.unpack_command = vec!["sh".into(), "-c".into(), unpack.into()];
        let fleet = build_fleet(&config).unwrap();
        let progress = Arc::new(RecordingProgress::default());
        let context = InvocationContext::new(config)
            .with_progress(Arc::clone(&progress) as Arc<dyn ProgressReporter>);
        let manager = LocalInstanceManager::new(
            Arc::new(context),
            Arc::new(CheckRunner::new(Arc::new(ScriptedTransport::default()))),
        );
        (manager, progress, fleet)
    }

    #[test]
    fn unpack_placeholders() {
        let argv = unpack_argv(
            &["{java}".into(), "-jar".into(), "{jar}".into(), "-unpack".into()],
            "/opt/jdk/bin/java",
        );
        assert_eq!(
            argv,
            vec!["/opt/jdk/bin/java", "-jar", "aem-quickstart.jar", "-unpack"]
        );
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let files = staged(root.path());
        let (manager, progress, fleet) = manager(root.path(), FAKE_UNPACK);
        let local = LocalInstance::of(&fleet[0]).unwrap();

        manager.create(&fleet[0], &files).await.unwrap();
        assert!(local.created());
        fs::write(local.dir().join("leftover.txt"), "x").unwrap();

        manager.create(&fleet[0], &files).await.unwrap();
        assert!(local.created());
        assert!(!local.dir().join("leftover.txt").exists());
        assert!(local.logs_dir().is_dir());
        assert!(local.control_dir().join("start.sh").exists());
        assert_eq!(
            fs::read_to_string(local.dir().join("crx-quickstart/bin/start")).unwrap(),
            "$JAVA_EXECUTABLE -jar app.jar\n"
        );
        assert_eq!(
            progress.steps().iter().filter(|s| *s == "done").count(),
            2
        );
    }

    #[tokio::test]
    async fn failed_unpack_leaves_no_lock() {
        let root = tempfile::tempdir().unwrap();
        let files = staged(root.path());
        let (manager, _, fleet) = manager(root.path(), "exit 3");
        let local = LocalInstance::of(&fleet[0]).unwrap();

        let err = manager.create(&fleet[0], &files).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provisioning);
        assert!(local.touched());
        assert!(!local.created());
        assert!(local.jar().exists());
    }

    #[tokio::test]
    async fn unreadable_staged_file_is_a_provisioning_error() {
        let root = tempfile::tempdir().unwrap();
        let mut files = staged(root.path());
        files.jar = Some(root.path().join("gone.jar"));
        let (manager, _, fleet) = manager(root.path(), FAKE_UNPACK);

        let err = manager.create(&fleet[0], &files).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provisioning);
        assert!(err.payload("detail").unwrap().contains("gone.jar"));
        assert!(!LocalInstance::of(&fleet[0]).unwrap().created());
    }

    #[tokio::test]
    async fn bad_executable_glob_is_a_provisioning_error() {
        let root = tempfile::tempdir().unwrap();
        let files = staged(root.path());
        let (manager, _, fleet) = manager(root.path(), FAKE_UNPACK);
        let mut config = manager.context.config.clone();
        config.local.executable_files = vec!["crx-quickstart/bin/[".to_string()];
        let manager = LocalInstanceManager::new(
            Arc::new(InvocationContext::new(config)),
            Arc::new(CheckRunner::new(Arc::new(ScriptedTransport::default()))),
        );

        let err = manager.create(&fleet[0], &files).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provisioning);
        assert!(!LocalInstance::of(&fleet[0]).unwrap().created());
    }

    #[tokio::test]
    async fn missing_license_names_the_path() {
        let root = tempfile::tempdir().unwrap();
        let mut files = staged(root.path());
        files.license = None;
        let (manager, _, fleet) = manager(root.path(), FAKE_UNPACK);

        let err = manager.create(&fleet[0], &files).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provisioning);
        assert!(err.payload("detail").unwrap().contains("license.properties"));
        assert!(!LocalInstance::of(&fleet[0]).unwrap().created());
    }
}
