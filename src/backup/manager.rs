use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::archive::{append_dir_tree, extract_prefix, read_text_entry, write_text_entry};
use super::{BackupMetadata, BackupMode, BackupStore};
use crate::config::BackupConfig;
use crate::error::{AppError, Result};
use crate::fileset::FileSet;
use crate::instance::{local_instances, names, Instance, LocalInstance, LocalInstanceManager};
use crate::orchestrator::Orchestrator;

pub const METADATA_ENTRY: &str = "backup.toml";
const ARCHIVE_SUFFIX: &str = ".backup.zip";

/// Result of [`BackupManager::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub archive: PathBuf,
    /// Upload location, when the mode uploads.
    pub location: Option<String>,
}

pub struct BackupManager {
    manager: LocalInstanceManager,
    orchestrator: Orchestrator,
    store: Option<Arc<dyn BackupStore>>,
}

impl BackupManager {
    pub fn new(manager: LocalInstanceManager, store: Option<Arc<dyn BackupStore>>) -> Self {
        let orchestrator = Orchestrator::from_config(&manager.context().config);
        Self {
            manager,
            orchestrator,
            store,
        }
    }

    fn config(&self) -> &BackupConfig {
        &self.manager.context().config.backup
    }

    pub async fn run(&self, mode: BackupMode, instances: &[Instance]) -> Result<BackupReport> {
        log::info!("Running backup in mode {}", mode);
        let archive = match mode {
            BackupMode::ZipOnly | BackupMode::ZipAndUpload => self.create(instances).await?,
            BackupMode::UploadOnly => self.local()?.ok_or_else(|| {
                AppError::backup(format!(
                    "No local backup archive found in {:?}; run a zip backup first",
                    self.config().dir
                ))
            })?,
        };

        let location = match mode {
            BackupMode::ZipOnly => None,
            BackupMode::ZipAndUpload | BackupMode::UploadOnly => {
                Some(self.upload(&archive).await?)
            }
        };
        Ok(BackupReport { archive, location })
    }

    /// Newest `*.backup.zip` in the backup directory.
    pub fn local(&self) -> Result<Option<PathBuf>> {
        let dir = &self.config().dir;
        if !dir.exists() {
            return Ok(None);
        }
        let mut newest: Option<(String, PathBuf)> = None;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                log::warn!("Skipping backup with non-UTF-8 filename: {:?}", path);
                continue;
            };
            if !name.ends_with(ARCHIVE_SUFFIX) || !path.is_file() {
                continue;
            }
            if newest.as_ref().is_none_or(|(current, _)| name > *current) {
                newest = Some((name, path));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }

    pub async fn upload(&self, archive: &Path) -> Result<String> {
        let store = self.store.as_ref().ok_or_else(|| {
            AppError::backup("No upload target configured, set backup.upload_dir or backup.upload_url")
        })?;
        log::info!("Uploading backup {:?}", archive);
        let location = store.put(archive).await?;
        self.manager
            .context()
            .notify("Backup uploaded", &location);
        Ok(location)
    }

    /// Stop running local instances, archive their directories, start them again.
    ///
    /// Instances are restarted even when archiving failed; the archive
    /// error is reported first.
    pub async fn create(&self, instances: &[Instance]) -> Result<PathBuf> {
        let locals: Vec<Instance> = local_instances(instances)
            .into_iter()
            .filter(|instance| LocalInstance::of(instance).is_ok_and(|l| l.touched()))
            .collect();
        if locals.is_empty() {
            return Err(AppError::backup("No local instance directories to back up"));
        }

        let running = self.running(&locals).await;
        if !running.is_empty() {
            log::info!("Stopping {} for backup", names(&running));
            let manager = self.manager.clone();
            self.orchestrator
                .run_all(&running, move |instance| {
                    let manager = manager.clone();
                    async move { manager.down(&instance).await }
                })
                .await?;
        }

        let archived = self.archive(&locals).await;

        let restarted = if running.is_empty() {
            Ok(Vec::new())
        } else {
            log::info!("Starting {} after backup", names(&running));
            let manager = self.manager.clone();
            self.orchestrator
                .run_all(&running, move |instance| {
                    let manager = manager.clone();
                    async move { manager.up(&instance).await }
                })
                .await
        };

        let archive = archived?;
        restarted?;
        self.manager
            .context()
            .notify("Backup created", &archive.display().to_string());
        Ok(archive)
    }

    async fn running(&self, locals: &[Instance]) -> Vec<Instance> {
        let manager = self.manager.clone();
        let statuses = self
            .orchestrator
            .each(locals, move |instance| {
                let manager = manager.clone();
                async move { Ok(manager.running(&instance).await) }
            })
            .await;
        let running: Vec<String> = statuses
            .into_iter()
            .filter(|unit| matches!(unit.result, Ok(true)))
            .map(|unit| unit.instance)
            .collect();
        locals
            .iter()
            .filter(|instance| running.contains(&instance.name))
            .cloned()
            .collect()
    }

    async fn archive(&self, locals: &[Instance]) -> Result<PathBuf> {
        let config = self.config();
        let exclude = FileSet::with_exclude(&[], &config.exclude)?;
        let now = chrono::Local::now();
        let stamp = now.format("%Y%m%d%H%M%S%3f").to_string();
        let metadata = BackupMetadata {
            created_at: now.to_rfc3339(),
            environment: self.manager.context().config.environment.clone(),
            instances: locals.iter().map(|i| i.id.clone()).collect(),
        };
        let sources: Vec<(String, PathBuf)> = locals
            .iter()
            .filter_map(|instance| {
                instance
                    .local_settings()
                    .map(|settings| (instance.id.clone(), settings.dir.clone()))
            })
            .collect();

        let backup_dir = config.dir.clone();
        let target = tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&backup_dir).map_err(|e| {
                AppError::backup(format!("Failed to create backup dir {:?}: {}", backup_dir, e))
            })?;
            let path = free_archive_path(&backup_dir, &stamp);
            write_archive(&path, &sources, &exclude, &metadata)?;
            Ok::<_, AppError>(path)
        })
        .await
        .map_err(|e| AppError::backup(format!("Backup task failed: {}", e)))??;

        log::info!("Backup archive written to {:?}", target);
        Ok(target)
    }

    /// Recreate instance directories from an archive.
    ///
    /// Every targeted instance must be stopped. Instances the archive does
    /// not hold are skipped.
    pub async fn restore(&self, archive: &Path, instances: &[Instance]) -> Result<()> {
        let metadata = read_metadata(archive)?;
        let locals = local_instances(instances);

        let running = self.running(&locals).await;
        if !running.is_empty() {
            return Err(AppError::backup(format!(
                "Instances must be stopped before restore: {}",
                names(&running)
            )));
        }

        let targets: Vec<(String, PathBuf)> = locals
            .iter()
            .filter(|instance| {
                let held = metadata.instances.contains(&instance.id);
                if !held {
                    log::warn!("Archive holds no backup of '{}'", instance.name);
                }
                held
            })
            .filter_map(|instance| {
                instance
                    .local_settings()
                    .map(|settings| (instance.id.clone(), settings.dir.clone()))
            })
            .collect();
        if targets.is_empty() {
            return Err(AppError::backup(format!(
                "Archive {:?} holds none of the instances {}",
                archive,
                names(&locals)
            )));
        }

        let archive = archive.to_path_buf();
        let restored = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut restored = Vec::new();
            for (id, dir) in &targets {
                restore_dir(&archive, id, dir)?;
                restored.push(id.clone());
            }
            Ok(restored)
        })
        .await
        .map_err(|e| AppError::backup(format!("Restore task failed: {}", e)))??;

        self.manager
            .context()
            .notify("Backup restored", &restored.join(", "));
        Ok(())
    }
}

/// `<stamp>.backup.zip`, or `<stamp>_NN.backup.zip` when that is taken.
///
/// The counter form still sorts after the plain name.
fn free_archive_path(dir: &Path, stamp: &str) -> PathBuf {
    let first = dir.join(format!("{stamp}{ARCHIVE_SUFFIX}"));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| dir.join(format!("{stamp}_{n:02}{ARCHIVE_SUFFIX}")))
        .find(|path| !path.exists())
        .unwrap_or(first)
}

/// Write a new archive at `target`; an existing file is never replaced.
fn write_archive(
    target: &Path,
    sources: &[(String, PathBuf)],
    exclude: &FileSet,
    metadata: &BackupMetadata,
) -> Result<()> {
    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .map_err(|e| {
            AppError::backup(format!("Failed to create backup archive {:?}: {}", target, e))
        })?;
    let written = fill_archive(file, sources, exclude, metadata);
    if written.is_err() {
        let _ = fs::remove_file(target);
    }
    written
}

fn fill_archive(
    file: fs::File,
    sources: &[(String, PathBuf)],
    exclude: &FileSet,
    metadata: &BackupMetadata,
) -> Result<()> {
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    write_text_entry(
        &mut writer,
        METADATA_ENTRY,
        &toml::to_string_pretty(metadata)?,
        options,
    )?;
    for (id, dir) in sources {
        let files = append_dir_tree(&mut writer, dir, id, exclude, options)?;
        log::debug!("Archived {} file(s) of '{}'", files, id);
    }
    writer
        .finish()
        .map_err(|e| AppError::backup(format!("Failed to finalize backup: {}", e)))?;
    Ok(())
}

pub(crate) fn read_metadata(archive: &Path) -> Result<BackupMetadata> {
    let content = read_text_entry(archive, METADATA_ENTRY)?;
    toml::from_str(&content)
        .map_err(|e| AppError::backup(format!("Failed to parse backup metadata: {}", e)))
}

/// `<dir>.restore`, next to the instance directory.
fn staging_dir(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().unwrap_or_default().to_os_string();
    name.push(".restore");
    dir.with_file_name(name)
}

/// Extract next to the instance directory first, then swap it in.
fn restore_dir(archive: &Path, id: &str, dir: &Path) -> Result<()> {
    let staging = staging_dir(dir);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    if let Err(e) = extract_prefix(archive, id, &staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }
    if dir.exists() {
        fs::remove_dir_all(dir)
            .map_err(|e| AppError::backup(format!("Failed to clear {:?}: {}", dir, e)))?;
    }
    fs::rename(&staging, dir)
        .map_err(|e| AppError::backup(format!("Failed to move {:?} to {:?}: {}", staging, dir, e)))?;
    log::info!("Restored {:?} from {:?}", dir, archive);
    Ok(())
}
