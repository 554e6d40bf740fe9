//! Laying down control scripts, overrides and templated files.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::local::LocalInstance;
use crate::config::LocalConfig;
use crate::error::{AppError, Result};
use crate::fileset::{amend_file, copy_dir_all, FileSet};

/// Control scripts shipped with the launcher, relative to the instance dir.
pub const DEFAULT_FILES: &[(&str, &str)] = &[
    ("control/start.sh", include_str!("../../assets/control/start.sh")),
    ("control/stop.sh", include_str!("../../assets/control/stop.sh")),
    ("control/status.sh", include_str!("../../assets/control/status.sh")),
    ("control/start.bat", include_str!("../../assets/control/start.bat")),
    ("control/stop.bat", include_str!("../../assets/control/stop.bat")),
    ("control/status.bat", include_str!("../../assets/control/status.bat")),
];

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").ok());

/// Replace `{{ key }}` placeholders; unknown keys stay as written.
pub fn expand_template(content: &str, properties: &BTreeMap<String, String>) -> String {
    let Some(placeholder) = PLACEHOLDER.as_ref() else {
        return content.to_string();
    };
    placeholder
        .replace_all(content, |caps: &Captures<'_>| {
            properties
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Expansion context; later sources override earlier ones.
pub fn template_properties(
    local: &LocalInstance<'_>,
    config: &LocalConfig,
) -> BTreeMap<String, String> {
    let mut properties = local.template_properties();
    properties.extend(config.service.properties());
    properties.extend(local.instance.properties.clone());
    properties.extend(config.expand_properties.clone());
    properties
}

/// Run every customization step against an unpacked instance directory.
pub fn customize(local: &LocalInstance<'_>, config: &LocalConfig) -> Result<()> {
    write_default_files(local.dir())?;
    copy_override_files(local, &config.override_dir)?;
    expand_files(local, config)?;
    copy_install_files(local, &config.install_files)?;
    make_files_executable(local.dir(), &config.executable_files)?;
    Ok(())
}

fn write_default_files(instance_dir: &Path) -> Result<()> {
    for (relative, content) in DEFAULT_FILES {
        let target = instance_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)
            .map_err(|e| AppError::io(format!("Failed to write {:?}: {}", target, e)))?;
    }
    Ok(())
}

/// `common/` first, then `<instance-id>/`, so per-instance files win.
fn copy_override_files(local: &LocalInstance<'_>, override_dir: &Path) -> Result<()> {
    for source in [
        override_dir.join("common"),
        override_dir.join(&local.instance.id),
    ] {
        if source.is_dir() {
            let copied = copy_dir_all(&source, local.dir())?;
            log::info!(
                "Copied {} override file(s) from {:?} to {}",
                copied,
                source,
                local.name()
            );
        }
    }
    Ok(())
}

fn expand_files(local: &LocalInstance<'_>, config: &LocalConfig) -> Result<()> {
    let properties = template_properties(local, config);
    let files = FileSet::new(&config.expand_files)?;
    for file in files.files(local.dir())? {
        if amend_file(&file, |content| expand_template(content, &properties))? {
            log::debug!("Expanded properties in {:?}", file);
        }
    }
    Ok(())
}

/// Existing targets are kept; the runtime may already have consumed them.
fn copy_install_files(local: &LocalInstance<'_>, sources: &[std::path::PathBuf]) -> Result<()> {
    if sources.is_empty() {
        return Ok(());
    }
    let install_dir = local.install_dir();
    fs::create_dir_all(&install_dir)?;
    for source in sources {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = install_dir.join(name);
        if target.exists() {
            continue;
        }
        if !source.is_file() {
            return Err(AppError::missing_staged_file(
                local.name(),
                "Install file",
                source,
            ));
        }
        log::info!("Copying install file {:?} to {:?}", source, target);
        fs::copy(source, &target)
            .map_err(|e| AppError::io(format!("Failed to copy {:?}: {}", source, e)))?;
    }
    Ok(())
}

fn make_files_executable(instance_dir: &Path, patterns: &[String]) -> Result<()> {
    let files = FileSet::with_exclude(patterns, &["**/*.bat".to_string()])?;
    for file in files.files(instance_dir)? {
        make_executable(&file)?;
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions)
        .map_err(|e| AppError::io(format!("Failed to make {:?} executable: {}", path, e)))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FleetConfig;
    use crate::instance::build_fleet;

    #[test]
    fn expands_known_keys_and_keeps_unknown() {
        let properties = BTreeMap::from([
            ("instance.name".to_string(), "local-author".to_string()),
            ("cdn.host".to_string(), "cdn.example.com".to_string()),
        ]);
        let expanded = expand_template(
            "name={{instance.name}} cdn={{ cdn.host }} other={{ missing.key }}",
            &properties,
        );
        assert_eq!(
            expanded,
            "name=local-author cdn=cdn.example.com other={{ missing.key }}"
        );
    }

    #[test]
    fn customizes_instance_directory() {
        let root = tempfile::tempdir().unwrap();
        let mut config = FleetConfig::default();
        config.environment = "local".to_string();
        config.local.root_dir = root.path().join("instances");
        config.local.override_dir = root.path().join("overrides");
        config
            .local
            .expand_properties
            .insert("greeting".to_string(), "hello".to_string());

        let common = config.local.override_dir.join("common/control");
        let specific = config.local.override_dir.join("author/control");
        fs::create_dir_all(&common).unwrap();
        fs::create_dir_all(&specific).unwrap();
        fs::write(common.join("start.sh"), "common {{ greeting }}").unwrap();
        fs::write(specific.join("start.sh"), "echo {{ instance.httpPort }}").unwrap();

        let install_source = root.path().join("bundle.jar");
        fs::write(&install_source, "jar").unwrap();
        config.local.install_files = vec![install_source];

        let fleet = build_fleet(&config).unwrap();
        let local = LocalInstance::of(&fleet[0]).unwrap();
        fs::create_dir_all(local.dir()).unwrap();

        customize(&local, &config.local).unwrap();

        let start = fs::read_to_string(local.control_dir().join("start.sh")).unwrap();
        assert_eq!(start, "echo 4502");
        let stop = fs::read_to_string(local.control_dir().join("stop.sh")).unwrap();
        assert!(stop.contains("# local-author:"));
        assert!(local.install_dir().join("bundle.jar").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mode = fs::metadata(local.control_dir().join("stop.sh"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn existing_install_files_are_kept() {
        let root = tempfile::tempdir().unwrap();
        let mut config = FleetConfig::default();
        config.local.root_dir = root.path().join("instances");
        config.local.override_dir = root.path().join("none");
        config.local.install_files = vec![root.path().join("missing.jar")];

        let fleet = build_fleet(&config).unwrap();
        let local = LocalInstance::of(&fleet[0]).unwrap();
        fs::create_dir_all(local.install_dir()).unwrap();
        fs::write(local.install_dir().join("missing.jar"), "already there").unwrap();

        customize(&local, &config.local).unwrap();
        assert_eq!(
            fs::read_to_string(local.install_dir().join("missing.jar")).unwrap(),
            "already there"
        );
    }
}
