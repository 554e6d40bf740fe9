//! Centralized path layout of local instances and launcher data.

use std::path::{Path, PathBuf};

use crate::config::DEFAULT_CONFIG_FILE;

pub const JAR_FILE: &str = "aem-quickstart.jar";
pub const LICENSE_FILE: &str = "license.properties";
pub const QUICKSTART_DIR: &str = "crx-quickstart";
pub const CONTROL_DIR: &str = "control";

/// Get the per-user data directory (~/.quickstart_launcher), if a home exists.
pub fn get_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".quickstart_launcher"))
}

/// Resolve the fleet file: explicit path, then working directory, then data dir.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    get_data_dir()
        .map(|dir| dir.join(DEFAULT_CONFIG_FILE))
        .filter(|path| path.exists())
        .unwrap_or(local)
}

/// Get the root directory for an instance.
pub fn get_instance_dir(root: &Path, instance_id: &str) -> PathBuf {
    root.join(instance_id)
}

pub fn get_control_dir(instance_dir: &Path) -> PathBuf {
    instance_dir.join(CONTROL_DIR)
}

pub fn get_jar_path(instance_dir: &Path) -> PathBuf {
    instance_dir.join(JAR_FILE)
}

pub fn get_license_path(instance_dir: &Path) -> PathBuf {
    instance_dir.join(LICENSE_FILE)
}

/// Get the unpacked runtime directory.
pub fn get_quickstart_dir(instance_dir: &Path) -> PathBuf {
    instance_dir.join(QUICKSTART_DIR)
}

pub fn get_bin_dir(instance_dir: &Path) -> PathBuf {
    get_quickstart_dir(instance_dir).join("bin")
}

pub fn get_bundles_dir(instance_dir: &Path) -> PathBuf {
    get_quickstart_dir(instance_dir)
        .join("launchpad")
        .join("felix")
}

pub fn get_bundle_dir(instance_dir: &Path, bundle_no: u32) -> PathBuf {
    get_bundles_dir(instance_dir).join(format!("bundle{bundle_no}"))
}

pub fn get_pid_file(instance_dir: &Path) -> PathBuf {
    get_quickstart_dir(instance_dir).join("conf").join("cq.pid")
}

pub fn get_logs_dir(instance_dir: &Path) -> PathBuf {
    get_quickstart_dir(instance_dir).join("logs")
}

pub fn get_stdout_log(instance_dir: &Path) -> PathBuf {
    get_logs_dir(instance_dir).join("stdout.log")
}

/// Directory whose artifacts the runtime installs on its own.
pub fn get_install_dir(instance_dir: &Path) -> PathBuf {
    get_quickstart_dir(instance_dir).join("install")
}

pub fn get_lock_file(instance_dir: &Path, name: &str) -> PathBuf {
    instance_dir.join(format!("{name}.lock"))
}

/// Path of `path` relative to `base`, always with forward slashes.
pub fn relative_unix_path(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_layout() {
        let dir = Path::new("/srv/fleet/author");
        assert_eq!(
            get_pid_file(dir),
            PathBuf::from("/srv/fleet/author/crx-quickstart/conf/cq.pid")
        );
        assert_eq!(
            get_bundle_dir(dir, 12),
            PathBuf::from("/srv/fleet/author/crx-quickstart/launchpad/felix/bundle12")
        );
        assert_eq!(
            get_lock_file(dir, "create"),
            PathBuf::from("/srv/fleet/author/create.lock")
        );
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let base = Path::new("base");
        let nested = base.join("control").join("start.sh");
        assert_eq!(
            relative_unix_path(base, &nested).as_deref(),
            Some("control/start.sh")
        );
        assert_eq!(relative_unix_path(Path::new("other"), &nested), None);
    }
}
