//! Borrowed view over a local instance and its directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::lock::LockState;
use super::types::{Instance, LocalSettings, PASSWORD_DEFAULT};
use crate::error::{AppError, Result};
use crate::paths::{
    get_bundle_dir, get_control_dir, get_install_dir, get_jar_path, get_license_path,
    get_logs_dir, get_pid_file, get_quickstart_dir, get_stdout_log,
};

#[derive(Debug, Clone, Copy)]
pub struct LocalInstance<'a> {
    pub instance: &'a Instance,
    pub settings: &'a LocalSettings,
}

impl<'a> LocalInstance<'a> {
    pub fn of(instance: &'a Instance) -> Result<Self> {
        instance
            .local_settings()
            .map(|settings| Self { instance, settings })
            .ok_or_else(|| {
                AppError::invalid_instance(&instance.name, "operation requires a local instance")
            })
    }

    pub fn name(&self) -> &str {
        &self.instance.name
    }

    pub fn dir(&self) -> &Path {
        &self.settings.dir
    }

    pub fn control_dir(&self) -> PathBuf {
        get_control_dir(self.dir())
    }

    pub fn jar(&self) -> PathBuf {
        get_jar_path(self.dir())
    }

    pub fn license(&self) -> PathBuf {
        get_license_path(self.dir())
    }

    pub fn quickstart_dir(&self) -> PathBuf {
        get_quickstart_dir(self.dir())
    }

    pub fn install_dir(&self) -> PathBuf {
        get_install_dir(self.dir())
    }

    pub fn logs_dir(&self) -> PathBuf {
        get_logs_dir(self.dir())
    }

    pub fn stdout_log(&self) -> PathBuf {
        get_stdout_log(self.dir())
    }

    pub fn bundle_dir(&self, bundle_no: u32) -> PathBuf {
        get_bundle_dir(self.dir(), bundle_no)
    }

    /// PID written by the runtime, or 0 when absent, unreadable or not a
    /// positive `pid_t`.
    pub fn pid(&self) -> u32 {
        fs::read_to_string(get_pid_file(self.dir()))
            .ok()
            .and_then(|content| content.trim().parse::<i32>().ok())
            .and_then(|raw| u32::try_from(raw).ok())
            .unwrap_or(0)
    }

    pub fn lock_state(&self) -> LockState {
        LockState::read(self.dir())
    }

    pub fn touched(&self) -> bool {
        self.dir().exists()
    }

    pub fn created(&self) -> bool {
        self.lock_state().is_created()
    }

    pub fn initialized(&self) -> bool {
        self.lock_state().is_initialized()
    }

    pub fn http_open_url(&self) -> String {
        match self.settings.open_path.as_str() {
            "" | "/" => self.instance.http_url.clone(),
            path => self.instance.url_for(path),
        }
    }

    fn debug_socket_address(&self) -> String {
        let port = self.settings.debug_port;
        match self.settings.debug_address.as_str() {
            "*" => format!("0.0.0.0:{port}"),
            "" => port.to_string(),
            address => format!("{address}:{port}"),
        }
    }

    /// JVM options: debug agent and admin password first, configured ones after.
    pub fn jvm_opts(&self) -> Vec<String> {
        let mut opts = Vec::new();
        if self.settings.debug_port > 0 {
            opts.push(format!(
                "-agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address={}",
                self.debug_socket_address()
            ));
        }
        if self.instance.credentials.password != PASSWORD_DEFAULT {
            opts.push(format!(
                "-Dadmin.password={}",
                self.instance.credentials.password
            ));
        }
        opts.extend(self.settings.jvm_opts.iter().cloned());
        opts
    }

    pub fn jvm_opts_string(&self) -> String {
        self.jvm_opts().join(" ")
    }

    pub fn start_opts_string(&self) -> String {
        self.settings.start_opts.join(" ")
    }

    /// Run modes: the instance type first, configured ones after.
    pub fn run_modes_string(&self) -> String {
        std::iter::once(self.instance.instance_type.as_str().to_string())
            .chain(self.settings.run_modes.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Environment handed to control scripts.
    pub fn script_env(&self) -> Vec<(String, String)> {
        vec![
            (
                "JAVA_EXECUTABLE".to_string(),
                self.settings.java_executable.clone(),
            ),
            ("CQ_PORT".to_string(), self.instance.http_port().to_string()),
            ("CQ_RUNMODE".to_string(), self.run_modes_string()),
            ("CQ_JVM_OPTS".to_string(), self.jvm_opts_string()),
            ("CQ_START_OPTS".to_string(), self.start_opts_string()),
        ]
    }

    /// Template properties exposed as `instance.*`.
    pub fn template_properties(&self) -> BTreeMap<String, String> {
        let instance = self.instance;
        [
            ("id", instance.id.clone()),
            ("name", instance.name.clone()),
            ("environment", instance.environment.clone()),
            ("type", instance.instance_type.as_str().to_string()),
            ("httpUrl", instance.http_url.clone()),
            ("httpPort", instance.http_port().to_string()),
            ("httpOpenUrl", self.http_open_url()),
            ("user", instance.credentials.user.clone()),
            ("password", instance.credentials.password.clone()),
            ("debugPort", self.settings.debug_port.to_string()),
            ("jvmOpts", self.jvm_opts_string()),
            ("startOpts", self.start_opts_string()),
            ("runModes", self.run_modes_string()),
            ("javaExecutable", self.settings.java_executable.clone()),
            ("dir", self.dir().display().to_string()),
        ]
        .into_iter()
        .map(|(key, value)| (format!("instance.{key}"), value))
        .collect()
    }

    /// Version embedded in the staged quickstart jar, when recognizable.
    pub fn standalone_version(&self) -> Option<String> {
        let file = fs::File::open(self.jar()).ok()?;
        let archive = zip::ZipArchive::new(file).ok()?;
        let names: Vec<&str> = archive.file_names().collect();
        standalone_version_of(names)
    }
}

fn standalone_version_of<'n>(names: impl IntoIterator<Item = &'n str>) -> Option<String> {
    names
        .into_iter()
        .filter(|name| name.starts_with("static/app/"))
        .map(|name| name.rsplit('/').next().unwrap_or(name))
        .find(|file| file.starts_with("cq-quickstart-") && file.ends_with(".jar"))
        .and_then(|file| {
            let rest = file
                .trim_start_matches("cq-quickstart-")
                .trim_start_matches("cloudready-");
            rest.split('-')
                .next()
                .map(|v| v.trim_end_matches(".jar").to_string())
        })
        .filter(|version| !version.is_empty())
}
