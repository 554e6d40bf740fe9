//! Data-driven corrections of the control scripts generated by unpacking.
//!
//! Generated scripts block on console waits and launch the JVM in a new
//! window. The table below rewrites them so they run detached from
//! non-interactive shells and honor injected start options.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fileset::{amend_file, FileSet};
use crate::paths::get_bin_dir;
use crate::process::ScriptKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    /// Generated script of `kind` for this platform, below `crx-quickstart/bin`.
    pub fn bin_script(&self, instance_dir: &Path, kind: ScriptKind) -> PathBuf {
        let name = match self {
            Self::Windows => format!("{}.bat", kind.as_str()),
            Self::Unix => kind.as_str().to_string(),
        };
        get_bin_dir(instance_dir).join(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replacement {
    pub search: &'static str,
    pub replace: &'static str,
}

const fn replace(search: &'static str, replace: &'static str) -> Replacement {
    Replacement { search, replace }
}

#[derive(Debug, Clone, Copy)]
pub struct PatchRule {
    pub platform: Platform,
    pub kind: ScriptKind,
    pub replacements: &'static [Replacement],
}

const WINDOWS_DETACHED_START: &str = "cbp.exe cmd.exe /C \"java %CQ_JVM_OPTS% -jar %CurrDirName%\\%CQ_JARFILE% %START_OPTS% 1> %CurrDirName%\\logs\\stdout.log 2>&1\"";

/// Both platforms are patched regardless of the host so an instance
/// directory stays usable when moved.
pub const PATCH_TABLE: &[PatchRule] = &[
    PatchRule {
        platform: Platform::Windows,
        kind: ScriptKind::Start,
        replacements: &[
            // `timeout` needs a console
            replace("timeout /T 1 /NOBREAK >nul", "ping 127.0.0.1 -n 3 > nul"),
            // legacy launcher keeping the window open
            replace(
                "start \"CQ\" cmd.exe /K java %CQ_JVM_OPTS% -jar %CurrDirName%\\%CQ_JARFILE% %START_OPTS%",
                WINDOWS_DETACHED_START,
            ),
            replace(
                "start \"CQ\" cmd.exe /C java %CQ_JVM_OPTS% -jar %CurrDirName%\\%CQ_JARFILE% %START_OPTS%",
                WINDOWS_DETACHED_START,
            ),
            replace(
                "set START_OPTS=start -c %CurrDirName% -i launchpad",
                "set START_OPTS=start -c %CurrDirName% -i launchpad %CQ_START_OPTS%",
            ),
        ],
    },
    PatchRule {
        platform: Platform::Unix,
        kind: ScriptKind::Start,
        replacements: &[replace(
            "START_OPTS=\"start -c ${CURR_DIR} -i launchpad\"",
            "START_OPTS=\"start -c ${CURR_DIR} -i launchpad ${CQ_START_OPTS}\"",
        )],
    },
];

/// Apply replacements in order.
pub fn patch_text(content: &str, replacements: &[Replacement]) -> String {
    replacements
        .iter()
        .fold(content.to_string(), |text, r| text.replace(r.search, r.replace))
}

/// Apply every rule of `table` to the matching generated script.
///
/// Returns the number of files changed; missing scripts are skipped.
pub fn apply_patch_table(instance_dir: &Path, table: &[PatchRule]) -> Result<usize> {
    let mut changed = 0;
    for rule in table {
        let script = rule.platform.bin_script(instance_dir, rule.kind);
        if !script.exists() {
            log::debug!("No {:?} script to patch at {:?}", rule.platform, script);
            continue;
        }
        if amend_file(&script, |content| patch_text(content, rule.replacements))? {
            log::debug!("Patched {:?}", script);
            changed += 1;
        }
    }
    Ok(changed)
}

/// Use the configured Java executable explicitly so scripts also work
/// from shells without a login profile.
pub fn use_java_executable(instance_dir: &Path, files: &FileSet) -> Result<usize> {
    let mut changed = 0;
    for file in files.files(instance_dir)? {
        let variable = if file.extension().is_some_and(|ext| ext == "bat") {
            "%JAVA_EXECUTABLE% "
        } else {
            "$JAVA_EXECUTABLE "
        };
        if amend_file(&file, |content| content.replace("java ", variable))? {
            changed += 1;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn unix_start_script_gets_start_opts() {
        let rule = PATCH_TABLE
            .iter()
            .find(|r| r.platform == Platform::Unix)
            .unwrap();
        let patched = patch_text(
            "START_OPTS=\"start -c ${CURR_DIR} -i launchpad\"\n",
            rule.replacements,
        );
        assert_eq!(
            patched,
            "START_OPTS=\"start -c ${CURR_DIR} -i launchpad ${CQ_START_OPTS}\"\n"
        );
    }

    #[test]
    fn windows_start_script_runs_detached() {
        let rule = PATCH_TABLE
            .iter()
            .find(|r| r.platform == Platform::Windows)
            .unwrap();
        let original = "timeout /T 1 /NOBREAK >nul\r\nstart \"CQ\" cmd.exe /C java %CQ_JVM_OPTS% -jar %CurrDirName%\\%CQ_JARFILE% %START_OPTS%\r\n";
        let patched = patch_text(original, rule.replacements);
        assert!(patched.starts_with("ping 127.0.0.1 -n 3 > nul"));
        assert!(patched.contains("cbp.exe cmd.exe /C"));
        assert!(!patched.contains("start \"CQ\""));
    }

    #[test]
    fn applies_table_to_existing_scripts_only() {
        let dir = tempfile::tempdir().unwrap();
        let unix = Platform::Unix.bin_script(dir.path(), ScriptKind::Start);
        fs::create_dir_all(unix.parent().unwrap()).unwrap();
        fs::write(&unix, "START_OPTS=\"start -c ${CURR_DIR} -i launchpad\"").unwrap();

        assert_eq!(apply_patch_table(dir.path(), PATCH_TABLE).unwrap(), 1);
        assert!(fs::read_to_string(&unix).unwrap().contains("${CQ_START_OPTS}"));
        assert_eq!(apply_patch_table(dir.path(), PATCH_TABLE).unwrap(), 0);
    }

    #[test]
    fn java_invocations_use_variable_per_script_type() {
        let dir = tempfile::tempdir().unwrap();
        let bin = get_bin_dir(dir.path());
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("start"), "java -jar app.jar").unwrap();
        fs::write(bin.join("start.bat"), "java -jar app.jar").unwrap();

        let files = FileSet::new(&["crx-quickstart/bin/*".to_string()]).unwrap();
        assert_eq!(use_java_executable(dir.path(), &files).unwrap(), 2);
        assert_eq!(
            fs::read_to_string(bin.join("start")).unwrap(),
            "$JAVA_EXECUTABLE -jar app.jar"
        );
        assert_eq!(
            fs::read_to_string(bin.join("start.bat")).unwrap(),
            "%JAVA_EXECUTABLE% -jar app.jar"
        );
    }
}
