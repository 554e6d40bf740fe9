//! Glob-selected files below a directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{AppError, Result};
use crate::paths::relative_unix_path;

/// Include/exclude patterns matched against `/`-separated paths relative to a root.
#[derive(Debug, Clone)]
pub struct FileSet {
    include: GlobSet,
    exclude: GlobSet,
}

fn build_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .backslash_escape(true)
            .build()?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

impl FileSet {
    pub fn new(include: &[String]) -> Result<Self> {
        Self::with_exclude(include, &[])
    }

    pub fn with_exclude(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    /// Whether a relative `/`-separated path is selected.
    pub fn is_match(&self, relative: &str) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }

    pub fn is_excluded(&self, relative: &str) -> bool {
        self.exclude.is_match(relative)
    }

    /// Selected regular files below `root`, in walk order. A missing root selects nothing.
    pub fn files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut selected = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(relative) = relative_unix_path(root, entry.path()) else {
                continue;
            };
            if self.is_match(&relative) {
                selected.push(entry.into_path());
            }
        }
        Ok(selected)
    }
}

/// Rewrite a text file in place; returns whether it changed.
///
/// Files that are not valid UTF-8 are left untouched.
pub fn amend_file(path: &Path, amend: impl FnOnce(&str) -> String) -> Result<bool> {
    let original = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            log::debug!("Skipping non-text file {:?}", path);
            return Ok(false);
        }
        Err(e) => {
            return Err(AppError::io(format!("Failed to read {:?}: {}", path, e)));
        }
    };
    let amended = amend(&original);
    if amended == original {
        return Ok(false);
    }
    fs::write(path, amended)
        .map_err(|e| AppError::io(format!("Failed to write {:?}: {}", path, e)))?;
    Ok(true)
}

/// Recursively copy `src` into `dst`, overwriting files that already exist.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::io(e.to_string()))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).map_err(|e| {
                AppError::io(format!(
                    "Failed to copy {:?} to {:?}: {}",
                    entry.path(),
                    target,
                    e
                ))
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn star_does_not_cross_directories() {
        let set = FileSet::new(&patterns(&["control/*.sh"])).unwrap();
        assert!(set.is_match("control/start.sh"));
        assert!(!set.is_match("control/nested/start.sh"));
        assert!(!set.is_match("control/start.bat"));
    }

    #[test]
    fn exclusions_win() {
        let set = FileSet::with_exclude(
            &patterns(&["**"]),
            &patterns(&["crx-quickstart/logs/**", "**/*.tmp"]),
        )
        .unwrap();
        assert!(set.is_match("crx-quickstart/repository/index"));
        assert!(!set.is_match("crx-quickstart/logs/error.log"));
        assert!(!set.is_match("a/b/c.tmp"));
    }

    #[test]
    fn lists_matching_files_and_amends_them() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("control")).unwrap();
        fs::write(dir.path().join("control/start.sh"), "java -jar x").unwrap();
        fs::write(dir.path().join("control/notes.txt"), "java").unwrap();

        let set = FileSet::new(&patterns(&["control/*.sh"])).unwrap();
        let files = set.files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("control/start.sh")]);

        assert!(amend_file(&files[0], |s| s.replace("java ", "$JAVA_EXECUTABLE ")).unwrap());
        assert!(!amend_file(&files[0], |s| s.to_string()).unwrap());
        assert_eq!(
            fs::read_to_string(&files[0]).unwrap(),
            "$JAVA_EXECUTABLE -jar x"
        );
        assert!(set.files(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn copies_nested_trees() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("a/b/c.txt"), "c").unwrap();
        fs::write(dst.path().join("keep.txt"), "k").unwrap();

        assert_eq!(copy_dir_all(src.path(), dst.path()).unwrap(), 1);
        assert_eq!(fs::read_to_string(dst.path().join("a/b/c.txt")).unwrap(), "c");
        assert!(dst.path().join("keep.txt").exists());
    }
}
