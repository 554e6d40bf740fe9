//! Zip reading and writing for backup archives.

use std::fs;
use std::io::{self, Read as _, Seek, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{AppError, Result};
use crate::fileset::FileSet;
use crate::paths::relative_unix_path;

/// Turn an entry name into a relative path, rejecting absolute and `..` paths.
pub(crate) fn parse_entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    let bytes = normalized.as_bytes();
    let drive_prefix = bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic();
    if normalized.starts_with('/') || drive_prefix {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }
    (!relative.as_os_str().is_empty()).then_some(relative)
}

/// Append `dir` under `prefix/`, skipping paths the exclusions select.
///
/// Returns the number of files written.
pub(crate) fn append_dir_tree<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    dir: &Path,
    prefix: &str,
    exclude: &FileSet,
    options: SimpleFileOptions,
) -> Result<usize> {
    let mut files = 0;
    let mut walker = walkdir::WalkDir::new(dir).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        let path = entry.path();
        if path == dir {
            continue;
        }
        let Some(relative) = relative_unix_path(dir, path) else {
            continue;
        };
        if exclude.is_excluded(&relative) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        let archive_path = format!("{prefix}/{relative}");
        if entry.file_type().is_dir() {
            writer.add_directory(archive_path, options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(archive_path, options)?;
            let mut file = fs::File::open(path)
                .map_err(|e| AppError::backup(format!("Failed to read {:?}: {}", path, e)))?;
            io::copy(&mut file, writer)?;
            files += 1;
        } else {
            log::debug!("Skipping special file {:?}", path);
        }
    }
    Ok(files)
}

pub(crate) fn write_text_entry<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    name: &str,
    content: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    writer.start_file(name, options)?;
    writer.write_all(content.as_bytes())?;
    Ok(())
}

pub(crate) fn read_text_entry(archive_path: &Path, name: &str) -> Result<String> {
    let file = fs::File::open(archive_path)
        .map_err(|e| AppError::backup(format!("Failed to open {:?}: {}", archive_path, e)))?;
    let mut archive = ZipArchive::new(file)?;
    let mut entry = archive
        .by_name(name)
        .map_err(|e| AppError::backup(format!("{name} not found in archive: {e}")))?;
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| AppError::backup(e.to_string()))?;
    Ok(content)
}

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| AppError::io(format!("failed to set permissions on {path:?}: {e}")))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_unix_permissions(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// Extract the entries below `prefix/` into `dest_dir`, prefix stripped.
///
/// Every entry name is checked, not only the selected ones, so a tampered
/// archive fails as a whole. Returns the number of files written.
pub(crate) fn extract_prefix(archive_path: &Path, prefix: &str, dest_dir: &Path) -> Result<usize> {
    let file = fs::File::open(archive_path)
        .map_err(|e| AppError::backup(format!("Failed to open {:?}: {}", archive_path, e)))?;
    let mut archive = ZipArchive::new(file)?;
    fs::create_dir_all(dest_dir)?;

    let mut files = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let raw_name = entry.name().to_string();
        let Some(relative) = parse_entry_rel_path(&raw_name) else {
            return Err(AppError::backup(format!(
                "Archive contains unsafe path: {raw_name:?}"
            )));
        };
        let Ok(stripped) = relative.strip_prefix(prefix) else {
            continue;
        };
        if stripped.as_os_str().is_empty() {
            continue;
        }
        if entry.is_symlink() {
            log::warn!("Skipping symlink entry {:?}", raw_name);
            continue;
        }

        let out_path = dest_dir.join(stripped);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = fs::File::create(&out_path)
            .map_err(|e| AppError::backup(format!("Failed to create {:?}: {}", out_path, e)))?;
        let written = io::copy(&mut entry, &mut outfile)?;
        if written != entry.size() {
            return Err(AppError::backup(format!(
                "Archive entry {raw_name:?} size mismatch: expected {} bytes, wrote {written}",
                entry.size()
            )));
        }
        set_unix_permissions(&out_path, entry.unix_mode())?;
        files += 1;
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_absolute_entries() {
        assert_eq!(
            parse_entry_rel_path("author/./crx-quickstart\\conf"),
            Some(PathBuf::from("author/crx-quickstart/conf"))
        );
        assert_eq!(parse_entry_rel_path("author/../../etc/passwd"), None);
        assert_eq!(parse_entry_rel_path("/etc/passwd"), None);
        assert_eq!(parse_entry_rel_path("C:/Windows"), None);
        assert_eq!(parse_entry_rel_path("./"), None);
    }

    #[test]
    fn writes_tree_without_excluded_paths_and_reads_it_back() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("crx-quickstart/logs")).unwrap();
        fs::create_dir_all(src.path().join("crx-quickstart/repository")).unwrap();
        fs::write(src.path().join("crx-quickstart/logs/error.log"), "noise").unwrap();
        fs::write(src.path().join("crx-quickstart/repository/data.tar"), "nodes").unwrap();
        fs::write(src.path().join("create.lock"), "").unwrap();

        let exclude = FileSet::with_exclude(&[], &["crx-quickstart/logs".to_string()]).unwrap();
        let work = tempfile::tempdir().unwrap();
        let archive_path = work.path().join("backup.zip");
        let mut writer = ZipWriter::new(fs::File::create(&archive_path).unwrap());
        let files = append_dir_tree(
            &mut writer,
            src.path(),
            "author",
            &exclude,
            SimpleFileOptions::default(),
        )
        .unwrap();
        writer.finish().unwrap();
        assert_eq!(files, 2);

        let dest = work.path().join("restore");
        assert_eq!(extract_prefix(&archive_path, "author", &dest).unwrap(), 2);
        assert_eq!(
            fs::read_to_string(dest.join("crx-quickstart/repository/data.tar")).unwrap(),
            "nodes"
        );
        assert!(!dest.join("crx-quickstart/logs").exists());
        assert_eq!(extract_prefix(&archive_path, "publish", &dest).unwrap(), 0);
    }

    #[test]
    fn tampered_archive_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("evil.zip");
        let mut writer = ZipWriter::new(fs::File::create(&archive_path).unwrap());
        write_text_entry(&mut writer, "author/../../escape.txt", "x", SimpleFileOptions::default())
            .unwrap();
        writer.finish().unwrap();

        let dest = dir.path().join("restore");
        let err = extract_prefix(&archive_path, "author", &dest).unwrap_err();
        assert!(err.to_string().contains("unsafe path"));
        assert!(!dir.path().join("escape.txt").exists());
    }
}
