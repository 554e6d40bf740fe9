//! Fleet backups: stop, archive every local instance directory, restart, upload.

mod archive;
mod manager;
mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub use manager::{BackupManager, BackupReport, METADATA_ENTRY};
pub use store::{store_from_config, BackupStore, DirectoryStore, HttpStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    ZipOnly,
    ZipAndUpload,
    UploadOnly,
}

impl BackupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZipOnly => "zip_only",
            Self::ZipAndUpload => "zip_and_upload",
            Self::UploadOnly => "upload_only",
        }
    }
}

impl FromStr for BackupMode {
    type Err = AppError;

    /// Case-insensitive; `-` and `_` are interchangeable.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "zip_only" => Ok(Self::ZipOnly),
            "zip_and_upload" => Ok(Self::ZipAndUpload),
            "upload_only" => Ok(Self::UploadOnly),
            other => Err(AppError::config(format!(
                "Unknown backup mode '{other}', expected zip_only, zip_and_upload or upload_only"
            ))),
        }
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of the `backup.toml` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub created_at: String,
    pub environment: String,
    /// Instance ids; each one prefixes the entries of its directory.
    pub instances: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes_loosely() {
        assert_eq!("ZIP_ONLY".parse::<BackupMode>().unwrap(), BackupMode::ZipOnly);
        assert_eq!(
            "zip-and-upload".parse::<BackupMode>().unwrap(),
            BackupMode::ZipAndUpload
        );
        assert_eq!(
            " Upload_Only ".parse::<BackupMode>().unwrap(),
            BackupMode::UploadOnly
        );
        assert!("tarball".parse::<BackupMode>().is_err());
    }
}
