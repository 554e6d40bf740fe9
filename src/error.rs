//! Launcher error types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

/// Launcher error carrying a kind and diagnostic key/value payload.
#[derive(Debug)]
pub struct AppError {
    payload: BTreeMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Instance not defined in the fleet
    InstanceNotFound,
    /// Instance definition is invalid or the operation does not apply to it
    InvalidInstance,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
    /// Local instance could not be provisioned
    Provisioning,
    /// Control script failed, timed out or could not be launched
    Script,
    /// Native process control error
    Process,
    /// Instance did not come up in time
    StartupTimeout,
    /// Health checks did not pass in time
    HealthCheck,
    /// One or more units of a fan-out failed
    Orchestration,
    /// Backup error
    Backup,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::InstanceNotFound => 1001,
            Self::InvalidInstance => 1002,
            Self::Config => 2001,
            Self::Io => 2002,
            Self::Network => 2003,
            Self::Provisioning => 3001,
            Self::Script => 3002,
            Self::Process => 3003,
            Self::StartupTimeout => 3004,
            Self::HealthCheck => 3005,
            Self::Orchestration => 3006,
            Self::Backup => 4001,
            Self::Other => 9999,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: BTreeMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            BTreeMap::new()
        } else {
            BTreeMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    fn with_pairs<const N: usize>(kind: ErrorKind, pairs: [(&str, String); N]) -> Self {
        Self::new(
            kind,
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    pub fn instance_not_found(name: &str) -> Self {
        Self::with_pairs(ErrorKind::InstanceNotFound, [("instance", name.to_string())])
    }

    pub fn invalid_instance(name: &str, detail: impl Into<String>) -> Self {
        Self::with_pairs(
            ErrorKind::InvalidInstance,
            [("instance", name.to_string()), ("detail", detail.into())],
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::with_pairs(
            ErrorKind::Network,
            [("url", url.to_string()), ("detail", detail.into())],
        )
    }

    pub fn provisioning(instance: &str, detail: impl Into<String>) -> Self {
        Self::with_pairs(
            ErrorKind::Provisioning,
            [("instance", instance.to_string()), ("detail", detail.into())],
        )
    }

    pub fn missing_staged_file(instance: &str, what: &str, path: &Path) -> Self {
        Self::with_pairs(
            ErrorKind::Provisioning,
            [
                ("instance", instance.to_string()),
                (
                    "detail",
                    format!("{what} not found at path: {}", path.display()),
                ),
            ],
        )
    }

    pub fn script_failed(command: &str, exit_code: Option<i32>, stderr: &str) -> Self {
        Self::with_pairs(
            ErrorKind::Script,
            [
                ("command", command.to_string()),
                (
                    "exit_code",
                    exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                ),
                ("stderr", stderr.trim().to_string()),
            ],
        )
    }

    pub fn script_timeout(command: &str, timeout: Duration) -> Self {
        Self::with_pairs(
            ErrorKind::Script,
            [
                ("command", command.to_string()),
                ("detail", format!("timed out after {}ms", timeout.as_millis())),
            ],
        )
    }

    pub fn script_launch(command: &str, cause: impl fmt::Display) -> Self {
        Self::with_pairs(
            ErrorKind::Script,
            [
                ("command", command.to_string()),
                ("detail", format!("failed to launch: {cause}")),
            ],
        )
    }

    /// Wrap a lower-level failure with an operator-facing hint.
    pub fn context(self, instance: &str, hint: impl Into<String>) -> Self {
        let mut payload = self.payload;
        payload.insert("instance".to_string(), instance.to_string());
        payload.insert("hint".to_string(), hint.into());
        Self::new(self.kind, payload)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn startup_timeout(instance: &str, detail: impl Into<String>) -> Self {
        Self::with_pairs(
            ErrorKind::StartupTimeout,
            [("instance", instance.to_string()), ("detail", detail.into())],
        )
    }

    pub fn health_check(instance: &str, status: impl Into<String>) -> Self {
        Self::with_pairs(
            ErrorKind::HealthCheck,
            [("instance", instance.to_string()), ("status", status.into())],
        )
    }

    pub fn orchestration(failed: &[String], cause: &Self) -> Self {
        Self::with_pairs(
            ErrorKind::Orchestration,
            [("failed", failed.join(",")), ("cause", cause.to_string())],
        )
    }

    pub fn backup(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Backup, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn payload(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::io(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<globset::Error> for AppError {
    fn from(err: globset::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<regex::Error> for AppError {
    fn from(err: regex::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
