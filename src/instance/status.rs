use serde::Serialize;

/// Runtime state reported by the status script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalStatus {
    /// Process up and accepting requests.
    Running,
    /// Process up but still starting or shutting down.
    NotReady,
    Stopped,
    /// Never created, or the status script could not tell.
    Unrecognized,
}

impl LocalStatus {
    pub fn by_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Self::Running,
            Some(1) => Self::NotReady,
            Some(3) => Self::Stopped,
            _ => Self::Unrecognized,
        }
    }

    pub fn running(&self) -> bool {
        *self == Self::Running
    }

    pub fn runnable(&self) -> bool {
        *self == Self::Stopped
    }
}

impl std::fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Running => "running",
            Self::NotReady => "not ready",
            Self::Stopped => "stopped",
            Self::Unrecognized => "unrecognized",
        };
        f.write_str(text)
    }
}
