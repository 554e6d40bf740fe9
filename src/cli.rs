//! Command-line surface.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::commands::Launcher;
use crate::config::load_config;
use crate::context::Notifier;
use crate::error::Result;
use crate::paths::resolve_config_path;

/// Prints operation outcomes for the operator; logs stay on stderr.
#[derive(Debug, Default)]
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, title: &str, message: &str) {
        println!("{title}: {message}");
    }
}

#[derive(Debug, Parser)]
#[command(name = "quickstart-launcher", version, about)]
pub struct Cli {
    /// Fleet definition file.
    #[arg(long, global = true, env = "QL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Glob over instance names, e.g. `local-*`.
    #[arg(long, short = 'i', global = true)]
    pub instance: Option<String>,

    /// Process instances one at a time.
    #[arg(long, global = true)]
    pub sequential: bool,

    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision local instances from the quickstart jar.
    Create,
    /// Start local instances and wait until they are healthy.
    Up,
    /// Stop local instances.
    Down,
    Restart,
    /// Kill local instance processes by recorded PID.
    Kill,
    /// Delete local instance directories.
    Destroy,
    Status,
    /// Wait until all selected instances pass their checks.
    AwaitUp,
    /// Archive local instances and optionally upload the archive.
    Backup {
        /// zip_only, zip_and_upload or upload_only.
        #[arg(long)]
        mode: Option<String>,
    },
    /// Recreate stopped local instances from a backup archive.
    Restore { archive: PathBuf },
    /// Deliver packages or bundles; each one reaches all instances before the next.
    Deploy {
        #[arg(required = true)]
        artifacts: Vec<PathBuf>,
    },
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    pub async fn execute(self) -> Result<()> {
        let path = resolve_config_path(self.config.as_deref());
        log::debug!("Using fleet config {:?}", path);
        let mut config = load_config(&path)?;
        if self.sequential {
            config.parallel = false;
        }
        let launcher = Launcher::new(
            config,
            self.instance.as_deref(),
            Arc::new(ConsoleNotifier),
        )?;

        match self.command {
            Command::Create => launcher.create().await,
            Command::Up => launcher.up().await,
            Command::Down => launcher.down().await,
            Command::Restart => launcher.restart().await,
            Command::Kill => launcher.kill().await,
            Command::Destroy => launcher.destroy().await,
            Command::Status => {
                for (name, status) in launcher.status().await {
                    println!("{name}: {status}");
                }
                Ok(())
            }
            Command::AwaitUp => launcher.await_up().await,
            Command::Backup { mode } => {
                let report = launcher.backup(mode.as_deref()).await?;
                println!("{}", report.archive.display());
                if let Some(location) = report.location {
                    println!("{location}");
                }
                Ok(())
            }
            Command::Restore { archive } => launcher.restore(&archive).await,
            Command::Deploy { artifacts } => launcher.deploy(&artifacts).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "quickstart-launcher",
            "backup",
            "--mode",
            "zip_only",
            "-i",
            "local-*",
            "--sequential",
        ])
        .unwrap();
        assert_eq!(cli.instance.as_deref(), Some("local-*"));
        assert!(cli.sequential);
        assert_eq!(cli.log_level(), "info");
        assert!(matches!(cli.command, Command::Backup { mode: Some(ref m) } if m == "zip_only"));
    }

    #[test]
    fn deploy_needs_artifacts() {
        assert!(Cli::try_parse_from(["quickstart-launcher", "deploy"]).is_err());
        let cli = Cli::try_parse_from(["quickstart-launcher", "await-up", "-v"]).unwrap();
        assert!(matches!(cli.command, Command::AwaitUp));
        assert_eq!(cli.log_level(), "debug");
    }
}
