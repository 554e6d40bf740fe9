//! Bounded execution of instance control scripts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::paths::{get_bin_dir, get_control_dir};

/// How long output already produced may keep trickling in after the script exits.
/// Detached children inherit the pipes, so EOF is not awaited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Stream every line at info level and fail on unexpected exit codes.
    Verbose,
    /// Log at debug level and hand the exit code back to the caller.
    Quiet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Start,
    Stop,
    Status,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Status => "status",
        }
    }

    /// File name of the operator wrapper in `control/`.
    pub fn wrapper_name(&self) -> String {
        if cfg!(target_os = "windows") {
            format!("{}.bat", self.as_str())
        } else {
            format!("{}.sh", self.as_str())
        }
    }

    /// File name of the script generated by unpacking the runtime.
    pub fn bin_name(&self) -> String {
        if cfg!(target_os = "windows") {
            format!("{}.bat", self.as_str())
        } else {
            self.as_str().to_string()
        }
    }
}

/// A start/stop/status script pair: operator wrapper first, generated script as fallback.
#[derive(Debug, Clone)]
pub struct Script {
    pub kind: ScriptKind,
    pub wrapper: PathBuf,
    pub bin: PathBuf,
}

impl Script {
    pub fn new(instance_dir: &Path, kind: ScriptKind) -> Self {
        Self {
            kind,
            wrapper: get_control_dir(instance_dir).join(kind.wrapper_name()),
            bin: get_bin_dir(instance_dir).join(kind.bin_name()),
        }
    }

    pub fn path(&self) -> &Path {
        if self.wrapper.exists() {
            &self.wrapper
        } else {
            &self.bin
        }
    }

    /// Command running this script from the instance directory.
    pub fn command(&self, instance_dir: &Path, env: Vec<(String, String)>) -> ScriptCommand {
        let script = self.path().display().to_string();
        let (program, args) = if cfg!(target_os = "windows") {
            ("cmd", vec!["/C".to_string(), script])
        } else {
            ("sh", vec![script])
        };
        ScriptCommand {
            program: program.to_string(),
            args,
            dir: instance_dir.to_path_buf(),
            env,
            tag: self.kind.as_str().to_string(),
        }
    }
}

/// A fully described external invocation.
#[derive(Debug, Clone)]
pub struct ScriptCommand {
    pub program: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
    pub env: Vec<(String, String)>,
    /// Prefix of forwarded output lines.
    pub tag: String,
}

impl ScriptCommand {
    /// Build from an argv-style list; the first element is the program.
    pub fn from_argv(argv: &[String], dir: &Path, tag: &str) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AppError::config("Command line must not be empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            dir: dir.to_path_buf(),
            env: Vec::new(),
            tag: tag.to_string(),
        })
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ScriptCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn spawn_reader<R>(
    source: Option<R>,
    stream: Stream,
    tag: String,
    mode: OutputMode,
    tx: mpsc::UnboundedSender<(Stream, String)>,
) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let source = source?;
    Some(tokio::spawn(async move {
        let mut lines = BufReader::new(source).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match (mode, stream) {
                (OutputMode::Verbose, Stream::Stdout) => log::info!("[{}] {}", tag, line),
                (OutputMode::Verbose, Stream::Stderr) => log::warn!("[{} stderr] {}", tag, line),
                (OutputMode::Quiet, _) => log::debug!("[{}] {}", tag, line),
            }
            if tx.send((stream, line)).is_err() {
                break;
            }
        }
    }))
}

/// Run `command` to completion within `timeout`.
///
/// Launch failures and timeouts always fail. An exit code outside
/// `expected_codes` fails only in [`OutputMode::Verbose`]. A timed-out
/// process is not killed and may keep running on its own.
pub async fn execute(
    command: &ScriptCommand,
    timeout: Duration,
    expected_codes: &[i32],
    mode: OutputMode,
) -> Result<ScriptOutput> {
    let line = command.command_line();
    log::debug!("Executing '{}' in {:?}", line, command.dir);

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.dir)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    #[cfg(target_os = "windows")]
    {
        use windows::Win32::System::Threading::CREATE_NO_WINDOW;
        cmd.creation_flags(CREATE_NO_WINDOW.0);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::script_launch(&line, e))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let readers: Vec<JoinHandle<()>> = [
        spawn_reader(
            child.stdout.take(),
            Stream::Stdout,
            command.tag.clone(),
            mode,
            tx.clone(),
        ),
        spawn_reader(
            child.stderr.take(),
            Stream::Stderr,
            command.tag.clone(),
            mode,
            tx,
        ),
    ]
    .into_iter()
    .flatten()
    .collect();

    let waited = tokio::time::timeout(timeout, child.wait()).await;
    let status = match waited {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            readers.iter().for_each(JoinHandle::abort);
            return Err(AppError::script_launch(&line, e));
        }
        Err(_) => {
            readers.iter().for_each(JoinHandle::abort);
            log::warn!(
                "'{}' did not finish within {}ms, leaving it running",
                line,
                timeout.as_millis()
            );
            return Err(AppError::script_timeout(&line, timeout));
        }
    };

    let mut output = ScriptOutput {
        exit_code: status.code(),
        ..ScriptOutput::default()
    };
    let drain_deadline = tokio::time::Instant::now() + OUTPUT_DRAIN_TIMEOUT;
    while let Ok(Some((stream, text))) = tokio::time::timeout_at(drain_deadline, rx.recv()).await
    {
        let buffer = match stream {
            Stream::Stdout => &mut output.stdout,
            Stream::Stderr => &mut output.stderr,
        };
        buffer.push_str(&text);
        buffer.push('\n');
    }
    readers.iter().for_each(JoinHandle::abort);

    let expected = output
        .exit_code
        .is_some_and(|code| expected_codes.contains(&code));
    if mode == OutputMode::Verbose && !expected {
        return Err(AppError::script_failed(
            &line,
            output.exit_code,
            &output.stderr,
        ));
    }
    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sh(dir: &Path, script: &str) -> ScriptCommand {
        ScriptCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            dir: dir.to_path_buf(),
            env: vec![("CQ_PORT".to_string(), "4502".to_string())],
            tag: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn captures_output_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = execute(
            &sh(dir.path(), "echo port=$CQ_PORT; echo oops >&2"),
            Duration::from_secs(10),
            &[0],
            OutputMode::Verbose,
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout, "port=4502\n");
        assert_eq!(out.stderr, "oops\n");
    }

    #[tokio::test]
    async fn unexpected_exit_code_fails_verbose_run() {
        let dir = tempfile::tempdir().unwrap();
        let err = execute(
            &sh(dir.path(), "echo broken >&2; exit 3"),
            Duration::from_secs(10),
            &[0],
            OutputMode::Verbose,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Script);
        assert_eq!(err.payload("exit_code"), Some("3"));
        assert_eq!(err.payload("stderr"), Some("broken"));
    }

    #[tokio::test]
    async fn quiet_run_returns_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = execute(
            &sh(dir.path(), "exit 3"),
            Duration::from_secs(10),
            &[0],
            OutputMode::Quiet,
        )
        .await
        .unwrap();
        assert_eq!(out.exit_code, Some(3));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = execute(
            &sh(dir.path(), "sleep 5"),
            Duration::from_millis(100),
            &[0],
            OutputMode::Quiet,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Script);
        assert!(err.payload("detail").unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn launch_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let command = ScriptCommand::from_argv(
            &["/definitely/not/here".to_string()],
            dir.path(),
            "missing",
        )
        .unwrap();
        let err = execute(&command, Duration::from_secs(1), &[0], OutputMode::Quiet)
            .await
            .unwrap_err();
        assert!(err.payload("detail").unwrap().starts_with("failed to launch"));
    }

    #[tokio::test]
    async fn detached_child_does_not_block_completion() {
        let dir = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        execute(
            &sh(dir.path(), "sleep 3 & echo started"),
            Duration::from_secs(10),
            &[0],
            OutputMode::Verbose,
        )
        .await
        .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn wrapper_wins_over_generated_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::new(dir.path(), ScriptKind::Start);
        assert_eq!(script.path(), script.bin.as_path());

        std::fs::create_dir_all(script.wrapper.parent().unwrap()).unwrap();
        std::fs::write(&script.wrapper, "exit 0").unwrap();
        assert_eq!(script.path(), script.wrapper.as_path());

        let command = script.command(dir.path(), Vec::new());
        assert_eq!(command.program, "sh");
        assert!(command.command_line().ends_with("control/start.sh"));
    }
}
