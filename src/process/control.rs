//! Native process control for runtimes whose PID is known.

use crate::error::{AppError, Result};

/// Check if a process is alive by PID.
#[cfg(target_os = "windows")]
pub fn is_process_alive(pid: u32) -> bool {
    super::win_api::is_process_alive(pid)
}

/// Check if a process is alive by PID.
#[cfg(not(target_os = "windows"))]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;

    unix_target(pid).is_some_and(|target| kill(target, None).is_ok())
}

/// Only positive PIDs that fit `pid_t` name a single process; `0` and
/// negative values address whole groups to `kill(2)`.
#[cfg(not(target_os = "windows"))]
fn unix_target(pid: u32) -> Option<nix::unistd::Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(nix::unistd::Pid::from_raw)
}

/// Terminate the process tree rooted at `pid` without asking it first.
#[cfg(target_os = "windows")]
pub fn force_kill(pid: u32) -> Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .map_err(|e| AppError::process(format!("Failed to run taskkill: {e}")))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = [stderr.trim(), stdout.trim()]
        .into_iter()
        .find(|text| !text.is_empty())
        .unwrap_or("(no output)");
    Err(AppError::process(format!(
        "taskkill failed for pid {}: {}",
        pid, detail
    )))
}

/// Terminate the process group of `pid`, or `pid` alone when it has none.
#[cfg(not(target_os = "windows"))]
pub fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::getpgid;

    let Some(target) = unix_target(pid) else {
        return Err(AppError::process(format!("Refusing to kill PID {pid}")));
    };
    match getpgid(Some(target)) {
        Ok(pgid) if pgid.as_raw() > 1 => killpg(pgid, Signal::SIGKILL).map_err(|e| {
            AppError::process(format!(
                "Failed to kill process group {} (from pid {}): {}",
                pgid.as_raw(),
                pid,
                e
            ))
        }),
        Ok(_) => kill(target, Signal::SIGKILL)
            .map_err(|e| AppError::process(format!("Failed to kill process {}: {}", pid, e))),
        Err(e) => kill(target, Signal::SIGKILL).map_err(|kill_err| {
            AppError::process(format!(
                "Failed to kill process {} (getpgid failed: {}): {}",
                pid, e, kill_err
            ))
        }),
    }
}
