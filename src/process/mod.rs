//! External process execution and native process control.

mod control;
mod script;

#[cfg(target_os = "windows")]
pub(crate) mod win_api;

pub use control::{force_kill, is_process_alive};
pub use script::{execute, OutputMode, Script, ScriptCommand, ScriptKind, ScriptOutput};
