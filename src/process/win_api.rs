//! Windows native API helpers for process management.

use windows::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
};

/// Check if a process is alive via OpenProcess + GetExitCodeProcess.
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    unsafe {
        match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
            Ok(handle) => {
                let mut exit_code: u32 = 0;
                let alive = GetExitCodeProcess(handle, &mut exit_code).is_ok()
                    && (exit_code as i32) == STILL_ACTIVE.0;
                let _ = CloseHandle(handle);
                alive
            }
            Err(_) => false,
        }
    }
}
