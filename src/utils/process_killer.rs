//! Signal delivery for supervised process groups.
//!
//! Supervised commands are spawned as leaders of their own process group, so
//! signalling the group reaches `npm`, `node` and whatever else the shell
//! forked underneath.

use std::io;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// Check whether a process with this pid exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // Exists but belongs to someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

/// Ask the process group led by `pid` to shut down (SIGTERM).
#[cfg(unix)]
pub fn terminate_group(pid: u32) -> io::Result<()> {
    send_to_group(pid, Signal::SIGTERM)
}

/// Kill the process group led by `pid` (SIGKILL).
#[cfg(unix)]
pub fn kill_group(pid: u32) -> io::Result<()> {
    send_to_group(pid, Signal::SIGKILL)
}

#[cfg(unix)]
fn send_to_group(pid: u32, sig: Signal) -> io::Result<()> {
    match signal::killpg(Pid::from_raw(pid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(io::Error::other(e)),
    }
}

/// Windows has no graceful equivalent; terminate the whole tree.
#[cfg(not(unix))]
pub fn terminate_group(pid: u32) -> io::Result<()> {
    kill_group(pid)
}

#[cfg(not(unix))]
pub fn kill_group(pid: u32) -> io::Result<()> {
    let mut kill_command = std::process::Command::new("taskkill");
    kill_command.args(["/PID", &pid.to_string(), "/T", "/F"]);

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        kill_command.creation_flags(CREATE_NO_WINDOW);
    }

    kill_command.output().map(|_| ())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::process::Command;

    #[tokio::test]
    async fn terminate_group_stops_shell_children() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30"])
            .process_group(0)
            .spawn()
            .expect("failed to spawn sh");
        let pid = child.id().unwrap();
        assert!(is_process_alive(pid));

        terminate_group(pid).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("group did not exit")
            .unwrap();
        assert!(!status.success());
        assert!(!is_process_alive(pid));
    }

    #[test]
    fn signalling_a_missing_group_is_not_an_error() {
        // Above any pid_max the kernel accepts.
        let pid = i32::MAX as u32;
        assert!(kill_group(pid).is_ok());
        assert!(!is_process_alive(pid));
    }
}
