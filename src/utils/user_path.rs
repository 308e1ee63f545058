#![cfg(not(target_os = "windows"))]

use std::path::Path;
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use tracing::{debug, warn};

/// `PATH` as the user's terminal sees it.
///
/// GUI launchers and service managers start with a minimal `PATH`, which
/// hides version-managed `node`, `cargo` or `dotnet` installs from spawned
/// dev servers.
pub static USER_PATH: Lazy<String> = Lazy::new(|| {
    login_shell_path().unwrap_or_else(|| {
        let path = well_known_path();
        debug!("login shell PATH unavailable, using well-known tool directories");
        path
    })
});

/// Ask a non-interactive login shell for its `PATH`.
///
/// `-l` without `-i` reads the profile files only and never prompts.
fn login_shell_path() -> Option<String> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

    let output = Command::new(&shell)
        .args(["-l", "-c", "echo $PATH"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !path.is_empty() && path.contains('/') {
                debug!(shell = %shell, "resolved PATH from login shell");
                return Some(path);
            }
            None
        }
        Ok(output) => {
            warn!(shell = %shell, status = %output.status, "login shell exited with failure");
            None
        }
        Err(e) => {
            warn!(shell = %shell, error = %e, "failed to run login shell");
            None
        }
    }
}

/// Common tool directories that exist on this machine, followed by the
/// inherited `PATH`, without duplicates.
fn well_known_path() -> String {
    let home = dirs_next::home_dir()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();
    let system_path = std::env::var("PATH").unwrap_or_default();

    let candidates = [
        format!("{}/bin", home),
        format!("{}/.local/bin", home),
        format!("{}/.cargo/bin", home),
        format!("{}/.dotnet/tools", home),
        format!("{}/go/bin", home),
        format!("{}/.fnm/current/bin", home),
        format!("{}/.volta/bin", home),
        format!("{}/.npm-global/bin", home),
        format!("{}/.local/share/pnpm", home),
        format!("{}/.pyenv/shims", home),
        format!("{}/.rbenv/shims", home),
        "/opt/homebrew/bin".to_string(),
        "/usr/local/bin".to_string(),
        "/usr/bin".to_string(),
        "/bin".to_string(),
        "/usr/sbin".to_string(),
        "/sbin".to_string(),
    ];

    let mut paths: Vec<String> = candidates
        .into_iter()
        .filter(|p| Path::new(p).exists())
        .collect();

    // nvm keeps one bin directory per installed node version.
    let nvm_dir = Path::new(&home).join(".nvm/versions/node");
    if let Ok(entries) = std::fs::read_dir(&nvm_dir) {
        for entry in entries.flatten() {
            let bin = entry.path().join("bin");
            if bin.exists() {
                paths.insert(0, bin.to_string_lossy().to_string());
            }
        }
    }

    for p in system_path.split(':') {
        if !p.is_empty() && !paths.iter().any(|known| known == p) {
            paths.push(p.to_string());
        }
    }

    paths.join(":")
}
