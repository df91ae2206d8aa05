//! Launch the user's default browser for the OAuth2 consent screen.
//!
//! Opening is best-effort: callers log the URL before calling [`open_url`]
//! so the user can copy it manually when no browser can be started.

use std::process::{Command, Stdio};

use crate::errors::{DriveUpError, Result};

/// Candidate launchers tried in order on Linux.
const LINUX_LAUNCHERS: &[&str] = &["xdg-open", "firefox", "google-chrome", "chromium"];

/// Build the launcher command for the current platform.
fn launcher(url: &str) -> Result<Command> {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("rundll32");
        cmd.arg("url.dll,FileProtocolHandler").arg(url);
        return Ok(cmd);
    }
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(url);
        return Ok(cmd);
    }
    if cfg!(target_os = "linux") {
        let found = LINUX_LAUNCHERS
            .iter()
            .find(|bin| which(bin))
            .ok_or_else(|| DriveUpError::Config("no browser launcher found on PATH".into()))?;
        let mut cmd = Command::new(found);
        cmd.arg(url);
        return Ok(cmd);
    }
    Err(DriveUpError::Config(format!(
        "opening a browser is not supported on {}",
        std::env::consts::OS
    )))
}

/// Whether `bin` resolves to a file in one of the `PATH` directories.
fn which(bin: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file()))
        .unwrap_or(false)
}

/// Open `url` in the default browser without waiting for it to exit.
pub fn open_url(url: &str) -> Result<()> {
    let mut cmd = launcher(url)?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(DriveUpError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_which_missing_binary() {
        assert!(!which("definitely-not-a-real-browser-binary"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_launcher_uses_known_candidate() {
        match launcher("https://example.com") {
            Ok(cmd) => {
                let program = cmd.get_program().to_string_lossy().to_string();
                assert!(LINUX_LAUNCHERS.contains(&program.as_str()));
                let args: Vec<_> = cmd.get_args().collect();
                assert_eq!(args, vec!["https://example.com"]);
            }
            Err(DriveUpError::Config(msg)) => assert!(msg.contains("no browser")),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
