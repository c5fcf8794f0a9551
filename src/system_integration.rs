use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Hide a directory from the platform file browser.
///
/// The image cache already carries a dot-prefixed name, which is enough on
/// Linux. Windows and macOS need an explicit attribute.
pub fn mark_hidden(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(SyncError::fs(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "cannot hide a missing path"),
        ));
    }

    match hide_command(path) {
        Some(mut command) => {
            let output = command.output().map_err(|e| SyncError::fs(path, e))?;
            if output.status.success() {
                debug!(path = %path.display(), "marked hidden");
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                Err(SyncError::fs(path, std::io::Error::other(stderr)))
            }
        }
        None => Ok(()),
    }
}

/// Best-effort variant used while preparing the download folder.
pub fn try_mark_hidden(path: &Path) {
    if let Err(e) = mark_hidden(path) {
        warn!("Could not hide {}: {}", path.display(), e);
    }
}

#[cfg(target_os = "windows")]
fn hide_command(path: &Path) -> Option<std::process::Command> {
    let mut command = std::process::Command::new("attrib");
    command.arg("+h").arg(path);
    Some(command)
}

#[cfg(target_os = "macos")]
fn hide_command(path: &Path) -> Option<std::process::Command> {
    let mut command = std::process::Command::new("chflags");
    command.arg("hidden").arg(path);
    Some(command)
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn hide_command(_path: &Path) -> Option<std::process::Command> {
    None
}
