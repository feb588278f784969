use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use crate::error::ImpExpError;

pub trait OwnershipTransfer: Send + Sync {
    fn chown(&self, path: &Path, system_user: &str, reason: &str) -> Result<(), ImpExpError>;
}

#[derive(Debug, Clone)]
pub struct ExternalChown {
    script: PathBuf,
}

impl ExternalChown {
    pub fn new(script: PathBuf) -> Self {
        Self { script }
    }
}

impl OwnershipTransfer for ExternalChown {
    fn chown(&self, path: &Path, system_user: &str, reason: &str) -> Result<(), ImpExpError> {
        info!(
            path = %path.display(),
            user = system_user,
            reason,
            "changing ownership"
        );
        let output = Command::new(&self.script)
            .arg(path)
            .arg(system_user)
            .arg(reason)
            .output()
            .map_err(|err| ImpExpError::ChownFailed {
                path: path.to_path_buf(),
                reason: reason.to_string(),
                message: err.to_string(),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {}", self.script.display())
        } else {
            stderr
        };
        Err(ImpExpError::ChownFailed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
            message,
        })
    }
}

pub fn process_user() -> String {
    whoami::username()
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn helper(dir: &Path, body: &str) -> PathBuf {
        let script = dir.join("chown.sh");
        fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[test]
    fn helper_receives_path_user_and_reason() {
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("args.txt");
        let script = helper(
            temp.path(),
            &format!("printf '%s|%s|%s' \"$1\" \"$2\" \"$3\" > {}", out.display()),
        );

        ExternalChown::new(script)
            .chown(Path::new("/staging/archive"), "alice", "history import archive")
            .unwrap();

        assert_eq!(
            fs::read_to_string(out).unwrap(),
            "/staging/archive|alice|history import archive"
        );
    }

    #[test]
    fn failing_helper_reports_stderr() {
        let temp = tempfile::tempdir().unwrap();
        let script = helper(temp.path(), "echo 'no such user' >&2\nexit 3");

        let err = ExternalChown::new(script)
            .chown(Path::new("/staging/archive"), "nobody", "upload file to history")
            .unwrap_err();

        match err {
            ImpExpError::ChownFailed { reason, message, .. } => {
                assert_eq!(reason, "upload file to history");
                assert_eq!(message, "no such user");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
