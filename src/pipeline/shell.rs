//! Upload hook: the operator's own command, run once before delivery.

use crate::config::UploadConfig;
use crate::error::PostlinkError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

#[async_trait]
pub trait UploadHook: Send + Sync {
    async fn run(&self) -> Result<(), PostlinkError>;
}

/// `<shell> -c <cmd>` in the work directory.
#[derive(Debug, Clone)]
pub struct ShellUpload {
    pub cmd: String,
    pub shell: String,
    pub workdir: PathBuf,
}

impl ShellUpload {
    /// `None` when no command is configured.
    pub fn from_config(upload: Option<&UploadConfig>, workdir: PathBuf) -> Option<Self> {
        let upload = upload.filter(|u| !u.cmd.trim().is_empty())?;
        Some(Self {
            cmd: upload.cmd.clone(),
            shell: upload.shell.clone(),
            workdir,
        })
    }
}

#[async_trait]
impl UploadHook for ShellUpload {
    async fn run(&self) -> Result<(), PostlinkError> {
        let fail = |detail: String| PostlinkError::UploadCommand {
            cmd: self.cmd.clone(),
            detail,
        };
        debug!("running upload command via {}", self.shell);
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&self.cmd)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| fail(format!("cannot start '{}': {e}", self.shell)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("upload stdout: {}", stdout.trim_end());
        }
        if !output.status.success() {
            return Err(fail(format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!("upload command finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(cmd: &str, dir: &std::path::Path) -> ShellUpload {
        ShellUpload {
            cmd: cmd.into(),
            shell: "sh".into(),
            workdir: dir.to_path_buf(),
        }
    }

    #[test]
    fn blank_command_means_no_hook() {
        let blank = UploadConfig {
            cmd: "   ".into(),
            shell: "bash".into(),
        };
        assert!(ShellUpload::from_config(Some(&blank), ".".into()).is_none());
        assert!(ShellUpload::from_config(None, ".".into()).is_none());
    }

    #[tokio::test]
    async fn runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        hook("echo done > marker.txt", dir.path()).run().await.unwrap();
        let marker = std::fs::read_to_string(dir.path().join("marker.txt")).unwrap();
        assert_eq!(marker.trim(), "done");
    }

    #[tokio::test]
    async fn non_zero_exit_is_fatal_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = hook("echo nope >&2; exit 3", dir.path()).run().await.unwrap_err();
        match err {
            PostlinkError::UploadCommand { cmd, detail } => {
                assert!(cmd.contains("exit 3"));
                assert!(detail.contains("nope"), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_shell_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = hook("true", dir.path());
        h.shell = "/nonexistent/shell".into();
        assert!(matches!(
            h.run().await,
            Err(PostlinkError::UploadCommand { .. })
        ));
    }
}
