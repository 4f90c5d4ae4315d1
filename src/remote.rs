//! Remote execution over a reusable SSH control channel.
//!
//! One invocation walks a fixed sequence: open a multiplexed ControlMaster
//! channel, create a private staging directory on the host, copy the main
//! script and its resolved includes (re-creating their relative directory
//! structure so the script's own `source` statements resolve unmodified),
//! run the function there with the same fail-fast semantics as local
//! execution, stream the output back, and close the channel. Closure happens
//! on every exit path, whether execution succeeded, failed, or was cancelled.

use crate::error::{Error, Result};
use crate::includes;
use crate::stream::{self, CancelToken, ExecutionResult, OutputSink};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

static SESSION_SEQ: AtomicU32 = AtomicU32::new(0);

/// An open control channel to one remote host.
///
/// Ephemeral: created at the start of one invocation, closed at its end,
/// never reused across invocations. [`Drop`] closes the channel as a
/// backstop so no exit path leaks the master connection.
#[derive(Debug)]
pub struct RemoteSession {
    remote: String,
    control_path: PathBuf,
    open: bool,
}

impl RemoteSession {
    /// Open a multiplexed, non-interactive master connection to `remote`.
    ///
    /// Fails with [`Error::ConnectionFailure`] before any files are touched.
    pub fn open(remote: &str) -> Result<Self> {
        let control_path = std::env::temp_dir().join(format!(
            "bclissh-{}-{}",
            std::process::id(),
            SESSION_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let mut session = Self {
            remote: remote.to_string(),
            control_path,
            open: false,
        };
        debug!(remote, control_path = %session.control_path.display(), "opening control channel");
        let status = Command::new("ssh")
            .arg("-MNf")
            .args(session.control_args())
            .arg("-o")
            .arg("ControlMaster=yes")
            .arg(remote)
            .status();
        match status {
            Ok(status) if status.success() => {
                session.open = true;
                Ok(session)
            }
            _ => Err(Error::ConnectionFailure {
                remote: remote.to_string(),
            }),
        }
    }

    fn control_args(&self) -> [String; 2] {
        [
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ]
    }

    /// Run a command on the host over the control channel, treating a
    /// non-zero status as a staging failure.
    fn run_checked(&self, command: &str) -> Result<()> {
        let output = Command::new("ssh")
            .args(self.control_args())
            .arg(&self.remote)
            .arg(command)
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::TransferFailure {
                path: PathBuf::from(command),
                remote: self.remote.clone(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Copy a local file to `remote_path` over the control channel.
    fn copy_to(&self, local: &Path, remote_path: &str) -> Result<()> {
        let output = Command::new("scp")
            .args(self.control_args())
            .arg(local)
            .arg(format!("{}:{}", self.remote, remote_path))
            .output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::TransferFailure {
                path: local.to_path_buf(),
                remote: self.remote.clone(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    /// Spawn a command on the host with piped output for streaming.
    fn spawn(&self, command: &str) -> Result<std::process::Child> {
        Ok(Command::new("ssh")
            .args(self.control_args())
            .arg(&self.remote)
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()?)
    }

    /// Close the master connection. Idempotent.
    pub fn close(&mut self) {
        if self.open {
            let _ = Command::new("ssh")
                .args(["-O", "exit"])
                .args(self.control_args())
                .arg(&self.remote)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            self.open = false;
        }
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Private staging directory for one (script, function, host) invocation.
fn staging_dir(script: &Path, function: &str, remote: &str) -> String {
    let stem = script
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("script");
    format!("/tmp/{}_{}_{}", stem, function, remote.replace('@', "_"))
}

/// The remote invocation: same fail-fast + source + call + wait semantics
/// as the local executor, run from inside the staging directory.
fn remote_command(staging: &str, basename: &str, function: &str, args: &[String]) -> String {
    format!(
        "bash -c 'set -e; cd {staging} && source {basename} && {function} {}' && wait",
        args.join(" ")
    )
}

/// Run `function` from `script` on `remote`, staging the script plus its
/// transitive includes first.
///
/// Arguments are forwarded unquoted, as in the local executor: one
/// containing whitespace is word-split by the remote shell.
pub fn run_remote(
    remote: &str,
    script: &Path,
    function: &str,
    args: &[String],
    sink: &mut dyn OutputSink,
    cancel: &CancelToken,
) -> Result<ExecutionResult> {
    let script = script.canonicalize().map_err(|_| Error::MissingFile {
        path: script.to_path_buf(),
    })?;
    let mut session = RemoteSession::open(remote)?;
    let result = stage_and_invoke(&session, remote, &script, function, args, sink, cancel);
    session.close();
    result
}

fn stage_and_invoke(
    session: &RemoteSession,
    remote: &str,
    script: &Path,
    function: &str,
    args: &[String],
    sink: &mut dyn OutputSink,
    cancel: &CancelToken,
) -> Result<ExecutionResult> {
    let staging = staging_dir(script, function, remote);
    let basename = script
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("script.sh");

    session.run_checked(&format!("mkdir -p {staging}"))?;
    session.copy_to(script, &format!("{staging}/{basename}"))?;

    // Re-create each include's relative directory structure so the staged
    // script's own source statements resolve without modification.
    let includes = includes::resolve(script);
    debug!(count = includes.len(), staging, "staging includes");
    for include in &includes {
        let relative_dir = Path::new(&include.include_path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty());
        let remote_dir = match relative_dir {
            Some(dir) => format!("{staging}/{}", dir.display()),
            None => staging.clone(),
        };
        let file_name = include
            .full_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        session.run_checked(&format!("mkdir -p {remote_dir}"))?;
        session.copy_to(&include.full_path, &format!("{remote_dir}/{file_name}"))?;
    }

    let mut child = session.spawn(&remote_command(&staging, basename, function, args))?;
    stream::relay(&mut child, sink, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_dir_derived_from_invocation_signature() {
        let dir = staging_dir(Path::new("/opt/scripts/deploy.sh"), "main", "user@host");
        assert_eq!(dir, "/tmp/deploy_main_user_host");
    }

    #[test]
    fn staging_dir_without_user_prefix() {
        let dir = staging_dir(Path::new("tools.sh"), "build", "host");
        assert_eq!(dir, "/tmp/tools_build_host");
    }

    #[test]
    fn remote_command_shape() {
        let cmd = remote_command(
            "/tmp/deploy_main_user_host",
            "deploy.sh",
            "main",
            &["a".to_string(), "b".to_string()],
        );
        assert_eq!(
            cmd,
            "bash -c 'set -e; cd /tmp/deploy_main_user_host && source deploy.sh && main a b' && wait"
        );
    }

    #[test]
    fn connection_failure_before_any_staging() {
        // .invalid never resolves, so ssh exits non-zero without prompting.
        let err = RemoteSession::open("nosuchuser@invalid.invalid").unwrap_err();
        assert!(matches!(err, Error::ConnectionFailure { .. }));
    }

    #[test]
    fn control_args_carry_the_control_path() {
        let session = RemoteSession {
            remote: "user@host".to_string(),
            control_path: PathBuf::from("/tmp/bclissh-1-0"),
            open: false,
        };
        assert_eq!(
            session.control_args(),
            ["-o".to_string(), "ControlPath=/tmp/bclissh-1-0".to_string()]
        );
    }
}
