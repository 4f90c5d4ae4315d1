//! Local execution of a script function in a child shell.

use crate::error::{Error, Result};
use crate::stream::{self, CancelToken, ExecutionResult, OutputSink};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Build the shell invocation: fail-fast, source the script, call the
/// function with the arguments forwarded verbatim, then wait for any
/// background jobs it started.
fn shell_command(script: &Path, function: &str, args: &[String]) -> String {
    format!(
        "set -e; source {} && {} {} && wait",
        script.display(),
        function,
        args.join(" ")
    )
}

/// Run `function` from `script` in a single child shell process whose
/// working directory is the script's own directory.
///
/// Exactly one process is spawned per call; the child's exit status is the
/// result, with no retry.
///
/// Arguments are forwarded unquoted: one containing whitespace is
/// word-split by the shell into several.
pub fn run_local(
    script: &Path,
    function: &str,
    args: &[String],
    sink: &mut dyn OutputSink,
    cancel: &CancelToken,
) -> Result<ExecutionResult> {
    let script = script.canonicalize().map_err(|_| Error::MissingFile {
        path: script.to_path_buf(),
    })?;
    let dir = script.parent().unwrap_or_else(|| Path::new("."));
    let command = shell_command(&script, function, args);
    debug!(%command, "spawning local shell");

    let mut child = Command::new("bash")
        .arg("-c")
        .arg(&command)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()?;
    stream::relay(&mut child, sink, cancel)
}
