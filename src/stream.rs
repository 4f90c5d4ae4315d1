//! Output multiplexing and cancellation for a running child process.
//!
//! Both executors hand their child here. The relay loop waits for readiness
//! on the child's stdout and stderr with `poll(2)`, draining whichever
//! channel has data so a stall on one never delays the other. Per-channel
//! line order is preserved; no ordering is promised between the two.
//!
//! Cancellation is observed synchronously by the same loop: when the token
//! fires, the child's process group is killed, both channels are drained to
//! EOF, and the invocation resolves with [`CANCEL_STATUS`]. Output handles
//! are closed on every exit path.

use crate::error::Result;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::os::fd::{AsFd, OwnedFd};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reserved status reported when execution is interrupted by the user.
/// 130 follows the shell convention for death by SIGINT; the 0-255 overlap
/// with shell-assigned codes is a known limitation.
pub const CANCEL_STATUS: i32 = 130;

/// Result of one execution attempt. Output is streamed, never retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: i32,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Anything that can receive relayed output one line at a time.
///
/// Production uses [`StdoutSink`]; tests inject a collecting sink instead of
/// redirecting process-level file descriptors.
pub trait OutputSink {
    fn write_line(&mut self, line: &str);
}

/// Relays lines to standard output.
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_line(&mut self, line: &str) {
        println!("{line}");
    }
}

static SIGINT_SEEN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: nix::libc::c_int) {
    SIGINT_SEEN.store(true, Ordering::SeqCst);
}

/// Cooperative cancellation flag checked by the relay loop.
///
/// Cloneable so a signal handler (or a test thread) can fire it while the
/// loop owns another handle.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || SIGINT_SEEN.load(Ordering::SeqCst)
    }
}

/// Route SIGINT to the cancellation path instead of killing the process.
///
/// Installed once before execution starts; the relay loop picks the flag up
/// on its next poll round.
pub fn install_sigint_handler() -> Result<()> {
    let action = signal::SigAction::new(
        SigHandler::Handler(on_sigint),
        signal::SaFlags::empty(),
        signal::SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGINT, &action) }.map_err(io::Error::from)?;
    Ok(())
}

/// One output channel of the child, with a partial-line buffer.
struct Channel {
    file: File,
    buf: Vec<u8>,
    eof: bool,
}

impl Channel {
    fn new(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
            buf: Vec::new(),
            eof: false,
        }
    }

    /// One read on a ready descriptor; never blocks when poll reported data.
    fn drain_ready(&mut self, sink: &mut dyn OutputSink) {
        let mut chunk = [0u8; 4096];
        match self.file.read(&mut chunk) {
            Ok(0) => self.eof = true,
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                self.flush_lines(sink);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(_) => self.eof = true,
        }
    }

    fn flush_lines(&mut self, sink: &mut dyn OutputSink) {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            sink.write_line(&String::from_utf8_lossy(&line[..pos]));
        }
    }

    /// Drain everything remaining, flushing a trailing partial line.
    fn drain_to_eof(&mut self, sink: &mut dyn OutputSink) {
        while !self.eof {
            self.drain_ready(sink);
        }
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            sink.write_line(&String::from_utf8_lossy(&rest));
        }
    }
}

fn is_ready(pfd: &PollFd) -> bool {
    pfd.revents().is_some_and(|r| {
        r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

/// Relay a child's output until it exits (or is cancelled), returning its
/// exit status.
///
/// The child must have been spawned with piped stdout/stderr and in its own
/// process group, so cancellation can take down any background jobs the
/// function started.
pub fn relay(child: &mut Child, sink: &mut dyn OutputSink, cancel: &CancelToken) -> Result<ExecutionResult> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child stderr not captured"))?;
    let mut out = Channel::new(OwnedFd::from(stdout));
    let mut err = Channel::new(OwnedFd::from(stderr));

    loop {
        if cancel.is_cancelled() {
            kill_group(child);
            let _ = child.wait();
            out.drain_to_eof(sink);
            err.drain_to_eof(sink);
            return Ok(ExecutionResult {
                status: CANCEL_STATUS,
            });
        }
        if out.eof && err.eof {
            break;
        }

        let mut out_ready = false;
        let mut err_ready = false;
        {
            let mut fds = Vec::with_capacity(2);
            if !out.eof {
                fds.push(PollFd::new(out.file.as_fd(), PollFlags::POLLIN));
            }
            if !err.eof {
                fds.push(PollFd::new(err.file.as_fd(), PollFlags::POLLIN));
            }
            // Short timeout bounds cancellation latency.
            match poll(&mut fds, PollTimeout::from(100u8)) {
                Ok(0) => {}
                Ok(_) => {
                    let mut idx = 0;
                    if !out.eof {
                        out_ready = is_ready(&fds[idx]);
                        idx += 1;
                    }
                    if !err.eof {
                        err_ready = is_ready(&fds[idx]);
                    }
                }
                Err(Errno::EINTR) => {}
                Err(errno) => return Err(io::Error::from(errno).into()),
            }
        }

        if out_ready {
            out.drain_ready(sink);
        }
        if err_ready {
            err.drain_ready(sink);
        }
    }

    // Trailing partial lines (script output without a final newline).
    out.drain_to_eof(sink);
    err.drain_to_eof(sink);

    let status = child.wait()?;
    let code = status.code().unwrap_or_else(|| {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map_or(1, |s| 128 + s)
    });
    Ok(ExecutionResult { status: code })
}

/// Kill the child's whole process group, falling back to the child alone.
fn kill_group(child: &mut Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    if signal::killpg(pgid, Signal::SIGKILL).is_err() {
        let _ = child.kill();
    }
}
