//! Process primitives shared by the pipeline engine and the chat room.

use nix::errno::Errno;
use nix::sys::signal::{SigHandler, Signal, kill, signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use std::io::{self, Write};

/// Fork the current process.
///
/// Standard output is flushed first so that buffered text is not written twice.
pub fn fork_process() -> nix::Result<ForkResult> {
    let _ = io::stdout().flush();
    // SAFETY: the shell is single-threaded; children only exec, run a builtin, or exit.
    unsafe { fork() }
}

/// Give a forked stage the default `SIGPIPE` disposition.
///
/// The Rust runtime ignores `SIGPIPE`, and an ignored signal survives `execve`. Without this a
/// producer whose reader has gone away keeps running and sees `EPIPE` instead of being killed.
pub fn restore_default_signals() -> nix::Result<()> {
    // SAFETY: installs the default disposition, no handler code runs.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) }.map(drop)
}

/// Flush standard output and terminate a forked child with `code`.
pub fn exit_child(code: i32) -> ! {
    let _ = io::stdout().flush();
    std::process::exit(code)
}

/// Block until `pid` terminates. Interrupted waits are retried.
pub fn wait_for(pid: Pid) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// Wait for every pid in order, ignoring how each one ended.
pub fn wait_all(pids: &[Pid]) {
    for &pid in pids {
        match wait_for(pid) {
            Ok(status) => tracing::debug!(?status, "child finished"),
            Err(e) => tracing::warn!(%pid, "waitpid failed: {e}"),
        }
    }
}

/// Collect every child that has already terminated, without blocking.
pub fn reap_finished() -> Vec<WaitStatus> {
    let mut reaped = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Ok(status) => reaped.push(status),
            Err(e) => {
                tracing::warn!("waitpid failed: {e}");
                break;
            }
        }
    }
    reaped
}

/// Ask `pid` to terminate and reap it. A child that is already gone is not an error.
pub fn terminate(pid: Pid) -> nix::Result<()> {
    match kill(pid, Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => return Err(e),
    }
    match wait_for(pid) {
        Ok(_) | Err(Errno::ECHILD) => Ok(()),
        Err(e) => Err(e),
    }
}
