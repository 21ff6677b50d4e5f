use crate::config::SandboxKind;
use crate::execution::{ExecutionResult, ExecutionStatus};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A unit of work run inside a sandbox. It reports its own status; the
/// sandbox only overrides it when the work crashes or overruns its deadline.
pub type Work<'a> = dyn FnMut() -> ExecutionStatus + 'a;

/// Runs a unit of work isolated from the caller, under a deadline.
///
/// Implementations never let a crash, panic or hang inside the work escape
/// to the caller: every outcome is folded into the returned result.
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, work: &mut Work<'_>, timeout: Duration) -> ExecutionResult;
}

/// Picks the sandbox implementation for `kind`. Process isolation is only
/// available on unix; elsewhere the null sandbox is used.
pub fn sandbox_for(kind: SandboxKind) -> Arc<dyn Sandbox> {
    match kind {
        #[cfg(unix)]
        SandboxKind::Fork => Arc::new(ForkSandbox::new()),
        #[cfg(not(unix))]
        SandboxKind::Fork => Arc::new(NullSandbox),
        SandboxKind::Null => Arc::new(NullSandbox),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic type".to_string()
    }
}

/// Runs the work on the calling thread.
///
/// Panics are contained and reported as `Crashed`, but nothing else is: an
/// abort or a segfault takes the whole process down, and a hung unit of work
/// is never interrupted. A run that finishes after its deadline is reported as
/// `Timedout`. Output is not captured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSandbox;

impl Sandbox for NullSandbox {
    fn name(&self) -> &'static str {
        "null"
    }

    fn run(&self, work: &mut Work<'_>, timeout: Duration) -> ExecutionResult {
        let start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| work()));
        let running_time = start.elapsed();

        match outcome {
            Ok(_) if running_time > timeout => {
                ExecutionResult::new(ExecutionStatus::Timedout, running_time)
            }
            Ok(status) => ExecutionResult::new(status, running_time),
            Err(payload) => ExecutionResult::new(ExecutionStatus::Crashed, running_time)
                .with_output(String::new(), panic_message(payload.as_ref())),
        }
    }
}

#[cfg(unix)]
pub use fork::ForkSandbox;

#[cfg(unix)]
mod fork {
    use super::{Sandbox, Work, panic_message};
    use crate::execution::{ExecutionResult, ExecutionStatus};
    use nix::errno::Errno;
    use nix::libc;
    use nix::sys::signal::{Signal, kill};
    use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
    use nix::unistd::{ForkResult, Pid, dup2, fork};
    use std::fs::File;
    use std::io::{self, Read, Seek, SeekFrom, Write};
    use std::os::fd::AsRawFd;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::time::{Duration, Instant};
    use tracing::warn;

    /// Exit code of a child whose work panicked.
    const PANIC_EXIT_CODE: i32 = 101;
    /// Exit code of a child that could not redirect its output or report its status.
    const SETUP_FAILED_EXIT_CODE: i32 = 102;
    const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

    /// Unlinked temporary files the child writes into. They are shared with
    /// the parent through `fork`, so the parent reads them once the child is
    /// gone and never has to drain anything while it runs.
    struct Capture {
        stdout: File,
        stderr: File,
        status: File,
    }

    impl Capture {
        fn new() -> io::Result<Self> {
            Ok(Self {
                stdout: tempfile::tempfile()?,
                stderr: tempfile::tempfile()?,
                status: tempfile::tempfile()?,
            })
        }

        fn read(file: &mut File) -> Vec<u8> {
            let mut buffer = Vec::new();
            if file.seek(SeekFrom::Start(0)).is_ok() {
                let _ = file.read_to_end(&mut buffer);
            }
            buffer
        }
    }

    enum ChildExit {
        Exited(i32),
        Signaled(Signal),
        TimedOut,
        WaitFailed(Errno),
    }

    /// Runs every unit of work in a forked child process.
    ///
    /// The child inherits a copy of the caller's memory, including the loaded
    /// program and its trampolines, so whatever the work corrupts dies with
    /// the child.
    #[derive(Debug, Clone)]
    pub struct ForkSandbox {
        poll_interval: Duration,
    }

    impl Default for ForkSandbox {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ForkSandbox {
        pub fn new() -> Self {
            Self {
                poll_interval: DEFAULT_POLL_INTERVAL,
            }
        }

        pub fn with_poll_interval(poll_interval: Duration) -> Self {
            Self { poll_interval }
        }

        /// Polls the child until it exits or `deadline` passes. A deadline
        /// too far out to represent means waiting without one.
        fn wait_with_timeout(&self, child: Pid, deadline: Option<Instant>) -> ChildExit {
            loop {
                match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::Exited(_, code)) => return ChildExit::Exited(code),
                    Ok(WaitStatus::Signaled(_, signal, _)) => return ChildExit::Signaled(signal),
                    Ok(_) => {
                        let now = Instant::now();
                        let pause = match deadline {
                            Some(deadline) if now >= deadline => {
                                Self::kill_and_reap(child);
                                return ChildExit::TimedOut;
                            }
                            Some(deadline) => self.poll_interval.min(deadline - now),
                            None => self.poll_interval,
                        };
                        std::thread::sleep(pause);
                    }
                    Err(Errno::EINTR) => continue,
                    Err(errno) => {
                        Self::kill_and_reap(child);
                        return ChildExit::WaitFailed(errno);
                    }
                }
            }
        }

        fn kill_and_reap(child: Pid) {
            if let Err(errno) = kill(child, Signal::SIGKILL) {
                warn!(pid = child.as_raw(), %errno, "Failed to kill sandboxed child");
            }
            let _ = waitpid(child, None);
        }
    }

    /// Body of the forked child. Never returns.
    fn run_child(work: &mut Work<'_>, capture: &mut Capture) -> ! {
        let redirected = dup2(capture.stdout.as_raw_fd(), libc::STDOUT_FILENO)
            .and_then(|_| dup2(capture.stderr.as_raw_fd(), libc::STDERR_FILENO));
        if redirected.is_err() {
            exit_child(SETUP_FAILED_EXIT_CODE);
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| work()));
        let _ = io::stdout().flush();

        let status = match outcome {
            Ok(status) => status,
            Err(payload) => {
                let _ = writeln!(io::stderr(), "{}", panic_message(payload.as_ref()));
                exit_child(PANIC_EXIT_CODE)
            }
        };
        let written = bincode::encode_to_vec(status, bincode::config::standard())
            .map_err(|_| ())
            .and_then(|bytes| capture.status.write_all(&bytes).map_err(|_| ()));
        match written {
            Ok(()) => exit_child(0),
            Err(()) => exit_child(SETUP_FAILED_EXIT_CODE),
        }
    }

    /// Leaves the child without running destructors or exit handlers that
    /// belong to the parent's state.
    fn exit_child(code: i32) -> ! {
        unsafe { libc::_exit(code) }
    }

    impl Sandbox for ForkSandbox {
        fn name(&self) -> &'static str {
            "fork"
        }

        fn run(&self, work: &mut Work<'_>, timeout: Duration) -> ExecutionResult {
            let start = Instant::now();

            let mut capture = match Capture::new() {
                Ok(capture) => capture,
                Err(e) => {
                    warn!(error = %e, "Failed to create sandbox capture files");
                    return ExecutionResult::new(ExecutionStatus::Invalid, start.elapsed())
                        .with_output(String::new(), format!("capture setup failed: {e}"));
                }
            };
            let _ = io::stdout().flush();

            // SAFETY: the child only runs the unit of work and then `_exit`s.
            let child = match unsafe { fork() } {
                Ok(ForkResult::Child) => run_child(work, &mut capture),
                Ok(ForkResult::Parent { child }) => child,
                Err(errno) => {
                    warn!(%errno, "fork failed");
                    return ExecutionResult::new(ExecutionStatus::Invalid, start.elapsed())
                        .with_output(String::new(), format!("fork failed: {errno}"));
                }
            };

            let exit = self.wait_with_timeout(child, start.checked_add(timeout));
            let running_time = start.elapsed();

            let mut notes = String::new();
            let status = match exit {
                ChildExit::TimedOut => ExecutionStatus::Timedout,
                ChildExit::Signaled(signal) => {
                    notes = format!("killed by {}\n", signal.as_str());
                    ExecutionStatus::Crashed
                }
                ChildExit::Exited(0) => {
                    let bytes = Capture::read(&mut capture.status);
                    bincode::decode_from_slice::<ExecutionStatus, _>(
                        &bytes,
                        bincode::config::standard(),
                    )
                    .map(|(status, _)| status)
                    .unwrap_or(ExecutionStatus::Crashed)
                }
                ChildExit::Exited(_) => ExecutionStatus::Crashed,
                ChildExit::WaitFailed(errno) => {
                    warn!(pid = child.as_raw(), %errno, "waitpid failed");
                    ExecutionStatus::Crashed
                }
            };

            let stdout = String::from_utf8_lossy(&Capture::read(&mut capture.stdout)).into_owned();
            let mut stderr =
                String::from_utf8_lossy(&Capture::read(&mut capture.stderr)).into_owned();
            stderr.push_str(&notes);
            ExecutionResult::new(status, running_time).with_output(stdout, stderr)
        }
    }
}
