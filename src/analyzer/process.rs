use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::VisualizerError;

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const DROP_GRACE: Duration = Duration::from_millis(200);

/// How the analyzer ended when it was stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessExit {
    /// It had already exited on its own.
    AlreadyExited,
    /// It exited within the grace period after being asked to terminate.
    Terminated,
    /// It had to be killed.
    Killed,
}

/// Owns the external spectrum analyzer child process.
///
/// Only standard output is captured; stdin and stderr go to the null
/// device. Dropping the handle terminates the process if it is still alive.
pub struct AnalyzerProcess {
    child: Child,
    path: PathBuf,
    stdout: Option<ChildStdout>,
    reaped: bool,
}

impl AnalyzerProcess {
    /// Spawn the analyzer with no arguments.
    pub fn start(path: &Path) -> Result<Self, VisualizerError> {
        let launch_error = |source| VisualizerError::Launch {
            path: path.to_path_buf(),
            source,
        };

        let mut child = Command::new(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(launch_error)?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(launch_error(std::io::Error::other("analyzer stdout was not captured")));
        };

        log::info!("Analyzer started: {} (pid {})", path.display(), child.id());

        Ok(Self {
            child,
            path: path.to_path_buf(),
            stdout: Some(stdout),
            reaped: false,
        })
    }

    /// The analyzer's output stream. Can be taken once.
    pub fn take_output(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blocking check whether the process has exited.
    pub fn has_exited(&mut self) -> bool {
        if self.reaped {
            return true;
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            self.reaped = true;
            log_exit(&self.path, status);
        }
        self.reaped
    }

    /// Ask the analyzer to exit, then kill it if it is still running after
    /// `grace`. Closing the process closes its stdout, which unblocks any
    /// reader waiting on it.
    pub fn stop(&mut self, grace: Duration) -> ProcessExit {
        let deadline = Instant::now() + grace;
        if let Some(exit) = self.terminate() {
            return exit;
        }
        match self.wait_until(deadline) {
            Some(exit) => exit,
            None => self.kill(),
        }
    }

    /// Send the graceful termination signal. Returns `Some` if the process
    /// had already exited, in which case nothing is sent.
    pub fn terminate(&mut self) -> Option<ProcessExit> {
        self.stdout.take();
        if self.has_exited() {
            return Some(ProcessExit::AlreadyExited);
        }
        if !self.send_term() {
            log::debug!("Could not signal analyzer {}", self.path.display());
        }
        None
    }

    /// Poll for exit until `deadline`. Polls at least once, even if the
    /// deadline has already passed.
    pub fn wait_until(&mut self, deadline: Instant) -> Option<ProcessExit> {
        if self.reaped {
            return Some(ProcessExit::AlreadyExited);
        }
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.reaped = true;
                    log_exit(&self.path, status);
                    return Some(ProcessExit::Terminated);
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                Ok(None) => return None,
                Err(e) => {
                    log::warn!("Failed to poll analyzer: {}", e);
                    return None;
                }
            }
        }
    }

    /// Force the process down and reap it.
    pub fn kill(&mut self) -> ProcessExit {
        self.stdout.take();
        if self.reaped {
            return ProcessExit::AlreadyExited;
        }
        log::warn!("Killing analyzer {}", self.path.display());
        if let Err(e) = self.child.kill() {
            log::warn!("Failed to kill analyzer: {}", e);
        }
        match self.child.wait() {
            Ok(status) => log_exit(&self.path, status),
            Err(e) => log::warn!("Failed to reap analyzer: {}", e),
        }
        self.reaped = true;
        ProcessExit::Killed
    }

    #[cfg(unix)]
    fn send_term(&mut self) -> bool {
        let Ok(pid) = libc::pid_t::try_from(self.child.id()) else {
            return false;
        };
        // SAFETY: plain syscall on a pid we own and have not reaped yet.
        unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
    }

    #[cfg(not(unix))]
    fn send_term(&mut self) -> bool {
        self.child.kill().is_ok()
    }
}

impl Drop for AnalyzerProcess {
    fn drop(&mut self) {
        if !self.reaped {
            self.stop(DROP_GRACE);
        }
    }
}

fn log_exit(path: &Path, status: ExitStatus) {
    log::debug!("Analyzer {} exited: {}", path.display(), status);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testutil::script;
    use std::io::Read;

    #[test]
    fn missing_executable_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AnalyzerProcess::start(&dir.path().join("no-such-analyzer")).err().unwrap();
        assert!(matches!(err, VisualizerError::Launch { .. }));
    }

    #[test]
    fn non_executable_file_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "100;\n").unwrap();
        assert!(matches!(
            AnalyzerProcess::start(&path),
            Err(VisualizerError::Launch { .. })
        ));
    }

    #[test]
    fn exposes_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "printf '1;2;\\n'");
        let mut process = AnalyzerProcess::start(&path).unwrap();

        let mut out = String::new();
        process.take_output().unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "1;2;\n");
        assert!(process.take_output().is_none());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !process.has_exited() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(process.stop(Duration::from_secs(1)), ProcessExit::AlreadyExited);
    }

    #[test]
    fn terminates_within_grace() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "exec sleep 30");
        let mut process = AnalyzerProcess::start(&path).unwrap();

        let started = Instant::now();
        assert_eq!(process.stop(Duration::from_secs(2)), ProcessExit::Terminated);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(process.has_exited());
    }

    #[test]
    fn kills_after_grace_when_term_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "trap '' TERM\nexec sleep 30");
        let mut process = AnalyzerProcess::start(&path).unwrap();
        // let the shell install the trap before it execs
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        assert_eq!(process.stop(Duration::from_millis(200)), ProcessExit::Killed);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn drop_reaps_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "exec sleep 30");
        let process = AnalyzerProcess::start(&path).unwrap();
        let pid = process.id() as libc::pid_t;
        drop(process);
        // SAFETY: signal 0 only checks that the pid exists.
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive);
    }
}
