use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, Command},
    time::Instant,
};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open {0} of child process")]
    MissingPipe(&'static str),

    #[error("Failed to communicate with '{command}': {source}")]
    Communicate {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// One external command to run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    /// A nonzero exit code is not a crash when set. Signal deaths always are.
    pub tolerate_nonzero_exit: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout,
            working_dir: None,
            tolerate_nonzero_exit: false,
        }
    }

    /// `shell -c script`
    pub fn shell(shell: impl Into<PathBuf>, script: impl Into<OsString>, timeout: Duration) -> Self {
        Self::new(shell, timeout).arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdin(mut self, data: Option<Vec<u8>>) -> Self {
        self.stdin = data;
        self
    }

    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_owned());
        self
    }

    pub fn tolerate_nonzero_exit(mut self, yes: bool) -> Self {
        self.tolerate_nonzero_exit = yes;
        self
    }

    pub fn display(&self) -> String {
        let mut s = self.program.to_string_lossy().into_owned();
        for a in &self.args {
            s.push(' ');
            s.push_str(&a.to_string_lossy());
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    /// Terminating signal, if any (unix only).
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub crashed: bool,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && !self.crashed
    }

    /// Human readable reason for an unsuccessful run.
    pub fn failure_summary(&self) -> String {
        if self.timed_out {
            return format!("timed out after {}ms", self.elapsed.as_millis());
        }
        match (self.signal, self.exit_code) {
            (Some(sig), _) => format!("killed by signal {}", sig),
            (None, Some(code)) => format!("exited with code {}", code),
            (None, None) => "terminated abnormally".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    pub stdout_max_bytes: usize,
    pub stderr_max_bytes: usize,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            stdout_max_bytes: 16 * 1024 * 1024,
            stderr_max_bytes: 64 * 1024,
        }
    }
}

/// How long output is still drained once the process group is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Runs external commands with a deadline and bounded output capture.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    limits: CaptureLimits,
}

impl ProcessRunner {
    pub fn new(limits: CaptureLimits) -> Self {
        Self { limits }
    }

    /// Runs `spec` until its process exits or its timeout elapses. Either way
    /// the whole process group is killed before returning. On timeout whatever
    /// was captured so far is returned with `timed_out` set.
    pub async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutcome, ProcessError> {
        let mut std_cmd = std::process::Command::new(&spec.program);
        std_cmd
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.working_dir {
            std_cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // own group, so descendants can be killed along with it
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        log::debug!("spawn: {}", spec.display());
        let mut child = cmd.spawn().map_err(|e| ProcessError::Spawn {
            command: spec.display(),
            source: e,
        })?;
        // the group outlives its leader, so take the id before the leader is reaped
        let pgid = child.id();

        let mut stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::MissingPipe("stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::MissingPipe("stderr"))?;
        let stdin = child.stdin.take();

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let start_at = Instant::now();

        let (status, timed_out, elapsed, io_res) = {
            let fut_stdin = async {
                if let (Some(mut pipe), Some(data)) = (stdin, spec.stdin.as_deref()) {
                    match pipe.write_all(data).await {
                        // the child may exit without reading its input
                        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                        other => other?,
                    }
                    drop(pipe); // EOF for the child
                }
                Ok::<_, io::Error>(())
            };
            let fut_stdout = read_capped(&mut stdout, &mut stdout_buf, self.limits.stdout_max_bytes);
            let fut_stderr = read_capped(&mut stderr, &mut stderr_buf, self.limits.stderr_max_bytes);
            let io = async { tokio::try_join!(fut_stdin, fut_stdout, fut_stderr).map(|_| ()) };
            tokio::pin!(io);

            // The deadline applies to the leader's exit only. A descendant
            // holding the pipes open does not make a finished run time out.
            let mut io_res = None;
            let waited = tokio::time::timeout(spec.timeout, async {
                loop {
                    tokio::select! {
                        r = &mut io, if io_res.is_none() => io_res = Some(r),
                        status = child.wait() => break status,
                    }
                }
            })
            .await;
            let elapsed = start_at.elapsed();

            // nothing the command started survives the call
            let killed = kill_group(pgid);
            let (status, timed_out) = match waited {
                Ok(Ok(status)) => (Some(status), false),
                Ok(Err(e)) => {
                    terminate(&mut child, killed).await;
                    return Err(ProcessError::Communicate {
                        command: spec.display(),
                        source: e,
                    });
                }
                Err(_elapsed) => {
                    log::debug!("timeout ({}ms): {}", spec.timeout.as_millis(), spec.display());
                    (terminate(&mut child, killed).await, true)
                }
            };

            let io_res = match io_res {
                Some(r) => r,
                None => match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut io).await {
                    Ok(r) => r,
                    Err(_) => {
                        log::warn!("Output pipes still open after kill: {}", spec.display());
                        Ok(())
                    }
                },
            };
            (status, timed_out, elapsed, io_res)
        };

        if let Err(e) = io_res {
            if !timed_out {
                return Err(ProcessError::Communicate {
                    command: spec.display(),
                    source: e,
                });
            }
        }

        let exit_code = status.and_then(|s| s.code());
        let signal = status.and_then(exit_signal);
        let crashed = !timed_out
            && match status {
                Some(s) if s.success() => false,
                Some(_) if signal.is_none() => !spec.tolerate_nonzero_exit,
                _ => true,
            };

        Ok(ProcessOutcome {
            exit_code,
            signal,
            stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            timed_out,
            crashed,
            elapsed,
        })
    }
}

/// Reaps the child, killing it first unless its group was already killed.
async fn terminate(child: &mut Child, group_killed: bool) -> Option<ExitStatus> {
    if !group_killed {
        if let Err(e) = child.start_kill() {
            log::warn!("Failed to kill child process: {:#}", e);
        }
    }
    match child.wait().await {
        Ok(status) => Some(status),
        Err(e) => {
            log::warn!("Failed to reap child process: {:#}", e);
            None
        }
    }
}

/// Sends SIGKILL to the process group `pgid`. False if no such group is left.
#[cfg(unix)]
fn kill_group(pgid: Option<u32>) -> bool {
    let Some(pgid) = pgid else {
        return false
    };
    // SAFETY: kill(2) with a negative pid only signals the group led by our child
    let ret = unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
    if ret != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            log::debug!("killpg({}) failed: {}", pgid, err);
        }
    }
    ret == 0
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>) -> bool {
    false
}

async fn read_capped<R>(reader: &mut R, buf: &mut Vec<u8>, max_bytes: usize) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        let room = max_bytes.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}
