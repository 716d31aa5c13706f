//! Infrastructure implementation of the `PackageRunner` port.
//!
//! `ProcessRunner` invokes the external package runner with tokio, reading
//! stdout and stderr concurrently and killing the child if the per-job
//! timeout fires.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use outpost_common::Job;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::application::ports::{Execution, PackageRunner};
use crate::domain::job::{RUNNER_DEBUG_VAR, runner_args};

/// Default package runner binary.
pub const DEFAULT_RUNNER: &str = "pkgrunner";

/// Production `PackageRunner` backed by a subprocess.
pub struct ProcessRunner {
    program: String,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Kill jobs that run longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, job: &Job) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(runner_args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Containerised jobs see only their own environment.
        if job.containerised {
            cmd.env_clear();
        }
        cmd.envs(job.env());
        if job.verbose {
            cmd.env(RUNNER_DEBUG_VAR, "true");
        }
        cmd
    }
}

impl PackageRunner for ProcessRunner {
    async fn execute(&self, job: &Job) -> Result<Execution> {
        let program = &self.program;
        let mut child = self
            .command(job)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();
        let deadline = async {
            match self.timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = async {
                let (status, stdout, stderr) = tokio::join!(
                    child.wait(),
                    read_pipe(stdout_handle.as_mut(), "stdout"),
                    read_pipe(stderr_handle.as_mut(), "stderr"),
                );
                let status = status.with_context(|| format!("waiting for {program}"))?;
                let (stdout, stdout_err) = stdout;
                let (stderr, stderr_err) = stderr;
                let error = if status.success() {
                    stdout_err
                        .or(stderr_err)
                        .map(|e| format!("{program} output may be incomplete: {e}"))
                } else {
                    Some(format!("{program} failed: {status}"))
                };
                Ok(Execution {
                    output: combine(&stdout, &stderr),
                    error,
                })
            } => result,
            () = deadline => {
                let _ = child.kill().await;
                let secs = self.timeout.map_or(0, |t| t.as_secs());
                anyhow::bail!("{program} timed out after {secs}s and was killed")
            }
        }
    }

    fn is_available(&self) -> bool {
        find_program(&self.program).is_some()
    }
}

/// Drain one pipe. A read error keeps what was read so far and is returned
/// alongside it.
async fn read_pipe<R: AsyncRead + Unpin>(
    pipe: Option<&mut R>,
    name: &str,
) -> (Vec<u8>, Option<String>) {
    let mut buf = Vec::new();
    let Some(pipe) = pipe else {
        return (buf, None);
    };
    match pipe.read_to_end(&mut buf).await {
        Ok(_) => (buf, None),
        Err(e) => {
            tracing::warn!(error = %e, stream = name, bytes = buf.len(), "cannot read runner output");
            (buf, Some(format!("reading {name}: {e}")))
        }
    }
}

/// stdout then stderr, trailing whitespace trimmed.
fn combine(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(stderr));
    text.truncate(text.trim_end().len());
    text
}

/// Resolve `program` the way a shell would: paths as given, bare names on `PATH`.
#[must_use]
pub fn find_program(program: &str) -> Option<PathBuf> {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return as_path.is_file().then(|| as_path.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
