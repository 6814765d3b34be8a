//! Process spawning seam shared by the engines and the remote bridge.
//!
//! Everything that talks to a backend CLI (`bsub`, `squeue`, `ssh`, `ps`...)
//! goes through a [`CommandRunner`] so tests can script backend output
//! without the backend installed.

use async_trait::async_trait;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// One backend CLI invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Append standard output to this file instead of capturing it.
    pub stdout_path: Option<PathBuf>,
    /// Append standard error to this file instead of capturing it.
    pub stderr_path: Option<PathBuf>,
}

impl CommandRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn redirect(mut self, stdout: impl Into<PathBuf>, stderr: impl Into<PathBuf>) -> Self {
        self.stdout_path = Some(stdout.into());
        self.stderr_path = Some(stderr.into());
        self
    }

    /// The command line as a single space separated string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Standard error followed by standard output, for `jobstatus.error`.
    pub fn combined(&self) -> String {
        match (self.stderr.is_empty(), self.stdout.is_empty()) {
            (true, _) => self.stdout.clone(),
            (false, true) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stderr, self.stdout),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    /// Run to completion and capture its output.
    async fn run(&self, request: &CommandRequest) -> io::Result<CommandOutput>;

    /// Start a child that outlives this call. Returns its process id.
    async fn spawn_detached(&self, request: &CommandRequest) -> io::Result<u32>;
}

/// Runs commands on the local host with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    fn build(request: &CommandRequest) -> io::Result<Command> {
        let mut command = Command::new(&request.program);
        command.args(&request.args).stdin(Stdio::null());
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }
        command.stdout(match &request.stdout_path {
            Some(path) => Stdio::from(append_to(path)?),
            None => Stdio::piped(),
        });
        command.stderr(match &request.stderr_path {
            Some(path) => Stdio::from(append_to(path)?),
            None => Stdio::piped(),
        });
        Ok(command)
    }
}

fn append_to(path: &Path) -> io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, request: &CommandRequest) -> io::Result<CommandOutput> {
        debug!(command = %request, "Running command");
        let output = Self::build(request)?.output().await?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn spawn_detached(&self, request: &CommandRequest) -> io::Result<u32> {
        debug!(command = %request, "Spawning detached command");
        let mut command = Self::build(request)?;
        if request.stdout_path.is_none() {
            command.stdout(Stdio::null());
        }
        if request.stderr_path.is_none() {
            command.stderr(Stdio::null());
        }
        // Own process group so signals aimed at the orchestrator do not reach the job
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("child exited before reporting a pid"))?;

        // Reap the child so a finished job does not linger as a zombie in `ps`
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                warn!(pid, error = %e, "Failed to reap detached child");
            }
        });

        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_rendering() {
        let request = CommandRequest::new("bjobs")
            .args(["-J", "jprieto@example.edu"])
            .arg("898104");
        assert_eq!(request.to_string(), "bjobs -J jprieto@example.edu 898104");
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(CommandOutput::new(1, "out", "").combined(), "out");
        assert_eq!(CommandOutput::new(1, "", "err").combined(), "err");
        assert_eq!(CommandOutput::new(1, "out", "err").combined(), "err\nout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let output = SystemCommandRunner
            .run(&CommandRequest::new("sh").args(["-c", "echo hi; echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "hi");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_redirects_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("stdout.out");
        let err = dir.path().join("stderr.err");
        std::fs::write(&out, "first\n").unwrap();

        let output = SystemCommandRunner
            .run(
                &CommandRequest::new("sh")
                    .args(["-c", "echo second"])
                    .redirect(&out, &err),
            )
            .await
            .unwrap();
        assert!(output.success());
        assert!(output.stdout.is_empty());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "first\nsecond\n");
    }
}
