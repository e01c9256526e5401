//! External tool invocation.
//!
//! Every external program the pipeline touches (`git`, `make`, `curl`,
//! `xorriso`, the `limine` installer) goes through [`Cmd`]. A non-zero exit
//! aborts the run with a [`ToolFailure`] carrying the command line, exit code,
//! and captured stderr, so the binary can propagate the tool's own exit code.

use anyhow::{Context, Result};
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

/// Captured output of a successful tool run.
#[derive(Debug)]
pub struct CmdOutput {
    pub stdout: String,
}

/// A tool exited with a non-zero status.
#[derive(Debug)]
pub struct ToolFailure {
    /// Full command line, program plus arguments.
    pub command: String,
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Captured standard error, verbatim.
    pub stderr: String,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "`{}` exited with code {}", self.command, code)?,
            None => write!(f, "`{}` was terminated by a signal", self.command)?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, "\n{}", stderr)?;
        }
        Ok(())
    }
}

impl std::error::Error for ToolFailure {}

/// Builder for a single external tool invocation.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            error_msg: None,
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

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Message attached as context when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run the tool to completion, streaming its output to the console.
    ///
    /// Each line is echoed as it arrives, so a long clone or download shows
    /// progress while it runs. Output is accumulated as well, so failures
    /// carry the tool's stderr verbatim and callers can parse stdout.
    pub fn run(self) -> Result<CmdOutput> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("spawning `{}`", self.command_line()))?;
        let stdout_pipe = child.stdout.take().context("capturing child stdout")?;
        let stderr_pipe = child.stderr.take().context("capturing child stderr")?;

        let stdout_reader = thread::spawn(move || tee_lines(stdout_pipe, false));
        let stderr_reader = thread::spawn(move || tee_lines(stderr_pipe, true));

        let status = child
            .wait()
            .with_context(|| format!("waiting for `{}`", self.command_line()))?;
        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        if status.success() {
            return Ok(CmdOutput { stdout });
        }

        let failure = ToolFailure {
            command: self.command_line(),
            exit_code: status.code(),
            stderr,
        };
        match self.error_msg {
            Some(msg) => Err(anyhow::Error::new(failure).context(msg)),
            None => Err(failure.into()),
        }
    }

    /// Run the tool with all stdio inherited from this process.
    ///
    /// Used for interactive sessions (the emulator); the caller decides what
    /// a non-zero exit means.
    pub fn run_interactive(self) -> Result<ExitStatus> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
            .status()
            .with_context(|| format!("spawning `{}`", self.command_line()))
    }
}

/// Echo each line to the console as it arrives while collecting the text.
fn tee_lines(pipe: impl Read, to_stderr: bool) -> String {
    let mut collected = String::new();
    for line in BufReader::new(pipe).lines().map_while(Result::ok) {
        if to_stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}
