// src/process.rs

//! External command execution
//!
//! All external tools (crossenv, pip, build scripts, `patch`, `xcrun`) are
//! invoked through the [`ProcessRunner`] trait so builds can be driven by a
//! scripted runner in tests. Commands never inherit the ambient environment:
//! whatever a [`CommandSpec`] carries is exactly what the child sees.

use crate::error::{Error, Result};
use crate::logger::BuildLog;
use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use tracing::debug;

/// Number of trailing output lines kept for error reports
pub const TAIL_LINES: usize = 20;

/// A fully specified command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Complete child environment; nothing is inherited
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Build a command from an argument vector (`argv[0]` is the program)
    pub fn from_argv(argv: &[String]) -> Self {
        let mut spec = Self::new(argv.first().cloned().unwrap_or_default());
        spec.args = argv.iter().skip(1).cloned().collect();
        spec
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }

    /// Shell-quoted command line, for logs and error messages
    pub fn display(&self) -> String {
        self.argv()
            .into_iter()
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quote a word for display in a POSIX shell
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r#"'"'"'"#))
    }
}

/// Executes external commands
pub trait ProcessRunner: Send + Sync {
    /// Run a command, streaming merged stdout/stderr into the log line by line
    ///
    /// A non-zero exit is an error carrying the exit code and the last
    /// [`TAIL_LINES`] lines of output.
    fn run(&self, log: &mut BuildLog, command: &CommandSpec) -> Result<()>;

    /// Run a command and capture its stdout
    fn output(&self, command: &CommandSpec) -> Result<String>;
}

/// Write the debug preamble every runner emits before a command starts
pub fn log_invocation(log: &mut BuildLog, command: &CommandSpec) {
    log.line("");
    log.debug(format!(">>> {}", command.display()));
    for (key, value) in &command.env {
        log.debug(format!("    {}={}", key, shell_quote(value)));
    }
    log.debug("-".repeat(80));
}

/// Write the debug trailer after a command exits
pub fn log_completion(log: &mut BuildLog, code: Option<i32>) {
    log.debug("-".repeat(80));
    match code {
        Some(code) => log.debug(format!("<<< Return code: {code}")),
        None => log.debug("<<< Terminated by signal"),
    }
}

/// [`ProcessRunner`] backed by `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).env_clear().envs(&spec.env);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    fn spawn_error(spec: &CommandSpec, e: std::io::Error) -> Error {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("failed to start {}: {}", spec.program, e),
        ))
    }
}

/// Forward every line of `reader` into `tx` until EOF or the receiver hangs up
fn pump_lines<R: Read + Send + 'static>(reader: R, tx: mpsc::Sender<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

impl ProcessRunner for SystemRunner {
    fn run(&self, log: &mut BuildLog, spec: &CommandSpec) -> Result<()> {
        log_invocation(log, spec);

        let mut child = Self::command(spec)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error(spec, e))?;

        let (tx, rx) = mpsc::channel();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut tail = VecDeque::with_capacity(TAIL_LINES);
        for line in rx {
            log.line(&line);
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        for pump in pumps {
            let _ = pump.join();
        }

        let status = child.wait()?;
        log_completion(log, status.code());

        if status.success() {
            Ok(())
        } else {
            Err(Error::CommandFailed {
                command: spec.display(),
                code: status.code(),
                tail: tail.into(),
            })
        }
    }

    fn output(&self, spec: &CommandSpec) -> Result<String> {
        debug!("Capturing output of {}", spec.display());
        let output = Self::command(spec)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Self::spawn_error(spec, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<String> = stderr.lines().map(str::to_string).collect();
            let skip = lines.len().saturating_sub(TAIL_LINES);
            return Err(Error::CommandFailed {
                command: spec.display(),
                code: output.status.code(),
                tail: lines.into_iter().skip(skip).collect(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Environment for plain system tools (`patch`, `xcrun`) that are not tied
/// to a cross environment
pub fn system_env() -> BTreeMap<String, String> {
    ["PATH", "HOME", "LANG", "TMPDIR"]
        .into_iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
        .collect()
}

/// Resolve a system tool to an absolute path, falling back to the bare name
pub fn system_tool(name: &str) -> String {
    which::which(name)
        .map(|path| path.display().to_string())
        .unwrap_or_else(|_| name.to_string())
}

/// Render a path for use as a command argument
pub fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
