//! External tool invocation with line-by-line output streaming.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{channel, Sender};
use std::thread::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLine {
    pub kind: StreamKind,
    pub line: String,
}

/// A program, its arguments and what to feed it.
#[derive(Clone, Debug, Builder, Getters, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct CommandSpec {
    #[builder(into)]
    program: PathBuf,
    #[builder(default)]
    args: Vec<OsString>,
    #[builder(default)]
    envs: Vec<(OsString, OsString)>,
    #[builder(into)]
    stdin: Option<String>,
}

impl CommandSpec {
    /// Shell-like rendering for log lines.
    pub fn display(&self) -> String {
        std::iter::once(self.program.to_string_lossy())
            .chain(self.args.iter().map(|a| a.to_string_lossy()))
            .join(" ")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stderr: Vec<String>,
    /// The last stdout line had no trailing newline.
    pub stdout_unterminated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }

    pub fn stderr_tail(&self, lines: usize) -> String {
        let skip = self.stderr.len().saturating_sub(lines);
        self.stderr[skip..].join("\n")
    }
}

pub trait CommandRunner: Send + Sync {
    /// Runs `spec` to completion, handing every stdout/stderr line to `on_line` as it arrives.
    ///
    /// Lines keep their order within one stream. Between stdout and stderr the order is only
    /// approximately the order the program wrote them in, as each pipe is read separately.
    fn run(&self, spec: &CommandSpec, on_line: &mut dyn FnMut(OutputLine)) -> Result<CommandOutput>;
}

/// Runs commands with `std::process`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    #[named]
    fn run(&self, spec: &CommandSpec, on_line: &mut dyn FnMut(OutputLine)) -> Result<CommandOutput> {
        tracing::debug!("Running {}", spec.display());
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k, v)))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(Error::from)
            .add_msg(format!("Failed to start {:?}", spec.program))
            .add_fn_name(function_path!())?;

        let stdin_writer = match (child.stdin.take(), spec.stdin.clone()) {
            (Some(mut stdin), Some(input)) => Some(std::thread::spawn(move || {
                stdin.write_all(input.as_bytes())
            })),
            _ => None,
        };

        let (tx, rx) = channel();
        let stdout_reader = child
            .stdout
            .take()
            .map(|out| spawn_line_reader(out, StreamKind::Stdout, tx.clone()));
        let stderr_reader = child
            .stderr
            .take()
            .map(|err| spawn_line_reader(err, StreamKind::Stderr, tx.clone()));
        drop(tx);

        let mut output = CommandOutput::default();
        for line in rx {
            if line.kind == StreamKind::Stderr {
                output.stderr.push(line.line.clone());
            }
            on_line(line);
        }

        if let Some(reader) = stdout_reader {
            output.stdout_unterminated = join_io_thread(reader)
                .add_msg(format!("Reading output of {:?} failed", spec.program))
                .add_fn_name(function_path!())?;
        }
        if let Some(reader) = stderr_reader {
            join_io_thread(reader)
                .add_msg(format!("Reading output of {:?} failed", spec.program))
                .add_fn_name(function_path!())?;
        }
        if let Some(writer) = stdin_writer {
            join_io_thread(writer)
                .add_msg(format!("Writing input of {:?} failed", spec.program))
                .add_fn_name(function_path!())?;
        }

        let status = child.wait()?;
        output.exit_code = status.code();
        tracing::debug!("{:?} exited with {:?}", spec.program, output.exit_code);
        Ok(output)
    }
}

/// Returns whether the stream ended in the middle of a line.
fn spawn_line_reader<R: Read + Send + 'static>(
    reader: R,
    kind: StreamKind,
    tx: Sender<OutputLine>,
) -> JoinHandle<std::io::Result<bool>> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut unterminated = false;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok(unterminated);
            }
            unterminated = !buf.ends_with(b"\n");
            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            if tx.send(OutputLine { kind, line }).is_err() {
                return Ok(unterminated);
            }
        }
    })
}

fn join_io_thread<T>(handle: JoinHandle<std::io::Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| Error::worker_panic("i/o thread panicked"))?
        .map_err(Error::from)
}
