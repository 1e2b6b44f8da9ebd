//! Operation requests shared by subcommands and `fq run` scripts.
//!
//! A script has one request per line: `<command> <path> [data]`. Blank lines
//! and lines starting with `#` are skipped. Everything after the path is the
//! data, so it may contain spaces. `write` and `append` without data use an
//! empty payload; `write <path>` truncates the file.

use std::fmt;

use filequeue::{FileHandle, Pending, WriteOptions};
use thiserror::Error;

/// Errors found while parsing a script.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("line {line}: unknown command '{command}'")]
    UnknownCommand { line: usize, command: String },

    #[error("line {line}: missing path")]
    MissingPath { line: usize },

    #[error("line {line}: invalid octal mode '{value}'")]
    InvalidMode { line: usize, value: String },
}

/// A single file operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Lines,
    Write { line: bool },
    Append { line: bool },
    Delete,
    Exists,
    IsFile,
    IsDir,
    Mkdir,
}

impl Op {
    fn parse(command: &str) -> Option<Self> {
        Some(match command {
            "read" => Op::Read,
            "lines" => Op::Lines,
            "write" => Op::Write { line: false },
            "writeln" => Op::Write { line: true },
            "append" => Op::Append { line: false },
            "appendln" => Op::Append { line: true },
            "delete" => Op::Delete,
            "exists" => Op::Exists,
            "is-file" => Op::IsFile,
            "is-dir" => Op::IsDir,
            "mkdir" => Op::Mkdir,
            _ => return None,
        })
    }
}

/// An operation bound to a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub op: Op,
    pub path: String,
    pub data: Option<String>,
    pub mode: Option<u32>,
}

impl Request {
    /// Enqueue this request on `handle`.
    pub fn issue(&self, handle: &FileHandle) -> Queued {
        let mut options = WriteOptions::new();
        if let Some(mode) = self.mode {
            options = options.mode(mode);
        }
        let data = self.data.clone().unwrap_or_default();

        match self.op {
            Op::Read => Queued::Text(handle.read()),
            Op::Lines => Queued::Lines(handle.read_lines()),
            Op::Write { line: false } => Queued::Unit(handle.write(data, options)),
            Op::Write { line: true } => Queued::Unit(handle.write_line(data, options)),
            Op::Append { line: false } => Queued::Unit(handle.append(data, options)),
            Op::Append { line: true } => Queued::Unit(handle.append_line(data, options)),
            Op::Delete => Queued::Unit(handle.delete()),
            Op::Exists => Queued::Flag(handle.exists()),
            Op::IsFile => Queued::Flag(handle.is_file()),
            Op::IsDir => Queued::Flag(handle.is_dir()),
            Op::Mkdir => Queued::Unit(handle.mkdir(self.mode)),
        }
    }
}

/// An enqueued request awaiting its result.
pub enum Queued {
    Text(Pending<String>),
    Lines(Pending<Vec<String>>),
    Flag(Pending<bool>),
    Unit(Pending<()>),
}

impl Queued {
    /// Wait for the operation and convert its result for printing.
    pub async fn resolve(self) -> filequeue::Result<Output> {
        Ok(match self {
            Queued::Text(pending) => Output::Text(pending.await?),
            Queued::Lines(pending) => Output::Lines(pending.await?),
            Queued::Flag(pending) => Output::Flag(pending.await?),
            Queued::Unit(pending) => {
                pending.await?;
                Output::Done
            }
        })
    }
}

/// Printable result of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Text(String),
    Lines(Vec<String>),
    Flag(bool),
    Done,
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Text(text) => f.write_str(text),
            Output::Lines(lines) => {
                for (i, line) in lines.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{:>4}  {}", i + 1, line)?;
                }
                Ok(())
            }
            Output::Flag(flag) => write!(f, "{flag}"),
            Output::Done => f.write_str("ok"),
        }
    }
}

/// Parse an octal mode such as `755` or `0o755`.
pub fn parse_mode(value: &str) -> Result<u32, String> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    u32::from_str_radix(digits, 8).map_err(|_| format!("invalid octal mode: {value}"))
}

/// Parse a script into numbered requests.
pub fn parse_script(source: &str) -> Result<Vec<(usize, Request)>, ScriptError> {
    let mut requests = Vec::new();

    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (command, rest) = split_word(trimmed);
        let op = Op::parse(command).ok_or_else(|| ScriptError::UnknownCommand {
            line,
            command: command.to_string(),
        })?;

        let (path, data) = split_word(rest);
        if path.is_empty() {
            return Err(ScriptError::MissingPath { line });
        }

        let data = (!data.is_empty()).then(|| data.to_string());

        let mode = match (op, &data) {
            (Op::Mkdir, Some(value)) => Some(parse_mode(value).map_err(|_| {
                ScriptError::InvalidMode {
                    line,
                    value: value.clone(),
                }
            })?),
            _ => None,
        };

        requests.push((
            line,
            Request {
                op,
                path: path.to_string(),
                data,
                mode,
            },
        ));
    }

    Ok(requests)
}

/// Split off the first whitespace-delimited word.
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], text[end..].trim_start()),
        None => (text, ""),
    }
}
