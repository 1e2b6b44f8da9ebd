//! fq
//!
//! Command-line front end for filequeue.

mod script;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use filequeue::{Config, FileHandle, PathQueueRegistry};
use tracing_subscriber::EnvFilter;

use script::{parse_mode, parse_script, Op, Output, Request};

/// fq - serialized file operations from the command line.
#[derive(Parser, Debug)]
#[command(name = "fq")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print a file
    Read { path: String },

    /// Print a file with line numbers
    Lines { path: String },

    /// Replace a file's content
    Write {
        path: String,
        data: String,

        /// Terminate data with a line ending
        #[arg(long)]
        line: bool,

        /// Octal mode for a newly created file
        #[arg(long, value_parser = parse_mode)]
        mode: Option<u32>,
    },

    /// Append to a file
    Append {
        path: String,
        data: String,

        /// Terminate data with a line ending
        #[arg(long)]
        line: bool,

        /// Octal mode for a newly created file
        #[arg(long, value_parser = parse_mode)]
        mode: Option<u32>,
    },

    /// Remove a file (succeeds if already absent)
    Delete { path: String },

    /// Check whether a file or directory exists
    Exists { path: String },

    /// Check whether a path is a regular file
    IsFile { path: String },

    /// Check whether a path is a directory
    IsDir { path: String },

    /// Create a directory and any missing parents
    Mkdir {
        path: String,

        /// Octal mode for the new directory
        #[arg(long, value_parser = parse_mode)]
        mode: Option<u32>,
    },

    /// Enqueue every line of a script at once, then print results in order
    Run {
        /// Script file, one `<command> <path> [data]` per line
        script: PathBuf,
    },
}

impl Commands {
    /// Convert a single-operation subcommand to a request.
    fn into_request(self) -> Option<Request> {
        let (op, path, data, mode) = match self {
            Commands::Read { path } => (Op::Read, path, None, None),
            Commands::Lines { path } => (Op::Lines, path, None, None),
            Commands::Write {
                path,
                data,
                line,
                mode,
            } => (Op::Write { line }, path, Some(data), mode),
            Commands::Append {
                path,
                data,
                line,
                mode,
            } => (Op::Append { line }, path, Some(data), mode),
            Commands::Delete { path } => (Op::Delete, path, None, None),
            Commands::Exists { path } => (Op::Exists, path, None, None),
            Commands::IsFile { path } => (Op::IsFile, path, None, None),
            Commands::IsDir { path } => (Op::IsDir, path, None, None),
            Commands::Mkdir { path, mode } => (Op::Mkdir, path, None, mode),
            Commands::Run { .. } => return None,
        };
        Some(Request {
            op,
            path,
            data,
            mode,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };
    config.apply_env_overrides();
    config.validate()?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let registry = PathQueueRegistry::from_config(&config);

    match cli.command {
        Commands::Run { script } => {
            let source = std::fs::read_to_string(&script)
                .with_context(|| format!("Failed to read script: {}", script.display()))?;
            let requests = parse_script(&source)?;
            tracing::info!(requests = requests.len(), "Running script {:?}", script);

            let failures = run_requests(&registry, requests, |line, result| match result {
                Ok(output) => println!("{line}: {output}"),
                Err(e) => println!("{line}: error: {e}"),
            })
            .await;
            if failures > 0 {
                anyhow::bail!("{failures} operation(s) failed");
            }
        }
        command => {
            let Some(request) = command.into_request() else {
                anyhow::bail!("unsupported command");
            };
            let handle = FileHandle::new(&registry, request.path.clone());
            let output = request.issue(&handle).resolve().await?;
            match output {
                Output::Done => tracing::debug!(path = %request.path, "Operation complete"),
                output => println!("{output}"),
            }
        }
    }

    Ok(())
}

/// Enqueue every request before awaiting any, then report results in order.
///
/// Returns the number of failed requests.
async fn run_requests<F>(
    registry: &PathQueueRegistry,
    requests: Vec<(usize, Request)>,
    mut report: F,
) -> usize
where
    F: FnMut(usize, filequeue::Result<Output>),
{
    let queued: Vec<_> = requests
        .iter()
        .map(|(line, request)| {
            let handle = FileHandle::new(registry, request.path.clone());
            (*line, request.issue(&handle))
        })
        .collect();

    let mut failures = 0;
    for (line, queued) in queued {
        let result = queued.resolve().await;
        if result.is_err() {
            failures += 1;
        }
        report(line, result);
    }
    failures
}
