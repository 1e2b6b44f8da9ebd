//! # filequeue
//!
//! Path-addressed file handles whose asynchronous operations are serialized
//! per path.
//!
//! ## Overview
//!
//! Every [`FileHandle`] belongs to a [`PathQueueRegistry`]. Operations issued
//! through any handle for the same path string run one at a time, in the
//! order they were issued; operations on different paths run concurrently.
//! There is no lock held while an operation runs: each path keeps a chain of
//! completion signals and every new operation waits on the one before it.
//!
//! ```text
//!   FileHandle("a.txt") ──┐
//!                         ├──► chain "a.txt":  write ─► append ─► read
//!   FileHandle("a.txt") ──┘
//!
//!   FileHandle("b.txt") ─────► chain "b.txt":  delete ─► exists
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filequeue::{FileHandle, PathQueueRegistry, WriteOptions};
//!
//! #[tokio::main]
//! async fn main() -> filequeue::Result<()> {
//!     let registry = PathQueueRegistry::new();
//!     let log = FileHandle::new(&registry, "out/app.log");
//!
//!     // Both are enqueued immediately; the append runs after the write.
//!     let write = log.write_line("started", WriteOptions::new());
//!     let append = log.append_line("ready", WriteOptions::new());
//!     write.await?;
//!     append.await?;
//!
//!     println!("{:?}", log.read_lines().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`registry`]: per-path chains and the [`Pending`] future
//! - [`handle`]: the [`FileHandle`] operation surface
//! - [`config`]: TOML configuration
//! - [`encoding`], [`lines`], [`path`]: string helpers used by handles
//! - [`error`]: error types

pub mod config;
pub mod encoding;
pub mod error;
pub mod handle;
pub mod lines;
pub mod path;
pub mod registry;

pub use config::{Config, ConfigError};
pub use encoding::Encoding;
pub use error::{FileError, Result};
pub use handle::{FileHandle, Payload, WriteOptions};
pub use lines::LINE_ENDING;
pub use registry::{
    ChainPolicy, ChainRef, OperationChain, PathQueueRegistry, Pending, RegistryOptions,
    RetentionPolicy,
};
