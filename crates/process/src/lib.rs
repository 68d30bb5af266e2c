//! Runs an external command line process and captures its output.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use datanode_process::{
//!     CommandLineOptions, CommandLineProcess, LogsCache, ProcessFailure, ProcessListener, Result,
//! };
//!
//! struct Printer;
//!
//! impl ProcessListener for Printer {
//!     fn on_start(&self) {
//!         println!("started");
//!     }
//!
//!     fn on_process_complete(&self, exit_code: i32) {
//!         println!("completed with {exit_code}");
//!     }
//!
//!     fn on_process_failed(&self, exit_code: i32, cause: &ProcessFailure) {
//!         println!("failed with {exit_code}: {cause}");
//!     }
//! }
//!
//! async fn run() -> Result<()> {
//!     let options = CommandLineOptions::new("/usr/share/opensearch/bin/opensearch", Vec::<String>::new());
//!     let process = CommandLineProcess::new(options, LogsCache::default(), Arc::new(Printer))?;
//!
//!     process.start()?;
//!
//!     // Readiness probes can inspect recent output
//!     let _recent = process.logs().std_out();
//!
//!     process.stop().await;
//!
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod command_line;
mod error;
mod logs_cache;
mod output;

pub use command_line::{
    CommandLineOptions, CommandLineProcess, DEFAULT_STOP_TIMEOUT, ProcessFailure, ProcessInfo,
    ProcessListener,
};
pub use error::{Error, Result};
pub use logs_cache::{DEFAULT_LOGS_CAPACITY, LogStream, LogsCache};
pub use output::LoggingOutputStream;
pub use nix::sys::signal::Signal;
