//! Lazytrace CLI Library
//!
//! Command-line interface for running JavaScript programs under lazytrace.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod commands;
mod config;
mod error;
pub mod handlers;
pub mod logging;

pub use commands::{Cli, ColorArg, Commands, InstrumentArgs, ParseErrorArg, TraceArgs};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
