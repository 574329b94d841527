//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use lazytrace::ParseErrorPolicy;
use std::path::PathBuf;

/// Lazytrace: run JavaScript programs with load-time statement and branch tracing
#[derive(Parser, Debug)]
#[command(name = "lazytrace")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (only errors are logged)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a program with tracing and write <dir>/lazytrace.dtrace at exit
    Trace(TraceArgs),

    /// Print the instrumented text of one file
    Instrument(InstrumentArgs),
}

/// Arguments for the trace command
#[derive(Parser, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct TraceArgs {
    /// Match root; patterns are relative to it
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Include pattern (repeatable, default **/*.js)
    #[arg(short = 'i', long = "include", value_name = "PATTERN")]
    pub includes: Vec<String>,

    /// Exclude pattern (repeatable)
    #[arg(short = 'x', long = "exclude", value_name = "PATTERN")]
    pub excludes: Vec<String>,

    /// Apply the built-in excludes (node_modules, test, tests)
    #[arg(long, overrides_with = "no_default_excludes")]
    pub default_excludes: bool,

    /// Do not apply the built-in excludes
    #[arg(long, overrides_with = "default_excludes")]
    pub no_default_excludes: bool,

    /// Also instrument code evaluated with vm.runInThisContext
    #[arg(long)]
    pub hook_run_in_context: bool,

    /// Hook composed after instrumentation (file path or package name)
    #[arg(long, value_name = "FILE_OR_MODULE")]
    pub post_require_hook: Option<String>,

    /// Report directory
    #[arg(long, default_value = lazytrace::flush::DEFAULT_REPORT_DIR)]
    pub dir: PathBuf,

    /// What to do with files that fail to parse
    #[arg(long, default_value = "passthrough")]
    pub on_parse_error: ParseErrorArg,

    /// Unload cached matching modules before installing the hook
    #[arg(long, hide = true)]
    pub self_test: bool,

    /// Script path or command name on PATH
    pub target: String,

    /// Arguments passed to the target
    #[arg(last = true)]
    pub args: Vec<String>,
}

impl TraceArgs {
    /// Whether the built-in excludes apply
    #[must_use]
    pub const fn default_excludes_enabled(&self) -> bool {
        !self.no_default_excludes
    }
}

/// Arguments for the instrument command
#[derive(Parser, Debug)]
pub struct InstrumentArgs {
    /// JavaScript file to instrument
    pub file: PathBuf,

    /// Print the probe table as JSON instead of the instrumented text
    #[arg(long)]
    pub probes: bool,

    /// Global counter table name used by the injected code
    #[arg(long, default_value = "__lazytrace__")]
    pub global_name: String,
}

/// Color argument for CLI
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Parse error policy argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParseErrorArg {
    /// Run the unit uninstrumented
    #[default]
    Passthrough,
    /// Fail the load
    Abort,
}

impl From<ParseErrorArg> for ParseErrorPolicy {
    fn from(arg: ParseErrorArg) -> Self {
        match arg {
            ParseErrorArg::Passthrough => Self::PassThrough,
            ParseErrorArg::Abort => Self::Abort,
        }
    }
}
