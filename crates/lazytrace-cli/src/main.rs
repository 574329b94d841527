//! Lazytrace CLI: run JavaScript programs with load-time tracing
//!
//! ## Usage
//!
//! ```bash
//! lazytrace trace app.js                    # Trace ./app.js, write ./dtrace/lazytrace.dtrace
//! lazytrace trace -x 'gen/**' app.js -- -p 80
//! lazytrace instrument lib/a.js --probes    # Show the probe table of one file
//! ```

use clap::Parser;
use lazytrace_cli::{
    handlers::{execute_instrument, execute_trace, exit_status},
    logging, Cli, CliConfig, CliResult, Commands, Verbosity,
};
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<u8> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    logging::init(&config);

    match cli.command {
        Commands::Trace(args) => execute_trace(&config, &args).map(exit_status),
        Commands::Instrument(args) => {
            print!("{}", execute_instrument(&args)?);
            Ok(0)
        }
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(cli.color.into())
}
