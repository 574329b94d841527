//! Instrument command handler

use crate::error::CliResult;
use crate::InstrumentArgs;
use lazytrace::runtime::resolve::absolutize;
use lazytrace::{InstrumentConfig, Instrumenter};
use std::fs;

/// Instrument one file and return what should be printed
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn execute_instrument(args: &InstrumentArgs) -> CliResult<String> {
    let path = absolutize(&args.file)?;
    let source = fs::read_to_string(&path)?;
    let instrumenter = Instrumenter::new(InstrumentConfig::new(args.global_name.clone()));
    let unit = instrumenter.instrument(&source, &path)?;

    if args.probes {
        Ok(serde_json::to_string_pretty(&unit.probe_table).map_err(lazytrace::TraceError::from)?)
    } else {
        Ok(unit.instrumented_text)
    }
}
