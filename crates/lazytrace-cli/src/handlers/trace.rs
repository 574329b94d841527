//! Trace command handler

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::TraceArgs;
use lazytrace::{HookOptions, MatcherConfig, SessionConfig, TraceSession};
use tracing::debug;

/// Build the session configuration from command-line arguments
///
/// # Errors
///
/// Returns [`CliError::Usage`] for an empty target or pattern.
pub fn session_config(config: &CliConfig, args: &TraceArgs) -> CliResult<SessionConfig> {
    if args.target.trim().is_empty() {
        return Err(CliError::usage("target must not be empty"));
    }
    if let Some(empty) = args.includes.iter().chain(&args.excludes).find(|p| p.is_empty()) {
        return Err(CliError::usage(format!("empty match pattern '{empty}'")));
    }

    let mut matcher = MatcherConfig::new(&args.root)
        .with_excludes(args.excludes.iter().cloned())
        .with_default_excludes(args.default_excludes_enabled());
    for include in &args.includes {
        matcher = matcher.with_include(include.clone());
    }

    let hook = HookOptions::new()
        .with_verbose(config.verbosity.is_verbose())
        .with_run_in_context(args.hook_run_in_context)
        .with_self_test(args.self_test)
        .with_parse_error_policy(args.on_parse_error.into());

    let mut session = SessionConfig::new(args.target.clone())
        .with_args(args.args.iter().cloned())
        .with_matcher(matcher)
        .with_report_dir(&args.dir)
        .with_hook_options(hook);
    if let Some(hook) = &args.post_require_hook {
        session = session.with_post_require_hook(hook.clone());
    }
    Ok(session)
}

/// Execute the trace command and return the target's exit code
///
/// # Errors
///
/// Returns an error if the arguments are invalid or the target cannot be
/// resolved. A failed trace write is logged and does not change the exit
/// code.
pub fn execute_trace(config: &CliConfig, args: &TraceArgs) -> CliResult<i32> {
    let session = TraceSession::new(session_config(config, args)?);
    let outcome = session.run().map_err(CliError::classify)?;
    debug!(exit_code = outcome.exit_code, "Target finished");
    Ok(outcome.exit_code)
}

/// Map a script exit code onto a process exit status
#[must_use]
pub const fn exit_status(code: i32) -> u8 {
    (code & 0xff) as u8
}
