//! Lazytrace: load-time branch and statement tracing for JavaScript
//!
//! Source files are instrumented as they are loaded, never ahead of time.
//! Every file that passes the [`Matcher`] is rewritten by the
//! [`Instrumenter`] so that each statement, branch arm, function entry and
//! short-circuit operand bumps a counter. At exit the counters are written
//! once to `<dir>/lazytrace.dtrace`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ TraceSession │──►│ LoadHook     │──►│ Instrumenter │──►│ ScriptHost   │
//! │ (one run)    │   │ (match+xform)│   │ (tree-sitter)│   │ (Boa engine) │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                                                 │ exit
//!                          ┌──────────────┐   ┌──────────────┐    │
//!                          │ .dtrace file │◄──│ ExitFlusher  │◄───┘
//!                          └──────────────┘   └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lazytrace::{SessionConfig, TraceSession};
//!
//! let outcome = TraceSession::new(SessionConfig::new("app.js")).run()?;
//! std::process::exit(outcome.exit_code);
//! # Ok::<(), lazytrace::TraceError>(())
//! ```

#![warn(missing_docs)]

pub mod flush;
pub mod hook;
pub mod instrument;
pub mod matcher;
pub mod probe;
mod result;
pub mod runtime;
pub mod session;
pub mod trace;

pub use flush::{ExitFlusher, ExitHandler, ExitLifecycle, FlushOutcome, TRACE_FILE_NAME};
pub use hook::{
    HookOptions, HookRegistration, InstalledHook, InstrumentStage, LoadInterceptor, LoadKind,
    LoadOutcome, ModuleHost, ParseErrorPolicy, Transform,
};
pub use instrument::{InstrumentConfig, Instrumenter, SourceUnit};
pub use matcher::{Matcher, MatcherConfig};
pub use probe::{Probe, ProbeId, ProbeKind, ProbeTable, SourceLocation};
pub use result::{TraceError, TraceResult};
pub use runtime::ScriptHost;
pub use session::{RunOutcome, SessionConfig, TraceSession, ENV_MARKER, TOOL_NAME};
pub use trace::{TraceContext, TraceStore};
