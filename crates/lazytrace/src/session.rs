//! Run a program with load-time tracing.
//!
//! [`TraceSession`] wires everything together for one run: matcher, trace
//! context, instrument stage, optional post-require hook, loader hook and
//! exit flusher. The program's exit code is reported unchanged; a failed
//! trace write shows up only in [`RunOutcome::flush`].
//!
//! The nesting marker is read from the process environment and set in the
//! traced program's `process.env`. The process environment itself is left
//! alone so concurrent sessions in one process do not see each other.

use crate::flush::{ExitFlusher, FlushOutcome, DEFAULT_REPORT_DIR};
use crate::hook::{HookOptions, HookRegistration, InstrumentStage};
use crate::matcher::{Matcher, MatcherConfig};
use crate::result::TraceResult;
use crate::runtime::resolve::{normalize, resolve_hook_module, resolve_target};
use crate::runtime::ScriptHost;
use crate::trace::TraceContext;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Name used for the artifact, the marker variable and `argv[0]`
pub const TOOL_NAME: &str = "lazytrace";

/// Environment variable set while a traced program runs
pub const ENV_MARKER: &str = "LAZYTRACE_RUNNING";

/// Whether this process already runs under lazytrace
#[must_use]
pub fn is_nested() -> bool {
    std::env::var(ENV_MARKER).is_ok_and(|v| v == "1")
}

/// Configuration of one traced run
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Script path or command name
    pub target: String,
    /// Arguments passed to the target
    pub args: Vec<String>,
    /// Which files to instrument
    pub matcher: MatcherConfig,
    /// Where `lazytrace.dtrace` goes
    pub report_dir: PathBuf,
    /// Loader hook options
    pub hook: HookOptions,
    /// File or package name of a post-require hook
    pub post_require_hook: Option<String>,
    /// Working directory (defaults to the process's)
    pub cwd: Option<PathBuf>,
}

impl SessionConfig {
    /// Configuration tracing `target` with default settings
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            args: Vec::new(),
            matcher: MatcherConfig::default(),
            report_dir: PathBuf::from(DEFAULT_REPORT_DIR),
            hook: HookOptions::default(),
            post_require_hook: None,
            cwd: None,
        }
    }

    /// Set target arguments
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the matcher configuration
    #[must_use]
    pub fn with_matcher(mut self, matcher: MatcherConfig) -> Self {
        self.matcher = matcher;
        self
    }

    /// Set the report directory
    #[must_use]
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    /// Set hook options
    #[must_use]
    pub const fn with_hook_options(mut self, options: HookOptions) -> Self {
        self.hook = options;
        self
    }

    /// Compose a post-require hook after instrumentation
    #[must_use]
    pub fn with_post_require_hook(mut self, hook: impl Into<String>) -> Self {
        self.post_require_hook = Some(hook.into());
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// What a traced run produced
#[derive(Debug)]
pub struct RunOutcome {
    /// The program's own exit code
    pub exit_code: i32,
    /// Result of the exit-time flush; `None` when tracing was disabled
    pub flush: Option<TraceResult<FlushOutcome>>,
    /// The run's trace context; `None` when tracing was disabled
    pub trace: Option<TraceContext>,
}

/// One run of a program under tracing
#[derive(Debug, Clone)]
pub struct TraceSession {
    config: SessionConfig,
}

impl TraceSession {
    /// Create a session
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Session configuration
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn cwd(&self) -> TraceResult<PathBuf> {
        match &self.config.cwd {
            Some(cwd) => Ok(normalize(cwd)),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Resolve the target to an absolute script path
    ///
    /// # Errors
    ///
    /// Returns [`crate::TraceError::Resolution`] if the target cannot be
    /// found.
    pub fn resolve_target(&self) -> TraceResult<PathBuf> {
        resolve_target(&self.config.target, &self.cwd()?)
    }

    /// Run the target in a fresh script host
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot be resolved, the matcher cannot
    /// be built, or the host fails. Program failures are exit codes.
    pub fn run(&self) -> TraceResult<RunOutcome> {
        let target = self.resolve_target()?;
        let host = ScriptHost::with_cwd(self.cwd()?)?;
        self.run_in(&host, &target)
    }

    /// Run the target in an existing host (modules it already loaded stay
    /// cached unless self-test eviction is enabled)
    ///
    /// # Errors
    ///
    /// See [`TraceSession::run`].
    pub fn run_in(&self, host: &ScriptHost, target: &Path) -> TraceResult<RunOutcome> {
        let cwd = self.cwd()?;
        let options = self.config.hook;
        let mut argv = vec![TOOL_NAME.to_string(), target.to_string_lossy().into_owned()];
        argv.extend(self.config.args.iter().cloned());
        if options.verbose {
            info!(argv = %argv.join(" "), "Running");
        }

        if is_nested() {
            warn!("Already running under {TOOL_NAME}; running without tracing");
            let exit_code = host.run_main(target, &argv)?;
            return Ok(RunOutcome {
                exit_code,
                flush: None,
                trace: None,
            });
        }
        host.set_env(ENV_MARKER, "1")?;

        let mut matcher_config = self.config.matcher.clone();
        matcher_config.root = normalize(&cwd.join(&matcher_config.root));
        let matcher = Matcher::build(&matcher_config)?;
        debug!(root = %matcher.root().display(), "Matcher ready");

        let trace = TraceContext::new();
        let flusher = ExitFlusher::new(trace.clone(), normalize(&cwd.join(&self.config.report_dir)));
        if let Err(e) = flusher.ensure_dir() {
            warn!(error = %e, "Cannot create report directory yet");
        }

        if let Some(request) = &self.config.post_require_hook {
            match resolve_hook_module(request, &cwd) {
                Ok(path) => {
                    if options.verbose {
                        info!(hook = %path.display(), "Using post-require hook");
                    }
                    host.install_post_require_hook(&path, options.verbose)?;
                }
                Err(e) => warn!(hook = %request, error = %e, "Continuing without post-require hook"),
            }
        }

        host.bind_trace(&trace);
        let stage = InstrumentStage::for_context(&trace);
        let registration = HookRegistration::new(matcher.into_predicate(), Rc::new(stage), options);
        let guard = registration.install(host);
        flusher.register(host);

        let result = host.run_main(target, &argv);
        drop(guard);
        host.unbind_trace(&trace);
        let exit_code = result?;

        Ok(RunOutcome {
            exit_code,
            flush: flusher.take_outcome(),
            trace: Some(trace),
        })
    }
}
