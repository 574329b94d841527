//! Embedded JavaScript host.
//!
//! [`ScriptHost`] runs CommonJS programs on the Boa engine and implements
//! both [`ModuleHost`] (interceptor slots, module cache) and
//! [`ExitLifecycle`] (synchronous exit handlers).
//!
//! Lifecycle of [`ScriptHost::run_main`]:
//!
//! 1. load and run the main module
//! 2. drain pending jobs (skipped after `process.exit`), then report the
//!    first unhandled rejection
//! 3. emit script `exit` listeners
//! 4. harvest counter tables into bound trace contexts
//! 5. run Rust exit handlers, in registration order
//!
//! Exit code: `process.exit(n)` gives `n`, an uncaught exception or a
//! promise rejection still unhandled after the job queue drains gives `1`,
//! otherwise `process.exitCode` or `0`.

mod natives;
pub mod resolve;

use crate::flush::{ExitHandler, ExitLifecycle};
use crate::hook::{LoadInterceptor, LoadKind, LoadOutcome, ModuleHost};
use crate::instrument::unit_key;
use crate::result::{TraceError, TraceResult};
use crate::trace::TraceContext;
use boa_engine::builtins::promise::{OperationType, PromiseState};
use boa_engine::object::builtins::JsPromise;
use boa_engine::{js_string, Context, JsError, JsObject, JsString, JsValue, Source};
use natives::{ActiveHost, REJECTION_TRACKER};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, warn};

const PRELUDE: &str = include_str!("prelude.js");

/// State shared between the host and its native functions
pub(crate) struct HostShared {
    interceptors: RefCell<HashMap<LoadKind, Rc<LoadInterceptor>>>,
    exit_handlers: RefCell<Vec<ExitHandler>>,
    traces: RefCell<Vec<TraceContext>>,
    exit_request: Cell<Option<i32>>,
    rejections: RefCell<Vec<JsObject>>,
    captured: RefCell<Option<String>>,
    cwd: PathBuf,
}

impl HostShared {
    fn interceptor(&self, kind: LoadKind) -> Option<Rc<LoadInterceptor>> {
        self.interceptors.borrow().get(&kind).cloned()
    }

    // The slot is cloned out first: a transform may re-enter the host.
    pub(crate) fn intercept(
        &self,
        kind: LoadKind,
        path: &Path,
        source: &str,
    ) -> TraceResult<LoadOutcome> {
        match self.interceptor(kind) {
            Some(interceptor) => interceptor.intercept(kind, path, source),
            None => Ok(LoadOutcome::Passthrough),
        }
    }

    pub(crate) fn matches(&self, path: &Path) -> bool {
        self.interceptor(LoadKind::Module)
            .is_some_and(|i| i.matches(path))
    }

    pub(crate) fn request_exit(&self, code: i32) {
        self.exit_request.set(Some(code));
    }

    pub(crate) fn track_rejection(&self, promise: &JsObject, operation: OperationType) {
        let mut pending = self.rejections.borrow_mut();
        match operation {
            OperationType::Reject => pending.push(promise.clone()),
            OperationType::Handle => pending.retain(|p| !JsObject::equals(p, promise)),
        }
    }

    pub(crate) fn write(&self, to_stderr: bool, text: &str) {
        if let Some(buffer) = self.captured.borrow_mut().as_mut() {
            buffer.push_str(text);
            buffer.push('\n');
            return;
        }
        if to_stderr {
            let _ = writeln!(std::io::stderr(), "{text}");
        } else {
            let _ = writeln!(std::io::stdout(), "{text}");
        }
    }

    pub(crate) fn cwd(&self) -> &Path {
        &self.cwd
    }
}

/// CommonJS host on an embedded Boa engine
pub struct ScriptHost {
    context: RefCell<Context>,
    shared: Rc<HostShared>,
}

impl std::fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHost")
            .field("cwd", &self.shared.cwd)
            .finish_non_exhaustive()
    }
}

impl ScriptHost {
    /// Create a host resolving relative names against the working directory
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory is unavailable or the
    /// prelude fails to evaluate.
    pub fn new() -> TraceResult<Self> {
        Self::with_cwd(std::env::current_dir()?)
    }

    /// Create a host with an explicit working directory
    ///
    /// # Errors
    ///
    /// Returns an error if the prelude fails to evaluate.
    pub fn with_cwd(cwd: impl Into<PathBuf>) -> TraceResult<Self> {
        let shared = Rc::new(HostShared {
            interceptors: RefCell::new(HashMap::new()),
            exit_handlers: RefCell::new(Vec::new()),
            traces: RefCell::new(Vec::new()),
            exit_request: Cell::new(None),
            rejections: RefCell::new(Vec::new()),
            captured: RefCell::new(None),
            cwd: cwd.into(),
        });

        let mut context = Context::builder()
            .host_hooks(&REJECTION_TRACKER)
            .build()
            .map_err(|e| TraceError::script(e.to_string()))?;
        let _active = ActiveHost::enter(&shared);
        natives::register(&mut context).map_err(|e| script_error(&e, &mut context))?;
        context
            .eval(Source::from_bytes(PRELUDE.as_bytes()))
            .map_err(|e| script_error(&e, &mut context))?;

        Ok(Self {
            context: RefCell::new(context),
            shared,
        })
    }

    /// Collect console output in memory instead of writing it out
    #[must_use]
    pub fn with_captured_output(self) -> Self {
        *self.shared.captured.borrow_mut() = Some(String::new());
        self
    }

    /// Console output captured so far
    #[must_use]
    pub fn captured_output(&self) -> String {
        self.shared.captured.borrow().clone().unwrap_or_default()
    }

    /// Harvest counters for `trace` at exit
    pub fn bind_trace(&self, trace: &TraceContext) {
        self.shared.traces.borrow_mut().push(trace.clone());
    }

    /// Set a variable in the program's `process.env`
    ///
    /// # Errors
    ///
    /// Returns an error if the host is running or the assignment throws.
    pub fn set_env(&self, key: &str, value: &str) -> TraceResult<()> {
        let code = format!(
            "process.env[{}] = {};",
            serde_json::to_string(key)?,
            serde_json::to_string(value)?
        );
        self.evaluate(&code).map(|_| ())
    }

    /// Stop harvesting counters for `trace`
    pub fn unbind_trace(&self, trace: &TraceContext) {
        self.shared
            .traces
            .borrow_mut()
            .retain(|t| t.global_name() != trace.global_name());
    }

    fn enter(&self) -> TraceResult<(ActiveHost, std::cell::RefMut<'_, Context>)> {
        let context = self
            .context
            .try_borrow_mut()
            .map_err(|_| TraceError::invalid_state("script host is already running"))?;
        Ok((ActiveHost::enter(&self.shared), context))
    }

    /// Load a post-require hook module and compose it after the transform
    /// chain. The module exports `function (match, transform, verbose)`
    /// returning `function (code, filename)`.
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Script`] if the module fails to load or does
    /// not have that shape.
    pub fn install_post_require_hook(&self, path: &Path, verbose: bool) -> TraceResult<()> {
        let (_active, mut context) = self.enter()?;
        let install = host_function(&mut context, "installPostHook")?;
        install
            .call(
                &JsValue::undefined(),
                &[path_value(path), JsValue::from(verbose)],
                &mut context,
            )
            .map_err(|e| script_error(&e, &mut context))?;
        debug!(path = %path.display(), "Post-require hook installed");
        Ok(())
    }

    /// Evaluate `code` in global scope and return its value as JSON
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Script`] if evaluation throws.
    pub fn evaluate(&self, code: &str) -> TraceResult<serde_json::Value> {
        let (_active, mut context) = self.enter()?;
        let value = context
            .eval(Source::from_bytes(code.as_bytes()))
            .map_err(|e| script_error(&e, &mut context))?;
        if value.is_undefined() {
            return Ok(serde_json::Value::Null);
        }
        value
            .to_json(&mut context)
            .map_err(|e| script_error(&e, &mut context))
    }

    /// Run `main` as the main module and go through the exit lifecycle
    ///
    /// # Errors
    ///
    /// Returns an error only for host failures; exceptions thrown by the
    /// program become exit code `1`.
    pub fn run_main(&self, main: &Path, argv: &[String]) -> TraceResult<i32> {
        let code = {
            let (_active, mut context) = self.enter()?;
            self.shared.exit_request.set(None);
            self.shared.rejections.borrow_mut().clear();

            let run = host_function(&mut context, "runMain")?;
            let argv = JsValue::from_json(&serde_json::json!(argv), &mut context)
                .map_err(|e| script_error(&e, &mut context))?;
            let mut code = match run.call(&JsValue::undefined(), &[path_value(main), argv], &mut context) {
                Ok(_) => None,
                Err(e) => Some(self.settle(&e, &mut context)),
            };

            if code.is_none() {
                context.run_jobs();
                code = self.shared.exit_request.take();
            }
            if code.is_none() {
                code = self.unhandled_rejection(&mut context);
            }
            let code = match code {
                Some(code) => code,
                None => self.script_exit_code(&mut context)?,
            };
            let code = self.emit_exit(code, &mut context)?;
            self.harvest(&mut context);
            code
        };

        let handlers: Vec<ExitHandler> = self.shared.exit_handlers.borrow_mut().drain(..).collect();
        for handler in handlers {
            handler(code);
        }
        Ok(code)
    }

    fn settle(&self, err: &JsError, context: &mut Context) -> i32 {
        if let Some(code) = self.shared.exit_request.take() {
            return code;
        }
        let shown = err
            .to_opaque(context)
            .to_string(context)
            .map_or_else(|_| err.to_string(), |s| s.to_std_string_escaped());
        self.shared.write(true, &format!("Uncaught {shown}"));
        1
    }

    /// Report the first promise that is still rejected with no handler
    fn unhandled_rejection(&self, context: &mut Context) -> Option<i32> {
        let pending: Vec<JsObject> = self.shared.rejections.borrow_mut().drain(..).collect();
        let reason = pending.into_iter().find_map(|promise| {
            match JsPromise::from_object(promise).ok()?.state() {
                PromiseState::Rejected(reason) => Some(reason),
                _ => None,
            }
        })?;
        let shown = reason
            .to_string(context)
            .map_or_else(|_| reason.display().to_string(), |s| s.to_std_string_escaped());
        self.shared.write(true, &format!("Uncaught (in promise) {shown}"));
        Some(1)
    }

    fn script_exit_code(&self, context: &mut Context) -> TraceResult<i32> {
        let exit_code = host_function(context, "exitCode")?;
        let value = exit_code
            .call(&JsValue::undefined(), &[], context)
            .map_err(|e| script_error(&e, context))?;
        value.to_i32(context).map_err(|e| script_error(&e, context))
    }

    fn emit_exit(&self, code: i32, context: &mut Context) -> TraceResult<i32> {
        let emit = host_function(context, "emitExit")?;
        match emit.call(&JsValue::undefined(), &[JsValue::from(code)], context) {
            Ok(_) => Ok(code),
            Err(e) => Ok(self.settle(&e, context)),
        }
    }

    /// Copy every bound trace's counter table out of the engine
    fn harvest(&self, context: &mut Context) {
        for trace in self.shared.traces.borrow().iter() {
            let name = JsString::from(trace.global_name());
            let global = context.global_object();
            let table = match global.get(name, context) {
                Ok(value) if value.is_object() => value,
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "Cannot read counter table");
                    continue;
                }
            };
            match table.to_json(context) {
                Ok(json) => trace.absorb_counts(counts_from_json(&json)),
                Err(e) => warn!(error = %e, "Cannot convert counter table"),
            }
        }
    }
}

impl ModuleHost for ScriptHost {
    fn swap_interceptor(
        &self,
        kind: LoadKind,
        interceptor: Option<Rc<LoadInterceptor>>,
    ) -> Option<Rc<LoadInterceptor>> {
        let mut slots = self.shared.interceptors.borrow_mut();
        match interceptor {
            Some(interceptor) => slots.insert(kind, interceptor),
            None => slots.remove(&kind),
        }
    }

    fn cached_modules(&self) -> Vec<PathBuf> {
        match self.evaluate("__lazytrace_host__.cachedPaths()") {
            Ok(serde_json::Value::Array(paths)) => paths
                .into_iter()
                .filter_map(|p| p.as_str().map(PathBuf::from))
                .collect(),
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Cannot list cached modules");
                Vec::new()
            }
        }
    }

    fn evict_module(&self, path: &Path) -> bool {
        let Ok((_active, mut context)) = self.enter() else {
            return false;
        };
        let Ok(evict) = host_function(&mut context, "evict") else {
            return false;
        };
        let traces = self.shared.traces.borrow().clone();
        let names: Vec<&str> = traces.iter().map(TraceContext::global_name).collect();
        let Ok(tables) = JsValue::from_json(&serde_json::json!(names), &mut context) else {
            return false;
        };
        let evicted = evict
            .call(&JsValue::undefined(), &[path_value(path), tables], &mut context)
            .is_ok_and(|v| v.to_boolean());
        if evicted {
            let key = unit_key(path);
            for trace in &traces {
                trace.reset_unit(&key);
            }
        }
        evicted
    }
}

impl ExitLifecycle for ScriptHost {
    fn on_exit(&self, handler: ExitHandler) {
        self.shared.exit_handlers.borrow_mut().push(handler);
    }
}

fn host_function(context: &mut Context, name: &str) -> TraceResult<JsObject> {
    let global = context.global_object();
    let host = global
        .get(js_string!("__lazytrace_host__"), context)
        .map_err(|e| script_error(&e, context))?;
    let function = host
        .as_object()
        .map(|o| o.get(JsString::from(name), context))
        .transpose()
        .map_err(|e| script_error(&e, context))?;
    function
        .as_ref()
        .and_then(JsValue::as_callable)
        .cloned()
        .ok_or_else(|| TraceError::script(format!("host function '{name}' is missing")))
}

fn path_value(path: &Path) -> JsValue {
    JsValue::from(JsString::from(path.to_string_lossy().as_ref()))
}

fn script_error(err: &JsError, context: &mut Context) -> TraceError {
    let message = err
        .to_opaque(context)
        .to_string(context)
        .map_or_else(|_| err.to_string(), |s| s.to_std_string_escaped());
    TraceError::script(message)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn counts_from_json(json: &serde_json::Value) -> BTreeMap<String, Vec<u64>> {
    let Some(units) = json.as_object() else {
        return BTreeMap::new();
    };
    units
        .iter()
        .filter_map(|(path, counters)| {
            let counters = counters
                .as_array()?
                .iter()
                .map(|n| n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)).unwrap_or(0))
                .collect();
            Some((path.clone(), counters))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests;
