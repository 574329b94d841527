//! Native functions backing the prelude.
//!
//! Native functions are plain `fn` pointers, so they reach the host through
//! a thread-local stack of active hosts. [`ActiveHost::enter`] pushes a host
//! for the duration of every call into the engine.
//!
//! Natives never evaluate code themselves; the prelude compiles module text
//! with an indirect `eval` so the engine only runs code from script frames.

use super::resolve;
use super::HostShared;
use crate::hook::{LoadKind, LoadOutcome};
use crate::result::TraceError;
use boa_engine::builtins::promise::OperationType;
use boa_engine::context::HostHooks;
use boa_engine::{
    js_string, Context, JsArgs, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

thread_local! {
    static ACTIVE: RefCell<Vec<Rc<HostShared>>> = const { RefCell::new(Vec::new()) };
}

/// Marks a host as the target of native calls until dropped
pub(super) struct ActiveHost;

impl ActiveHost {
    pub(super) fn enter(shared: &Rc<HostShared>) -> Self {
        ACTIVE.with(|stack| stack.borrow_mut().push(Rc::clone(shared)));
        Self
    }
}

impl Drop for ActiveHost {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Engine hooks reporting promise rejections to the active host
pub(super) struct RejectionTracker;

pub(super) static REJECTION_TRACKER: RejectionTracker = RejectionTracker;

impl HostHooks for RejectionTracker {
    fn promise_rejection_tracker(
        &self,
        promise: &JsObject,
        operation: OperationType,
        _context: &mut Context,
    ) {
        if let Ok(shared) = active() {
            shared.track_rejection(promise, operation);
        }
    }
}

fn active() -> JsResult<Rc<HostShared>> {
    ACTIVE
        .with(|stack| stack.borrow().last().cloned())
        .ok_or_else(|| JsNativeError::error().with_message("no active script host").into())
}

fn string_arg(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    Ok(args
        .get_or_undefined(index)
        .to_string(context)?
        .to_std_string_escaped())
}

fn js_str(text: &str) -> JsValue {
    JsValue::from(JsString::from(text))
}

pub(super) fn to_js_error(err: &TraceError) -> JsError {
    let native = match err {
        TraceError::Parse { .. } => JsNativeError::syntax(),
        _ => JsNativeError::error(),
    };
    native.with_message(err.to_string()).into()
}

/// Register every `__lazytrace_*` native on the global object
pub(super) fn register(context: &mut Context) -> JsResult<()> {
    let natives: [(JsString, usize, NativeFunction); 8] = [
        (js_string!("__lazytrace_resolve"), 2, NativeFunction::from_fn_ptr(resolve_fn)),
        (js_string!("__lazytrace_read"), 1, NativeFunction::from_fn_ptr(read_fn)),
        (js_string!("__lazytrace_intercept"), 3, NativeFunction::from_fn_ptr(intercept_fn)),
        (js_string!("__lazytrace_match"), 1, NativeFunction::from_fn_ptr(match_fn)),
        (js_string!("__lazytrace_exit"), 1, NativeFunction::from_fn_ptr(exit_fn)),
        (js_string!("__lazytrace_print"), 2, NativeFunction::from_fn_ptr(print_fn)),
        (js_string!("__lazytrace_env"), 0, NativeFunction::from_fn_ptr(env_fn)),
        (js_string!("__lazytrace_cwd"), 0, NativeFunction::from_fn_ptr(cwd_fn)),
    ];
    for (name, length, function) in natives {
        context.register_global_builtin_callable(name, length, function)?;
    }
    Ok(())
}

fn resolve_fn(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let request = string_arg(args, 0, context)?;
    let from = string_arg(args, 1, context)?;
    let path = resolve::resolve_request(&request, Path::new(&from)).map_err(|e| to_js_error(&e))?;
    Ok(js_str(&path.to_string_lossy()))
}

fn read_fn(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let path = string_arg(args, 0, context)?;
    let text = fs::read_to_string(&path).map_err(|e| {
        JsNativeError::error().with_message(format!("Cannot read {path}: {e}"))
    })?;
    Ok(js_str(&text))
}

/// Run the installed interceptor; `null` means load the text unchanged.
fn intercept_fn(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let code = string_arg(args, 0, context)?;
    let filename = string_arg(args, 1, context)?;
    let kind = match string_arg(args, 2, context)?.as_str() {
        "context" => LoadKind::RunInContext,
        _ => LoadKind::Module,
    };
    let shared = active()?;
    match shared.intercept(kind, Path::new(&filename), &code) {
        Ok(LoadOutcome::Transformed(text)) => Ok(js_str(&text)),
        Ok(LoadOutcome::Passthrough) => Ok(JsValue::null()),
        Err(e) => Err(to_js_error(&e)),
    }
}

fn match_fn(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let filename = string_arg(args, 0, context)?;
    Ok(JsValue::from(active()?.matches(Path::new(&filename))))
}

// Unwinds with an uncatchable error so user `try`/`catch` cannot swallow
// the exit.
fn exit_fn(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let code = args.get_or_undefined(0).to_i32(context)?;
    active()?.request_exit(code);
    Err(JsNativeError::runtime_limit()
        .with_message(format!("process.exit({code})"))
        .into())
}

fn print_fn(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let fd = args.get_or_undefined(0).to_i32(context)?;
    let text = string_arg(args, 1, context)?;
    active()?.write(fd == 2, &text);
    Ok(JsValue::undefined())
}

fn env_fn(_: &JsValue, _: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let vars: serde_json::Map<String, serde_json::Value> = std::env::vars()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();
    JsValue::from_json(&serde_json::Value::Object(vars), context)
}

fn cwd_fn(_: &JsValue, _: &[JsValue], _: &mut Context) -> JsResult<JsValue> {
    let shared = active()?;
    Ok(js_str(&shared.cwd().to_string_lossy()))
}
