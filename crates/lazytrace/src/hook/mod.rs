//! Loader interception.
//!
//! A [`ModuleHost`] exposes the "load code from path" capability as two
//! interceptor slots (normal module loads and evaluate-in-global-scope). A
//! [`HookRegistration`] installs one [`LoadInterceptor`] (an ordered chain of
//! match/transform stages) into those slots and hands back an
//! [`InstalledHook`] guard that restores the previous interceptors on drop.
//!
//! Reentrancy: a transform may trigger nested loads (through the host),
//! which call back into the same interceptor. `intercept` keeps no scratch
//! state, so nesting is plain call-stack recursion.

mod stages;

pub use stages::InstrumentStage;

use crate::matcher::MatchFn;
use crate::result::{TraceError, TraceResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;
use tracing::{debug, warn};

/// Kind of code-loading event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadKind {
    /// Normal module load (`require`)
    Module,
    /// Text evaluated in global scope (`vm.runInThisContext`)
    RunInContext,
}

/// Rewrites the text of one unit
pub trait Transform {
    /// Transform `source` loaded from `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be transformed.
    fn transform(&self, source: &str, path: &Path) -> TraceResult<String>;
}

/// What to do when a matched unit fails to parse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseErrorPolicy {
    /// Load the unit uninstrumented and continue
    #[default]
    PassThrough,
    /// Fail the load
    Abort,
}

impl FromStr for ParseErrorPolicy {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "passthrough" | "pass-through" => Ok(Self::PassThrough),
            "abort" => Ok(Self::Abort),
            other => Err(TraceError::invalid_state(format!(
                "unknown parse error policy '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ParseErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PassThrough => write!(f, "passthrough"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// Hook options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookOptions {
    /// Verbose per-load logging
    pub verbose: bool,
    /// Also intercept evaluate-in-global-scope loads
    pub run_in_context: bool,
    /// Evict matching cached modules on install
    pub self_test: bool,
    /// Parse error handling
    pub on_parse_error: ParseErrorPolicy,
}

impl HookOptions {
    /// Create default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbose logging
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Enable the evaluate-in-global-scope interception path
    #[must_use]
    pub const fn with_run_in_context(mut self, enabled: bool) -> Self {
        self.run_in_context = enabled;
        self
    }

    /// Enable cache eviction on install
    #[must_use]
    pub const fn with_self_test(mut self, enabled: bool) -> Self {
        self.self_test = enabled;
        self
    }

    /// Set the parse error policy
    #[must_use]
    pub const fn with_parse_error_policy(mut self, policy: ParseErrorPolicy) -> Self {
        self.on_parse_error = policy;
        self
    }
}

/// One `{match, transform}` link of the chain
#[derive(Clone)]
pub struct Stage {
    matcher: MatchFn,
    transform: Rc<dyn Transform>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage").finish_non_exhaustive()
    }
}

impl Stage {
    /// Create a stage
    #[must_use]
    pub fn new(matcher: MatchFn, transform: Rc<dyn Transform>) -> Self {
        Self { matcher, transform }
    }
}

/// Result of intercepting one load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Load the original text unchanged
    Passthrough,
    /// Load this text instead
    Transformed(String),
}

/// Ordered chain of stages run for every load event
#[derive(Debug)]
pub struct LoadInterceptor {
    stages: Vec<Stage>,
    options: HookOptions,
}

impl LoadInterceptor {
    /// Create an interceptor
    #[must_use]
    pub fn new(stages: Vec<Stage>, options: HookOptions) -> Self {
        Self { stages, options }
    }

    /// Options
    #[must_use]
    pub const fn options(&self) -> &HookOptions {
        &self.options
    }

    /// Whether any stage matches `path`
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        self.stages.iter().any(|s| (s.matcher)(path))
    }

    /// Run the chain over one load event
    ///
    /// # Errors
    ///
    /// Returns the stage's error if a transform fails, except parse errors
    /// under [`ParseErrorPolicy::PassThrough`].
    pub fn intercept(&self, kind: LoadKind, path: &Path, source: &str) -> TraceResult<LoadOutcome> {
        let mut text: Option<String> = None;
        for stage in &self.stages {
            if !(stage.matcher)(path) {
                continue;
            }
            let input = text.as_deref().unwrap_or(source);
            match stage.transform.transform(input, path) {
                Ok(out) => text = Some(out),
                Err(e) if e.is_parse() && self.options.on_parse_error == ParseErrorPolicy::PassThrough => {
                    warn!(error = %e, "Loading unit uninstrumented");
                    return Ok(LoadOutcome::Passthrough);
                }
                Err(e) => return Err(e),
            }
        }

        match text {
            Some(out) => {
                debug!(path = %path.display(), ?kind, "Transformed load");
                Ok(LoadOutcome::Transformed(out))
            }
            None => {
                debug!(path = %path.display(), ?kind, "Load not matched");
                Ok(LoadOutcome::Passthrough)
            }
        }
    }
}

/// Host side of the loader: interceptor slots plus the module cache
pub trait ModuleHost {
    /// Replace the interceptor for `kind`, returning the previous one
    fn swap_interceptor(
        &self,
        kind: LoadKind,
        interceptor: Option<Rc<LoadInterceptor>>,
    ) -> Option<Rc<LoadInterceptor>>;

    /// Absolute paths of modules currently cached
    fn cached_modules(&self) -> Vec<PathBuf>;

    /// Drop one module from the cache. Counters already gathered for it
    /// start over when it loads again.
    fn evict_module(&self, path: &Path) -> bool;
}

/// A match predicate, transform chain and options, ready to install
#[derive(Debug, Clone)]
pub struct HookRegistration {
    interceptor: Rc<LoadInterceptor>,
}

impl HookRegistration {
    /// Registration with a single stage
    #[must_use]
    pub fn new(matcher: MatchFn, transform: Rc<dyn Transform>, options: HookOptions) -> Self {
        Self::chain(vec![Stage::new(matcher, transform)], options)
    }

    /// Registration with an ordered chain of stages
    #[must_use]
    pub fn chain(stages: Vec<Stage>, options: HookOptions) -> Self {
        Self {
            interceptor: Rc::new(LoadInterceptor::new(stages, options)),
        }
    }

    /// The interceptor this registration installs
    #[must_use]
    pub fn interceptor(&self) -> &Rc<LoadInterceptor> {
        &self.interceptor
    }

    /// Install into `host`. Installing the same registration twice leaves
    /// the first installation in charge.
    #[must_use = "dropping the guard uninstalls the hook"]
    pub fn install<'h, H: ModuleHost + ?Sized>(&self, host: &'h H) -> InstalledHook<'h, H> {
        let options = self.interceptor.options;

        if options.self_test {
            for path in host.cached_modules() {
                if self.interceptor.matches(&path) && host.evict_module(&path) {
                    debug!(path = %path.display(), "Evicted cached module");
                }
            }
        }

        let mut kinds = vec![LoadKind::Module];
        if options.run_in_context {
            kinds.push(LoadKind::RunInContext);
        }

        let mut previous = Vec::new();
        for kind in kinds {
            let before = host.swap_interceptor(kind, Some(Rc::clone(&self.interceptor)));
            if before
                .as_ref()
                .is_some_and(|b| Rc::ptr_eq(b, &self.interceptor))
            {
                continue;
            }
            previous.push((kind, before));
        }

        InstalledHook { host, previous }
    }
}

/// Installed hook; restores the previous interceptors when dropped
pub struct InstalledHook<'h, H: ModuleHost + ?Sized> {
    host: &'h H,
    previous: Vec<(LoadKind, Option<Rc<LoadInterceptor>>)>,
}

impl<H: ModuleHost + ?Sized> InstalledHook<'_, H> {
    /// Whether this guard owns any slot
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.previous.is_empty()
    }

    /// Uninstall now
    pub fn uninstall(self) {
        drop(self);
    }
}

impl<H: ModuleHost + ?Sized> fmt::Debug for InstalledHook<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstalledHook")
            .field("slots", &self.previous.len())
            .finish_non_exhaustive()
    }
}

impl<H: ModuleHost + ?Sized> Drop for InstalledHook<'_, H> {
    fn drop(&mut self) {
        for (kind, before) in self.previous.drain(..).rev() {
            self.host.swap_interceptor(kind, before);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeHost {
        slots: RefCell<HashMap<LoadKind, Rc<LoadInterceptor>>>,
        cache: RefCell<Vec<PathBuf>>,
    }

    impl ModuleHost for FakeHost {
        fn swap_interceptor(
            &self,
            kind: LoadKind,
            interceptor: Option<Rc<LoadInterceptor>>,
        ) -> Option<Rc<LoadInterceptor>> {
            let mut slots = self.slots.borrow_mut();
            match interceptor {
                Some(i) => slots.insert(kind, i),
                None => slots.remove(&kind),
            }
        }

        fn cached_modules(&self) -> Vec<PathBuf> {
            self.cache.borrow().clone()
        }

        fn evict_module(&self, path: &Path) -> bool {
            let mut cache = self.cache.borrow_mut();
            let before = cache.len();
            cache.retain(|p| p != path);
            cache.len() != before
        }
    }

    fn js_only() -> MatchFn {
        Rc::new(|p: &Path| p.extension().is_some_and(|e| e == "js"))
    }

    fn tagging(tag: &'static str) -> Rc<dyn Transform> {
        Rc::new(move |s: &str, _: &Path| -> TraceResult<String> { Ok(format!("{tag}{s}")) })
    }

    fn failing_parse() -> Rc<dyn Transform> {
        Rc::new(|_: &str, p: &Path| -> TraceResult<String> {
            Err(TraceError::Parse {
                path: p.to_path_buf(),
                line: 1,
                column: 0,
                message: "bad".to_string(),
            })
        })
    }

    #[test]
    fn test_unmatched_load_passes_through() {
        let reg = HookRegistration::new(js_only(), tagging("#"), HookOptions::new());
        let out = reg
            .interceptor()
            .intercept(LoadKind::Module, Path::new("/a.json"), "{}")
            .unwrap();
        assert_eq!(out, LoadOutcome::Passthrough);
    }

    #[test]
    fn test_stages_run_in_order() {
        let reg = HookRegistration::chain(
            vec![
                Stage::new(js_only(), tagging("1")),
                Stage::new(js_only(), tagging("2")),
            ],
            HookOptions::new(),
        );
        let out = reg
            .interceptor()
            .intercept(LoadKind::Module, Path::new("/a.js"), "x")
            .unwrap();
        assert_eq!(out, LoadOutcome::Transformed("21x".to_string()));
    }

    #[test]
    fn test_parse_error_policy() {
        let lenient = HookRegistration::new(js_only(), failing_parse(), HookOptions::new());
        assert_eq!(
            lenient
                .interceptor()
                .intercept(LoadKind::Module, Path::new("/a.js"), "x")
                .unwrap(),
            LoadOutcome::Passthrough
        );

        let strict = HookRegistration::new(
            js_only(),
            failing_parse(),
            HookOptions::new().with_parse_error_policy(ParseErrorPolicy::Abort),
        );
        let err = strict
            .interceptor()
            .intercept(LoadKind::Module, Path::new("/a.js"), "x")
            .unwrap_err();
        assert!(err.is_parse());
    }

    #[test]
    fn test_install_and_uninstall_restore_exactly() {
        let host = FakeHost::default();
        let outer = HookRegistration::new(js_only(), tagging("o"), HookOptions::new());
        let inner = HookRegistration::new(
            js_only(),
            tagging("i"),
            HookOptions::new().with_run_in_context(true),
        );

        let outer_guard = outer.install(&host);
        {
            let inner_guard = inner.install(&host);
            assert!(inner_guard.is_active());
            let slots = host.slots.borrow();
            assert!(Rc::ptr_eq(&slots[&LoadKind::Module], inner.interceptor()));
            assert!(slots.contains_key(&LoadKind::RunInContext));
        }
        {
            let slots = host.slots.borrow();
            assert!(Rc::ptr_eq(&slots[&LoadKind::Module], outer.interceptor()));
            assert!(!slots.contains_key(&LoadKind::RunInContext));
        }
        outer_guard.uninstall();
        assert!(host.slots.borrow().is_empty());
    }

    #[test]
    fn test_install_is_idempotent() {
        let host = FakeHost::default();
        let reg = HookRegistration::new(js_only(), tagging("t"), HookOptions::new());
        let first = reg.install(&host);
        let second = reg.install(&host);
        assert!(!second.is_active());
        drop(second);
        assert!(host.slots.borrow().contains_key(&LoadKind::Module));
        drop(first);
        assert!(host.slots.borrow().is_empty());
    }

    #[test]
    fn test_self_test_evicts_only_matching_modules() {
        let host = FakeHost::default();
        host.cache
            .borrow_mut()
            .extend([PathBuf::from("/a.js"), PathBuf::from("/data.json")]);
        let reg = HookRegistration::new(
            js_only(),
            tagging("t"),
            HookOptions::new().with_self_test(true),
        );
        let _guard = reg.install(&host);
        assert_eq!(host.cached_modules(), vec![PathBuf::from("/data.json")]);
    }

    #[test]
    fn test_policy_parses() {
        assert_eq!("abort".parse::<ParseErrorPolicy>().unwrap(), ParseErrorPolicy::Abort);
        assert_eq!(
            "passthrough".parse::<ParseErrorPolicy>().unwrap(),
            ParseErrorPolicy::PassThrough
        );
        assert!("explode".parse::<ParseErrorPolicy>().is_err());
    }
}
