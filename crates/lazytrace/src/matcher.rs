//! Path matcher deciding which loaded files are instrumented.
//!
//! Patterns are globs evaluated against the path relative to the match root,
//! with `/` as a literal separator. Exclude patterns win over includes, and
//! nothing outside the root ever matches.

use crate::result::{TraceError, TraceResult};
use crate::runtime::resolve::absolutize;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Excludes applied unless turned off
pub const DEFAULT_EXCLUDES: &[&str] = &["**/node_modules/**", "**/test/**", "**/tests/**"];

/// Include pattern used when none is given
pub const DEFAULT_INCLUDE: &str = "**/*.js";

/// Synchronous match predicate consumed by the loader hook
pub type MatchFn = Rc<dyn Fn(&Path) -> bool>;

/// Matcher construction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherConfig {
    /// Match root
    pub root: PathBuf,
    /// Ordered include patterns
    pub includes: Vec<String>,
    /// Ordered exclude patterns
    pub excludes: Vec<String>,
    /// Whether [`DEFAULT_EXCLUDES`] apply
    pub default_excludes: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            includes: Vec::new(),
            excludes: Vec::new(),
            default_excludes: true,
        }
    }
}

impl MatcherConfig {
    /// Create a configuration rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Add an include pattern
    #[must_use]
    pub fn with_include(mut self, pattern: impl Into<String>) -> Self {
        self.includes.push(pattern.into());
        self
    }

    /// Add an exclude pattern
    #[must_use]
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    /// Add several exclude patterns
    #[must_use]
    pub fn with_excludes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excludes.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Toggle the built-in excludes
    #[must_use]
    pub const fn with_default_excludes(mut self, enabled: bool) -> Self {
        self.default_excludes = enabled;
        self
    }
}

/// Compiled matcher
#[derive(Debug, Clone)]
pub struct Matcher {
    root: PathBuf,
    includes: GlobSet,
    excludes: GlobSet,
}

impl Matcher {
    /// Compile a matcher
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Pattern`] for an invalid glob, or an I/O error
    /// when a relative root cannot be made absolute.
    pub fn build(config: &MatcherConfig) -> TraceResult<Self> {
        let root = absolutize(&config.root)?;

        let includes: Vec<&str> = if config.includes.is_empty() {
            vec![DEFAULT_INCLUDE]
        } else {
            config.includes.iter().map(String::as_str).collect()
        };
        let mut excludes: Vec<&str> = config.excludes.iter().map(String::as_str).collect();
        if config.default_excludes {
            excludes.extend_from_slice(DEFAULT_EXCLUDES);
        }

        Ok(Self {
            root,
            includes: compile(&includes)?,
            excludes: compile(&excludes)?,
        })
    }

    /// Match root (absolute)
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` should be instrumented
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        self.includes.is_match(relative) && !self.excludes.is_match(relative)
    }

    /// Turn the matcher into the predicate the hook consumes
    #[must_use]
    pub fn into_predicate(self) -> MatchFn {
        Rc::new(move |path: &Path| self.matches(path))
    }
}

fn compile(patterns: &[&str]) -> TraceResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| TraceError::Pattern {
                pattern: (*pattern).to_string(),
                message: e.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| TraceError::Pattern {
        pattern: patterns.join(", "),
        message: e.to_string(),
    })
}
