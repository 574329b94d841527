//! Load-time JavaScript instrumentation.
//!
//! The [`Instrumenter`] parses one source unit with tree-sitter, numbers every
//! trackable point in pre-order and splices counter increments into a copy of
//! the text. It is a pure function of `(source, path)`: same input, same
//! output, same probe IDs.
//!
//! ```text
//! var U = <bind counter array for PATH>;
//! U[0]++; if (x) { U[1]++; U[2]++; a(); } else { U[3]++; }
//! ```

mod splice;
mod walker;

use crate::probe::ProbeTable;
use crate::result::{TraceError, TraceResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tree_sitter::{Node, Parser, Tree};

use walker::ProbeWalker;

/// Configuration for the instrumenter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentConfig {
    /// Name of the run's global counter table
    pub global_name: String,
}

impl InstrumentConfig {
    /// Create a configuration bound to one global counter table
    #[must_use]
    pub fn new(global_name: impl Into<String>) -> Self {
        Self {
            global_name: global_name.into(),
        }
    }

    /// Use a different global table name
    #[must_use]
    pub fn with_global_name(mut self, name: impl Into<String>) -> Self {
        self.global_name = name.into();
        self
    }
}

/// One instrumented source unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceUnit {
    /// Absolute path of the unit
    pub path: PathBuf,
    /// Text as read from disk
    pub original_text: String,
    /// Text with probes injected
    pub instrumented_text: String,
    /// Probe ID to original position
    pub probe_table: ProbeTable,
}

impl SourceUnit {
    /// Key under which the unit's counters are stored
    #[must_use]
    pub fn key(&self) -> String {
        unit_key(&self.path)
    }
}

/// Stateless JavaScript instrumenter
#[derive(Debug, Clone)]
pub struct Instrumenter {
    config: InstrumentConfig,
}

impl Instrumenter {
    /// Create an instrumenter
    #[must_use]
    pub fn new(config: InstrumentConfig) -> Self {
        Self { config }
    }

    /// The global counter table name probes write to
    #[must_use]
    pub fn global_name(&self) -> &str {
        &self.config.global_name
    }

    /// Instrument `source` loaded from `path`
    ///
    /// # Errors
    ///
    /// Returns [`TraceError::Parse`] with the location of the first syntax
    /// error when the text is not valid JavaScript.
    pub fn instrument(&self, source: &str, path: &Path) -> TraceResult<SourceUnit> {
        let tree = parse(source, path)?;
        let key = unit_key(path);
        let counter = self.counter_variable(&key);

        let mut walker = ProbeWalker::new(source, &counter);
        let (header_offset, separator) = walker.walk_program(tree.root_node());
        let (probe_table, mut edits) = walker.finish();

        let header = self.header(&counter, &key, probe_table.len(), &short_digest(source))?;
        edits.prepend(header_offset, format!("{separator}{header}"));

        Ok(SourceUnit {
            path: path.to_path_buf(),
            original_text: source.to_string(),
            instrumented_text: edits.apply(source),
            probe_table,
        })
    }

    /// Per-unit variable holding the unit's counter array
    fn counter_variable(&self, key: &str) -> String {
        format!("{}u{}", self.config.global_name, short_digest(key))
    }

    /// Binds the unit's counter array. An array left by an earlier load of
    /// the same text is reused, so re-requiring a module keeps counting.
    fn header(
        &self,
        counter: &str,
        key: &str,
        probes: usize,
        digest: &str,
    ) -> TraceResult<String> {
        let global = serde_json::to_string(&self.config.global_name)?;
        let key = serde_json::to_string(key)?;
        Ok(format!(
            "var {counter} = (function (g) {{ var t = g[{global}] || (g[{global}] = {{}}); \
             var a = t[{key}]; if (!a || a.length !== {probes} || a.h !== \"{digest}\") \
             {{ a = t[{key}] = new Array({probes}).fill(0); a.h = \"{digest}\"; }} return a; }})\
             (typeof globalThis !== \"undefined\" ? globalThis : this); "
        ))
    }
}

fn short_digest(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

/// Counter-table key for a path
#[must_use]
pub fn unit_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn parse(source: &str, path: &Path) -> TraceResult<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_javascript::LANGUAGE.into())
        .map_err(|e| TraceError::Parse {
            path: path.to_path_buf(),
            line: 1,
            column: 0,
            message: format!("grammar unavailable: {e}"),
        })?;

    let tree = parser.parse(source, None).ok_or_else(|| TraceError::Parse {
        path: path.to_path_buf(),
        line: 1,
        column: 0,
        message: "parser produced no tree".to_string(),
    })?;

    let root = tree.root_node();
    if root.has_error() {
        let bad = first_error(root).unwrap_or(root);
        let position = bad.start_position();
        let message = if bad.is_missing() {
            format!("missing `{}`", bad.kind())
        } else {
            "unexpected syntax".to_string()
        };
        return Err(TraceError::Parse {
            path: path.to_path_buf(),
            line: position.row + 1,
            column: position.column,
            message,
        });
    }
    Ok(tree)
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error)
}
