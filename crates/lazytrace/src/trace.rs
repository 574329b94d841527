//! Run-scoped trace store and the handle that owns it.
//!
//! Injected probes increment plain arrays in the script engine's global
//! counter table (`globalThis[<global name>][<path>]`). The host copies those
//! arrays back into the [`TraceContext`] at exit, before any flusher runs.
//! Each context has its own global name, so two runs inside one process (or
//! a nested traced child) never share counters.

use crate::instrument::SourceUnit;
use crate::probe::{ProbeId, ProbeTable};
use crate::result::TraceResult;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use uuid::Uuid;

/// Hit counts of one unit, keyed by probe
pub type UnitCounts = BTreeMap<ProbeId, u64>;

/// Serialized trace: what ends up in the `.dtrace` file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStore {
    /// Unique token of the run
    pub run_id: String,
    /// RFC 3339 creation time
    pub created_at: String,
    /// Path to per-probe hit counts
    pub counts: BTreeMap<String, UnitCounts>,
    /// Path to probe table, for attributing hits to source positions
    pub probes: BTreeMap<String, ProbeTable>,
}

impl TraceStore {
    /// Whether any unit was instrumented
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Hit count of one probe
    #[must_use]
    pub fn hits(&self, path: &str, id: ProbeId) -> Option<u64> {
        self.counts.get(path)?.get(&id).copied()
    }
}

/// Shared handle to a run's trace store
#[derive(Debug, Clone)]
pub struct TraceContext {
    global_name: Rc<str>,
    store: Rc<RefCell<TraceStore>>,
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceContext {
    /// Create a context with a fresh run ID
    #[must_use]
    pub fn new() -> Self {
        Self::with_run_id(Uuid::new_v4())
    }

    /// Create a context for a given run ID
    #[must_use]
    pub fn with_run_id(run_id: Uuid) -> Self {
        let simple = run_id.simple().to_string();
        let global_name = format!("__lazytrace_{}__", &simple[..12]);
        Self {
            global_name: global_name.into(),
            store: Rc::new(RefCell::new(TraceStore {
                run_id: run_id.to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
                ..TraceStore::default()
            })),
        }
    }

    /// Run ID
    #[must_use]
    pub fn run_id(&self) -> String {
        self.store.borrow().run_id.clone()
    }

    /// Global counter table name injected code writes to
    #[must_use]
    pub fn global_name(&self) -> &str {
        &self.global_name
    }

    /// Record an instrumented unit. Loading the same text again keeps the
    /// counts gathered so far, matching the unit header which reuses the
    /// counter array; a changed probe table starts over at zero.
    pub fn register_unit(&self, unit: &SourceUnit) {
        let key = unit.key();
        let mut store = self.store.borrow_mut();
        if store.probes.get(&key) == Some(&unit.probe_table) {
            return;
        }
        let zeros = unit.probe_table.iter().map(|p| (p.id, 0)).collect();
        store.counts.insert(key.clone(), zeros);
        store.probes.insert(key, unit.probe_table.clone());
    }

    /// Zero the counts of one unit. Used when a cached module is evicted to
    /// be instrumented again.
    pub fn reset_unit(&self, key: &str) {
        if let Some(counts) = self.store.borrow_mut().counts.get_mut(key) {
            counts.values_mut().for_each(|n| *n = 0);
        }
    }

    /// Whether at least one unit was instrumented in this run
    #[must_use]
    pub fn has_units(&self) -> bool {
        !self.store.borrow().is_empty()
    }

    /// Number of instrumented units
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.store.borrow().probes.len()
    }

    /// Replace counts with a snapshot harvested from the script engine
    pub fn absorb_counts(&self, harvested: BTreeMap<String, Vec<u64>>) {
        let mut store = self.store.borrow_mut();
        for (path, counters) in harvested {
            let counts = counters
                .into_iter()
                .enumerate()
                .filter_map(|(i, n)| u32::try_from(i).ok().map(|i| (ProbeId::new(i), n)))
                .collect();
            store.counts.insert(path, counts);
        }
    }

    /// Copy of the current store
    #[must_use]
    pub fn snapshot(&self) -> TraceStore {
        self.store.borrow().clone()
    }

    /// Serialize the store as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> TraceResult<String> {
        Ok(serde_json::to_string_pretty(&*self.store.borrow())?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::instrument::{InstrumentConfig, Instrumenter};
    use std::path::Path;

    fn unit(ctx: &TraceContext, path: &str, source: &str) -> SourceUnit {
        Instrumenter::new(InstrumentConfig::new(ctx.global_name()))
            .instrument(source, Path::new(path))
            .unwrap()
    }

    #[test]
    fn test_global_names_are_unique_per_run() {
        let a = TraceContext::new();
        let b = TraceContext::new();
        assert_ne!(a.global_name(), b.global_name());
        assert!(a.global_name().starts_with("__lazytrace_"));
        assert!(a.global_name().ends_with("__"));
    }

    #[test]
    fn test_register_marks_units() {
        let ctx = TraceContext::new();
        assert!(!ctx.has_units());
        ctx.register_unit(&unit(&ctx, "/a.js", "x(); y();"));
        assert!(ctx.has_units());
        assert_eq!(ctx.unit_count(), 1);
        assert_eq!(ctx.snapshot().hits("/a.js", ProbeId::new(1)), Some(0));
    }

    #[test]
    fn test_absorb_replaces_counts() {
        let ctx = TraceContext::new();
        ctx.register_unit(&unit(&ctx, "/a.js", "x(); y();"));
        ctx.absorb_counts(BTreeMap::from([("/a.js".to_string(), vec![3, 1])]));
        ctx.absorb_counts(BTreeMap::from([("/a.js".to_string(), vec![4, 1])]));
        let store = ctx.snapshot();
        assert_eq!(store.hits("/a.js", ProbeId::new(0)), Some(4));
        assert_eq!(store.hits("/a.js", ProbeId::new(1)), Some(1));
    }

    #[test]
    fn test_reregistering_keeps_counts() {
        let ctx = TraceContext::new();
        let u = unit(&ctx, "/a.js", "x();");
        ctx.register_unit(&u);
        ctx.absorb_counts(BTreeMap::from([("/a.js".to_string(), vec![7])]));
        ctx.register_unit(&u);
        assert_eq!(ctx.snapshot().hits("/a.js", ProbeId::new(0)), Some(7));
        assert_eq!(ctx.unit_count(), 1);
    }

    #[test]
    fn test_changed_unit_restarts_counts() {
        let ctx = TraceContext::new();
        ctx.register_unit(&unit(&ctx, "/a.js", "x();"));
        ctx.absorb_counts(BTreeMap::from([("/a.js".to_string(), vec![7])]));
        ctx.register_unit(&unit(&ctx, "/a.js", "x(); y();"));
        let store = ctx.snapshot();
        assert_eq!(store.hits("/a.js", ProbeId::new(0)), Some(0));
        assert_eq!(store.probes["/a.js"].len(), 2);
    }

    #[test]
    fn test_reset_unit_zeroes_counts() {
        let ctx = TraceContext::new();
        let u = unit(&ctx, "/a.js", "x(); y();");
        ctx.register_unit(&u);
        ctx.absorb_counts(BTreeMap::from([("/a.js".to_string(), vec![2, 5])]));
        ctx.reset_unit("/a.js");
        ctx.reset_unit("/missing.js");
        let store = ctx.snapshot();
        assert_eq!(store.hits("/a.js", ProbeId::new(0)), Some(0));
        assert_eq!(store.hits("/a.js", ProbeId::new(1)), Some(0));
        assert_eq!(store.probes.len(), 1);
    }

    #[test]
    fn test_json_shape_round_trips() {
        let ctx = TraceContext::with_run_id(Uuid::nil());
        ctx.register_unit(&unit(&ctx, "/a.js", "x();"));
        ctx.absorb_counts(BTreeMap::from([("/a.js".to_string(), vec![2])]));

        let json = ctx.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["runId"], Uuid::nil().to_string());
        assert_eq!(value["counts"]["/a.js"]["0"], 2);
        assert_eq!(value["probes"]["/a.js"][0]["kind"], "statement");

        let parsed: TraceStore = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ctx.snapshot());
    }
}
