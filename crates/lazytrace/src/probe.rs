//! Probe identifiers and the per-unit probe table.
//!
//! A probe is one injected counter increment. Probes are numbered densely
//! from zero in pre-order over the parsed unit, so the same source text
//! always yields the same table and IDs can be correlated across runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a probe within one source unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeId(u32);

impl ProbeId {
    /// Create a new probe ID
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the inner value
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Index into a unit's counter array
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of trackable point a probe marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    /// A statement was reached
    Statement,
    /// One arm of an `if`, `?:` or `switch` was taken
    BranchArm,
    /// A function body was entered
    FunctionEntry,
    /// An operand of `&&`, `||` or `??` was evaluated
    ShortCircuitOperand,
}

impl ProbeKind {
    /// Stable name used in the trace file
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Statement => "statement",
            Self::BranchArm => "branch-arm",
            Self::FunctionEntry => "function-entry",
            Self::ShortCircuitOperand => "short-circuit-operand",
        }
    }
}

/// Original source span of a probe (1-based lines, 0-based byte columns)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    /// Start line
    pub line: usize,
    /// Start column
    pub column: usize,
    /// End line
    pub end_line: usize,
    /// End column
    pub end_column: usize,
}

impl SourceLocation {
    /// Build a location from tree-sitter's 0-based rows
    #[must_use]
    pub const fn from_points(start: tree_sitter::Point, end: tree_sitter::Point) -> Self {
        Self {
            line: start.row + 1,
            column: start.column,
            end_line: end.row + 1,
            end_column: end.column,
        }
    }
}

/// One entry of the probe table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    /// Probe identifier
    pub id: ProbeId,
    /// What the probe marks
    pub kind: ProbeKind,
    /// Where in the original text it sits
    #[serde(flatten)]
    pub location: SourceLocation,
}

/// Ordered probe table for one source unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbeTable {
    probes: Vec<Probe>,
}

impl ProbeTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a probe, assigning the next ID
    pub fn push(&mut self, kind: ProbeKind, location: SourceLocation) -> ProbeId {
        let id = ProbeId::new(self.probes.len() as u32);
        self.probes.push(Probe { id, kind, location });
        id
    }

    /// Number of probes
    #[must_use]
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Look up a probe by ID
    #[must_use]
    pub fn get(&self, id: ProbeId) -> Option<&Probe> {
        self.probes.get(id.index())
    }

    /// Iterate probes in ID order
    pub fn iter(&self) -> std::slice::Iter<'_, Probe> {
        self.probes.iter()
    }

    /// Probes of one kind
    pub fn of_kind(&self, kind: ProbeKind) -> impl Iterator<Item = &Probe> {
        self.probes.iter().filter(move |p| p.kind == kind)
    }
}

impl<'a> IntoIterator for &'a ProbeTable {
    type Item = &'a Probe;
    type IntoIter = std::slice::Iter<'a, Probe>;

    fn into_iter(self) -> Self::IntoIter {
        self.probes.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn loc(line: usize) -> SourceLocation {
        SourceLocation {
            line,
            column: 0,
            end_line: line,
            end_column: 4,
        }
    }

    #[test]
    fn test_ids_are_dense_and_ordered() {
        let mut table = ProbeTable::new();
        let a = table.push(ProbeKind::Statement, loc(1));
        let b = table.push(ProbeKind::BranchArm, loc(2));
        let c = table.push(ProbeKind::BranchArm, loc(3));
        assert_eq!(a.as_u32(), 0);
        assert_eq!(b.as_u32(), 1);
        assert_eq!(c.as_u32(), 2);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(b).unwrap().location.line, 2);
        assert_eq!(table.of_kind(ProbeKind::BranchArm).count(), 2);
    }

    #[test]
    fn test_probe_serializes_flat() {
        let mut table = ProbeTable::new();
        table.push(ProbeKind::ShortCircuitOperand, loc(5));
        let json = serde_json::to_value(&table).unwrap();
        let first = &json[0];
        assert_eq!(first["id"], 0);
        assert_eq!(first["kind"], "short-circuit-operand");
        assert_eq!(first["line"], 5);
        assert_eq!(first["endColumn"], 4);
    }

    #[test]
    fn test_kind_names_match_serde() {
        for kind in [
            ProbeKind::Statement,
            ProbeKind::BranchArm,
            ProbeKind::FunctionEntry,
            ProbeKind::ShortCircuitOperand,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }
}
