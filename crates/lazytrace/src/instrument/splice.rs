//! Text insertions spliced into the original source.
//!
//! The walker never touches the syntax tree; it records insertions here and
//! the whole list is applied in one pass at the end. Several insertions can
//! land on the same byte offset, so ordering is explicit:
//!
//! - closing text goes before opening text at the same offset
//! - among closings, the innermost span closes first (larger span start,
//!   then the later-recorded insertion)
//! - among openings, the earlier-recorded insertion comes first (outer
//!   nodes are visited before inner ones)

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Open,
    Close { span_start: usize },
}

#[derive(Debug, Clone)]
struct Insertion {
    offset: usize,
    anchor: Anchor,
    seq: usize,
    text: String,
}

impl Insertion {
    fn order(&self, other: &Self) -> Ordering {
        self.offset
            .cmp(&other.offset)
            .then_with(|| match (self.anchor, other.anchor) {
                (Anchor::Close { span_start: a }, Anchor::Close { span_start: b }) => {
                    b.cmp(&a).then_with(|| other.seq.cmp(&self.seq))
                }
                (Anchor::Close { .. }, Anchor::Open) => Ordering::Less,
                (Anchor::Open, Anchor::Close { .. }) => Ordering::Greater,
                (Anchor::Open, Anchor::Open) => self.seq.cmp(&other.seq),
            })
    }
}

/// Ordered set of insertions against one source text
#[derive(Debug, Default)]
pub(crate) struct EditList {
    insertions: Vec<Insertion>,
}

impl EditList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert text that opens a span (or stands alone) at `offset`
    pub(crate) fn open(&mut self, offset: usize, text: impl Into<String>) {
        self.push(offset, Anchor::Open, text.into());
    }

    /// Insert text that closes the span starting at `span_start`
    pub(crate) fn close(&mut self, span_start: usize, offset: usize, text: impl Into<String>) {
        self.push(offset, Anchor::Close { span_start }, text.into());
    }

    /// Insert text ahead of every other opening at `offset`
    pub(crate) fn prepend(&mut self, offset: usize, text: impl Into<String>) {
        self.insertions.push(Insertion {
            offset,
            anchor: Anchor::Open,
            seq: 0,
            text: text.into(),
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.insertions.len()
    }

    fn push(&mut self, offset: usize, anchor: Anchor, text: String) {
        let seq = self.insertions.len() + 1;
        self.insertions.push(Insertion {
            offset,
            anchor,
            seq,
            text,
        });
    }

    /// Splice every insertion into `source`
    pub(crate) fn apply(mut self, source: &str) -> String {
        self.insertions.sort_by(Insertion::order);

        let extra: usize = self.insertions.iter().map(|i| i.text.len()).sum();
        let mut out = String::with_capacity(source.len() + extra);
        let mut cursor = 0;
        for insertion in &self.insertions {
            let offset = insertion.offset.min(source.len());
            if offset > cursor {
                out.push_str(&source[cursor..offset]);
                cursor = offset;
            }
            out.push_str(&insertion.text);
        }
        out.push_str(&source[cursor..]);
        out
    }
}
