//! Pre-order probe walker over a tree-sitter JavaScript tree.
//!
//! Every trackable point gets the next probe ID and one or more insertions in
//! the [`EditList`]. The tree is read-only here.

use super::splice::EditList;
use crate::probe::{ProbeKind, ProbeTable, SourceLocation};
use tree_sitter::Node;

const FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "function_expression",
    "function",
    "generator_function",
    "arrow_function",
    "method_definition",
];

const LOOP_KINDS: &[&str] = &[
    "for_statement",
    "for_in_statement",
    "while_statement",
    "do_statement",
    "with_statement",
];

const LOGICAL_OPERATORS: &[&str] = &["&&", "||", "??"];

/// Collects probes and insertions for one unit
pub(crate) struct ProbeWalker<'s> {
    source: &'s str,
    counter: &'s str,
    probes: ProbeTable,
    edits: EditList,
}

impl<'s> ProbeWalker<'s> {
    pub(crate) fn new(source: &'s str, counter: &'s str) -> Self {
        Self {
            source,
            counter,
            probes: ProbeTable::new(),
            edits: EditList::new(),
        }
    }

    pub(crate) fn finish(self) -> (ProbeTable, EditList) {
        (self.probes, self.edits)
    }

    /// Walk the `program` root. Returns the offset and separator for the
    /// unit header (after any hashbang line and directive prologue).
    pub(crate) fn walk_program(&mut self, root: Node<'_>) -> (usize, &'static str) {
        let mut header_at = (0, "");
        let mut statements = Vec::new();
        for child in named_children(root) {
            if is_hashbang(child, self.source) {
                header_at = self.line_after(child.end_byte());
            } else {
                statements.push(child);
            }
        }
        if let Some(prologue) = self.prologue_end(&statements) {
            header_at = prologue;
        }
        self.statement_list(&statements, true);
        header_at
    }

    fn probe(&mut self, kind: ProbeKind, node: Node<'_>) -> String {
        let location = SourceLocation::from_points(node.start_position(), node.end_position());
        let id = self.probes.push(kind, location);
        format!("{}[{}]++", self.counter, id)
    }

    fn synthetic_probe(&mut self, kind: ProbeKind, at: Node<'_>) -> String {
        let end = at.end_position();
        let id = self.probes.push(kind, SourceLocation::from_points(end, end));
        format!("{}[{}]++", self.counter, id)
    }

    fn visit(&mut self, node: Node<'_>) {
        let kind = node.kind();
        match kind {
            "statement_block" => self.block(node),
            "if_statement" => self.if_statement(node),
            "labeled_statement" => self.labeled(node),
            "switch_case" | "switch_default" => self.switch_clause(node),
            "ternary_expression" => self.ternary(node),
            "binary_expression" if is_logical(node) => self.logical(node),
            _ if LOOP_KINDS.contains(&kind) => self.looping(node),
            _ if FUNCTION_KINDS.contains(&kind) => self.function(node),
            _ => self.children(node),
        }
    }

    fn children(&mut self, node: Node<'_>) {
        for child in named_children(node) {
            self.visit(child);
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statement_list(&mut self, statements: &[Node<'_>], allow_prologue: bool) {
        let mut in_prologue = allow_prologue;
        for &statement in statements {
            if in_prologue && is_directive(statement) {
                continue;
            }
            in_prologue = false;
            if counts_as_statement(statement) {
                let probe = self.probe(ProbeKind::Statement, statement);
                self.edits.open(statement.start_byte(), format!("{probe}; "));
            }
            self.visit(statement);
        }
    }

    fn block(&mut self, block: Node<'_>) {
        let statements = named_children(block);
        self.statement_list(&statements, false);
    }

    /// A statement body of a branch or loop. Non-block bodies are wrapped in
    /// a block so the probes have somewhere to live.
    fn body(&mut self, body: Node<'_>, arm: Option<String>) {
        if body.kind() == "statement_block" {
            if let Some(arm) = arm {
                self.edits.open(body.start_byte() + 1, format!(" {arm};"));
            }
            self.block(body);
            return;
        }

        let mut opening = String::from("{ ");
        if let Some(arm) = arm {
            opening.push_str(&arm);
            opening.push_str("; ");
        }
        if counts_as_statement(body) {
            opening.push_str(&self.probe(ProbeKind::Statement, body));
            opening.push_str("; ");
        }
        self.edits.open(body.start_byte(), opening);
        self.edits.close(body.start_byte(), body.end_byte(), " }");
        self.visit(body);
    }

    fn if_statement(&mut self, node: Node<'_>) {
        if let Some(condition) = node.child_by_field_name("condition") {
            self.visit(condition);
        }
        if let Some(consequence) = node.child_by_field_name("consequence") {
            let arm = self.probe(ProbeKind::BranchArm, consequence);
            self.body(consequence, Some(arm));
        }
        match node.child_by_field_name("alternative") {
            Some(else_clause) => {
                if let Some(alternative) = named_children(else_clause).into_iter().next() {
                    let arm = self.probe(ProbeKind::BranchArm, alternative);
                    self.body(alternative, Some(arm));
                }
            }
            None => {
                let arm = self.synthetic_probe(ProbeKind::BranchArm, node);
                self.edits.close(
                    node.start_byte(),
                    node.end_byte(),
                    format!(" else {{ {arm}; }}"),
                );
            }
        }
    }

    fn looping(&mut self, node: Node<'_>) {
        let body = node.child_by_field_name("body");
        for child in named_children(node) {
            if Some(child) == body {
                self.body(child, None);
            } else {
                self.visit(child);
            }
        }
    }

    // `continue label` must still see the labelled loop, so the body itself
    // is never wrapped.
    fn labeled(&mut self, node: Node<'_>) {
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(body);
        }
    }

    fn switch_clause(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        let all: Vec<Node<'_>> = node.children(&mut cursor).collect();
        let colon = all.iter().position(|c| c.kind() == ":");

        let arm = self.probe(ProbeKind::BranchArm, node);
        let offset = colon.map_or(node.start_byte(), |i| all[i].end_byte());
        self.edits.open(offset, format!(" {arm};"));

        if let Some(value) = node.child_by_field_name("value") {
            self.visit(value);
        }
        let statements: Vec<Node<'_>> = all
            .iter()
            .skip(colon.map_or(all.len(), |i| i + 1))
            .filter(|c| c.is_named() && !c.is_extra())
            .copied()
            .collect();
        self.statement_list(&statements, false);
    }

    // ========================================================================
    // Functions and expressions
    // ========================================================================

    fn function(&mut self, node: Node<'_>) {
        let entry = self.probe(ProbeKind::FunctionEntry, node);
        let body = node.child_by_field_name("body");
        for child in named_children(node) {
            if Some(child) != body {
                self.visit(child);
            }
        }

        match body {
            Some(block) if block.kind() == "statement_block" => {
                let statements = named_children(block);
                let (offset, sep) = self
                    .prologue_end(&statements)
                    .unwrap_or((block.start_byte() + 1, ""));
                self.edits.open(offset, format!("{sep} {entry};"));
                self.statement_list(&statements, true);
            }
            Some(expr) => {
                self.wrap_expression(expr, &entry);
                self.visit(expr);
            }
            None => {}
        }
    }

    fn ternary(&mut self, node: Node<'_>) {
        if let Some(condition) = node.child_by_field_name("condition") {
            self.visit(condition);
        }
        for field in ["consequence", "alternative"] {
            if let Some(arm) = node.child_by_field_name(field) {
                let probe = self.probe(ProbeKind::BranchArm, arm);
                self.wrap_expression(arm, &probe);
                self.visit(arm);
            }
        }
    }

    /// Operands of a flat `a && b || c` chain each get one probe.
    fn logical(&mut self, node: Node<'_>) {
        for field in ["left", "right"] {
            let Some(operand) = node.child_by_field_name(field) else {
                continue;
            };
            if is_logical(operand) {
                self.logical(operand);
            } else {
                let probe = self.probe(ProbeKind::ShortCircuitOperand, operand);
                self.wrap_expression(operand, &probe);
                self.visit(operand);
            }
        }
    }

    fn wrap_expression(&mut self, expr: Node<'_>, probe: &str) {
        self.edits.open(expr.start_byte(), format!("({probe}, "));
        self.edits.close(expr.start_byte(), expr.end_byte(), ")");
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Insertion point after the leading directives of a statement list,
    /// with the `;` needed when the last directive relied on ASI.
    fn prologue_end(&self, statements: &[Node<'_>]) -> Option<(usize, &'static str)> {
        let last = statements
            .iter()
            .take_while(|s| is_directive(**s))
            .last()?;
        let end = last.end_byte();
        let terminated = self.source.as_bytes().get(end.wrapping_sub(1)) == Some(&b';');
        Some((end, if terminated { "" } else { ";" }))
    }

    fn line_after(&self, offset: usize) -> (usize, &'static str) {
        self.source[offset..]
            .find('\n')
            .map_or((self.source.len(), "\n"), |i| (offset + i + 1, ""))
    }
}

fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| !c.is_extra())
        .collect()
}

// Older grammars spell the node `hashbang_line`.
fn is_hashbang(node: Node<'_>, source: &str) -> bool {
    matches!(node.kind(), "hash_bang_line" | "hashbang_line")
        || (node.start_byte() == 0 && source.starts_with("#!"))
}

fn is_directive(node: Node<'_>) -> bool {
    if node.kind() != "expression_statement" {
        return false;
    }
    let inner = named_children(node);
    inner.len() == 1 && inner[0].kind() == "string"
}

fn is_logical(node: Node<'_>) -> bool {
    node.kind() == "binary_expression"
        && node
            .child_by_field_name("operator")
            .is_some_and(|op| LOGICAL_OPERATORS.contains(&op.kind()))
}

fn counts_as_statement(node: Node<'_>) -> bool {
    !matches!(
        node.kind(),
        "function_declaration"
            | "generator_function_declaration"
            | "import_statement"
            | "empty_statement"
    )
}
