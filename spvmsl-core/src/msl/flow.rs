//! Structured control flow.
//!
//! Blocks are emitted by following the merge instructions of the module: a
//! selection header becomes `if`/`else` or `switch`, a loop header becomes
//! `for (;;)` and every branch is classified against the enclosing
//! constructs as a fall-through, `break`, `continue` or plain successor.
//! Phi results live in variables declared at the top of the function and are
//! assigned on each incoming edge.

use std::collections::{HashMap, HashSet};

use log::trace;
use rspirv::spirv::Op;

use crate::error::Result;
use crate::ir::{Block, Id, Instruction};
use crate::{bail_unsupported, err_internal};

use super::CompilerMsl;

#[derive(Debug, Clone)]
pub(crate) enum Construct {
    Selection { merge: Id },
    Switch { merge: Id, cases: Vec<Id> },
    Loop { header: Id, merge: Id, continue_target: Id },
}

/// How a branch target relates to the enclosing constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    /// Merge of the innermost selection: the branch ends the arm.
    Stop,
    /// Next case label of the enclosing switch.
    Fallthrough,
    Break,
    Continue(Id),
    BackEdge,
    /// Ordinary successor inside the current construct.
    Next(Id),
}

impl Edge {
    fn is_structural(self) -> bool {
        !matches!(self, Edge::Next(_))
    }
}

/// Operations whose results are never materialized as temporaries.
pub(crate) fn is_forwarded_op(ir: &crate::ir::Ir, inst: &Instruction) -> bool {
    match inst.op {
        Op::AccessChain
        | Op::InBoundsAccessChain
        | Op::PtrAccessChain
        | Op::SampledImage
        | Op::Image
        | Op::CopyObject => true,
        Op::Load => inst
            .ops
            .first()
            .and_then(|&rt| ir.maybe_type(rt))
            .is_some_and(|t| t.is_opaque()),
        _ => false,
    }
}

impl CompilerMsl {
    /// Result id of an instruction, when it has one.
    pub(crate) fn result_id(&self, inst: &Instruction) -> Option<Id> {
        let (&rt, &rid) = (inst.ops.first()?, inst.ops.get(1)?);
        (self.ir.type_of(rid) == Some(rt) && self.ir.maybe_type(rt).is_some()).then_some(rid)
    }

    /// Declare hoisted temporaries and phi variables, then emit the blocks.
    pub(crate) fn emit_function_body(&mut self, func: Id) -> Result<()> {
        let blocks = self.ir.get_function(func)?.blocks.clone();
        let Some(first) = blocks.first().map(|b| b.label) else {
            return Ok(());
        };

        let hoisted = self.hoisted_results(&blocks)?;
        let mut declared: Vec<Id> = hoisted.iter().copied().collect();
        declared.sort_unstable();
        for &id in &declared {
            let type_id = self.ir.type_of(id).ok_or_else(|| err_internal!("result {} has no type", id))?;
            let name = format!("_{}", id);
            self.statement(format!("{};", self.variable_decl(type_id, &name)?));
            self.state.expressions.insert(id, name);
        }
        self.state.hoisted = hoisted;

        self.state.constructs.clear();
        self.emit_block_chain(&blocks, first)?;
        if !self.state.constructs.is_empty() {
            return Err(err_internal!("unbalanced constructs after function {}", func));
        }
        Ok(())
    }

    /// Results that must be declared at function scope: phis, values used
    /// outside their defining block, and values defined in continue blocks.
    fn hoisted_results(&self, blocks: &[Block]) -> Result<HashSet<Id>> {
        let mut defined: HashMap<Id, (Id, &Instruction)> = HashMap::new();
        for block in blocks {
            for inst in &block.instructions {
                if let Some(rid) = self.result_id(inst) {
                    defined.insert(rid, (block.label, inst));
                }
            }
        }

        let mut hoisted = HashSet::new();
        let mut uses: Vec<(Id, Id)> = Vec::new();
        for block in blocks {
            for inst in &block.instructions {
                if inst.op == Op::Phi {
                    if let Some(rid) = self.result_id(inst) {
                        hoisted.insert(rid);
                    }
                    for pair in inst.ops[2..].chunks_exact(2) {
                        uses.push((pair[0], pair[1]));
                    }
                    continue;
                }
                uses.extend(inst.refs.iter().map(|&r| (r, block.label)));
            }
        }

        let mut visited = HashSet::new();
        while let Some((id, user)) = uses.pop() {
            let Some(&(def_block, inst)) = defined.get(&id) else { continue };
            if def_block == user {
                continue;
            }
            if is_forwarded_op(&self.ir, inst) {
                // The forwarded text is re-evaluated at the use, so its
                // operands must be visible there.
                if visited.insert((id, user)) {
                    uses.extend(inst.refs.iter().map(|&r| (r, user)));
                }
                continue;
            }
            hoisted.insert(id);
        }

        for block in blocks {
            let Some(merge) = block.merge() else { continue };
            if merge.op != Op::LoopMerge || merge.ops[1] == block.label {
                continue;
            }
            let continue_target = merge.ops[1];
            if let Some(cont) = blocks.iter().find(|b| b.label == continue_target) {
                for inst in cont.body() {
                    if let Some(rid) = self.result_id(inst) {
                        if !is_forwarded_op(&self.ir, inst) {
                            hoisted.insert(rid);
                        }
                    }
                }
            }
        }

        // Arrays cannot be assigned and void calls declare nothing.
        hoisted.retain(|&id| {
            self.ir
                .expression_type(id)
                .is_ok_and(|t| !t.is_array() && !t.pointer && t.basetype != crate::ir::BaseType::Void)
        });
        Ok(hoisted)
    }

    fn block<'a>(&self, blocks: &'a [Block], label: Id) -> Result<&'a Block> {
        blocks
            .iter()
            .find(|b| b.label == label)
            .ok_or_else(|| err_internal!("branch to unknown block {}", label))
    }

    fn classify(&self, target: Id) -> Result<Edge> {
        let mut inside_switch = false;
        let mut inside_loop = false;
        for construct in self.state.constructs.iter().rev() {
            match construct {
                Construct::Selection { merge } => {
                    if target == *merge {
                        return Ok(Edge::Stop);
                    }
                }
                Construct::Switch { merge, cases } => {
                    if target == *merge {
                        return Ok(Edge::Break);
                    }
                    if cases.contains(&target) {
                        return Ok(Edge::Fallthrough);
                    }
                    inside_switch = true;
                }
                Construct::Loop {
                    header,
                    merge,
                    continue_target,
                } => {
                    let matched = if target == *header {
                        Some(Edge::BackEdge)
                    } else if target == *merge {
                        Some(Edge::Break)
                    } else if target == *continue_target {
                        Some(Edge::Continue(*continue_target))
                    } else {
                        None
                    };
                    if let Some(edge) = matched {
                        if inside_loop {
                            bail_unsupported!("Branching out of nested loops is not supported.");
                        }
                        if inside_switch && edge == Edge::Break {
                            bail_unsupported!("Breaking out of a loop from inside a switch is not supported.");
                        }
                        return Ok(edge);
                    }
                    inside_loop = true;
                }
            }
        }
        Ok(Edge::Next(target))
    }

    /// Assign the phi variables of `to` for the edge coming from `from`.
    fn emit_phi_moves(&mut self, blocks: &[Block], from: Id, to: Id) -> Result<()> {
        let target = self.block(blocks, to)?;
        for inst in target.body().iter().filter(|i| i.op == Op::Phi) {
            let rid = inst.ops[1];
            for pair in inst.ops[2..].chunks_exact(2) {
                if pair[1] == from {
                    let value = self.to_expression(pair[0])?;
                    self.statement(format!("_{} = {};", rid, value));
                }
            }
        }
        Ok(())
    }

    fn has_phi_moves(&self, blocks: &[Block], from: Id, to: Id) -> Result<bool> {
        let target = self.block(blocks, to)?;
        Ok(target
            .body()
            .iter()
            .filter(|i| i.op == Op::Phi)
            .any(|i| i.ops[2..].chunks_exact(2).any(|pair| pair[1] == from)))
    }

    /// Emit the branch `from -> to`. Returns the block to continue with when
    /// the target is an ordinary successor.
    fn emit_edge(&mut self, blocks: &[Block], from: Option<Id>, to: Id) -> Result<Option<Id>> {
        if let Some(from) = from {
            self.emit_phi_moves(blocks, from, to)?;
        }
        match self.classify(to)? {
            Edge::Stop | Edge::Fallthrough => Ok(None),
            Edge::Break => {
                self.statement("break;");
                Ok(None)
            }
            Edge::BackEdge => {
                self.statement("continue;");
                Ok(None)
            }
            Edge::Continue(target) => {
                self.emit_continue_block(blocks, target)?;
                Ok(None)
            }
            Edge::Next(target) => Ok(Some(target)),
        }
    }

    /// An edge inside a scope of its own: the arm must end there.
    fn emit_arm(&mut self, blocks: &[Block], from: Id, to: Id) -> Result<()> {
        if let Some(next) = self.emit_edge(blocks, Some(from), to)? {
            self.emit_block_chain(blocks, next)?;
        }
        Ok(())
    }

    fn emit_continue_block(&mut self, blocks: &[Block], label: Id) -> Result<()> {
        let block = self.block(blocks, label)?;
        self.state.transposed.clear();
        for inst in block.body() {
            self.emit_instruction(inst)?;
        }
        let Some(term) = block.terminator() else {
            return Err(err_internal!("block {} has no terminator", label));
        };
        match term.op {
            Op::Branch => {
                if self.emit_edge(blocks, Some(label), term.ops[0])?.is_some() {
                    bail_unsupported!("Continue block {} does not branch to its loop.", label);
                }
            }
            Op::BranchConditional => {
                let cond = self.to_expression(term.ops[0])?;
                self.statement(format!("if ({})", cond));
                self.begin_scope();
                if self.emit_edge(blocks, Some(label), term.ops[1])?.is_some() {
                    bail_unsupported!("Continue block {} does not branch to its loop.", label);
                }
                self.end_scope();
                self.statement("else");
                self.begin_scope();
                if self.emit_edge(blocks, Some(label), term.ops[2])?.is_some() {
                    bail_unsupported!("Continue block {} does not branch to its loop.", label);
                }
                self.end_scope();
            }
            other => bail_unsupported!("Continue block ending in {:?} is not supported.", other),
        }
        Ok(())
    }

    /// Emit `start` and its successors until every path has left the
    /// current construct.
    pub(crate) fn emit_block_chain(&mut self, blocks: &[Block], start: Id) -> Result<()> {
        let mut label = start;
        loop {
            let block = self.block(blocks, label)?;
            trace!("emitting block {}", label);
            self.state.transposed.clear();

            let loop_merge = block.merge().filter(|m| m.op == Op::LoopMerge).map(|m| (m.ops[0], m.ops[1]));
            if let Some((merge, continue_target)) = loop_merge {
                self.statement("for (;;)");
                self.begin_scope();
                self.state.constructs.push(Construct::Loop {
                    header: label,
                    merge,
                    continue_target,
                });
            }

            for inst in block.body() {
                self.emit_instruction(inst)?;
            }
            let next = self.emit_terminator(blocks, block)?;

            let Some((merge, _)) = loop_merge else {
                match next {
                    Some(next) => {
                        label = next;
                        continue;
                    }
                    None => return Ok(()),
                }
            };

            if let Some(body) = next {
                self.emit_block_chain(blocks, body)?;
            }
            self.state.constructs.pop();
            self.end_scope();
            match self.emit_edge(blocks, None, merge)? {
                Some(next) => label = next,
                None => return Ok(()),
            }
        }
    }

    fn emit_terminator(&mut self, blocks: &[Block], block: &Block) -> Result<Option<Id>> {
        let label = block.label;
        let Some(term) = block.terminator() else {
            return Err(err_internal!("block {} has no terminator", label));
        };
        let selection_merge = block.merge().filter(|m| m.op == Op::SelectionMerge).map(|m| m.ops[0]);

        match term.op {
            Op::Branch => self.emit_edge(blocks, Some(label), term.ops[0]),

            Op::BranchConditional => {
                let (cond, t, f) = (term.ops[0], term.ops[1], term.ops[2]);
                match selection_merge {
                    Some(merge) => self.emit_selection(blocks, label, cond, t, f, merge),
                    None => self.emit_conditional_branch(blocks, label, cond, t, f),
                }
            }

            Op::Switch => {
                let Some(merge) = selection_merge else {
                    bail_unsupported!("Switch without a merge block is not supported.");
                };
                self.emit_switch(blocks, label, term, merge)
            }

            Op::Return => {
                let at_tail = self.state.constructs.is_empty();
                self.emit_return(None, at_tail)?;
                Ok(None)
            }
            Op::ReturnValue => {
                let at_tail = self.state.constructs.is_empty();
                self.emit_return(Some(term.ops[0]), at_tail)?;
                Ok(None)
            }
            Op::Kill => {
                self.statement("discard_fragment();");
                Ok(None)
            }
            Op::Unreachable => Ok(None),
            other => bail_unsupported!("Terminator {:?} is not supported.", other),
        }
    }

    fn emit_selection(
        &mut self,
        blocks: &[Block],
        label: Id,
        cond: Id,
        t: Id,
        f: Id,
        merge: Id,
    ) -> Result<Option<Id>> {
        let cond = self.to_expression(cond)?;
        self.state.constructs.push(Construct::Selection { merge });

        if t == merge && f != merge {
            self.statement(format!("if (!{})", enclose(&cond)));
            self.begin_scope();
            self.emit_arm(blocks, label, f)?;
            self.end_scope();
            if self.has_phi_moves(blocks, label, merge)? {
                self.statement("else");
                self.begin_scope();
                self.emit_phi_moves(blocks, label, merge)?;
                self.end_scope();
            }
        } else {
            self.statement(format!("if ({})", cond));
            self.begin_scope();
            self.emit_arm(blocks, label, t)?;
            self.end_scope();
            if f != merge || (t != merge && self.has_phi_moves(blocks, label, merge)?) {
                self.statement("else");
                self.begin_scope();
                self.emit_arm(blocks, label, f)?;
                self.end_scope();
            }
        }

        self.state.constructs.pop();
        self.emit_edge(blocks, None, merge)
    }

    /// Conditional branch without a selection merge: loop exits and
    /// conditional continues.
    fn emit_conditional_branch(&mut self, blocks: &[Block], label: Id, cond: Id, t: Id, f: Id) -> Result<Option<Id>> {
        if t == f {
            return self.emit_edge(blocks, Some(label), t);
        }
        let cond = self.to_expression(cond)?;
        let (te, fe) = (self.classify(t)?, self.classify(f)?);
        match (te.is_structural(), fe.is_structural()) {
            (true, true) => {
                self.statement(format!("if ({})", cond));
                self.begin_scope();
                self.emit_arm(blocks, label, t)?;
                self.end_scope();
                self.statement("else");
                self.begin_scope();
                self.emit_arm(blocks, label, f)?;
                self.end_scope();
                Ok(None)
            }
            (false, true) => {
                self.statement(format!("if (!{})", enclose(&cond)));
                self.begin_scope();
                self.emit_arm(blocks, label, f)?;
                self.end_scope();
                self.emit_edge(blocks, Some(label), t)
            }
            (true, false) => {
                self.statement(format!("if ({})", cond));
                self.begin_scope();
                self.emit_arm(blocks, label, t)?;
                self.end_scope();
                self.emit_edge(blocks, Some(label), f)
            }
            (false, false) => bail_unsupported!("Unstructured conditional branch in block {}.", label),
        }
    }

    fn emit_switch(&mut self, blocks: &[Block], label: Id, term: &Instruction, merge: Id) -> Result<Option<Id>> {
        let selector = term.ops[0];
        let default = term.ops[1];
        let sel_type = self.ir.expression_type(selector)?.clone();
        let stride = if sel_type.width == 64 { 3 } else { 2 };

        let mut cases: Vec<(Id, Vec<String>)> = Vec::new();
        for chunk in term.ops[2..].chunks_exact(stride) {
            let target = chunk[stride - 1];
            let bits = if stride == 3 {
                u64::from(chunk[0]) | (u64::from(chunk[1]) << 32)
            } else {
                u64::from(chunk[0])
            };
            let literal = case_literal(&sel_type, bits);
            match cases.iter_mut().find(|(t, _)| *t == target) {
                Some((_, literals)) => literals.push(literal),
                None => cases.push((target, vec![literal])),
            }
        }
        let default_has_body = default != merge || self.has_phi_moves(blocks, label, merge)?;
        if default_has_body && !cases.iter().any(|(t, _)| *t == default) {
            cases.push((default, Vec::new()));
        }

        let expr = self.to_expression(selector)?;
        self.statement(format!("switch ({})", expr));
        self.begin_scope();
        self.state.constructs.push(Construct::Switch {
            merge,
            cases: cases.iter().map(|(t, _)| *t).collect(),
        });

        for (target, literals) in &cases {
            for literal in literals {
                self.statement(format!("case {}:", literal));
            }
            if *target == default && default_has_body {
                self.statement("default:");
            }
            self.begin_scope();
            self.emit_arm(blocks, label, *target)?;
            self.end_scope();
        }

        self.state.constructs.pop();
        self.end_scope();
        self.emit_edge(blocks, None, merge)
    }
}

fn case_literal(ty: &crate::ir::Type, bits: u64) -> String {
    match (ty.basetype.is_signed(), ty.width) {
        (true, 64) => format!("{}", bits as i64),
        (true, _) => format!("{}", bits as u32 as i32),
        (false, 64) => format!("{}ul", bits),
        (false, _) => format!("{}u", bits as u32),
    }
}

/// Parenthesize unless the expression is a plain name.
pub(crate) fn enclose(expr: &str) -> String {
    if expr.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        || (expr.starts_with('(') && expr.ends_with(')') && balanced_outer(expr))
    {
        expr.to_string()
    } else {
        format!("({})", expr)
    }
}

/// True when the first parenthesis of `expr` closes at its last character.
fn balanced_outer(expr: &str) -> bool {
    let mut depth = 0i32;
    for (i, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i + 1 != expr.len() {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enclose_keeps_names_and_wrapped_expressions() {
        assert_eq!(enclose("_12"), "_12");
        assert_eq!(enclose("in.color"), "in.color");
        assert_eq!(enclose("(a + b)"), "(a + b)");
        assert_eq!(enclose("(a) + (b)"), "((a) + (b))");
        assert_eq!(enclose("a < b"), "(a < b)");
    }

    #[test]
    fn switch_literals_follow_selector_signedness() {
        let int = crate::ir::Type::new(crate::ir::BaseType::Int, 32);
        let uint = crate::ir::Type::new(crate::ir::BaseType::UInt, 32);
        assert_eq!(case_literal(&int, 0xFFFF_FFFF), "-1");
        assert_eq!(case_literal(&uint, 3), "3u");
    }
}
