//! Structured control flow.
//!
//! Each function is emitted as a chain of blocks starting at its entry.
//! Selection and switch headers open a scope and continue at their merge
//! block once the scope is closed; loop headers pick one of four shapes:
//!
//! ```text
//!   header == continue, conditional back edge   ──► do { } while (c);
//!   continue block ends in a conditional branch ──► do { } while (c);
//!   header (or its only child) tests c and exits,
//!   continue block folds into an expression list ──► for (init; c; inc) / while (c)
//!   anything else                                ──► for (;;) with breaks
//! ```
//!
//! Folding a loop header is tentative: the header and continue block are
//! emitted into the buffer and rolled back if they produced statements. A
//! failed fold disables folding for that header in the next attempt.

use super::expression::enclose;
use super::types::scalar_literal;
use super::{CodeGenerator, LoopShape, Tracking};
use crate::backend::{Dialect, Feature};
use crate::error::{Error, Result};
use crate::ir::opcode::{for_each_id_operand, result_of};
use crate::ir::{Id, Merge, Phi, Terminator};
use log::{debug, trace};
use spirv::{BuiltIn, ExecutionModel, StorageClass};
use std::collections::{BTreeSet, HashMap};

/// How a loop's continue block is reached from its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LoopKind {
    /// Folded into a `for` increment: `continue;`.
    Folded,
    /// Emitted before the `while` of a do-while: `continue;`.
    DoWhile,
    /// Emitted at every branch to it.
    Inline,
}

/// An open construct.
#[derive(Debug, Clone)]
pub(super) enum Frame {
    Selection {
        merge: Id,
    },
    Switch {
        merge: Id,
        /// Case blocks in emission order.
        cases: Vec<Id>,
        current: usize,
    },
    Loop {
        header: Id,
        merge: Id,
        continue_block: Id,
        kind: LoopKind,
        /// A `continue;` was emitted in the body.
        continued: bool,
    },
}

/// What a branch to a block turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// The innermost selection's merge: nothing.
    Fallthrough,
    Break,
    /// `continue;` to a folded continue block.
    Continue,
    /// `continue;` to the tail of a do-while.
    DoWhileTail,
    /// The continue block of a `for (;;)` loop, emitted in place.
    InlineContinue,
    /// The continue block's jump back to the header.
    BackEdge,
    /// The next case of the enclosing switch.
    SwitchFallthrough,
    /// A block not emitted yet: continue the chain there.
    Follow,
}

impl Target {
    /// Whether control leaves the current scope.
    fn is_jump(self) -> bool {
        matches!(
            self,
            Target::Break
                | Target::Continue
                | Target::DoWhileTail
                | Target::InlineContinue
                | Target::BackEdge
        )
    }
}

/// A `for` loop header that can be folded into one statement.
#[derive(Debug, Clone, Copy)]
struct FoldedLoop {
    /// Block holding the exit test: the header or its only child.
    test_block: Id,
    condition: Id,
    negate: bool,
    body: Id,
}

fn negate(text: &str) -> String {
    format!("!{}", enclose(text))
}

impl<D: Dialect> CodeGenerator<'_, D> {
    // ── Functions ───────────────────────────────────────────────────────

    pub(super) fn emit_function(&mut self, function: Id) -> Result<()> {
        debug!("emitting function %{function}");
        self.function = function;
        self.frames.clear();
        self.emitted_blocks.clear();
        self.repeating = 0;
        self.track = Tracking::default();
        self.loop_depth = 0;
        self.loop_initializers.clear();
        self.pending_locals.clear();
        self.opaque_roots.clear();
        self.chain_builtins.clear();
        self.texel_pointers.clear();
        self.folding = None;
        self.folded_definitions.clear();
        self.read_log = None;

        let func = self.ir.ids.get_function(function)?.clone();
        let signature = if function == self.entry.function {
            "void main()".to_string()
        } else {
            let mut parameters = Vec::with_capacity(func.arguments.len());
            for parameter in &func.arguments {
                let name = self.name_of(parameter.id);
                let ty = self.ir.ids.get_type(parameter.type_id)?;
                let declaration = if ty.pointer {
                    let pointee = self.ir.ids.pointee_type(parameter.type_id)?;
                    let (pointee_id, opaque) = (pointee.self_id, pointee.basetype.is_opaque());
                    let declaration = self.declare(pointee_id, &name)?;
                    if opaque {
                        declaration
                    } else {
                        format!("inout {declaration}")
                    }
                } else {
                    self.declare(parameter.type_id, &name)?
                };
                parameters.push(declaration);
            }
            let return_type = self.type_name(func.return_type)?;
            format!(
                "{return_type} {}({})",
                self.name_of(function),
                parameters.join(", ")
            )
        };

        self.buf.line(&signature);
        self.buf.begin_scope();
        self.emit_block_chain(func.entry_block)?;
        self.buf.pop_line_if("return;");
        self.buf.end_scope();
        self.buf.blank_line();
        Ok(())
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    /// Emit `block` and everything structurally after it.
    fn emit_block_chain(&mut self, block: Id) -> Result<()> {
        if self.ir.ids.get_block(block)?.is_loop_header() {
            self.emit_loop(block)
        } else {
            self.emit_block(block)
        }
    }

    fn emit_block(&mut self, block: Id) -> Result<()> {
        if !self.emitted_blocks.insert(block) && self.repeating == 0 {
            return Err(Error::unsupported(format!(
                "block %{block} is reached along more than one structured path"
            ))
            .at_id(block));
        }
        trace!("emitting block %{block}");
        let (variables, temporaries) = {
            let b = self.ir.ids.get_block(block)?;
            (b.dominated_variables.clone(), b.declare_temporary.clone())
        };
        for var in variables {
            self.declare_local_deferred(var)?;
        }
        for (ty, id) in temporaries {
            self.declare_temporary(ty, id)?;
        }
        self.emit_block_contents(block)
    }

    fn emit_block_contents(&mut self, block: Id) -> Result<()> {
        self.emit_block_ops(block)?;
        self.emit_terminator(block)
    }

    /// Declaration of a function-local variable at the top of its scope.
    fn declare_local(&mut self, var: Id) -> Result<()> {
        let variable = self.ir.ids.get_variable(var)?.clone();
        if variable.parameter {
            return Ok(());
        }
        let ty = self.ir.ids.pointee_type(variable.basetype)?.self_id;
        let name = self.name_of(var);
        let declaration = self.declare(ty, &name)?;
        let line = if let Some(constant) = variable.static_expression {
            format!("const {declaration} = {};", self.constant_literal(constant)?)
        } else if let Some(initializer) = variable.initializer {
            format!("{declaration} = {};", self.read(initializer)?)
        } else {
            format!("{declaration};")
        };
        self.buf.declaration(&line);
        Ok(())
    }

    /// Like [`Self::declare_local`], but a variable without an initial
    /// value waits for its first access so a leading store can become its
    /// initializer.
    fn declare_local_deferred(&mut self, var: Id) -> Result<()> {
        let variable = self.ir.ids.get_variable(var)?;
        let plain = !variable.parameter
            && !variable.phi_variable
            && variable.static_expression.is_none()
            && variable.initializer.is_none();
        if plain {
            self.pending_locals.push(var);
            Ok(())
        } else {
            self.declare_local(var)
        }
    }

    /// Declare every deferred variable that is still waiting.
    pub(super) fn flush_pending_locals(&mut self) -> Result<()> {
        for var in std::mem::take(&mut self.pending_locals) {
            self.declare_local(var)?;
        }
        Ok(())
    }

    fn declare_temporary(&mut self, ty: Id, id: Id) -> Result<()> {
        let name = self.name_of(id);
        let declaration = self.declare(ty, &name)?;
        self.buf.declaration(&format!("{declaration};"));
        Ok(())
    }

    // ── Branches ────────────────────────────────────────────────────────

    fn classify(&self, to: Id) -> Result<Target> {
        let mut crossed_switch = false;
        let mut crossed_loop = false;
        for frame in self.frames.iter().rev() {
            match frame {
                Frame::Selection { merge } if *merge == to => {
                    if crossed_loop {
                        break;
                    }
                    return Ok(Target::Fallthrough);
                }
                Frame::Selection { .. } => {}
                Frame::Switch {
                    merge,
                    cases,
                    current,
                } => {
                    if *merge == to && !crossed_loop {
                        return Ok(Target::Break);
                    }
                    if cases.get(current + 1) == Some(&to) {
                        return Ok(Target::SwitchFallthrough);
                    }
                    if cases.contains(&to) {
                        return Err(Error::unsupported(format!(
                            "switch case %{to} is entered from a case that does not precede it"
                        ))
                        .at_id(to));
                    }
                    crossed_switch = true;
                }
                Frame::Loop {
                    header,
                    merge,
                    continue_block,
                    kind,
                    ..
                } => {
                    if crossed_loop {
                        if to == *merge || to == *continue_block || to == *header {
                            return Err(Error::unsupported(format!(
                                "branch to %{to} leaves more than one loop"
                            ))
                            .at_id(to));
                        }
                        continue;
                    }
                    if to == *merge {
                        if crossed_switch {
                            return Err(Error::unsupported(
                                "breaking out of a loop from inside a switch",
                            )
                            .at_id(to));
                        }
                        return Ok(Target::Break);
                    }
                    if to == *continue_block && to != *header {
                        return Ok(match kind {
                            LoopKind::Folded => Target::Continue,
                            LoopKind::DoWhile => Target::DoWhileTail,
                            LoopKind::Inline => Target::InlineContinue,
                        });
                    }
                    if to == *header {
                        return Ok(Target::BackEdge);
                    }
                    crossed_loop = true;
                }
            }
        }
        Ok(Target::Follow)
    }

    fn has_phis(&self, from: Id, to: Id) -> bool {
        self.ir
            .ids
            .maybe_block(to)
            .is_some_and(|b| b.phi_variables.iter().any(|phi| phi.parent == from))
    }

    /// Whether branching `from → to` emits nothing.
    fn is_empty_edge(&self, from: Id, to: Id) -> Result<bool> {
        let target = self.classify(to)?;
        Ok(matches!(target, Target::Fallthrough | Target::SwitchFallthrough)
            && !self.has_phis(from, to))
    }

    fn branch(&mut self, from: Id, to: Id) -> Result<()> {
        self.flush_phis(from, to)?;
        let target = self.classify(to)?;
        self.jump(to, target)
    }

    fn jump(&mut self, to: Id, target: Target) -> Result<()> {
        match target {
            Target::Fallthrough | Target::SwitchFallthrough => Ok(()),
            Target::Break => {
                self.buf.statement("break;");
                Ok(())
            }
            Target::Continue | Target::DoWhileTail => {
                if let Some(Frame::Loop { continued, .. }) = self
                    .frames
                    .iter_mut()
                    .rev()
                    .find(|frame| matches!(frame, Frame::Loop { .. }))
                {
                    *continued = true;
                }
                self.buf.statement("continue;");
                Ok(())
            }
            Target::BackEdge => {
                self.buf.statement("continue;");
                Ok(())
            }
            Target::InlineContinue => {
                self.repeating += 1;
                let result = self.emit_block(to);
                self.repeating -= 1;
                result
            }
            Target::Follow => self.emit_block_chain(to),
        }
    }

    /// Continue after a closed construct at its merge block.
    fn follow_merge(&mut self, merge: Id) -> Result<()> {
        if !self.scope()?.cfg.is_reachable(merge) {
            return Ok(());
        }
        if self.emitted_blocks.contains(&merge) && self.repeating == 0 {
            return Ok(());
        }
        let target = self.classify(merge)?;
        self.jump(merge, target)
    }

    /// Assign the phi variables of `to` for the edge from `from`.
    ///
    /// All incoming values are read before any variable is written. A value
    /// that reads a variable written earlier in the same group is copied to
    /// a temporary first.
    fn flush_phis(&mut self, from: Id, to: Id) -> Result<()> {
        let phis: Vec<Phi> = match self.ir.ids.maybe_block(to) {
            Some(block) => block
                .phi_variables
                .iter()
                .filter(|phi| phi.parent == from)
                .copied()
                .collect(),
            None => return Ok(()),
        };
        if phis.is_empty() {
            return Ok(());
        }
        self.flush_pending_locals()?;

        let targets: Vec<Id> = phis.iter().map(|phi| phi.function_variable).collect();
        let mut values = Vec::with_capacity(phis.len());
        for (index, phi) in phis.iter().enumerate() {
            let mut text = self.read(phi.local_variable)?;
            let reads = self.reads_of(phi.local_variable);
            if targets[..index].iter().any(|target| reads.contains(target)) {
                let ty = self.ir.ids.get_variable(phi.function_variable)?.basetype;
                let name = self.name_of(phi.function_variable);
                let copy = self.names.fresh(&format!("{name}_copy"));
                let declaration = self.declare(ty, &copy)?;
                self.buf.declaration(&format!("{declaration} = {text};"));
                text = copy;
            }
            values.push(text);
        }

        for (phi, text) in phis.iter().zip(values) {
            let var = phi.function_variable;
            let variable = self.ir.ids.get_variable(var)?;
            let before_loop = variable.loop_variable
                && variable
                    .dominator
                    .is_some_and(|header| !self.emitted_blocks.contains(&header));
            if before_loop {
                self.loop_initializers.insert(var, text);
                continue;
            }
            let name = self.name_of(var);
            self.buf.statement(&format!("{name} = {text};"));
            self.invalidate(var);
        }
        Ok(())
    }

    // ── Terminators ─────────────────────────────────────────────────────

    fn emit_terminator(&mut self, block: Id) -> Result<()> {
        self.flush_pending_locals()?;
        let (terminator, merge) = {
            let b = self.ir.ids.get_block(block)?;
            (b.terminator.clone(), b.merge)
        };
        match terminator {
            Terminator::Direct(to) => self.branch(block, to),
            Terminator::Select {
                true_block,
                false_block,
                ..
            } if true_block == false_block => self.branch(block, true_block),
            Terminator::Select {
                condition,
                true_block,
                false_block,
            } => match merge {
                Merge::Selection { merge_block } => {
                    self.emit_if(block, condition, true_block, false_block, merge_block)
                }
                _ => self.emit_conditional(block, condition, true_block, false_block),
            },
            Terminator::MultiSelect {
                selector,
                default,
                cases,
            } => match merge {
                Merge::Selection { merge_block } => {
                    self.emit_switch(block, selector, default, &cases, merge_block)
                }
                _ => Err(Error::invalid("switch without a selection merge").at_id(block)),
            },
            Terminator::Return(value) => {
                self.emit_position_fixups()?;
                match value {
                    Some(value) => {
                        let text = self.read(value)?;
                        self.buf.statement(&format!("return {text};"));
                    }
                    None => self.buf.statement("return;"),
                }
                Ok(())
            }
            Terminator::Kill => {
                self.buf.statement("discard;");
                Ok(())
            }
            Terminator::Unreachable => Ok(()),
            Terminator::Unknown => {
                Err(Error::invalid(format!("block %{block} has no terminator")).at_id(block))
            }
        }
    }

    /// Clip-space adjustments before the vertex entry point returns.
    fn emit_position_fixups(&mut self) -> Result<()> {
        let vertex_main =
            self.function == self.entry.function && self.entry.model == ExecutionModel::Vertex;
        if !vertex_main
            || !(self.options.fixup_clipspace || self.options.flip_vert_y)
            || !self
                .analysis
                .active_builtins
                .outputs
                .contains(&(BuiltIn::Position as u32))
        {
            return Ok(());
        }
        let position = self
            .dialect
            .builtin_name(BuiltIn::Position, StorageClass::Output)?;
        if self.options.fixup_clipspace {
            self.buf.statement(&format!(
                "{position}.z = 2.0 * {position}.z - {position}.w;"
            ));
        }
        if self.options.flip_vert_y {
            self.buf
                .statement(&format!("{position}.y = -{position}.y;"));
        }
        Ok(())
    }

    fn emit_if(
        &mut self,
        block: Id,
        condition: Id,
        true_block: Id,
        false_block: Id,
        merge: Id,
    ) -> Result<()> {
        let condition = self.read(condition)?;
        self.frames.push(Frame::Selection { merge });
        let then_empty = self.is_empty_edge(block, true_block)?;
        let else_empty = self.is_empty_edge(block, false_block)?;
        match (then_empty, else_empty) {
            (true, true) => {}
            (false, true) => {
                self.buf.line(&format!("if ({condition})"));
                self.buf.begin_scope();
                self.branch(block, true_block)?;
                self.buf.end_scope();
            }
            (true, false) => {
                self.buf.line(&format!("if ({})", negate(&condition)));
                self.buf.begin_scope();
                self.branch(block, false_block)?;
                self.buf.end_scope();
            }
            (false, false) => {
                self.buf.line(&format!("if ({condition})"));
                self.buf.begin_scope();
                self.branch(block, true_block)?;
                self.buf.end_scope();
                self.buf.line("else");
                self.buf.begin_scope();
                self.branch(block, false_block)?;
                self.buf.end_scope();
            }
        }
        self.frames.pop();
        self.follow_merge(merge)
    }

    /// A two-way branch without a selection construct: at least one side is
    /// expected to leave the current scope.
    fn emit_conditional(
        &mut self,
        block: Id,
        condition: Id,
        true_block: Id,
        false_block: Id,
    ) -> Result<()> {
        let condition = self.read(condition)?;
        let on_true = self.classify(true_block)?;
        let on_false = self.classify(false_block)?;
        let (guard, exit, rest) = if on_true.is_jump() {
            (condition, true_block, false_block)
        } else if on_false.is_jump() {
            (negate(&condition), false_block, true_block)
        } else {
            self.buf.line(&format!("if ({condition})"));
            self.buf.begin_scope();
            self.branch(block, true_block)?;
            self.buf.end_scope();
            if !self.is_empty_edge(block, false_block)? {
                self.buf.line("else");
                self.buf.begin_scope();
                self.branch(block, false_block)?;
                self.buf.end_scope();
            }
            return Ok(());
        };
        self.buf.line(&format!("if ({guard})"));
        self.buf.begin_scope();
        self.branch(block, exit)?;
        self.buf.end_scope();
        self.branch(block, rest)
    }

    fn emit_switch(
        &mut self,
        block: Id,
        selector: Id,
        default: Id,
        cases: &[(u64, Id)],
        merge: Id,
    ) -> Result<()> {
        self.require(Feature::Switch)?;
        let basetype = self.value_type(selector)?.basetype;
        let selector_text = self.read(selector)?;

        let position: HashMap<Id, usize> = self
            .ir
            .ids
            .get_function(self.function)?
            .blocks
            .iter()
            .enumerate()
            .map(|(index, &b)| (b, index))
            .collect();
        let mut targets: Vec<Id> = cases
            .iter()
            .map(|&(_, target)| target)
            .chain(std::iter::once(default))
            .filter(|&target| target != merge)
            .collect();
        targets.sort_by_key(|target| position.get(target).copied().unwrap_or(usize::MAX));
        targets.dedup();
        let merge_labels = (default != merge && cases.iter().any(|&(_, t)| t == merge))
            || self.has_phis(block, merge);
        if merge_labels {
            targets.push(merge);
        }

        self.buf.line(&format!("switch ({selector_text})"));
        self.buf.begin_scope();
        self.frames.push(Frame::Switch {
            merge,
            cases: targets.clone(),
            current: 0,
        });
        for (index, &target) in targets.iter().enumerate() {
            if let Some(Frame::Switch { current, .. }) = self.frames.last_mut() {
                *current = index;
            }
            for &(value, _) in cases.iter().filter(|&&(_, t)| t == target) {
                let label = scalar_literal(basetype, value)?;
                self.buf.line(&format!("case {label}:"));
            }
            if default == target {
                self.buf.line("default:");
            }
            self.buf.begin_scope();
            self.flush_phis(block, target)?;
            if target == merge {
                self.buf.statement("break;");
            } else {
                self.emit_block_chain(target)?;
            }
            self.buf.end_scope();
        }
        self.frames.pop();
        self.buf.end_scope();
        self.follow_merge(merge)
    }

    // ── Loops ───────────────────────────────────────────────────────────

    fn emit_loop(&mut self, header: Id) -> Result<()> {
        let Merge::Loop {
            merge_block: merge,
            continue_block,
        } = self.ir.ids.get_block(header)?.merge
        else {
            return Err(Error::internal(format!("%{header} is not a loop header")).at_id(header));
        };
        if !self.emitted_blocks.insert(header) && self.repeating == 0 {
            return Err(Error::unsupported(format!(
                "loop %{header} is reached along more than one structured path"
            ))
            .at_id(header));
        }
        self.emit_loop_prelude(header)?;

        let foldable = !self.state.disabled_loop_opts.contains(&header)
            && !self.scope()?.complex_continue_headers.contains(&header);
        let emitted = if continue_block == header {
            self.try_single_block_loop(header, merge)?
        } else if foldable {
            self.try_do_while(header, merge, continue_block)?
                || self.try_folded_loop(header, merge, continue_block)?
        } else {
            false
        };
        if !emitted {
            self.emit_generic_loop(header, merge, continue_block)?;
        }
        self.follow_merge(merge)
    }

    /// Declarations that must precede the loop statement.
    fn emit_loop_prelude(&mut self, header: Id) -> Result<()> {
        let (variables, temporaries) = {
            let b = self.ir.ids.get_block(header)?;
            let mut variables = b.hoisted_variables.clone();
            variables.extend(&b.dominated_variables);
            (variables, b.declare_temporary.clone())
        };
        for var in variables {
            self.declare_local(var)?;
        }
        for (ty, id) in temporaries {
            self.declare_temporary(ty, id)?;
        }
        Ok(())
    }

    /// `(type, name, initial value)` of each variable declared in the
    /// loop's `for` clause.
    fn loop_variables(&mut self, header: Id) -> Result<Vec<(Id, String, Option<String>)>> {
        let vars = self.ir.ids.get_block(header)?.loop_variables.clone();
        let mut entries = Vec::with_capacity(vars.len());
        for var in vars {
            let variable = self.ir.ids.get_variable(var)?.clone();
            let ty = self.ir.ids.pointee_type(variable.basetype)?.self_id;
            let initial = match self.loop_initializers.get(&var) {
                Some(text) => Some(text.clone()),
                None => match variable.initializer {
                    Some(initializer) => Some(self.read(initializer)?),
                    None => None,
                },
            };
            entries.push((ty, self.name_of(var), initial));
        }
        Ok(entries)
    }

    fn declare_loop_variables(&mut self, entries: &[(Id, String, Option<String>)]) -> Result<()> {
        for (ty, name, initial) in entries {
            let declaration = self.declare(*ty, name)?;
            match initial {
                Some(text) => self.buf.declaration(&format!("{declaration} = {text};")),
                None => self.buf.declaration(&format!("{declaration};")),
            }
        }
        Ok(())
    }

    /// The `for` initializer clause, or `None` after declaring the
    /// variables ahead of the loop when one clause cannot hold them.
    fn for_initializer(&mut self, header: Id) -> Result<Option<String>> {
        let entries = self.loop_variables(header)?;
        let Some((first_type, _, _)) = entries.first() else {
            return Ok(None);
        };
        let first_type = *first_type;
        let fits = entries
            .iter()
            .all(|(ty, _, initial)| *ty == first_type && initial.is_some());
        if !fits {
            self.declare_loop_variables(&entries)?;
            return Ok(None);
        }
        let mut parts = Vec::with_capacity(entries.len());
        for (index, (ty, name, initial)) in entries.iter().enumerate() {
            let initial = initial.as_deref().unwrap_or_default();
            if index == 0 {
                parts.push(format!("{} = {initial}", self.declare(*ty, name)?));
            } else {
                parts.push(format!("{name} = {initial}"));
            }
        }
        Ok(Some(parts.join(", ")))
    }

    /// `do { header } while (c);` for a loop that is its own continue
    /// block.
    fn try_single_block_loop(&mut self, header: Id, merge: Id) -> Result<bool> {
        let Terminator::Select {
            condition,
            true_block,
            false_block,
        } = self.ir.ids.get_block(header)?.terminator.clone()
        else {
            return Ok(false);
        };
        let negated = match (true_block == header, false_block == header) {
            (true, false) if false_block == merge => false,
            (false, true) if true_block == merge => true,
            _ => return Ok(false),
        };

        let entries = self.loop_variables(header)?;
        self.declare_loop_variables(&entries)?;
        self.buf.line("do");
        self.buf.begin_scope();
        self.loop_depth += 1;
        self.emit_block_ops(header)?;
        self.flush_phis(header, header)?;
        let condition = self.read(condition)?;
        let condition = if negated { negate(&condition) } else { condition };
        self.loop_depth -= 1;
        self.buf.end_scope_with(&format!(" while ({condition});"));
        self.loop_shapes.insert(header, LoopShape::DoWhile);
        self.flush_phis(header, merge)?;
        Ok(true)
    }

    /// `do { ... } while (c);` when the continue block ends in the loop's
    /// exit test.
    fn try_do_while(&mut self, header: Id, merge: Id, continue_block: Id) -> Result<bool> {
        let tail = self.ir.ids.get_block(continue_block)?;
        let Terminator::Select {
            condition,
            true_block,
            false_block,
        } = tail.terminator.clone()
        else {
            return Ok(false);
        };
        if tail.merge != Merge::None {
            return Ok(false);
        }
        let negated = match (true_block, false_block) {
            (t, f) if t == header && f == merge => false,
            (t, f) if f == header && t == merge => true,
            _ => return Ok(false),
        };

        let entries = self.loop_variables(header)?;
        self.declare_loop_variables(&entries)?;
        self.buf.line("do");
        self.buf.begin_scope();
        self.loop_depth += 1;
        self.frames.push(Frame::Loop {
            header,
            merge,
            continue_block,
            kind: LoopKind::DoWhile,
            continued: false,
        });
        self.emit_block_contents(header)?;
        self.buf.pop_line_if("continue;");
        let continued = matches!(
            self.frames.pop(),
            Some(Frame::Loop {
                continued: true,
                ..
            })
        );

        let mark = self.buf.mark();
        self.emitted_blocks.insert(continue_block);
        self.emit_block_ops(continue_block)?;
        self.flush_phis(continue_block, header)?;
        if continued && self.buf.statements_since(mark) > 0 {
            // `continue;` would skip these statements.
            debug!("continue block of %{header} has effects, cannot end a do-while");
            self.disable_loop_opt(header);
        }
        let condition = self.read(condition)?;
        let condition = if negated { negate(&condition) } else { condition };
        self.loop_depth -= 1;
        self.buf.end_scope_with(&format!(" while ({condition});"));
        self.loop_shapes.insert(header, LoopShape::DoWhile);
        self.flush_phis(continue_block, merge)?;
        Ok(true)
    }

    /// Match the header shapes that fold into a `for`/`while` statement.
    fn match_folded_loop(
        &self,
        header: Id,
        merge: Id,
        continue_block: Id,
    ) -> Result<Option<FoldedLoop>> {
        let block = self.ir.ids.get_block(header)?;
        let test_block = match block.terminator {
            Terminator::Select { .. } => header,
            Terminator::Direct(child)
                if child != merge && child != continue_block && child != header =>
            {
                let child_block = self.ir.ids.get_block(child)?;
                let only_entry = self.scope()?.cfg.predecessors(child) == [header];
                if child_block.merge != Merge::None
                    || !child_block.phi_variables.is_empty()
                    || !only_entry
                    || !matches!(child_block.terminator, Terminator::Select { .. })
                {
                    return Ok(None);
                }
                child
            }
            _ => return Ok(None),
        };
        let Terminator::Select {
            condition,
            true_block,
            false_block,
        } = self.ir.ids.get_block(test_block)?.terminator
        else {
            return Ok(None);
        };
        let (body, negate) = if false_block == merge {
            (true_block, false)
        } else if true_block == merge {
            (false_block, true)
        } else {
            return Ok(None);
        };
        if body == merge || self.has_phis(test_block, merge) || self.has_phis(test_block, body) {
            return Ok(None);
        }

        // The increment runs after the body but is written before it, so
        // it may not read anything the body defines.
        let tail = self.ir.ids.get_block(continue_block)?;
        if tail.terminator != Terminator::Direct(header) || tail.merge != Merge::None {
            return Ok(None);
        }
        let Some(info) = self.scope()?.cfg.loop_info(header) else {
            return Ok(None);
        };
        let mut body_results = BTreeSet::new();
        for &b in &info.body {
            if b == header || b == test_block || b == continue_block {
                continue;
            }
            for inst in &self.ir.ids.get_block(b)?.ops {
                if let Some(op) = inst.op() {
                    if let Some((_, id)) = result_of(op, self.ir.operands(inst)) {
                        body_results.insert(id);
                    }
                }
            }
        }
        let mut reads_body = tail
            .phi_variables
            .iter()
            .any(|phi| body_results.contains(&phi.local_variable));
        reads_body |= block
            .phi_variables
            .iter()
            .any(|phi| phi.parent == continue_block && body_results.contains(&phi.local_variable));
        for inst in &tail.ops {
            if let Some(op) = inst.op() {
                for_each_id_operand(op, self.ir.operands(inst), |id| {
                    reads_body |= body_results.contains(&id);
                });
            }
        }
        if reads_body {
            return Ok(None);
        }

        Ok(Some(FoldedLoop {
            test_block,
            condition,
            negate,
            body,
        }))
    }

    /// `for (init; c; increment)` or `while (c)`, emitted tentatively.
    fn try_folded_loop(&mut self, header: Id, merge: Id, continue_block: Id) -> Result<bool> {
        let Some(shape) = self.match_folded_loop(header, merge, continue_block)? else {
            return Ok(false);
        };

        let mark = self.buf.mark();
        let snapshot = self.track.clone();
        let abandon = |this: &mut Self, reason: &str| {
            debug!("loop %{header} cannot be folded: {reason}");
            this.buf.truncate(mark);
            this.track = snapshot.clone();
            this.folding = None;
            this.loop_depth -= 1;
            if shape.test_block != header {
                this.emitted_blocks.remove(&shape.test_block);
            }
            this.disable_loop_opt(header);
        };

        let initializer = self.for_initializer(header)?;
        let header_mark = self.buf.mark();
        self.folding = Some(header);
        self.loop_depth += 1;
        self.emit_block_ops(header)?;
        if shape.test_block != header {
            self.emitted_blocks.insert(shape.test_block);
            self.emit_block_ops(shape.test_block)?;
        }
        if self.buf.statements_since(header_mark) > 0 {
            abandon(self, "the header has statements");
            return Ok(false);
        }
        let condition = self.read(shape.condition)?;
        let condition = if shape.negate {
            negate(&condition)
        } else {
            condition
        };

        // Capture the continue block as an expression list.
        let increment_mark = self.buf.mark();
        let increment_track = self.track.clone();
        self.read_log = Some(Vec::new());
        self.emit_block_ops(continue_block)?;
        self.flush_phis(continue_block, header)?;
        let logged = self.read_log.take().unwrap_or_default();
        let lines = self.buf.lines_since(increment_mark);
        let declared = self.buf.declarations_since(increment_mark) > 0;
        self.buf.truncate(increment_mark);
        self.track = increment_track;
        self.folding = None;
        if declared || !lines.iter().all(|line| line.ends_with(';')) {
            abandon(self, "the continue block is not an expression list");
            return Ok(false);
        }
        let increment = lines
            .iter()
            .map(|line| line.trim_end_matches(';'))
            .collect::<Vec<_>>()
            .join(", ");
        self.emitted_blocks.insert(continue_block);

        let (statement, loop_shape) = match (&initializer, increment.is_empty()) {
            (None, true) => (format!("while ({condition})"), LoopShape::While),
            (init, _) => (
                format!(
                    "for ({}; {condition}; {increment})",
                    init.as_deref().unwrap_or_default()
                ),
                LoopShape::For,
            ),
        };
        self.buf.line(&statement);
        self.buf.begin_scope();
        self.frames.push(Frame::Loop {
            header,
            merge,
            continue_block,
            kind: LoopKind::Folded,
            continued: false,
        });
        self.branch(shape.test_block, shape.body)?;
        self.buf.pop_line_if("continue;");
        self.frames.pop();
        self.buf.end_scope();
        self.loop_depth -= 1;

        // The increment reads values from before the body; they must not
        // have been written since.
        let increment_results: BTreeSet<Id> = {
            let tail = self.ir.ids.get_block(continue_block)?;
            tail.ops
                .iter()
                .filter_map(|inst| result_of(inst.op()?, self.ir.operands(inst)).map(|(_, id)| id))
                .collect()
        };
        for id in logged {
            if increment_results.contains(&id) {
                continue;
            }
            let stale = self
                .ir
                .ids
                .handle(id)
                .is_some_and(|handle| self.track.invalid.contains(&handle));
            if stale {
                self.force(id);
            }
        }

        self.loop_shapes.insert(header, loop_shape);
        Ok(true)
    }

    /// `for (;;)` with explicit exits; the continue block is emitted at
    /// each branch to it.
    fn emit_generic_loop(&mut self, header: Id, merge: Id, continue_block: Id) -> Result<()> {
        let entries = self.loop_variables(header)?;
        self.declare_loop_variables(&entries)?;
        self.buf.line("for (;;)");
        self.buf.begin_scope();
        self.loop_depth += 1;
        self.frames.push(Frame::Loop {
            header,
            merge,
            continue_block,
            kind: LoopKind::Inline,
            continued: false,
        });
        self.emit_block_contents(header)?;
        self.buf.pop_line_if("continue;");
        self.frames.pop();
        self.loop_depth -= 1;
        self.buf.end_scope();
        self.loop_shapes.insert(header, LoopShape::Complex);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jumps_leave_the_scope() {
        assert!(Target::Break.is_jump());
        assert!(Target::InlineContinue.is_jump());
        assert!(Target::BackEdge.is_jump());
        assert!(!Target::Fallthrough.is_jump());
        assert!(!Target::SwitchFallthrough.is_jump());
        assert!(!Target::Follow.is_jump());
    }

    #[test]
    fn negation_encloses_compound_conditions() {
        assert_eq!(negate("c"), "!c");
        assert_eq!(negate("a < b"), "!(a < b)");
    }
}
