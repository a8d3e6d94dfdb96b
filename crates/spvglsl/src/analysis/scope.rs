//! Variable scope and temporary analysis.
//!
//! For every function-local variable and SSA temporary this pass records
//! the set of blocks that touch it and runs a [`DominatorBuilder`] over that
//! set. The resulting block is where the entity is declared. On top of the
//! dominator answer:
//!
//! - variables that must survive loop iterations are declared before the
//!   outermost loop that contains their dominator but not all of their
//!   accesses;
//! - variables with a single constant write that dominates every read
//!   become constants;
//! - scalar variables carried through a loop's continue block become `for`
//!   initializer variables when their initial value is statically known;
//! - temporaries whose uses escape the block that would normally declare
//!   them are hoisted and always materialized.
//!
//! The per-function walk does not follow calls.

use super::visitor::{reachable_blocks, traverse_all_reachable_opcodes, OpcodeHandler};
use crate::cfg::{Cfg, DominatorBuilder};
use crate::error::Result;
use crate::ir::opcode::{for_each_id_operand, result_of};
use crate::ir::{Id, NodeKind, ParsedIr, SpirBlock};
use log::debug;
use spirv::Op;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Where a variable's declaration is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclSite {
    /// Top of the function body.
    FunctionTop,
    /// Start of the given block.
    BlockStart(Id),
    /// Immediately before the loop statement of the given header.
    BeforeLoop(Id),
    /// Inside the `for` initializer clause of the given header.
    LoopInitializer(Id),
}

/// Scope decisions for one function.
#[derive(Debug, Clone)]
pub struct FunctionScope {
    pub function: Id,
    pub cfg: Cfg,
    pub declaration_sites: BTreeMap<Id, DeclSite>,
    /// Temporaries declared ahead of their definition and always
    /// materialized.
    pub hoisted_temporaries: BTreeSet<Id>,
    /// Variables emitted as constants.
    pub lut_variables: BTreeSet<Id>,
    pub loop_variables: BTreeSet<Id>,
    /// Loop headers whose continue block cannot be folded into a `for`
    /// increment clause.
    pub complex_continue_headers: BTreeSet<Id>,
}

// ── Access collection ───────────────────────────────────────────────────

struct AccessHandler {
    locals: BTreeSet<Id>,
    current_block: Id,
    variables: BTreeMap<Id, BTreeSet<Id>>,
    temporaries: BTreeMap<Id, BTreeSet<Id>>,
    result_types: HashMap<Id, Id>,
    chains: HashMap<Id, Id>,
    /// Whole-value stores: variable → (block, stored value).
    complete_writes: BTreeMap<Id, Vec<(Id, Id)>>,
    /// Variables written through a derived pointer or handed to a call.
    partial_writes: BTreeSet<Id>,
}

impl AccessHandler {
    fn new(ir: &ParsedIr, function: Id) -> Result<Self> {
        let locals = ir
            .ids
            .get_function(function)?
            .local_variables
            .iter()
            .copied()
            .collect();

        let mut result_types = HashMap::new();
        for block in reachable_blocks(ir, function)? {
            for inst in &ir.ids.get_block(block)?.ops {
                if let Some(op) = inst.op() {
                    if let Some((Some(ty), id)) = result_of(op, ir.operands(inst)) {
                        result_types.insert(id, ty);
                    }
                }
            }
        }

        Ok(AccessHandler {
            locals,
            current_block: 0,
            variables: BTreeMap::new(),
            temporaries: BTreeMap::new(),
            result_types,
            chains: HashMap::new(),
            complete_writes: BTreeMap::new(),
            partial_writes: BTreeSet::new(),
        })
    }

    fn root(&self, id: Id) -> Id {
        self.chains.get(&id).copied().unwrap_or(id)
    }

    fn local_root(&self, id: Id) -> Option<Id> {
        let root = self.root(id);
        self.locals.contains(&root).then_some(root)
    }

    fn notify(&mut self, id: Id, block: Id) {
        if let Some(root) = self.local_root(id) {
            self.variables.entry(root).or_default().insert(block);
        }
        if self.result_types.contains_key(&id) {
            self.temporaries.entry(id).or_default().insert(block);
        }
    }
}

impl OpcodeHandler for AccessHandler {
    fn handle(&mut self, _ir: &ParsedIr, op: Op, operands: &[u32]) -> Result<bool> {
        let block = self.current_block;
        match op {
            Op::Store | Op::CopyMemory => {
                if let [target, source, ..] = operands {
                    if let Some(root) = self.local_root(*target) {
                        if root == *target {
                            let value = if op == Op::Store { *source } else { 0 };
                            self.complete_writes
                                .entry(root)
                                .or_default()
                                .push((block, value));
                        } else {
                            self.partial_writes.insert(root);
                        }
                    }
                    self.notify(*target, block);
                    self.notify(*source, block);
                }
            }
            Op::Load => {
                if let [_, result, pointer, ..] = operands {
                    self.notify(*pointer, block);
                    self.notify(*result, block);
                }
            }
            Op::AccessChain | Op::InBoundsAccessChain | Op::PtrAccessChain => {
                if let [_, result, base, ..] = operands {
                    let root = self.root(*base);
                    self.chains.insert(*result, root);
                }
                let mut ids = Vec::new();
                for_each_id_operand(op, operands, |id| ids.push(id));
                for id in ids {
                    self.notify(id, block);
                }
                if let Some((_, result)) = result_of(op, operands) {
                    self.notify(result, block);
                }
            }
            _ => {
                let mut ids = Vec::new();
                for_each_id_operand(op, operands, |id| ids.push(id));
                for id in ids {
                    // Any other use of a variable pointer may write through it.
                    if let Some(root) = self.local_root(id) {
                        self.partial_writes.insert(root);
                    }
                    self.notify(id, block);
                }
                if let Some((_, result)) = result_of(op, operands) {
                    self.notify(result, block);
                }
            }
        }
        Ok(true)
    }

    fn handle_terminator(&mut self, ir: &ParsedIr, block: &SpirBlock) -> Result<bool> {
        let from = block.self_id;
        for id in block.terminator.used_ids() {
            self.notify(id, from);
        }
        // Branching into a block with phis writes the phi variables here.
        for succ in block.terminator.successors() {
            let Some(next) = ir.ids.maybe_block(succ) else {
                continue;
            };
            for phi in next.phi_variables.iter().filter(|phi| phi.parent == from) {
                let accesses = self.variables.entry(phi.function_variable).or_default();
                accesses.insert(from);
                accesses.insert(succ);
                self.notify(phi.local_variable, from);
            }
        }
        Ok(true)
    }

    fn follow_function_call(&self, _callee: Id) -> bool {
        false
    }

    fn set_current_block(&mut self, _ir: &ParsedIr, block: &SpirBlock) {
        self.current_block = block.self_id;
    }
}

// ── Analysis ────────────────────────────────────────────────────────────

/// Whether `block` may read `var` before writing all of it.
fn may_read_undefined(ir: &ParsedIr, handler: &AccessHandler, block: Id, var: Id) -> Result<bool> {
    for inst in &ir.ids.get_block(block)?.ops {
        let Some(op) = inst.op() else {
            continue;
        };
        let operands = ir.operands(inst);
        match op {
            Op::Store | Op::CopyMemory => {
                if operands.first() == Some(&var) {
                    return Ok(false);
                }
                if operands.get(1).is_some_and(|&src| handler.root(src) == var) {
                    return Ok(true);
                }
            }
            _ => {
                let mut touches = false;
                for_each_id_operand(op, operands, |id| {
                    touches |= handler.root(id) == var;
                });
                if touches {
                    return Ok(true);
                }
            }
        }
    }
    // Not touched by the body, so it is read by a terminator or a phi.
    Ok(true)
}

/// Outermost loop containing `dominator` whose construct misses at least
/// one access.
fn escaping_loop(cfg: &Cfg, dominator: Id, accesses: &BTreeSet<Id>) -> Option<Id> {
    cfg.enclosing_loops(dominator).into_iter().find(|&header| {
        cfg.loop_info(header)
            .is_some_and(|info| accesses.iter().any(|b| !info.body.contains(b)))
    })
}

/// Blocks reachable from `start` without following back edges.
fn forward_reachable(cfg: &Cfg, start: Id) -> BTreeSet<Id> {
    let mut seen = BTreeSet::new();
    if !cfg.is_reachable(start) {
        return seen;
    }
    let mut stack = vec![start];
    seen.insert(start);
    while let Some(block) = stack.pop() {
        for &succ in cfg.successors(block) {
            if !cfg.is_back_edge(block, succ) && seen.insert(succ) {
                stack.push(succ);
            }
        }
    }
    seen
}

/// Analyze one function and annotate its variables and blocks.
pub fn analyze_variable_scope(ir: &mut ParsedIr, function: Id) -> Result<FunctionScope> {
    let cfg = Cfg::new(ir, function)?;
    let mut handler = AccessHandler::new(ir, function)?;
    traverse_all_reachable_opcodes(ir, function, &mut handler)?;
    let entry = cfg.entry();

    let mut scope = FunctionScope {
        function,
        cfg,
        declaration_sites: BTreeMap::new(),
        hoisted_temporaries: BTreeSet::new(),
        lut_variables: BTreeSet::new(),
        loop_variables: BTreeSet::new(),
        complex_continue_headers: BTreeSet::new(),
    };
    let cfg = &scope.cfg;

    // Variables: dominator, lookup-table promotion, loop-variable candidates.
    let mut dominators: BTreeMap<Id, Id> = BTreeMap::new();
    let mut potential_loop_variables: BTreeMap<Id, Option<Id>> = BTreeMap::new();
    let mut static_constants: BTreeMap<Id, Id> = BTreeMap::new();

    for (&var_id, blocks) in &handler.variables {
        let var = ir.ids.get_variable(var_id)?;
        if var.parameter {
            continue;
        }

        let mut builder = DominatorBuilder::new(cfg);
        for &block in blocks {
            builder.add_block(block);
            if blocks.len() != 1 && ir.is_continue_block(block) {
                potential_loop_variables
                    .entry(var_id)
                    .and_modify(|slot| *slot = None)
                    .or_insert(Some(block));
            }
        }
        builder.lift_continue_block_dominator();
        let Some(mut dominator) = builder.get_dominator() else {
            continue;
        };

        // Values that must survive iterations are declared outside the loop.
        let preserve = !var.phi_variable && may_read_undefined(ir, &handler, dominator, var_id)?;
        let outer = if preserve {
            cfg.enclosing_loops(dominator).first().copied()
        } else {
            escaping_loop(cfg, dominator, blocks)
        };
        if let Some(header) = outer.filter(|&h| h != dominator) {
            builder.add_block(header);
            dominator = builder.get_dominator().unwrap_or(header);
        }
        dominators.insert(var_id, dominator);

        if var.phi_variable || handler.partial_writes.contains(&var_id) {
            continue;
        }
        let writes = handler
            .complete_writes
            .get(&var_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let is_constant = |id: Id| ir.ids.kind(id) == NodeKind::Constant;
        let promoted = match (writes, var.initializer) {
            ([], Some(init)) if is_constant(init) => Some(init),
            ([(store_block, value)], None)
                if is_constant(*value)
                    && blocks.iter().all(|&b| cfg.dominates(*store_block, b))
                    && !may_read_undefined(ir, &handler, *store_block, var_id)? =>
            {
                dominator = *store_block;
                dominators.insert(var_id, dominator);
                Some(*value)
            }
            _ => None,
        };
        if let Some(constant) = promoted {
            static_constants.insert(var_id, constant);
        }
    }

    // Loop variables: the initializer must be statically known and the
    // variable must be dead after the loop.
    let mut loop_variables: BTreeMap<Id, Vec<Id>> = BTreeMap::new();
    for (&var_id, continue_block) in &potential_loop_variables {
        let Some(continue_block) = *continue_block else {
            continue;
        };
        let Some(&dominator) = dominators.get(&var_id) else {
            continue;
        };
        if static_constants.contains_key(&var_id) {
            continue;
        }
        let Some(&header) = ir.continue_blocks.get(&continue_block) else {
            continue;
        };
        if dominator == header {
            continue;
        }
        let var = ir.ids.get_variable(var_id)?;
        if !ir.ids.pointee_type(var.basetype)?.is_scalar() {
            continue;
        }
        let blocks = &handler.variables[&var_id];

        let mut has_accessed = blocks.contains(&header);
        let mut static_init = true;
        let mut current = dominator;
        let mut steps = 0;
        while current != header {
            if blocks.contains(&current) {
                has_accessed = true;
            }
            let succs = cfg.successors(current);
            steps += 1;
            if succs.len() != 1 || steps > cfg.post_order().len() {
                static_init = false;
                break;
            }
            let next = succs[0];
            if cfg.predecessors(next).len() != 1 && next != header {
                static_init = false;
                break;
            }
            current = next;
        }
        if !static_init || !has_accessed {
            continue;
        }

        let Some(info) = cfg.loop_info(header) else {
            continue;
        };
        let after_loop = forward_reachable(cfg, info.merge);
        if blocks.iter().any(|b| after_loop.contains(b)) {
            continue;
        }
        loop_variables.entry(header).or_default().push(var_id);
    }

    // Temporaries.
    let mut declare_temporaries: BTreeMap<Id, Vec<(Id, Id)>> = BTreeMap::new();
    for (&temp, blocks) in &handler.temporaries {
        let Some(&type_id) = handler.result_types.get(&temp) else {
            continue;
        };
        let Some(ty) = ir.ids.maybe_type(type_id) else {
            continue;
        };

        let mut builder = DominatorBuilder::new(cfg);
        let mut used_in_continue = None;
        for &block in blocks {
            builder.add_block(block);
            if blocks.len() != 1 {
                if let Some(&header) = ir.continue_blocks.get(&block) {
                    builder.add_block(header);
                    used_in_continue = Some(header);
                }
            }
        }
        let Some(dominator) = builder.get_dominator() else {
            continue;
        };

        if ty.pointer {
            // Pointer expressions cannot be materialized; their index
            // operands must stay in scope of the continue block instead.
            if let Some(header) = used_in_continue {
                if !blocks.contains(&dominator) {
                    scope.complex_continue_headers.insert(header);
                }
            }
            continue;
        }
        if ty.basetype.is_opaque() || ty.basetype == crate::ir::BaseType::Void {
            continue;
        }

        let single_block_loop = blocks.len() != 1
            && ir.ids.get_block(dominator)?.continue_block() == Some(dominator);
        let target = match escaping_loop(cfg, dominator, blocks) {
            Some(header) => Some(header),
            None if !blocks.contains(&dominator) || single_block_loop => Some(dominator),
            None => None,
        };
        if let Some(target) = target {
            scope.hoisted_temporaries.insert(temp);
            declare_temporaries
                .entry(target)
                .or_default()
                .push((type_id, temp));
        }
    }

    // ── Apply annotations ───────────────────────────────────────────────

    let function_blocks = ir.ids.get_function(function)?.blocks.clone();
    for &block_id in &function_blocks {
        let block = ir.ids.get_block_mut(block_id)?;
        block.dominated_variables.clear();
        block.loop_variables.clear();
        block.hoisted_variables.clear();
        block.declare_temporary.clear();
        block.loop_dominator = scope.cfg.innermost_loop(block_id);
    }

    for (header, vars) in &loop_variables {
        for &var_id in vars {
            scope.loop_variables.insert(var_id);
            scope
                .declaration_sites
                .insert(var_id, DeclSite::LoopInitializer(*header));
            let var = ir.ids.get_variable_mut(var_id)?;
            var.loop_variable = true;
            var.deferred_declaration = true;
            var.dominator = Some(*header);
        }
        ir.ids.get_block_mut(*header)?.loop_variables = vars.clone();
    }

    for (&var_id, &dominator) in &dominators {
        if scope.loop_variables.contains(&var_id) {
            continue;
        }
        let is_header = scope.cfg.is_loop_header(dominator);
        let site = if dominator == entry {
            DeclSite::FunctionTop
        } else if is_header {
            DeclSite::BeforeLoop(dominator)
        } else {
            DeclSite::BlockStart(dominator)
        };
        scope.declaration_sites.insert(var_id, site);

        let var = ir.ids.get_variable_mut(var_id)?;
        var.dominator = Some(dominator);
        var.deferred_declaration = dominator != entry;
        var.loop_variable = false;
        if let Some(&constant) = static_constants.get(&var_id) {
            var.static_expression = Some(constant);
            scope.lut_variables.insert(var_id);
            ir.ids.get_constant_mut(constant)?.is_used_as_lut = true;
        }

        let block = ir.ids.get_block_mut(dominator)?;
        if is_header && dominator != entry {
            block.hoisted_variables.push(var_id);
        } else {
            block.dominated_variables.push(var_id);
        }
    }

    for (block_id, temps) in declare_temporaries {
        ir.ids.get_block_mut(block_id)?.declare_temporary = temps;
    }

    debug!(
        "scope of %{function}: {} variables placed, {} loop variables, {} constants, {} hoisted temporaries",
        scope.declaration_sites.len(),
        scope.loop_variables.len(),
        scope.lut_variables.len(),
        scope.hoisted_temporaries.len()
    );
    Ok(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::tests::function_ir;
    use crate::ir::builder::build_ir;
    use crate::ir::{Merge, Terminator};
    use crate::parser::parse_words;

    fn op(opcode: Op, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![((operands.len() as u32 + 1) << 16) | opcode as u32];
        words.extend_from_slice(operands);
        words
    }

    const FUNCTION: u32 = spirv::StorageClass::Function as u32;

    /// Build a module whose function %9 has the given body and analyze it.
    ///
    /// %1 void, %2 void(), %3 int, %4 bool, %5 int*, %6 = 0, %7 = 1, %8 = 10.
    fn analyze(body: &[Vec<u32>]) -> (ParsedIr, FunctionScope) {
        let mut words = vec![spirv::MAGIC_NUMBER, 0x0001_0000, 0, 64, 0];
        let prelude = [
            op(Op::TypeVoid, &[1]),
            op(Op::TypeFunction, &[2, 1]),
            op(Op::TypeInt, &[3, 32, 1]),
            op(Op::TypeBool, &[4]),
            op(Op::TypePointer, &[5, FUNCTION, 3]),
            op(Op::Constant, &[3, 6, 0]),
            op(Op::Constant, &[3, 7, 1]),
            op(Op::Constant, &[3, 8, 10]),
            op(Op::Function, &[1, 9, 0, 2]),
        ];
        for inst in prelude.iter().chain(body) {
            words.extend_from_slice(inst);
        }
        words.extend(op(Op::FunctionEnd, &[]));
        let mut ir = build_ir(parse_words(&words).unwrap()).unwrap();
        let scope = analyze_variable_scope(&mut ir, 9).unwrap();
        (ir, scope)
    }

    /// `i = 0; for (; i < 10; ) { body } continue: { latch }` with the
    /// exit test in block %15 under an empty header %12.
    fn counting_loop(body: &[Vec<u32>], latch: &[Vec<u32>]) -> Vec<Vec<u32>> {
        let mut insts = vec![
            op(Op::Label, &[10]),
            op(Op::Variable, &[5, 11, FUNCTION]),
            op(Op::Variable, &[5, 22, FUNCTION]),
            op(Op::Store, &[11, 6]),
            op(Op::Branch, &[12]),
            op(Op::Label, &[12]),
            op(Op::LoopMerge, &[14, 13, 0]),
            op(Op::Branch, &[15]),
            op(Op::Label, &[15]),
            op(Op::Load, &[3, 16, 11]),
            op(Op::SLessThan, &[4, 17, 16, 8]),
            op(Op::BranchConditional, &[17, 18, 14]),
            op(Op::Label, &[18]),
        ];
        insts.extend_from_slice(body);
        insts.push(op(Op::Branch, &[13]));
        insts.push(op(Op::Label, &[13]));
        insts.extend_from_slice(latch);
        insts.push(op(Op::Branch, &[12]));
        insts.push(op(Op::Label, &[14]));
        insts.push(op(Op::Return, &[]));
        insts
    }

    fn increment(load: u32, sum: u32) -> Vec<Vec<u32>> {
        vec![
            op(Op::Load, &[3, load, 11]),
            op(Op::IAdd, &[3, sum, load, 7]),
            op(Op::Store, &[11, sum]),
        ]
    }

    #[test]
    fn counter_stepped_in_the_continue_block_is_a_loop_variable() {
        let (ir, scope) = analyze(&counting_loop(&[], &increment(19, 20)));
        assert_eq!(scope.loop_variables, BTreeSet::from([11]));
        assert_eq!(scope.declaration_sites[&11], DeclSite::LoopInitializer(12));
        assert_eq!(ir.ids.get_block(12).unwrap().loop_variables, vec![11]);
        let var = ir.ids.get_variable(11).unwrap();
        assert!(var.loop_variable);
        assert_eq!(var.dominator, Some(12));
    }

    #[test]
    fn counter_stepped_in_the_body_stays_at_function_top() {
        let (ir, scope) = analyze(&counting_loop(&increment(19, 20), &[]));
        assert!(scope.loop_variables.is_empty());
        assert_eq!(scope.declaration_sites[&11], DeclSite::FunctionTop);
        assert!(ir.ids.get_block(10).unwrap().dominated_variables.contains(&11));
        assert!(!ir.ids.get_variable(11).unwrap().loop_variable);
    }

    #[test]
    fn counter_read_after_the_loop_is_not_a_loop_variable() {
        let mut insts = counting_loop(&[], &increment(19, 20));
        let ret = insts.pop().unwrap();
        insts.push(op(Op::Load, &[3, 21, 11]));
        insts.push(ret);
        let (_, scope) = analyze(&insts);
        assert!(scope.loop_variables.is_empty());
        assert_eq!(scope.declaration_sites[&11], DeclSite::FunctionTop);
    }

    #[test]
    fn variable_touched_only_in_the_continue_block_is_declared_before_the_loop() {
        let mut latch = increment(19, 20);
        latch.push(op(Op::Store, &[22, 20]));
        let (ir, scope) = analyze(&counting_loop(&[], &latch));
        assert_eq!(scope.declaration_sites[&22], DeclSite::BeforeLoop(12));
        assert!(ir.ids.get_block(12).unwrap().hoisted_variables.contains(&22));
        assert!(!scope.lut_variables.contains(&22));
    }

    #[test]
    fn value_used_after_its_loop_is_hoisted_to_the_header() {
        let insts = vec![
            op(Op::Label, &[10]),
            op(Op::Variable, &[5, 11, FUNCTION]),
            op(Op::Store, &[11, 6]),
            op(Op::Branch, &[12]),
            op(Op::Label, &[12]),
            op(Op::Load, &[3, 16, 11]),
            op(Op::SLessThan, &[4, 17, 16, 8]),
            op(Op::LoopMerge, &[14, 13, 0]),
            op(Op::BranchConditional, &[17, 18, 14]),
            op(Op::Label, &[18]),
            op(Op::Branch, &[13]),
            op(Op::Label, &[13]),
            op(Op::Load, &[3, 19, 11]),
            op(Op::IAdd, &[3, 20, 19, 7]),
            op(Op::Store, &[11, 20]),
            op(Op::Branch, &[12]),
            op(Op::Label, &[14]),
            op(Op::IAdd, &[3, 21, 16, 7]),
            op(Op::Store, &[11, 21]),
            op(Op::Return, &[]),
        ];
        let (ir, scope) = analyze(&insts);
        assert!(scope.hoisted_temporaries.contains(&16));
        assert!(!scope.hoisted_temporaries.contains(&17));
        assert!(!scope.hoisted_temporaries.contains(&20));
        let header = ir.ids.get_block(12).unwrap();
        assert_eq!(header.declare_temporary, vec![(3, 16)]);
    }

    /// entry(10) → header(11) ⇄ latch(12); 11 → merge(13) → exit(14)
    fn loop_cfg() -> Cfg {
        let ir = function_ir(&[
            (10, Terminator::Direct(11), Merge::None),
            (
                11,
                Terminator::Select {
                    condition: 40,
                    true_block: 12,
                    false_block: 13,
                },
                Merge::Loop {
                    merge_block: 13,
                    continue_block: 12,
                },
            ),
            (12, Terminator::Direct(11), Merge::None),
            (13, Terminator::Direct(14), Merge::None),
            (14, Terminator::Return(None), Merge::None),
        ]);
        Cfg::new(&ir, 1).unwrap()
    }

    #[test]
    fn forward_walk_ignores_back_edges() {
        let cfg = loop_cfg();
        let from_latch = forward_reachable(&cfg, 12);
        assert_eq!(from_latch, BTreeSet::from([12]));
        let from_merge = forward_reachable(&cfg, 13);
        assert_eq!(from_merge, BTreeSet::from([13, 14]));
    }

    #[test]
    fn accesses_after_the_loop_escape_it() {
        let cfg = loop_cfg();
        assert_eq!(escaping_loop(&cfg, 12, &BTreeSet::from([12, 14])), Some(11));
        assert_eq!(escaping_loop(&cfg, 12, &BTreeSet::from([11, 12])), None);
        assert_eq!(escaping_loop(&cfg, 13, &BTreeSet::from([13, 14])), None);
    }
}
