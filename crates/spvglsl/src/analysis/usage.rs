//! Reachability-driven usage analyses built on the opcode visitor.

use super::visitor::OpcodeHandler;
use crate::error::Result;
use crate::ir::opcode::{classify, for_each_id_operand, OpFamily};
use crate::ir::{Id, ParsedIr, SpirBlock, Terminator};
use spirv::{BuiltIn, Op, StorageClass};
use std::collections::{BTreeSet, HashMap};

/// Root variable of a pointer, following access chains.
fn pointer_root(chains: &HashMap<Id, Id>, pointer: Id) -> Id {
    chains.get(&pointer).copied().unwrap_or(pointer)
}

fn record_access_chain(chains: &mut HashMap<Id, Id>, op: Op, operands: &[u32]) {
    if matches!(
        op,
        Op::AccessChain | Op::InBoundsAccessChain | Op::PtrAccessChain
    ) {
        if let [_, result, base, ..] = operands {
            let root = pointer_root(chains, *base);
            chains.insert(*result, root);
        }
    }
}

// ── Interface variables ─────────────────────────────────────────────────

/// Collects every module-scope variable touched by reachable code.
#[derive(Debug, Default)]
pub struct InterfaceVariableHandler {
    pub variables: BTreeSet<Id>,
}

impl InterfaceVariableHandler {
    fn touch(&mut self, ir: &ParsedIr, id: Id) {
        if let Some(var) = ir.ids.maybe_variable(id) {
            if var.storage != StorageClass::Function {
                self.variables.insert(id);
            }
        }
    }
}

impl OpcodeHandler for InterfaceVariableHandler {
    fn handle(&mut self, ir: &ParsedIr, op: Op, operands: &[u32]) -> Result<bool> {
        for_each_id_operand(op, operands, |id| self.touch(ir, id));
        Ok(true)
    }

    fn handle_terminator(&mut self, ir: &ParsedIr, block: &SpirBlock) -> Result<bool> {
        for id in block.terminator.used_ids() {
            self.touch(ir, id);
        }
        for phi in &block.phi_variables {
            self.touch(ir, phi.local_variable);
        }
        Ok(true)
    }
}

// ── Side effects ────────────────────────────────────────────────────────

/// Decides whether a function (and everything it calls) is free of
/// visible side effects.
#[derive(Debug)]
pub struct SideEffectHandler {
    chains: HashMap<Id, Id>,
    pub pure: bool,
}

impl Default for SideEffectHandler {
    fn default() -> Self {
        SideEffectHandler {
            chains: HashMap::new(),
            pure: true,
        }
    }
}

impl SideEffectHandler {
    fn writes_visible_memory(&self, ir: &ParsedIr, pointer: Id) -> bool {
        let root = pointer_root(&self.chains, pointer);
        match ir.ids.maybe_variable(root) {
            Some(var) => var.parameter || var.storage != StorageClass::Function,
            // Pointers we cannot resolve are treated as escaping.
            None => true,
        }
    }
}

impl OpcodeHandler for SideEffectHandler {
    fn handle(&mut self, ir: &ParsedIr, op: Op, operands: &[u32]) -> Result<bool> {
        record_access_chain(&mut self.chains, op, operands);
        let impure = match op {
            Op::Store | Op::CopyMemory => operands
                .first()
                .is_some_and(|&ptr| self.writes_visible_memory(ir, ptr)),
            Op::ImageWrite | Op::EmitVertex | Op::EndPrimitive => true,
            _ => matches!(classify(op), OpFamily::Atomic | OpFamily::Barrier),
        };
        if impure {
            self.pure = false;
        }
        Ok(self.pure)
    }

    fn handle_terminator(&mut self, _ir: &ParsedIr, block: &SpirBlock) -> Result<bool> {
        if block.terminator == Terminator::Kill {
            self.pure = false;
        }
        Ok(self.pure)
    }
}

// ── Active builtins ─────────────────────────────────────────────────────

/// Builtins read or written by reachable code.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActiveBuiltins {
    /// Builtins (as raw `BuiltIn` values) on input variables.
    pub inputs: BTreeSet<u32>,
    pub outputs: BTreeSet<u32>,
    pub clip_distance_count: u32,
    pub cull_distance_count: u32,
}

impl ActiveBuiltins {
    pub fn is_active(&self, builtin: BuiltIn) -> bool {
        self.inputs.contains(&(builtin as u32)) || self.outputs.contains(&(builtin as u32))
    }
}

#[derive(Debug, Default)]
pub struct ActiveBuiltinHandler {
    pub builtins: ActiveBuiltins,
    chains: HashMap<Id, Id>,
    /// Access chain → constant member index into a builtin block.
    member_index: HashMap<Id, u32>,
}

impl ActiveBuiltinHandler {
    fn record(&mut self, ir: &ParsedIr, storage: StorageClass, builtin: BuiltIn, type_id: Id) {
        let set = match storage {
            StorageClass::Input => &mut self.builtins.inputs,
            StorageClass::Output => &mut self.builtins.outputs,
            _ => return,
        };
        set.insert(builtin as u32);

        let array_size = ir
            .ids
            .pointee_type(type_id)
            .ok()
            .and_then(|ty| match (ty.array.first(), ty.array_size_literal.first()) {
                (Some(&n), Some(true)) => Some(n),
                _ => None,
            })
            .unwrap_or(0);
        match builtin {
            BuiltIn::ClipDistance => {
                self.builtins.clip_distance_count = self.builtins.clip_distance_count.max(array_size)
            }
            BuiltIn::CullDistance => {
                self.builtins.cull_distance_count = self.builtins.cull_distance_count.max(array_size)
            }
            _ => {}
        }
    }

    fn touch(&mut self, ir: &ParsedIr, id: Id) {
        let root = pointer_root(&self.chains, id);
        let Some(var) = ir.ids.maybe_variable(root) else {
            return;
        };
        if let Some(builtin) = ir.meta.builtin(root) {
            self.record(ir, var.storage, builtin, var.basetype);
            return;
        }

        // Builtin blocks such as gl_PerVertex: resolve the member when the
        // chain indexes it with a constant.
        let Ok(block_type) = ir.ids.pointee_type(var.basetype) else {
            return;
        };
        let block_type_id = block_type.self_id;
        let member_types = block_type.member_types.clone();
        match self.member_index.get(&id).copied() {
            Some(index) => {
                if let (Some(builtin), Some(&member_type)) = (
                    ir.meta.member_builtin(block_type_id, index as usize),
                    member_types.get(index as usize),
                ) {
                    self.record(ir, var.storage, builtin, member_type);
                }
            }
            None if root == id => {
                for (index, &member_type) in member_types.iter().enumerate() {
                    if let Some(builtin) = ir.meta.member_builtin(block_type_id, index) {
                        self.record(ir, var.storage, builtin, member_type);
                    }
                }
            }
            None => {}
        }
    }
}

impl OpcodeHandler for ActiveBuiltinHandler {
    fn handle(&mut self, ir: &ParsedIr, op: Op, operands: &[u32]) -> Result<bool> {
        let is_chain = matches!(
            op,
            Op::AccessChain | Op::InBoundsAccessChain | Op::PtrAccessChain
        );
        if is_chain {
            if let [_, result, base, first, ..] = operands {
                let index = if ir.ids.maybe_variable(*base).is_some() {
                    ir.ids.maybe_constant(*first).map(|c| c.scalar_u32())
                } else {
                    self.member_index.get(base).copied()
                };
                if let Some(index) = index {
                    self.member_index.insert(*result, index);
                }
            }
            record_access_chain(&mut self.chains, op, operands);
            // Chains are resolved when they are dereferenced.
            return Ok(true);
        }

        let mut touched = Vec::new();
        for_each_id_operand(op, operands, |id| touched.push(id));
        for id in touched {
            self.touch(ir, id);
        }
        Ok(true)
    }

    fn handle_terminator(&mut self, ir: &ParsedIr, block: &SpirBlock) -> Result<bool> {
        for id in block.terminator.used_ids() {
            self.touch(ir, id);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_roots_follow_nested_chains() {
        let mut chains = HashMap::new();
        record_access_chain(&mut chains, Op::AccessChain, &[1, 20, 10, 5]);
        record_access_chain(&mut chains, Op::AccessChain, &[1, 21, 20, 6]);
        assert_eq!(pointer_root(&chains, 21), 10);
        assert_eq!(pointer_root(&chains, 10), 10);
    }

    #[test]
    fn builtin_set_membership() {
        let mut builtins = ActiveBuiltins::default();
        builtins.outputs.insert(BuiltIn::Position as u32);
        assert!(builtins.is_active(BuiltIn::Position));
        assert!(!builtins.is_active(BuiltIn::PointSize));
    }
}
