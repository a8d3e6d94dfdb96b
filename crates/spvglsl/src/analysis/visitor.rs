//! Generic instruction visitor over reachable blocks.
//!
//! The traversal keeps an explicit stack of function frames instead of
//! recursing into callees. Each function is entered at most once per
//! traversal, so mutually recursive modules (which the format forbids) still
//! terminate.

use crate::error::{Error, Result};
use crate::ir::{Id, ParsedIr, SpirBlock};
use spirv::Op;
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Callbacks driven by [`traverse_all_reachable_opcodes`].
pub trait OpcodeHandler {
    /// Visit one body instruction. Returning `false` stops the traversal.
    fn handle(&mut self, ir: &ParsedIr, op: Op, operands: &[u32]) -> Result<bool>;

    /// Visit a block's terminator after its body instructions.
    fn handle_terminator(&mut self, _ir: &ParsedIr, _block: &SpirBlock) -> Result<bool> {
        Ok(true)
    }

    /// Whether to descend into `callee` at an `OpFunctionCall`.
    fn follow_function_call(&self, _callee: Id) -> bool {
        true
    }

    /// Called when a block starts (or resumes after a callee returns).
    fn set_current_block(&mut self, _ir: &ParsedIr, _block: &SpirBlock) {}

    fn begin_function_scope(&mut self, _ir: &ParsedIr, _function: Id) -> Result<()> {
        Ok(())
    }

    fn end_function_scope(&mut self, _ir: &ParsedIr, _function: Id) -> Result<()> {
        Ok(())
    }
}

/// Blocks of `function` reachable from its entry, in declaration order.
pub fn reachable_blocks(ir: &ParsedIr, function: Id) -> Result<Vec<Id>> {
    let func = ir.ids.get_function(function)?;
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([func.entry_block]);
    seen.insert(func.entry_block);
    while let Some(block) = queue.pop_front() {
        for succ in ir.ids.get_block(block)?.terminator.successors() {
            if seen.insert(succ) {
                queue.push_back(succ);
            }
        }
    }
    Ok(func
        .blocks
        .iter()
        .copied()
        .filter(|b| seen.contains(b))
        .collect())
}

struct Frame {
    function: Id,
    blocks: Vec<Id>,
    block: usize,
    op: usize,
    entered: bool,
}

impl Frame {
    fn new(ir: &ParsedIr, function: Id) -> Result<Self> {
        Ok(Frame {
            function,
            blocks: reachable_blocks(ir, function)?,
            block: 0,
            op: 0,
            entered: false,
        })
    }
}

/// Drive `handler` over every reachable instruction of `function`,
/// descending into callees the handler agrees to follow.
///
/// Returns `false` if the handler stopped the traversal early.
pub fn traverse_all_reachable_opcodes(
    ir: &ParsedIr,
    function: Id,
    handler: &mut dyn OpcodeHandler,
) -> Result<bool> {
    let mut visited: HashSet<Id> = HashSet::from([function]);
    handler.begin_function_scope(ir, function)?;
    let mut stack = vec![Frame::new(ir, function)?];

    while let Some(frame) = stack.last_mut() {
        let Some(&block_id) = frame.blocks.get(frame.block) else {
            let function = frame.function;
            stack.pop();
            handler.end_function_scope(ir, function)?;
            continue;
        };
        let block = ir.ids.get_block(block_id)?;
        if !frame.entered {
            handler.set_current_block(ir, block);
            frame.entered = true;
        }

        let Some(inst) = block.ops.get(frame.op) else {
            frame.block += 1;
            frame.op = 0;
            frame.entered = false;
            if !handler.handle_terminator(ir, block)? {
                return Ok(false);
            }
            continue;
        };
        frame.op += 1;

        let op = inst
            .op()
            .ok_or_else(|| Error::invalid(format!("unknown opcode {}", inst.opcode)))?;
        let operands = ir.operands(inst);
        if !handler.handle(ir, op, operands)? {
            return Ok(false);
        }

        if op == Op::FunctionCall {
            if let Some(&callee) = operands.get(2) {
                if handler.follow_function_call(callee) && visited.insert(callee) {
                    frame.entered = false;
                    handler.begin_function_scope(ir, callee)?;
                    stack.push(Frame::new(ir, callee)?);
                }
            }
        }
    }
    Ok(true)
}

/// Functions reachable from `entry` in callee-first order.
///
/// Recursion is rejected with `InvalidModule`.
pub fn call_order(ir: &ParsedIr, entry: Id) -> Result<Vec<Id>> {
    let mut order = Vec::new();
    let mut done: HashSet<Id> = HashSet::new();
    let mut on_stack: HashSet<Id> = HashSet::from([entry]);
    // (function, callees not yet visited)
    let mut stack: Vec<(Id, Vec<Id>)> = vec![(entry, direct_callees(ir, entry)?)];

    while let Some((function, pending)) = stack.last_mut() {
        let function = *function;
        match pending.pop() {
            Some(callee) => {
                if on_stack.contains(&callee) {
                    return Err(Error::invalid(format!(
                        "function %{callee} is called recursively"
                    ))
                    .at_id(callee));
                }
                if !done.contains(&callee) {
                    on_stack.insert(callee);
                    let callees = direct_callees(ir, callee)?;
                    stack.push((callee, callees));
                }
            }
            None => {
                stack.pop();
                on_stack.remove(&function);
                done.insert(function);
                order.push(function);
            }
        }
    }
    Ok(order)
}

fn direct_callees(ir: &ParsedIr, function: Id) -> Result<Vec<Id>> {
    let mut callees = Vec::new();
    for block in reachable_blocks(ir, function)? {
        for inst in &ir.ids.get_block(block)?.ops {
            if inst.op() == Some(Op::FunctionCall) {
                let callee = ir.operands(inst).get(2).copied().ok_or_else(|| {
                    Error::invalid("OpFunctionCall without a callee").at_offset(inst.offset)
                })?;
                ir.ids.get_function(callee)?;
                if !callees.contains(&callee) {
                    callees.push(callee);
                }
            }
        }
    }
    // Popped from the back, so reverse to visit in call order.
    callees.reverse();
    Ok(callees)
}
