//! Core IR builder state and the function/block cursor.

use super::super::types::*;
use super::super::ParsedIr;
use crate::error::{Error, Result};
use crate::parser::{Header, Instruction};

/// IR builder state.
pub struct IrBuilder {
    pub(super) ir: ParsedIr,

    /// Function currently being defined.
    pub(super) current_function: Option<Id>,

    /// Block currently open for body instructions. Cleared by terminators.
    pub(super) current_block: Option<Id>,
}

impl IrBuilder {
    pub fn new(header: Header) -> Self {
        IrBuilder {
            ir: ParsedIr::new(header),
            current_function: None,
            current_block: None,
        }
    }

    pub(super) fn require_operands(&self, inst: &Instruction, operands: &[u32], min: usize) -> Result<()> {
        if operands.len() < min {
            let name = inst
                .op()
                .map_or_else(|| format!("opcode {}", inst.opcode), |op| format!("{op:?}"));
            return Err(Error::invalid(format!(
                "{name} needs at least {min} operands, found {}",
                operands.len()
            )));
        }
        Ok(())
    }

    pub(super) fn function_id(&self) -> Result<Id> {
        self.current_function
            .ok_or_else(|| Error::invalid("instruction requires an enclosing function"))
    }

    /// The open block, or the fatal "no block in scope" error.
    pub(super) fn block_mut(&mut self) -> Result<&mut SpirBlock> {
        let id = self
            .current_block
            .ok_or_else(|| Error::invalid("no block in scope"))?;
        self.ir.ids.get_block_mut(id)
    }

    pub(super) fn begin_function(
        &mut self,
        id: Id,
        return_type: Id,
        function_type: Id,
    ) -> Result<()> {
        if let Some(open) = self.current_function {
            return Err(Error::invalid(format!(
                "function %{id} begins inside function %{open}"
            ))
            .at_id(id));
        }
        self.ir.ids.set(
            id,
            Node::Function(SpirFunction {
                self_id: id,
                return_type,
                function_type,
                arguments: Vec::new(),
                local_variables: Vec::new(),
                entry_block: 0,
                blocks: Vec::new(),
            }),
        )?;
        self.ir.function_order.push(id);
        self.current_function = Some(id);
        Ok(())
    }

    pub(super) fn end_function(&mut self) -> Result<()> {
        let function = self.function_id()?;
        if let Some(block) = self.current_block {
            return Err(Error::invalid(format!(
                "function %{function} ends while block %{block} is still open"
            ))
            .at_id(block));
        }
        if self.ir.ids.get_function(function)?.blocks.is_empty() {
            return Err(Error::invalid(format!("function %{function} has no blocks")).at_id(function));
        }
        self.current_function = None;
        Ok(())
    }

    pub(super) fn begin_block(&mut self, id: Id) -> Result<()> {
        let function = self.function_id()?;
        if let Some(open) = self.current_block {
            return Err(Error::invalid(format!(
                "label %{id} starts while block %{open} is still open"
            ))
            .at_id(id));
        }
        self.ir.ids.set(id, Node::Block(SpirBlock::new(id, function)))?;
        let func = self.ir.ids.get_function_mut(function)?;
        if func.blocks.is_empty() {
            func.entry_block = id;
        }
        func.blocks.push(id);
        self.current_block = Some(id);
        Ok(())
    }

    /// Close the open block with `terminator`.
    pub(super) fn terminate(&mut self, terminator: Terminator, offset: usize) -> Result<()> {
        let block = self.block_mut()?;
        block.terminator = terminator;
        block.terminator_offset = offset;
        self.current_block = None;
        Ok(())
    }

    /// Append a body instruction to the open block.
    pub(super) fn push_op(&mut self, inst: &Instruction) -> Result<()> {
        self.block_mut()?.ops.push(*inst);
        Ok(())
    }

    /// Register a function-local variable with the enclosing function.
    pub(super) fn add_local_variable(&mut self, id: Id) -> Result<()> {
        let function = self.function_id()?;
        self.ir
            .ids
            .get_function_mut(function)?
            .local_variables
            .push(id);
        Ok(())
    }
}
