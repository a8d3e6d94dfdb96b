//! Post-pass fixups run once the whole instruction stream is consumed.

use super::super::types::*;
use super::super::ParsedIr;
use super::core::IrBuilder;
use crate::error::{Error, Result};
use log::debug;

impl IrBuilder {
    /// Finish the build: run post passes and hand out the IR.
    pub(super) fn finish(mut self, words: Vec<u32>) -> Result<ParsedIr> {
        if let Some(function) = self.current_function {
            return Err(
                Error::invalid(format!("module ends inside function %{function}")).at_id(function),
            );
        }
        self.ir.words = words;
        resolve_struct_aliases(&mut self.ir)?;
        validate_functions(&self.ir)?;
        Ok(self.ir)
    }
}

/// Make block-like structs the master of their alias group.
///
/// Only the master of an alias group is ever declared. When a plain struct
/// and a buffer block share a name and layout, the block declaration must be
/// the one that survives.
fn resolve_struct_aliases(ir: &mut ParsedIr) -> Result<()> {
    for id in ir.ids.ids_of_kind(NodeKind::Type) {
        let master = ir.ids.get_type(id)?.type_alias;
        if master == 0 || !ir.is_block_like(id) || ir.is_block_like(master) {
            continue;
        }
        debug!("inverting struct alias: %{id} becomes master over %{master}");

        for other in ir.ids.ids_of_kind(NodeKind::Type) {
            let ty = ir.ids.get_type_mut(other)?;
            if ty.type_alias == master {
                ty.type_alias = id;
            }
        }
        ir.ids.get_type_mut(master)?.type_alias = id;
        ir.ids.get_type_mut(id)?.type_alias = 0;
    }
    Ok(())
}

/// Check that every branch, merge and phi edge names a block of the same
/// function, and that entry points name functions.
fn validate_functions(ir: &ParsedIr) -> Result<()> {
    for &function in &ir.function_order {
        let func = ir.ids.get_function(function)?;
        for &block_id in &func.blocks {
            let block = ir.ids.get_block(block_id)?;
            let mut targets = block.terminator.successors();
            targets.extend(block.merge_block());
            targets.extend(block.continue_block());
            targets.extend(block.phi_variables.iter().map(|phi| phi.parent));

            for target in targets {
                let target_block = ir
                    .ids
                    .get_block(target)
                    .map_err(|e| e.at_offset(block.terminator_offset))?;
                if target_block.function != function {
                    return Err(Error::invalid(format!(
                        "block %{block_id} refers to %{target} in another function"
                    ))
                    .at_id(block_id));
                }
            }
        }
    }

    for entry in &ir.entry_points {
        ir.ids.get_function(entry.function)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::build_ir;
    use crate::parser::parse_words;

    fn op(opcode: spirv::Op, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![((operands.len() as u32 + 1) << 16) | opcode as u32];
        words.extend_from_slice(operands);
        words
    }

    fn module(bound: u32, body: &[Vec<u32>]) -> Vec<u32> {
        let mut words = vec![spirv::MAGIC_NUMBER, 0x0001_0000, 0, bound, 0];
        for inst in body {
            words.extend_from_slice(inst);
        }
        words
    }

    fn name(id: u32, text: &str) -> Vec<u32> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize((bytes.len() / 4 + 1) * 4, 0);
        let mut operands = vec![id];
        operands.extend(bytes.chunks(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])));
        op(spirv::Op::Name, &operands)
    }

    #[test]
    fn named_struct_duplicates_alias_the_first() {
        let words = module(
            10,
            &[
                name(2, "Light"),
                name(3, "Light"),
                op(spirv::Op::TypeFloat, &[1, 32]),
                op(spirv::Op::TypeStruct, &[2, 1, 1]),
                op(spirv::Op::TypeStruct, &[3, 1, 1]),
                op(spirv::Op::TypeStruct, &[4, 1, 1]),
            ],
        );
        let ir = build_ir(parse_words(&words).unwrap()).unwrap();
        assert_eq!(ir.ids.get_type(3).unwrap().type_alias, 2);
        // Anonymous structs never alias.
        assert_eq!(ir.ids.get_type(4).unwrap().type_alias, 0);
    }

    #[test]
    fn block_like_slave_becomes_master() {
        let mut words = module(
            10,
            &[
                name(2, "Params"),
                name(3, "Params"),
                op(spirv::Op::Decorate, &[3, spirv::Decoration::Block as u32]),
                op(
                    spirv::Op::MemberDecorate,
                    &[3, 0, spirv::Decoration::Offset as u32, 0],
                ),
                op(spirv::Op::TypeFloat, &[1, 32]),
                op(spirv::Op::TypeStruct, &[2, 1]),
            ],
        );
        words.extend(op(spirv::Op::TypeStruct, &[3, 1]));
        let ir = build_ir(parse_words(&words).unwrap()).unwrap();
        assert_eq!(ir.ids.get_type(3).unwrap().type_alias, 0);
        assert_eq!(ir.ids.get_type(2).unwrap().type_alias, 3);
    }

    #[test]
    fn body_opcode_without_label_is_fatal() {
        let words = module(
            10,
            &[
                op(spirv::Op::TypeVoid, &[1]),
                op(spirv::Op::TypeFunction, &[2, 1]),
                op(spirv::Op::Function, &[1, 3, 0, 2]),
                op(spirv::Op::Label, &[4]),
                op(spirv::Op::Return, &[]),
                op(spirv::Op::Nop, &[]),
                op(spirv::Op::ControlBarrier, &[5, 5, 5]),
            ],
        );
        let err = build_ir(parse_words(&words).unwrap()).unwrap_err();
        assert!(err.to_string().contains("no block in scope"), "got {err}");
    }

    #[test]
    fn function_end_with_open_block_is_fatal() {
        let words = module(
            10,
            &[
                op(spirv::Op::TypeVoid, &[1]),
                op(spirv::Op::TypeFunction, &[2, 1]),
                op(spirv::Op::Function, &[1, 3, 0, 2]),
                op(spirv::Op::Label, &[4]),
                op(spirv::Op::FunctionEnd, &[]),
            ],
        );
        let err = build_ir(parse_words(&words).unwrap()).unwrap_err();
        assert!(err.is_invalid());
        assert!(err.location().offset.is_some());
    }

    #[test]
    fn kernel_capability_is_rejected() {
        let words = module(
            4,
            &[op(spirv::Op::Capability, &[spirv::Capability::Kernel as u32])],
        );
        assert!(build_ir(parse_words(&words).unwrap()).unwrap_err().is_invalid());
    }

    #[test]
    fn branch_to_undefined_block_is_invalid() {
        let words = module(
            10,
            &[
                op(spirv::Op::TypeVoid, &[1]),
                op(spirv::Op::TypeFunction, &[2, 1]),
                op(spirv::Op::Function, &[1, 3, 0, 2]),
                op(spirv::Op::Label, &[4]),
                op(spirv::Op::Branch, &[9]),
                op(spirv::Op::FunctionEnd, &[]),
            ],
        );
        assert!(build_ir(parse_words(&words).unwrap()).unwrap_err().is_invalid());
    }

    #[test]
    fn composite_constants_fold_and_reject_spec_ops() {
        let words = module(
            12,
            &[
                op(spirv::Op::TypeFloat, &[1, 32]),
                op(spirv::Op::TypeVector, &[2, 1, 2]),
                op(spirv::Op::Constant, &[1, 3, 1.0f32.to_bits()]),
                op(spirv::Op::Constant, &[1, 4, 2.0f32.to_bits()]),
                op(spirv::Op::ConstantComposite, &[2, 5, 3, 4]),
            ],
        );
        let ir = build_ir(parse_words(&words).unwrap()).unwrap();
        let c = ir.ids.get_constant(5).unwrap();
        assert_eq!(c.vecsize, 2);
        assert_eq!(f32::from_bits(c.bits(0, 1) as u32), 2.0);

        let words = module(
            12,
            &[
                op(spirv::Op::TypeInt, &[1, 32, 1]),
                op(spirv::Op::TypeVector, &[2, 1, 2]),
                op(spirv::Op::SpecConstant, &[1, 3, 1]),
                op(
                    spirv::Op::SpecConstantOp,
                    &[1, 4, spirv::Op::IAdd as u32, 3, 3],
                ),
                op(spirv::Op::ConstantComposite, &[2, 5, 4, 4]),
            ],
        );
        let err = build_ir(parse_words(&words).unwrap()).unwrap_err();
        assert!(err.is_invalid(), "got {err}");
    }

    #[test]
    fn vector_and_matrix_shapes_are_checked() {
        let float_then = |shape: Vec<u32>| {
            module(8, &[op(spirv::Op::TypeFloat, &[1, 32]), shape])
        };
        for shape in [
            op(spirv::Op::TypeVector, &[2, 1, 0x10000]),
            op(spirv::Op::TypeVector, &[2, 1, 1]),
        ] {
            let err = build_ir(parse_words(&float_then(shape)).unwrap()).unwrap_err();
            assert!(err.is_invalid(), "got {err}");
            assert_eq!(err.location().id, Some(2));
        }

        let words = module(
            8,
            &[
                op(spirv::Op::TypeFloat, &[1, 32]),
                op(spirv::Op::TypeVector, &[2, 1, 4]),
                op(spirv::Op::TypeMatrix, &[3, 2, 0x10000]),
            ],
        );
        let err = build_ir(parse_words(&words).unwrap()).unwrap_err();
        assert_eq!(err.location().id, Some(3));

        let words = module(
            8,
            &[
                op(spirv::Op::TypeFloat, &[1, 32]),
                op(spirv::Op::TypeVector, &[2, 1, 4]),
                op(spirv::Op::TypeVector, &[3, 2, 4]),
            ],
        );
        assert!(build_ir(parse_words(&words).unwrap()).unwrap_err().is_invalid());
    }

    #[test]
    fn null_matrix_has_a_zero_per_component() {
        let words = module(
            8,
            &[
                op(spirv::Op::TypeFloat, &[1, 32]),
                op(spirv::Op::TypeVector, &[2, 1, 3]),
                op(spirv::Op::TypeMatrix, &[3, 2, 4]),
                op(spirv::Op::ConstantNull, &[3, 4]),
            ],
        );
        let ir = build_ir(parse_words(&words).unwrap()).unwrap();
        let null = ir.ids.get_constant(4).unwrap();
        assert!(null.is_null);
        assert_eq!(null.values, vec![0; 12]);
    }

    #[test]
    fn null_constant_of_a_huge_array_is_unsupported() {
        let words = module(
            8,
            &[
                op(spirv::Op::TypeFloat, &[1, 32]),
                op(spirv::Op::TypeInt, &[2, 32, 0]),
                op(spirv::Op::Constant, &[2, 3, u32::MAX]),
                op(spirv::Op::TypeArray, &[4, 1, 3]),
                op(spirv::Op::ConstantNull, &[4, 5]),
            ],
        );
        let err = build_ir(parse_words(&words).unwrap()).unwrap_err();
        assert!(err.is_unsupported(), "got {err}");
        assert_eq!(err.location().id, Some(5));

        // 256 x 256 elements, each small on its own.
        let words = module(
            10,
            &[
                op(spirv::Op::TypeFloat, &[1, 32]),
                op(spirv::Op::TypeInt, &[2, 32, 0]),
                op(spirv::Op::Constant, &[2, 3, 256]),
                op(spirv::Op::TypeArray, &[4, 1, 3]),
                op(spirv::Op::TypeArray, &[5, 4, 3]),
                op(spirv::Op::ConstantNull, &[5, 6]),
                op(spirv::Op::ConstantNull, &[4, 7]),
            ],
        );
        let err = build_ir(parse_words(&words).unwrap()).unwrap_err();
        assert_eq!(err.location().id, Some(6));
    }

    #[test]
    fn member_index_past_the_struct_limit_is_invalid() {
        let mut member_name = name(2, "x");
        member_name[0] = (4 << 16) | spirv::Op::MemberName as u32;
        member_name.insert(2, u32::MAX);
        let words = module(4, &[member_name]);
        let err = build_ir(parse_words(&words).unwrap()).unwrap_err();
        assert!(err.is_invalid(), "got {err}");
        assert_eq!(err.location().id, Some(2));

        let words = module(
            4,
            &[op(
                spirv::Op::MemberDecorate,
                &[2, 0x00FF_FFFF, spirv::Decoration::Offset as u32, 0],
            )],
        );
        assert!(build_ir(parse_words(&words).unwrap()).unwrap_err().is_invalid());
    }
}
