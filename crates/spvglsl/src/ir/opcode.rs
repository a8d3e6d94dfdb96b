//! Opcode families and operand layout.
//!
//! Every pass that dispatches on opcodes first maps the raw opcode to a
//! closed [`OpFamily`] and matches on that exhaustively. Operand layout
//! (where the result type and result ID live, which operands are IDs and
//! which are literals) is described here once, so analyses can walk the
//! ID operands of any instruction without their own opcode tables.

use super::types::Id;
use spirv::Op;

/// Coarse opcode category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpFamily {
    /// Debug info: names, source, lines.
    Debug,
    /// `OpDecorate` and friends.
    Annotation,
    /// Capabilities, extensions, memory model, entry points.
    ModeSetting,
    Type,
    Constant,
    SpecConstantOp,
    Undef,
    Variable,
    /// `OpFunction`, `OpFunctionParameter`, `OpFunctionEnd`.
    Function,
    Label,
    Phi,
    Merge,
    Terminator,
    /// Loads, stores, access chains.
    Memory,
    Composite,
    Arithmetic,
    Bitwise,
    Logical,
    Conversion,
    Derivative,
    Image,
    Atomic,
    Barrier,
    ExtInst,
    Call,
    Geometry,
    Nop,
    Unsupported,
}

/// Classify an opcode.
pub fn classify(op: Op) -> OpFamily {
    use Op::*;
    match op {
        Nop => OpFamily::Nop,
        Source | SourceContinued | SourceExtension | Name | MemberName | String | Line
        | NoLine | ModuleProcessed => OpFamily::Debug,
        Decorate | MemberDecorate | DecorationGroup | GroupDecorate | GroupMemberDecorate
        | DecorateId | DecorateString | MemberDecorateString => OpFamily::Annotation,
        Capability | Extension | ExtInstImport | MemoryModel | EntryPoint | ExecutionMode
        | ExecutionModeId => OpFamily::ModeSetting,
        TypeVoid | TypeBool | TypeInt | TypeFloat | TypeVector | TypeMatrix | TypeImage
        | TypeSampler | TypeSampledImage | TypeArray | TypeRuntimeArray | TypeStruct
        | TypePointer | TypeFunction | TypeForwardPointer => OpFamily::Type,
        ConstantTrue | ConstantFalse | Constant | ConstantComposite | ConstantNull
        | SpecConstantTrue | SpecConstantFalse | SpecConstant | SpecConstantComposite => {
            OpFamily::Constant
        }
        SpecConstantOp => OpFamily::SpecConstantOp,
        Undef => OpFamily::Undef,
        Variable => OpFamily::Variable,
        Function | FunctionParameter | FunctionEnd => OpFamily::Function,
        Label => OpFamily::Label,
        Phi => OpFamily::Phi,
        LoopMerge | SelectionMerge => OpFamily::Merge,
        Branch | BranchConditional | Switch | Return | ReturnValue | Unreachable | Kill
        | TerminateInvocation => OpFamily::Terminator,
        Load | Store | CopyMemory | AccessChain | InBoundsAccessChain | PtrAccessChain
        | ArrayLength | ImageTexelPointer => OpFamily::Memory,
        VectorExtractDynamic | VectorInsertDynamic | VectorShuffle | CompositeConstruct
        | CompositeExtract | CompositeInsert | CopyObject | Transpose => OpFamily::Composite,
        SNegate | FNegate | IAdd | FAdd | ISub | FSub | IMul | FMul | UDiv | SDiv | FDiv
        | UMod | SRem | SMod | FRem | FMod | VectorTimesScalar | MatrixTimesScalar
        | VectorTimesMatrix | MatrixTimesVector | MatrixTimesMatrix | OuterProduct | Dot => {
            OpFamily::Arithmetic
        }
        ShiftRightLogical | ShiftRightArithmetic | ShiftLeftLogical | BitwiseOr
        | BitwiseXor | BitwiseAnd | Not | BitFieldInsert | BitFieldSExtract
        | BitFieldUExtract | BitReverse | BitCount => OpFamily::Bitwise,
        Any | All | IsNan | IsInf | LogicalEqual | LogicalNotEqual | LogicalOr | LogicalAnd
        | LogicalNot | Select | IEqual | INotEqual | UGreaterThan | SGreaterThan
        | UGreaterThanEqual | SGreaterThanEqual | ULessThan | SLessThan | ULessThanEqual
        | SLessThanEqual | FOrdEqual | FUnordEqual | FOrdNotEqual | FUnordNotEqual
        | FOrdLessThan | FUnordLessThan | FOrdGreaterThan | FUnordGreaterThan
        | FOrdLessThanEqual | FUnordLessThanEqual | FOrdGreaterThanEqual
        | FUnordGreaterThanEqual => OpFamily::Logical,
        ConvertFToU | ConvertFToS | ConvertSToF | ConvertUToF | UConvert | SConvert
        | FConvert | QuantizeToF16 | Bitcast => OpFamily::Conversion,
        DPdx | DPdy | Fwidth | DPdxFine | DPdyFine | FwidthFine | DPdxCoarse | DPdyCoarse
        | FwidthCoarse => OpFamily::Derivative,
        SampledImage
        | ImageSampleImplicitLod
        | ImageSampleExplicitLod
        | ImageSampleDrefImplicitLod
        | ImageSampleDrefExplicitLod
        | ImageSampleProjImplicitLod
        | ImageSampleProjExplicitLod
        | ImageSampleProjDrefImplicitLod
        | ImageSampleProjDrefExplicitLod
        | ImageFetch
        | ImageGather
        | ImageDrefGather
        | ImageRead
        | ImageWrite
        | Image
        | ImageQuerySizeLod
        | ImageQuerySize
        | ImageQueryLod
        | ImageQueryLevels
        | ImageQuerySamples => OpFamily::Image,
        AtomicLoad | AtomicStore | AtomicExchange | AtomicCompareExchange | AtomicIIncrement
        | AtomicIDecrement | AtomicIAdd | AtomicISub | AtomicSMin | AtomicUMin
        | AtomicSMax | AtomicUMax | AtomicAnd | AtomicOr | AtomicXor => OpFamily::Atomic,
        ControlBarrier | MemoryBarrier => OpFamily::Barrier,
        ExtInst => OpFamily::ExtInst,
        FunctionCall => OpFamily::Call,
        EmitVertex | EndPrimitive => OpFamily::Geometry,
        _ => OpFamily::Unsupported,
    }
}

/// Whether an instruction defines a result ID, and whether it is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    None,
    /// `<result>` only (types, labels, import handles).
    Untyped,
    /// `<result type> <result>`.
    Typed,
}

pub fn result_shape(op: Op) -> ResultShape {
    use Op::*;
    match classify(op) {
        OpFamily::Type | OpFamily::Label => ResultShape::Untyped,
        OpFamily::Constant
        | OpFamily::SpecConstantOp
        | OpFamily::Undef
        | OpFamily::Variable
        | OpFamily::Phi
        | OpFamily::Composite
        | OpFamily::Arithmetic
        | OpFamily::Bitwise
        | OpFamily::Logical
        | OpFamily::Conversion
        | OpFamily::Derivative
        | OpFamily::ExtInst
        | OpFamily::Call => ResultShape::Typed,
        OpFamily::Function => match op {
            FunctionEnd => ResultShape::None,
            _ => ResultShape::Typed,
        },
        OpFamily::Memory => match op {
            Store | CopyMemory => ResultShape::None,
            _ => ResultShape::Typed,
        },
        OpFamily::Image => match op {
            ImageWrite => ResultShape::None,
            _ => ResultShape::Typed,
        },
        OpFamily::Atomic => match op {
            AtomicStore => ResultShape::None,
            _ => ResultShape::Typed,
        },
        OpFamily::ModeSetting => match op {
            ExtInstImport => ResultShape::Untyped,
            _ => ResultShape::None,
        },
        OpFamily::Debug => match op {
            String => ResultShape::Untyped,
            _ => ResultShape::None,
        },
        OpFamily::Annotation => match op {
            DecorationGroup => ResultShape::Untyped,
            _ => ResultShape::None,
        },
        OpFamily::Merge
        | OpFamily::Terminator
        | OpFamily::Barrier
        | OpFamily::Geometry
        | OpFamily::Nop
        | OpFamily::Unsupported => ResultShape::None,
    }
}

/// `(result type, result id)` of an instruction, if it defines a result.
pub fn result_of(op: Op, operands: &[u32]) -> Option<(Option<Id>, Id)> {
    match result_shape(op) {
        ResultShape::None => None,
        ResultShape::Untyped => operands.first().map(|&id| (None, id)),
        ResultShape::Typed => match operands {
            [ty, id, ..] => Some((Some(*ty), *id)),
            _ => None,
        },
    }
}

/// Which value operands (after the result type and result ID) are IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdLayout {
    None,
    All,
    /// The first `n` operands are IDs, the rest are literals.
    Leading(usize),
    /// `n` IDs, then an optional operand mask literal followed by IDs.
    Masked(usize),
    /// Extended instruction: set, literal instruction, then IDs.
    ExtInst,
    /// `(value, parent)` pairs; only values are reported.
    Phi,
}

fn id_layout(op: Op) -> IdLayout {
    use Op::*;
    match op {
        Load | ArrayLength | CompositeExtract | ReturnValue | BranchConditional | Switch
        | Image | ImageQuerySize | ImageQueryLevels | ImageQuerySamples => IdLayout::Leading(1),
        Store | CopyMemory | CompositeInsert | VectorShuffle | SampledImage
        | ImageQuerySizeLod | ImageQueryLod => IdLayout::Leading(2),
        ImageTexelPointer => IdLayout::Leading(3),
        ImageSampleImplicitLod
        | ImageSampleExplicitLod
        | ImageSampleProjImplicitLod
        | ImageSampleProjExplicitLod
        | ImageFetch
        | ImageRead => IdLayout::Masked(2),
        ImageSampleDrefImplicitLod
        | ImageSampleDrefExplicitLod
        | ImageSampleProjDrefImplicitLod
        | ImageSampleProjDrefExplicitLod
        | ImageGather
        | ImageDrefGather
        | ImageWrite => IdLayout::Masked(3),
        ExtInst => IdLayout::ExtInst,
        Phi => IdLayout::Phi,
        _ => match classify(op) {
            OpFamily::Memory
            | OpFamily::Composite
            | OpFamily::Arithmetic
            | OpFamily::Bitwise
            | OpFamily::Logical
            | OpFamily::Conversion
            | OpFamily::Derivative
            | OpFamily::Atomic
            | OpFamily::Barrier
            | OpFamily::Call => IdLayout::All,
            _ => IdLayout::None,
        },
    }
}

/// Call `f` for every value ID the instruction reads, in operand order.
/// The result type and result ID are never reported.
pub fn for_each_id_operand(op: Op, operands: &[u32], mut f: impl FnMut(Id)) {
    let skip = match result_shape(op) {
        ResultShape::Typed => 2,
        ResultShape::Untyped => 1,
        ResultShape::None => 0,
    };
    let args = operands.get(skip..).unwrap_or(&[]);
    match id_layout(op) {
        IdLayout::None => {}
        IdLayout::All => args.iter().copied().for_each(f),
        IdLayout::Leading(n) => args.iter().take(n).copied().for_each(f),
        IdLayout::Masked(n) => {
            args.iter().take(n).copied().for_each(&mut f);
            args.iter().skip(n + 1).copied().for_each(f);
        }
        IdLayout::ExtInst => {
            args.iter().skip(2).copied().for_each(f);
        }
        IdLayout::Phi => args.iter().step_by(2).copied().for_each(f),
    }
}

/// Collect the value IDs an instruction reads.
pub fn id_operands(op: Op, operands: &[u32]) -> Vec<Id> {
    let mut ids = Vec::new();
    for_each_id_operand(op, operands, |id| ids.push(id));
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_cover_core_opcodes() {
        assert_eq!(classify(Op::IAdd), OpFamily::Arithmetic);
        assert_eq!(classify(Op::LoopMerge), OpFamily::Merge);
        assert_eq!(classify(Op::Kill), OpFamily::Terminator);
        assert_eq!(classify(Op::TypeStruct), OpFamily::Type);
        assert_eq!(classify(Op::SpecConstantOp), OpFamily::SpecConstantOp);
        assert_eq!(classify(Op::GroupNonUniformElect), OpFamily::Unsupported);
    }

    #[test]
    fn result_layouts() {
        assert_eq!(result_of(Op::IAdd, &[1, 2, 3, 4]), Some((Some(1), 2)));
        assert_eq!(result_of(Op::TypeFloat, &[5, 32]), Some((None, 5)));
        assert_eq!(result_of(Op::Store, &[5, 6]), None);
        assert_eq!(result_of(Op::Label, &[9]), Some((None, 9)));
    }

    #[test]
    fn literal_operands_are_skipped() {
        // OpCompositeExtract %ty %res %composite 0 1
        assert_eq!(id_operands(Op::CompositeExtract, &[1, 2, 3, 0, 1]), vec![3]);
        // OpVectorShuffle %ty %res %a %b 0 1 4
        assert_eq!(id_operands(Op::VectorShuffle, &[1, 2, 3, 4, 0, 1, 4]), vec![3, 4]);
        // OpLoad %ty %res %ptr Aligned 4
        assert_eq!(id_operands(Op::Load, &[1, 2, 3, 2, 4]), vec![3]);
        // OpStore %ptr %value
        assert_eq!(id_operands(Op::Store, &[3, 4]), vec![3, 4]);
    }

    #[test]
    fn image_operand_masks_are_skipped() {
        // OpImageSampleExplicitLod %ty %res %img %coord Lod %lod
        assert_eq!(
            id_operands(Op::ImageSampleExplicitLod, &[1, 2, 3, 4, 2, 5]),
            vec![3, 4, 5]
        );
    }

    #[test]
    fn ext_inst_and_phi_layouts() {
        // OpExtInst %ty %res %set 31 %x
        assert_eq!(id_operands(Op::ExtInst, &[1, 2, 3, 31, 7]), vec![7]);
        // OpPhi %ty %res %v1 %b1 %v2 %b2
        assert_eq!(id_operands(Op::Phi, &[1, 2, 10, 20, 11, 21]), vec![10, 11]);
    }
}
