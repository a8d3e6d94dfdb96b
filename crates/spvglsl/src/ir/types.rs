//! IR node definitions.
//!
//! Every entity in a module is addressed by its SPIR-V result ID. The ID
//! store holds one [`Node`] per ID; the payload types below are the
//! variants it can hold. Analysis passes annotate these nodes in place
//! (dominators, loop variables, hoisted declarations) but never change their
//! kind, except for the access-chain to expression promotion performed
//! during emission.

use crate::parser::Instruction;
use spirv::{Dim, ImageFormat, StorageClass};
use std::fmt;

/// A SPIR-V result ID. Zero is never a valid ID and is used as "none".
pub type Id = spirv::Word;

/// Scalar category of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Unknown,
    Void,
    Boolean,
    Int,
    UInt,
    Int64,
    UInt64,
    Half,
    Float,
    Double,
    Struct,
    Image,
    SampledImage,
    Sampler,
    AtomicCounter,
}

impl BaseType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            BaseType::Int | BaseType::UInt | BaseType::Int64 | BaseType::UInt64
        )
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(self, BaseType::Int | BaseType::Int64)
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(self, BaseType::UInt | BaseType::UInt64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, BaseType::Half | BaseType::Float | BaseType::Double)
    }

    /// Whether values of this type are opaque handles (images, samplers).
    pub fn is_opaque(self) -> bool {
        matches!(
            self,
            BaseType::Image | BaseType::SampledImage | BaseType::Sampler | BaseType::AtomicCounter
        )
    }

    /// The same integer width with the opposite signedness.
    pub fn flip_sign(self) -> BaseType {
        match self {
            BaseType::Int => BaseType::UInt,
            BaseType::UInt => BaseType::Int,
            BaseType::Int64 => BaseType::UInt64,
            BaseType::UInt64 => BaseType::Int64,
            other => other,
        }
    }
}

/// Image dimensionality and sampling metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    /// Scalar type of the sampled texels.
    pub sampled_type: Id,
    pub dim: Dim,
    pub depth: bool,
    pub arrayed: bool,
    pub multisampled: bool,
    /// 1 = used with a sampler, 2 = storage image, 0 = unknown.
    pub sampled: u32,
    pub format: ImageFormat,
}

/// A type descriptor.
///
/// Derived types (vectors, matrices, arrays, pointers) are created by copying
/// their base descriptor and changing exactly one axis, so unrelated fields
/// such as image metadata are inherited. `parent_type` links back to the
/// descriptor a type was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct SpirType {
    pub self_id: Id,
    pub basetype: BaseType,
    /// Scalar width in bits.
    pub width: u32,
    pub vecsize: u32,
    pub columns: u32,
    /// Array dimensions, innermost first. Each is a literal length or a
    /// constant ID depending on `array_size_literal`. A literal zero is a
    /// runtime-sized array.
    pub array: Vec<u32>,
    pub array_size_literal: Vec<bool>,
    pub pointer: bool,
    pub storage: StorageClass,
    pub member_types: Vec<Id>,
    pub image: Option<ImageInfo>,
    /// The type this one was derived from, or 0.
    pub parent_type: Id,
    /// The struct this type is an alias of, or 0 if it is its own master.
    pub type_alias: Id,
}

impl Default for SpirType {
    fn default() -> Self {
        SpirType {
            self_id: 0,
            basetype: BaseType::Unknown,
            width: 0,
            vecsize: 1,
            columns: 1,
            array: Vec::new(),
            array_size_literal: Vec::new(),
            pointer: false,
            storage: StorageClass::Generic,
            member_types: Vec::new(),
            image: None,
            parent_type: 0,
            type_alias: 0,
        }
    }
}

impl SpirType {
    /// A fresh scalar descriptor.
    pub fn scalar(self_id: Id, basetype: BaseType, width: u32) -> Self {
        SpirType {
            self_id,
            basetype,
            width,
            ..SpirType::default()
        }
    }

    /// Shallow copy of `self` for deriving a new type with ID `self_id`.
    /// The caller changes exactly one axis on the result.
    pub fn derive(&self, self_id: Id) -> Self {
        let mut derived = self.clone();
        derived.self_id = self_id;
        derived.parent_type = self.self_id;
        derived.type_alias = 0;
        derived
    }

    pub fn is_array(&self) -> bool {
        !self.array.is_empty()
    }

    pub fn is_struct(&self) -> bool {
        self.basetype == BaseType::Struct && !self.is_array()
    }

    pub fn is_scalar(&self) -> bool {
        self.vecsize == 1 && self.columns == 1 && !self.is_array() && !self.pointer
    }

    pub fn is_vector(&self) -> bool {
        self.vecsize > 1 && self.columns == 1 && !self.is_array()
    }

    pub fn is_matrix(&self) -> bool {
        self.columns > 1 && !self.is_array()
    }

    /// Whether the outermost array dimension is runtime sized.
    pub fn is_runtime_array(&self) -> bool {
        matches!(
            (self.array.last(), self.array_size_literal.last()),
            (Some(0), Some(true))
        )
    }

    /// Append an outer array dimension.
    pub fn push_array_dimension(&mut self, size: u32, literal: bool) {
        self.array.push(size);
        self.array_size_literal.push(literal);
    }
}

/// A constant value.
///
/// Scalars, vectors and matrices store their raw bits in `values`
/// (column-major, `columns * vecsize` entries). Arrays and structs store a
/// list of sub-constant IDs instead.
#[derive(Debug, Clone, PartialEq)]
pub struct SpirConstant {
    pub self_id: Id,
    pub constant_type: Id,
    pub columns: u32,
    pub vecsize: u32,
    pub values: Vec<u64>,
    pub subconstants: Vec<Id>,
    pub specialization: bool,
    pub is_null: bool,
    /// Set when a function variable was promoted to a constant table
    /// initialized by this constant.
    pub is_used_as_lut: bool,
}

impl SpirConstant {
    pub fn scalar(self_id: Id, constant_type: Id, bits: u64, specialization: bool) -> Self {
        SpirConstant {
            self_id,
            constant_type,
            columns: 1,
            vecsize: 1,
            values: vec![bits],
            subconstants: Vec::new(),
            specialization,
            is_null: false,
            is_used_as_lut: false,
        }
    }

    /// Raw bits of element `row` of column `col`.
    pub fn bits(&self, col: u32, row: u32) -> u64 {
        self.values
            .get((col * self.vecsize + row) as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn scalar_u32(&self) -> u32 {
        self.bits(0, 0) as u32
    }

    pub fn scalar_i32(&self) -> i32 {
        self.bits(0, 0) as u32 as i32
    }

    pub fn scalar_f32(&self) -> f32 {
        f32::from_bits(self.bits(0, 0) as u32)
    }
}

/// A specialization-constant operation (`OpSpecConstantOp`).
#[derive(Debug, Clone, PartialEq)]
pub struct SpirConstantOp {
    pub self_id: Id,
    pub basetype: Id,
    pub opcode: spirv::Op,
    pub arguments: Vec<u32>,
}

/// A variable: a global, a function-local `OpVariable`, a function
/// parameter, or the storage backing a phi node.
#[derive(Debug, Clone, PartialEq)]
pub struct SpirVariable {
    pub self_id: Id,
    /// Pointer type for memory variables, value type for phi nodes and
    /// by-value parameters.
    pub basetype: Id,
    pub storage: StorageClass,
    pub initializer: Option<Id>,
    pub parameter: bool,
    pub phi_variable: bool,

    /// Block whose start must hold the declaration.
    pub dominator: Option<Id>,
    /// Declared in a `for` initializer clause.
    pub loop_variable: bool,
    /// Declared somewhere other than the top of the function.
    pub deferred_declaration: bool,
    /// Constant this variable was promoted to, if any.
    pub static_expression: Option<Id>,
}

impl SpirVariable {
    pub fn new(self_id: Id, basetype: Id, storage: StorageClass, initializer: Option<Id>) -> Self {
        SpirVariable {
            self_id,
            basetype,
            storage,
            initializer,
            parameter: false,
            phi_variable: false,
            dominator: None,
            loop_variable: false,
            deferred_declaration: false,
            static_expression: None,
        }
    }
}

/// A function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub id: Id,
    pub type_id: Id,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpirFunction {
    pub self_id: Id,
    pub return_type: Id,
    pub function_type: Id,
    pub arguments: Vec<Parameter>,
    pub local_variables: Vec<Id>,
    pub entry_block: Id,
    pub blocks: Vec<Id>,
}

/// `OpTypeFunction`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpirFunctionPrototype {
    pub self_id: Id,
    pub return_type: Id,
    pub parameter_types: Vec<Id>,
}

/// How control leaves a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// Not yet terminated (only legal while building).
    Unknown,
    Direct(Id),
    Select {
        condition: Id,
        true_block: Id,
        false_block: Id,
    },
    MultiSelect {
        selector: Id,
        default: Id,
        cases: Vec<(u64, Id)>,
    },
    Return(Option<Id>),
    Unreachable,
    Kill,
}

impl Terminator {
    /// Successor blocks in branch order (switch default last).
    pub fn successors(&self) -> Vec<Id> {
        match self {
            Terminator::Direct(target) => vec![*target],
            Terminator::Select {
                true_block,
                false_block,
                ..
            } => vec![*true_block, *false_block],
            Terminator::MultiSelect { default, cases, .. } => cases
                .iter()
                .map(|(_, block)| *block)
                .chain(std::iter::once(*default))
                .collect(),
            Terminator::Unknown
            | Terminator::Return(_)
            | Terminator::Unreachable
            | Terminator::Kill => Vec::new(),
        }
    }

    /// IDs read by the terminator itself.
    pub fn used_ids(&self) -> Vec<Id> {
        match self {
            Terminator::Select { condition, .. } => vec![*condition],
            Terminator::MultiSelect { selector, .. } => vec![*selector],
            Terminator::Return(Some(value)) => vec![*value],
            _ => Vec::new(),
        }
    }
}

/// Structured-control-flow merge declared by a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    None,
    Loop { merge_block: Id, continue_block: Id },
    Selection { merge_block: Id },
}

/// One incoming edge of a phi node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phi {
    /// Value flowing in along the edge.
    pub local_variable: Id,
    /// Predecessor block of the edge.
    pub parent: Id,
    /// The phi result, lowered to a function variable.
    pub function_variable: Id,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpirBlock {
    pub self_id: Id,
    pub function: Id,
    /// Body instructions (views into the module words).
    pub ops: Vec<Instruction>,
    pub terminator: Terminator,
    /// Word offset of the terminator instruction.
    pub terminator_offset: usize,
    pub merge: Merge,
    pub phi_variables: Vec<Phi>,

    /// Innermost loop header whose body contains this block.
    pub loop_dominator: Option<Id>,
    /// Variables declared at the start of this block.
    pub dominated_variables: Vec<Id>,
    /// Loop variables declared in this loop header's initializer clause.
    pub loop_variables: Vec<Id>,
    /// Variables declared immediately before this loop header.
    pub hoisted_variables: Vec<Id>,
    /// `(type, id)` temporaries declared immediately before this loop header.
    pub declare_temporary: Vec<(Id, Id)>,
}

impl SpirBlock {
    pub fn new(self_id: Id, function: Id) -> Self {
        SpirBlock {
            self_id,
            function,
            ops: Vec::new(),
            terminator: Terminator::Unknown,
            terminator_offset: 0,
            merge: Merge::None,
            phi_variables: Vec::new(),
            loop_dominator: None,
            dominated_variables: Vec::new(),
            loop_variables: Vec::new(),
            hoisted_variables: Vec::new(),
            declare_temporary: Vec::new(),
        }
    }

    pub fn merge_block(&self) -> Option<Id> {
        match self.merge {
            Merge::Loop { merge_block, .. } | Merge::Selection { merge_block } => Some(merge_block),
            Merge::None => None,
        }
    }

    pub fn continue_block(&self) -> Option<Id> {
        match self.merge {
            Merge::Loop { continue_block, .. } => Some(continue_block),
            _ => None,
        }
    }

    pub fn is_loop_header(&self) -> bool {
        matches!(self.merge, Merge::Loop { .. })
    }
}

/// A synthesized source fragment for an SSA value.
#[derive(Debug, Clone, PartialEq)]
pub struct SpirExpression {
    pub self_id: Id,
    pub text: String,
    pub expression_type: Id,
    /// Safe to duplicate: no reads of mutable state in its derivation.
    pub immutable: bool,
    /// Inlined at use sites instead of stored in a temporary.
    pub forwarded: bool,
    /// Forwarded expressions this one was built from.
    pub dependencies: Vec<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpirUndef {
    pub self_id: Id,
    pub basetype: Id,
}

/// Known extended instruction sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionKind {
    GlslStd450,
    /// `NonSemantic.*` sets; their instructions carry no semantics.
    NonSemantic,
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpirExtension {
    pub self_id: Id,
    pub kind: ExtensionKind,
}

/// A pointer expression that has not yet been consumed as a value.
#[derive(Debug, Clone, PartialEq)]
pub struct SpirAccessChain {
    pub self_id: Id,
    /// Pointer type of the chain result.
    pub basetype: Id,
    /// Root variable the chain indexes into.
    pub base: Id,
    pub text: String,
    pub storage: StorageClass,
    pub dependencies: Vec<Id>,
}

/// A synthesized combined texture + sampler uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpirCombinedImageSampler {
    pub self_id: Id,
    /// `OpTypeSampledImage` the pair is used as.
    pub combined_type: Id,
    pub image: Id,
    pub sampler: Id,
}

/// The payload stored for an ID.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    #[default]
    None,
    Type(SpirType),
    Constant(SpirConstant),
    ConstantOp(SpirConstantOp),
    Variable(SpirVariable),
    Function(SpirFunction),
    FunctionPrototype(SpirFunctionPrototype),
    Block(SpirBlock),
    Expression(SpirExpression),
    Undef(SpirUndef),
    Extension(SpirExtension),
    AccessChain(SpirAccessChain),
    CombinedImageSampler(SpirCombinedImageSampler),
}

/// Discriminant of [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    None,
    Type,
    Constant,
    ConstantOp,
    Variable,
    Function,
    FunctionPrototype,
    Block,
    Expression,
    Undef,
    Extension,
    AccessChain,
    CombinedImageSampler,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::None => NodeKind::None,
            Node::Type(_) => NodeKind::Type,
            Node::Constant(_) => NodeKind::Constant,
            Node::ConstantOp(_) => NodeKind::ConstantOp,
            Node::Variable(_) => NodeKind::Variable,
            Node::Function(_) => NodeKind::Function,
            Node::FunctionPrototype(_) => NodeKind::FunctionPrototype,
            Node::Block(_) => NodeKind::Block,
            Node::Expression(_) => NodeKind::Expression,
            Node::Undef(_) => NodeKind::Undef,
            Node::Extension(_) => NodeKind::Extension,
            Node::AccessChain(_) => NodeKind::AccessChain,
            Node::CombinedImageSampler(_) => NodeKind::CombinedImageSampler,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::None => "none",
            NodeKind::Type => "type",
            NodeKind::Constant => "constant",
            NodeKind::ConstantOp => "specialization constant op",
            NodeKind::Variable => "variable",
            NodeKind::Function => "function",
            NodeKind::FunctionPrototype => "function type",
            NodeKind::Block => "block",
            NodeKind::Expression => "expression",
            NodeKind::Undef => "undef",
            NodeKind::Extension => "extended instruction set",
            NodeKind::AccessChain => "access chain",
            NodeKind::CombinedImageSampler => "combined image sampler",
        };
        f.write_str(name)
    }
}
