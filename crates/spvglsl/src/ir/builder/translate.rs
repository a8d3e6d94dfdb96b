//! Instruction translation - populates the ID store from each opcode.
//!
//! Dispatch happens on the closed [`OpFamily`] first, then on the concrete
//! opcode inside each family handler.

use super::super::opcode::{classify, result_of, OpFamily};
use super::super::types::*;
use super::super::EntryPoint;
use super::core::IrBuilder;
use crate::error::{Error, Result};
use crate::parser::{extract_string, Instruction};
use log::{trace, warn};
use spirv::{Capability, Dim, ExecutionMode, ExecutionModel, ImageFormat, Op, StorageClass};

/// Capabilities that only make sense for OpenCL kernels or physical
/// addressing. Modules declaring them are rejected outright.
const UNSUPPORTED_CAPABILITIES: &[Capability] = &[
    Capability::Kernel,
    Capability::Addresses,
    Capability::Linkage,
    Capability::Pipes,
    Capability::DeviceEnqueue,
    Capability::GenericPointer,
    Capability::LiteralSampler,
    Capability::Vector16,
    Capability::Float16Buffer,
    Capability::Groups,
];

/// Largest null constant, counted in nodes, that gets expanded.
const MAX_NULL_NODES: u64 = 1 << 16;

/// Most members a struct may declare.
const MAX_STRUCT_MEMBERS: u32 = 16383;

fn member_index(id: Id, member: u32) -> Result<usize> {
    if member < MAX_STRUCT_MEMBERS {
        Ok(member as usize)
    } else {
        Err(Error::invalid(format!("member index {member} is out of range")).at_id(id))
    }
}

/// Vector and matrix component counts GLSL can spell.
fn component_count(id: Id, count: u32) -> Result<u32> {
    if (2..=4).contains(&count) {
        Ok(count)
    } else {
        Err(Error::invalid(format!("component count {count}")).at_id(id))
    }
}

impl IrBuilder {
    /// Translate a single instruction into the ID store.
    pub(super) fn translate_instruction(&mut self, inst: &Instruction, ops: &[u32]) -> Result<()> {
        let op = inst
            .op()
            .ok_or_else(|| Error::invalid(format!("unknown opcode {}", inst.opcode)))?;
        trace!("{op:?} {ops:?}");

        match classify(op) {
            OpFamily::Nop => Ok(()),
            OpFamily::Debug => self.translate_debug(op, inst, ops),
            OpFamily::Annotation => self.translate_annotation(op, inst, ops),
            OpFamily::ModeSetting => self.translate_mode_setting(op, inst, ops),
            OpFamily::Type => self.translate_type(op, inst, ops),
            OpFamily::Constant => self.translate_constant(op, inst, ops),
            OpFamily::SpecConstantOp => {
                self.require_operands(inst, ops, 3)?;
                let (ty, id) = (ops[0], ops[1]);
                let opcode = Op::from_u32(ops[2]).ok_or_else(|| {
                    Error::invalid(format!("unknown specialization opcode {}", ops[2])).at_id(id)
                })?;
                self.ir.ids.set(
                    id,
                    Node::ConstantOp(SpirConstantOp {
                        self_id: id,
                        basetype: ty,
                        opcode,
                        arguments: ops[3..].to_vec(),
                    }),
                )?;
                self.ir.declaration_order.push(id);
                Ok(())
            }
            OpFamily::Undef => {
                self.require_operands(inst, ops, 2)?;
                let (ty, id) = (ops[0], ops[1]);
                self.ir.ids.set(
                    id,
                    Node::Undef(SpirUndef {
                        self_id: id,
                        basetype: ty,
                    }),
                )?;
                if self.current_function.is_none() {
                    self.ir.declaration_order.push(id);
                }
                Ok(())
            }
            OpFamily::Variable => self.translate_variable(inst, ops),
            OpFamily::Function => self.translate_function(op, inst, ops),
            OpFamily::Label => {
                self.require_operands(inst, ops, 1)?;
                self.begin_block(ops[0])
            }
            OpFamily::Phi => self.translate_phi(inst, ops),
            OpFamily::Merge => self.translate_merge(op, inst, ops),
            OpFamily::Terminator => self.translate_terminator(op, inst, ops),
            OpFamily::Memory
            | OpFamily::Composite
            | OpFamily::Arithmetic
            | OpFamily::Bitwise
            | OpFamily::Logical
            | OpFamily::Conversion
            | OpFamily::Derivative
            | OpFamily::Image
            | OpFamily::Atomic
            | OpFamily::Barrier
            | OpFamily::ExtInst
            | OpFamily::Call
            | OpFamily::Geometry => self.translate_body(op, inst, ops),
            OpFamily::Unsupported => {
                if self.current_block.is_some() {
                    // Rejected by the emitter if it is ever reached.
                    self.translate_body(op, inst, ops)
                } else {
                    warn!("ignoring module-level instruction {op:?}");
                    Ok(())
                }
            }
        }
    }

    fn translate_body(&mut self, op: Op, inst: &Instruction, ops: &[u32]) -> Result<()> {
        self.push_op(inst)?;
        if let Some((Some(ty), id)) = result_of(op, ops) {
            self.ir.result_types.insert(id, ty);
        }
        Ok(())
    }

    // ── Debug and annotations ───────────────────────────────────────────

    fn translate_debug(&mut self, op: Op, inst: &Instruction, ops: &[u32]) -> Result<()> {
        match op {
            Op::Name => {
                self.require_operands(inst, ops, 2)?;
                let (name, _) = extract_string(&ops[1..])?;
                self.ir.meta.entry(ops[0]).decoration.name = name;
            }
            Op::MemberName => {
                self.require_operands(inst, ops, 3)?;
                let (name, _) = extract_string(&ops[2..])?;
                let member = member_index(ops[0], ops[1])?;
                self.ir.meta.entry(ops[0]).member_mut(member).name = name;
            }
            Op::Source => {
                self.require_operands(inst, ops, 2)?;
                self.ir.source.es = ops[0] == spirv::SourceLanguage::ESSL as u32;
                self.ir.source.version = ops[1];
                self.ir.source.known = true;
            }
            _ => {}
        }
        Ok(())
    }

    fn translate_annotation(&mut self, op: Op, inst: &Instruction, ops: &[u32]) -> Result<()> {
        match op {
            Op::Decorate | Op::DecorateId | Op::DecorateString => {
                self.require_operands(inst, ops, 2)?;
                match spirv::Decoration::from_u32(ops[1]) {
                    Some(deco) => self.ir.meta.entry(ops[0]).decoration.apply(deco, &ops[2..]),
                    None => warn!("ignoring unknown decoration {} on %{}", ops[1], ops[0]),
                }
            }
            Op::MemberDecorate | Op::MemberDecorateString => {
                self.require_operands(inst, ops, 3)?;
                let member = member_index(ops[0], ops[1])?;
                match spirv::Decoration::from_u32(ops[2]) {
                    Some(deco) => self
                        .ir
                        .meta
                        .entry(ops[0])
                        .member_mut(member)
                        .apply(deco, &ops[3..]),
                    None => warn!("ignoring unknown member decoration {} on %{}", ops[2], ops[0]),
                }
            }
            Op::GroupDecorate => {
                self.require_operands(inst, ops, 1)?;
                for &target in &ops[1..] {
                    self.ir.meta.copy_decorations(ops[0], target);
                }
            }
            Op::GroupMemberDecorate => {
                self.require_operands(inst, ops, 1)?;
                for pair in ops[1..].chunks_exact(2) {
                    let member = member_index(pair[0], pair[1])?;
                    self.ir
                        .meta
                        .copy_member_decorations(ops[0], pair[0], member);
                }
            }
            // The group ID only collects decorations applied before it.
            _ => {}
        }
        Ok(())
    }

    // ── Mode setting ────────────────────────────────────────────────────

    fn translate_mode_setting(&mut self, op: Op, inst: &Instruction, ops: &[u32]) -> Result<()> {
        match op {
            Op::Capability => {
                self.require_operands(inst, ops, 1)?;
                let capability = Capability::from_u32(ops[0])
                    .ok_or_else(|| Error::invalid(format!("unknown capability {}", ops[0])))?;
                if UNSUPPORTED_CAPABILITIES.contains(&capability) {
                    return Err(Error::invalid(format!(
                        "capability {capability:?} is not allowed in shader modules"
                    )));
                }
                self.ir.capabilities.push(capability);
            }
            Op::Extension => {
                self.require_operands(inst, ops, 1)?;
                let (name, _) = extract_string(ops)?;
                self.ir.extensions.push(name);
            }
            Op::ExtInstImport => {
                self.require_operands(inst, ops, 2)?;
                let id = ops[0];
                let (name, _) = extract_string(&ops[1..])?;
                let kind = if name == "GLSL.std.450" {
                    ExtensionKind::GlslStd450
                } else if name.starts_with("NonSemantic.") {
                    ExtensionKind::NonSemantic
                } else {
                    warn!("extended instruction set {name} is not supported");
                    ExtensionKind::Unsupported(name)
                };
                self.ir
                    .ids
                    .set(id, Node::Extension(SpirExtension { self_id: id, kind }))?;
            }
            Op::EntryPoint => {
                self.require_operands(inst, ops, 3)?;
                let model = ExecutionModel::from_u32(ops[0])
                    .ok_or_else(|| Error::invalid(format!("unknown execution model {}", ops[0])))?;
                let (name, used) = extract_string(&ops[2..])?;
                let interface = ops[2 + used..].to_vec();
                self.ir
                    .entry_points
                    .push(EntryPoint::new(ops[1], name, model, interface));
            }
            Op::ExecutionMode => {
                self.require_operands(inst, ops, 2)?;
                self.apply_execution_mode(ops[0], ops[1], &ops[2..])?;
            }
            Op::ExecutionModeId => {
                warn!("ignoring id-based execution mode on %{}", ops.first().copied().unwrap_or(0));
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_execution_mode(&mut self, function: Id, mode: u32, args: &[u32]) -> Result<()> {
        let mode = ExecutionMode::from_u32(mode)
            .ok_or_else(|| Error::invalid(format!("unknown execution mode {mode}")))?;
        let mut matched = false;
        for entry in self
            .ir
            .entry_points
            .iter_mut()
            .filter(|e| e.function == function)
        {
            matched = true;
            match mode {
                ExecutionMode::LocalSize => {
                    if let [x, y, z, ..] = args {
                        entry.workgroup_size = [*x, *y, *z];
                    } else {
                        return Err(Error::invalid("LocalSize needs three literals"));
                    }
                }
                ExecutionMode::OriginUpperLeft => entry.origin_upper_left = true,
                ExecutionMode::OriginLowerLeft => entry.origin_upper_left = false,
                ExecutionMode::PixelCenterInteger => entry.pixel_center_integer = true,
                ExecutionMode::EarlyFragmentTests => entry.early_fragment_tests = true,
                ExecutionMode::DepthReplacing => entry.depth_replacing = true,
                other => warn!("ignoring execution mode {other:?}"),
            }
        }
        if !matched {
            return Err(Error::invalid(format!(
                "execution mode targets %{function}, which is not an entry point"
            ))
            .at_id(function));
        }
        Ok(())
    }

    // ── Types ───────────────────────────────────────────────────────────

    fn translate_type(&mut self, op: Op, inst: &Instruction, ops: &[u32]) -> Result<()> {
        self.require_operands(inst, ops, 1)?;
        let id = ops[0];
        let ids = &self.ir.ids;

        let ty = match op {
            Op::TypeVoid => SpirType::scalar(id, BaseType::Void, 0),
            Op::TypeBool => SpirType::scalar(id, BaseType::Boolean, 32),
            Op::TypeInt => {
                self.require_operands(inst, ops, 3)?;
                let width = ops[1];
                let base = match (width, ops[2] != 0) {
                    (64, true) => BaseType::Int64,
                    (64, false) => BaseType::UInt64,
                    (_, true) => BaseType::Int,
                    (_, false) => BaseType::UInt,
                };
                SpirType::scalar(id, base, width)
            }
            Op::TypeFloat => {
                self.require_operands(inst, ops, 2)?;
                let base = match ops[1] {
                    16 => BaseType::Half,
                    32 => BaseType::Float,
                    64 => BaseType::Double,
                    other => {
                        return Err(Error::invalid(format!("float width {other}")).at_id(id))
                    }
                };
                SpirType::scalar(id, base, ops[1])
            }
            Op::TypeVector => {
                self.require_operands(inst, ops, 3)?;
                let component = ids.get_type(ops[1])?;
                let numeric = component.basetype == BaseType::Boolean
                    || component.basetype.is_integer()
                    || component.basetype.is_float();
                if !numeric || !component.is_scalar() {
                    return Err(Error::invalid("vector of a non-scalar component").at_id(id));
                }
                let mut ty = component.derive(id);
                ty.vecsize = component_count(id, ops[2])?;
                ty
            }
            Op::TypeMatrix => {
                self.require_operands(inst, ops, 3)?;
                let column = ids.get_type(ops[1])?;
                if !column.basetype.is_float() || !column.is_vector() || column.pointer {
                    return Err(Error::invalid("matrix column is not a vector").at_id(id));
                }
                let mut ty = column.derive(id);
                ty.columns = component_count(id, ops[2])?;
                ty
            }
            Op::TypeImage => {
                self.require_operands(inst, ops, 8)?;
                ids.get_type(ops[1])?;
                let dim = Dim::from_u32(ops[2])
                    .ok_or_else(|| Error::invalid(format!("unknown image dim {}", ops[2])).at_id(id))?;
                let format = ImageFormat::from_u32(ops[7]).ok_or_else(|| {
                    Error::invalid(format!("unknown image format {}", ops[7])).at_id(id)
                })?;
                let mut ty = SpirType::scalar(id, BaseType::Image, 0);
                ty.image = Some(ImageInfo {
                    sampled_type: ops[1],
                    dim,
                    depth: ops[3] == 1,
                    arrayed: ops[4] != 0,
                    multisampled: ops[5] != 0,
                    sampled: ops[6],
                    format,
                });
                ty
            }
            Op::TypeSampler => SpirType::scalar(id, BaseType::Sampler, 0),
            Op::TypeSampledImage => {
                self.require_operands(inst, ops, 2)?;
                let mut ty = ids.get_type(ops[1])?.derive(id);
                ty.basetype = BaseType::SampledImage;
                ty
            }
            Op::TypeArray => {
                self.require_operands(inst, ops, 3)?;
                let mut ty = ids.get_type(ops[1])?.derive(id);
                let (size, literal) = self.array_length(ops[2])?;
                ty.push_array_dimension(size, literal);
                ty
            }
            Op::TypeRuntimeArray => {
                self.require_operands(inst, ops, 2)?;
                let mut ty = ids.get_type(ops[1])?.derive(id);
                ty.push_array_dimension(0, true);
                ty
            }
            Op::TypeStruct => {
                for &member in &ops[1..] {
                    ids.get_type(member)?;
                }
                let mut ty = SpirType::scalar(id, BaseType::Struct, 0);
                ty.member_types = ops[1..].to_vec();
                ty.type_alias = self.find_struct_alias(&ty);
                ty
            }
            Op::TypePointer => {
                self.require_operands(inst, ops, 3)?;
                let storage = StorageClass::from_u32(ops[1]).ok_or_else(|| {
                    Error::invalid(format!("unknown storage class {}", ops[1])).at_id(id)
                })?;
                let mut ty = ids.get_type(ops[2])?.derive(id);
                ty.pointer = true;
                ty.storage = storage;
                ty
            }
            Op::TypeFunction => {
                self.require_operands(inst, ops, 2)?;
                self.ir.ids.set(
                    id,
                    Node::FunctionPrototype(SpirFunctionPrototype {
                        self_id: id,
                        return_type: ops[1],
                        parameter_types: ops[2..].to_vec(),
                    }),
                )?;
                return Ok(());
            }
            Op::TypeForwardPointer => {
                return Err(Error::unsupported("forward-declared pointers").at_id(id));
            }
            other => {
                return Err(Error::internal(format!("{other:?} is not a type opcode")).at_id(id));
            }
        };

        self.ir.ids.set(id, Node::Type(ty))?;
        self.ir.declaration_order.push(id);
        Ok(())
    }

    /// Array length operand: a literal for plain constants, the ID itself
    /// for specialization constants.
    fn array_length(&self, length: Id) -> Result<(u32, bool)> {
        if let Some(constant) = self.ir.ids.maybe_constant(length) {
            if constant.specialization {
                return Ok((length, false));
            }
            return Ok((constant.scalar_u32(), true));
        }
        if self.ir.ids.maybe_constant_op(length).is_some() {
            return Ok((length, false));
        }
        Err(Error::invalid(format!("array length %{length} is not a constant")).at_id(length))
    }

    /// The struct a newly declared struct should alias, or 0.
    ///
    /// Only named structs are merged. Stripped modules give every struct an
    /// empty name and merging those could pun unrelated types.
    fn find_struct_alias(&self, ty: &SpirType) -> Id {
        let name = self.ir.meta.name(ty.self_id);
        if name.is_empty() {
            return 0;
        }
        self.ir
            .declaration_order
            .iter()
            .copied()
            .find(|&other| {
                let Some(candidate) = self.ir.ids.maybe_type(other) else {
                    return false;
                };
                candidate.is_struct()
                    && !candidate.pointer
                    && candidate.type_alias == 0
                    && self.ir.meta.name(other) == name
                    && candidate.member_types.len() == ty.member_types.len()
                    && candidate
                        .member_types
                        .iter()
                        .zip(&ty.member_types)
                        .all(|(&a, &b)| self.types_equivalent(a, b))
            })
            .unwrap_or(0)
    }

    fn types_equivalent(&self, a: Id, b: Id) -> bool {
        if a == b {
            return true;
        }
        let (Some(ta), Some(tb)) = (self.ir.ids.maybe_type(a), self.ir.ids.maybe_type(b)) else {
            return false;
        };
        if ta.basetype != tb.basetype
            || ta.width != tb.width
            || ta.vecsize != tb.vecsize
            || ta.columns != tb.columns
            || ta.array != tb.array
            || ta.array_size_literal != tb.array_size_literal
            || ta.pointer != tb.pointer
        {
            return false;
        }
        if ta.is_array() || ta.pointer {
            return self.types_equivalent(ta.parent_type, tb.parent_type);
        }
        if ta.basetype == BaseType::Struct {
            return self.ir.alias_master(a) == self.ir.alias_master(b);
        }
        true
    }

    // ── Constants ───────────────────────────────────────────────────────

    fn translate_constant(&mut self, op: Op, inst: &Instruction, ops: &[u32]) -> Result<()> {
        self.require_operands(inst, ops, 2)?;
        let (ty, id) = (ops[0], ops[1]);
        self.ir.ids.get_type(ty)?;
        let specialization = matches!(
            op,
            Op::SpecConstantTrue | Op::SpecConstantFalse | Op::SpecConstant | Op::SpecConstantComposite
        );

        let constant = match op {
            Op::ConstantTrue | Op::SpecConstantTrue => {
                SpirConstant::scalar(id, ty, 1, specialization)
            }
            Op::ConstantFalse | Op::SpecConstantFalse => {
                SpirConstant::scalar(id, ty, 0, specialization)
            }
            Op::Constant | Op::SpecConstant => {
                self.require_operands(inst, ops, 3)?;
                let low = ops[2] as u64;
                let high = ops.get(3).map_or(0, |&w| (w as u64) << 32);
                SpirConstant::scalar(id, ty, low | high, specialization)
            }
            Op::ConstantNull => {
                if self.null_nodes(ty, 0)? > MAX_NULL_NODES {
                    return Err(Error::unsupported("null constant is too large to expand").at_id(id));
                }
                self.make_null_constant(id, ty)?;
                self.ir.declaration_order.push(id);
                return Ok(());
            }
            _ => self.composite_constant(id, ty, &ops[2..], specialization)?,
        };

        self.ir.ids.set(id, Node::Constant(constant))?;
        self.ir.declaration_order.push(id);
        Ok(())
    }

    fn composite_constant(
        &self,
        id: Id,
        ty: Id,
        elements: &[Id],
        specialization: bool,
    ) -> Result<SpirConstant> {
        for &element in elements {
            match self.ir.ids.kind(element) {
                NodeKind::ConstantOp if !specialization => {
                    return Err(Error::invalid(format!(
                        "specialization operation %{element} used in a non-specialization composite"
                    ))
                    .at_id(id));
                }
                NodeKind::Constant | NodeKind::ConstantOp | NodeKind::Undef => {}
                other => {
                    return Err(Error::invalid(format!(
                        "composite constituent %{element} is a {other}"
                    ))
                    .at_id(id));
                }
            }
        }

        let shape = self.ir.ids.get_type(ty)?;
        let foldable = !shape.is_array() && shape.basetype != BaseType::Struct;
        let all_plain = elements.iter().all(|&e| {
            self.ir
                .ids
                .maybe_constant(e)
                .is_some_and(|c| !c.specialization && c.subconstants.is_empty())
        });

        let mut constant = SpirConstant {
            self_id: id,
            constant_type: ty,
            columns: shape.columns,
            vecsize: shape.vecsize,
            values: Vec::new(),
            subconstants: Vec::new(),
            specialization,
            is_null: false,
            is_used_as_lut: false,
        };

        if foldable && all_plain {
            for &element in elements {
                constant
                    .values
                    .extend_from_slice(&self.ir.ids.get_constant(element)?.values);
            }
        } else {
            constant.subconstants = elements.to_vec();
        }
        Ok(constant)
    }

    /// Number of constant nodes a null `ty` expands to, counting up from
    /// `seen` and stopping once past the expansion limit.
    fn null_nodes(&self, ty: Id, seen: u64) -> Result<u64> {
        let shape = self.ir.ids.get_type(ty)?;
        let mut total = seen + 1;
        if total > MAX_NULL_NODES {
            return Ok(total);
        }
        if shape.is_array() {
            let length = shape.array.last().copied().unwrap_or(0) as u64;
            let element = self.null_nodes(shape.parent_type, 0)?;
            total = total.saturating_add(length.saturating_mul(element));
        } else if shape.basetype == BaseType::Struct {
            for &member in &shape.member_types {
                total = self.null_nodes(member, total)?;
                if total > MAX_NULL_NODES {
                    break;
                }
            }
        }
        Ok(total)
    }

    /// Build a zero constant of `ty` at `id`, allocating fresh IDs for the
    /// members of aggregates.
    fn make_null_constant(&mut self, id: Id, ty: Id) -> Result<()> {
        let shape = self.ir.ids.get_type(ty)?.clone();
        let mut constant = SpirConstant {
            self_id: id,
            constant_type: ty,
            columns: shape.columns,
            vecsize: shape.vecsize,
            values: Vec::new(),
            subconstants: Vec::new(),
            specialization: false,
            is_null: true,
            is_used_as_lut: false,
        };

        if shape.is_array() {
            let length = match (shape.array.last(), shape.array_size_literal.last()) {
                (Some(&n), Some(true)) if n > 0 => n,
                _ => {
                    return Err(
                        Error::unsupported("null constant of a non-literal array size").at_id(id)
                    )
                }
            };
            let element = self.ir.ids.increase_bound(1);
            self.make_null_constant(element, shape.parent_type)?;
            constant.subconstants = vec![element; length as usize];
        } else if shape.basetype == BaseType::Struct {
            for member in shape.member_types {
                let sub = self.ir.ids.increase_bound(1);
                self.make_null_constant(sub, member)?;
                constant.subconstants.push(sub);
            }
        } else {
            let count = shape
                .columns
                .checked_mul(shape.vecsize)
                .ok_or_else(|| Error::invalid("null constant shape overflows").at_id(id))?;
            constant.values = vec![0; count as usize];
        }

        self.ir.ids.set(id, Node::Constant(constant))
    }

    // ── Variables and functions ─────────────────────────────────────────

    fn translate_variable(&mut self, inst: &Instruction, ops: &[u32]) -> Result<()> {
        self.require_operands(inst, ops, 3)?;
        let (ty, id) = (ops[0], ops[1]);
        let storage = StorageClass::from_u32(ops[2])
            .ok_or_else(|| Error::invalid(format!("unknown storage class {}", ops[2])).at_id(id))?;
        if !self.ir.ids.get_type(ty)?.pointer {
            return Err(Error::invalid(format!("variable %{id} has a non-pointer type")).at_id(id));
        }
        let initializer = ops.get(3).copied();

        self.ir.ids.set(
            id,
            Node::Variable(SpirVariable::new(id, ty, storage, initializer)),
        )?;

        if storage == StorageClass::Function {
            return self.add_local_variable(id);
        }
        if self.current_function.is_some() {
            return Err(Error::invalid(format!(
                "{storage:?} variable %{id} declared inside a function"
            ))
            .at_id(id));
        }
        self.ir.global_variables.push(id);
        self.ir.declaration_order.push(id);
        if matches!(
            storage,
            StorageClass::Workgroup | StorageClass::Private | StorageClass::Output
        ) {
            self.ir.aliased_variables.push(id);
        }
        Ok(())
    }

    fn translate_function(&mut self, op: Op, inst: &Instruction, ops: &[u32]) -> Result<()> {
        match op {
            Op::Function => {
                self.require_operands(inst, ops, 4)?;
                self.ir.ids.get_prototype(ops[3])?;
                self.begin_function(ops[1], ops[0], ops[3])
            }
            Op::FunctionParameter => {
                self.require_operands(inst, ops, 2)?;
                let (ty, id) = (ops[0], ops[1]);
                let function = self.function_id()?;
                if self.current_block.is_some() {
                    return Err(Error::invalid("function parameter after the first label").at_id(id));
                }
                let mut param = SpirVariable::new(id, ty, StorageClass::Function, None);
                param.parameter = true;
                self.ir.ids.set(id, Node::Variable(param))?;
                self.ir
                    .ids
                    .get_function_mut(function)?
                    .arguments
                    .push(Parameter { id, type_id: ty });
                Ok(())
            }
            _ => self.end_function(),
        }
    }

    fn translate_phi(&mut self, inst: &Instruction, ops: &[u32]) -> Result<()> {
        self.require_operands(inst, ops, 2)?;
        let (ty, id) = (ops[0], ops[1]);
        if (ops.len() - 2) % 2 != 0 {
            return Err(Error::invalid("phi operands must come in (value, parent) pairs").at_id(id));
        }
        let block = self.block_mut()?;
        for pair in ops[2..].chunks_exact(2) {
            block.phi_variables.push(Phi {
                local_variable: pair[0],
                parent: pair[1],
                function_variable: id,
            });
        }

        let mut variable = SpirVariable::new(id, ty, StorageClass::Function, None);
        variable.phi_variable = true;
        self.ir.ids.set(id, Node::Variable(variable))?;
        self.add_local_variable(id)
    }

    // ── Control flow ────────────────────────────────────────────────────

    fn translate_merge(&mut self, op: Op, inst: &Instruction, ops: &[u32]) -> Result<()> {
        let header = self
            .current_block
            .ok_or_else(|| Error::invalid("no block in scope"))?;
        let merge = if op == Op::LoopMerge {
            self.require_operands(inst, ops, 2)?;
            self.ir.continue_blocks.insert(ops[1], header);
            Merge::Loop {
                merge_block: ops[0],
                continue_block: ops[1],
            }
        } else {
            self.require_operands(inst, ops, 1)?;
            Merge::Selection {
                merge_block: ops[0],
            }
        };
        self.block_mut()?.merge = merge;
        Ok(())
    }

    fn translate_terminator(&mut self, op: Op, inst: &Instruction, ops: &[u32]) -> Result<()> {
        let terminator = match op {
            Op::Branch => {
                self.require_operands(inst, ops, 1)?;
                Terminator::Direct(ops[0])
            }
            Op::BranchConditional => {
                self.require_operands(inst, ops, 3)?;
                Terminator::Select {
                    condition: ops[0],
                    true_block: ops[1],
                    false_block: ops[2],
                }
            }
            Op::Switch => {
                self.require_operands(inst, ops, 2)?;
                let selector = ops[0];
                let wide = self
                    .ir
                    .type_of(selector)
                    .and_then(|ty| self.ir.ids.maybe_type(ty))
                    .is_some_and(|ty| ty.width > 32);
                let stride = if wide { 3 } else { 2 };
                let targets = &ops[2..];
                if targets.len() % stride != 0 {
                    return Err(Error::invalid("switch case list is truncated"));
                }
                let cases = targets
                    .chunks_exact(stride)
                    .map(|chunk| {
                        let value = if wide {
                            chunk[0] as u64 | ((chunk[1] as u64) << 32)
                        } else {
                            chunk[0] as u64
                        };
                        (value, chunk[stride - 1])
                    })
                    .collect();
                Terminator::MultiSelect {
                    selector,
                    default: ops[1],
                    cases,
                }
            }
            Op::Return => Terminator::Return(None),
            Op::ReturnValue => {
                self.require_operands(inst, ops, 1)?;
                Terminator::Return(Some(ops[0]))
            }
            Op::Unreachable => Terminator::Unreachable,
            _ => Terminator::Kill,
        };
        self.terminate(terminator, inst.offset)
    }
}
