//! Body instructions: value reads, memory access, composites and calls.
//!
//! Every result either becomes a forwarded expression, whose text is
//! inlined at each use, or is stored in a named temporary. The read
//! tracking in the parent module checks after the fact whether inlining was
//! safe; a wrong guess pins the value to a temporary for the next attempt.

use super::{is_simple, CodeGenerator};
use crate::backend::Dialect;
use crate::error::{Error, Result};
use crate::ir::opcode::{classify, OpFamily};
use crate::ir::{
    BaseType, DecorationFlags, Id, Node, SpirAccessChain, SpirExpression, SpirType,
};
use crate::parser::Instruction;
use log::trace;
use spirv::{BuiltIn, Op, StorageClass};
use std::collections::{BTreeSet, HashMap};

const COMPONENTS: [char; 4] = ['x', 'y', 'z', 'w'];

/// Signedness an integer operation expects of its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Sign {
    Any,
    Signed,
    Unsigned,
}

/// `basetype` with the signedness `sign` asks for. Non-integers are kept.
pub(super) fn with_sign(basetype: BaseType, sign: Sign) -> BaseType {
    match sign {
        Sign::Signed if basetype.is_unsigned_integer() => basetype.flip_sign(),
        Sign::Unsigned if basetype.is_signed_integer() => basetype.flip_sign(),
        _ => basetype,
    }
}

/// Parenthesize `text` unless it already reads as a single operand.
pub(super) fn enclose(text: &str) -> String {
    if is_simple(text) || is_enclosed(text) {
        text.to_string()
    } else {
        format!("({text})")
    }
}

/// `f(...)`, `vec3(...)` or `(...)` where the first parenthesis closes at
/// the very end.
fn is_enclosed(text: &str) -> bool {
    let Some(open) = text.find('(') else {
        return false;
    };
    let prefix_ok = text[..open]
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '[' | ']'));
    if !prefix_ok || !text.ends_with(')') {
        return false;
    }
    let mut depth = 0u32;
    for (index, c) in text.char_indices().skip(open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return index == text.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

pub(super) fn component(index: u32) -> Result<char> {
    COMPONENTS
        .get(index as usize)
        .copied()
        .ok_or_else(|| Error::invalid(format!("component {index} is out of range")))
}

pub(super) fn truncated(op: Op) -> Error {
    Error::invalid(format!("{op:?} has too few operands"))
}

/// GLSL type of an integer builtin, which SPIR-V may declare with the
/// other signedness.
fn builtin_base(builtin: BuiltIn) -> Option<BaseType> {
    match builtin {
        BuiltIn::VertexIndex
        | BuiltIn::InstanceIndex
        | BuiltIn::VertexId
        | BuiltIn::InstanceId
        | BuiltIn::BaseVertex
        | BuiltIn::BaseInstance
        | BuiltIn::DrawIndex
        | BuiltIn::PrimitiveId
        | BuiltIn::InvocationId
        | BuiltIn::Layer
        | BuiltIn::ViewportIndex
        | BuiltIn::SampleId
        | BuiltIn::SampleMask
        | BuiltIn::PatchVertices => Some(BaseType::Int),
        BuiltIn::NumWorkgroups
        | BuiltIn::WorkgroupId
        | BuiltIn::LocalInvocationId
        | BuiltIn::GlobalInvocationId
        | BuiltIn::LocalInvocationIndex
        | BuiltIn::WorkgroupSize => Some(BaseType::UInt),
        _ => None,
    }
}

impl<D: Dialect> CodeGenerator<'_, D> {
    // ── Dispatch ────────────────────────────────────────────────────────

    pub(super) fn emit_block_ops(&mut self, block: Id) -> Result<()> {
        let ops = self.ir.ids.get_block(block)?.ops.clone();
        for inst in ops {
            self.emit_instruction(inst)
                .map_err(|err| err.at_offset(inst.offset))?;
        }
        Ok(())
    }

    fn emit_instruction(&mut self, inst: Instruction) -> Result<()> {
        let op = inst
            .op()
            .ok_or_else(|| Error::invalid(format!("unknown opcode {}", inst.opcode)))?;
        let operands = self.ir.operands(&inst).to_vec();
        trace!("emitting {op:?}");
        match classify(op) {
            OpFamily::Memory => self.emit_memory(op, &operands),
            OpFamily::Composite => self.emit_composite(op, &operands),
            OpFamily::Arithmetic | OpFamily::Bitwise | OpFamily::Logical => {
                self.emit_operator(op, &operands)
            }
            OpFamily::Conversion => self.emit_conversion(op, &operands),
            OpFamily::Derivative => self.emit_derivative(op, &operands),
            OpFamily::Image => self.emit_image(op, &operands),
            OpFamily::Atomic => self.emit_atomic(op, &operands),
            OpFamily::Barrier => self.emit_barrier(op, &operands),
            OpFamily::ExtInst => self.emit_ext_inst(&operands),
            OpFamily::Call => self.emit_call(&operands),
            OpFamily::Geometry => self.emit_geometry(op),
            OpFamily::Unsupported => Err(Error::unsupported(format!(
                "{op:?} has no GLSL equivalent"
            ))),
            // Declarations and control flow are handled by their owners.
            OpFamily::Debug
            | OpFamily::Annotation
            | OpFamily::ModeSetting
            | OpFamily::Type
            | OpFamily::Constant
            | OpFamily::SpecConstantOp
            | OpFamily::Undef
            | OpFamily::Variable
            | OpFamily::Function
            | OpFamily::Label
            | OpFamily::Phi
            | OpFamily::Merge
            | OpFamily::Terminator
            | OpFamily::Nop => Ok(()),
        }
    }

    // ── Reading values ──────────────────────────────────────────────────

    /// Source text of a value or pointer at a use site.
    pub(super) fn read(&mut self, id: Id) -> Result<String> {
        match self.ir.ids.node(id) {
            Some(Node::Expression(expr)) => {
                let text = expr.text.clone();
                if expr.forwarded {
                    self.track_read(id)?;
                }
                Ok(text)
            }
            Some(Node::AccessChain(chain)) => {
                let text = chain.text.clone();
                self.track_read(id)?;
                Ok(text)
            }
            Some(Node::Constant(_)) => self.constant_expression(id),
            Some(Node::ConstantOp(_) | Node::Undef(_) | Node::CombinedImageSampler(_)) => {
                Ok(self.name_of(id))
            }
            Some(Node::Variable(_)) => self.variable_reference(id),
            Some(Node::None) | None => {
                Err(Error::internal(format!("%{id} is read before it is defined")).at_id(id))
            }
            Some(other) => Err(Error::invalid(format!(
                "%{id} is a {} and cannot be used as a value",
                other.kind()
            ))
            .at_id(id)),
        }
    }

    /// Like [`Self::read`], for text that is about to be written more than
    /// once. Complex forwarded values get a temporary next time.
    pub(super) fn read_duplicable(&mut self, id: Id) -> Result<String> {
        let text = self.read(id)?;
        let forwarded = matches!(self.ir.ids.node(id), Some(Node::Expression(e)) if e.forwarded);
        if forwarded && !is_simple(&text) {
            self.force(id);
        }
        Ok(text)
    }

    /// How a variable is spelled: its name, a builtin, or the implicit
    /// block of a builtin interface.
    pub(super) fn variable_reference(&mut self, var: Id) -> Result<String> {
        if self.pending_locals.contains(&var) {
            self.flush_pending_locals()?;
        }
        let variable = self.ir.ids.get_variable(var)?;
        let (storage, pointer_type) = (variable.storage, variable.basetype);
        let plain = variable.parameter || variable.phi_variable;
        if let Some(builtin) = self.ir.meta.builtin(var) {
            return Ok(self.dialect.builtin_name(builtin, storage)?.to_string());
        }
        if !plain && self.is_builtin_block(pointer_type)? {
            let arrayed = self.ir.ids.pointee_type(pointer_type)?.is_array();
            let name = match (storage, arrayed) {
                (StorageClass::Input, true) => "gl_in",
                (StorageClass::Output, true) => "gl_out",
                // Members of an unarrayed block are plain globals.
                _ => "",
            };
            return Ok(name.to_string());
        }
        Ok(self.name_of(var))
    }

    /// Whether a struct carries builtin members (`gl_PerVertex`).
    pub(super) fn is_builtin_block(&self, type_id: Id) -> Result<bool> {
        let ty = self.element_type(type_id)?;
        Ok(ty.basetype == BaseType::Struct
            && (0..ty.member_types.len()).any(|i| self.ir.meta.member_builtin(ty.self_id, i).is_some()))
    }

    /// Variable a pointer or opaque value ultimately refers to.
    pub(super) fn root_of(&self, pointer: Id) -> Id {
        match self.ir.ids.node(pointer) {
            Some(Node::AccessChain(chain)) => chain.base,
            _ => self.opaque_roots.get(&pointer).copied().unwrap_or(pointer),
        }
    }

    fn builtin_of(&self, pointer: Id) -> Option<BuiltIn> {
        match self.ir.ids.node(pointer) {
            Some(Node::Variable(_)) => self.ir.meta.builtin(pointer),
            _ => self.chain_builtins.get(&pointer).copied(),
        }
    }

    pub(super) fn constant_u32(&self, id: Id) -> Result<u32> {
        self.ir
            .ids
            .maybe_constant(id)
            .map(|c| c.scalar_u32())
            .ok_or_else(|| Error::invalid(format!("%{id} must be a constant")).at_id(id))
    }

    pub(super) fn value_type(&self, id: Id) -> Result<SpirType> {
        let type_id = self.type_of(id)?;
        Ok(self.ir.ids.get_type(type_id)?.clone())
    }

    pub(super) fn value_shape(&self, id: Id) -> Result<(BaseType, u32)> {
        let ty = self.value_type(id)?;
        Ok((ty.basetype, ty.vecsize))
    }

    /// Read `id`, converting integers to the signedness `sign` asks for.
    pub(super) fn operand(&mut self, id: Id, sign: Sign) -> Result<String> {
        let text = self.read(id)?;
        let (basetype, vecsize) = self.value_shape(id)?;
        let wanted = with_sign(basetype, sign);
        if wanted == basetype {
            return Ok(text);
        }
        let name = self.numeric_type_name(wanted, vecsize)?;
        Ok(format!("{name}({text})"))
    }

    /// Signedness of integer type `type_id`, `Any` otherwise.
    pub(super) fn sign_of(&self, type_id: Id) -> Result<Sign> {
        let basetype = self.element_type(type_id)?.basetype;
        Ok(if basetype.is_signed_integer() {
            Sign::Signed
        } else if basetype.is_unsigned_integer() {
            Sign::Unsigned
        } else {
            Sign::Any
        })
    }

    /// Convert `text`, computed with scalar type `computed`, to result type
    /// `ty` when the two differ in signedness.
    pub(super) fn cast_result_from(
        &mut self,
        ty: Id,
        text: String,
        computed: BaseType,
    ) -> Result<String> {
        let basetype = self.ir.ids.get_type(ty)?.basetype;
        if basetype == computed || !basetype.is_integer() || !computed.is_integer() {
            return Ok(text);
        }
        let name = self.type_name(ty)?;
        Ok(format!("{name}({text})"))
    }

    /// Convert `text`, computed in signedness `sign`, to result type `ty`.
    pub(super) fn cast_result(&mut self, ty: Id, text: String, sign: Sign) -> Result<String> {
        let basetype = self.ir.ids.get_type(ty)?.basetype;
        self.cast_result_from(ty, text, with_sign(basetype, sign))
    }

    // ── Mutability ──────────────────────────────────────────────────────

    /// Whether nothing the shader does can change what `var` holds.
    pub(super) fn is_read_only(&self, var: Id) -> bool {
        let Some(variable) = self.ir.ids.maybe_variable(var) else {
            return true;
        };
        if variable.static_expression.is_some() {
            return true;
        }
        if variable.parameter {
            return !self
                .ir
                .ids
                .maybe_type(variable.basetype)
                .is_some_and(|ty| ty.pointer);
        }
        match variable.storage {
            StorageClass::Input | StorageClass::PushConstant => true,
            StorageClass::UniformConstant => !self.is_storage_image(var),
            StorageClass::Uniform if !self.is_buffer_block(var) => true,
            StorageClass::Uniform | StorageClass::StorageBuffer => self.is_non_writable(var),
            _ => false,
        }
    }

    /// Whether writes through other bindings may change what `var` holds.
    pub(super) fn is_aliasable(&self, var: Id) -> bool {
        let Some(variable) = self.ir.ids.maybe_variable(var) else {
            return false;
        };
        if self.ir.meta.has_flag(var, DecorationFlags::RESTRICT) {
            return false;
        }
        match variable.storage {
            StorageClass::StorageBuffer | StorageClass::AtomicCounter => true,
            StorageClass::Uniform => self.is_buffer_block(var),
            StorageClass::UniformConstant => self.is_storage_image(var),
            _ => false,
        }
    }

    fn pointee_of_variable(&self, var: Id) -> Option<&SpirType> {
        let variable = self.ir.ids.maybe_variable(var)?;
        let mut ty = self.ir.ids.maybe_type(variable.basetype)?;
        while ty.pointer || ty.is_array() {
            ty = self.ir.ids.maybe_type(ty.parent_type)?;
        }
        Some(ty)
    }

    pub(super) fn is_buffer_block(&self, var: Id) -> bool {
        self.pointee_of_variable(var).is_some_and(|ty| {
            self.ir
                .meta
                .has_flag(ty.self_id, DecorationFlags::BUFFER_BLOCK)
        })
    }

    pub(super) fn is_storage_image(&self, var: Id) -> bool {
        self.pointee_of_variable(var).is_some_and(|ty| {
            ty.basetype == BaseType::Image && ty.image.is_some_and(|info| info.sampled == 2)
        })
    }

    fn is_non_writable(&self, var: Id) -> bool {
        if self.ir.meta.has_flag(var, DecorationFlags::NON_WRITABLE) {
            return true;
        }
        self.pointee_of_variable(var).is_some_and(|ty| {
            !ty.member_types.is_empty()
                && (0..ty.member_types.len()).all(|i| {
                    self.ir
                        .meta
                        .has_member_flag(ty.self_id, i, DecorationFlags::NON_WRITABLE)
                })
        })
    }

    // ── Defining values ─────────────────────────────────────────────────

    /// Define `id` from `text`, inheriting reads and mutability from
    /// `inputs`.
    pub(super) fn emit_value(&mut self, ty: Id, id: Id, text: String, inputs: &[Id]) -> Result<()> {
        let mut reads = BTreeSet::new();
        let mut immutable = true;
        for &input in inputs {
            reads.extend(self.reads_of(input));
            immutable &= self.is_immutable(input);
        }
        self.emit_value_with(ty, id, text, reads, immutable, inputs)
    }

    pub(super) fn emit_value_with(
        &mut self,
        ty: Id,
        id: Id,
        text: String,
        reads: BTreeSet<Id>,
        immutable: bool,
        inputs: &[Id],
    ) -> Result<()> {
        if !self.should_forward(ty, id)? {
            return self.materialize(ty, id, text);
        }
        let handle = self.define(
            id,
            Node::Expression(SpirExpression {
                self_id: id,
                text,
                expression_type: ty,
                immutable,
                forwarded: true,
                dependencies: inputs.to_vec(),
            }),
        )?;
        self.track_definition(handle, reads);
        Ok(())
    }

    fn should_forward(&self, ty: Id, id: Id) -> Result<bool> {
        let t = self.ir.ids.get_type(ty)?;
        if t.pointer || t.basetype.is_opaque() {
            return Ok(true);
        }
        Ok(!self.options.force_temporary
            && !self.state.forced_temporaries.contains(&id)
            && !self.scope()?.hoisted_temporaries.contains(&id))
    }

    /// Store `text` in a named temporary and define `id` as that name.
    pub(super) fn materialize(&mut self, ty: Id, id: Id, text: String) -> Result<()> {
        let name = self.name_of(id);
        if self.scope()?.hoisted_temporaries.contains(&id) {
            self.buf.statement(&format!("{name} = {text};"));
        } else {
            let declaration = self.declare(ty, &name)?;
            self.buf.declaration(&format!("{declaration} = {text};"));
        }
        self.define(
            id,
            Node::Expression(SpirExpression {
                self_id: id,
                text: name,
                expression_type: ty,
                immutable: true,
                forwarded: false,
                dependencies: Vec::new(),
            }),
        )?;
        Ok(())
    }

    // ── Memory ──────────────────────────────────────────────────────────

    fn emit_memory(&mut self, op: Op, operands: &[u32]) -> Result<()> {
        match op {
            Op::Load => {
                let [ty, id, pointer, ..] = *operands else {
                    return Err(truncated(op));
                };
                self.emit_load(ty, id, pointer)
            }
            Op::Store => {
                let [pointer, value, ..] = *operands else {
                    return Err(truncated(op));
                };
                self.emit_store(pointer, value)
            }
            Op::CopyMemory => {
                let [target, source, ..] = *operands else {
                    return Err(truncated(op));
                };
                let lhs = self.read(target)?;
                let rhs = self.read(source)?;
                self.buf.statement(&format!("{lhs} = {rhs};"));
                let root = self.root_of(target);
                self.invalidate(root);
                Ok(())
            }
            Op::AccessChain | Op::InBoundsAccessChain => {
                let [ty, id, base, ..] = *operands else {
                    return Err(truncated(op));
                };
                self.emit_access_chain(ty, id, base, &operands[3..])
            }
            Op::ArrayLength => {
                let [ty, id, pointer, member] = *operands else {
                    return Err(truncated(op));
                };
                let text = self.read(pointer)?;
                let block = self.ir.ids.pointee_type(self.type_of(pointer)?)?.self_id;
                let member = self.member_name(block, member as usize)?;
                let text = self.cast_result_from(ty, format!("{text}.{member}.length()"), BaseType::Int)?;
                self.emit_value_with(ty, id, text, BTreeSet::new(), true, &[])
            }
            Op::ImageTexelPointer => {
                let [_, id, image, coordinate, ..] = *operands else {
                    return Err(truncated(op));
                };
                let image_text = self.read(image)?;
                let coordinate_text = self.operand(coordinate, Sign::Signed)?;
                let root = self.root_of(image);
                self.texel_pointers.insert(id, (image_text, coordinate_text));
                self.opaque_roots.insert(id, root);
                Ok(())
            }
            _ => Err(Error::unsupported(format!("{op:?} needs physical pointers"))),
        }
    }

    /// Captured initial value of a loop variable whose loop has not been
    /// opened yet.
    fn pending_loop_initializer(&self, var: Id) -> Option<String> {
        let variable = self.ir.ids.maybe_variable(var)?;
        let header = variable.dominator?;
        if !variable.loop_variable || self.emitted_blocks.contains(&header) {
            return None;
        }
        self.loop_initializers.get(&var).cloned()
    }

    fn emit_load(&mut self, ty: Id, id: Id, pointer: Id) -> Result<()> {
        let root = self.root_of(pointer);
        if pointer == root {
            if let Some(text) = self.pending_loop_initializer(root) {
                return self.emit_value_with(ty, id, text, BTreeSet::new(), true, &[]);
            }
        }

        let mut text = self.read(pointer)?;
        let read_only = self.is_read_only(root);
        let mut reads = self.reads_of(pointer);
        if !read_only {
            reads.insert(root);
        }
        if let Some(builtin) = self.builtin_of(pointer) {
            text = self.builtin_load_cast(ty, builtin, text)?;
        }
        if self.ir.ids.get_type(ty)?.basetype.is_opaque() {
            self.opaque_roots.insert(id, root);
        }
        self.emit_value_with(ty, id, text, reads, read_only, &[pointer])
    }

    fn builtin_load_cast(&mut self, ty: Id, builtin: BuiltIn, text: String) -> Result<String> {
        let value = self.ir.ids.get_type(ty)?;
        let Some(expected) = builtin_base(builtin) else {
            return Ok(text);
        };
        if value.is_array() || !value.basetype.is_integer() || value.basetype == expected {
            return Ok(text);
        }
        let name = self.type_name(ty)?;
        Ok(format!("{name}({text})"))
    }

    fn emit_store(&mut self, pointer: Id, value: Id) -> Result<()> {
        let root = self.root_of(pointer);
        if let Some(variable) = self.ir.ids.maybe_variable(root) {
            if variable.static_expression.is_some() {
                // Declared as a constant with this value.
                return Ok(());
            }
            let before_loop = variable.loop_variable
                && variable
                    .dominator
                    .is_some_and(|header| !self.emitted_blocks.contains(&header));
            if pointer == root && before_loop {
                let text = self.read(value)?;
                self.loop_initializers.insert(root, text);
                return Ok(());
            }
        }

        if let Some(index) = self.pending_locals.iter().position(|&var| var == pointer) {
            self.pending_locals.remove(index);
            let rhs = self.read(value)?;
            let pointer_type = self.ir.ids.get_variable(pointer)?.basetype;
            let ty = self.ir.ids.pointee_type(pointer_type)?.self_id;
            let name = self.name_of(pointer);
            let declaration = self.declare(ty, &name)?;
            self.buf.declaration(&format!("{declaration} = {rhs};"));
            self.invalidate(root);
            return Ok(());
        }

        let lhs = self.read(pointer)?;
        let mut rhs = self.read(value)?;
        if let Some(builtin) = self.builtin_of(pointer) {
            let target = self.ir.ids.pointee_type(self.type_of(pointer)?)?.clone();
            if let Some(expected) = builtin_base(builtin) {
                if !target.is_array() && target.basetype.is_integer() && target.basetype != expected {
                    let name = self.numeric_type_name(expected, target.vecsize)?;
                    rhs = format!("{name}({rhs})");
                }
            }
        }
        self.buf.statement(&format!("{lhs} = {rhs};"));
        self.invalidate(root);
        Ok(())
    }

    fn emit_access_chain(&mut self, ty: Id, id: Id, base: Id, indices: &[u32]) -> Result<()> {
        let root = self.root_of(base);
        let storage = self.ir.ids.get_type(ty)?.storage;
        let mut text = self.read(base)?;
        let mut reads = self.reads_of(base);
        let mut dependencies = match self.ir.ids.node(base) {
            Some(Node::AccessChain(chain)) => chain.dependencies.clone(),
            _ => Vec::new(),
        };
        let mut builtin = self.builtin_of(base);
        let mut current = self.ir.ids.pointee_type(self.type_of(base)?)?.self_id;

        for &index in indices {
            let ty = self.ir.ids.get_type(current)?.clone();
            if ty.is_array() || ty.is_matrix() {
                let index_text = self.read(index)?;
                reads.extend(self.reads_of(index));
                dependencies.push(index);
                text = format!("{text}[{index_text}]");
                current = ty.parent_type;
            } else if ty.is_struct() {
                let member = self.constant_u32(index)? as usize;
                let member_type = *ty.member_types.get(member).ok_or_else(|| {
                    Error::invalid(format!("member {member} is out of range")).at_id(id)
                })?;
                if let Some(member_builtin) = self.ir.meta.member_builtin(ty.self_id, member) {
                    let name = self.dialect.builtin_name(member_builtin, storage)?;
                    text = if text.is_empty() {
                        name.to_string()
                    } else {
                        format!("{text}.{name}")
                    };
                    builtin = Some(member_builtin);
                } else {
                    let name = self.member_name(ty.self_id, member)?;
                    text = format!("{text}.{name}");
                }
                current = member_type;
            } else if ty.is_vector() {
                let lane = self
                    .ir
                    .ids
                    .maybe_constant(index)
                    .filter(|c| !c.specialization)
                    .map(|c| c.scalar_u32());
                match lane {
                    Some(lane) => text = format!("{text}.{}", component(lane)?),
                    None => {
                        let index_text = self.read(index)?;
                        reads.extend(self.reads_of(index));
                        dependencies.push(index);
                        text = format!("{text}[{index_text}]");
                    }
                }
                current = ty.parent_type;
            } else {
                return Err(Error::invalid("access chain indexes into a scalar").at_id(id));
            }
        }

        let handle = self.define(
            id,
            Node::AccessChain(SpirAccessChain {
                self_id: id,
                basetype: ty,
                base: root,
                text,
                storage,
                dependencies,
            }),
        )?;
        self.track_definition(handle, reads);
        if let Some(builtin) = builtin {
            self.chain_builtins.insert(id, builtin);
        }
        Ok(())
    }

    /// Name of member `index` of a struct, resolved through its alias
    /// group.
    pub(super) fn member_name(&mut self, struct_id: Id, index: usize) -> Result<String> {
        let master = self.ir.alias_master(struct_id);
        let count = self.ir.ids.get_type(master)?.member_types.len();
        let preferred: Vec<String> = (0..count)
            .map(|i| self.ir.meta.member_name(master, i).to_string())
            .collect();
        let preferred: Vec<&str> = preferred.iter().map(String::as_str).collect();
        let dialect = self.dialect;
        self.names
            .members(master, &preferred, |s| dialect.is_keyword(s))
            .get(index)
            .cloned()
            .ok_or_else(|| {
                Error::invalid(format!("struct has no member {index}")).at_id(struct_id)
            })
    }

    // ── Composites ──────────────────────────────────────────────────────

    /// `.member[2].y` for a list of literal indices into `type_id`.
    fn literal_path(&mut self, type_id: Id, indices: &[u32]) -> Result<String> {
        let mut path = String::new();
        let mut current = type_id;
        for &index in indices {
            let ty = self.ir.ids.get_type(current)?.clone();
            if ty.is_array() || ty.is_matrix() {
                path.push_str(&format!("[{index}]"));
                current = ty.parent_type;
            } else if ty.is_struct() {
                let name = self.member_name(ty.self_id, index as usize)?;
                path.push('.');
                path.push_str(&name);
                current = *ty
                    .member_types
                    .get(index as usize)
                    .ok_or_else(|| Error::invalid(format!("member {index} is out of range")))?;
            } else if ty.is_vector() {
                path.push('.');
                path.push(component(index)?);
                current = ty.parent_type;
            } else {
                return Err(Error::invalid("composite index into a scalar"));
            }
        }
        Ok(path)
    }

    fn emit_composite(&mut self, op: Op, operands: &[u32]) -> Result<()> {
        let [ty, id, first, ..] = *operands else {
            return Err(truncated(op));
        };
        let rest = &operands[3..];
        match op {
            Op::CompositeConstruct => {
                let parts = &operands[2..];
                let mut texts = Vec::with_capacity(parts.len());
                for &part in parts {
                    texts.push(self.read(part)?);
                }
                let constructor = self.constructor_name(ty)?;
                self.emit_value(ty, id, format!("{constructor}({})", texts.join(", ")), parts)
            }
            Op::CompositeExtract => {
                let base = enclose(&self.read(first)?);
                let path = self.literal_path(self.type_of(first)?, rest)?;
                self.emit_value(ty, id, format!("{base}{path}"), &[first])
            }
            Op::CompositeInsert => {
                let [composite, ..] = *rest else {
                    return Err(truncated(op));
                };
                let object = self.read(first)?;
                let base = self.read(composite)?;
                let path = self.literal_path(self.type_of(composite)?, &rest[1..])?;
                self.materialize(ty, id, base)?;
                let name = self.name_of(id);
                self.buf.statement(&format!("{name}{path} = {object};"));
                Ok(())
            }
            Op::VectorExtractDynamic => {
                let [index, ..] = *rest else {
                    return Err(truncated(op));
                };
                let base = enclose(&self.read(first)?);
                let index_text = self.read(index)?;
                self.emit_value(ty, id, format!("{base}[{index_text}]"), &[first, index])
            }
            Op::VectorInsertDynamic => {
                let [value, index, ..] = *rest else {
                    return Err(truncated(op));
                };
                let value_text = self.read(value)?;
                let index_text = self.read(index)?;
                let base = self.read(first)?;
                self.materialize(ty, id, base)?;
                let name = self.name_of(id);
                self.buf
                    .statement(&format!("{name}[{index_text}] = {value_text};"));
                Ok(())
            }
            Op::VectorShuffle => {
                let [second, ..] = *rest else {
                    return Err(truncated(op));
                };
                self.emit_shuffle(ty, id, first, second, &rest[1..])
            }
            Op::CopyObject => self.emit_copy(ty, id, first),
            Op::Transpose => {
                let text = format!("transpose({})", self.read(first)?);
                self.emit_value(ty, id, text, &[first])
            }
            _ => Err(Error::internal(format!("{op:?} is not a composite op"))),
        }
    }

    fn emit_shuffle(&mut self, ty: Id, id: Id, first: Id, second: Id, selectors: &[u32]) -> Result<()> {
        let (_, first_size) = self.value_shape(first)?;
        // Undefined lanes (0xFFFFFFFF) may take any value; use lane 0.
        let lanes: Vec<(Id, u32)> = selectors
            .iter()
            .map(|&s| match s {
                u32::MAX => (first, 0),
                s if s < first_size => (first, s),
                s => (second, s - first_size),
            })
            .collect();

        let single_source = lanes.iter().all(|&(source, _)| source == lanes[0].0);
        if single_source {
            let source = lanes.first().map_or(first, |&(source, _)| source);
            let (_, source_size) = self.value_shape(source)?;
            let text = self.read(source)?;
            let identity = lanes.len() as u32 == source_size
                && lanes.iter().enumerate().all(|(i, &(_, lane))| lane == i as u32);
            let text = if identity {
                text
            } else {
                let swizzle: String = lanes
                    .iter()
                    .map(|&(_, lane)| component(lane))
                    .collect::<Result<_>>()?;
                format!("{}.{swizzle}", enclose(&text))
            };
            return self.emit_value(ty, id, text, &[source]);
        }

        let mut texts: HashMap<Id, String> = HashMap::new();
        for source in [first, second] {
            let text = self.read_duplicable(source)?;
            texts.insert(source, enclose(&text));
        }
        let mut groups: Vec<(Id, String)> = Vec::new();
        for (source, lane) in lanes {
            let c = component(lane)?;
            match groups.last_mut() {
                Some((last, swizzle)) if *last == source => swizzle.push(c),
                _ => groups.push((source, c.to_string())),
            }
        }
        let parts: Vec<String> = groups
            .iter()
            .map(|(source, swizzle)| {
                let base = texts.get(source).map(String::as_str).unwrap_or_default();
                format!("{base}.{swizzle}")
            })
            .collect();
        let constructor = self.constructor_name(ty)?;
        self.emit_value(ty, id, format!("{constructor}({})", parts.join(", ")), &[first, second])
    }

    fn emit_copy(&mut self, ty: Id, id: Id, source: Id) -> Result<()> {
        if let Some(&root) = self.opaque_roots.get(&source) {
            self.opaque_roots.insert(id, root);
        }
        let is_pointer = self.ir.ids.get_type(ty)?.pointer;
        match self.ir.ids.node(source).cloned() {
            Some(Node::AccessChain(mut chain)) => {
                chain.self_id = id;
                let reads = self.reads_of(source);
                let handle = self.define(id, Node::AccessChain(chain))?;
                self.track_definition(handle, reads);
                if let Some(&builtin) = self.chain_builtins.get(&source) {
                    self.chain_builtins.insert(id, builtin);
                }
                Ok(())
            }
            Some(Node::Variable(variable)) if is_pointer => {
                let text = self.variable_reference(source)?;
                let handle = self.define(
                    id,
                    Node::AccessChain(SpirAccessChain {
                        self_id: id,
                        basetype: ty,
                        base: source,
                        text,
                        storage: variable.storage,
                        dependencies: Vec::new(),
                    }),
                )?;
                self.track_definition(handle, BTreeSet::new());
                Ok(())
            }
            _ => {
                let text = self.read(source)?;
                self.emit_value(ty, id, text, &[source])
            }
        }
    }

    // ── Calls and geometry ──────────────────────────────────────────────

    fn emit_call(&mut self, operands: &[u32]) -> Result<()> {
        let [ty, id, function, ..] = *operands else {
            return Err(truncated(Op::FunctionCall));
        };
        let arguments = &operands[3..];
        let parameters = self.ir.ids.get_function(function)?.arguments.clone();
        if parameters.len() != arguments.len() {
            return Err(Error::invalid(format!(
                "call passes {} arguments to a function taking {}",
                arguments.len(),
                parameters.len()
            ))
            .at_id(id));
        }

        let mut texts = Vec::with_capacity(arguments.len());
        let mut written_roots = Vec::new();
        for (&argument, parameter) in arguments.iter().zip(&parameters) {
            let param_type = self.ir.ids.get_type(parameter.type_id)?;
            if param_type.pointer && !param_type.basetype.is_opaque() {
                written_roots.push(self.root_of(argument));
            }
            texts.push(self.read(argument)?);
        }
        let text = format!("{}({})", self.name_of(function), texts.join(", "));
        let pure = self.analysis.is_pure(function);

        if self.ir.ids.get_type(ty)?.basetype == BaseType::Void {
            self.buf.statement(&format!("{text};"));
        } else if pure && written_roots.is_empty() {
            let mut reads: BTreeSet<Id> = self
                .ir
                .global_variables
                .iter()
                .copied()
                .filter(|&var| !self.is_read_only(var))
                .collect();
            let mut immutable = reads.is_empty();
            for &argument in arguments {
                reads.extend(self.reads_of(argument));
                immutable &= self.is_immutable(argument);
            }
            return self.emit_value_with(ty, id, text, reads, immutable, arguments);
        } else {
            self.materialize(ty, id, text)?;
        }

        if !pure {
            self.invalidate_all();
        }
        for root in written_roots {
            self.invalidate(root);
        }
        Ok(())
    }

    fn emit_geometry(&mut self, op: Op) -> Result<()> {
        let statement = match op {
            Op::EmitVertex => "EmitVertex();",
            Op::EndPrimitive => "EndPrimitive();",
            _ => return Err(Error::unsupported(format!("{op:?} has no GLSL equivalent"))),
        };
        self.buf.statement(statement);
        self.invalidate_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enclose_leaves_single_operands_alone() {
        assert_eq!(enclose("a"), "a");
        assert_eq!(enclose("ubo.m[2]"), "ubo.m[2]");
        assert_eq!(enclose("texture(s, uv)"), "texture(s, uv)");
        assert_eq!(enclose("(a + b)"), "(a + b)");
        assert_eq!(enclose("a + b"), "(a + b)");
        assert_eq!(enclose("-x"), "(-x)");
        assert_eq!(enclose("f(a) + g(b)"), "(f(a) + g(b))");
        assert_eq!(enclose("(a) * (b)"), "((a) * (b))");
    }

    #[test]
    fn sign_requests_flip_only_integers() {
        assert_eq!(with_sign(BaseType::UInt, Sign::Signed), BaseType::Int);
        assert_eq!(with_sign(BaseType::Int, Sign::Unsigned), BaseType::UInt);
        assert_eq!(with_sign(BaseType::Int, Sign::Signed), BaseType::Int);
        assert_eq!(with_sign(BaseType::Float, Sign::Unsigned), BaseType::Float);
        assert_eq!(with_sign(BaseType::UInt64, Sign::Any), BaseType::UInt64);
    }

    #[test]
    fn components_stop_at_w() {
        assert_eq!(component(0).unwrap(), 'x');
        assert_eq!(component(3).unwrap(), 'w');
        assert!(component(4).unwrap_err().is_invalid());
    }

    #[test]
    fn integer_builtins_have_a_fixed_signedness() {
        assert_eq!(builtin_base(BuiltIn::VertexIndex), Some(BaseType::Int));
        assert_eq!(builtin_base(BuiltIn::GlobalInvocationId), Some(BaseType::UInt));
        assert_eq!(builtin_base(BuiltIn::Position), None);
    }
}
