//! Everything emitted before the first function: the version header, struct
//! types, specialization constants, undefined values and module-scope
//! variables.
//!
//! Resource variables are written as interface blocks or opaque uniforms
//! with the layout qualifiers the target understands. Qualifiers the target
//! cannot express at all (`binding` on old desktop versions, for example)
//! are left out rather than treated as errors; the reflection data still
//! carries them.

use super::expression::{component, enclose, truncated, Sign};
use super::operators::{comparison, infix};
use super::CodeGenerator;
use crate::backend::{Dialect, Feature, Support};
use crate::error::{Error, Result};
use crate::ir::{BaseType, DecorationFlags, Id, Node, SpirConstantOp};
use log::debug;
use spirv::{BuiltIn, ExecutionModel, Op, StorageClass};
use std::collections::BTreeSet;

/// `layout(a, b) ` or nothing.
fn layout(parts: &[String]) -> String {
    if parts.is_empty() {
        String::new()
    } else {
        format!("layout({}) ", parts.join(", "))
    }
}

/// Interpolation and auxiliary storage qualifiers of a stage variable.
fn interpolation(flags: DecorationFlags) -> Vec<(&'static str, Option<Feature>)> {
    let table = [
        (DecorationFlags::INVARIANT, "invariant", None),
        (DecorationFlags::FLAT, "flat", Some(Feature::FlatInterpolation)),
        (DecorationFlags::NO_PERSPECTIVE, "noperspective", Some(Feature::FlatInterpolation)),
        (DecorationFlags::CENTROID, "centroid", None),
        (DecorationFlags::SAMPLE, "sample", Some(Feature::SampleShading)),
        (DecorationFlags::PATCH, "patch", None),
    ];
    table
        .into_iter()
        .filter(|(flag, _, _)| flags.contains(*flag))
        .map(|(_, keyword, feature)| (keyword, feature))
        .collect()
}

/// Memory qualifiers of a buffer or storage image.
fn memory_qualifiers(flags: DecorationFlags) -> String {
    let table = [
        (DecorationFlags::COHERENT, "coherent "),
        (DecorationFlags::VOLATILE, "volatile "),
        (DecorationFlags::RESTRICT, "restrict "),
        (DecorationFlags::NON_WRITABLE, "readonly "),
        (DecorationFlags::NON_READABLE, "writeonly "),
    ];
    table
        .into_iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, keyword)| keyword)
        .collect()
}

impl<D: Dialect> CodeGenerator<'_, D> {
    /// Fix names that are not derived from debug names.
    pub(super) fn reserve_names(&mut self) -> Result<()> {
        self.names.reserve("main");
        self.names.bind(self.entry.function, "main");

        // A specialized local size is read through the builtin constant.
        for id in self.ir.declaration_order.clone() {
            if self.ir.meta.builtin(id) == Some(BuiltIn::WorkgroupSize)
                && matches!(self.ir.ids.node(id), Some(Node::Constant(_)))
            {
                self.names.bind(id, "gl_WorkGroupSize");
            }
        }

        // Globals first, in declaration order, so that their names do not
        // depend on which function happens to use them first.
        for var in self.ir.global_variables.clone() {
            if self.ir.meta.builtin(var).is_none() {
                self.name_of(var);
            }
        }
        for function in self.analysis.call_order.clone() {
            if function != self.entry.function {
                self.name_of(function);
            }
        }
        Ok(())
    }

    /// Take a feature if the target has it in any form.
    fn optional(&mut self, feature: Feature) -> Result<bool> {
        if self.dialect.support(feature) == Support::Unavailable {
            return Ok(false);
        }
        self.require(feature)?;
        Ok(true)
    }

    // ── Header ──────────────────────────────────────────────────────────

    pub(super) fn emit_header(&mut self) -> Result<()> {
        self.buf.line(&self.dialect.version_directive());
        for extension in &self.state.requested_extensions {
            self.buf.line(&format!("#extension {extension} : require"));
        }
        if self.dialect.es() {
            self.buf.line("precision highp float;");
            self.buf.line("precision highp int;");
        }

        match self.entry.model {
            ExecutionModel::GLCompute => {
                self.require(Feature::ComputeShader)?;
                let size = self.local_size()?;
                self.buf.line(&format!("layout({}) in;", size.join(", ")));
            }
            ExecutionModel::Fragment => {
                if self.entry.early_fragment_tests {
                    self.require(Feature::EarlyFragmentTests)?;
                    self.buf.line("layout(early_fragment_tests) in;");
                }
                let mut coord = Vec::new();
                if self.entry.origin_upper_left && !self.dialect.vulkan() {
                    coord.push("origin_upper_left".to_string());
                }
                if self.entry.pixel_center_integer {
                    coord.push("pixel_center_integer".to_string());
                }
                if !coord.is_empty() && self.analysis.active_builtins.is_active(BuiltIn::FragCoord)
                {
                    self.buf.line(&format!("{}in vec4 gl_FragCoord;", layout(&coord)));
                }
            }
            _ => {}
        }
        self.buf.blank_line();
        Ok(())
    }

    /// `local_size_x = 8` or, for a specialized dimension under Vulkan,
    /// `local_size_x_id = 3`.
    fn local_size(&mut self) -> Result<Vec<String>> {
        let specialized = self.ir.declaration_order.iter().copied().find(|&id| {
            self.ir.meta.builtin(id) == Some(BuiltIn::WorkgroupSize)
                && self
                    .ir
                    .ids
                    .maybe_constant(id)
                    .is_some_and(|c| c.subconstants.len() == 3)
        });
        let mut parts = Vec::with_capacity(3);
        for (axis, name) in ["x", "y", "z"].into_iter().enumerate() {
            let fixed = self.entry.workgroup_size[axis];
            let part = match specialized {
                Some(id) => {
                    let sub = self.ir.ids.get_constant(id)?.subconstants[axis];
                    let constant = self.ir.ids.get_constant(sub)?;
                    let spec_id = self.ir.meta.decoration(sub).and_then(|d| d.spec_id);
                    match spec_id {
                        Some(spec_id) if self.dialect.vulkan() && constant.specialization => {
                            format!("local_size_{name}_id = {spec_id}")
                        }
                        _ => format!("local_size_{name} = {}", constant.scalar_u32()),
                    }
                }
                None => format!("local_size_{name} = {fixed}"),
            };
            parts.push(part);
        }
        Ok(parts)
    }

    // ── Structs ─────────────────────────────────────────────────────────

    /// Struct types declared as an interface block instead of a struct.
    fn block_types(&self) -> Result<BTreeSet<Id>> {
        let mut blocks = BTreeSet::new();
        for &var in &self.ir.global_variables {
            let variable = self.ir.ids.get_variable(var)?;
            let ty = self.element_type(variable.basetype)?;
            if ty.basetype != BaseType::Struct {
                continue;
            }
            let block = match variable.storage {
                StorageClass::Uniform | StorageClass::StorageBuffer => true,
                StorageClass::PushConstant => self.dialect.vulkan(),
                StorageClass::Input | StorageClass::Output => self.ir.is_block_like(ty.self_id),
                _ => false,
            };
            if block {
                blocks.insert(self.ir.alias_master(ty.self_id));
            }
        }
        Ok(blocks)
    }

    pub(super) fn emit_structs(&mut self) -> Result<()> {
        let blocks = self.block_types()?;
        let mut emitted = false;
        for id in self.ir.declaration_order.clone() {
            let Some(ty) = self.ir.ids.maybe_type(id) else {
                continue;
            };
            if !ty.is_struct() || ty.pointer || ty.type_alias != 0 || blocks.contains(&id) {
                continue;
            }
            if self.is_builtin_block(id)? {
                continue;
            }
            let members = ty.member_types.clone();
            if members.is_empty() {
                return Err(Error::unsupported("empty structs").at_id(id));
            }

            let name = self.name_of(id);
            self.buf.line(&format!("struct {name}"));
            self.buf.begin_scope();
            for (index, member) in members.into_iter().enumerate() {
                let member_name = self.member_name(id, index)?;
                let declaration = self.declare(member, &member_name)?;
                self.buf.line(&format!("{declaration};"));
            }
            self.buf.end_scope_with(";");
            self.buf.blank_line();
            emitted = true;
        }
        if emitted {
            debug!("struct declarations written");
        }
        Ok(())
    }

    // ── Constants ───────────────────────────────────────────────────────

    pub(super) fn emit_specialization_constants(&mut self) -> Result<()> {
        let mut emitted = false;
        for id in self.ir.declaration_order.clone() {
            match self.ir.ids.node(id) {
                Some(Node::Constant(constant)) if constant.specialization => {
                    if self.ir.meta.builtin(id) == Some(BuiltIn::WorkgroupSize) {
                        continue;
                    }
                    let type_id = constant.constant_type;
                    let scalar = constant.subconstants.is_empty();
                    let name = self.name_of(id);
                    let declaration = self.declare(type_id, &name)?;
                    let value = self.constant_literal(id)?;
                    let spec_id = self.ir.meta.decoration(id).and_then(|d| d.spec_id);
                    let qualifier = match spec_id {
                        Some(spec_id) if scalar && self.dialect.vulkan() => {
                            format!("layout(constant_id = {spec_id}) ")
                        }
                        _ => String::new(),
                    };
                    self.buf
                        .line(&format!("{qualifier}const {declaration} = {value};"));
                    emitted = true;
                }
                Some(Node::ConstantOp(op)) => {
                    let op = op.clone();
                    let name = self.name_of(id);
                    let declaration = self.declare(op.basetype, &name)?;
                    let value = self.constant_op(&op).map_err(|err| err.at_id(id))?;
                    self.buf.line(&format!("const {declaration} = {value};"));
                    emitted = true;
                }
                _ => {}
            }
        }
        if emitted {
            self.buf.blank_line();
        }
        Ok(())
    }

    /// Expression for an `OpSpecConstantOp`.
    fn constant_op(&mut self, op: &SpirConstantOp) -> Result<String> {
        let args = &op.arguments;
        let first = || args.first().copied().ok_or_else(|| truncated(op.opcode));
        let second = || args.get(1).copied().ok_or_else(|| truncated(op.opcode));

        if let Some((symbol, sign)) = infix(op.opcode) {
            let sign = match sign {
                Some(sign) => sign,
                None => self.sign_of(op.basetype)?,
            };
            let a = self.operand(first()?, sign)?;
            let b = self.operand(second()?, sign)?;
            let text = format!("{} {symbol} {}", enclose(&a), enclose(&b));
            return self.cast_result(op.basetype, text, sign);
        }
        if let Some((symbol, function, sign, negate)) = comparison(op.opcode) {
            let sign = match sign {
                Sign::Any => self.sign_of(self.type_of(first()?)?)?,
                sign => sign,
            };
            let a = self.operand(first()?, sign)?;
            let b = self.operand(second()?, sign)?;
            let vector = self.ir.ids.get_type(op.basetype)?.vecsize > 1;
            let text = if vector {
                format!("{function}({a}, {b})")
            } else {
                format!("{} {symbol} {}", enclose(&a), enclose(&b))
            };
            return Ok(if negate {
                if vector {
                    format!("not({text})")
                } else {
                    format!("!({text})")
                }
            } else {
                text
            });
        }

        match op.opcode {
            Op::SNegate => {
                let a = self.operand(first()?, Sign::Signed)?;
                self.cast_result(op.basetype, format!("-{}", enclose(&a)), Sign::Signed)
            }
            Op::Not => Ok(format!("~{}", enclose(&self.read(first()?)?))),
            Op::LogicalNot => {
                let a = self.read(first()?)?;
                Ok(if self.ir.ids.get_type(op.basetype)?.vecsize > 1 {
                    format!("not({a})")
                } else {
                    format!("!{}", enclose(&a))
                })
            }
            Op::LogicalAnd | Op::LogicalOr => {
                let symbol = if op.opcode == Op::LogicalAnd { "&&" } else { "||" };
                let a = self.read(first()?)?;
                let b = self.read(second()?)?;
                Ok(format!("{} {symbol} {}", enclose(&a), enclose(&b)))
            }
            Op::ShiftLeftLogical | Op::ShiftRightLogical | Op::ShiftRightArithmetic => {
                let (symbol, sign) = match op.opcode {
                    Op::ShiftLeftLogical => ("<<", self.sign_of(op.basetype)?),
                    Op::ShiftRightLogical => (">>", Sign::Unsigned),
                    _ => (">>", Sign::Signed),
                };
                let a = self.operand(first()?, sign)?;
                let b = self.read(second()?)?;
                let text = format!("{} {symbol} {}", enclose(&a), enclose(&b));
                self.cast_result(op.basetype, text, sign)
            }
            Op::Select => {
                let [condition, a, b] = args[..] else {
                    return Err(truncated(op.opcode));
                };
                let condition = self.read(condition)?;
                let a = self.read(a)?;
                let b = self.read(b)?;
                Ok(format!("{} ? {} : {}", enclose(&condition), enclose(&a), enclose(&b)))
            }
            Op::SConvert | Op::UConvert | Op::FConvert => {
                let name = self.type_name(op.basetype)?;
                Ok(format!("{name}({})", self.read(first()?)?))
            }
            Op::CompositeExtract => {
                let Some((&composite, indices)) = args.split_first() else {
                    return Err(truncated(op.opcode));
                };
                let mut text = enclose(&self.read(composite)?);
                let mut current = self.type_of(composite)?;
                for &index in indices {
                    let ty = self.ir.ids.get_type(current)?.clone();
                    if ty.is_array() {
                        text.push_str(&format!("[{index}]"));
                        current = ty.parent_type;
                    } else if ty.basetype == BaseType::Struct {
                        text.push('.');
                        text.push_str(&self.member_name(ty.self_id, index as usize)?);
                        current = ty.member_types.get(index as usize).copied().ok_or_else(|| {
                            Error::invalid(format!("struct has no member {index}"))
                        })?;
                    } else if ty.columns > 1 {
                        text.push_str(&format!("[{index}]"));
                        current = ty.parent_type;
                    } else {
                        text.push('.');
                        text.push(component(index)?);
                        current = ty.parent_type;
                    }
                }
                Ok(text)
            }
            other => Err(Error::unsupported(format!(
                "{other:?} in a specialization constant"
            ))),
        }
    }

    pub(super) fn emit_undefs(&mut self) -> Result<()> {
        let mut emitted = false;
        for id in self.ir.declaration_order.clone() {
            let Some(Node::Undef(undef)) = self.ir.ids.node(id) else {
                continue;
            };
            let type_id = undef.basetype;
            let name = self.name_of(id);
            let declaration = self.declare(type_id, &name)?;
            self.buf.line(&format!("{declaration};"));
            emitted = true;
        }
        if emitted {
            self.buf.blank_line();
        }
        Ok(())
    }

    // ── Variables ───────────────────────────────────────────────────────

    /// Module-scope variables that need a declaration: everything reachable
    /// code touches, plus every stage variable on the entry point.
    fn declared_globals(&self) -> Vec<Id> {
        self.ir
            .global_variables
            .iter()
            .copied()
            .filter(|var| {
                self.analysis.interface_variables.contains(var)
                    || self.entry.interface.contains(var)
            })
            .collect()
    }

    pub(super) fn emit_globals(&mut self) -> Result<()> {
        self.emit_builtin_redeclarations()?;
        let mark = self.buf.mark();
        for var in self.declared_globals() {
            let variable = self.ir.ids.get_variable(var)?;
            let (pointer_type, storage, initializer) =
                (variable.basetype, variable.storage, variable.initializer);
            if self.ir.meta.builtin(var).is_some() || self.is_builtin_block(pointer_type)? {
                continue;
            }
            if self.analysis.combined_samplers.consumed.contains(&var) {
                continue;
            }
            match storage {
                StorageClass::Input | StorageClass::Output => self.emit_stage_variable(var)?,
                StorageClass::Uniform | StorageClass::StorageBuffer => self.emit_buffer(var)?,
                StorageClass::PushConstant => self.emit_push_constant(var)?,
                StorageClass::UniformConstant => self.emit_opaque_uniform(var)?,
                StorageClass::AtomicCounter => self.emit_atomic_counter(var)?,
                StorageClass::Workgroup => {
                    let name = self.name_of(var);
                    let declaration = self.declare(pointer_type, &name)?;
                    self.buf.line(&format!("shared {declaration};"));
                }
                StorageClass::Private => {
                    let name = self.name_of(var);
                    let declaration = self.declare(pointer_type, &name)?;
                    match initializer {
                        Some(value) => {
                            let value = self.read(value)?;
                            self.buf.line(&format!("{declaration} = {value};"));
                        }
                        None => self.buf.line(&format!("{declaration};")),
                    }
                }
                other => {
                    return Err(Error::unsupported(format!(
                        "module-scope variables in {other:?} storage"
                    ))
                    .at_id(var))
                }
            }
        }
        let analysis = self.analysis;
        for (&(image, _), &combined) in &analysis.combined_samplers.by_pair {
            self.emit_combined_sampler(image, combined)?;
        }
        if !self.buf.lines_since(mark).is_empty() {
            self.buf.blank_line();
        }
        Ok(())
    }

    /// Sized redeclarations of the clip and cull distance arrays.
    fn emit_builtin_redeclarations(&mut self) -> Result<()> {
        let analysis = self.analysis;
        let active = &analysis.active_builtins;
        let arrays = [
            (BuiltIn::ClipDistance, "gl_ClipDistance", active.clip_distance_count),
            (BuiltIn::CullDistance, "gl_CullDistance", active.cull_distance_count),
        ];
        for (builtin, name, count) in arrays {
            if count == 0 {
                continue;
            }
            if let Some(feature) = self.dialect.builtin_feature(builtin) {
                self.require(feature)?;
            }
            let direction = if active.outputs.contains(&(builtin as u32)) {
                "out"
            } else {
                "in"
            };
            self.buf.line(&format!("{direction} float {name}[{count}];"));
        }
        Ok(())
    }

    /// `location`, `component` and `index` of a stage variable.
    fn location_layout(&mut self, var: Id) -> Result<Vec<String>> {
        let decoration = self.ir.meta.decoration(var).cloned().unwrap_or_default();
        let mut parts = Vec::new();
        if decoration.location.is_none() || !self.optional(Feature::ExplicitLocations)? {
            return Ok(parts);
        }
        if let Some(location) = decoration.location {
            parts.push(format!("location = {location}"));
        }
        if let Some(component) = decoration.component {
            parts.push(format!("component = {component}"));
        }
        if let Some(index) = decoration.index {
            parts.push(format!("index = {index}"));
        }
        Ok(parts)
    }

    /// `set` and `binding` of a resource.
    fn binding_layout(&mut self, var: Id, parts: &mut Vec<String>) -> Result<()> {
        let decoration = self.ir.meta.decoration(var).cloned().unwrap_or_default();
        if self.dialect.vulkan() {
            if let Some(set) = decoration.set {
                parts.push(format!("set = {set}"));
            }
        }
        if let Some(binding) = decoration.binding {
            if self.optional(Feature::BindingLayout)? {
                parts.push(format!("binding = {binding}"));
            }
        }
        Ok(())
    }

    /// `mediump ` for relaxed-precision values on ES targets.
    fn precision(&self, var: Id) -> &'static str {
        if self.dialect.es() && self.ir.meta.has_flag(var, DecorationFlags::RELAXED_PRECISION) {
            "mediump "
        } else {
            ""
        }
    }

    fn emit_stage_variable(&mut self, var: Id) -> Result<()> {
        let variable = self.ir.ids.get_variable(var)?;
        let (pointer_type, storage) = (variable.basetype, variable.storage);
        let direction = if storage == StorageClass::Input { "in" } else { "out" };
        let flags = self
            .ir
            .meta
            .decoration(var)
            .map(|d| d.flags)
            .unwrap_or_default();

        let mut qualifiers = String::new();
        for (keyword, feature) in interpolation(flags) {
            if let Some(feature) = feature {
                self.require(feature)?;
            }
            qualifiers.push_str(keyword);
            qualifiers.push(' ');
        }
        let parts = self.location_layout(var)?;
        let element = self.element_type(pointer_type)?;
        if element.basetype == BaseType::Struct && self.ir.is_block_like(element.self_id) {
            let block = self.ir.alias_master(element.self_id);
            let prefix = format!("{}{qualifiers}{direction}", layout(&parts));
            return self.emit_interface_block(var, block, &prefix);
        }

        let precision = self.precision(var);
        let name = self.name_of(var);
        let declaration = self.declare(pointer_type, &name)?;
        self.buf.line(&format!(
            "{}{qualifiers}{direction} {precision}{declaration};",
            layout(&parts)
        ));
        Ok(())
    }

    /// `<prefix> Block { members } instance[N];`
    fn emit_interface_block(&mut self, var: Id, block: Id, prefix: &str) -> Result<()> {
        let pointer_type = self.ir.ids.get_variable(var)?.basetype;
        let block_name = self.name_of(block);
        let instance = self.name_of(var);
        let pointee = self.ir.ids.pointee_type(pointer_type)?.self_id;
        let suffix = self.array_suffix(pointee)?;
        let members = self.ir.ids.get_type(block)?.member_types.clone();

        self.buf.line(&format!("{prefix} {block_name}"));
        self.buf.begin_scope();
        for (index, member) in members.into_iter().enumerate() {
            let member_name = self.member_name(block, index)?;
            let declaration = self.declare(member, &member_name)?;
            let row_major = self.ir.meta.has_member_flag(block, index, DecorationFlags::ROW_MAJOR)
                && self.element_type(member)?.columns > 1;
            let qualifier = if row_major { "layout(row_major) " } else { "" };
            let mut memory = self
                .ir
                .meta
                .member_decoration(block, index)
                .map(|d| memory_qualifiers(d.flags))
                .unwrap_or_default();
            if self.ir.meta.has_flag(block, DecorationFlags::BLOCK)
                && self.ir.ids.get_variable(var)?.storage == StorageClass::Uniform
            {
                // Uniform blocks are read-only already.
                memory.clear();
            }
            self.buf.line(&format!("{qualifier}{memory}{declaration};"));
        }
        self.buf.end_scope_with(&format!(" {instance}{suffix};"));
        Ok(())
    }

    fn emit_buffer(&mut self, var: Id) -> Result<()> {
        let variable = self.ir.ids.get_variable(var)?;
        let storage = variable.storage;
        let element = self.element_type(variable.basetype)?;
        if element.basetype != BaseType::Struct {
            return Err(Error::invalid("buffer variables must point to a struct").at_id(var));
        }
        let block = self.ir.alias_master(element.self_id);

        let ssbo = storage == StorageClass::StorageBuffer || self.is_buffer_block(var);
        let mut parts = Vec::new();
        let keyword = if ssbo {
            self.require(Feature::StorageBuffer)?;
            parts.push("std430".to_string());
            "buffer"
        } else {
            parts.push("std140".to_string());
            "uniform"
        };
        self.binding_layout(var, &mut parts)?;
        let memory = if ssbo {
            let flags = self
                .ir
                .meta
                .decoration(var)
                .map(|d| d.flags)
                .unwrap_or_default();
            memory_qualifiers(flags)
        } else {
            String::new()
        };
        let prefix = format!("{}{memory}{keyword}", layout(&parts));
        self.emit_interface_block(var, block, &prefix)
    }

    fn emit_push_constant(&mut self, var: Id) -> Result<()> {
        let variable = self.ir.ids.get_variable(var)?;
        let pointer_type = variable.basetype;
        if !self.dialect.vulkan() {
            // Plain uniform struct, set through the uniform API.
            let name = self.name_of(var);
            let declaration = self.declare(pointer_type, &name)?;
            self.buf.line(&format!("uniform {declaration};"));
            return Ok(());
        }
        let element = self.element_type(pointer_type)?;
        let block = self.ir.alias_master(element.self_id);
        let parts = ["push_constant".to_string(), "std430".to_string()];
        let prefix = format!("{}uniform", layout(&parts));
        self.emit_interface_block(var, block, &prefix)
    }

    fn emit_opaque_uniform(&mut self, var: Id) -> Result<()> {
        let pointer_type = self.ir.ids.get_variable(var)?.basetype;
        let element = self.element_type(pointer_type)?.clone();
        let mut parts = Vec::new();
        let mut memory = String::new();

        match (element.basetype, element.image) {
            (BaseType::Image, Some(info)) if info.dim == spirv::Dim::DimSubpassData => {
                if !self.dialect.vulkan() {
                    return Err(Error::unsupported("subpass inputs outside Vulkan").at_id(var));
                }
                let index = self
                    .ir
                    .meta
                    .decoration(var)
                    .and_then(|d| d.input_attachment_index)
                    .ok_or_else(|| {
                        Error::invalid("subpass input without an attachment index").at_id(var)
                    })?;
                parts.push(format!("input_attachment_index = {index}"));
            }
            (BaseType::Image, Some(info)) if info.sampled == 2 => {
                if let Some(format) = self.dialect.image_format(info.format) {
                    parts.push(format.to_string());
                }
                let flags = self
                    .ir
                    .meta
                    .decoration(var)
                    .map(|d| d.flags)
                    .unwrap_or_default();
                memory = memory_qualifiers(flags);
            }
            (BaseType::Image | BaseType::SampledImage | BaseType::Sampler, _) => {}
            (basetype, _) if !basetype.is_opaque() => {
                // Loose uniforms outside a block.
                if self.dialect.vulkan() {
                    return Err(Error::invalid("Vulkan forbids non-opaque loose uniforms").at_id(var));
                }
                let mut location = Vec::new();
                if let Some(loc) = self.ir.meta.decoration(var).and_then(|d| d.location) {
                    if self.optional(Feature::ExplicitLocations)? {
                        location.push(format!("location = {loc}"));
                    }
                }
                let name = self.name_of(var);
                let declaration = self.declare(pointer_type, &name)?;
                self.buf
                    .line(&format!("{}uniform {declaration};", layout(&location)));
                return Ok(());
            }
            (basetype, _) => {
                return Err(Error::unsupported(format!("{basetype:?} uniforms")).at_id(var))
            }
        }
        self.binding_layout(var, &mut parts)?;

        let precision = if self.dialect.es() { "highp " } else { "" };
        let name = self.name_of(var);
        let declaration = self.declare(pointer_type, &name)?;
        self.buf.line(&format!(
            "{}{memory}uniform {precision}{declaration};",
            layout(&parts)
        ));
        Ok(())
    }

    fn emit_atomic_counter(&mut self, var: Id) -> Result<()> {
        self.require(Feature::AtomicCounters)?;
        let pointer_type = self.ir.ids.get_variable(var)?.basetype;
        let mut parts = Vec::new();
        self.binding_layout(var, &mut parts)?;
        if let Some(offset) = self.ir.meta.decoration(var).and_then(|d| d.offset) {
            parts.push(format!("offset = {offset}"));
        }
        let name = self.name_of(var);
        let declaration = self.declare(pointer_type, &name)?;
        self.buf
            .line(&format!("{}uniform {declaration};", layout(&parts)));
        Ok(())
    }

    /// A `sampler*` uniform standing in for a separate image and sampler.
    fn emit_combined_sampler(&mut self, image: Id, combined: Id) -> Result<()> {
        let Some(Node::CombinedImageSampler(pair)) = self.ir.ids.node(combined) else {
            return Err(Error::internal("combined sampler without a node").at_id(combined));
        };
        let combined_type = pair.combined_type;
        let mut parts = Vec::new();
        self.binding_layout(combined, &mut parts)?;
        let precision = if self.dialect.es() { "highp " } else { "" };
        let name = self.name_of(combined);
        let mut declaration = self.declare(combined_type, &name)?;
        // Arrays of images combine element-wise.
        let image_type = self.ir.ids.get_variable(image)?.basetype;
        let pointee = self.ir.ids.pointee_type(image_type)?.self_id;
        declaration.push_str(&self.array_suffix(pointee)?);
        self.buf.line(&format!(
            "{}uniform {precision}{declaration};",
            layout(&parts)
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_layout_writes_nothing() {
        assert_eq!(layout(&[]), "");
        assert_eq!(
            layout(&["std140".to_string(), "binding = 1".to_string()]),
            "layout(std140, binding = 1) "
        );
    }

    #[test]
    fn interpolation_qualifiers_keep_declaration_order() {
        let flags = DecorationFlags::CENTROID | DecorationFlags::FLAT;
        let keywords: Vec<&str> = interpolation(flags).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keywords, ["flat", "centroid"]);
        assert!(interpolation(DecorationFlags::empty()).is_empty());
    }

    #[test]
    fn memory_qualifiers_from_access_flags() {
        assert_eq!(memory_qualifiers(DecorationFlags::NON_WRITABLE), "readonly ");
        assert_eq!(
            memory_qualifiers(DecorationFlags::RESTRICT | DecorationFlags::NON_READABLE),
            "restrict writeonly "
        );
        assert_eq!(memory_qualifiers(DecorationFlags::RELAXED_PRECISION), "");
    }
}
