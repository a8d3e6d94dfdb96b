//! Image sampling and storage, atomics, and memory barriers.

use super::expression::{component, enclose, truncated, Sign};
use super::CodeGenerator;
use crate::backend::{Dialect, Feature};
use crate::error::{Error, Result};
use crate::ir::{BaseType, Id, ImageInfo};
use spirv::{Dim, ImageOperands, MemorySemantics, Op};
use std::collections::BTreeSet;

/// Optional image operands, decoded from the trailing mask and its
/// arguments.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ImageArgs {
    bias: Option<Id>,
    lod: Option<Id>,
    grad: Option<(Id, Id)>,
    offset: Option<Id>,
    offsets: Option<Id>,
    sample: Option<Id>,
    min_lod: Option<Id>,
}

/// MakeTexelAvailable and MakeTexelVisible, which carry a scope operand.
const SCOPED_OPERANDS: u32 = 0x100 | 0x200;

fn image_args(words: &[u32]) -> Result<ImageArgs> {
    let mut args = ImageArgs::default();
    let Some((&mask, mut rest)) = words.split_first() else {
        return Ok(args);
    };
    if mask & SCOPED_OPERANDS != 0 {
        return Err(Error::unsupported("image operands with memory-model scopes"));
    }
    let mask = ImageOperands::from_bits_truncate(mask);
    let mut next = || -> Result<Id> {
        let (&id, tail) = rest
            .split_first()
            .ok_or_else(|| Error::invalid("image operand mask names a missing argument"))?;
        rest = tail;
        Ok(id)
    };
    if mask.contains(ImageOperands::BIAS) {
        args.bias = Some(next()?);
    }
    if mask.contains(ImageOperands::LOD) {
        args.lod = Some(next()?);
    }
    if mask.contains(ImageOperands::GRAD) {
        args.grad = Some((next()?, next()?));
    }
    if mask.contains(ImageOperands::CONST_OFFSET) {
        args.offset = Some(next()?);
    }
    if mask.contains(ImageOperands::OFFSET) {
        args.offset = Some(next()?);
    }
    if mask.contains(ImageOperands::CONST_OFFSETS) {
        args.offsets = Some(next()?);
    }
    if mask.contains(ImageOperands::SAMPLE) {
        args.sample = Some(next()?);
    }
    if mask.contains(ImageOperands::MIN_LOD) {
        args.min_lod = Some(next()?);
    }
    Ok(args)
}

impl ImageArgs {
    fn inputs(&self) -> Vec<Id> {
        let grad = self.grad.map(|(dx, dy)| [dx, dy]);
        [self.bias, self.lod, self.offset, self.offsets, self.sample]
            .into_iter()
            .flatten()
            .chain(grad.into_iter().flatten())
            .collect()
    }
}

/// Where an atomic operates.
enum AtomicTarget {
    Memory(String),
    Image(String, String),
    Counter(String),
}

impl<D: Dialect> CodeGenerator<'_, D> {
    pub(super) fn emit_image(&mut self, op: Op, operands: &[u32]) -> Result<()> {
        match op {
            Op::SampledImage => self.emit_sampled_image(operands),
            Op::Image => {
                let [ty, id, sampled, ..] = *operands else {
                    return Err(truncated(op));
                };
                if let Some(&root) = self.opaque_roots.get(&sampled) {
                    self.opaque_roots.insert(id, root);
                }
                let text = self.read(sampled)?;
                self.emit_value(ty, id, text, &[sampled])
            }
            Op::ImageSampleImplicitLod
            | Op::ImageSampleExplicitLod
            | Op::ImageSampleDrefImplicitLod
            | Op::ImageSampleDrefExplicitLod
            | Op::ImageSampleProjImplicitLod
            | Op::ImageSampleProjExplicitLod
            | Op::ImageSampleProjDrefImplicitLod
            | Op::ImageSampleProjDrefExplicitLod => self.emit_sample(op, operands),
            Op::ImageFetch => self.emit_fetch(operands),
            Op::ImageGather | Op::ImageDrefGather => self.emit_gather(op, operands),
            Op::ImageRead => self.emit_image_read(operands),
            Op::ImageWrite => self.emit_image_write(operands),
            Op::ImageQuerySizeLod
            | Op::ImageQuerySize
            | Op::ImageQueryLevels
            | Op::ImageQuerySamples
            | Op::ImageQueryLod => self.emit_image_query(op, operands),
            _ => Err(Error::internal(format!("{op:?} is not an image op"))),
        }
    }

    fn image_info(&self, id: Id) -> Result<ImageInfo> {
        self.value_type(id)?
            .image
            .ok_or_else(|| Error::invalid(format!("%{id} is not an image")).at_id(id))
    }

    fn emit_sampled_image(&mut self, operands: &[u32]) -> Result<()> {
        let [ty, id, image, sampler, ..] = *operands else {
            return Err(truncated(Op::SampledImage));
        };
        let image_root = self.root_of(image);
        let sampler_root = self.root_of(sampler);
        self.opaque_roots.insert(id, image_root);

        if let Some(combined) = self
            .analysis
            .combined_samplers
            .lookup(image_root, sampler_root)
        {
            let text = self.name_of(combined);
            return self.emit_value_with(ty, id, text, BTreeSet::new(), true, &[]);
        }
        if self.dialect.vulkan() {
            let constructor = self.type_name(ty)?;
            let text = format!(
                "{constructor}({}, {})",
                self.read(image)?,
                self.read(sampler)?
            );
            return self.emit_value(ty, id, text, &[image, sampler]);
        }
        Err(Error::unsupported(
            "separate images and samplers need combined samplers outside Vulkan GLSL",
        )
        .at_id(id))
    }

    /// Text of an image operand. Separate images replaced by combined
    /// samplers are spelled as one of their combinations.
    fn image_operand(&mut self, image: Id) -> Result<String> {
        let root = self.root_of(image);
        if self.analysis.combined_samplers.consumed.contains(&root) {
            let combined = self
                .analysis
                .combined_samplers
                .by_pair
                .iter()
                .find(|((img, _), _)| *img == root)
                .map(|(_, &combined)| combined);
            if let Some(combined) = combined {
                self.read(image)?;
                return Ok(self.name_of(combined));
            }
        }
        self.read(image)
    }

    fn emit_sample(&mut self, op: Op, operands: &[u32]) -> Result<()> {
        let [ty, id, sampled, coordinate, ..] = *operands else {
            return Err(truncated(op));
        };
        let proj = matches!(
            op,
            Op::ImageSampleProjImplicitLod
                | Op::ImageSampleProjExplicitLod
                | Op::ImageSampleProjDrefImplicitLod
                | Op::ImageSampleProjDrefExplicitLod
        );
        let has_dref = matches!(
            op,
            Op::ImageSampleDrefImplicitLod
                | Op::ImageSampleDrefExplicitLod
                | Op::ImageSampleProjDrefImplicitLod
                | Op::ImageSampleProjDrefExplicitLod
        );
        let (dref, rest) = if has_dref {
            let [dref, ..] = operands[4..] else {
                return Err(truncated(op));
            };
            (Some(dref), &operands[5..])
        } else {
            (None, &operands[4..])
        };
        let args = image_args(rest)?;
        if args.min_lod.is_some() {
            return Err(Error::unsupported("minimum LOD clamps").at_id(id));
        }
        if args.sample.is_some() || args.offsets.is_some() {
            return Err(Error::invalid("sampling takes no sample index or offset array").at_id(id));
        }

        let mut function = String::from(if proj { "textureProj" } else { "texture" });
        if args.lod.is_some() {
            function.push_str("Lod");
        } else if args.grad.is_some() {
            function.push_str("Grad");
        }
        if args.offset.is_some() {
            function.push_str("Offset");
        }

        let sampler_text = self.read(sampled)?;
        let coordinate_size = self.value_type(coordinate)?.vecsize;
        let mut arguments = vec![sampler_text];
        match dref {
            None => arguments.push(self.read(coordinate)?),
            Some(dref) if proj => {
                let c = enclose(&self.read_duplicable(coordinate)?);
                let d = self.read(dref)?;
                arguments.push(match coordinate_size {
                    3 => format!("vec4({c}.xy, {d}, {c}.z)"),
                    2 => format!("vec4({c}.x, 0.0, {d}, {c}.y)"),
                    n => {
                        return Err(Error::unsupported(format!(
                            "projective depth comparison with {n} coordinates"
                        )))
                    }
                });
            }
            Some(dref) if coordinate_size < 4 => {
                let c = self.read(coordinate)?;
                let d = self.read(dref)?;
                arguments.push(format!("vec{}({c}, {d})", coordinate_size + 1));
            }
            Some(dref) => {
                arguments.push(self.read(coordinate)?);
                arguments.push(self.read(dref)?);
            }
        }
        if let Some(lod) = args.lod {
            arguments.push(self.read(lod)?);
        }
        if let Some((dx, dy)) = args.grad {
            arguments.push(self.read(dx)?);
            arguments.push(self.read(dy)?);
        }
        if let Some(offset) = args.offset {
            arguments.push(self.read(offset)?);
        }
        if let Some(bias) = args.bias {
            arguments.push(self.read(bias)?);
        }

        let mut inputs = vec![sampled, coordinate];
        inputs.extend(dref);
        inputs.extend(args.inputs());
        let text = format!("{function}({})", arguments.join(", "));
        self.emit_value(ty, id, text, &inputs)
    }

    fn emit_fetch(&mut self, operands: &[u32]) -> Result<()> {
        let [ty, id, image, coordinate, ..] = *operands else {
            return Err(truncated(Op::ImageFetch));
        };
        self.require(Feature::TexelFetch)?;
        let args = image_args(&operands[4..])?;
        let info = self.image_info(image)?;

        let mut arguments = vec![
            self.image_operand(image)?,
            self.operand(coordinate, Sign::Signed)?,
        ];
        if info.multisampled {
            let sample = args
                .sample
                .ok_or_else(|| Error::invalid("multisampled fetch without a sample").at_id(id))?;
            arguments.push(self.operand(sample, Sign::Signed)?);
        } else if info.dim != Dim::DimBuffer {
            arguments.push(match args.lod {
                Some(lod) => self.operand(lod, Sign::Signed)?,
                None => "0".to_string(),
            });
        }
        let function = match args.offset {
            Some(offset) => {
                arguments.push(self.read(offset)?);
                "texelFetchOffset"
            }
            None => "texelFetch",
        };
        let mut inputs = vec![image, coordinate];
        inputs.extend(args.inputs());
        let text = format!("{function}({})", arguments.join(", "));
        self.emit_value(ty, id, text, &inputs)
    }

    fn emit_gather(&mut self, op: Op, operands: &[u32]) -> Result<()> {
        let [ty, id, sampled, coordinate, extra, ..] = *operands else {
            return Err(truncated(op));
        };
        let args = image_args(&operands[5..])?;
        let mut arguments = vec![self.read(sampled)?, self.read(coordinate)?];
        let dref = op == Op::ImageDrefGather;
        if dref {
            arguments.push(self.read(extra)?);
        }
        let function = if let Some(offset) = args.offset {
            arguments.push(self.read(offset)?);
            "textureGatherOffset"
        } else if let Some(offsets) = args.offsets {
            arguments.push(self.read(offsets)?);
            "textureGatherOffsets"
        } else {
            "textureGather"
        };
        if !dref && self.constant_u32(extra)? != 0 {
            arguments.push(self.operand(extra, Sign::Signed)?);
        }
        let mut inputs = vec![sampled, coordinate, extra];
        inputs.extend(args.inputs());
        let text = format!("{function}({})", arguments.join(", "));
        self.emit_value(ty, id, text, &inputs)
    }

    fn emit_image_read(&mut self, operands: &[u32]) -> Result<()> {
        let [ty, id, image, coordinate, ..] = *operands else {
            return Err(truncated(Op::ImageRead));
        };
        let args = image_args(&operands[4..])?;
        let info = self.image_info(image)?;
        let root = self.root_of(image);
        let image_text = self.read(image)?;

        let text = if info.dim == Dim::DimSubpassData {
            match args.sample {
                Some(sample) => format!("subpassLoad({image_text}, {})", self.read(sample)?),
                None => format!("subpassLoad({image_text})"),
            }
        } else {
            self.require(Feature::ImageLoadStore)?;
            let mut arguments = vec![image_text, self.operand(coordinate, Sign::Signed)?];
            if let Some(sample) = args.sample {
                arguments.push(self.operand(sample, Sign::Signed)?);
            }
            let call = format!("imageLoad({})", arguments.join(", "));
            match self.ir.ids.get_type(ty)?.vecsize {
                4 => call,
                n => {
                    let swizzle: String = (0..n).map(component).collect::<Result<_>>()?;
                    format!("{call}.{swizzle}")
                }
            }
        };

        let mut reads = self.reads_of(coordinate);
        let read_only = self.is_read_only(root);
        if !read_only {
            reads.insert(root);
        }
        let mut inputs = vec![image, coordinate];
        inputs.extend(args.inputs());
        self.emit_value_with(ty, id, text, reads, read_only, &inputs)
    }

    fn emit_image_write(&mut self, operands: &[u32]) -> Result<()> {
        let [image, coordinate, texel, ..] = *operands else {
            return Err(truncated(Op::ImageWrite));
        };
        self.require(Feature::ImageLoadStore)?;
        let args = image_args(&operands[3..])?;
        let root = self.root_of(image);
        let texel_type = self.value_type(texel)?;

        let mut arguments = vec![
            self.read(image)?,
            self.operand(coordinate, Sign::Signed)?,
        ];
        if let Some(sample) = args.sample {
            arguments.push(self.operand(sample, Sign::Signed)?);
        }
        let value = self.read(texel)?;
        let value = if texel_type.vecsize == 4 {
            value
        } else {
            let constructor = self.numeric_type_name(texel_type.basetype, 4)?;
            let zero = match texel_type.basetype {
                BaseType::Int => "0",
                BaseType::UInt => "0u",
                _ => "0.0",
            };
            match texel_type.vecsize {
                1 => format!("{constructor}({value})"),
                n @ 2..=3 => {
                    let padding = vec![zero; 4 - n as usize].join(", ");
                    format!("{constructor}({value}, {padding})")
                }
                n => {
                    return Err(Error::invalid(format!("image texel with {n} components"))
                        .at_id(texel))
                }
            }
        };
        arguments.push(value);
        self.buf
            .statement(&format!("imageStore({});", arguments.join(", ")));
        self.invalidate(root);
        Ok(())
    }

    fn emit_image_query(&mut self, op: Op, operands: &[u32]) -> Result<()> {
        let [ty, id, image, ..] = *operands else {
            return Err(truncated(op));
        };
        let info = self.image_info(image)?;
        let storage = info.sampled == 2;
        let image_text = self.image_operand(image)?;
        let mut inputs = vec![image];

        let text = match op {
            Op::ImageQuerySizeLod => {
                let [lod] = operands[3..] else {
                    return Err(truncated(op));
                };
                self.require(Feature::TextureSize)?;
                inputs.push(lod);
                format!("textureSize({image_text}, {})", self.operand(lod, Sign::Signed)?)
            }
            Op::ImageQuerySize if storage => {
                self.require(Feature::ImageSize)?;
                format!("imageSize({image_text})")
            }
            Op::ImageQuerySize => {
                self.require(Feature::TextureSize)?;
                format!("textureSize({image_text})")
            }
            Op::ImageQueryLevels => format!("textureQueryLevels({image_text})"),
            Op::ImageQuerySamples if storage => format!("imageSamples({image_text})"),
            Op::ImageQuerySamples => format!("textureSamples({image_text})"),
            Op::ImageQueryLod => {
                let [coordinate] = operands[3..] else {
                    return Err(truncated(op));
                };
                inputs.push(coordinate);
                format!("textureQueryLod({image_text}, {})", self.read(coordinate)?)
            }
            _ => return Err(Error::internal(format!("{op:?} is not an image query"))),
        };
        let text = if op == Op::ImageQueryLod {
            text
        } else {
            self.cast_result_from(ty, text, BaseType::Int)?
        };
        self.emit_value(ty, id, text, &inputs)
    }

    // ── Atomics ─────────────────────────────────────────────────────────

    fn atomic_target(&mut self, pointer: Id) -> Result<AtomicTarget> {
        if let Some((image, coordinate)) = self.texel_pointers.get(&pointer).cloned() {
            return Ok(AtomicTarget::Image(image, coordinate));
        }
        let counter = self
            .ir
            .ids
            .pointee_type(self.type_of(pointer)?)?
            .basetype
            == BaseType::AtomicCounter;
        let text = self.read(pointer)?;
        Ok(if counter {
            AtomicTarget::Counter(text)
        } else {
            AtomicTarget::Memory(text)
        })
    }

    pub(super) fn emit_atomic(&mut self, op: Op, operands: &[u32]) -> Result<()> {
        if op == Op::AtomicStore {
            let [pointer, _, _, value, ..] = *operands else {
                return Err(truncated(op));
            };
            let lhs = self.read(pointer)?;
            let rhs = self.read(value)?;
            self.buf.statement(&format!("{lhs} = {rhs};"));
            self.invalidate_all();
            return Ok(());
        }

        let [ty, id, pointer, ..] = *operands else {
            return Err(truncated(op));
        };
        let unsigned = self.ir.ids.get_type(ty)?.basetype.is_unsigned_integer();
        let value_operand = match op {
            Op::AtomicCompareExchange => operands.get(6).copied(),
            _ => operands.get(5).copied(),
        };
        let target = self.atomic_target(pointer)?;

        let text = match target {
            AtomicTarget::Counter(counter) => match op {
                Op::AtomicLoad => format!("atomicCounter({counter})"),
                Op::AtomicIIncrement => format!("atomicCounterIncrement({counter})"),
                // The counter builtin returns the decremented value.
                Op::AtomicIDecrement => format!("(atomicCounterDecrement({counter}) + 1u)"),
                _ => {
                    return Err(Error::unsupported(format!(
                        "{op:?} on an atomic counter"
                    )))
                }
            },
            AtomicTarget::Memory(location) if op == Op::AtomicLoad => location,
            AtomicTarget::Memory(location) => {
                let arguments = self.atomic_arguments(op, operands, value_operand, unsigned)?;
                let function = atomic_function(op, "atomic")?;
                format!("{function}({location}, {arguments})")
            }
            AtomicTarget::Image(image, coordinate) => {
                self.require(Feature::ImageLoadStore)?;
                if op == Op::AtomicLoad {
                    return Err(Error::unsupported("atomic loads from images"));
                }
                let arguments = self.atomic_arguments(op, operands, value_operand, unsigned)?;
                let function = atomic_function(op, "imageAtomic")?;
                format!("{function}({image}, {coordinate}, {arguments})")
            }
        };
        self.materialize(ty, id, text)?;
        self.invalidate_all();
        Ok(())
    }

    fn atomic_arguments(
        &mut self,
        op: Op,
        operands: &[u32],
        value: Option<Id>,
        unsigned: bool,
    ) -> Result<String> {
        let one = || if unsigned { "1u" } else { "1" };
        let minus_one = || if unsigned { "0xffffffffu" } else { "-1" };
        let operand = || value.ok_or_else(|| truncated(op));
        Ok(match op {
            Op::AtomicIIncrement => one().to_string(),
            Op::AtomicIDecrement => minus_one().to_string(),
            Op::AtomicISub => format!("-{}", enclose(&self.read(operand()?)?)),
            Op::AtomicCompareExchange => {
                let comparator = *operands.get(7).ok_or_else(|| truncated(op))?;
                format!("{}, {}", self.read(comparator)?, self.read(operand()?)?)
            }
            _ => self.read(operand()?)?,
        })
    }

    // ── Barriers ────────────────────────────────────────────────────────

    pub(super) fn emit_barrier(&mut self, op: Op, operands: &[u32]) -> Result<()> {
        let semantics = match op {
            Op::ControlBarrier => operands.get(2),
            _ => operands.get(1),
        }
        .copied()
        .ok_or_else(|| truncated(op))?;
        let semantics = MemorySemantics::from_bits_truncate(self.constant_u32(semantics)?);

        let all = MemorySemantics::UNIFORM_MEMORY
            | MemorySemantics::WORKGROUP_MEMORY
            | MemorySemantics::IMAGE_MEMORY;
        let mut statements = Vec::new();
        if semantics.contains(all) {
            statements.push("memoryBarrier();");
        } else {
            if semantics.contains(MemorySemantics::UNIFORM_MEMORY) {
                statements.push("memoryBarrierBuffer();");
            }
            if semantics.contains(MemorySemantics::WORKGROUP_MEMORY) {
                statements.push("memoryBarrierShared();");
            }
            if semantics.contains(MemorySemantics::IMAGE_MEMORY) {
                statements.push("memoryBarrierImage();");
            }
        }
        if semantics.contains(MemorySemantics::ATOMIC_COUNTER_MEMORY) {
            statements.push("memoryBarrierAtomicCounter();");
        }
        if !statements.is_empty() {
            self.require(Feature::ImageLoadStore)?;
        }
        if op == Op::ControlBarrier {
            statements.push("barrier();");
        }
        for statement in statements {
            self.buf.statement(statement);
        }
        self.invalidate_all();
        Ok(())
    }
}

/// Builtin spelling of a read-modify-write atomic.
fn atomic_function(op: Op, prefix: &str) -> Result<String> {
    let suffix = match op {
        Op::AtomicExchange => "Exchange",
        Op::AtomicCompareExchange => "CompSwap",
        Op::AtomicIIncrement | Op::AtomicIDecrement | Op::AtomicIAdd | Op::AtomicISub => "Add",
        Op::AtomicSMin | Op::AtomicUMin => "Min",
        Op::AtomicSMax | Op::AtomicUMax => "Max",
        Op::AtomicAnd => "And",
        Op::AtomicOr => "Or",
        Op::AtomicXor => "Xor",
        _ => return Err(Error::internal(format!("{op:?} is not a read-modify-write atomic"))),
    };
    Ok(format!("{prefix}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_operands_follow_mask_bit_order() {
        let mask = (ImageOperands::BIAS | ImageOperands::CONST_OFFSET | ImageOperands::SAMPLE).bits();
        let args = image_args(&[mask, 10, 11, 12]).unwrap();
        assert_eq!(args.bias, Some(10));
        assert_eq!(args.offset, Some(11));
        assert_eq!(args.sample, Some(12));
        assert_eq!(args.lod, None);

        let grad = image_args(&[ImageOperands::GRAD.bits(), 3, 4]).unwrap();
        assert_eq!(grad.grad, Some((3, 4)));
        assert_eq!(grad.inputs(), vec![3, 4]);
    }

    #[test]
    fn missing_image_operand_arguments_are_invalid() {
        let err = image_args(&[ImageOperands::LOD.bits()]).unwrap_err();
        assert!(err.is_invalid());
        assert_eq!(image_args(&[]).unwrap(), ImageArgs::default());
    }

    #[test]
    fn atomic_builtin_names() {
        assert_eq!(atomic_function(Op::AtomicISub, "atomic").unwrap(), "atomicAdd");
        assert_eq!(
            atomic_function(Op::AtomicCompareExchange, "imageAtomic").unwrap(),
            "imageAtomicCompSwap"
        );
        assert!(atomic_function(Op::AtomicLoad, "atomic").is_err());
    }
}
