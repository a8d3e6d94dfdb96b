//! `OpExtInst` for the `GLSL.std.450` instruction set.
//!
//! Instructions are identified by their number in the set. Most map to a
//! builtin function of the same meaning; the signed and unsigned variants
//! additionally cast their operands, and a few write through a pointer
//! argument.

use super::expression::{truncated, Sign};
use super::CodeGenerator;
use crate::backend::{Dialect, Feature};
use crate::error::{Error, Result};
use crate::ir::{BaseType, ExtensionKind, Id};
use log::warn;
use spirv::Op;

/// How an instruction's arguments and result are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Plain function call.
    Call,
    /// Integer operands cast to a signedness, result cast back.
    Integer(Sign),
    /// `findLSB`/`findMSB`: always return `int`.
    BitScan(Sign),
    /// Last argument is a pointer written by the call.
    OutPointer,
    /// First argument is a pointer to an interpolant.
    Interpolant,
}

/// Function name, shape and required feature of a `GLSL.std.450`
/// instruction.
fn std450(number: u32) -> Result<(&'static str, Shape, Option<Feature>)> {
    use Shape::*;
    let entry = match number {
        1 => ("round", Call, None),
        2 => ("roundEven", Call, None),
        3 => ("trunc", Call, None),
        4 => ("abs", Call, None),
        5 => ("abs", Integer(Sign::Signed), None),
        6 => ("sign", Call, None),
        7 => ("sign", Integer(Sign::Signed), None),
        8 => ("floor", Call, None),
        9 => ("ceil", Call, None),
        10 => ("fract", Call, None),
        11 => ("radians", Call, None),
        12 => ("degrees", Call, None),
        13 => ("sin", Call, None),
        14 => ("cos", Call, None),
        15 => ("tan", Call, None),
        16 => ("asin", Call, None),
        17 => ("acos", Call, None),
        18 => ("atan", Call, None),
        19 => ("sinh", Call, None),
        20 => ("cosh", Call, None),
        21 => ("tanh", Call, None),
        22 => ("asinh", Call, None),
        23 => ("acosh", Call, None),
        24 => ("atanh", Call, None),
        25 => ("atan", Call, None),
        26 => ("pow", Call, None),
        27 => ("exp", Call, None),
        28 => ("log", Call, None),
        29 => ("exp2", Call, None),
        30 => ("log2", Call, None),
        31 => ("sqrt", Call, None),
        32 => ("inversesqrt", Call, None),
        33 => ("determinant", Call, None),
        34 => ("inverse", Call, Some(Feature::MatrixInverse)),
        35 => ("modf", OutPointer, None),
        37 | 79 => ("min", Call, None),
        38 => ("min", Integer(Sign::Unsigned), None),
        39 => ("min", Integer(Sign::Signed), None),
        40 | 80 => ("max", Call, None),
        41 => ("max", Integer(Sign::Unsigned), None),
        42 => ("max", Integer(Sign::Signed), None),
        43 | 81 => ("clamp", Call, None),
        44 => ("clamp", Integer(Sign::Unsigned), None),
        45 => ("clamp", Integer(Sign::Signed), None),
        46 => ("mix", Call, None),
        48 => ("step", Call, None),
        49 => ("smoothstep", Call, None),
        50 => ("fma", Call, Some(Feature::BitfieldOps)),
        51 => ("frexp", OutPointer, Some(Feature::BitfieldOps)),
        53 => ("ldexp", Call, Some(Feature::BitfieldOps)),
        54 => ("packSnorm4x8", Call, Some(Feature::PackingFunctions)),
        55 => ("packUnorm4x8", Call, Some(Feature::PackingFunctions)),
        56 => ("packSnorm2x16", Call, Some(Feature::PackingFunctions)),
        57 => ("packUnorm2x16", Call, Some(Feature::PackingFunctions)),
        58 => ("packHalf2x16", Call, Some(Feature::PackingFunctions)),
        59 => ("packDouble2x32", Call, Some(Feature::Float64)),
        60 => ("unpackSnorm2x16", Call, Some(Feature::PackingFunctions)),
        61 => ("unpackUnorm2x16", Call, Some(Feature::PackingFunctions)),
        62 => ("unpackHalf2x16", Call, Some(Feature::PackingFunctions)),
        63 => ("unpackSnorm4x8", Call, Some(Feature::PackingFunctions)),
        64 => ("unpackUnorm4x8", Call, Some(Feature::PackingFunctions)),
        65 => ("unpackDouble2x32", Call, Some(Feature::Float64)),
        66 => ("length", Call, None),
        67 => ("distance", Call, None),
        68 => ("cross", Call, None),
        69 => ("normalize", Call, None),
        70 => ("faceforward", Call, None),
        71 => ("reflect", Call, None),
        72 => ("refract", Call, None),
        73 => ("findLSB", BitScan(Sign::Any), Some(Feature::BitfieldOps)),
        74 => ("findMSB", BitScan(Sign::Signed), Some(Feature::BitfieldOps)),
        75 => ("findMSB", BitScan(Sign::Unsigned), Some(Feature::BitfieldOps)),
        76 => ("interpolateAtCentroid", Interpolant, Some(Feature::SampleShading)),
        77 => ("interpolateAtSample", Interpolant, Some(Feature::SampleShading)),
        78 => ("interpolateAtOffset", Interpolant, Some(Feature::SampleShading)),
        36 | 52 => {
            return Err(Error::unsupported(
                "GLSL.std.450 instructions returning structs",
            ))
        }
        47 => return Err(Error::unsupported("integer mix")),
        other => {
            return Err(Error::invalid(format!(
                "GLSL.std.450 has no instruction {other}"
            )))
        }
    };
    Ok(entry)
}

impl<D: Dialect> CodeGenerator<'_, D> {
    pub(super) fn emit_ext_inst(&mut self, operands: &[u32]) -> Result<()> {
        let [ty, id, set, number, ..] = *operands else {
            return Err(truncated(Op::ExtInst));
        };
        let arguments = &operands[4..];
        match &self.ir.ids.get_extension(set)?.kind {
            ExtensionKind::GlslStd450 => {}
            ExtensionKind::NonSemantic => return Ok(()),
            ExtensionKind::Unsupported(name) => {
                warn!("instruction {number} of unsupported set {name}");
                return Err(Error::unsupported(format!(
                    "extended instruction set {name}"
                ))
                .at_id(id));
            }
        }

        let (function, shape, feature) = std450(number).map_err(|err| err.at_id(id))?;
        if let Some(feature) = feature {
            self.require(feature)?;
        }

        match shape {
            Shape::Call => {
                let texts = self.read_all(arguments)?;
                let text = format!("{function}({})", texts.join(", "));
                self.emit_value(ty, id, text, arguments)
            }
            Shape::Integer(sign) => {
                let mut texts = Vec::with_capacity(arguments.len());
                for &argument in arguments {
                    texts.push(self.operand(argument, sign)?);
                }
                let text = format!("{function}({})", texts.join(", "));
                let text = self.cast_result(ty, text, sign)?;
                self.emit_value(ty, id, text, arguments)
            }
            Shape::BitScan(sign) => {
                let [value] = *arguments else {
                    return Err(truncated(Op::ExtInst));
                };
                let text = format!("{function}({})", self.operand(value, sign)?);
                let text = self.cast_result_from(ty, text, BaseType::Int)?;
                self.emit_value(ty, id, text, arguments)
            }
            Shape::OutPointer => {
                let [value, pointer] = *arguments else {
                    return Err(truncated(Op::ExtInst));
                };
                let text = format!("{function}({}, {})", self.read(value)?, self.read(pointer)?);
                self.materialize(ty, id, text)?;
                let root = self.root_of(pointer);
                self.invalidate(root);
                Ok(())
            }
            Shape::Interpolant => {
                let Some((&interpolant, rest)) = arguments.split_first() else {
                    return Err(truncated(Op::ExtInst));
                };
                let mut texts = vec![self.read(interpolant)?];
                texts.extend(self.read_all(rest)?);
                let text = format!("{function}({})", texts.join(", "));
                let inputs: Vec<Id> = rest.to_vec();
                self.emit_value(ty, id, text, &inputs)
            }
        }
    }

    fn read_all(&mut self, ids: &[Id]) -> Result<Vec<String>> {
        ids.iter().map(|&id| self.read(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_variants_cast_their_operands() {
        assert_eq!(std450(5).unwrap(), ("abs", Shape::Integer(Sign::Signed), None));
        assert_eq!(std450(38).unwrap().1, Shape::Integer(Sign::Unsigned));
        assert_eq!(std450(4).unwrap().1, Shape::Call);
    }

    #[test]
    fn struct_results_and_unknown_numbers_are_rejected() {
        assert!(std450(36).unwrap_err().is_unsupported());
        assert!(std450(52).unwrap_err().is_unsupported());
        assert!(std450(0).unwrap_err().is_invalid());
        assert!(std450(82).unwrap_err().is_invalid());
    }

    #[test]
    fn feature_gated_functions() {
        assert_eq!(std450(34).unwrap().2, Some(Feature::MatrixInverse));
        assert_eq!(std450(58).unwrap().2, Some(Feature::PackingFunctions));
        assert_eq!(std450(74).unwrap().1, Shape::BitScan(Sign::Signed));
    }
}
