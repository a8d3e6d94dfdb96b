//! Arithmetic, bitwise, logical, comparison and conversion instructions.
//!
//! SPIR-V lets integer operations pick their signedness per opcode rather
//! than per type. GLSL does not, so operands are cast to the signedness the
//! opcode asks for and the result is cast back to the declared type.

use super::expression::{component, enclose, truncated, Sign};
use super::CodeGenerator;
use crate::backend::{Dialect, Feature};
use crate::error::{Error, Result};
use crate::ir::{BaseType, Id};
use spirv::Op;

/// Infix operator and operand signedness of simple binary opcodes. `None`
/// in the sign slot means "match the result type".
pub(super) fn infix(op: Op) -> Option<(&'static str, Option<Sign>)> {
    let entry = match op {
        Op::IAdd => ("+", None),
        Op::ISub => ("-", None),
        Op::IMul => ("*", None),
        Op::FAdd => ("+", Some(Sign::Any)),
        Op::FSub => ("-", Some(Sign::Any)),
        Op::FMul
        | Op::VectorTimesScalar
        | Op::MatrixTimesScalar
        | Op::VectorTimesMatrix
        | Op::MatrixTimesVector
        | Op::MatrixTimesMatrix => ("*", Some(Sign::Any)),
        Op::FDiv => ("/", Some(Sign::Any)),
        Op::UDiv => ("/", Some(Sign::Unsigned)),
        Op::SDiv => ("/", Some(Sign::Signed)),
        Op::UMod => ("%", Some(Sign::Unsigned)),
        Op::SRem | Op::SMod => ("%", Some(Sign::Signed)),
        Op::BitwiseOr => ("|", None),
        Op::BitwiseXor => ("^", None),
        Op::BitwiseAnd => ("&", None),
        Op::LogicalEqual => ("==", Some(Sign::Any)),
        Op::LogicalNotEqual => ("!=", Some(Sign::Any)),
        _ => return None,
    };
    Some(entry)
}

/// Comparison opcodes: scalar operator, vector function, operand sign, and
/// whether the result is the negation of the ordered inverse.
pub(super) fn comparison(op: Op) -> Option<(&'static str, &'static str, Sign, bool)> {
    let entry = match op {
        Op::IEqual => ("==", "equal", Sign::Any, false),
        Op::INotEqual => ("!=", "notEqual", Sign::Any, false),
        Op::UGreaterThan => (">", "greaterThan", Sign::Unsigned, false),
        Op::SGreaterThan => (">", "greaterThan", Sign::Signed, false),
        Op::UGreaterThanEqual => (">=", "greaterThanEqual", Sign::Unsigned, false),
        Op::SGreaterThanEqual => (">=", "greaterThanEqual", Sign::Signed, false),
        Op::ULessThan => ("<", "lessThan", Sign::Unsigned, false),
        Op::SLessThan => ("<", "lessThan", Sign::Signed, false),
        Op::ULessThanEqual => ("<=", "lessThanEqual", Sign::Unsigned, false),
        Op::SLessThanEqual => ("<=", "lessThanEqual", Sign::Signed, false),
        Op::FOrdEqual => ("==", "equal", Sign::Any, false),
        Op::FOrdNotEqual | Op::FUnordNotEqual => ("!=", "notEqual", Sign::Any, false),
        Op::FOrdLessThan => ("<", "lessThan", Sign::Any, false),
        Op::FOrdGreaterThan => (">", "greaterThan", Sign::Any, false),
        Op::FOrdLessThanEqual => ("<=", "lessThanEqual", Sign::Any, false),
        Op::FOrdGreaterThanEqual => (">=", "greaterThanEqual", Sign::Any, false),
        // Unordered comparisons hold when the ordered inverse does not.
        Op::FUnordEqual => ("!=", "notEqual", Sign::Any, true),
        Op::FUnordLessThan => (">=", "greaterThanEqual", Sign::Any, true),
        Op::FUnordGreaterThan => ("<=", "lessThanEqual", Sign::Any, true),
        Op::FUnordLessThanEqual => (">", "greaterThan", Sign::Any, true),
        Op::FUnordGreaterThanEqual => ("<", "lessThan", Sign::Any, true),
        _ => return None,
    };
    Some(entry)
}

/// Single-argument builtin functions.
fn unary_function(op: Op) -> Option<&'static str> {
    let name = match op {
        Op::Any => "any",
        Op::All => "all",
        Op::IsNan => "isnan",
        Op::IsInf => "isinf",
        Op::BitReverse => "bitfieldReverse",
        _ => return None,
    };
    Some(name)
}

impl<D: Dialect> CodeGenerator<'_, D> {
    pub(super) fn emit_operator(&mut self, op: Op, operands: &[u32]) -> Result<()> {
        let [ty, id, a, ..] = *operands else {
            return Err(truncated(op));
        };
        let b = operands.get(3).copied();
        let second = || b.ok_or_else(|| truncated(op));

        if let Some((symbol, sign)) = infix(op) {
            let sign = match sign {
                Some(sign) => sign,
                None => self.sign_of(ty)?,
            };
            return self.binary(ty, id, a, second()?, symbol, sign);
        }
        if let Some((symbol, function, sign, negate)) = comparison(op) {
            // Equality needs matching operand types, not a particular sign.
            let sign = match sign {
                Sign::Any => self.sign_of(self.type_of(a)?)?,
                sign => sign,
            };
            return self.compare(ty, id, a, second()?, symbol, function, sign, negate);
        }
        if let Some(function) = unary_function(op) {
            if op == Op::BitReverse {
                self.require(Feature::BitfieldOps)?;
            }
            let text = format!("{function}({})", self.read(a)?);
            return self.emit_value(ty, id, text, &[a]);
        }

        match op {
            Op::SNegate => {
                let text = format!("-{}", enclose(&self.operand(a, Sign::Signed)?));
                let text = self.cast_result(ty, text, Sign::Signed)?;
                self.emit_value(ty, id, text, &[a])
            }
            Op::FNegate => {
                let text = format!("-{}", enclose(&self.read(a)?));
                self.emit_value(ty, id, text, &[a])
            }
            Op::Not => {
                let sign = self.sign_of(ty)?;
                let text = format!("~{}", enclose(&self.operand(a, sign)?));
                self.emit_value(ty, id, text, &[a])
            }
            Op::LogicalNot => {
                let vector = self.value_type(a)?.vecsize > 1;
                let inner = self.read(a)?;
                let text = if vector {
                    format!("not({inner})")
                } else {
                    format!("!{}", enclose(&inner))
                };
                self.emit_value(ty, id, text, &[a])
            }
            Op::LogicalOr | Op::LogicalAnd => self.logical(ty, id, a, second()?, op == Op::LogicalOr),
            Op::FRem => {
                let b = second()?;
                let lhs = enclose(&self.read_duplicable(a)?);
                let rhs = enclose(&self.read_duplicable(b)?);
                let text = format!("{lhs} - {rhs} * trunc({lhs} / {rhs})");
                self.emit_value(ty, id, text, &[a, b])
            }
            Op::FMod => {
                let b = second()?;
                let text = format!("mod({}, {})", self.read(a)?, self.read(b)?);
                self.emit_value(ty, id, text, &[a, b])
            }
            Op::Dot => {
                let b = second()?;
                let text = format!("dot({}, {})", self.read(a)?, self.read(b)?);
                self.emit_value(ty, id, text, &[a, b])
            }
            Op::OuterProduct => {
                let b = second()?;
                let text = format!("outerProduct({}, {})", self.read(a)?, self.read(b)?);
                self.emit_value(ty, id, text, &[a, b])
            }
            Op::ShiftLeftLogical | Op::ShiftRightLogical | Op::ShiftRightArithmetic => {
                let b = second()?;
                let (symbol, sign) = match op {
                    Op::ShiftLeftLogical => ("<<", self.sign_of(ty)?),
                    Op::ShiftRightLogical => (">>", Sign::Unsigned),
                    _ => (">>", Sign::Signed),
                };
                // The shift amount may have either signedness.
                let lhs = enclose(&self.operand(a, sign)?);
                let rhs = enclose(&self.read(b)?);
                let text = self.cast_result(ty, format!("{lhs} {symbol} {rhs}"), sign)?;
                self.emit_value(ty, id, text, &[a, b])
            }
            Op::BitFieldInsert => {
                let [_, _, base, insert, offset, count] = *operands else {
                    return Err(truncated(op));
                };
                self.require(Feature::BitfieldOps)?;
                let text = format!(
                    "bitfieldInsert({}, {}, {}, {})",
                    self.read(base)?,
                    self.read(insert)?,
                    self.operand(offset, Sign::Signed)?,
                    self.operand(count, Sign::Signed)?
                );
                self.emit_value(ty, id, text, &[base, insert, offset, count])
            }
            Op::BitFieldSExtract | Op::BitFieldUExtract => {
                let [_, _, base, offset, count] = *operands else {
                    return Err(truncated(op));
                };
                self.require(Feature::BitfieldOps)?;
                let sign = if op == Op::BitFieldSExtract {
                    Sign::Signed
                } else {
                    Sign::Unsigned
                };
                let text = format!(
                    "bitfieldExtract({}, {}, {})",
                    self.operand(base, sign)?,
                    self.operand(offset, Sign::Signed)?,
                    self.operand(count, Sign::Signed)?
                );
                let text = self.cast_result(ty, text, sign)?;
                self.emit_value(ty, id, text, &[base, offset, count])
            }
            Op::BitCount => {
                self.require(Feature::BitfieldOps)?;
                let text = format!("bitCount({})", self.read(a)?);
                let text = self.cast_result_from(ty, text, BaseType::Int)?;
                self.emit_value(ty, id, text, &[a])
            }
            Op::Select => {
                let [_, _, condition, if_true, if_false] = *operands else {
                    return Err(truncated(op));
                };
                self.select(ty, id, condition, if_true, if_false)
            }
            _ => Err(Error::internal(format!("{op:?} is not an operator"))),
        }
    }

    fn binary(&mut self, ty: Id, id: Id, a: Id, b: Id, symbol: &str, sign: Sign) -> Result<()> {
        let lhs = enclose(&self.operand(a, sign)?);
        let rhs = enclose(&self.operand(b, sign)?);
        let text = self.cast_result(ty, format!("{lhs} {symbol} {rhs}"), sign)?;
        self.emit_value(ty, id, text, &[a, b])
    }

    #[allow(clippy::too_many_arguments)]
    fn compare(
        &mut self,
        ty: Id,
        id: Id,
        a: Id,
        b: Id,
        symbol: &str,
        function: &str,
        sign: Sign,
        negate: bool,
    ) -> Result<()> {
        let vector = self.value_type(a)?.vecsize > 1;
        let lhs = self.operand(a, sign)?;
        let rhs = self.operand(b, sign)?;
        let text = match (vector, negate) {
            (true, false) => format!("{function}({lhs}, {rhs})"),
            (true, true) => format!("not({function}({lhs}, {rhs}))"),
            (false, false) => format!("{} {symbol} {}", enclose(&lhs), enclose(&rhs)),
            (false, true) => format!("!({} {symbol} {})", enclose(&lhs), enclose(&rhs)),
        };
        self.emit_value(ty, id, text, &[a, b])
    }

    /// `||` and `&&` only exist for scalars; vectors go through uint lanes.
    fn logical(&mut self, ty: Id, id: Id, a: Id, b: Id, or: bool) -> Result<()> {
        let vecsize = self.ir.ids.get_type(ty)?.vecsize;
        let lhs = self.read(a)?;
        let rhs = self.read(b)?;
        let text = if vecsize > 1 {
            let lanes = self.numeric_type_name(BaseType::UInt, vecsize)?;
            let bools = self.numeric_type_name(BaseType::Boolean, vecsize)?;
            let symbol = if or { "|" } else { "&" };
            format!("{bools}({lanes}({lhs}) {symbol} {lanes}({rhs}))")
        } else {
            let symbol = if or { "||" } else { "&&" };
            format!("{} {symbol} {}", enclose(&lhs), enclose(&rhs))
        };
        self.emit_value(ty, id, text, &[a, b])
    }

    fn select(&mut self, ty: Id, id: Id, condition: Id, if_true: Id, if_false: Id) -> Result<()> {
        let condition_size = self.value_type(condition)?.vecsize;
        let result = self.ir.ids.get_type(ty)?.clone();
        let inputs = [condition, if_true, if_false];

        if condition_size == 1 {
            let text = format!(
                "{} ? {} : {}",
                enclose(&self.read(condition)?),
                enclose(&self.read(if_true)?),
                enclose(&self.read(if_false)?)
            );
            return self.emit_value(ty, id, text, &inputs);
        }
        if result.basetype.is_float() {
            // mix() with a boolean vector picks the second operand where set.
            let text = format!(
                "mix({}, {}, {})",
                self.read(if_false)?,
                self.read(if_true)?,
                self.read(condition)?
            );
            return self.emit_value(ty, id, text, &inputs);
        }

        let condition_text = enclose(&self.read_duplicable(condition)?);
        let true_text = enclose(&self.read_duplicable(if_true)?);
        let false_text = enclose(&self.read_duplicable(if_false)?);
        let mut lanes = Vec::with_capacity(result.vecsize as usize);
        for lane in 0..result.vecsize {
            let c = component(lane)?;
            lanes.push(format!(
                "{condition_text}.{c} ? {true_text}.{c} : {false_text}.{c}"
            ));
        }
        let constructor = self.constructor_name(ty)?;
        self.emit_value(ty, id, format!("{constructor}({})", lanes.join(", ")), &inputs)
    }

    // ── Conversions ─────────────────────────────────────────────────────

    pub(super) fn emit_conversion(&mut self, op: Op, operands: &[u32]) -> Result<()> {
        let [ty, id, source, ..] = *operands else {
            return Err(truncated(op));
        };
        let text = match op {
            Op::ConvertFToU | Op::ConvertFToS | Op::FConvert => {
                let constructor = self.type_name(ty)?;
                format!("{constructor}({})", self.read(source)?)
            }
            Op::ConvertSToF | Op::SConvert => {
                let constructor = self.type_name(ty)?;
                format!("{constructor}({})", self.operand(source, Sign::Signed)?)
            }
            Op::ConvertUToF | Op::UConvert => {
                let constructor = self.type_name(ty)?;
                format!("{constructor}({})", self.operand(source, Sign::Unsigned)?)
            }
            Op::Bitcast => self.bitcast(ty, source)?,
            Op::QuantizeToF16 => self.quantize_to_f16(source)?,
            _ => return Err(Error::internal(format!("{op:?} is not a conversion"))),
        };
        self.emit_value(ty, id, text, &[source])
    }

    fn bitcast(&mut self, ty: Id, source: Id) -> Result<String> {
        let to = self.ir.ids.get_type(ty)?.clone();
        let from = self.value_type(source)?;
        if to.pointer || from.pointer {
            return Err(Error::unsupported("pointer bitcasts"));
        }
        let text = self.read(source)?;
        let function = match (from.basetype, to.basetype) {
            (f, t) if f == t && from.vecsize == to.vecsize => return Ok(text),
            (BaseType::Float, BaseType::Int) => "floatBitsToInt",
            (BaseType::Float, BaseType::UInt) => "floatBitsToUint",
            (BaseType::Int, BaseType::Float) => "intBitsToFloat",
            (BaseType::UInt, BaseType::Float) => "uintBitsToFloat",
            (BaseType::Double, BaseType::UInt) if to.vecsize == 2 => {
                self.require(Feature::Float64)?;
                return Ok(format!("unpackDouble2x32({text})"));
            }
            (BaseType::UInt, BaseType::Double) if from.vecsize == 2 => {
                self.require(Feature::Float64)?;
                return Ok(format!("packDouble2x32({text})"));
            }
            (f, t) if f.is_integer() && t.is_integer() && from.width == to.width => {
                let constructor = self.type_name(ty)?;
                return Ok(format!("{constructor}({text})"));
            }
            (f, t) => {
                return Err(Error::unsupported(format!(
                    "bitcast from {f:?} to {t:?}"
                )))
            }
        };
        self.require(Feature::BitcastFloat)?;
        Ok(format!("{function}({text})"))
    }

    /// Round-trip through half precision with the packing builtins.
    fn quantize_to_f16(&mut self, source: Id) -> Result<String> {
        self.require(Feature::PackingFunctions)?;
        let vecsize = self.value_type(source)?.vecsize;
        let round_trip = |pair: &str| format!("unpackHalf2x16(packHalf2x16({pair}))");
        let text = match vecsize {
            1 => format!("{}.x", round_trip(&format!("vec2({})", self.read(source)?))),
            2 => round_trip(&self.read(source)?),
            3 => {
                let v = enclose(&self.read_duplicable(source)?);
                format!(
                    "vec3({}, {}.x)",
                    round_trip(&format!("{v}.xy")),
                    round_trip(&format!("vec2({v}.z)"))
                )
            }
            4 => {
                let v = enclose(&self.read_duplicable(source)?);
                format!(
                    "vec4({}, {})",
                    round_trip(&format!("{v}.xy")),
                    round_trip(&format!("{v}.zw"))
                )
            }
            n => return Err(Error::invalid(format!("cannot quantize a {n}-component vector"))),
        };
        Ok(text)
    }

    // ── Derivatives ─────────────────────────────────────────────────────

    pub(super) fn emit_derivative(&mut self, op: Op, operands: &[u32]) -> Result<()> {
        let [ty, id, source, ..] = *operands else {
            return Err(truncated(op));
        };
        let (function, controlled) = match op {
            Op::DPdx => ("dFdx", false),
            Op::DPdy => ("dFdy", false),
            Op::Fwidth => ("fwidth", false),
            Op::DPdxFine => ("dFdxFine", true),
            Op::DPdyFine => ("dFdyFine", true),
            Op::FwidthFine => ("fwidthFine", true),
            Op::DPdxCoarse => ("dFdxCoarse", true),
            Op::DPdyCoarse => ("dFdyCoarse", true),
            Op::FwidthCoarse => ("fwidthCoarse", true),
            _ => return Err(Error::internal(format!("{op:?} is not a derivative"))),
        };
        if controlled {
            self.require(Feature::DerivativeControl)?;
        }
        let text = format!("{function}({})", self.read(source)?);
        self.emit_value(ty, id, text, &[source])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_and_remainder_pick_a_signedness() {
        assert_eq!(infix(Op::UDiv), Some(("/", Some(Sign::Unsigned))));
        assert_eq!(infix(Op::SRem), Some(("%", Some(Sign::Signed))));
        assert_eq!(infix(Op::IAdd), Some(("+", None)));
        assert_eq!(infix(Op::Dot), None);
    }

    #[test]
    fn unordered_comparisons_negate_the_inverse() {
        let (symbol, function, _, negate) = comparison(Op::FUnordLessThan).unwrap();
        assert_eq!((symbol, function, negate), (">=", "greaterThanEqual", true));
        let (symbol, _, _, negate) = comparison(Op::FUnordNotEqual).unwrap();
        assert_eq!((symbol, negate), ("!=", false));
        let (_, _, sign, _) = comparison(Op::ULessThan).unwrap();
        assert_eq!(sign, Sign::Unsigned);
    }
}
