//! Type spellings and constant literals.

use super::CodeGenerator;
use crate::backend::{Dialect, Feature};
use crate::error::{Error, Result};
use crate::ir::{BaseType, Id, SpirType};
use spirv::Dim;

/// Spelling of a float value. Non-finite values have no literal form.
pub(super) fn float_literal(value: f64, double: bool) -> String {
    if value.is_nan() {
        return "(0.0 / 0.0)".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "(1.0 / 0.0)" } else { "(-1.0 / 0.0)" }.to_string();
    }
    if double {
        format!("{value:?}lf")
    } else {
        format!("{:?}", value as f32)
    }
}

/// Spelling of one scalar component stored as raw bits.
pub(super) fn scalar_literal(basetype: BaseType, bits: u64) -> Result<String> {
    let text = match basetype {
        BaseType::Boolean => (bits != 0).to_string(),
        BaseType::Int => match bits as u32 as i32 {
            // The magnitude of INT_MIN does not fit in a signed literal.
            i32::MIN => "(-2147483647 - 1)".to_string(),
            value => value.to_string(),
        },
        BaseType::UInt => format!("{}u", bits as u32),
        BaseType::Int64 => match bits as i64 {
            i64::MIN => "(-9223372036854775807l - 1l)".to_string(),
            value => format!("{value}l"),
        },
        BaseType::UInt64 => format!("{bits}ul"),
        BaseType::Float => float_literal(f32::from_bits(bits as u32) as f64, false),
        BaseType::Double => float_literal(f64::from_bits(bits), true),
        BaseType::Half => return Err(Error::unsupported("16-bit float constants")),
        other => {
            return Err(Error::internal(format!(
                "{other:?} has no scalar literal form"
            )))
        }
    };
    Ok(text)
}

/// `vec3`, `ivec2`, `dmat4x3` and friends; `columns == 1` is a vector or
/// scalar.
fn numeric_name(basetype: BaseType, vecsize: u32, columns: u32) -> Result<String> {
    let (scalar, prefix) = match basetype {
        BaseType::Boolean => ("bool", "b"),
        BaseType::Int => ("int", "i"),
        BaseType::UInt => ("uint", "u"),
        BaseType::Int64 => ("int64_t", "i64"),
        BaseType::UInt64 => ("uint64_t", "u64"),
        BaseType::Float => ("float", ""),
        BaseType::Double => ("double", "d"),
        BaseType::Void => return Ok("void".to_string()),
        BaseType::Half => return Err(Error::unsupported("16-bit float types")),
        other => {
            return Err(Error::internal(format!("{other:?} is not a numeric type")))
        }
    };
    if columns > 1 {
        if !matches!(basetype, BaseType::Float | BaseType::Double) {
            return Err(Error::unsupported(format!("matrices of {scalar}")));
        }
        return Ok(if columns == vecsize {
            format!("{prefix}mat{columns}")
        } else {
            format!("{prefix}mat{columns}x{vecsize}")
        });
    }
    Ok(if vecsize > 1 {
        format!("{prefix}vec{vecsize}")
    } else {
        scalar.to_string()
    })
}

impl<D: Dialect> CodeGenerator<'_, D> {
    /// The type with pointer and array layers removed.
    pub(super) fn element_type(&self, type_id: Id) -> Result<&SpirType> {
        let mut ty = self.ir.ids.get_type(type_id)?;
        while ty.pointer || ty.is_array() {
            ty = self.ir.ids.get_type(ty.parent_type)?;
        }
        Ok(ty)
    }

    /// Spelling of a type without array dimensions. Pointer types are
    /// spelled as their pointee.
    pub(super) fn type_name(&mut self, type_id: Id) -> Result<String> {
        let ty = self.element_type(type_id)?.clone();
        let name = match ty.basetype {
            BaseType::Struct => {
                let master = self.ir.alias_master(ty.self_id);
                return Ok(self.name_of(master));
            }
            BaseType::Image | BaseType::SampledImage => self.image_type_name(&ty)?,
            BaseType::Sampler => "sampler".to_string(),
            BaseType::AtomicCounter => {
                self.require(Feature::AtomicCounters)?;
                "atomic_uint".to_string()
            }
            basetype => {
                self.require_numeric(basetype, ty.vecsize, ty.columns)?;
                numeric_name(basetype, ty.vecsize, ty.columns)?
            }
        };
        Ok(match &self.options.type_remap {
            Some(remap) => remap(&name).unwrap_or(name),
            None => name,
        })
    }

    /// Spelling of a scalar or vector of `basetype`, for casts.
    pub(super) fn numeric_type_name(&mut self, basetype: BaseType, vecsize: u32) -> Result<String> {
        self.require_numeric(basetype, vecsize, 1)?;
        numeric_name(basetype, vecsize, 1)
    }

    fn require_numeric(&mut self, basetype: BaseType, vecsize: u32, columns: u32) -> Result<()> {
        match basetype {
            BaseType::UInt => self.require(Feature::UnsignedIntegers)?,
            BaseType::Int64 | BaseType::UInt64 => self.require(Feature::Int64)?,
            BaseType::Double => self.require(Feature::Float64)?,
            _ => {}
        }
        if columns > 1 && columns != vecsize {
            self.require(Feature::NonSquareMatrices)?;
        }
        Ok(())
    }

    fn image_type_name(&mut self, ty: &SpirType) -> Result<String> {
        let info = ty.image.ok_or_else(|| {
            Error::internal(format!("image type %{} has no image info", ty.self_id))
        })?;
        let prefix = match self.ir.ids.get_type(info.sampled_type)?.basetype {
            BaseType::Int => "i",
            BaseType::UInt => "u",
            _ => "",
        };
        let ms = if info.multisampled { "MS" } else { "" };
        if info.dim == Dim::DimSubpassData {
            return Ok(format!("{prefix}subpassInput{ms}"));
        }
        let dim = match info.dim {
            Dim::Dim1D => "1D",
            Dim::Dim2D => "2D",
            Dim::Dim3D => "3D",
            Dim::DimCube => "Cube",
            Dim::DimRect => "2DRect",
            Dim::DimBuffer => "Buffer",
            other => return Err(Error::unsupported(format!("image dimension {other:?}"))),
        };
        let kind = if ty.basetype == BaseType::SampledImage {
            "sampler"
        } else if info.sampled == 2 {
            self.require(Feature::ImageLoadStore)?;
            "image"
        } else if self.dialect.vulkan() {
            "texture"
        } else {
            "sampler"
        };
        let array = if info.arrayed { "Array" } else { "" };
        let shadow = if info.depth && kind == "sampler" {
            "Shadow"
        } else {
            ""
        };
        Ok(format!("{prefix}{kind}{dim}{ms}{array}{shadow}"))
    }

    /// `[4][3]` for a type with array dimensions, outermost first.
    pub(super) fn array_suffix(&mut self, type_id: Id) -> Result<String> {
        let ty = self.ir.ids.get_type(type_id)?;
        let dims: Vec<(u32, bool)> = ty
            .array
            .iter()
            .copied()
            .zip(ty.array_size_literal.iter().copied())
            .collect();
        let mut suffix = String::new();
        for (size, literal) in dims.into_iter().rev() {
            match (size, literal) {
                (0, true) => suffix.push_str("[]"),
                (n, true) => suffix.push_str(&format!("[{n}]")),
                (id, false) => {
                    let length = self.name_of(id);
                    suffix.push_str(&format!("[{length}]"));
                }
            }
        }
        Ok(suffix)
    }

    /// `T name[N]`.
    pub(super) fn declare(&mut self, type_id: Id, name: &str) -> Result<String> {
        let ty = self.type_name(type_id)?;
        let suffix = self.array_suffix(type_id)?;
        Ok(format!("{ty} {name}{suffix}"))
    }

    /// Constructor spelling for a value of `type_id`: `vec3`, `S`,
    /// `float[4]`.
    pub(super) fn constructor_name(&mut self, type_id: Id) -> Result<String> {
        let ty = self.type_name(type_id)?;
        let suffix = self.array_suffix(type_id)?;
        Ok(format!("{ty}{suffix}"))
    }

    // ── Constants ───────────────────────────────────────────────────────

    /// Source text of a constant: its name for specialization constants, an
    /// inline literal otherwise.
    pub(super) fn constant_expression(&mut self, id: Id) -> Result<String> {
        if self.ir.ids.get_constant(id)?.specialization {
            return Ok(self.name_of(id));
        }
        self.constant_literal(id)
    }

    /// Inline spelling of a constant, ignoring whether it has a name.
    pub(super) fn constant_literal(&mut self, id: Id) -> Result<String> {
        let constant = self.ir.ids.get_constant(id)?.clone();
        let ty = self.ir.ids.get_type(constant.constant_type)?.clone();

        if !constant.subconstants.is_empty() {
            let constructor = self.constructor_name(constant.constant_type)?;
            let mut elements = Vec::with_capacity(constant.subconstants.len());
            for sub in constant.subconstants {
                elements.push(self.read(sub)?);
            }
            return Ok(format!("{constructor}({})", elements.join(", ")));
        }

        let name = self.type_name(constant.constant_type)?;
        if ty.columns > 1 {
            let column_name = self.numeric_type_name(ty.basetype, ty.vecsize)?;
            let mut columns = Vec::with_capacity(ty.columns as usize);
            for col in 0..ty.columns {
                let mut rows = Vec::with_capacity(ty.vecsize as usize);
                for row in 0..ty.vecsize {
                    rows.push(scalar_literal(ty.basetype, constant.bits(col, row))?);
                }
                columns.push(format!("{column_name}({})", rows.join(", ")));
            }
            return Ok(format!("{name}({})", columns.join(", ")));
        }
        if ty.vecsize > 1 {
            let mut components = Vec::with_capacity(ty.vecsize as usize);
            for row in 0..ty.vecsize {
                components.push(scalar_literal(ty.basetype, constant.bits(0, row))?);
            }
            if components.windows(2).all(|pair| pair[0] == pair[1]) {
                return Ok(format!("{name}({})", components[0]));
            }
            return Ok(format!("{name}({})", components.join(", ")));
        }
        scalar_literal(ty.basetype, constant.bits(0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_literals() {
        assert_eq!(scalar_literal(BaseType::Int, 5).unwrap(), "5");
        assert_eq!(scalar_literal(BaseType::Int, (-3i32) as u32 as u64).unwrap(), "-3");
        assert_eq!(
            scalar_literal(BaseType::Int, i32::MIN as u32 as u64).unwrap(),
            "(-2147483647 - 1)"
        );
        assert_eq!(scalar_literal(BaseType::UInt, 7).unwrap(), "7u");
        assert_eq!(scalar_literal(BaseType::UInt64, 9).unwrap(), "9ul");
        assert_eq!(scalar_literal(BaseType::Boolean, 1).unwrap(), "true");
    }

    #[test]
    fn float_literals_keep_a_decimal_point() {
        assert_eq!(scalar_literal(BaseType::Float, 1.0f32.to_bits() as u64).unwrap(), "1.0");
        assert_eq!(scalar_literal(BaseType::Float, 0.5f32.to_bits() as u64).unwrap(), "0.5");
        assert_eq!(
            scalar_literal(BaseType::Double, 2.0f64.to_bits()).unwrap(),
            "2.0lf"
        );
        assert_eq!(float_literal(f64::NAN, false), "(0.0 / 0.0)");
        assert_eq!(float_literal(f64::NEG_INFINITY, false), "(-1.0 / 0.0)");
    }

    #[test]
    fn half_constants_are_unsupported() {
        assert!(scalar_literal(BaseType::Half, 0).unwrap_err().is_unsupported());
    }

    #[test]
    fn numeric_type_names() {
        assert_eq!(numeric_name(BaseType::Float, 4, 1).unwrap(), "vec4");
        assert_eq!(numeric_name(BaseType::UInt, 1, 1).unwrap(), "uint");
        assert_eq!(numeric_name(BaseType::Boolean, 3, 1).unwrap(), "bvec3");
        assert_eq!(numeric_name(BaseType::Float, 3, 3).unwrap(), "mat3");
        assert_eq!(numeric_name(BaseType::Float, 2, 4).unwrap(), "mat4x2");
        assert_eq!(numeric_name(BaseType::Double, 2, 2).unwrap(), "dmat2");
        assert!(numeric_name(BaseType::Int, 2, 2).is_err());
    }
}
