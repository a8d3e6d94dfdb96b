//! Target dialects.
//!
//! The Dialect trait abstracts what differs between GLSL flavours: builtin
//! spellings, feature availability per version, image format qualifiers and
//! reserved words. The code generator is generic over it and never checks a
//! version number directly.

mod caps;
mod glsl;

pub use caps::{support, CapabilityRow, Feature, Support, CAPABILITY_TABLE};
pub use glsl::GlslDialect;

use crate::error::Result;
use spirv::{BuiltIn, ImageFormat, StorageClass};

/// Target-dialect rules consulted during emission.
pub trait Dialect {
    fn version(&self) -> u32;

    /// Restricted (ES) profile.
    fn es(&self) -> bool;

    /// Vulkan GLSL: separate samplers, push constants and descriptor sets.
    fn vulkan(&self) -> bool;

    /// First line of the output.
    fn version_directive(&self) -> String;

    fn support(&self, feature: Feature) -> Support;

    /// Target spelling of a builtin variable.
    fn builtin_name(&self, builtin: BuiltIn, storage: StorageClass) -> Result<&'static str>;

    /// Feature a builtin depends on, if any.
    fn builtin_feature(&self, builtin: BuiltIn) -> Option<Feature>;

    /// Layout qualifier for a storage image format, `None` if unknown.
    fn image_format(&self, format: ImageFormat) -> Option<&'static str>;

    fn is_keyword(&self, name: &str) -> bool;
}
