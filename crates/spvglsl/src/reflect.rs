//! Shader resource reflection.
//!
//! Lists the module-scope variables a host application has to bind, sorted
//! into the categories graphics APIs care about. Builtin variables and
//! builtin blocks (`gl_PerVertex`) are never reported.

use crate::error::Result;
use crate::ir::{BaseType, DecorationFlags, Id, ParsedIr, SpirType};
use spirv::{Dim, StorageClass};
use std::collections::BTreeSet;

/// One reflected variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// The variable.
    pub id: Id,
    /// Type of the variable's value, array dimensions included.
    pub type_id: Id,
    /// `type_id` with every array dimension removed.
    pub base_type_id: Id,
    /// Debug name, or `_<id>` when the module has none.
    pub name: String,
}

/// Resources of one module, by category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderResources {
    pub stage_inputs: Vec<Resource>,
    pub stage_outputs: Vec<Resource>,
    pub uniform_buffers: Vec<Resource>,
    pub storage_buffers: Vec<Resource>,
    pub push_constant_buffers: Vec<Resource>,
    /// Combined image-samplers (`sampler2D`).
    pub sampled_images: Vec<Resource>,
    /// Images meant to be sampled through a separate sampler (`texture2D`).
    pub separate_images: Vec<Resource>,
    pub storage_images: Vec<Resource>,
    pub separate_samplers: Vec<Resource>,
    pub atomic_counters: Vec<Resource>,
    pub subpass_inputs: Vec<Resource>,
}

impl ShaderResources {
    pub fn is_empty(&self) -> bool {
        self.categories().iter().all(|(_, list)| list.is_empty())
    }

    /// Every category with a display label, in a fixed order.
    pub fn categories(&self) -> [(&'static str, &[Resource]); 11] {
        [
            ("stage inputs", self.stage_inputs.as_slice()),
            ("stage outputs", self.stage_outputs.as_slice()),
            ("uniform buffers", self.uniform_buffers.as_slice()),
            ("storage buffers", self.storage_buffers.as_slice()),
            ("push constant buffers", self.push_constant_buffers.as_slice()),
            ("sampled images", self.sampled_images.as_slice()),
            ("separate images", self.separate_images.as_slice()),
            ("storage images", self.storage_images.as_slice()),
            ("separate samplers", self.separate_samplers.as_slice()),
            ("atomic counters", self.atomic_counters.as_slice()),
            ("subpass inputs", self.subpass_inputs.as_slice()),
        ]
    }

    fn list_mut(&mut self, category: Category) -> &mut Vec<Resource> {
        match category {
            Category::StageInput => &mut self.stage_inputs,
            Category::StageOutput => &mut self.stage_outputs,
            Category::UniformBuffer => &mut self.uniform_buffers,
            Category::StorageBuffer => &mut self.storage_buffers,
            Category::PushConstant => &mut self.push_constant_buffers,
            Category::SampledImage => &mut self.sampled_images,
            Category::SeparateImage => &mut self.separate_images,
            Category::StorageImage => &mut self.storage_images,
            Category::SeparateSampler => &mut self.separate_samplers,
            Category::AtomicCounter => &mut self.atomic_counters,
            Category::SubpassInput => &mut self.subpass_inputs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    StageInput,
    StageOutput,
    UniformBuffer,
    StorageBuffer,
    PushConstant,
    SampledImage,
    SeparateImage,
    StorageImage,
    SeparateSampler,
    AtomicCounter,
    SubpassInput,
}

/// Category of a variable in `storage` whose element type is `base`.
/// `buffer_block` is set for `BufferBlock`-decorated uniform structs.
fn categorize(storage: StorageClass, base: &SpirType, buffer_block: bool) -> Option<Category> {
    let category = match storage {
        StorageClass::Input => Category::StageInput,
        StorageClass::Output => Category::StageOutput,
        StorageClass::Uniform if buffer_block => Category::StorageBuffer,
        StorageClass::Uniform => Category::UniformBuffer,
        StorageClass::StorageBuffer => Category::StorageBuffer,
        StorageClass::PushConstant => Category::PushConstant,
        StorageClass::AtomicCounter => Category::AtomicCounter,
        StorageClass::UniformConstant => match (base.basetype, base.image) {
            (BaseType::SampledImage, _) => Category::SampledImage,
            (BaseType::Sampler, _) => Category::SeparateSampler,
            (BaseType::AtomicCounter, _) => Category::AtomicCounter,
            (BaseType::Image, Some(info)) if info.dim == Dim::DimSubpassData => {
                Category::SubpassInput
            }
            (BaseType::Image, Some(info)) if info.sampled == 2 => Category::StorageImage,
            (BaseType::Image, _) => Category::SeparateImage,
            _ => return None,
        },
        _ => return None,
    };
    Some(category)
}

/// Reflect the module's resources. With `active` set, only those variables
/// are considered.
pub fn shader_resources(ir: &ParsedIr, active: Option<&BTreeSet<Id>>) -> Result<ShaderResources> {
    let mut resources = ShaderResources::default();
    for &var in &ir.global_variables {
        if active.is_some_and(|active| !active.contains(&var)) {
            continue;
        }
        let variable = ir.ids.get_variable(var)?;
        let value_type = ir.ids.pointee_type(variable.basetype)?;
        let mut base = value_type;
        while base.is_array() {
            base = ir.ids.get_type(base.parent_type)?;
        }

        if ir.meta.builtin(var).is_some() {
            continue;
        }
        let builtin_block = base.basetype == BaseType::Struct
            && (0..base.member_types.len()).any(|i| ir.meta.member_builtin(base.self_id, i).is_some());
        if builtin_block {
            continue;
        }

        let buffer_block = ir.meta.has_flag(base.self_id, DecorationFlags::BUFFER_BLOCK);
        let Some(category) = categorize(variable.storage, base, buffer_block) else {
            continue;
        };
        let name = match ir.meta.name(var) {
            "" => format!("_{var}"),
            name => name.to_string(),
        };
        resources.list_mut(category).push(Resource {
            id: var,
            type_id: value_type.self_id,
            base_type_id: base.self_id,
            name,
        });
    }
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ImageInfo;
    use spirv::ImageFormat;

    fn image(sampled: u32, dim: Dim) -> SpirType {
        let mut ty = SpirType::scalar(7, BaseType::Image, 0);
        ty.image = Some(ImageInfo {
            sampled_type: 1,
            dim,
            depth: false,
            arrayed: false,
            multisampled: false,
            sampled,
            format: ImageFormat::Unknown,
        });
        ty
    }

    #[test]
    fn opaque_uniforms_split_by_image_kind() {
        let constant = StorageClass::UniformConstant;
        assert_eq!(
            categorize(constant, &image(1, Dim::Dim2D), false),
            Some(Category::SeparateImage)
        );
        assert_eq!(
            categorize(constant, &image(2, Dim::Dim2D), false),
            Some(Category::StorageImage)
        );
        assert_eq!(
            categorize(constant, &image(2, Dim::DimSubpassData), false),
            Some(Category::SubpassInput)
        );
        let sampler = SpirType::scalar(8, BaseType::Sampler, 0);
        assert_eq!(categorize(constant, &sampler, false), Some(Category::SeparateSampler));
    }

    #[test]
    fn buffer_blocks_in_uniform_storage_are_storage_buffers() {
        let block = SpirType::scalar(9, BaseType::Struct, 0);
        assert_eq!(
            categorize(StorageClass::Uniform, &block, true),
            Some(Category::StorageBuffer)
        );
        assert_eq!(
            categorize(StorageClass::Uniform, &block, false),
            Some(Category::UniformBuffer)
        );
        assert_eq!(categorize(StorageClass::Private, &block, false), None);
        assert_eq!(categorize(StorageClass::Workgroup, &block, false), None);
    }

    #[test]
    fn empty_resources() {
        let resources = ShaderResources::default();
        assert!(resources.is_empty());
        assert_eq!(resources.categories().len(), 11);
    }
}
