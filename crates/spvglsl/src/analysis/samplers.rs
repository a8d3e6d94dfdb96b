//! Combined image/sampler discovery.
//!
//! Dialects without separate sampler objects need one `sampler*` uniform
//! per (image, sampler) pair that reachable code ever combines with
//! `OpSampledImage`. Both halves must resolve to module-scope
//! `UniformConstant` variables; pairs built from function arguments cannot
//! be remapped statically.

use super::visitor::OpcodeHandler;
use crate::error::{Error, Result};
use crate::ir::{Id, Node, ParsedIr, SpirCombinedImageSampler};
use log::debug;
use spirv::{Op, StorageClass};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Every synthesized pair, keyed by `(image, sampler)` variable IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinedSamplers {
    pub by_pair: BTreeMap<(Id, Id), Id>,
    /// Separate images and samplers whose declarations are replaced.
    pub consumed: BTreeSet<Id>,
}

impl CombinedSamplers {
    pub fn lookup(&self, image: Id, sampler: Id) -> Option<Id> {
        self.by_pair.get(&(image, sampler)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CombinedSamplerHandler {
    /// Loaded value or access chain → root variable.
    roots: HashMap<Id, Id>,
    /// `(image, sampler)` → `OpTypeSampledImage` the pair is used as.
    pub pairs: BTreeMap<(Id, Id), Id>,
}

impl CombinedSamplerHandler {
    fn root(&self, id: Id) -> Id {
        self.roots.get(&id).copied().unwrap_or(id)
    }

    fn resolve(&self, ir: &ParsedIr, value: Id, what: &str) -> Result<Id> {
        let root = self.root(value);
        let var = ir.ids.maybe_variable(root).ok_or_else(|| {
            Error::unsupported(format!(
                "cannot trace the {what} of a combined sampler to a variable"
            ))
            .at_id(value)
        })?;
        if var.parameter {
            return Err(Error::unsupported(format!(
                "combining a {what} passed as a function argument"
            ))
            .at_id(root));
        }
        if var.storage != StorageClass::UniformConstant {
            return Err(Error::unsupported(format!(
                "combined sampler {what} is not a uniform"
            ))
            .at_id(root));
        }
        let ty = ir.ids.pointee_type(var.basetype)?;
        if ty.is_array() {
            return Err(
                Error::unsupported(format!("combining an array of {what}s")).at_id(root)
            );
        }
        Ok(root)
    }
}

impl OpcodeHandler for CombinedSamplerHandler {
    fn handle(&mut self, ir: &ParsedIr, op: Op, operands: &[u32]) -> Result<bool> {
        match (op, operands) {
            (Op::Load | Op::CopyObject, [_, result, source, ..])
            | (
                Op::AccessChain | Op::InBoundsAccessChain | Op::PtrAccessChain,
                [_, result, source, ..],
            ) => {
                let root = self.root(*source);
                self.roots.insert(*result, root);
            }
            (Op::SampledImage, [result_type, _, image, sampler, ..]) => {
                let image = self.resolve(ir, *image, "image")?;
                let sampler = self.resolve(ir, *sampler, "sampler")?;
                self.pairs.entry((image, sampler)).or_insert(*result_type);
            }
            _ => {}
        }
        Ok(true)
    }
}

/// Allocate a `CombinedImageSampler` node for every discovered pair.
///
/// New IDs are taken past the module's bound, so pair IDs never collide
/// with anything the module declared.
pub fn build_combined_samplers(
    ir: &mut ParsedIr,
    pairs: BTreeMap<(Id, Id), Id>,
) -> Result<CombinedSamplers> {
    let mut combined = CombinedSamplers::default();
    for ((image, sampler), combined_type) in pairs {
        let id = ir.ids.increase_bound(1);
        ir.ids.set(
            id,
            Node::CombinedImageSampler(SpirCombinedImageSampler {
                self_id: id,
                combined_type,
                image,
                sampler,
            }),
        )?;
        let image_name = ir.meta.name(image).to_string();
        let sampler_name = ir.meta.name(sampler).to_string();
        if !image_name.is_empty() && !sampler_name.is_empty() {
            ir.meta.entry(id).decoration.name = format!("{image_name}_{sampler_name}");
        }
        // The pair is bound where the image was.
        ir.meta.copy_decorations(image, id);

        debug!("combined image %{image} with sampler %{sampler} as %{id}");
        combined.by_pair.insert((image, sampler), id);
        combined.consumed.insert(image);
        combined.consumed.insert(sampler);
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_follow_loads_through_chains() {
        let mut handler = CombinedSamplerHandler::default();
        handler.roots.insert(20, 10);
        handler.roots.insert(21, handler.root(20));
        assert_eq!(handler.root(21), 10);
        assert_eq!(handler.root(10), 10);
    }

    #[test]
    fn lookup_is_keyed_by_image_then_sampler() {
        let mut combined = CombinedSamplers::default();
        combined.by_pair.insert((3, 4), 99);
        assert_eq!(combined.lookup(3, 4), Some(99));
        assert_eq!(combined.lookup(4, 3), None);
        assert!(!combined.is_empty());
    }
}
