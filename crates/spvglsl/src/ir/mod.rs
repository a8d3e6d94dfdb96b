//! Intermediate representation: ID store, node types, metadata, and the
//! builder that fills them from a decoded module.

pub mod builder;
pub mod meta;
pub mod opcode;
pub mod store;
pub mod types;

pub use meta::{Decoration, DecorationFlags, Meta, MetaTable};
pub use store::{Handle, IdStore};
pub use types::*;

use crate::parser::{Header, Instruction};
use spirv::{Capability, ExecutionModel};
use std::collections::HashMap;

/// One `OpEntryPoint` with the execution modes applied to it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPoint {
    pub function: Id,
    pub name: String,
    pub model: ExecutionModel,
    /// Interface variables listed on the entry point.
    pub interface: Vec<Id>,
    pub workgroup_size: [u32; 3],
    pub early_fragment_tests: bool,
    pub origin_upper_left: bool,
    pub pixel_center_integer: bool,
    pub depth_replacing: bool,
}

impl EntryPoint {
    pub fn new(function: Id, name: String, model: ExecutionModel, interface: Vec<Id>) -> Self {
        EntryPoint {
            function,
            name,
            model,
            interface,
            workgroup_size: [1, 1, 1],
            early_fragment_tests: false,
            origin_upper_left: false,
            pixel_center_integer: false,
            depth_replacing: false,
        }
    }
}

/// Language info from `OpSource`, if present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub version: u32,
    pub es: bool,
    pub known: bool,
}

/// The fully built IR of one module.
#[derive(Debug, Clone)]
pub struct ParsedIr {
    pub header: Header,
    pub words: Vec<u32>,
    pub ids: IdStore,
    pub meta: MetaTable,
    pub entry_points: Vec<EntryPoint>,
    pub capabilities: Vec<Capability>,
    pub extensions: Vec<String>,
    pub source: SourceInfo,
    /// Every module-scope variable, in declaration order.
    pub global_variables: Vec<Id>,
    /// Workgroup, private and output variables. Stores to aliasable memory
    /// must flush expressions that read any of these.
    pub aliased_variables: Vec<Id>,
    /// Module-scope types, constants, undefs and variables in declaration
    /// order.
    pub declaration_order: Vec<Id>,
    pub function_order: Vec<Id>,
    /// Continue block to the loop header that declared it.
    pub continue_blocks: HashMap<Id, Id>,
    /// Result type of every typed instruction inside a function body.
    pub result_types: HashMap<Id, Id>,
}

impl ParsedIr {
    pub fn new(header: Header) -> Self {
        ParsedIr {
            header,
            words: Vec::new(),
            ids: IdStore::new(header.bound),
            meta: MetaTable::default(),
            entry_points: Vec::new(),
            capabilities: Vec::new(),
            extensions: Vec::new(),
            source: SourceInfo::default(),
            global_variables: Vec::new(),
            aliased_variables: Vec::new(),
            declaration_order: Vec::new(),
            function_order: Vec::new(),
            continue_blocks: HashMap::new(),
            result_types: HashMap::new(),
        }
    }

    pub fn operands(&self, inst: &Instruction) -> &[u32] {
        &self.words[inst.operand_range()]
    }

    /// The entry point that gets emitted as `main`.
    pub fn default_entry_point(&self) -> Option<&EntryPoint> {
        self.entry_points.first()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Static type of a value: its node's type, or the recorded result type
    /// of the body instruction that defines it.
    pub fn type_of(&self, id: Id) -> Option<Id> {
        self.ids
            .value_type_of(id)
            .or_else(|| self.result_types.get(&id).copied())
    }

    /// Whether `block` is some loop's continue target.
    pub fn is_continue_block(&self, block: Id) -> bool {
        self.continue_blocks.contains_key(&block)
    }

    /// Resolve a struct type to the master of its alias group.
    pub fn alias_master(&self, type_id: Id) -> Id {
        match self.ids.maybe_type(type_id) {
            Some(ty) if ty.type_alias != 0 => ty.type_alias,
            _ => type_id,
        }
    }

    /// Whether a struct type is a buffer or uniform block.
    pub fn is_block_like(&self, type_id: Id) -> bool {
        self.meta.has_flag(type_id, DecorationFlags::BLOCK)
            || self.meta.has_flag(type_id, DecorationFlags::BUFFER_BLOCK)
            || self.meta.get(type_id).is_some_and(Meta::has_member_offsets)
    }
}
