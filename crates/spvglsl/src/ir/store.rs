//! Dense ID-indexed node arena.
//!
//! Slots are allocated on first write, so the header's ID bound only
//! limits which IDs are accepted. Each slot holds one [`Node`] and a generation counter. A slot may be
//! written once with [`IdStore::set`]; later writes must either keep the
//! node kind ([`IdStore::rebind`]) or go through the narrow
//! access-chain to expression [`IdStore::promote`]. Clearing expressions
//! between emission attempts bumps the generation of every cleared slot, so
//! a [`Handle`] taken during an earlier attempt no longer resolves.

use super::types::*;
use crate::error::{Error, Result};

/// A generation-checked reference to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub id: Id,
    generation: u32,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    node: Node,
    generation: u32,
}

#[derive(Debug, Clone, Default)]
pub struct IdStore {
    bound: u32,
    slots: Vec<Slot>,
}

fn mismatch(id: Id, found: NodeKind, expected: NodeKind) -> Error {
    if found == NodeKind::None {
        Error::invalid(format!("id %{id} is undefined, expected a {expected}")).at_id(id)
    } else {
        Error::invalid(format!("id %{id} is a {found}, expected a {expected}")).at_id(id)
    }
}

impl IdStore {
    /// An empty store for IDs below `bound`.
    pub fn new(bound: u32) -> Self {
        IdStore {
            bound,
            slots: Vec::new(),
        }
    }

    /// One past the largest valid ID.
    pub fn bound(&self) -> u32 {
        self.bound
    }

    /// Reserve `count` fresh IDs and return the first.
    pub fn increase_bound(&mut self, count: u32) -> Id {
        let first = self.bound;
        self.bound = self.bound.saturating_add(count);
        first
    }

    fn check_range(&self, id: Id) -> Result<()> {
        if id == 0 || id >= self.bound() {
            return Err(Error::invalid(format!(
                "id %{id} is outside the declared bound {}",
                self.bound()
            ))
            .at_id(id));
        }
        Ok(())
    }

    /// The slot for an in-range ID, allocating up to it if needed.
    fn slot_mut(&mut self, id: Id) -> Result<&mut Slot> {
        self.check_range(id)?;
        let index = id as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, Slot::default());
        }
        Ok(&mut self.slots[index])
    }

    /// Store `node` in an empty slot.
    pub fn set(&mut self, id: Id, node: Node) -> Result<()> {
        let slot = self.slot_mut(id)?;
        if slot.node.kind() != NodeKind::None {
            return Err(Error::invalid(format!(
                "id %{id} is already defined as a {}",
                slot.node.kind()
            ))
            .at_id(id));
        }
        slot.node = node;
        Ok(())
    }

    /// Replace a slot's payload with one of the same kind (or fill an empty
    /// slot).
    pub fn rebind(&mut self, id: Id, node: Node) -> Result<()> {
        let slot = self.slot_mut(id)?;
        let current = slot.node.kind();
        if current != NodeKind::None && current != node.kind() {
            return Err(Error::internal(format!(
                "cannot rebind id %{id} from {current} to {}",
                node.kind()
            ))
            .at_id(id));
        }
        slot.node = node;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(())
    }

    /// Turn an access-chain placeholder into a value expression.
    pub fn promote(&mut self, id: Id, expression: SpirExpression) -> Result<()> {
        let slot = self.slot_mut(id)?;
        match slot.node.kind() {
            NodeKind::AccessChain => {
                slot.node = Node::Expression(expression);
                slot.generation = slot.generation.wrapping_add(1);
                Ok(())
            }
            other => Err(Error::internal(format!(
                "only access chains can be promoted, id %{id} is a {other}"
            ))
            .at_id(id)),
        }
    }

    /// Drop every expression and access chain. Returns how many were cleared.
    pub fn reset_expressions(&mut self) -> usize {
        let mut cleared = 0;
        for slot in &mut self.slots {
            if matches!(slot.node, Node::Expression(_) | Node::AccessChain(_)) {
                slot.node = Node::None;
                slot.generation = slot.generation.wrapping_add(1);
                cleared += 1;
            }
        }
        cleared
    }

    /// Clear a single expression slot (used when a forwarded value is
    /// invalidated and must be re-derived).
    pub fn clear_expression(&mut self, id: Id) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            if matches!(slot.node, Node::Expression(_) | Node::AccessChain(_)) {
                slot.node = Node::None;
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
    }

    pub fn handle(&self, id: Id) -> Option<Handle> {
        if id >= self.bound {
            return None;
        }
        let generation = self.slots.get(id as usize).map_or(0, |slot| slot.generation);
        Some(Handle { id, generation })
    }

    /// Whether `handle` still refers to the slot's current payload.
    pub fn is_current(&self, handle: Handle) -> bool {
        self.handle(handle.id) == Some(handle)
    }

    pub fn node(&self, id: Id) -> Option<&Node> {
        self.slots.get(id as usize).map(|slot| &slot.node)
    }

    pub fn kind(&self, id: Id) -> NodeKind {
        self.node(id).map_or(NodeKind::None, Node::kind)
    }

    /// IDs currently holding a node of `kind`, in ascending order.
    pub fn ids_of_kind(&self, kind: NodeKind) -> Vec<Id> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.node.kind() == kind)
            .map(|(id, _)| id as Id)
            .collect()
    }
}

macro_rules! typed_accessors {
    ($($variant:ident => $ty:ty, $get:ident, $get_mut:ident, $maybe:ident;)*) => {
        impl IdStore {
            $(
                pub fn $get(&self, id: Id) -> Result<&$ty> {
                    match self.node(id) {
                        Some(Node::$variant(inner)) => Ok(inner),
                        _ => Err(mismatch(id, self.kind(id), NodeKind::$variant)),
                    }
                }

                pub fn $get_mut(&mut self, id: Id) -> Result<&mut $ty> {
                    let found = self.kind(id);
                    match self.slots.get_mut(id as usize).map(|slot| &mut slot.node) {
                        Some(Node::$variant(inner)) => Ok(inner),
                        _ => Err(mismatch(id, found, NodeKind::$variant)),
                    }
                }

                pub fn $maybe(&self, id: Id) -> Option<&$ty> {
                    match self.node(id) {
                        Some(Node::$variant(inner)) => Some(inner),
                        _ => None,
                    }
                }
            )*
        }
    };
}

typed_accessors! {
    Type => SpirType, get_type, get_type_mut, maybe_type;
    Constant => SpirConstant, get_constant, get_constant_mut, maybe_constant;
    ConstantOp => SpirConstantOp, get_constant_op, get_constant_op_mut, maybe_constant_op;
    Variable => SpirVariable, get_variable, get_variable_mut, maybe_variable;
    Function => SpirFunction, get_function, get_function_mut, maybe_function;
    FunctionPrototype => SpirFunctionPrototype, get_prototype, get_prototype_mut, maybe_prototype;
    Block => SpirBlock, get_block, get_block_mut, maybe_block;
    Expression => SpirExpression, get_expression, get_expression_mut, maybe_expression;
    Undef => SpirUndef, get_undef, get_undef_mut, maybe_undef;
    Extension => SpirExtension, get_extension, get_extension_mut, maybe_extension;
    AccessChain => SpirAccessChain, get_access_chain, get_access_chain_mut, maybe_access_chain;
    CombinedImageSampler => SpirCombinedImageSampler, get_combined, get_combined_mut, maybe_combined;
}

impl IdStore {
    /// Follow a pointer type to its pointee.
    pub fn pointee_type(&self, pointer_type: Id) -> Result<&SpirType> {
        let ty = self.get_type(pointer_type)?;
        if ty.pointer {
            self.get_type(ty.parent_type)
        } else {
            Ok(ty)
        }
    }

    /// The type of the value an ID produces, when it is statically known.
    pub fn value_type_of(&self, id: Id) -> Option<Id> {
        match self.node(id)? {
            Node::Constant(c) => Some(c.constant_type),
            Node::ConstantOp(op) => Some(op.basetype),
            Node::Variable(v) => Some(v.basetype),
            Node::Expression(e) => Some(e.expression_type),
            Node::Undef(u) => Some(u.basetype),
            Node::AccessChain(a) => Some(a.basetype),
            Node::CombinedImageSampler(c) => Some(c.combined_type),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(id: Id) -> SpirExpression {
        SpirExpression {
            self_id: id,
            text: format!("_{id}"),
            expression_type: 1,
            immutable: true,
            forwarded: false,
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn set_rejects_occupied_slots() {
        let mut store = IdStore::new(8);
        store
            .set(1, Node::Type(SpirType::scalar(1, BaseType::Float, 32)))
            .unwrap();
        let err = store
            .set(1, Node::Undef(SpirUndef { self_id: 1, basetype: 1 }))
            .unwrap_err();
        assert!(err.is_invalid(), "got {err}");
        assert_eq!(err.location().id, Some(1));
    }

    #[test]
    fn out_of_bound_ids_are_invalid() {
        let mut store = IdStore::new(4);
        assert!(store.set(4, Node::Expression(expr(4))).is_err());
        assert!(store.set(0, Node::Expression(expr(0))).is_err());
    }

    #[test]
    fn rebind_keeps_kind() {
        let mut store = IdStore::new(4);
        store.set(2, Node::Expression(expr(2))).unwrap();
        store.rebind(2, Node::Expression(expr(2))).unwrap();
        let err = store
            .rebind(2, Node::Undef(SpirUndef { self_id: 2, basetype: 1 }))
            .unwrap_err();
        assert!(matches!(err, Error::InternalInvariantViolation { .. }));
    }

    #[test]
    fn only_access_chains_promote() {
        let mut store = IdStore::new(4);
        store
            .set(
                3,
                Node::AccessChain(SpirAccessChain {
                    self_id: 3,
                    basetype: 1,
                    base: 2,
                    text: "buf.data[0]".into(),
                    storage: spirv::StorageClass::StorageBuffer,
                    dependencies: Vec::new(),
                }),
            )
            .unwrap();
        let before = store.handle(3).unwrap();
        store.promote(3, expr(3)).unwrap();
        assert_eq!(store.kind(3), NodeKind::Expression);
        assert!(!store.is_current(before));
        assert!(store.promote(3, expr(3)).is_err());
    }

    #[test]
    fn reset_invalidates_handles() {
        let mut store = IdStore::new(4);
        store
            .set(1, Node::Type(SpirType::scalar(1, BaseType::Int, 32)))
            .unwrap();
        store.set(2, Node::Expression(expr(2))).unwrap();
        let ty = store.handle(1).unwrap();
        let ex = store.handle(2).unwrap();
        assert_eq!(store.reset_expressions(), 1);
        assert!(store.is_current(ty));
        assert!(!store.is_current(ex));
        assert_eq!(store.kind(2), NodeKind::None);
        // The cleared slot can be written again.
        store.set(2, Node::Expression(expr(2))).unwrap();
    }

    #[test]
    fn typed_getters_report_kind() {
        let mut store = IdStore::new(4);
        store
            .set(1, Node::Type(SpirType::scalar(1, BaseType::Int, 32)))
            .unwrap();
        assert!(store.get_type(1).is_ok());
        let err = store.get_constant(1).unwrap_err();
        assert!(err.to_string().contains("is a type"), "got {err}");
        assert!(store.get_block(3).unwrap_err().to_string().contains("undefined"));
    }

    #[test]
    fn huge_bound_allocates_only_written_slots() {
        let mut store = IdStore::new(u32::MAX);
        assert_eq!(store.bound(), u32::MAX);
        assert_eq!(store.kind(1_000_000), NodeKind::None);
        store.set(3, Node::Expression(expr(3))).unwrap();
        assert_eq!(store.slots.len(), 4);
        assert!(store.handle(u32::MAX).is_none());
    }

    #[test]
    fn increase_bound_hands_out_fresh_ids() {
        let mut store = IdStore::new(4);
        let first = store.increase_bound(2);
        assert_eq!(first, 4);
        assert_eq!(store.bound(), 6);
        store.set(5, Node::Expression(expr(5))).unwrap();
    }
}
