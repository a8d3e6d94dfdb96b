//! A small SPIR-V assembler for building test modules in code.
//!
//! Instructions are collected per logical section and concatenated in the
//! order the format requires, so tests can declare things in whatever
//! order reads best.

#![allow(dead_code)]

use spirv::{
    AddressingModel, Capability, Decoration, ExecutionMode, ExecutionModel, MemoryModel, Op,
    StorageClass,
};

pub type Id = u32;

/// Encode a NUL-terminated string into words.
pub fn string_words(text: &str) -> Vec<u32> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn encode(op: Op, operands: &[u32]) -> Vec<u32> {
    let count = operands.len() as u32 + 1;
    let mut words = Vec::with_capacity(count as usize);
    words.push((count << 16) | op as u32);
    words.extend_from_slice(operands);
    words
}

#[derive(Debug, Default)]
pub struct Module {
    next_id: Id,
    capabilities: Vec<u32>,
    ext_imports: Vec<u32>,
    memory_model: Vec<u32>,
    entry_points: Vec<u32>,
    execution_modes: Vec<u32>,
    debug: Vec<u32>,
    annotations: Vec<u32>,
    globals: Vec<u32>,
    functions: Vec<u32>,
}

impl Module {
    /// A logical GLSL450 shader module.
    pub fn new() -> Self {
        let mut module = Self {
            next_id: 1,
            ..Self::default()
        };
        module.capability(Capability::Shader);
        module.memory_model = encode(
            Op::MemoryModel,
            &[AddressingModel::Logical as u32, MemoryModel::GLSL450 as u32],
        );
        module
    }

    pub fn id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The finished module, header included.
    pub fn words(&self) -> Vec<u32> {
        let mut words = vec![spirv::MAGIC_NUMBER, 0x0001_0000, 0, self.next_id, 0];
        for section in [
            &self.capabilities,
            &self.ext_imports,
            &self.memory_model,
            &self.entry_points,
            &self.execution_modes,
            &self.debug,
            &self.annotations,
            &self.globals,
            &self.functions,
        ] {
            words.extend_from_slice(section);
        }
        words
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.words().iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    // ── Mode setting and debug ──────────────────────────────────────────

    pub fn capability(&mut self, capability: Capability) {
        self.capabilities
            .extend(encode(Op::Capability, &[capability as u32]));
    }

    pub fn import_glsl(&mut self) -> Id {
        let id = self.id();
        let mut operands = vec![id];
        operands.extend(string_words("GLSL.std.450"));
        self.ext_imports.extend(encode(Op::ExtInstImport, &operands));
        id
    }

    pub fn entry_point(&mut self, model: ExecutionModel, function: Id, name: &str, interface: &[Id]) {
        let mut operands = vec![model as u32, function];
        operands.extend(string_words(name));
        operands.extend_from_slice(interface);
        self.entry_points.extend(encode(Op::EntryPoint, &operands));
    }

    pub fn execution_mode(&mut self, function: Id, mode: ExecutionMode, args: &[u32]) {
        let mut operands = vec![function, mode as u32];
        operands.extend_from_slice(args);
        self.execution_modes
            .extend(encode(Op::ExecutionMode, &operands));
    }

    pub fn name(&mut self, id: Id, name: &str) {
        let mut operands = vec![id];
        operands.extend(string_words(name));
        self.debug.extend(encode(Op::Name, &operands));
    }

    pub fn member_name(&mut self, id: Id, member: u32, name: &str) {
        let mut operands = vec![id, member];
        operands.extend(string_words(name));
        self.debug.extend(encode(Op::MemberName, &operands));
    }

    pub fn decorate(&mut self, id: Id, decoration: Decoration, args: &[u32]) {
        let mut operands = vec![id, decoration as u32];
        operands.extend_from_slice(args);
        self.annotations.extend(encode(Op::Decorate, &operands));
    }

    pub fn member_decorate(&mut self, id: Id, member: u32, decoration: Decoration, args: &[u32]) {
        let mut operands = vec![id, member, decoration as u32];
        operands.extend_from_slice(args);
        self.annotations
            .extend(encode(Op::MemberDecorate, &operands));
    }

    // ── Types, constants, globals ───────────────────────────────────────

    /// A module-scope instruction whose first operand is its result ID.
    fn declare(&mut self, op: Op, operands: &[u32]) -> Id {
        let id = self.id();
        let mut all = vec![id];
        all.extend_from_slice(operands);
        self.globals.extend(encode(op, &all));
        id
    }

    /// A module-scope instruction with a result type and result ID.
    fn declare_typed(&mut self, op: Op, ty: Id, operands: &[u32]) -> Id {
        let id = self.id();
        let mut all = vec![ty, id];
        all.extend_from_slice(operands);
        self.globals.extend(encode(op, &all));
        id
    }

    pub fn type_void(&mut self) -> Id {
        self.declare(Op::TypeVoid, &[])
    }

    pub fn type_bool(&mut self) -> Id {
        self.declare(Op::TypeBool, &[])
    }

    pub fn type_int(&mut self, width: u32, signed: bool) -> Id {
        self.declare(Op::TypeInt, &[width, signed as u32])
    }

    pub fn type_float(&mut self, width: u32) -> Id {
        self.declare(Op::TypeFloat, &[width])
    }

    pub fn type_vector(&mut self, component: Id, count: u32) -> Id {
        self.declare(Op::TypeVector, &[component, count])
    }

    pub fn type_matrix(&mut self, column: Id, count: u32) -> Id {
        self.declare(Op::TypeMatrix, &[column, count])
    }

    pub fn type_array(&mut self, element: Id, length: Id) -> Id {
        self.declare(Op::TypeArray, &[element, length])
    }

    pub fn type_runtime_array(&mut self, element: Id) -> Id {
        self.declare(Op::TypeRuntimeArray, &[element])
    }

    pub fn type_struct(&mut self, members: &[Id]) -> Id {
        self.declare(Op::TypeStruct, members)
    }

    /// Reserve a struct ID so it can be named before it is declared.
    pub fn type_struct_at(&mut self, id: Id, members: &[Id]) {
        let mut all = vec![id];
        all.extend_from_slice(members);
        self.globals.extend(encode(Op::TypeStruct, &all));
    }

    pub fn type_pointer(&mut self, storage: StorageClass, pointee: Id) -> Id {
        self.declare(Op::TypePointer, &[storage as u32, pointee])
    }

    pub fn type_function(&mut self, result: Id, parameters: &[Id]) -> Id {
        let mut operands = vec![result];
        operands.extend_from_slice(parameters);
        self.declare(Op::TypeFunction, &operands)
    }

    pub fn constant(&mut self, ty: Id, bits: u32) -> Id {
        self.declare_typed(Op::Constant, ty, &[bits])
    }

    pub fn constant_f32(&mut self, ty: Id, value: f32) -> Id {
        self.constant(ty, value.to_bits())
    }

    pub fn constant_composite(&mut self, ty: Id, elements: &[Id]) -> Id {
        self.declare_typed(Op::ConstantComposite, ty, elements)
    }

    pub fn constant_true(&mut self, ty: Id) -> Id {
        self.declare_typed(Op::ConstantTrue, ty, &[])
    }

    pub fn spec_constant(&mut self, ty: Id, bits: u32) -> Id {
        self.declare_typed(Op::SpecConstant, ty, &[bits])
    }

    pub fn variable(&mut self, pointer: Id, storage: StorageClass) -> Id {
        self.declare_typed(Op::Variable, pointer, &[storage as u32])
    }

    // ── Function bodies ─────────────────────────────────────────────────

    pub fn function(&mut self, result: Id, prototype: Id) -> Id {
        let id = self.id();
        self.functions
            .extend(encode(Op::Function, &[result, id, 0, prototype]));
        id
    }

    /// Emit `OpLabel` for an ID allocated earlier.
    pub fn label_at(&mut self, id: Id) {
        self.functions.extend(encode(Op::Label, &[id]));
    }

    pub fn label(&mut self) -> Id {
        let id = self.id();
        self.label_at(id);
        id
    }

    pub fn function_end(&mut self) {
        self.functions.extend(encode(Op::FunctionEnd, &[]));
    }

    /// A function-scope variable; must directly follow the entry label.
    pub fn local(&mut self, pointer: Id) -> Id {
        self.typed(Op::Variable, pointer, &[StorageClass::Function as u32])
    }

    /// A body instruction without a result.
    pub fn op(&mut self, op: Op, operands: &[u32]) {
        self.functions.extend(encode(op, operands));
    }

    /// A body instruction with a result type and result ID.
    pub fn typed(&mut self, op: Op, ty: Id, operands: &[u32]) -> Id {
        let id = self.id();
        let mut all = vec![ty, id];
        all.extend_from_slice(operands);
        self.functions.extend(encode(op, &all));
        id
    }

    pub fn load(&mut self, ty: Id, pointer: Id) -> Id {
        self.typed(Op::Load, ty, &[pointer])
    }

    pub fn store(&mut self, pointer: Id, value: Id) {
        self.op(Op::Store, &[pointer, value]);
    }

    pub fn access_chain(&mut self, pointer_ty: Id, base: Id, indices: &[Id]) -> Id {
        let mut operands = vec![base];
        operands.extend_from_slice(indices);
        self.typed(Op::AccessChain, pointer_ty, &operands)
    }

    pub fn branch(&mut self, target: Id) {
        self.op(Op::Branch, &[target]);
    }

    pub fn branch_conditional(&mut self, condition: Id, t: Id, f: Id) {
        self.op(Op::BranchConditional, &[condition, t, f]);
    }

    pub fn loop_merge(&mut self, merge: Id, continue_block: Id) {
        self.op(Op::LoopMerge, &[merge, continue_block, 0]);
    }

    pub fn selection_merge(&mut self, merge: Id) {
        self.op(Op::SelectionMerge, &[merge, 0]);
    }

    pub fn ret(&mut self) {
        self.op(Op::Return, &[]);
    }
}

/// Types most test shaders start from.
#[derive(Debug, Clone, Copy)]
pub struct Basics {
    pub void: Id,
    pub main_fn: Id,
    pub float: Id,
    pub int: Id,
}

impl Basics {
    pub fn declare(module: &mut Module) -> Self {
        let void = module.type_void();
        let main_fn = module.type_function(void, &[]);
        let float = module.type_float(32);
        let int = module.type_int(32, true);
        Self {
            void,
            main_fn,
            float,
            int,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_nul_terminated_and_padded() {
        assert_eq!(string_words("main"), vec![0x6e69_616d, 0]);
        assert_eq!(string_words("abc").len(), 1);
    }
}
