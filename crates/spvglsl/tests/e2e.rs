//! End-to-end decompilation of small hand-assembled modules.

mod common;

use anyhow::Result;
use common::{Basics, Module};
use spirv::{Decoration, ExecutionMode, ExecutionModel, Op, StorageClass};
use spvglsl::codegen::LoopShape;
use spvglsl::{compile, compile_bytes, Compiler, CompilerOptions};

fn position(source: &str, needle: &str) -> usize {
    source
        .find(needle)
        .unwrap_or_else(|| panic!("{needle:?} not found in:\n{source}"))
}

/// Compute shader that reads `b.data[0]`, writes `a.data[0]`, then stores
/// the value it read into `a.data[1]`. Both buffers may alias.
fn aliasing_buffers() -> Module {
    let mut m = Module::new();
    let t = Basics::declare(&mut m);
    let zero = m.constant(t.int, 0);
    let one = m.constant(t.int, 1);
    let one_f = m.constant_f32(t.float, 1.0);

    let data = m.type_runtime_array(t.float);
    m.decorate(data, Decoration::ArrayStride, &[4]);
    let buffer = |m: &mut Module, block: &str, instance: &str, binding: u32| {
        let ty = m.type_struct(&[data]);
        m.name(ty, block);
        m.member_name(ty, 0, "data");
        m.decorate(ty, Decoration::BufferBlock, &[]);
        m.member_decorate(ty, 0, Decoration::Offset, &[0]);
        let ptr = m.type_pointer(StorageClass::Uniform, ty);
        let var = m.variable(ptr, StorageClass::Uniform);
        m.name(var, instance);
        m.decorate(var, Decoration::DescriptorSet, &[0]);
        m.decorate(var, Decoration::Binding, &[binding]);
        var
    };
    let a = buffer(&mut m, "BufA", "a", 0);
    let b = buffer(&mut m, "BufB", "b", 1);
    let float_ptr = m.type_pointer(StorageClass::Uniform, t.float);

    let main = m.function(t.void, t.main_fn);
    m.label();
    let pb = m.access_chain(float_ptr, b, &[zero, zero]);
    let value = m.load(t.float, pb);
    let pa = m.access_chain(float_ptr, a, &[zero, zero]);
    m.store(pa, one_f);
    let pa1 = m.access_chain(float_ptr, a, &[zero, one]);
    m.store(pa1, value);
    m.ret();
    m.function_end();

    m.entry_point(ExecutionModel::GLCompute, main, "main", &[]);
    m.execution_mode(main, ExecutionMode::LocalSize, &[1, 1, 1]);
    m
}

/// Compute shader with `int i = 0; while (i < 10) i = i + 1;`.
fn counting_loop() -> Module {
    let mut m = Module::new();
    let t = Basics::declare(&mut m);
    let boolean = m.type_bool();
    let int_ptr = m.type_pointer(StorageClass::Function, t.int);
    let zero = m.constant(t.int, 0);
    let one = m.constant(t.int, 1);
    let ten = m.constant(t.int, 10);

    let main = m.function(t.void, t.main_fn);
    m.label();
    let i = m.local(int_ptr);
    m.name(i, "i");
    let (header, body, cont, merge) = (m.id(), m.id(), m.id(), m.id());
    m.store(i, zero);
    m.branch(header);

    m.label_at(header);
    let current = m.load(t.int, i);
    let condition = m.typed(Op::SLessThan, boolean, &[current, ten]);
    m.loop_merge(merge, cont);
    m.branch_conditional(condition, body, merge);

    m.label_at(body);
    let before = m.load(t.int, i);
    let after = m.typed(Op::IAdd, t.int, &[before, one]);
    m.store(i, after);
    m.branch(cont);

    m.label_at(cont);
    m.branch(header);

    m.label_at(merge);
    m.ret();
    m.function_end();

    m.entry_point(ExecutionModel::GLCompute, main, "main", &[]);
    m.execution_mode(main, ExecutionMode::LocalSize, &[1, 1, 1]);
    m
}

/// The loop shapes front ends emit for a counter `i` running from 0 to 10.
#[derive(Debug, Clone, Copy)]
enum Counter {
    /// Empty header branching to a child block that tests `i < 10`; the
    /// body steps `i`.
    TestInChild,
    /// Like `TestInChild`, but the continue block steps `i`.
    StepInContinue,
    /// The body steps `i` and the continue block branches back while
    /// `i < 10`.
    TestInContinue,
}

fn counter_loop(shape: Counter) -> Module {
    let mut m = Module::new();
    let t = Basics::declare(&mut m);
    let boolean = m.type_bool();
    let int_ptr = m.type_pointer(StorageClass::Function, t.int);
    let zero = m.constant(t.int, 0);
    let one = m.constant(t.int, 1);
    let ten = m.constant(t.int, 10);

    let main = m.function(t.void, t.main_fn);
    m.label();
    let i = m.local(int_ptr);
    m.name(i, "i");
    let (header, body, cont, merge) = (m.id(), m.id(), m.id(), m.id());
    let step = |m: &mut Module| {
        let before = m.load(t.int, i);
        let after = m.typed(Op::IAdd, t.int, &[before, one]);
        m.store(i, after);
    };
    let test = |m: &mut Module| {
        let current = m.load(t.int, i);
        m.typed(Op::SLessThan, boolean, &[current, ten])
    };
    m.store(i, zero);
    m.branch(header);

    m.label_at(header);
    m.loop_merge(merge, cont);
    match shape {
        Counter::TestInChild | Counter::StepInContinue => {
            let check = m.id();
            m.branch(check);
            m.label_at(check);
            let condition = test(&mut m);
            m.branch_conditional(condition, body, merge);
        }
        Counter::TestInContinue => m.branch(body),
    }

    m.label_at(body);
    if matches!(shape, Counter::TestInChild | Counter::TestInContinue) {
        step(&mut m);
    }
    m.branch(cont);

    m.label_at(cont);
    match shape {
        Counter::TestInChild => m.branch(header),
        Counter::StepInContinue => {
            step(&mut m);
            m.branch(header);
        }
        Counter::TestInContinue => {
            let condition = test(&mut m);
            m.branch_conditional(condition, header, merge);
        }
    }

    m.label_at(merge);
    m.ret();
    m.function_end();

    m.entry_point(ExecutionModel::GLCompute, main, "main", &[]);
    m.execution_mode(main, ExecutionMode::LocalSize, &[1, 1, 1]);
    m
}

/// Vertex shader indexing a function-local table filled by one store.
fn lookup_table() -> Module {
    let mut m = Module::new();
    let t = Basics::declare(&mut m);
    let four = m.constant(t.int, 4);
    let table_ty = m.type_array(t.float, four);
    let elements: Vec<u32> = [1.0, 2.0, 3.0, 4.0]
        .into_iter()
        .map(|v| m.constant_f32(t.float, v))
        .collect();
    let table = m.constant_composite(table_ty, &elements);
    let table_ptr = m.type_pointer(StorageClass::Function, table_ty);
    let element_ptr = m.type_pointer(StorageClass::Function, t.float);

    let in_int = m.type_pointer(StorageClass::Input, t.int);
    let idx = m.variable(in_int, StorageClass::Input);
    m.name(idx, "idx");
    m.decorate(idx, Decoration::Location, &[0]);
    let out_float = m.type_pointer(StorageClass::Output, t.float);
    let out = m.variable(out_float, StorageClass::Output);
    m.name(out, "value");
    m.decorate(out, Decoration::Location, &[0]);

    let main = m.function(t.void, t.main_fn);
    m.label();
    let lut = m.local(table_ptr);
    m.name(lut, "lut");
    m.store(lut, table);
    let index = m.load(t.int, idx);
    let element = m.access_chain(element_ptr, lut, &[index]);
    let loaded = m.load(t.float, element);
    m.store(out, loaded);
    m.ret();
    m.function_end();

    m.entry_point(ExecutionModel::Vertex, main, "main", &[idx, out]);
    m
}

/// Vertex shader that fills the table in its entry block and reads it there,
/// inside an `if` and after the merge.
fn table_read_in_three_blocks() -> Module {
    let mut m = Module::new();
    let t = Basics::declare(&mut m);
    let boolean = m.type_bool();
    let yes = m.constant_true(boolean);
    let four = m.constant(t.int, 4);
    let table_ty = m.type_array(t.float, four);
    let elements: Vec<u32> = [0.5, 1.5, 2.5, 3.5]
        .into_iter()
        .map(|v| m.constant_f32(t.float, v))
        .collect();
    let table = m.constant_composite(table_ty, &elements);
    let table_ptr = m.type_pointer(StorageClass::Function, table_ty);
    let element_ptr = m.type_pointer(StorageClass::Function, t.float);

    let in_int = m.type_pointer(StorageClass::Input, t.int);
    let idx = m.variable(in_int, StorageClass::Input);
    m.name(idx, "idx");
    m.decorate(idx, Decoration::Location, &[0]);
    let out_float = m.type_pointer(StorageClass::Output, t.float);
    let out = m.variable(out_float, StorageClass::Output);
    m.name(out, "value");
    m.decorate(out, Decoration::Location, &[0]);

    let main = m.function(t.void, t.main_fn);
    m.label();
    let lut = m.local(table_ptr);
    m.name(lut, "lut");
    let (then, merge) = (m.id(), m.id());
    m.store(lut, table);
    let read_into_output = |m: &mut Module| {
        let index = m.load(t.int, idx);
        let element = m.access_chain(element_ptr, lut, &[index]);
        let loaded = m.load(t.float, element);
        m.store(out, loaded);
    };
    read_into_output(&mut m);
    m.selection_merge(merge);
    m.branch_conditional(yes, then, merge);

    m.label_at(then);
    read_into_output(&mut m);
    m.branch(merge);

    m.label_at(merge);
    read_into_output(&mut m);
    m.ret();
    m.function_end();

    m.entry_point(ExecutionModel::Vertex, main, "main", &[idx, out]);
    m
}

/// Fragment shader whose two private variables use identical `S` structs.
fn duplicate_structs() -> Module {
    let mut m = Module::new();
    let t = Basics::declare(&mut m);
    let zero = m.constant(t.int, 0);
    let (first_ty, second_ty) = (m.id(), m.id());
    for ty in [first_ty, second_ty] {
        m.name(ty, "S");
        m.member_name(ty, 0, "x");
        m.type_struct_at(ty, &[t.float]);
    }
    let first_ptr = m.type_pointer(StorageClass::Private, first_ty);
    let second_ptr = m.type_pointer(StorageClass::Private, second_ty);
    let member_ptr = m.type_pointer(StorageClass::Private, t.float);
    let first = m.variable(first_ptr, StorageClass::Private);
    m.name(first, "first");
    let second = m.variable(second_ptr, StorageClass::Private);
    m.name(second, "second");
    let out_float = m.type_pointer(StorageClass::Output, t.float);
    let out = m.variable(out_float, StorageClass::Output);
    m.name(out, "result");
    m.decorate(out, Decoration::Location, &[0]);

    let main = m.function(t.void, t.main_fn);
    m.label();
    let p1 = m.access_chain(member_ptr, first, &[zero]);
    let x1 = m.load(t.float, p1);
    let p2 = m.access_chain(member_ptr, second, &[zero]);
    let x2 = m.load(t.float, p2);
    let sum = m.typed(Op::FAdd, t.float, &[x1, x2]);
    m.store(out, sum);
    m.ret();
    m.function_end();

    m.entry_point(ExecutionModel::Fragment, main, "main", &[out]);
    m.execution_mode(main, ExecutionMode::OriginUpperLeft, &[]);
    m
}

#[test]
fn header_only_module_compiles_to_declarations() -> Result<()> {
    let words = [spirv::MAGIC_NUMBER, 0x0001_0000, 0, 20, 0];
    let shader = compile(&words, &CompilerOptions::default())?;
    assert!(shader.source.starts_with("#version 450"), "{}", shader.source);
    assert!(!shader.source.contains("void main"));
    assert!(shader.entry_point.is_none());
    assert!(shader.resources.is_empty());
    Ok(())
}

#[test]
fn bad_magic_is_malformed() {
    let words = [0xDEAD_BEEF, 0x0001_0000, 0, 20, 0];
    let err = compile(&words, &CompilerOptions::default()).unwrap_err();
    assert!(err.is_malformed(), "{err}");
}

#[test]
fn big_endian_words_are_accepted() -> Result<()> {
    let words: Vec<u32> = counting_loop().words().iter().map(|w| w.swap_bytes()).collect();
    let swapped = compile(&words, &CompilerOptions::default())?;
    let native = compile_bytes(&counting_loop().bytes(), &CompilerOptions::default())?;
    assert_eq!(swapped.source, native.source);
    Ok(())
}

#[test]
fn single_store_table_becomes_a_constant() -> Result<()> {
    let shader = compile(&lookup_table().words(), &CompilerOptions::default())?;
    let source = &shader.source;
    assert!(
        source.contains("const float lut[4] = float[4](1.0, 2.0, 3.0, 4.0);"),
        "{source}"
    );
    assert_eq!(source.matches("float lut[4]").count(), 1, "{source}");
    assert!(!source.contains("lut = "), "{source}");
    assert!(source.contains("lut[idx]"), "{source}");
    Ok(())
}

#[test]
fn table_read_in_several_blocks_is_declared_once() -> Result<()> {
    let shader = compile(&table_read_in_three_blocks().words(), &CompilerOptions::default())?;
    let source = &shader.source;
    assert_eq!(source.matches("float lut[4]").count(), 1, "{source}");
    assert!(source.contains("const float lut[4] = "), "{source}");
    assert_eq!(source.matches("value = lut[idx];").count(), 3, "{source}");
    Ok(())
}

#[test]
fn header_test_loop_is_a_while() -> Result<()> {
    let shader = compile(&counting_loop().words(), &CompilerOptions::default())?;
    let shapes: Vec<LoopShape> = shader.loop_shapes.values().copied().collect();
    assert_eq!(shapes, vec![LoopShape::While], "{}", shader.source);
    assert!(shader.source.contains("while (i < 10)"), "{}", shader.source);
    assert!(!shader.source.contains("for (;;)"));
    Ok(())
}

#[test]
fn test_in_child_block_folds_into_a_while() -> Result<()> {
    let shader = compile(&counter_loop(Counter::TestInChild).words(), &CompilerOptions::default())?;
    let source = &shader.source;
    let shapes: Vec<LoopShape> = shader.loop_shapes.values().copied().collect();
    assert_eq!(shapes, vec![LoopShape::While], "{source}");
    assert!(source.contains("while (i < 10)"), "{source}");
    assert!(source.contains("i = i + 1;"), "{source}");
    assert!(position(source, "int i = 0;") < position(source, "while"));
    Ok(())
}

#[test]
fn step_in_continue_block_becomes_a_for_loop() -> Result<()> {
    let shader = compile(
        &counter_loop(Counter::StepInContinue).words(),
        &CompilerOptions::default(),
    )?;
    let source = &shader.source;
    let shapes: Vec<LoopShape> = shader.loop_shapes.values().copied().collect();
    assert_eq!(shapes, vec![LoopShape::For], "{source}");
    assert!(source.contains("for (int i = 0; i < 10; i = i + 1)"), "{source}");
    assert_eq!(source.matches("int i").count(), 1, "{source}");
    Ok(())
}

#[test]
fn test_in_continue_block_becomes_a_do_while() -> Result<()> {
    let shader = compile(
        &counter_loop(Counter::TestInContinue).words(),
        &CompilerOptions::default(),
    )?;
    let source = &shader.source;
    let shapes: Vec<LoopShape> = shader.loop_shapes.values().copied().collect();
    assert_eq!(shapes, vec![LoopShape::DoWhile], "{source}");
    assert!(source.contains("int i = 0;"), "{source}");
    assert!(position(source, "do") < position(source, "i = i + 1;"));
    assert!(source.contains("} while (i < 10);"), "{source}");
    Ok(())
}

#[test]
fn local_takes_its_first_store_as_initializer() -> Result<()> {
    let shader = compile(&counting_loop().words(), &CompilerOptions::default())?;
    let source = &shader.source;
    assert!(source.contains("int i = 0;"), "{source}");
    assert!(!source.contains("int i;"), "{source}");
    Ok(())
}

#[test]
fn compiling_twice_gives_the_same_output() -> Result<()> {
    let compiler = Compiler::new(&counting_loop().words())?;
    let first = compiler.compile()?;
    let second = compiler.compile()?;
    assert_eq!(first.source, second.source);
    assert_eq!(first.loop_shapes, second.loop_shapes);
    Ok(())
}

#[test]
fn forced_temporaries_disable_loop_folding() -> Result<()> {
    let options = CompilerOptions {
        force_temporary: true,
        ..CompilerOptions::default()
    };
    let shader = compile(&counting_loop().words(), &options)?;
    let shapes: Vec<LoopShape> = shader.loop_shapes.values().copied().collect();
    assert_eq!(shapes, vec![LoopShape::Complex], "{}", shader.source);
    assert!(shader.source.contains("for (;;)"), "{}", shader.source);
    Ok(())
}

#[test]
fn read_is_materialized_before_aliasing_store() -> Result<()> {
    let shader = compile(&aliasing_buffers().words(), &CompilerOptions::default())?;
    let source = &shader.source;
    assert!(position(source, "b.data[0]") < position(source, "a.data[0] = 1.0;"));
    assert!(!source.contains("a.data[1] = b.data[0];"), "{source}");
    assert!(source.contains("buffer BufA"), "{source}");
    Ok(())
}

#[test]
fn duplicate_struct_is_declared_once() -> Result<()> {
    let shader = compile(&duplicate_structs().words(), &CompilerOptions::default())?;
    let source = &shader.source;
    assert_eq!(source.matches("struct S").count(), 1, "{source}");
    assert!(source.contains("S first;"), "{source}");
    assert!(source.contains("S second;"), "{source}");
    Ok(())
}

#[test]
fn reflection_lists_used_resources() -> Result<()> {
    let shader = compile(&aliasing_buffers().words(), &CompilerOptions::default())?;
    let names: Vec<&str> = shader
        .resources
        .storage_buffers
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(names, ["a", "b"]);
    assert!(shader.resources.uniform_buffers.is_empty());

    let shader = compile(&lookup_table().words(), &CompilerOptions::default())?;
    assert_eq!(shader.resources.stage_inputs.len(), 1);
    assert_eq!(shader.resources.stage_inputs[0].name, "idx");
    assert_eq!(shader.resources.stage_outputs[0].name, "value");
    assert_eq!(shader.stage, Some(ExecutionModel::Vertex));
    assert_eq!(shader.entry_point.as_deref(), Some("main"));
    Ok(())
}

#[test]
fn es_output_declares_precision() -> Result<()> {
    let options = CompilerOptions {
        version: 310,
        es: true,
        ..CompilerOptions::default()
    };
    let shader = compile(&duplicate_structs().words(), &options)?;
    assert!(shader.source.starts_with("#version 310 es"), "{}", shader.source);
    assert!(shader.source.contains("precision highp float;"));
    Ok(())
}

/// Assignments to the given globals, by left-hand side, in source order.
fn global_writes(source: &str, globals: &[&str]) -> Vec<String> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| line.ends_with(';'))
        .filter_map(|line| line.split_once(" = ").map(|(lhs, _)| lhs))
        .filter(|lhs| {
            let root = lhs.split(['.', '[']).next().unwrap_or_default();
            globals.contains(&root)
        })
        .map(str::to_string)
        .collect()
}

#[test]
fn forced_temporaries_keep_every_observable_write() -> Result<()> {
    let fixtures: [(&str, Module, &[&str]); 8] = [
        ("aliasing", aliasing_buffers(), &["a", "b"]),
        ("counting", counting_loop(), &[]),
        ("lut", lookup_table(), &["value"]),
        ("lut in blocks", table_read_in_three_blocks(), &["value"]),
        ("structs", duplicate_structs(), &["result", "first", "second"]),
        ("child test", counter_loop(Counter::TestInChild), &[]),
        ("continue step", counter_loop(Counter::StepInContinue), &[]),
        ("continue test", counter_loop(Counter::TestInContinue), &[]),
    ];
    let forced = CompilerOptions {
        force_temporary: true,
        ..CompilerOptions::default()
    };
    for (label, module, globals) in fixtures {
        let words = module.words();
        let inlined = compile(&words, &CompilerOptions::default())?;
        let named = compile(&words, &forced)?;
        assert_eq!(
            global_writes(&inlined.source, globals),
            global_writes(&named.source, globals),
            "{label}:\n{}\n---\n{}",
            inlined.source,
            named.source
        );
        assert_eq!(inlined.resources, named.resources, "{label}");
    }
    let writes = global_writes(&compile(&aliasing_buffers().words(), &forced)?.source, &["a"]);
    assert_eq!(writes, ["a.data[0]", "a.data[1]"]);
    Ok(())
}

#[test]
fn oversized_id_bound_is_an_error() {
    let words = [spirv::MAGIC_NUMBER, 0x0001_0000, 0, u32::MAX, 0];
    let err = compile(&words, &CompilerOptions::default()).unwrap_err();
    assert!(err.is_malformed(), "{err}");
}

#[test]
fn oversized_matrix_is_an_error() {
    let mut m = Module::new();
    let t = Basics::declare(&mut m);
    let column = m.type_vector(t.float, 4);
    m.type_matrix(column, 0x10000);
    let err = compile(&m.words(), &CompilerOptions::default()).unwrap_err();
    assert!(err.is_invalid(), "{err}");
}
