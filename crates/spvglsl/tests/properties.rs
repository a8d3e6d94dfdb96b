//! Property tests for type derivation, decoding and dominance.

mod common;

use common::{Basics, Module};
use proptest::prelude::*;
use spvglsl::cfg::{Cfg, DominatorBuilder};
use spvglsl::codegen::sanitize;
use spvglsl::ir::{BaseType, SpirType};
use spvglsl::parser::parse_words;
use spvglsl::Compiler;

/// `count` selections in a row: each header branches to two arms that
/// meet again at the next header. Returns the words, the function and the
/// header of every diamond plus the final block.
fn diamond_chain(count: usize) -> (Vec<u32>, u32, Vec<u32>) {
    let mut m = Module::new();
    let t = Basics::declare(&mut m);
    let boolean = m.type_bool();
    let yes = m.constant_true(boolean);

    let main = m.function(t.void, t.main_fn);
    let mut headers = vec![m.label()];
    for _ in 0..count {
        let (left, right, merge) = (m.id(), m.id(), m.id());
        m.selection_merge(merge);
        m.branch_conditional(yes, left, right);
        for arm in [left, right] {
            m.label_at(arm);
            m.branch(merge);
        }
        m.label_at(merge);
        headers.push(merge);
    }
    m.ret();
    m.function_end();
    m.entry_point(spirv::ExecutionModel::GLCompute, main, "main", &[]);
    m.execution_mode(main, spirv::ExecutionMode::LocalSize, &[1, 1, 1]);
    (m.words(), main, headers)
}

proptest! {
    #[test]
    fn derived_types_point_at_their_parent(
        base in prop_oneof![Just(BaseType::Float), Just(BaseType::Int), Just(BaseType::UInt)],
        vecsize in 1u32..=4,
        columns in 1u32..=4,
        dims in prop::collection::vec((0u32..16, any::<bool>()), 0..4),
    ) {
        let scalar = SpirType::scalar(1, base, 32);
        let mut vector = scalar.derive(2);
        vector.vecsize = vecsize;
        let mut ty = vector.derive(3);
        ty.columns = columns;
        prop_assert_eq!(ty.parent_type, 2);

        let mut next_id = 4;
        for &(size, literal) in &dims {
            let parent = ty.self_id;
            ty = ty.derive(next_id);
            ty.push_array_dimension(size, literal);
            prop_assert_eq!(ty.parent_type, parent);
            prop_assert_eq!(ty.type_alias, 0);
            next_id += 1;
        }
        let sizes: Vec<u32> = dims.iter().map(|&(size, _)| size).collect();
        prop_assert_eq!(&ty.array, &sizes);
        prop_assert_eq!(ty.array_size_literal.len(), dims.len());
        prop_assert_eq!(ty.is_array(), !dims.is_empty());
        prop_assert_eq!(ty.basetype, base);
        prop_assert_eq!(ty.vecsize, vecsize);
        prop_assert_eq!(ty.columns, columns);
        let runtime = matches!(dims.last(), Some((0, true)));
        prop_assert_eq!(ty.is_runtime_array(), runtime);
    }

    #[test]
    fn decoding_arbitrary_words_never_panics(
        body in prop::collection::vec(any::<u32>(), 0..64),
    ) {
        let mut words = vec![spirv::MAGIC_NUMBER, 0x0001_0000, 0, 100, 0];
        words.extend(body);
        if let Ok(module) = parse_words(&words) {
            let mut end = 5;
            for inst in &module.instructions {
                prop_assert_eq!(inst.offset, end);
                prop_assert!(inst.word_count > 0);
                end += inst.word_count as usize;
            }
            prop_assert_eq!(end, words.len());
        }
    }

    #[test]
    fn compiling_arbitrary_words_never_panics(
        body in prop::collection::vec(any::<u32>(), 0..64),
    ) {
        let mut words = vec![spirv::MAGIC_NUMBER, 0x0001_0000, 0, 100, 0];
        words.extend(body);
        let _ = Compiler::new(&words).and_then(|compiler| compiler.compile());
    }

    #[test]
    fn truncated_modules_are_malformed(len in 0usize..5) {
        let words = vec![spirv::MAGIC_NUMBER; len];
        let err = parse_words(&words).unwrap_err();
        prop_assert!(err.is_malformed());
    }

    #[test]
    fn selection_merges_are_dominated_by_their_header(count in 1usize..6) {
        let (words, main, headers) = diamond_chain(count);
        let compiler = Compiler::new(&words).unwrap();
        let cfg = Cfg::new(compiler.ir(), main).unwrap();
        let entry = headers[0];
        prop_assert_eq!(cfg.entry(), entry);
        for pair in headers.windows(2) {
            prop_assert_eq!(cfg.immediate_dominator(pair[1]), Some(pair[0]));
            prop_assert!(cfg.dominates(entry, pair[1]));
            prop_assert!(!cfg.dominates(pair[1], pair[0]));
            let arms = cfg.successors(pair[0]).to_vec();
            prop_assert_eq!(arms.len(), 2);
            prop_assert_eq!(cfg.find_common_dominator(arms[0], arms[1]), pair[0]);
        }
    }

    #[test]
    fn dominator_of_a_single_block_is_itself(count in 1usize..6, repeat in 1usize..4) {
        let (words, main, headers) = diamond_chain(count);
        let compiler = Compiler::new(&words).unwrap();
        let cfg = Cfg::new(compiler.ir(), main).unwrap();
        for &block in cfg.post_order() {
            let mut builder = DominatorBuilder::new(&cfg);
            builder.add_block(block);
            prop_assert_eq!(builder.get_dominator(), Some(block));
        }
        let mut builder = DominatorBuilder::new(&cfg);
        for _ in 0..repeat {
            builder.add_block(headers[0]);
        }
        prop_assert_eq!(builder.get_dominator(), Some(headers[0]));
    }

    #[test]
    fn sanitized_names_are_valid_identifiers(raw in "\\PC{0,24}") {
        let name = sanitize(&raw);
        prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'), "{}", name);
        prop_assert!(!name.contains("__"), "{}", name);
        prop_assert!(!name.starts_with(|c: char| c.is_ascii_digit()), "{}", name);
        prop_assert!(!name.starts_with("gl_"), "{}", name);
    }
}
