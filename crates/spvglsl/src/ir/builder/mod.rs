//! # IR Builder
//!
//! Translates a `ParsedModule` (decoded SPIR-V words) into a `ParsedIr`.
//!
//! ## Pipeline overview
//!
//! ```text
//! ParsedModule
//!      │
//!      └─[translate]──────────────────────────────────────────┐
//!         for each Instruction:                               │
//!           translate_instruction()                           │
//!             ├── mode setting   ─► capabilities, entry points│
//!             ├── debug/annotate ─► MetaTable                 │
//!             ├── types          ─► SpirType (derive + dedup) │
//!             ├── constants      ─► SpirConstant (folded)     │
//!             ├── functions      ─► SpirFunction / SpirBlock  │
//!             └── body opcodes   ─► SpirBlock::ops            │
//!                                                             │
//! ◄───────────────────────────[assembly]──────────────────────┘
//!   finish()
//!     ├── resolve_struct_aliases()
//!     └── validate_functions()
//!          ─► ParsedIr  ──► cfg / analysis / codegen
//! ```
//!
//! | Module        | Responsibility                                         |
//! |---------------|--------------------------------------------------------|
//! | [`core`]      | `IrBuilder` state, function/block cursor               |
//! | [`translate`] | Opcode → ID store dispatch                             |
//! | [`assembly`]  | Post-pass fixups and structural validation             |
//!
//! Decoding is all-or-nothing: any operand-count violation, unresolvable ID
//! or disallowed capability aborts the build with `InvalidModule`.

mod assembly;
mod core;
mod translate;

use super::ParsedIr;
use crate::error::Result;
use crate::parser::ParsedModule;
use log::debug;

pub use self::core::IrBuilder;

/// Build the IR for a decoded module.
pub fn build_ir(module: ParsedModule) -> Result<ParsedIr> {
    let ParsedModule {
        header,
        words,
        instructions,
    } = module;

    let mut builder = IrBuilder::new(header);
    for inst in &instructions {
        let operands = &words[inst.operand_range()];
        builder
            .translate_instruction(inst, operands)
            .map_err(|e| e.at_offset(inst.offset))?;
    }

    let ir = builder.finish(words)?;
    debug!(
        "built IR: {} functions, {} global variables, {} entry points",
        ir.function_order.len(),
        ir.global_variables.len(),
        ir.entry_points.len()
    );
    Ok(ir)
}
