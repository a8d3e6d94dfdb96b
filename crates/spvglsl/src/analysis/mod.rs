//! Module-wide analyses that run once per compilation, before any source is
//! emitted.
//!
//! ```text
//! ParsedIr ──► call order ──► per function ──► scope analysis (annotates IR)
//!     │
//!     └──► from the entry point ──► interface variables
//!                                ──► active builtins
//!                                ──► combined samplers (optional)
//! ```
//!
//! Everything here is derived from the IR alone. Emission retries never
//! rerun these passes.

mod samplers;
mod scope;
mod usage;
mod visitor;

pub use samplers::{build_combined_samplers, CombinedSamplerHandler, CombinedSamplers};
pub use scope::{analyze_variable_scope, DeclSite, FunctionScope};
pub use usage::{ActiveBuiltinHandler, ActiveBuiltins, InterfaceVariableHandler, SideEffectHandler};
pub use visitor::{call_order, reachable_blocks, traverse_all_reachable_opcodes, OpcodeHandler};

use crate::error::{Error, Result};
use crate::ir::{Id, ParsedIr};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Results of every analysis, keyed by function where applicable.
#[derive(Debug, Clone, Default)]
pub struct ModuleAnalysis {
    pub entry_point: Id,
    /// Module-scope variables touched by code reachable from the entry point.
    pub interface_variables: BTreeSet<Id>,
    /// Functions without visible side effects (including through callees).
    pub pure_functions: BTreeSet<Id>,
    pub active_builtins: ActiveBuiltins,
    /// Functions reachable from the entry point, callees first.
    pub call_order: Vec<Id>,
    pub scopes: BTreeMap<Id, FunctionScope>,
    pub combined_samplers: CombinedSamplers,
}

impl ModuleAnalysis {
    pub fn scope(&self, function: Id) -> Result<&FunctionScope> {
        self.scopes
            .get(&function)
            .ok_or_else(|| Error::internal(format!("function %{function} was not analyzed")))
    }

    pub fn is_pure(&self, function: Id) -> bool {
        self.pure_functions.contains(&function)
    }
}

/// Run every analysis for the module's default entry point.
pub fn analyze_module(ir: &mut ParsedIr, combine_samplers: bool) -> Result<ModuleAnalysis> {
    let Some(entry_point) = ir.default_entry_point().map(|ep| ep.function) else {
        debug!("module has no entry point, only declarations are emitted");
        return Ok(ModuleAnalysis::default());
    };

    let order = call_order(ir, entry_point)?;

    let mut interface = InterfaceVariableHandler::default();
    traverse_all_reachable_opcodes(ir, entry_point, &mut interface)?;

    let mut builtins = ActiveBuiltinHandler::default();
    traverse_all_reachable_opcodes(ir, entry_point, &mut builtins)?;

    let mut pure_functions = BTreeSet::new();
    for &function in &order {
        let mut side_effects = SideEffectHandler::default();
        traverse_all_reachable_opcodes(ir, function, &mut side_effects)?;
        if side_effects.pure {
            pure_functions.insert(function);
        }
    }

    let combined_samplers = if combine_samplers {
        let mut handler = CombinedSamplerHandler::default();
        traverse_all_reachable_opcodes(ir, entry_point, &mut handler)?;
        build_combined_samplers(ir, handler.pairs)?
    } else {
        CombinedSamplers::default()
    };

    let mut scopes = BTreeMap::new();
    for &function in &order {
        let scope = analyze_variable_scope(ir, function)?;
        scopes.insert(function, scope);
    }

    debug!(
        "analyzed {} functions: {} interface variables, {} pure",
        order.len(),
        interface.variables.len(),
        pure_functions.len()
    );

    Ok(ModuleAnalysis {
        entry_point,
        interface_variables: interface.variables,
        pure_functions,
        active_builtins: builtins.builtins,
        call_order: order,
        scopes,
        combined_samplers,
    })
}
