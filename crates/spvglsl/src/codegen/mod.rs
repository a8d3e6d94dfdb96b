//! Code generation: emits GLSL source from the analyzed IR.
//!
//! # Overview
//!
//! One call to [`emit_module`] is one emission attempt. It walks the module
//! in declaration order and then every reachable function (callees first),
//! synthesizing structured control flow from the block graph and turning
//! each body instruction into either a forwarded expression (inlined at its
//! use sites) or a materialized temporary.
//!
//! ```text
//!   ParsedIr + ModuleAnalysis + CompileState
//!                    │
//!                    ▼
//!            ┌───────────────┐
//!            │  emit_module  │──► header, structs, constants, globals
//!            └───────────────┘
//!                    │  per function
//!                    ▼
//!    ┌──────────────────────────────────┐
//!    │ flow: loops, selections, switch  │
//!    │ expression: one op at a time     │
//!    └──────────────────────────────────┘
//!                    │
//!          ┌─────────┴──────────┐
//!          ▼                    ▼
//!   Outcome::Done(source)   Outcome::Retry(stronger state)
//! ```
//!
//! # Retries
//!
//! Some decisions can only be checked after the fact: a forwarded
//! expression may be read after a store changed its inputs, or a loop
//! header that was folded into a `for` statement may turn out to need a
//! statement of its own. Such findings never surface as errors. They are
//! recorded in a fresh [`CompileState`] (more temporaries pinned, more loop
//! folds disabled, more extensions enabled) and returned as
//! [`Outcome::Retry`]. The state only ever grows, so the driver loop
//! converges.
//!
//! # Sub-modules
//!
//! - **`buffer`**: indented output with rollback marks
//! - **`names`**: identifier sanitizing and uniqueness
//! - **`types`**: type spellings and constant literals
//! - **`declarations`**: version header, structs, resources, globals
//! - **`flow`**: functions, blocks, structured control flow
//! - **`expression`**: value reads, memory, composites, calls
//! - **`operators`**: arithmetic, bitwise, logical and conversion ops
//! - **`image`**: sampling, storage images, atomics, barriers
//! - **`ext_inst`**: `GLSL.std.450` extended instructions

mod buffer;
mod declarations;
mod expression;
mod ext_inst;
mod flow;
mod image;
mod names;
mod operators;
mod types;

pub use buffer::{Mark, SourceBuffer};
pub use names::{sanitize, NameCache};

use crate::analysis::{FunctionScope, ModuleAnalysis};
use crate::backend::{Dialect, Feature, Support};
use crate::error::{Error, Result};
use crate::ir::{EntryPoint, Handle, Id, Node, ParsedIr};
use crate::CompilerOptions;
use flow::Frame;
use log::debug;
use spirv::{BuiltIn, ExecutionModel};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Decisions carried from one emission attempt to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileState {
    /// Results that must be stored in a named temporary.
    pub forced_temporaries: BTreeSet<Id>,
    /// Loop headers that are always emitted as `for (;;)` with explicit
    /// breaks.
    pub disabled_loop_opts: BTreeSet<Id>,
    /// `#extension` directives to emit.
    pub requested_extensions: BTreeSet<String>,
}

/// How a loop was written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopShape {
    /// `for (init; cond; increment)`.
    For,
    /// `while (cond)`.
    While,
    /// `do { ... } while (cond);`.
    DoWhile,
    /// `for (;;)` with explicit `break`s and the continue block inlined.
    Complex,
}

/// Output of a successful attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub source: String,
    /// Shape chosen for every emitted loop, keyed by header block.
    pub loop_shapes: BTreeMap<Id, LoopShape>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done(Emitted),
    /// The attempt found a decision it has to revise. Run again with this
    /// state.
    Retry(CompileState),
}

/// Run one emission attempt.
pub fn emit_module<D: Dialect>(
    ir: &mut ParsedIr,
    analysis: &ModuleAnalysis,
    dialect: &D,
    options: &CompilerOptions,
    state: &CompileState,
) -> Result<Outcome> {
    let minimum = if dialect.es() { 300 } else { 130 };
    if dialect.version() < minimum {
        return Err(Error::unsupported(format!(
            "{} is older than the oldest supported target",
            dialect.version_directive()
        )));
    }

    let cleared = ir.ids.reset_expressions();
    debug!("starting emission attempt, {cleared} expressions cleared");

    let mut generator = CodeGenerator::new(ir, analysis, dialect, options, state)?;
    generator.emit()?;

    let CodeGenerator {
        next,
        retry,
        buf,
        loop_shapes,
        ..
    } = generator;

    if retry {
        if next == *state {
            return Err(Error::internal(
                "emission asked for another attempt without changing any decision",
            ));
        }
        debug!(
            "retrying: {} forced temporaries, {} disabled loop folds, {} extensions",
            next.forced_temporaries.len(),
            next.disabled_loop_opts.len(),
            next.requested_extensions.len()
        );
        return Ok(Outcome::Retry(next));
    }

    Ok(Outcome::Done(Emitted {
        source: buf.into_string(),
        loop_shapes,
    }))
}

// ── Read tracking ───────────────────────────────────────────────────────

/// Bookkeeping for forwarded expressions, keyed by generation-checked
/// handles so that redefinitions start from a clean slate.
#[derive(Debug, Clone, Default)]
struct Tracking {
    /// Variables each forwarded expression reads.
    reads: HashMap<Handle, BTreeSet<Id>>,
    /// Forwarded expressions whose inputs were written after they were
    /// built.
    invalid: HashSet<Handle>,
    uses: HashMap<Handle, u32>,
    /// Loop nesting depth at the definition.
    depth: HashMap<Handle, u32>,
}

/// Whether duplicating `text` at several use sites is as cheap as naming
/// it.
fn is_simple(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
}

// ── Generator ───────────────────────────────────────────────────────────

pub struct CodeGenerator<'a, D: Dialect> {
    ir: &'a mut ParsedIr,
    analysis: &'a ModuleAnalysis,
    dialect: &'a D,
    options: &'a CompilerOptions,
    state: &'a CompileState,
    next: CompileState,
    retry: bool,
    buf: SourceBuffer,
    names: NameCache,
    entry: EntryPoint,

    // Per-function state.
    function: Id,
    frames: Vec<Frame>,
    emitted_blocks: BTreeSet<Id>,
    /// Non-zero while a continue block is being duplicated at a
    /// `continue` site.
    repeating: u32,
    track: Tracking,
    loop_depth: u32,
    /// Captured initial values of loop variables, by variable.
    loop_initializers: HashMap<Id, String>,
    /// Locals of the current block whose declaration waits for a first
    /// store.
    pending_locals: Vec<Id>,
    /// Loaded image/sampler values to the variable they came from.
    opaque_roots: HashMap<Id, Id>,
    /// Pointers into builtin variables, for int/uint fixups.
    chain_builtins: HashMap<Id, BuiltIn>,
    /// `OpImageTexelPointer` results: (image, coordinate).
    texel_pointers: HashMap<Id, (String, String)>,
    /// Loop header whose condition or increment is being folded.
    folding: Option<Id>,
    /// Values defined while folding, to the header they were folded into.
    folded_definitions: HashMap<Id, Id>,
    /// Forwarded reads made while capturing a `for` increment.
    read_log: Option<Vec<Id>>,
    loop_shapes: BTreeMap<Id, LoopShape>,
}

impl<'a, D: Dialect> CodeGenerator<'a, D> {
    fn new(
        ir: &'a mut ParsedIr,
        analysis: &'a ModuleAnalysis,
        dialect: &'a D,
        options: &'a CompilerOptions,
        state: &'a CompileState,
    ) -> Result<Self> {
        let entry = match ir
            .entry_points
            .iter()
            .find(|ep| ep.function == analysis.entry_point)
        {
            Some(entry) => entry.clone(),
            // Declarations-only module.
            None if ir.entry_points.is_empty() => {
                EntryPoint::new(0, String::new(), ExecutionModel::Vertex, Vec::new())
            }
            None => {
                return Err(Error::internal(format!(
                    "entry point %{} was not analyzed",
                    analysis.entry_point
                )))
            }
        };
        Ok(CodeGenerator {
            ir,
            analysis,
            dialect,
            options,
            state,
            next: state.clone(),
            retry: false,
            buf: SourceBuffer::new(),
            names: NameCache::new(),
            entry,
            function: 0,
            frames: Vec::new(),
            emitted_blocks: BTreeSet::new(),
            repeating: 0,
            track: Tracking::default(),
            loop_depth: 0,
            loop_initializers: HashMap::new(),
            pending_locals: Vec::new(),
            opaque_roots: HashMap::new(),
            chain_builtins: HashMap::new(),
            texel_pointers: HashMap::new(),
            folding: None,
            folded_definitions: HashMap::new(),
            read_log: None,
            loop_shapes: BTreeMap::new(),
        })
    }

    fn emit(&mut self) -> Result<()> {
        self.reserve_names()?;
        self.emit_header()?;
        // Array lengths in structs may name specialization constants.
        self.emit_specialization_constants()?;
        self.emit_structs()?;
        self.emit_undefs()?;
        self.emit_globals()?;
        for function in self.analysis.call_order.clone() {
            self.emit_function(function)?;
        }
        Ok(())
    }

    fn scope(&self) -> Result<&'a FunctionScope> {
        self.analysis.scope(self.function)
    }

    /// The identifier of `id`, assigned from its debug name on first use.
    fn name_of(&mut self, id: Id) -> String {
        let dialect = self.dialect;
        self.names
            .assign(id, self.ir.meta.name(id), |s| dialect.is_keyword(s))
    }

    fn type_of(&self, id: Id) -> Result<Id> {
        self.ir
            .type_of(id)
            .ok_or_else(|| Error::invalid(format!("%{id} has no known type")).at_id(id))
    }

    // ── Requests for the next attempt ───────────────────────────────────

    /// Pin `id` to a temporary in the next attempt.
    fn force(&mut self, id: Id) {
        if let Some(Node::AccessChain(chain)) = self.ir.ids.node(id) {
            // Pointers cannot be stored; pin their index operands instead.
            for dependency in chain.dependencies.clone() {
                self.force(dependency);
            }
            return;
        }
        if self.next.forced_temporaries.insert(id) {
            debug!("forcing %{id} into a temporary");
        }
        if let Some(&header) = self.folded_definitions.get(&id) {
            self.disable_loop_opt(header);
        }
        self.retry = true;
    }

    fn disable_loop_opt(&mut self, header: Id) {
        if self.next.disabled_loop_opts.insert(header) {
            debug!("disabling loop folding for %{header}");
        }
        self.retry = true;
    }

    /// Make `feature` available, requesting its extension if needed.
    fn require(&mut self, feature: Feature) -> Result<()> {
        match self.dialect.support(feature) {
            Support::Native => Ok(()),
            Support::Extension(extension) => {
                if !self.state.requested_extensions.contains(extension) {
                    self.next.requested_extensions.insert(extension.to_string());
                    self.retry = true;
                }
                Ok(())
            }
            Support::Unavailable => Err(Error::unsupported(format!(
                "{feature:?} is not available for {}",
                self.dialect.version_directive().trim_start_matches('#')
            ))),
        }
    }

    // ── Expression bookkeeping ──────────────────────────────────────────

    /// Store `node` for `id`, replacing any expression from an earlier
    /// emission of the same instruction.
    fn define(&mut self, id: Id, node: Node) -> Result<Handle> {
        self.ir.ids.clear_expression(id);
        self.ir.ids.set(id, node)?;
        self.ir
            .ids
            .handle(id)
            .ok_or_else(|| Error::internal(format!("no slot for %{id}")).at_id(id))
    }

    /// Variables a value reads when it is inlined.
    fn reads_of(&self, id: Id) -> BTreeSet<Id> {
        match self.ir.ids.node(id) {
            Some(Node::Expression(e)) if e.forwarded => self
                .ir
                .ids
                .handle(id)
                .and_then(|h| self.track.reads.get(&h))
                .cloned()
                .unwrap_or_default(),
            Some(Node::AccessChain(_)) => {
                let mut reads = self
                    .ir
                    .ids
                    .handle(id)
                    .and_then(|h| self.track.reads.get(&h))
                    .cloned()
                    .unwrap_or_default();
                if let Some(Node::AccessChain(chain)) = self.ir.ids.node(id) {
                    if !self.is_read_only(chain.base) {
                        reads.insert(chain.base);
                    }
                }
                reads
            }
            Some(Node::Variable(v)) if v.phi_variable => BTreeSet::from([id]),
            _ => BTreeSet::new(),
        }
    }

    /// Whether a value is safe to re-evaluate anywhere.
    fn is_immutable(&self, id: Id) -> bool {
        match self.ir.ids.node(id) {
            Some(Node::Expression(e)) => e.immutable,
            Some(Node::AccessChain(chain)) => self.is_read_only(chain.base),
            Some(Node::Variable(v)) => !v.phi_variable,
            _ => true,
        }
    }

    /// Record a forwarded expression's inputs.
    fn track_definition(&mut self, handle: Handle, reads: BTreeSet<Id>) {
        self.track.reads.insert(handle, reads);
        self.track.depth.insert(handle, self.loop_depth);
        if let Some(header) = self.folding {
            self.folded_definitions.insert(handle.id, header);
        }
    }

    /// Account for one read of a forwarded value.
    fn track_read(&mut self, id: Id) -> Result<()> {
        let Some(handle) = self.ir.ids.handle(id) else {
            return Ok(());
        };
        if let Some(log) = &mut self.read_log {
            log.push(id);
        }
        if self.track.invalid.contains(&handle) {
            debug!("%{id} is read after a write to its inputs");
            self.force(id);
            return Ok(());
        }

        let Some(Node::Expression(expr)) = self.ir.ids.node(id) else {
            return Ok(());
        };
        let simple = is_simple(&expr.text);
        let immutable = expr.immutable;
        let opaque = self
            .ir
            .ids
            .maybe_type(expr.expression_type)
            .is_some_and(|ty| ty.basetype.is_opaque());
        if opaque {
            return Ok(());
        }

        let uses = self.track.uses.entry(handle).or_insert(0);
        *uses += 1;
        if *uses > 1 && !simple {
            self.force(id);
        }
        let defined_at = self.track.depth.get(&handle).copied().unwrap_or(0);
        if !immutable && self.loop_depth > defined_at {
            // Re-evaluated on every iteration.
            self.force(id);
        }
        Ok(())
    }

    /// A write to `root` makes every forwarded expression that reads it
    /// stale. Writes to memory that may alias other bindings also stale
    /// everything reading such memory.
    fn invalidate(&mut self, root: Id) {
        let aliasable = self.is_aliasable(root);
        let stale: Vec<Handle> = self
            .track
            .reads
            .iter()
            .filter(|(_, reads)| {
                reads.contains(&root) || (aliasable && reads.iter().any(|&v| self.is_aliasable(v)))
            })
            .map(|(&handle, _)| handle)
            .collect();
        self.track.invalid.extend(stale);
    }

    /// Something with unknown effects ran (an impure call, a barrier).
    fn invalidate_all(&mut self) {
        let stale: Vec<Handle> = self
            .track
            .reads
            .iter()
            .filter(|(_, reads)| !reads.is_empty())
            .map(|(&handle, _)| handle)
            .collect();
        self.track.invalid.extend(stale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_texts_may_be_duplicated() {
        assert!(is_simple("a"));
        assert!(is_simple("ubo.data[3].x"));
        assert!(is_simple("1.5"));
        assert!(!is_simple("a + b"));
        assert!(!is_simple("texture(s, uv)"));
        assert!(!is_simple("-x"));
        assert!(!is_simple(""));
    }

    #[test]
    fn state_defaults_to_no_decisions() {
        let state = CompileState::default();
        assert!(state.forced_temporaries.is_empty());
        assert!(state.disabled_loop_opts.is_empty());
        assert_eq!(state, CompileState::default());
    }
}
