//! spvglsl: SPIR-V to GLSL decompiler.
//!
//! This crate turns a binary SPIR-V module back into GLSL source. It
//! decodes the instruction stream, builds an ID-indexed IR, recovers loops
//! and selections from the block graph, and emits source that forwards
//! single-use expressions instead of naming every SSA value.
//!
//! ```text
//!   words ─► parser ─► ir::builder ─► analysis ─► codegen ─► GLSL
//!                                        │           ▲
//!                                        │    retry with a stronger
//!                                        ▼    CompileState
//!                                     reflect ─► ShaderResources
//! ```

pub mod analysis;
pub mod backend;
pub mod cfg;
pub mod codegen;
pub mod error;
pub mod ir;
pub mod parser;
pub mod reflect;

pub use error::{Error, Result};
pub use reflect::{Resource, ShaderResources};

use analysis::analyze_module;
use backend::{Dialect, GlslDialect};
use codegen::{emit_module, CompileState, LoopShape, Outcome};
use ir::builder::build_ir;
use ir::{Id, ParsedIr};
use log::debug;
use spirv::ExecutionModel;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Hook that may replace the spelling of a type name.
pub type TypeRemap = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Configuration options for decompilation.
#[derive(Clone)]
pub struct CompilerOptions {
    /// Target `#version`.
    pub version: u32,
    /// Target the ES profile.
    pub es: bool,
    /// Emit Vulkan GLSL (`set`, push constants, separate samplers).
    pub vulkan_semantics: bool,
    /// Store every value in a named temporary instead of forwarding it.
    pub force_temporary: bool,
    /// Negate `gl_Position.y` at the end of vertex entry points.
    pub flip_vert_y: bool,
    /// Remap clip-space depth from `[0, w]` to `[-w, w]` at the end of
    /// vertex entry points.
    pub fixup_clipspace: bool,
    /// Replace separate images and samplers with combined `sampler*`
    /// uniforms.
    pub combined_image_samplers: bool,
    /// Emission attempts before giving up.
    pub max_attempts: u32,
    pub type_remap: Option<TypeRemap>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            version: 450,
            es: false,
            vulkan_semantics: false,
            force_temporary: false,
            flip_vert_y: false,
            fixup_clipspace: false,
            combined_image_samplers: false,
            max_attempts: 3,
            type_remap: None,
        }
    }
}

impl fmt::Debug for CompilerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerOptions")
            .field("version", &self.version)
            .field("es", &self.es)
            .field("vulkan_semantics", &self.vulkan_semantics)
            .field("force_temporary", &self.force_temporary)
            .field("flip_vert_y", &self.flip_vert_y)
            .field("fixup_clipspace", &self.fixup_clipspace)
            .field("combined_image_samplers", &self.combined_image_samplers)
            .field("max_attempts", &self.max_attempts)
            .field("type_remap", &self.type_remap.is_some())
            .finish()
    }
}

/// The result of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub source: String,
    /// Resources used by code reachable from the entry point.
    pub resources: ShaderResources,
    /// Module-scope variables reachable code touches.
    pub active_variables: BTreeSet<Id>,
    /// Name of the emitted entry point in the module. `None` for modules
    /// without entry points, which compile to declarations only.
    pub entry_point: Option<String>,
    pub stage: Option<ExecutionModel>,
    /// Shape each loop was written as, keyed by header block.
    pub loop_shapes: BTreeMap<Id, LoopShape>,
}

/// A decoded module ready to be compiled.
///
/// Compilation works on a copy of the IR, so one `Compiler` can be compiled
/// repeatedly, with different options.
#[derive(Debug, Clone)]
pub struct Compiler {
    ir: ParsedIr,
    options: CompilerOptions,
}

impl Compiler {
    /// Decode a module given as words.
    pub fn new(words: &[u32]) -> Result<Self> {
        let module = parser::parse_words(words)?;
        Ok(Self::from_ir(build_ir(module)?))
    }

    /// Decode a module given as little-endian bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let module = parser::parse_bytes(bytes)?;
        Ok(Self::from_ir(build_ir(module)?))
    }

    pub fn from_ir(ir: ParsedIr) -> Self {
        Self {
            ir,
            options: CompilerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: CompilerOptions) {
        self.options = options;
    }

    pub fn ir(&self) -> &ParsedIr {
        &self.ir
    }

    /// Every resource the module declares, used or not.
    pub fn shader_resources(&self) -> Result<ShaderResources> {
        reflect::shader_resources(&self.ir, None)
    }

    /// Decompile the module.
    ///
    /// Emission runs at most `max_attempts` times. Each attempt that finds
    /// a decision it must revise hands back a stronger [`CompileState`] for
    /// the next one; running out of attempts is an internal error.
    pub fn compile(&self) -> Result<CompiledShader> {
        let options = &self.options;
        let mut ir = self.ir.clone();
        let analysis = analyze_module(&mut ir, options.combined_image_samplers)?;
        let dialect = GlslDialect::new(options.version, options.es, options.vulkan_semantics);
        let entry = ir
            .entry_points
            .iter()
            .find(|ep| ep.function == analysis.entry_point)
            .cloned();
        match &entry {
            Some(entry) => debug!(
                "compiling entry point {:?} ({:?}) for {}",
                entry.name,
                entry.model,
                dialect.version_directive()
            ),
            None => debug!("compiling declarations for {}", dialect.version_directive()),
        }

        let mut state = CompileState::default();
        for attempt in 1..=options.max_attempts.max(1) {
            match emit_module(&mut ir, &analysis, &dialect, options, &state)? {
                Outcome::Done(emitted) => {
                    debug!("emission finished after {attempt} attempt(s)");
                    let resources =
                        reflect::shader_resources(&ir, Some(&analysis.interface_variables))?;
                    return Ok(CompiledShader {
                        source: emitted.source,
                        resources,
                        active_variables: analysis.interface_variables.clone(),
                        entry_point: entry.as_ref().map(|ep| ep.name.clone()),
                        stage: entry.as_ref().map(|ep| ep.model),
                        loop_shapes: emitted.loop_shapes,
                    });
                }
                Outcome::Retry(next) => {
                    debug!("attempt {attempt} asked for a retry");
                    state = next;
                }
            }
        }
        Err(Error::internal(format!(
            "emission did not settle within {} attempts",
            options.max_attempts
        )))
    }
}

/// Decompile a module given as words.
///
/// # Example
/// ```no_run
/// use spvglsl::{compile, CompilerOptions};
///
/// # fn main() -> spvglsl::Result<()> {
/// let words: Vec<u32> = Vec::new(); // a SPIR-V module
/// let shader = compile(&words, &CompilerOptions::default())?;
/// println!("{}", shader.source);
/// # Ok(())
/// # }
/// ```
pub fn compile(words: &[u32], options: &CompilerOptions) -> Result<CompiledShader> {
    Compiler::new(words)?
        .with_options(options.clone())
        .compile()
}

/// Decompile a module given as little-endian bytes.
pub fn compile_bytes(bytes: &[u8], options: &CompilerOptions) -> Result<CompiledShader> {
    Compiler::from_bytes(bytes)?
        .with_options(options.clone())
        .compile()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_target_desktop_450() {
        let options = CompilerOptions::default();
        assert_eq!(options.version, 450);
        assert!(!options.es);
        assert!(!options.vulkan_semantics);
        assert_eq!(options.max_attempts, 3);
        assert!(options.type_remap.is_none());
    }

    #[test]
    fn debug_output_hides_the_remap_closure() {
        let options = CompilerOptions {
            type_remap: Some(Arc::new(|name: &str| {
                (name == "vec4").then(|| "float4".to_string())
            })),
            ..CompilerOptions::default()
        };
        let text = format!("{options:?}");
        assert!(text.contains("type_remap: true"), "{text}");
    }

    #[test]
    fn truncated_input_is_malformed() {
        let err = Compiler::new(&[0x0723_0203, 0x0001_0000]).unwrap_err();
        assert!(err.is_malformed(), "{err}");
        let err = compile_bytes(&[1, 2, 3], &CompilerOptions::default()).unwrap_err();
        assert!(err.is_malformed(), "{err}");
    }
}
