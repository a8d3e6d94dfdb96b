use anyhow::{Context, Result};
use clap::Parser;
use spvglsl::{Compiler, CompilerOptions, ShaderResources};
use std::fs;
use std::path::PathBuf;

/// spvglsl: SPIR-V to GLSL decompiler.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input SPIR-V binary (.spv)
    input: PathBuf,

    /// Output GLSL source file
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Target GLSL version
    #[arg(long = "glsl-version", default_value_t = 450)]
    glsl_version: u32,

    /// Target the ES profile
    #[arg(long)]
    es: bool,

    /// Emit Vulkan GLSL
    #[arg(long)]
    vulkan_semantics: bool,

    /// Store every value in a named temporary
    #[arg(long)]
    force_temporary: bool,

    /// Negate gl_Position.y in vertex shaders
    #[arg(long)]
    flip_vert_y: bool,

    /// Remap clip-space depth from [0, w] to [-w, w] in vertex shaders
    #[arg(long)]
    fixup_clipspace: bool,

    /// Combine separate images and samplers into sampler uniforms
    #[arg(long)]
    combined_samplers: bool,

    /// Print the resources the shader uses to stderr
    #[arg(long)]
    reflect: bool,

    /// Log pipeline stages (same as RUST_LOG=debug)
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> CompilerOptions {
        CompilerOptions {
            version: self.glsl_version,
            es: self.es,
            vulkan_semantics: self.vulkan_semantics,
            force_temporary: self.force_temporary,
            flip_vert_y: self.flip_vert_y,
            fixup_clipspace: self.fixup_clipspace,
            combined_image_samplers: self.combined_samplers,
            ..CompilerOptions::default()
        }
    }
}

fn print_resources(resources: &ShaderResources) {
    for (label, list) in resources.categories() {
        if list.is_empty() {
            continue;
        }
        eprintln!("{label}:");
        for resource in list {
            eprintln!(
                "  %{} {} (type %{}, base %{})",
                resource.id, resource.name, resource.type_id, resource.base_type_id
            );
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    eprintln!("spvglsl: decompiling {}", cli.input.display());

    let bytes =
        fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;

    let compiler = Compiler::from_bytes(&bytes)
        .with_context(|| format!("failed to decode {}", cli.input.display()))?
        .with_options(cli.options());
    let shader = compiler.compile().context("decompilation failed")?;

    if cli.reflect {
        print_resources(&shader.resources);
    }

    if let Some(output_path) = &cli.output {
        fs::write(output_path, &shader.source)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        eprintln!("spvglsl: wrote {}", output_path.display());
    } else {
        print!("{}", shader.source);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["spvglsl", "shader.spv"]);
        assert_eq!(cli.input, PathBuf::from("shader.spv"));
        assert!(cli.output.is_none());
        assert_eq!(cli.glsl_version, 450);
        assert!(!cli.reflect);
    }

    #[test]
    fn cli_flags_map_to_options() {
        let cli = Cli::parse_from([
            "spvglsl",
            "shader.spv",
            "--glsl-version",
            "310",
            "--es",
            "--flip-vert-y",
            "--combined-samplers",
            "-o",
            "out.glsl",
        ]);
        let options = cli.options();
        assert_eq!(options.version, 310);
        assert!(options.es);
        assert!(options.flip_vert_y);
        assert!(options.combined_image_samplers);
        assert!(!options.vulkan_semantics);
        assert_eq!(cli.output, Some(PathBuf::from("out.glsl")));
    }
}
