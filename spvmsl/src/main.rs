use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use rspirv::spirv::StorageClass;
use spvmsl_core::ir::Ir;
use spvmsl_core::options::make_msl_version;
use spvmsl_core::{CompilerMsl, Options, Platform, analysis, loader};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Target platform family
#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlatformArg {
    Ios,
    Macos,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Ios => Platform::Ios,
            PlatformArg::Macos => Platform::Macos,
        }
    }
}

/// Times the execution of a closure and prints the elapsed time if verbose.
fn time<T, F: FnOnce() -> T>(name: &str, verbose: bool, f: F) -> T {
    let start = Instant::now();
    let result = f();
    if verbose {
        let elapsed = start.elapsed().as_millis();
        eprintln!("{}: {}ms", name, elapsed);
    }
    result
}

#[derive(Parser)]
#[command(name = "spvmsl")]
#[command(about = "Translate SPIR-V shaders to Metal Shading Language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a SPIR-V binary to MSL source
    Compile {
        /// Input SPIR-V file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file (defaults to input name with .metal extension)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// JSON options file
        #[arg(long, value_name = "JSON")]
        config: Option<PathBuf>,

        /// Target MSL version, e.g. 2.0 or 2.1.0
        #[arg(long, value_name = "X.Y")]
        msl_version: Option<String>,

        /// Target platform family
        #[arg(long)]
        platform: Option<PlatformArg>,

        /// Write vertex output to a device buffer instead of returning it
        #[arg(long)]
        capture_output: bool,

        /// Apply per-texture swizzles from the aux buffer
        #[arg(long)]
        swizzle_texture_samples: bool,

        /// Widen fragment outputs to four components
        #[arg(long)]
        pad_fragment_output: bool,

        /// Print verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the entry point and resources of a SPIR-V binary
    Reflect {
        /// Input SPIR-V file
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

#[derive(Debug, Error)]
enum DriverError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Compilation error: {0}")]
    CompilationError(#[from] spvmsl_core::CompilerError),

    #[error("Configuration error: {0:#}")]
    ConfigError(#[from] anyhow::Error),

    #[error("{0}: length {1} is not a multiple of 4")]
    TruncatedBinary(PathBuf, usize),
}

fn main() -> Result<(), DriverError> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            input,
            output,
            config,
            msl_version,
            platform,
            capture_output,
            swizzle_texture_samples,
            pad_fragment_output,
            verbose,
        } => {
            let mut options = load_options(config.as_deref())?;
            if let Some(version) = msl_version {
                options.msl_version = parse_msl_version(&version)?;
            }
            if let Some(platform) = platform {
                options.platform = platform.into();
            }
            options.capture_output_to_buffer |= capture_output;
            options.swizzle_texture_samples |= swizzle_texture_samples;
            options.pad_fragment_output_components |= pad_fragment_output;
            compile_file(input, output, options, verbose)?;
        }
        Commands::Reflect { input } => {
            reflect_file(&input)?;
        }
    }

    Ok(())
}

fn load_options(path: Option<&Path>) -> anyhow::Result<Options> {
    let Some(path) = path else {
        return Ok(Options::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn parse_msl_version(text: &str) -> anyhow::Result<u32> {
    let parts = text
        .split('.')
        .map(|p| p.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid MSL version '{}'", text))?;
    match parts.as_slice() {
        [major, minor] => Ok(make_msl_version(*major, *minor, 0)),
        [major, minor, patch] => Ok(make_msl_version(*major, *minor, *patch)),
        _ => anyhow::bail!("invalid MSL version '{}', expected X.Y or X.Y.Z", text),
    }
}

/// Read a little-endian SPIR-V binary.
fn read_words(path: &Path) -> Result<Vec<u32>, DriverError> {
    let bytes = fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(DriverError::TruncatedBinary(path.to_path_buf(), bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn compile_file(
    input: PathBuf,
    output: Option<PathBuf>,
    options: Options,
    verbose: bool,
) -> Result<(), DriverError> {
    if verbose {
        info!("Compiling {}...", input.display());
    }

    let words = read_words(&input)?;
    let ir = time("load", verbose, || loader::load_words(&words))?;
    let mut compiler = CompilerMsl::new(ir, options);
    let msl = time("compile", verbose, || compiler.compile())?;

    let output_path = output.unwrap_or_else(|| {
        let mut path = input.clone();
        path.set_extension("metal");
        path
    });
    fs::write(&output_path, msl)?;

    if verbose {
        info!("Wrote {} in {} passes", output_path.display(), compiler.pass_count());
        if compiler.is_rasterization_disabled() {
            info!("Rasterization is disabled for this shader");
        }
        if compiler.needs_aux_buffer() {
            info!("Shader reads the swizzle aux buffer");
        }
        for attr in compiler.vertex_attributes() {
            info!("vertex attribute {}: used = {}", attr.location, attr.used_by_shader);
        }
        for binding in compiler.resource_bindings() {
            info!(
                "binding {:?} set {} binding {}: used = {}",
                binding.stage, binding.desc_set, binding.binding, binding.used_by_shader
            );
        }
    }

    Ok(())
}

fn reflect_file(input: &Path) -> Result<(), DriverError> {
    let words = read_words(input)?;
    let ir = loader::load_words(&words)?;
    let entry = ir.entry_point()?;
    println!("entry point '{}' ({:?})", entry.name, entry.model);
    if entry.model == rspirv::spirv::ExecutionModel::GLCompute {
        let [x, y, z] = entry.workgroup_size;
        println!("  workgroup size {} x {} x {}", x, y, z);
    }

    let mut active: Vec<_> = analysis::active_interface_variables(&ir, entry.id)?.into_iter().collect();
    active.sort_unstable();
    for var in active {
        print_variable(&ir, var)?;
    }
    Ok(())
}

fn print_variable(ir: &Ir, var: u32) -> Result<(), DriverError> {
    use rspirv::spirv::Decoration;

    let storage = ir.get_variable(var)?.storage;
    let name = match ir.name(var) {
        "" => format!("_{}", var),
        name => name.to_string(),
    };
    match storage {
        StorageClass::Input | StorageClass::Output => {
            if let Some(builtin) = ir.builtin(var) {
                println!("  {:?} {} builtin {:?}", storage, name, builtin);
            } else {
                println!(
                    "  {:?} {} location {}",
                    storage,
                    name,
                    ir.get_decoration(var, Decoration::Location)
                );
            }
        }
        StorageClass::Uniform
        | StorageClass::UniformConstant
        | StorageClass::StorageBuffer
        | StorageClass::PushConstant => {
            println!(
                "  {:?} {} set {} binding {}",
                storage,
                name,
                ir.get_decoration(var, Decoration::DescriptorSet),
                ir.get_decoration(var, Decoration::Binding)
            );
        }
        _ => {}
    }
    Ok(())
}
