use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rhsc::codegen::{CodegenOptions, DEFAULT_COMPLEX_MATH_INCLUDE, DEFAULT_FILENAME, DEFAULT_FUNCTION_NAME};
use rhsc::diag::Diagnostic;
use rhsc::model::OpSystem;
use rhsc::pass::PassId;
use rhsc::pipeline::{compute_provenance, persist, run_pipeline, CompilationState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Cython module source
    Pyx,
    /// Kernel IR dump
    Ir,
    /// Provenance JSON
    BuildInfo,
    /// Validate only
    Check,
}

impl EmitStage {
    fn terminal_pass(self) -> PassId {
        match self {
            EmitStage::Check => PassId::Validate,
            EmitStage::Ir => PassId::VerifyIr,
            EmitStage::Pyx | EmitStage::BuildInfo => PassId::Codegen,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "rhsc",
    version,
    about = "Generates specialized ODE right-hand-side kernels from Hamiltonian models"
)]
struct Cli {
    /// Input model (JSON)
    model: PathBuf,

    /// Output file path (`-` for stdout)
    #[arg(short, long, default_value = DEFAULT_FILENAME)]
    output: PathBuf,

    /// Write `<module name>.pyx` into this directory instead of `--output`
    /// and print the written path
    #[arg(long, conflicts_with = "output")]
    out_dir: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Pyx)]
    emit: EmitStage,

    /// Guard tolerance for time-dependent coefficients (overrides the model)
    #[arg(long)]
    tolerance: Option<f64>,

    /// Path of the complex-math helper included by the generated module
    #[arg(long, default_value = DEFAULT_COMPLEX_MATH_INCLUDE)]
    complex_math_include: String,

    /// Name of the generated function
    #[arg(long, default_value = DEFAULT_FUNCTION_NAME)]
    function_name: String,

    /// Log passes and timing (RUST_LOG takes precedence)
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn print_diagnostics(diags: &[Diagnostic]) {
    for d in diags {
        eprintln!("rhsc: {}", d);
    }
}

fn write_stdout(text: &str) {
    print!("{}", text);
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    debug!(model = %cli.model.display(), output = %cli.output.display(), emit = ?cli.emit, "starting");

    // ── Load model ──
    let model = match OpSystem::load(&cli.model) {
        Ok(m) => m,
        Err(e) => {
            error!("{}", e);
            eprintln!("rhsc: error: {}", e);
            std::process::exit(2);
        }
    };

    let options = CodegenOptions {
        tolerance: cli.tolerance,
        complex_math_include: cli.complex_math_include.clone(),
        function_name: cli.function_name.clone(),
    };

    // ── Run passes ──
    let mut state = CompilationState::new(model);
    let result = run_pipeline(&mut state, cli.emit.terminal_pass(), &options, |_, diags| {
        print_diagnostics(diags)
    });
    if result.is_err() || state.has_error {
        std::process::exit(1);
    }

    // ── Emit ──
    match cli.emit {
        EmitStage::Check => {}
        EmitStage::Ir => {
            if let Some(ir) = &state.ir {
                write_stdout(&ir.to_string());
            }
        }
        EmitStage::BuildInfo => {
            let Some(kernel) = &state.generated else {
                std::process::exit(1);
            };
            let json = compute_provenance(&state.model, kernel)
                .map_err(|e| e.to_string())
                .and_then(|p| p.to_json().map_err(|e| e.to_string()));
            match json {
                Ok(json) => write_stdout(&json),
                Err(e) => {
                    eprintln!("rhsc: error: {}", e);
                    std::process::exit(2);
                }
            }
        }
        EmitStage::Pyx => {
            let Some(kernel) = &state.generated else {
                std::process::exit(1);
            };
            let path = match &cli.out_dir {
                Some(dir) => dir.join(kernel.file_name()),
                None if cli.output == Path::new("-") => {
                    write_stdout(&kernel.source());
                    return;
                }
                None => cli.output.clone(),
            };
            if let Err(e) = persist(kernel, &path) {
                eprintln!("rhsc: error: {}", e);
                std::process::exit(2);
            }
            if cli.out_dir.is_some() {
                println!("{}", path.display());
            }
        }
    }
}
