use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use poisson_blend::{
    default_output_path, is_supported_image, BorderPolicy, EditOptions, PoissonEngine, ProcessResult, SolverOptions,
};

#[derive(Parser)]
#[command(
    name = "poisson-blend",
    about = "Seamlessly blend a masked region of one image into another",
    version,
    after_help = "Simple usage: poisson-blend <source> <target> <mask>  (writes <target>_blended.<ext>)\n\n\
                  Mask pixels that are nonzero mark the region taken from the source."
)]
struct Cli {
    /// Source image whose gradients are imported
    source: PathBuf,

    /// Target image that receives the blend
    target: PathBuf,

    /// Grayscale region mask, same size as the target
    mask: PathBuf,

    /// Output file (default: {target}_blended.{ext})
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Translation applied to the source, as DX,DY
    #[arg(long, default_value = "0,0", value_parser = parse_offset, allow_hyphen_values = true)]
    offset: (i32, i32),

    /// Scale of the imported source gradients
    #[arg(short, long, default_value = "1.0")]
    alpha: f64,

    /// How mask-zero pixels on the image border are handled
    #[arg(long, value_enum, default_value_t = Border::Laplacian)]
    border: Border,

    /// Relative residual at which the solver stops
    #[arg(long, default_value = "1e-10")]
    tolerance: f64,

    /// Solver iteration cap (default: twice the number of unknowns)
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Border {
    /// Border pixels keep the Laplacian stencil
    Laplacian,
    /// Border pixels outside the mask copy the target
    Passthrough,
}

impl From<Border> for BorderPolicy {
    fn from(border: Border) -> Self {
        match border {
            Border::Laplacian => Self::Laplacian,
            Border::Passthrough => Self::Passthrough,
        }
    }
}

fn parse_offset(s: &str) -> Result<(i32, i32), String> {
    let (dx, dy) = s
        .split_once(',')
        .ok_or_else(|| format!("expected DX,DY, got '{s}'"))?;
    let dx = dx.trim().parse().map_err(|e| format!("bad DX '{dx}': {e}"))?;
    let dy = dy.trim().parse().map_err(|e| format!("bad DY '{dy}': {e}"))?;
    Ok((dx, dy))
}

fn init_tracing(cli: &Cli) {
    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if !cli.alpha.is_finite() {
        eprintln!("Error: Alpha must be a finite number");
        process::exit(1);
    }

    if cli.tolerance.is_nan() || cli.tolerance <= 0.0 || cli.tolerance >= 1.0 {
        eprintln!("Error: Tolerance must be between 0.0 and 1.0 (exclusive)");
        process::exit(1);
    }

    for path in [&cli.source, &cli.target, &cli.mask] {
        if !path.exists() {
            eprintln!("Error: Input path does not exist: {}", path.display());
            process::exit(1);
        }
    }

    let options = EditOptions {
        alpha: cli.alpha,
        border: cli.border.into(),
        solver: SolverOptions {
            tolerance: cli.tolerance,
            max_iterations: cli.max_iterations,
        },
    };
    let engine = PoissonEngine::new(options);

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.target));

    if !is_supported_image(&output) {
        eprintln!(
            "Error: Unsupported output format: {} (use jpg, png, bmp or webp)",
            output.display()
        );
        process::exit(1);
    }

    if !cli.quiet {
        eprintln!(
            "Blending {} into {} (offset {},{}, alpha {})",
            file_name(&cli.source),
            file_name(&cli.target),
            cli.offset.0,
            cli.offset.1,
            cli.alpha
        );
    }

    let result = engine.process_files(&cli.source, &cli.target, &cli.mask, &output, cli.offset);
    print_result(&result, &cli);

    if !result.success {
        process::exit(1);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}

fn print_result(result: &ProcessResult, cli: &Cli) {
    let name = file_name(&result.path);
    if result.success {
        if !cli.quiet {
            eprintln!("[OK] {name}");
        }
    } else {
        eprintln!("[FAIL] {name}: {}", result.message);
    }

    if cli.verbose && !result.message.is_empty() {
        eprintln!("  -> {}", result.message);
    }
}
