use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use pattern_placer_core::{preview_parts, AppConfig, Chart};
use tracing_subscriber::EnvFilter;

fn main() -> pattern_placer_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Place(args) => run_place(&args),
        Commands::Parts { pattern, config } => run_parts(&pattern, config.as_deref()),
        Commands::InitConfig { path } => run_init_config(&path),
    }
}

fn load_config(path: Option<&Path>) -> pattern_placer_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    }
}

fn run_place(args: &PlaceArgs) -> pattern_placer_core::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut pattern = Chart::load(&args.pattern)?;
    let mut destination = Chart::load(&args.destination)?;
    tracing::info!(
        pattern = ?args.pattern,
        destination = ?args.destination,
        objects = pattern.hit_objects.len(),
        "placing pattern"
    );

    let placer = &config.placer;
    match args.time {
        Some(time) => placer.place_at_time(
            &mut pattern,
            &mut destination,
            time,
            true,
            args.overwrite_start,
            args.overwrite_end,
        )?,
        None => placer.place(
            &mut pattern,
            &mut destination,
            args.offset.unwrap_or_default(),
            true,
            args.overwrite_start,
            args.overwrite_end,
        )?,
    }

    let output = args.output.as_ref().unwrap_or(&args.destination);
    destination.save(output)?;
    tracing::info!(?output, objects = destination.hit_objects.len(), "wrote destination");
    Ok(())
}

fn run_parts(pattern: &Path, config: Option<&Path>) -> pattern_placer_core::Result<()> {
    let config = load_config(config)?;
    let pattern = Chart::load(pattern)?;
    let parts = preview_parts(&config.placer, &pattern)?;
    tracing::info!(parts = parts.len(), "partitioned pattern");
    for (index, part) in parts.iter().enumerate() {
        println!(
            "part {index}: {} ms .. {} ms, {} objects",
            part.start_time,
            part.end_time,
            part.objects.len()
        );
    }
    Ok(())
}

fn run_init_config(path: &Path) -> pattern_placer_core::Result<()> {
    tracing::info!(?path, "writing default configuration");
    AppConfig::default().save(path)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Places chart patterns into destination charts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Place a pattern into a destination chart.
    Place(PlaceArgs),
    /// Show the parts a pattern splits into.
    Parts {
        /// Pattern chart as JSON.
        #[arg(short, long)]
        pattern: PathBuf,
        /// Placement configuration as JSON.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write the default configuration to a file.
    InitConfig {
        /// Output path for the configuration.
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct PlaceArgs {
    /// Pattern chart as JSON.
    #[arg(short, long)]
    pattern: PathBuf,
    /// Destination chart as JSON; overwritten unless --output is given.
    #[arg(short, long)]
    destination: PathBuf,
    /// Time in milliseconds where the first pattern object lands.
    #[arg(short, long, conflicts_with = "offset")]
    time: Option<f64>,
    /// Millisecond shift applied to the whole pattern.
    #[arg(long, allow_negative_numbers = true)]
    offset: Option<f64>,
    /// Placement configuration as JSON.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Where to write the placed chart.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Start of an explicit overwrite window, in destination milliseconds.
    #[arg(long, allow_negative_numbers = true)]
    overwrite_start: Option<f64>,
    /// End of an explicit overwrite window, in destination milliseconds.
    #[arg(long)]
    overwrite_end: Option<f64>,
}
