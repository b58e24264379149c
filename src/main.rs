use clap::{Parser, Subcommand};
use ditto::config::{self, BuildConfig};
use ditto::output;
use ditto::pipeline::Pipeline;
use std::path::PathBuf;
use std::sync::mpsc;

#[derive(Parser)]
#[command(name = "ditto")]
#[command(version, about = "Static build pipeline: discover, read, transform, write")]
#[command(long_about = "\
Static build pipeline: discover, read, transform, write

Every file under the source directory is read into memory, passed through
the registered stages in order, and written to the destination directory.
The command-line build registers no stages, so it mirrors the source tree
into the destination; use it to check a layout or as a copy step.

Project structure:

  site/
  ├── ditto.toml        # Build config (optional)
  ├── src/              # Source tree
  └── build/            # Destination tree (emptied first unless --no-clobber)

Run 'ditto gen-config' to print a documented ditto.toml.")]
struct Cli {
    /// Working directory; paths in ditto.toml resolve against it
    #[arg(short = 'C', long, default_value = ".", global = true)]
    dir: PathBuf,

    /// Config file [default: <dir>/ditto.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Source directory (overrides config)
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Destination directory (overrides config)
    #[arg(long, global = true)]
    destination: Option<PathBuf>,

    /// Log format for diagnostics on stderr
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline: discover → read → stages → write
    Build {
        /// Keep existing files in the destination directory
        #[arg(long)]
        no_clobber: bool,
    },
    /// Discover and read the source tree without writing anything
    Check,
    /// Print a stock ditto.toml with all options documented
    GenConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match &cli.command {
        Command::Build { no_clobber } => {
            let config = load_build_config(&cli)?;
            let (tx, rx) = mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_build_event(&event) {
                        println!("{}", line);
                    }
                }
            });

            let mut pipeline = configure(&cli, &config)
                .clobber(config.clobber && !*no_clobber)
                .events(tx);
            let destination = pipeline.destination_dir().to_path_buf();

            let mut failure = None;
            let outcome = pipeline.build(|err| failure = Some(err)).await;
            // Closes the event channel so the printer drains and exits.
            drop(pipeline);
            printer.join().map_err(|_| "output thread panicked")?;

            if let Some(err) = failure {
                return Err(err.into());
            }
            if let Some(report) = outcome? {
                println!();
                output::print_build_report(&report, &destination);
                if !report.is_complete() {
                    let failed = report.failed.len();
                    return Err(format!("{failed} file(s) could not be written").into());
                }
            }
        }
        Command::Check => {
            let config = load_build_config(&cli)?;
            let pipeline = configure(&cli, &config);
            println!("==> Checking {}", pipeline.source_dir().display());
            pipeline.validate()?;
            let documents = pipeline.load().await?;
            output::print_check_output(&documents);
            println!("==> Source tree is readable");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "ditto=warn",
        1 => "ditto=info",
        2 => "ditto=debug",
        _ => "ditto=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// Load `--config`, or `ditto.toml` from the working directory.
fn load_build_config(cli: &Cli) -> Result<BuildConfig, config::ConfigError> {
    match &cli.config {
        Some(path) => config::load_config_file(path),
        None => config::load_config(&cli.dir),
    }
}

/// Build a pipeline from config, then apply command-line overrides.
fn configure(cli: &Cli, config: &BuildConfig) -> Pipeline {
    let mut pipeline = Pipeline::from_config(&cli.dir, config);
    if let Some(source) = &cli.source {
        pipeline = pipeline.source(source);
    }
    if let Some(destination) = &cli.destination {
        pipeline = pipeline.destination(destination);
    }
    pipeline
}
