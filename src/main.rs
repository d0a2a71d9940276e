use clap::{Parser, Subcommand};
use iiif_static::collection::{COLLECTION_FILENAME, Collection};
use iiif_static::identifier::Identifier;
use iiif_static::presentation::ManifestBuilder;
use iiif_static::process::{self, FailurePolicy, PassOptions};
use iiif_static::tiling::{TileGenerator, TileOptions, TileRequest};
use iiif_static::{config, output};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared flags for commands that tile images.
#[derive(clap::Args, Clone)]
struct TilingArgs {
    /// Regenerate pyramids even when source and settings are unchanged
    #[arg(long)]
    force: bool,

    /// Publish images whose full-resolution fallback can't be encoded
    /// without one, instead of failing them
    #[arg(long)]
    allow_missing_fallback: bool,
}

#[derive(Parser)]
#[command(name = "iiif-static")]
#[command(about = "Static IIIF tile pyramids and manifests")]
#[command(long_about = "\
Static IIIF tile pyramids and manifests

Every image becomes a pre-rendered, zoomable tile pyramid (IIIF Image API 3,
level 0); every collection becomes one IIIF Presentation 3 manifest. Serve the
output directory from any static file host at the configured base_url.

Output structure:

  dist/
  ├── images/
  │   └── p1/
  │       ├── info.json                      # Image service descriptor
  │       ├── full/max/0/default.jpg         # Full-resolution fallback
  │       └── 0,0,256,256/256,256/0/default.jpg
  └── coll/
      └── manifest.json                      # One per collection

Collection file (collection.toml):

  id = \"coll\"
  [label]
  en = [\"My Collection\"]
  [[items]]
  id = \"p1\"
  image = \"scans/p1.jpg\"          # relative to the collection file

Unchanged images are skipped on later runs; a changed source or changed tile
settings regenerate the affected pyramids.

Run 'iiif-static gen-config' to generate a documented iiif.toml.")]
#[command(version)]
struct Cli {
    /// Output directory, served at base_url
    #[arg(long, default_value = "dist", global = true)]
    output: PathBuf,

    /// Configuration file (stock defaults are used if it doesn't exist)
    #[arg(long, default_value = config::CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Log per-level and per-file details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tile a single image
    Tile {
        /// Source image
        image: PathBuf,
        /// Identifier: directory name under images/ and canvas key
        #[arg(long)]
        id: Identifier,
        #[command(flatten)]
        tiling: TilingArgs,
    },
    /// Tile every image of a collection and write its manifest
    Build {
        /// Collection file
        #[arg(default_value = COLLECTION_FILENAME)]
        collection: PathBuf,
        #[command(flatten)]
        tiling: TilingArgs,
        /// Write the manifest even if some images fail, leaving them out
        #[arg(long)]
        keep_going: bool,
    },
    /// Validate the published pyramids and manifest of a collection
    Check {
        /// Collection file
        #[arg(default_value = COLLECTION_FILENAME)]
        collection: PathBuf,
    },
    /// Print a stock iiif.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Tile { image, id, tiling } => {
            let config = config::load_config(&cli.config)?;
            let generator = TileGenerator::new(&cli.output, TileOptions::from_config(&config));
            let request = TileRequest::new(image, id.clone()).force(tiling.force);
            let outcome = if tiling.allow_missing_fallback {
                generator.tile_allowing_missing_fallback(&request)?
            } else {
                generator.tile(&request)?
            };
            output::print_tile_outcome(&outcome, &generator.service_id(&id));
        }
        Command::Build {
            collection,
            tiling,
            keep_going,
        } => {
            let config = config::load_config(&cli.config)?;
            let collection = Collection::load(&collection)?;
            init_thread_pool(&config.processing);

            let generator = TileGenerator::new(&cli.output, TileOptions::from_config(&config));
            let builder = ManifestBuilder::from_config(&cli.output, &config);
            let options = PassOptions {
                force: tiling.force,
                failure_policy: if keep_going {
                    FailurePolicy::SkipFailed
                } else {
                    FailurePolicy::Abort
                },
                retry_without_fallback: tiling.allow_missing_fallback,
            };

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for event in rx {
                    for line in output::format_process_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let result = process::run_pass(&generator, &builder, &collection, &options, Some(tx));
            printer
                .join()
                .map_err(|_| "progress printer thread panicked")?;
            output::print_pass_summary(&result?);
        }
        Command::Check { collection } => {
            let config = config::load_config(&cli.config)?;
            let collection = Collection::load(&collection)?;
            let report = process::check_collection(&collection, &cli.output, &config);
            output::print_check_report(&report);
            if !report.is_ok() {
                return Err(format!("{} is incomplete or out of date", cli.output.display()).into());
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Install the stderr log subscriber. `RUST_LOG` overrides the default filter.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "iiif_static=debug"
    } else {
        "iiif_static=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; users can lower it, not raise it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
