//! Terrawatch CLI - satellite land monitoring from the command line

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use terrawatch_algorithms::classification::{FileModelStore, LandCoverClassifier, ModelType};
use terrawatch_algorithms::imagery::{reduce_region, SpectralIndex};
use terrawatch_colormap::{auto_params, raster_to_rgba, write_png, ColorScheme, PixelLayout};
use terrawatch_core::io::{read_bands, GeoTiffStore, RasterStore};
use terrawatch_core::{AreaOfInterest, Band, DateRange, ImageComposite, Raster};
use terrawatch_service::realtime::{render_overlay, SessionManager, Stage, TrainingRequest};
use terrawatch_service::{Acquisition, ChangeAnalysis, ServiceConfig, StaticProvider};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "terrawatch")]
#[command(author, version, about = "Satellite land monitoring and land-cover training", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Service configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Band order of input images, comma separated
    #[arg(short, long, global = true, default_value = "red,green,blue,nir")]
    bands: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a multi-band image
    Info {
        /// Input GeoTIFF
        input: PathBuf,
    },
    /// Export scale for an area of interest
    Scale {
        /// north,south,east,west in degrees
        #[arg(long, allow_hyphen_values = true)]
        aoi: String,
        /// Fixed sensor resolution in metres (bypasses the ladder)
        #[arg(long)]
        native: Option<f64>,
    },
    /// Compute a spectral index
    Index {
        /// Input GeoTIFF
        input: PathBuf,
        /// Output GeoTIFF
        output: PathBuf,
        /// ndvi, ndwi, ndbi, ndmi or msi
        #[arg(short, long, default_value = "ndvi")]
        index: String,
        /// Also write a color-mapped PNG preview
        #[arg(long)]
        png: Option<PathBuf>,
    },
    /// Two-period change detection
    Change {
        #[command(subcommand)]
        kind: ChangeCommands,
    },
    /// Vegetation health over one period
    Vegetation {
        #[command(flatten)]
        scene: SceneArgs,
    },
    /// Soil moisture over one period
    Moisture {
        #[command(flatten)]
        scene: SceneArgs,
    },
    /// Weak-label an image and train a land-cover model
    Train {
        /// Input GeoTIFF
        input: PathBuf,
        /// random_forest or patch_cnn
        #[arg(short, long, default_value = "random_forest")]
        model: String,
    },
    /// Classify an image with a trained model
    Classify {
        /// Input GeoTIFF
        input: PathBuf,
        /// Output class GeoTIFF
        output: PathBuf,
        /// random_forest or patch_cnn
        #[arg(short, long, default_value = "random_forest")]
        model: String,
        /// Directory for the PNG overlay and its metadata
        #[arg(long)]
        overlay: Option<PathBuf>,
    },
    /// Run the full training workflow as a session with live progress
    Realtime {
        /// Input GeoTIFF
        input: PathBuf,
        /// random_forest or patch_cnn
        #[arg(short, long, default_value = "random_forest")]
        model: String,
        /// Session id (defaults to one derived from the process id)
        #[arg(long)]
        session_id: Option<String>,
        /// Output class GeoTIFF
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ChangeCommands {
    /// Dense-canopy loss and gain
    Forest {
        #[command(flatten)]
        pair: PairArgs,
    },
    /// Built-up growth
    Urban {
        #[command(flatten)]
        pair: PairArgs,
    },
    /// Surface water extent
    Water {
        #[command(flatten)]
        scene: SceneArgs,
    },
}

/// One image standing in for one period
#[derive(Args)]
struct SceneArgs {
    /// north,south,east,west in degrees
    #[arg(long, allow_hyphen_values = true)]
    aoi: String,
    /// Input GeoTIFF
    #[arg(long)]
    image: PathBuf,
    /// START..END as YYYY-MM-DD
    #[arg(long)]
    period: String,
}

/// Two images for the old and new periods
#[derive(Args)]
struct PairArgs {
    /// north,south,east,west in degrees
    #[arg(long, allow_hyphen_values = true)]
    aoi: String,
    #[arg(long)]
    old: PathBuf,
    /// START..END as YYYY-MM-DD
    #[arg(long)]
    old_period: String,
    #[arg(long)]
    new: PathBuf,
    /// START..END as YYYY-MM-DD
    #[arg(long)]
    new_period: String,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn stage_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    if let Ok(style) =
        ProgressStyle::with_template("{prefix:>12.cyan} [{bar:40.green}] {pos:>3}% {msg}")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

fn parse_aoi(s: &str) -> Result<AreaOfInterest> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("Invalid AOI: {}", s))?;
    let [north, south, east, west] = parts[..] else {
        anyhow::bail!("AOI must be 'north,south,east,west', got: {}", s);
    };
    Ok(AreaOfInterest::new(north, south, east, west)?)
}

fn parse_period(s: &str) -> Result<DateRange> {
    let (start, end) = s
        .split_once("..")
        .with_context(|| format!("Period must be START..END, got: {}", s))?;
    Ok(DateRange::parse(start, end)?)
}

fn read_composite(path: &Path, bands: &[Band]) -> Result<ImageComposite> {
    let pb = spinner("Reading image...");
    let composite = GeoTiffStore
        .read_composite(path, bands)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    let (rows, cols) = composite.shape();
    info!("Input: {} x {}, {} bands", cols, rows, composite.band_count());
    Ok(composite)
}

fn read_period(path: &Path, period: &str, bands: &[Band]) -> Result<ImageComposite> {
    Ok(read_composite(path, bands)?.with_date_range(parse_period(period)?))
}

/// AOI, both images as a catalogue, and the two periods
fn read_pair(
    pair: &PairArgs,
    bands: &[Band],
) -> Result<(AreaOfInterest, Vec<ImageComposite>, DateRange, DateRange)> {
    let old = parse_period(&pair.old_period)?;
    let new = parse_period(&pair.new_period)?;
    let catalogue = vec![
        read_composite(&pair.old, bands)?.with_date_range(old),
        read_composite(&pair.new, bands)?.with_date_range(new),
    ];
    Ok((parse_aoi(&pair.aoi)?, catalogue, old, new))
}

fn analysis(
    config: &ServiceConfig,
    catalogue: Vec<ImageComposite>,
) -> Result<ChangeAnalysis<StaticProvider>> {
    let acq = &config.acquisition;
    let acquisition = Acquisition::new(StaticProvider::new(catalogue), config.scale.selector()?)
        .with_cloud_ceilings(acq.cloud_ceiling, acq.relaxed_cloud_ceiling);
    Ok(ChangeAnalysis::new(acquisition))
}

fn classifier(config: &ServiceConfig) -> LandCoverClassifier<FileModelStore> {
    LandCoverClassifier::new(
        FileModelStore::new(&config.model_dir),
        config.classifier.clone(),
    )
}

fn index_scheme(index: SpectralIndex) -> ColorScheme {
    match index {
        SpectralIndex::Ndvi => ColorScheme::Ndvi,
        SpectralIndex::Ndwi => ColorScheme::Water,
        SpectralIndex::Ndbi | SpectralIndex::Ndmi => ColorScheme::Divergent,
        SpectralIndex::Msi => ColorScheme::Grayscale,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let config = ServiceConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let bands = Band::parse_list(&cli.bands)?;

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let image = read_bands(&input).context("Failed to read image")?;
            let Some(first) = image.bands.first() else {
                anyhow::bail!("{} holds no bands", input.display());
            };
            let (rows, cols) = first.dim();
            let t = image.transform;
            let bounds = t.bounds(cols, rows);

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, rows * cols);
            println!("Bands: {}", image.bands.len());
            println!("Cell size: {} x {}", t.pixel_width, t.pixel_height.abs());
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            if let Some(crs) = &image.crs {
                println!("CRS: {}", crs);
            }

            println!("\nStatistics:");
            for (i, data) in image.bands.into_iter().enumerate() {
                let name = bands
                    .get(i)
                    .map_or_else(|| format!("band {}", i + 1), |b| b.to_string());
                match reduce_region(&Raster::from_array(data), None)? {
                    Some(s) => println!(
                        "  {:<8} min {:.4}  max {:.4}  mean {:.4}  ({} valid)",
                        name, s.min, s.max, s.mean, s.count
                    ),
                    None => println!("  {:<8} no valid cells", name),
                }
            }
        }

        // ── Scale ────────────────────────────────────────────────────
        Commands::Scale { aoi, native } => {
            let aoi = parse_aoi(&aoi)?;
            let mut scale = config.scale.clone();
            if native.is_some() {
                scale.native_resolution = native;
            }
            let choice = scale.selector()?.select(aoi.area_km2())?;
            println!("AOI area: {:.3} km²", aoi.area_km2());
            print_json(&choice)?;
        }

        // ── Index ────────────────────────────────────────────────────
        Commands::Index {
            input,
            output,
            index,
            png,
        } => {
            let index: SpectralIndex = index.parse()?;
            let composite = read_composite(&input, &bands)?;
            let start = Instant::now();
            let result = index
                .compute(&composite)
                .with_context(|| format!("Failed to calculate {}", index))?;
            let elapsed = start.elapsed();

            GeoTiffStore
                .write_raster(&result.raster, &output)
                .context("Failed to write output")?;
            done(index.name(), &output, elapsed);

            if let Some(png) = png {
                let params = auto_params(&result.raster, index_scheme(index));
                let rgba = raster_to_rgba(&result.raster, &params);
                let (rows, cols) = result.raster.shape();
                write_png(&png, cols, rows, &rgba, PixelLayout::Rgba)
                    .context("Failed to write PNG")?;
                println!("Preview saved to: {}", png.display());
            }
        }

        // ── Change detection ─────────────────────────────────────────
        Commands::Change { kind } => match kind {
            ChangeCommands::Forest { pair } => {
                let (aoi, catalogue, old, new) = read_pair(&pair, &bands)?;
                let report = analysis(&config, catalogue)?
                    .forest_change(&aoi, &old, &new)
                    .context("Forest change analysis failed")?;
                print_json(&report)?;
            }
            ChangeCommands::Urban { pair } => {
                let (aoi, catalogue, old, new) = read_pair(&pair, &bands)?;
                let report = analysis(&config, catalogue)?
                    .urban_sprawl(&aoi, &old, &new)
                    .context("Urban sprawl analysis failed")?;
                print_json(&report)?;
            }
            ChangeCommands::Water { scene } => {
                let aoi = parse_aoi(&scene.aoi)?;
                let image = read_period(&scene.image, &scene.period, &bands)?;
                let report = analysis(&config, vec![image])?
                    .water_bodies(&aoi, &parse_period(&scene.period)?)
                    .context("Water detection failed")?;
                print_json(&report)?;
            }
        },

        // ── Condition summaries ──────────────────────────────────────
        Commands::Vegetation { scene } => {
            let aoi = parse_aoi(&scene.aoi)?;
            let image = read_period(&scene.image, &scene.period, &bands)?;
            let report = analysis(&config, vec![image])?
                .vegetation(&aoi, &parse_period(&scene.period)?)
                .context("Vegetation analysis failed")?;
            print_json(&report)?;
        }
        Commands::Moisture { scene } => {
            let aoi = parse_aoi(&scene.aoi)?;
            let image = read_period(&scene.image, &scene.period, &bands)?;
            let report = analysis(&config, vec![image])?
                .soil_moisture(&aoi, &parse_period(&scene.period)?)
                .context("Soil moisture analysis failed")?;
            print_json(&report)?;
        }

        // ── Land cover ───────────────────────────────────────────────
        Commands::Train { input, model } => {
            let model_type: ModelType = model.parse()?;
            let composite = read_composite(&input, &bands)?;
            let pb = spinner(&format!("Training {} model...", model_type));
            let start = Instant::now();
            let report = classifier(&config)
                .train(&composite, model_type)
                .context("Training failed")?;
            pb.finish_and_clear();
            print_json(&report)?;
            println!(
                "Model saved to: {}",
                FileModelStore::new(&config.model_dir).path(model_type).display()
            );
            println!("  Processing time: {:.2?}", start.elapsed());
        }

        Commands::Classify {
            input,
            output,
            model,
            overlay,
        } => {
            let model_type: ModelType = model.parse()?;
            let composite = read_composite(&input, &bands)?;
            let pb = spinner("Classifying...");
            let start = Instant::now();
            let grid = classifier(&config)
                .classify(&composite, model_type)
                .context("Classification failed")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();

            GeoTiffStore
                .write_classes(&grid.raster, &output)
                .context("Failed to write output")?;
            done("Classification", &output, elapsed);
            print_json(&grid.distribution)?;

            if let Some(dir) = overlay {
                let (png, _) = render_overlay(&grid, &dir).context("Failed to render overlay")?;
                println!("Overlay saved to: {}", png.display());
            }
        }

        // ── Realtime session ─────────────────────────────────────────
        Commands::Realtime {
            input,
            model,
            session_id,
            output,
        } => {
            let mut request = TrainingRequest::new(
                session_id.unwrap_or_else(|| format!("cli-{}", std::process::id())),
                input,
            )
            .with_model_type(model.parse()?)
            .with_bands(bands);
            if let Some(output) = output {
                request = request.with_output_path(output);
            }

            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(run_session(&config, request))?;
        }
    }

    Ok(())
}

async fn run_session(config: &ServiceConfig, request: TrainingRequest) -> Result<()> {
    let manager = SessionManager::from_config(
        config,
        Arc::new(GeoTiffStore),
        Arc::new(FileModelStore::new(&config.model_dir)),
    );
    let session_id = request.session_id.clone();
    let mut events = manager.subscribe(&session_id);
    let ack = manager.start(request).await?;
    info!(session_id = %ack.session_id, "session accepted");

    let bar = stage_bar();
    let mut last = None;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "progress display fell behind");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        bar.set_prefix(event.stage.to_string());
        bar.set_position(event.progress as u64);
        bar.set_message(event.message.clone());
        let terminal = event.is_terminal();
        last = Some(event);
        if terminal {
            break;
        }
    }
    bar.finish_and_clear();
    manager.join(&session_id).await;

    match last {
        Some(event) if event.stage == Stage::Complete => {
            println!("{}", event.message);
            if let Some(data) = &event.data {
                print_json(data)?;
            }
            Ok(())
        }
        Some(event) => anyhow::bail!("Session {} failed: {}", session_id, event.message),
        None => anyhow::bail!("Session {} ended without a result", session_id),
    }
}
