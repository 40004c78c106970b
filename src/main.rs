mod ambient;
mod area_matrix;
mod config;
mod diode;
mod geometry;
mod irradiance;
mod report;
mod shading;
mod stc;
mod tilt;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use uom::si::{
    angle::degree,
    f64::{Angle, HeatFluxDensity},
    heat_flux_density::watt_per_square_meter,
};

use ambient::{
    resolve_inputs, ClearSkyProvider, FixedTemperature, Site, TemperatureSource, TemperatureTable,
};
use config::{check_rear_albedo, SimulationConfig};
use report::{RunOutcome, RunReport};
use shading::SampleDensity;
use stc::{StcReport, StcSweep};
use tilt::{TiltDriver, TiltStrategy};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// JSON5 file with geometry, cell models and schedule
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more, repeat for more detail
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Site latitude in decimal degrees (-90 to 90)
    #[arg(long, allow_hyphen_values = true)]
    latitude: f64,
    /// Site longitude in decimal degrees (-180 to 180)
    #[arg(long, allow_hyphen_values = true)]
    longitude: f64,
    /// Share of the global horizontal light reaching the rear side
    #[arg(long)]
    rear_albedo: Option<f64>,
    /// Sample points per cell for the shading trace [default: batch_samples of the config]
    #[arg(long)]
    samples: Option<usize>,
    /// Evaluate the timesteps one after another instead of in parallel
    #[arg(long)]
    sequential: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare the analytic flat plate tilt with the best swept facet tilt
    BestTilt {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Compare the analytic flat plate tilt with a fixed facet tilt
    FixedTilt {
        #[command(flatten)]
        run: RunArgs,
        /// Facet module tilt in degrees
        #[arg(long)]
        tilt: f64,
    },
    /// Sweep tilts 0-100 degrees under standard test conditions
    Stc {
        /// Direct irradiance in W/m^2
        #[arg(long, default_value_t = 1000.0)]
        irradiance: f64,
        /// Ground reflected irradiance in W/m^2
        #[arg(long, default_value_t = 135.0)]
        albedo: f64,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SimulationConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading config");
            SimulationConfig::load(path)
        }
        None => Ok(SimulationConfig::default()),
    }
}

fn temperature_source(config: &SimulationConfig) -> Box<dyn TemperatureSource> {
    let fallback: Box<dyn TemperatureSource> =
        Box::new(FixedTemperature(config.fallback_temperature));
    match &config.temperature_table {
        Some(path) => match TemperatureTable::load(path) {
            Ok(table) => Box::new(table),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not load temperature table");
                fallback
            }
        },
        None => fallback,
    }
}

async fn run_tilt(
    config: SimulationConfig,
    run: &RunArgs,
    strategy: TiltStrategy,
) -> anyhow::Result<RunReport> {
    let site = Site::new(run.latitude, run.longitude)?;
    let rear_albedo = check_rear_albedo(run.rear_albedo.unwrap_or(config.rear_albedo))?;
    let density = match run.samples {
        Some(samples) => SampleDensity::new(samples)?,
        None => config.batch_samples,
    };

    let inputs = resolve_inputs(
        &site,
        &config.schedule,
        &ClearSkyProvider::default(),
        temperature_source(&config).as_ref(),
        config.fallback_temperature,
    )?;

    let driver = TiltDriver {
        geometry: config.geometry,
        shaded_cell: config.shaded_cell,
        flat_cell: config.flat_cell,
        density,
        ..TiltDriver::new(site.module_azimuth(), rear_albedo, strategy)
    };
    info!(
        timesteps = inputs.len(),
        samples = density.samples(),
        module_azimuth = driver.module_azimuth.get::<degree>(),
        sequential = run.sequential,
        "Starting tilt run"
    );
    if run.sequential {
        driver.run(&inputs)
    } else {
        Arc::new(driver).run_parallel(inputs).await
    }
}

fn run_stc(config: SimulationConfig, irradiance: f64, albedo: f64) -> anyhow::Result<StcReport> {
    let sweep = StcSweep {
        geometry: config.geometry,
        cell: config.stc_cell,
        density: config.reference_samples,
        ..StcSweep::default()
    };
    sweep.run(
        HeatFluxDensity::new::<watt_per_square_meter>(irradiance),
        HeatFluxDensity::new::<watt_per_square_meter>(albedo),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = load_config(args.config.as_ref());
    let json = match &args.command {
        Command::BestTilt { run } => {
            let result = match config {
                Ok(config) => {
                    let grid = config.tilt_grid;
                    run_tilt(config, run, TiltStrategy::Sweep(grid)).await
                }
                Err(e) => Err(e),
            };
            serde_json::to_string_pretty(&RunOutcome::from_result(result))?
        }
        Command::FixedTilt { run, tilt } => {
            let strategy = TiltStrategy::Fixed(Angle::new::<degree>(*tilt));
            let result = match config {
                Ok(config) => run_tilt(config, run, strategy).await,
                Err(e) => Err(e),
            };
            serde_json::to_string_pretty(&RunOutcome::from_result(result))?
        }
        Command::Stc { irradiance, albedo } => {
            let result = config.and_then(|config| run_stc(config, *irradiance, *albedo));
            serde_json::to_string_pretty(&RunOutcome::from_result(result))?
        }
    };
    println!("{}", json);

    anyhow::Result::Ok(())
}
