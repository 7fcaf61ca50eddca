use anyhow::Result;
use clap::{Parser, Subcommand};
use forecaster::{
    commands::{evaluate, forecast, forecast_sector, import_series, sectors},
    config::ForecastSettings,
    context::AppContext,
    forecast::DEFAULT_HORIZON_DAYS,
    models::TrainingWindow,
    sectors::Sector,
};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forecaster")]
#[command(about = "Recursive multi-day price forecasts from sector model pairs")]
struct Cli {
    /// Path to the market data snapshot file
    #[arg(long = "data-file", value_name = "PATH", global = true)]
    data_file: Option<PathBuf>,
    /// Directory holding lgbm_<sector>_<window>.txt model files
    #[arg(long = "model-dir", value_name = "PATH", global = true)]
    model_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast one instrument and print both tracks as JSON
    Forecast {
        /// Instrument identifier, e.g. AAPL
        instrument: String,
        /// Number of days to forecast (1..=180)
        #[arg(long, default_value_t = DEFAULT_HORIZON_DAYS)]
        horizon: usize,
        /// Seed for reproducible noise
        #[arg(long)]
        seed: Option<u64>,
        /// Lower bound of the noise scale factor (0..=1)
        #[arg(long = "noise-level")]
        noise_level: Option<f64>,
    },
    /// Forecast every instrument of a sector in parallel
    ForecastSector {
        /// Sector name: tech, finance or health
        sector: Sector,
        /// Number of days to forecast (1..=180)
        #[arg(long, default_value_t = DEFAULT_HORIZON_DAYS)]
        horizon: usize,
    },
    /// Score a model's one-step-ahead predictions over stored history
    Evaluate {
        instrument: String,
        /// Training window of the model to score
        #[arg(long, default_value = "historical")]
        window: TrainingWindow,
    },
    /// Convert a JSON price series file into a market data snapshot
    ImportSeries {
        /// JSON file mapping instrument ids to price rows
        #[arg(short, long, value_name = "PATH")]
        input: PathBuf,
        /// Destination for the snapshot (defaults to the configured data file)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// List sectors and their instruments
    Sectors,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli {
        data_file,
        model_dir,
        command,
    } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = ForecastSettings::from_env()?;
    let app_context = AppContext::initialize(settings, data_file, model_dir);
    info!("Starting forecaster. Not financial advice.");

    match command {
        Commands::Forecast {
            instrument,
            horizon,
            seed,
            noise_level,
        } => {
            forecast::run(&app_context, &instrument, horizon, seed, noise_level).await?;
        }
        Commands::ForecastSector { sector, horizon } => {
            forecast_sector::run(&app_context, sector, horizon).await?;
        }
        Commands::Evaluate { instrument, window } => {
            evaluate::run(&app_context, &instrument, window).await?;
        }
        Commands::ImportSeries { input, output } => {
            let output_path =
                output.unwrap_or_else(|| app_context.market_data_file().to_path_buf());
            import_series::run(&input, &output_path).await?;
        }
        Commands::Sectors => {
            sectors::run()?;
        }
    }

    Ok(())
}
