use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use dvs_autobias::config::{load_config, save_config, Config, SensorConfig};
use dvs_autobias::local::client::{print_bias_table, print_help, StdinCommands, TerminalDisplay};
use dvs_autobias::local::process_file::{self, OfflineWindow};
use dvs_autobias::recording::CsvSinkOpener;
use dvs_autobias::sensor::{read_biases, PlaybackDriver, SensorDriver, SimulatedDriver};
use dvs_autobias::Session;

#[derive(Parser)]
#[command(name = "dvs-autobias")]
#[command(about = "Event-camera raster and autobias loop", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live loop on the configured (simulated) sensors
    Run {
        /// YAML configuration; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration_s: Option<f64>,
    },

    /// Print the six biases of every configured sensor
    Biases {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Replay CSV recordings through the filter and raster path
    Play {
        /// Recording files
        #[arg(required = true)]
        recordings: Vec<PathBuf>,

        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Sensor time handed out per tick
        #[arg(long, default_value_t = 10_000)]
        slice_us: i64,
    },

    /// Keep the rows of a window whose time offset from its first row is
    /// within a threshold
    Offline {
        input: PathBuf,

        #[arg(long, default_value_t = 0)]
        start: usize,

        #[arg(long, default_value_t = 1_000_000)]
        max_rows: usize,

        #[arg(long, default_value_t = 5_000)]
        threshold_us: i64,

        /// Where to write the selection
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Write the default configuration as YAML
    Config { path: PathBuf },
}

fn read_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

fn run_session(config: Config, driver: &dyn SensorDriver, duration_s: Option<f64>) -> anyhow::Result<()> {
    let mut display = TerminalDisplay::new(
        config.autobias.low_rate_threshold,
        config.autobias.high_rate_threshold,
    );
    let mut session = Session::open(config, driver, Arc::new(CsvSinkOpener)).context("opening session")?;

    let stop = Arc::new(AtomicBool::new(false));
    if let Some(seconds) = duration_s {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));
            stop.store(true, Ordering::Relaxed);
        });
    }

    print_help();
    for (serial, biases) in session.biases() {
        match biases {
            Ok(biases) => print_bias_table(&serial, &biases),
            Err(e) => eprintln!("{} {}: {}", "error".red().bold(), serial, e),
        }
    }

    let mut commands = StdinCommands::spawn();
    session.run(&mut display, &mut commands, &stop);
    session.close();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, duration_s } => {
            let config = read_config(config.as_deref())?;
            init_tracing(&config.logging.level);
            let driver = SimulatedDriver::new(config.simulation.clone());
            run_session(config, &driver, duration_s)?;
        }
        Commands::Biases { config } => {
            let config = read_config(config.as_deref())?;
            init_tracing(&config.logging.level);
            let driver = SimulatedDriver::new(config.simulation.clone());
            for sensor in &config.sensors {
                let mut device = driver
                    .open(&sensor.serial)
                    .with_context(|| format!("opening {}", sensor.serial))?;
                let biases = read_biases(device.as_ref())?;
                print_bias_table(device.serial(), &biases);
                device.close()?;
            }
        }
        Commands::Play {
            recordings,
            config,
            slice_us,
        } => {
            let mut config = read_config(config.as_deref())?;
            init_tracing(&config.logging.level);
            config.sensors = recordings
                .iter()
                .map(|path| SensorConfig {
                    serial: path.to_string_lossy().into_owned(),
                })
                .collect();
            // Recordings have no live registers to steer.
            config.autobias.enabled = false;
            config.session.enable_frames = false;
            run_session(config, &PlaybackDriver::new(slice_us), None)?;
        }
        Commands::Offline {
            input,
            start,
            max_rows,
            threshold_us,
            out,
        } => {
            init_tracing("info");
            let window = OfflineWindow {
                start_index: start,
                max_rows,
                threshold_us,
            };
            let selected = process_file::run(&input, window, out.as_deref())
                .with_context(|| format!("filtering {}", input.display()))?;
            println!(
                "{} kept {} events (start {}, max {} rows, dt <= {} us)",
                "→".green().bold(),
                selected.len(),
                start,
                max_rows,
                threshold_us
            );
        }
        Commands::Config { path } => {
            save_config(&Config::default(), &path)?;
            println!("{} wrote {}", "→".green().bold(), path.display());
        }
    }

    Ok(())
}
