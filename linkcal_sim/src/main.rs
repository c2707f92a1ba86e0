//! linkcal simulator CLI
//!
//! Runs a detection threshold calibration sweep, a PRACH detection sweep or
//! a PUSCH BLER sweep with the reference PHY chain.

use clap::{Parser, ValueEnum};
use linkcal_core::{ChannelKind, DecoderKind, PrachSimConfig, PrachTestType, PuschSimConfig};
use linkcal_env::PreambleFormat;
use linkcal_sim::{
    CalibrationSweep, ConfigTable, JsonTableStore, ReferencePrachSimulator,
    ReferencePuschSimulator, SeedSequence, SweepError, SweepSettings,
};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Threshold calibration sweep over the standard configuration table
    Calibrate,
    /// PRACH detection or false-alarm sweep
    Prach,
    /// PUSCH block error rate sweep
    Pusch,
}

/// linkcal link-level simulator
#[derive(Parser, Debug)]
#[command(name = "linkcal-sim")]
#[command(about = "Link-level Monte-Carlo PHY evaluation and calibration", long_about = None)]
struct Args {
    /// What to run
    #[arg(short, long, value_enum, default_value = "calibrate")]
    mode: Mode,

    /// Master seed (overrides the settings file)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Sweep settings (JSON)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Calibration table file; an existing table is resumed
    #[arg(short, long, default_value = "prach_calibration.json")]
    output: PathBuf,

    /// Target false-alarm probability (overrides the settings file)
    #[arg(long)]
    target_pfa: Option<f64>,

    /// Preamble format (0, 1, 2, 3, A1, ..., C2)
    #[arg(long, default_value = "0")]
    format: PreambleFormat,

    /// Receive antennas
    #[arg(short, long, default_value = "1")]
    antennas: usize,

    /// Channel (AWGN, TDLA30, TDLB100, TDLC300)
    #[arg(short, long, default_value = "AWGN")]
    channel: ChannelKind,

    /// Run a false-alarm test instead of a detection test
    #[arg(long)]
    false_alarm: bool,

    /// Detection threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// PUSCH decoder (soft, hard)
    #[arg(long, default_value = "soft")]
    decoder: DecoderKind,

    /// SNR values in dB, comma separated
    #[arg(
        long,
        value_delimiter = ',',
        allow_hyphen_values = true,
        default_value = "-14.2,-12,-10"
    )]
    snr: Vec<f64>,

    /// Trials per SNR point
    #[arg(short, long, default_value = "1000")]
    trials: usize,

    /// Disable early stopping
    #[arg(long)]
    full: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output on stdout
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let outcome = match args.mode {
        Mode::Calibrate => run_calibration(&args),
        Mode::Prach => run_prach(&args),
        Mode::Pusch => run_pusch(&args),
    };

    if let Err(e) = outcome {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn load_settings(args: &Args) -> Result<SweepSettings, SweepError> {
    let mut settings = match &args.settings {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => SweepSettings::default(),
    };
    if let Some(seed) = args.seed {
        settings.seed = seed;
    }
    if let Some(target) = args.target_pfa {
        settings.target_pfa = target;
    }
    if args.full {
        settings.quick_simulation = false;
    }
    Ok(settings)
}

fn run_calibration(args: &Args) -> Result<(), SweepError> {
    let settings = load_settings(args)?;
    let table = ConfigTable::standard();
    let mut store = JsonTableStore::new(&args.output);

    info!(
        "Calibrating {} configurations, target PFA {}, seed {}",
        table.len(),
        settings.target_pfa,
        settings.seed
    );
    let sweep = CalibrationSweep::new(settings)?;
    let summary = sweep.run(&table, &mut store)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!(
            "Done: {} rows computed, {} resumed, {} trials -> {}",
            summary.rows_computed,
            summary.rows_resumed,
            summary.trials_executed,
            args.output.display()
        );
    }
    Ok(())
}

fn run_prach(args: &Args) -> Result<(), SweepError> {
    let mut config = PrachSimConfig::new(args.format)
        .with_rx_antennas(args.antennas)
        .with_channel(args.channel)
        .with_quick_simulation(!args.full);
    if args.false_alarm {
        config = config.with_test_type(PrachTestType::FalseAlarm);
    }
    if let Some(threshold) = args.threshold {
        config = config.with_threshold(threshold);
    }

    let mut sim = ReferencePrachSimulator::reference(SeedSequence::new(args.seed.unwrap_or(42)));
    sim.configure(config)?;
    sim.set_display_simulation_info(!args.json)?;
    sim.step(&args.snr, args.trials)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(sim.results())?);
    }
    Ok(())
}

fn run_pusch(args: &Args) -> Result<(), SweepError> {
    let config = PuschSimConfig::default()
        .with_rx_antennas(args.antennas)
        .with_channel(args.channel)
        .with_decoder(args.decoder)
        .with_quick_simulation(!args.full);

    let mut sim = ReferencePuschSimulator::reference(SeedSequence::new(args.seed.unwrap_or(42)));
    sim.configure(config)?;
    sim.set_display_simulation_info(!args.json)?;
    sim.step(&args.snr, args.trials)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(sim.results())?);
    }
    Ok(())
}
