//! # Entropy Tuner - Command Line Front End
//!
//! Runs the entropy tuning engine on recorded piano profiles.
//!
//! ## Architecture
//! - **Main Thread**: argument parsing, progress display, file output
//! - **Worker Thread**: the tuning calculation
//! - **Communication**: a crossbeam channel carries progress events and the
//!   final curve back to the main thread

use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use log::info;
use tuner_core::{
    RecordingProfile, TuningConfig, TuningCurve, TuningEngine, TuningEvent, TuningProblem, ept,
    inharmonicity,
};

/// Compute an entropy-minimizing piano tuning curve from recorded partials
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Calculate a tuning curve for a recording profile
    Calculate {
        /// Path to the recording profile (JSON)
        profile: PathBuf,

        /// Configuration file (JSON); missing values use defaults
        #[arg(long)]
        config: Option<PathBuf>,

        /// Where to write the resulting curve; prints a table if omitted
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Seed for the random search
        #[arg(long)]
        seed: Option<u64>,

        /// Maximum number of optimizer generations
        #[arg(long)]
        generations: Option<usize>,

        /// Threads used to evaluate candidates
        #[arg(long)]
        workers: Option<usize>,

        /// Reference key index (overrides the profile)
        #[arg(long)]
        reference_key: Option<usize>,
    },
    /// Show recorded fundamentals and inharmonicity per key
    Inspect {
        /// Path to the recording profile (JSON)
        profile: PathBuf,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Convert an Entropy Piano Tuner key export into a recording profile
    ConvertEpt {
        /// EPT key list (JSON)
        input: PathBuf,
        /// Recording profile to write
        output: PathBuf,
    },
    /// Print the default configuration as JSON
    DefaultConfig,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Calculate {
            profile,
            config,
            output,
            seed,
            generations,
            workers,
            reference_key,
        } => {
            let mut config = load_config(config.as_deref())?;
            if seed.is_some() {
                config.optimizer.seed = seed;
            }
            if let Some(generations) = generations {
                config.optimizer.max_generations = generations;
            }
            if let Some(workers) = workers {
                config.optimizer.workers = workers;
            }

            let mut profile = RecordingProfile::load(&profile)?;
            if let Some(reference_key) = reference_key {
                profile.reference_key = reference_key;
            }
            let problem = TuningProblem::from_profile(&profile)?;
            let engine = TuningEngine::new(problem, config)?;

            let curve = calculate_on_worker(engine)?;
            match output {
                Some(path) => write_curve(&curve, &path)?,
                None => print_curve(&curve),
            }
        }
        Commands::Inspect { profile, config } => {
            let config = load_config(config.as_deref())?;
            let profile = RecordingProfile::load(&profile)?;
            let mut problem = TuningProblem::from_profile(&profile)?;
            inharmonicity::estimate_all(&mut problem, &config.inharmonicity);
            print_inspection(&problem);
        }
        Commands::ConvertEpt { input, output } => {
            let profile = ept::load(&input)?;
            profile.save(&output)?;
            info!(
                "[MAIN] Wrote {} measured keys to {}",
                profile.measurements.len(),
                output.display()
            );
        }
        Commands::DefaultConfig => {
            let json = serde_json::to_string_pretty(&TuningConfig::default())?;
            println!("{json}");
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<TuningConfig> {
    match path {
        Some(path) => TuningConfig::load(path),
        None => Ok(TuningConfig::default()),
    }
}

/// Runs the engine on its own thread and renders progress until it finishes.
fn calculate_on_worker(engine: TuningEngine) -> Result<TuningCurve> {
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let worker = thread::spawn(move || {
        let mut sink = event_tx;
        engine.run(&mut sink)
    });

    follow_progress(&event_rx);
    worker.join().map_err(|_| anyhow!("tuning worker panicked"))
}

/// Prints progress lines until the finished event arrives or the worker hangs up.
fn follow_progress(events: &Receiver<TuningEvent>) {
    let mut stderr = std::io::stderr();
    for event in events.iter() {
        match event {
            TuningEvent::Progress { percent, message } => {
                let _ = write!(stderr, "\r[{percent:5.1}%] {message:<60}");
                let _ = stderr.flush();
            }
            TuningEvent::Finished(_) => break,
        }
    }
    let _ = writeln!(stderr);
}

fn write_curve(curve: &TuningCurve, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(curve).context("Failed to serialize tuning curve")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write curve: {:?}", path))?;
    info!("[MAIN] Tuning curve ({}) written to {}", curve.method, path.display());
    Ok(())
}

fn print_curve(curve: &TuningCurve) {
    println!("Method: {}", curve.method);
    if let Some(search) = &curve.search {
        println!(
            "Cost: {:.6} after {} generations / {} evaluations{}",
            search.cost,
            search.generations,
            search.evaluations,
            if search.converged { " (converged)" } else { "" }
        );
    }
    println!("{:<4} {:<5} {:>12} {:>10} {:>12}", "Key", "Name", "Target Hz", "Cents", "Recorded");
    for key in &curve.keys {
        let recorded = key
            .recorded_deviation_cents
            .map(|c| format!("{c:+.2}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<4} {:<5} {:>12.3} {:>+10.2} {:>12}",
            key.index, key.name, key.frequency, key.offset_cents, recorded
        );
    }
}

fn print_inspection(problem: &TuningProblem) {
    println!(
        "{:<4} {:<5} {:>9} {:>12} {:>10} {:>10}",
        "Key", "Name", "Partials", "Fundamental", "Cents", "B"
    );
    for key in problem.recorded_keys() {
        let fundamental = key.recorded_fundamental().unwrap_or(f64::NAN);
        let cents = key.recorded_deviation_cents().unwrap_or(f64::NAN);
        let b = key
            .inharmonicity
            .map(|b| format!("{b:.6}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<4} {:<5} {:>9} {:>12.3} {:>+10.2} {:>10}",
            key.index,
            key.name,
            key.partials.len(),
            fundamental,
            cents,
            b
        );
    }
    println!("{} of {} keys recorded", problem.recorded_count(), problem.len());
}
