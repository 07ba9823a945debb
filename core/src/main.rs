use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;

use pfloc::config::ConfigFile;
use pfloc::logging::init_logger;
use pfloc::sim::{ScenarioConfig, ScenarioRecord, run_scenario};
use pfloc::{ResamplingAlgorithm, ResamplingTrigger};

/// Closed-loop particle filter localization in a simulated landmark world.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario configuration file (.json, .yaml, .yml or .toml); defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Number of particles
    #[arg(long)]
    particles: Option<usize>,
    /// Seed for the robot, the controls and the filter
    #[arg(long)]
    seed: Option<u64>,
    /// Number of simulated steps
    #[arg(long)]
    steps: Option<usize>,
    /// Resampling algorithm: multinomial, stratified, systematic or residual
    #[arg(long)]
    resampling: Option<String>,
    /// Resampling trigger: always, max_weight or effective_sample_size
    #[arg(long)]
    trigger: Option<String>,
    /// Trigger threshold (max weight, or fraction of N for the effective sample size)
    #[arg(long)]
    threshold: Option<f64>,
    /// Write one CSV row per cycle to this file instead of printing a table
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Write the effective configuration to this file before running
    #[arg(long)]
    save_config: Option<PathBuf>,
    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Log file path (if not specified, logs to stderr)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Load the scenario and apply command line overrides.
fn build_scenario(cli: &Cli) -> Result<ScenarioConfig> {
    let mut scenario = match &cli.config {
        Some(path) => ScenarioConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ScenarioConfig::default(),
    };
    if let Some(particles) = cli.particles {
        scenario.filter.num_particles = particles;
    }
    if let Some(seed) = cli.seed {
        scenario.seed = seed;
        scenario.filter.seed = seed;
    }
    if let Some(steps) = cli.steps {
        scenario.steps = steps;
    }
    if let Some(name) = &cli.resampling {
        scenario.filter.resampling = name.parse::<ResamplingAlgorithm>()?;
    }
    match (&cli.trigger, cli.threshold) {
        (Some(name), threshold) => {
            scenario.filter.trigger = ResamplingTrigger::from_name(name, threshold)?;
        }
        (None, Some(threshold)) => {
            let current = scenario.filter.trigger.name();
            if current == "always" {
                bail!("--threshold has no effect on the 'always' trigger");
            }
            scenario.filter.trigger = ResamplingTrigger::from_name(current, Some(threshold))?;
        }
        (None, None) => {}
    }
    scenario.validate()?;
    Ok(scenario)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_deref()).context("failed to initialize logger")?;

    let scenario = build_scenario(&cli)?;
    if let Some(path) = &cli.save_config {
        scenario
            .to_file(path)
            .with_context(|| format!("failed to write configuration to {}", path.display()))?;
        info!("Wrote configuration to {}", path.display());
    }

    let records = run_scenario(&scenario)?;
    let mean_error =
        records.iter().map(|r| r.position_error).sum::<f64>() / records.len().max(1) as f64;
    let resampled = records.iter().filter(|r| r.resampled).count();
    if let Some(last) = records.last() {
        info!(
            "Finished {} steps: final position error {:.3} m, mean position error {:.3} m, resampled {} times",
            records.len(),
            last.position_error,
            mean_error,
            resampled
        );
    }

    match &cli.output {
        Some(path) => {
            ScenarioRecord::to_csv(&records, path)
                .with_context(|| format!("failed to write results to {}", path.display()))?;
            info!("Wrote {} records to {}", records.len(), path.display());
        }
        None => {
            println!(
                "{:>5} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>9}",
                "step", "true_x", "true_y", "est_x", "est_y", "pos_err", "hdg_err", "ess", "resampled"
            );
            for r in &records {
                println!(
                    "{:>5} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {:>8.1} {:>9}",
                    r.step,
                    r.true_x,
                    r.true_y,
                    r.estimate_x,
                    r.estimate_y,
                    r.position_error,
                    r.heading_error,
                    r.effective_sample_size,
                    r.resampled
                );
            }
        }
    }
    Ok(())
}
