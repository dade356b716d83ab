//! mailstorm binary
//!
//! Invocation surface for the harness: load runs by profile and target,
//! baseline capture and comparison, and a target health probe. Individual
//! operation failures never fail the process; the only non-zero exits are
//! `baseline compare --strict` after a threshold breach and an unhealthy
//! probe.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use mailstorm::logging::LoggingSystem;
use mailstorm::{BaselinePipeline, BaselineStore, Config, Harness, Profile, TargetSelector};

/// Synthetic load and baseline regression harness for the mail platform
#[derive(Parser)]
#[command(name = "mailstorm")]
#[command(about = "Load generation and performance baseline harness")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive synthetic load and print a run summary
    Run {
        /// Concurrency and duration preset
        #[arg(long, value_enum, default_value_t = Profile::Standard)]
        profile: Profile,
        /// Which protocol mix to drive
        #[arg(long, value_enum, default_value_t = TargetSelector::All)]
        target: TargetSelector,
        /// Also write the machine-readable summary to this path
        #[arg(long)]
        report: Option<PathBuf>,
        /// Print JSON instead of the textual report
        #[arg(long)]
        json: bool,
    },
    /// Capture or compare performance baselines
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },
    /// Probe target health and readiness
    Probe,
}

#[derive(Subcommand)]
enum BaselineAction {
    /// Run repeated measurement iterations and persist an averaged baseline
    Establish {
        #[arg(long)]
        environment: String,
        /// Override the configured iteration count
        #[arg(long)]
        iterations: Option<usize>,
        #[arg(long, value_enum, default_value_t = TargetSelector::All)]
        target: TargetSelector,
    },
    /// Measure once and report drift against the stored baseline
    Compare {
        #[arg(long)]
        environment: String,
        /// Exit non-zero when a threshold is breached
        #[arg(long)]
        strict: bool,
        /// Print JSON instead of the textual report
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = LoggingSystem::new(config.clone()).initialize() {
        eprintln!("logging setup failed: {e}");
        std::process::exit(2);
    }

    if let Err(exit_code) = execute(cli.command, config).await {
        std::process::exit(exit_code);
    }
}

async fn execute(command: Commands, mut config: Config) -> Result<(), i32> {
    match command {
        Commands::Run {
            profile,
            target,
            report,
            json,
        } => {
            let harness = build_harness(config)?;
            let summary = harness.run(profile, target).await.map_err(fatal)?;

            if json {
                println!("{}", summary.to_json());
            } else {
                println!("{summary}");
            }
            if let Some(path) = report {
                std::fs::write(&path, summary.to_json()).map_err(fatal)?;
                println!("summary written to {}", path.display());
            }
            Ok(())
        }
        Commands::Baseline { action } => match action {
            BaselineAction::Establish {
                environment,
                iterations,
                target,
            } => {
                if let Some(n) = iterations {
                    config.baseline.iterations = n;
                }
                let pipeline = build_pipeline(config)?;
                let record = pipeline
                    .establish(&environment, &target.kinds())
                    .await
                    .map_err(fatal)?;
                println!(
                    "baseline v{} for {} captured over {} iterations ({} thresholds derived)",
                    record.version,
                    record.environment,
                    record.iterations,
                    record.thresholds.ceilings.len()
                );
                Ok(())
            }
            BaselineAction::Compare {
                environment,
                strict,
                json,
            } => {
                let pipeline = build_pipeline(config)?;
                let report = pipeline.compare(&environment).await.map_err(fatal)?;

                if json {
                    println!("{}", report.to_json());
                } else {
                    println!("{report}");
                }
                if strict && !report.passed {
                    return Err(1);
                }
                Ok(())
            }
        },
        Commands::Probe => {
            let harness = build_harness(config)?;
            let results = harness.probe().await;
            let mut all_healthy = true;
            for result in &results {
                println!(
                    "{:<12} {} ({})",
                    result.target.as_str(),
                    if result.healthy { "healthy" } else { "UNHEALTHY" },
                    result.detail
                );
                all_healthy &= result.healthy;
            }
            if all_healthy {
                Ok(())
            } else {
                Err(1)
            }
        }
    }
}

fn build_harness(config: Config) -> Result<Harness, i32> {
    Harness::new(config).map_err(fatal)
}

fn build_pipeline(config: Config) -> Result<BaselinePipeline, i32> {
    let store = BaselineStore::new(config.baseline.directory.clone());
    let baseline_config = config.baseline.clone();
    let harness = Arc::new(build_harness(config)?);
    Ok(BaselinePipeline::new(harness, store, baseline_config))
}

fn fatal(err: impl std::fmt::Display) -> i32 {
    error!("{err}");
    eprintln!("error: {err}");
    2
}
