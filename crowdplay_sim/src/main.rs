//! Crowdplay Simulator CLI
//!
//! Run deterministic session lifecycle scenarios.

use clap::Parser;
use crowdplay_sim::scenarios::ScenarioId;
use crowdplay_sim::{ScenarioResult, ScenarioRunner};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Crowdplay Deterministic Simulation CLI
#[derive(Parser, Debug)]
#[command(name = "crowdplay-sim")]
#[command(about = "Run deterministic session scenarios for Crowdplay", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Sessions for multi-session scenarios
    #[arg(short = 'n', long, default_value = "4")]
    sessions: usize,

    /// Scenario to run (vote_cycle, tie_break, idle_expiry, crash_isolation,
    /// stop_resume, force_stop, publish_retry, vote_storm, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the run (ballots, notices, metrics) to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Keep session checkpoints as files instead of in memory
    #[arg(long)]
    file_checkpoints: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Crowdplay Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(1);
            }
        }
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        info!("Running with export to: {}", export_path);
        let runner = ScenarioRunner::new(base_seed, args.sessions)
            .with_file_checkpoints(args.file_checkpoints);
        let (result, export) = runner.run_with_export(scenarios[0]);

        if let Err(e) = export.write_to_file(export_path) {
            error!("Failed to write export: {:?}", e);
        } else {
            info!(
                "Exported {} sessions to {}",
                export.sessions.len(),
                export_path
            );
        }

        report(&result);
        if !result.passed {
            std::process::exit(1);
        }
        return;
    }

    // Run simulations
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner =
            ScenarioRunner::new(seed, args.sessions).with_file_checkpoints(args.file_checkpoints);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                report(&result);
            }
            if !result.passed {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "sessions": r.sessions,
                    "time_secs": r.final_time_secs,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to render summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            // List failed seeds
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED | ballots={} polls={} t={:.0}s",
            result.scenario.name(),
            result.seed,
            result.metrics.ballots_published,
            result.metrics.polls,
            result.final_time_secs
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}
