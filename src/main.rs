use molsim::{bench_gravity, bench_step};
use molsim::{Scenario, ScenarioConfig};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    /// Scenario file under `scenarios/`
    #[arg(short, default_value = "galaxy.yaml")]
    file_name: String,

    /// Override the scenario's step count
    #[arg(long)]
    steps: Option<usize>,

    /// Override the scenario's worker count
    #[arg(long)]
    threads: Option<usize>,

    /// Run the timing harness instead of a scenario
    #[arg(long)]
    bench: bool,
}

// load here to keep main clean
fn load_scenario_from_yaml(file_name: &str) -> Result<ScenarioConfig> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(file_name);
    let file = File::open(&config_path).with_context(|| format!("opening {}", config_path.display()))?;
    let reader = BufReader::new(file);
    let scenario_cfg: ScenarioConfig = serde_yaml::from_reader(reader)?;
    Ok(scenario_cfg)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if args.bench {
        bench_gravity();
        bench_step(4000, 10)?;
        return Ok(());
    }

    let mut scenario_cfg = load_scenario_from_yaml(&args.file_name)?;
    if let Some(steps) = args.steps {
        scenario_cfg.engine.steps = steps;
    }
    if let Some(threads) = args.threads {
        scenario_cfg.engine.threads = threads;
    }

    let mut scenario = Scenario::build_scenario(scenario_cfg)?;
    if let Some(opts) = &scenario.relax {
        scenario.simulation.relax(opts)?;
    }

    for _ in 0..scenario.steps {
        scenario.simulation.step()?;
    }

    let ctx = scenario.simulation.context();
    info!(
        steps = ctx.step,
        live_links = scenario.simulation.store().link_count(),
        total_new_links = ctx.total_new_links,
        total_dead_links = ctx.total_dead_links,
        "run finished"
    );
    Ok(())
}
