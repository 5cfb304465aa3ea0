//! rtslsim: replay scripted kernel-event workloads through the analyzer.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rtsl::{load_workload, Sim, SimFormat, WindowKind};

/// Replay scripted kernel-event workloads through the latency analyzer.
#[derive(Parser)]
#[command(name = "rtslsim", version)]
struct Cli {
    /// Path to a JSON workload file.
    workload: PathBuf,

    /// Override the workload's CPU count.
    #[arg(short, long)]
    cpus: Option<u32>,

    /// Print every emitted record, not just the maxima summary.
    #[arg(long)]
    dump_records: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(&cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let json = std::fs::read_to_string(&cli.workload)
        .with_context(|| format!("failed to read {}", cli.workload.display()))?;

    let scenario = load_workload(&json, cli.cpus)
        .with_context(|| format!("failed to parse {}", cli.workload.display()))?;

    let sim = Sim::new(scenario.nr_cpus());
    sim.enable().context("failed to enable the analyzer")?;
    sim.run(&scenario);
    sim.disable();

    if cli.dump_records {
        sim.log().dump();
    }

    println!("records: {}", sim.log().len());
    for (name, kind) in [
        ("max_poid", WindowKind::Poid),
        ("max_paie", WindowKind::Paie),
        ("max_psd", WindowKind::Psd),
        ("max_dst", WindowKind::Dst),
    ] {
        match sim.log().last_max(kind) {
            Some(ns) => println!("{name:>8}: {ns} ns"),
            None => println!("{name:>8}: -"),
        }
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .event_format(SimFormat)
        .try_init();
}
