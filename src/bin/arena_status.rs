use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mapheap::{
    allocate, attach, check, detach, initialize, inspect, lookup, release, status, Address, ArenaConfig, ArenaGrowth,
    ArenaId, ArenaStatus, BlockInfo, HeapRegion, HeapReport, ObjectDirectory, Provenance, ReservedRegion,
};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arena-status")]
#[command(about = "Exercise a mapheap arena and report its state as JSON", long_about = None)]
struct Cli {
    /// Arena config as JSON (defaults apply to missing fields)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bytes of address space to reserve for the arena
    #[arg(long, default_value_t = 64 << 20)]
    reserve: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a mixed allocation workload and report the arena
    Workload {
        /// Allocate/release rounds
        #[arg(long, default_value_t = 256)]
        rounds: usize,
    },
    /// Run the workload, copy the arena to a new base and re-attach it
    Relocate {
        /// Allocate/release rounds before the move
        #[arg(long, default_value_t = 64)]
        rounds: usize,
    },
}

#[derive(Serialize)]
struct Report {
    status: ArenaStatus,
    heap: HeapReport,
    named: Vec<(String, Option<BlockInfo>)>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => ArenaConfig::default(),
    };

    let region = ReservedRegion::new(cli.reserve).context("reserving arena address space")?;
    let arena = attach(region, ObjectDirectory::default(), config.clone());
    initialize(arena, Provenance::New)?;

    let report = match cli.command {
        Commands::Workload { rounds } => {
            let names = run_workload(arena, rounds)?;
            report(arena, &names)?
        }
        Commands::Relocate { rounds } => {
            let names = run_workload(arena, rounds)?;
            let detached = detach(arena)?;
            // SAFETY: the arena is detached and nothing else maps it.
            let image = unsafe { detached.region.mapped_bytes() }.to_vec();
            let moved = HeapRegion::from_image(&image, cli.reserve).context("allocating relocation buffer")?;
            let arena = attach(moved, detached.directory, config);
            initialize(arena, Provenance::Existing)?;
            report(arena, &names)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Allocates a mix of fragment and block sizes, naming every eighth object
/// and releasing every third. Returns the names still live.
fn run_workload(arena: ArenaId, rounds: usize) -> Result<Vec<String>> {
    const SIZES: [usize; 6] = [8, 100, 700, 2048, 5000, 20_000];

    let mut live: Vec<Address> = Vec::new();
    let mut names = Vec::new();
    for round in 0..rounds {
        let size = SIZES[round % SIZES.len()];
        let name = (round % 8 == 0).then(|| format!("object-{round}"));
        let address = allocate(arena, size, name.as_deref())
            .with_context(|| format!("allocating {size} bytes in round {round}"))?;
        if let Some(name) = name {
            names.push(name);
        } else if round % 3 == 0 {
            release(address)?;
            continue;
        }
        live.push(address);
    }
    tracing::info!(arena = %arena, live = live.len(), named = names.len(), "workload finished");
    Ok(names)
}

fn report(arena: ArenaId, names: &[String]) -> Result<Report> {
    let named = names
        .iter()
        .map(|name| {
            let info = lookup(arena, name)?.map(inspect).transpose()?;
            Ok((name.clone(), info))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Report {
        status: status(arena)?,
        heap: check(arena)?,
        named,
    })
}
