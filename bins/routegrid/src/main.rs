use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gridroute::{
    Coord, Grid, GridDims, GridRouter, RouterConfig, RoutingPart, RoutingReport, SearchOutcome,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    routegrid(args)
}

/// Arguments to [`routegrid`].
#[derive(Parser)]
#[command(
    version,
    about,
    long_about = "Route the wires of a TOML job file over a partitioned grid"
)]
pub struct Args {
    /// The path to the job file.
    job: PathBuf,
    /// Overrides the number of worker threads.
    #[arg(short, long)]
    threads: Option<usize>,
    /// Overrides the number of grid regions.
    #[arg(short, long)]
    regions: Option<usize>,
    /// Prints the routed grid.
    #[arg(short, long)]
    draw: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Job {
    #[serde(default)]
    router: RouterConfig,
    grid: GridSpec,
    #[serde(default)]
    wire: Vec<WireSpec>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GridSpec {
    width: i64,
    height: i64,
    #[serde(default)]
    blocked: Vec<(i64, i64)>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WireSpec {
    name: Option<String>,
    from: (i64, i64),
    to: (i64, i64),
}

/// Loads the job named by `args`, routes it and prints the result.
pub fn routegrid(args: Args) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.job)
        .with_context(|| format!("Failed to read job file {:?}.", args.job))?;
    let job: Job = toml::from_str(&text).with_context(|| "Failed to parse job file.")?;

    let mut config = job.router;
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(regions) = args.regions {
        config.regions = regions;
    }

    let grid = Arc::new(Grid::with_blocked(
        GridDims::new(job.grid.width, job.grid.height),
        job.grid.blocked.into_iter().map(Coord::from),
    ));
    let names = job
        .wire
        .iter()
        .enumerate()
        .map(|(i, w)| w.name.clone().unwrap_or_else(|| format!("wire{i}")))
        .collect::<Vec<_>>();
    let wires = job
        .wire
        .iter()
        .enumerate()
        .map(|(i, w)| RoutingPart::new(i, w.from, w.to));

    let router = GridRouter::new(config).with_context(|| "Invalid router configuration.")?;
    let report = router
        .route(grid.clone(), wires)
        .with_context(|| "Routing failed.")?;

    for (id, outcome) in &report.outcomes {
        let name = &names[*id];
        match outcome {
            SearchOutcome::Found(path) => println!(
                "{name}: {} steps, {} turns, cost {}",
                path.moves(),
                path.turns(),
                path.cost
            ),
            SearchOutcome::NoPath => println!("{name}: no path"),
            SearchOutcome::NeedsHandoff => println!("{name}: needs hand-off"),
            SearchOutcome::NodeLimit => println!("{name}: node limit reached"),
        }
    }
    let stats = report.stats;
    println!(
        "routed {}/{} wires over {} regions ({} retried, {} failed, {} awaiting hand-off), wirelength {}",
        stats.routed,
        report.outcomes.len(),
        stats.regions,
        stats.retried,
        stats.failed,
        stats.handoffs,
        stats.wirelength
    );

    if args.draw {
        print!("{}", draw(&grid, &report));
    }
    Ok(())
}

/// Renders the grid with the top row first.
///
/// Blocked tiles are `#`, free tiles `.` and routed tiles the last digit of
/// their wire id.
fn draw(grid: &Grid, report: &RoutingReport) -> String {
    let dims = grid.dims();
    let mut rows = vec![vec!['.'; dims.width as usize]; dims.height as usize];
    for tile in grid.blocked().iter().filter(|&t| grid.in_bounds(t)) {
        rows[tile.y as usize][tile.x as usize] = '#';
    }
    for (id, path) in report.routes() {
        let mark = char::from_digit((id % 10) as u32, 10).unwrap_or('*');
        for tile in &path.tiles {
            rows[tile.y as usize][tile.x as usize] = mark;
        }
    }
    rows.iter()
        .rev()
        .map(|row| row.iter().collect::<String>() + "\n")
        .collect()
}
