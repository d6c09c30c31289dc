use std::{fs, io, path::PathBuf};

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use store_scan::{
    config::Config,
    journal::{write_output, Journal},
    locator::JsonLocator,
    progress::{BarReporter, LineReporter, LogReporter, ProgressReporter, Silent},
    Coordinate, GridScanner, LocatedStore, Retailer, StoreLookup, StoreSet,
};

#[derive(Debug, Parser)]
struct Cli {
    /// Scan job definitions
    #[arg(long, short, default_value = "scan.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan a retailer's store locator, resuming from its checkpoint
    Scan {
        retailer: Retailer,
        /// Ignore the checkpoint and stores from earlier runs
        #[arg(long)]
        fresh: bool,
        #[arg(long, value_enum, default_value_t = ProgressMode::Bar)]
        progress: ProgressMode,
    },
    /// Show grid size and checkpoint
    Status { retailer: Retailer },
    /// Forget the checkpoint and stores found so far
    Reset { retailer: Retailer },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressMode {
    Bar,
    /// Single status line, for terminals without bar support
    Line,
    Log,
    None,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Scan {
            retailer,
            fresh,
            progress,
        } => scan(&config, retailer, fresh, progress),
        Command::Status { retailer } => status(&config, retailer),
        Command::Reset { retailer } => reset(&config, retailer),
    }
}

fn scan(config: &Config, retailer: Retailer, fresh: bool, progress: ProgressMode) -> Result<()> {
    let job_config = config.job(retailer)?;
    let job = job_config.scan_job(retailer)?;
    let checkpoints = config.checkpoints(retailer)?;
    if fresh {
        checkpoints.clear(&job.name)?;
    }

    let total = job.grid.len();
    let reporter: Box<dyn ProgressReporter> = match progress {
        ProgressMode::Bar => Box::new(BarReporter::new(total)),
        ProgressMode::Line => Box::new(LineReporter::new(io::stderr())),
        ProgressMode::Log => Box::new(LogReporter::new(total / 100)),
        ProgressMode::None => Box::new(Silent),
    };
    let mut scanner = GridScanner::new(job, checkpoints, reporter)?;

    // stores from before the checkpoint only survive in the journal
    let (_, resumed) = scanner.resume_point();
    let (mut found, mut journal) =
        Journal::resume::<LocatedStore>(config.journal_path(retailer), resumed.is_some())?;

    let mut locator = JsonLocator::new(job_config.locator.clone())?;
    let mut lookup = |at: Coordinate| -> Result<Vec<LocatedStore>> {
        let stores = locator.lookup(at)?;
        journal.append(&stores)?;
        Ok(stores)
    };
    let result = scanner.run(&mut lookup, &mut found);

    // keep what was found even if the scan stopped early
    let output_path = config.output_path(retailer);
    write_output(&output_path, &found)?;
    let outcome = result.with_context(|| format!("{retailer} scan stopped, rerun to resume"))?;

    println!("# {retailer}");
    println!("- {} points scanned, {} failed", outcome.visited, outcome.failed);
    println!("- {} stores written to {}", found.len(), output_path.display());
    match outcome.checkpoint {
        Some(x) => println!("- checkpoint at {x}"),
        None => println!("- no checkpoint"),
    }

    ensure!(
        outcome.checkpoint_failures == 0,
        "{} checkpoint writes failed, a rerun may repeat finished points",
        outcome.checkpoint_failures
    );
    Ok(())
}

fn status(config: &Config, retailer: Retailer) -> Result<()> {
    let job = config.job(retailer)?.scan_job(retailer)?;
    let checkpoints = config.checkpoints(retailer)?;
    let grid = &job.grid;
    let (north, east) = grid.spacing_metres();

    println!("# {retailer}");
    println!(
        "- {} points, about {:.01}km apart north-south and {:.01}km east-west",
        grid.len(),
        north / 1000.0,
        east / 1000.0
    );

    let scanner = GridScanner::new(job.clone(), checkpoints, Silent)?;
    match scanner.resume_point() {
        (next, Some(at)) => {
            println!("- checkpoint at {at}");
            println!("- {} points remaining", grid.len() - next);
        }
        (_, None) => println!("- no checkpoint"),
    }

    let seen: Vec<LocatedStore> = Journal::load(&config.journal_path(retailer))?;
    let found: StoreSet<_> = seen.into_iter().collect();
    println!("- {} stores found so far", found.len());

    Ok(())
}

fn reset(config: &Config, retailer: Retailer) -> Result<()> {
    let checkpoints = config.checkpoints(retailer)?;
    checkpoints.clear(retailer.slug())?;

    let journal = config.journal_path(retailer);
    match fs::remove_file(&journal) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("failed to remove {}", journal.display())),
    }

    println!("reset {retailer}");
    Ok(())
}
