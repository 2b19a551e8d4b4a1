// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! # Roboplay CLI
//!
//! Command-line front-end for the playback engine.
//!
//! ## Usage
//!
//! ```sh
//! # Show recording summary
//! roboplay info file.mcap
//!
//! # Print messages of two consecutive bags merged by time
//! roboplay cat part1.bag part2.bag --topics /imu,/tf --limit 20
//!
//! # Latest message per topic at a time
//! roboplay backfill file.db3 --time 1700000000.5
//!
//! # Play in real time at double speed
//! roboplay play file.ulg --speed 2.0
//! ```

mod cmd;
mod common;

use std::process;

use clap::{Parser, Subcommand};
use cmd::{BackfillCmd, CatCmd, InfoCmd, PlayCmd};
use common::Result;
use tracing_subscriber::EnvFilter;

/// Roboplay - Playback engine for robotics recordings
///
/// Reads MCAP, ROS1 bag, rosbag2 db3 and PX4 ULog recordings.
/// Format auto-detection means you rarely need to specify file types.
#[derive(Parser, Clone)]
#[command(name = "roboplay")]
#[command(about = "Playback engine for robotics recordings", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "ArcheBase")]
struct Cli {
    /// Increase log verbosity
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Parse on the calling thread instead of a worker
    #[arg(long, global = true)]
    no_worker: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Clone)]
enum Commands {
    /// Show recording summary (time range, topics, alerts)
    Info(InfoCmd),

    /// Print messages in receive-time order
    Cat(CatCmd),

    /// Print the latest message per topic at a time
    Backfill(BackfillCmd),

    /// Play through the player in real time
    Play(PlayCmd),
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info(cmd) => cmd.run(cli.no_worker),
        Commands::Cat(cmd) => cmd.run(cli.no_worker),
        Commands::Backfill(cmd) => cmd.run(cli.no_worker),
        Commands::Play(cmd) => cmd.run(cli.no_worker),
    }
}

fn main() {
    let result = run();

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
