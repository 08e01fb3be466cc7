//! Wirenet - Electrical Network Solver
//!
//! Builds a network from a netlist, runs a number of ticks and prints the
//! resulting node voltages and wire currents.
//!
//! # Usage
//!
//! ```bash
//! wirenet grid.net --ticks 10 -vv
//! ```

use std::path::PathBuf;

use clap::Parser;
use log::{info, warn, LevelFilter};
use wirenet_core::{
    error::Result,
    netlist::{self, BuiltNetwork},
    network::validate_network,
    NetworkConfig, SolverConfig,
};

/// Incremental electrical network solver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the netlist file
    #[arg(value_name = "NETLIST")]
    netlist: PathBuf,

    /// Number of ticks to simulate
    #[arg(short, long, default_value_t = 1)]
    ticks: usize,

    /// Relative residual at which the solver stops
    #[arg(long, default_value_t = wirenet_core::solver::CONVERGENCE_TOLERANCE)]
    tolerance: f64,

    /// Log the full MNA system on every rebuild (needs -vvv)
    #[arg(long)]
    log_matrices: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let ast = netlist::parse_file(&args.netlist)?;
    let config = NetworkConfig::new()
        .with_solver(SolverConfig::new().with_tolerance(args.tolerance))
        .with_matrix_logging(args.log_matrices);
    let BuiltNetwork {
        mut network,
        nodes,
        wires,
    } = netlist::build(&ast, config)?;

    for issue in validate_network(&network) {
        warn!("{}", issue);
    }

    for tick in 0..args.ticks {
        let report = network.calculate();
        info!(
            "tick {}: {} iterations{}{}{}",
            tick,
            report.iterations,
            if report.rebuilt { ", rebuilt" } else { "" },
            if report.direct { ", direct" } else { "" },
            if report.converged { "" } else { ", not converged" },
        );
    }

    println!("{:<16} {:>14} {:>14}", "node", "voltage (V)", "current (A)");
    for (name, &id) in &nodes {
        let voltage = network.voltage(id).unwrap_or(0.0);
        match network.source_current(id) {
            Some(current) => println!("{:<16} {:>14.6} {:>14.6}", name, voltage, current),
            None => println!("{:<16} {:>14.6} {:>14}", name, voltage, "-"),
        }
    }

    println!();
    println!("{:<16} {:>14} {:>14}", "wire", "drop (V)", "current (A)");
    for (name, &id) in &wires {
        let drop = network.potential_difference(id).unwrap_or(0.0);
        let current = network.wire_current(id).unwrap_or(0.0);
        println!("{:<16} {:>14.6} {:>14.6}", name, drop, current);
    }

    Ok(())
}
