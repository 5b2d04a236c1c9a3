//! # Meanfield CLI
//!
//! Command-line interface for mean-field analysis of LIF population networks.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use meanfield_core::{ParameterMap, Quantity};
use meanfield_lif::MatrixSelector;
use meanfield_network::io::parse_override;
use meanfield_network::{JsonArchive, KeySelection, Network, WorkingPoint};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meanfield")]
#[command(author = "Yatrogenesis")]
#[command(version = "0.1.0")]
#[command(about = "Mean-field analysis of spiking population networks", long_about = None)]
struct Cli {
    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Directory of the result archive (default: $MEANFIELD_RESULTS_DIR or .)
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Setup {
    /// Network parameter file (YAML)
    network: PathBuf,

    /// Analysis parameter file (YAML)
    analysis: PathBuf,

    /// Override a network parameter, e.g. `g=5` or `tau_m=20ms`
    #[arg(long = "set", value_name = "NAME=VALUE")]
    network_overrides: Vec<String>,

    /// Override an analysis parameter, e.g. `df=0.5Hz`
    #[arg(long = "set-analysis", value_name = "NAME=VALUE")]
    analysis_overrides: Vec<String>,

    /// Archive all computed results afterwards
    #[arg(long)]
    save: bool,

    /// File name (without extension) for --save
    #[arg(long, requires = "save")]
    output: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stationary firing rates, mean and standard deviation of the input
    WorkingPoint {
        #[command(flatten)]
        setup: Setup,
    },

    /// Transfer functions and power spectra over the analysis frequencies
    Spectra {
        #[command(flatten)]
        setup: Setup,
    },

    /// Eigenvalues of the effective connectivity or the propagator
    Eigen {
        #[command(flatten)]
        setup: Setup,
        /// Matrix to analyse: MH, prop or prop_inv
        #[arg(short, long, default_value = "MH")]
        matrix: String,
    },

    /// Sensitivity of the critical eigenmode to each connection
    Sensitivity {
        #[command(flatten)]
        setup: Setup,
        /// Frequency in Hz
        #[arg(short, long, allow_hyphen_values = true)]
        freq: f64,
    },

    /// Working points for several values of one network parameter
    Sweep {
        #[command(flatten)]
        setup: Setup,
        /// Parameter to vary
        #[arg(short, long)]
        parameter: String,
        /// Values, each optionally with a unit, e.g. `4 4.5 5`
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        values: Vec<String>,
    },

    /// List results already computed and archived for a parameter set
    Show {
        #[command(flatten)]
        setup: Setup,
    },
}

fn overrides(assignments: &[String]) -> anyhow::Result<ParameterMap> {
    assignments
        .iter()
        .map(|a| parse_override(a).with_context(|| format!("invalid override '{}'", a)))
        .collect()
}

fn archive(results_dir: &Option<PathBuf>) -> JsonArchive {
    match results_dir {
        Some(dir) => JsonArchive::new(dir),
        None => JsonArchive::from_env(),
    }
}

fn build(setup: &Setup, results_dir: &Option<PathBuf>) -> anyhow::Result<Network> {
    Network::builder(setup.network.as_path(), setup.analysis.as_path())
        .archive(Arc::new(archive(results_dir)))
        .network_overrides(overrides(&setup.network_overrides)?)
        .analysis_overrides(overrides(&setup.analysis_overrides)?)
        .build()
        .with_context(|| format!("failed to set up network from {}", setup.network.display()))
}

fn finish(network: &Network, setup: &Setup) -> anyhow::Result<()> {
    finish_as(network, setup, setup.output.as_deref())
}

fn finish_as(network: &Network, setup: &Setup, output: Option<&str>) -> anyhow::Result<()> {
    if setup.save {
        let path = network
            .save(&KeySelection::All, output)
            .context("failed to save results")?;
        if let Some(path) = path {
            println!("{} {}", "Saved results to".green().bold(), path.display());
        }
    }
    Ok(())
}

/// One archive file per swept value when an explicit name is given
fn sweep_output_name(output: Option<&str>, parameter: &str, value: &str) -> Option<String> {
    output.map(|name| format!("{}_{}_{}", name, parameter, value))
}

fn population_names(network: &Network, n: usize) -> Vec<String> {
    match network.network_params().get("populations") {
        Some(meanfield_core::ParamValue::TextList(names)) if names.len() == n => names.clone(),
        _ => (0..n).map(|i| i.to_string()).collect(),
    }
}

fn print_working_point(names: &[String], wp: &WorkingPoint) {
    println!("  {:>8} {:>12} {:>12} {:>12}", "pop", "rate (Hz)", "mu (mV)", "sigma (mV)");
    for (i, name) in names.iter().enumerate() {
        println!(
            "  {:>8} {:>12.4} {:>12.4} {:>12.4}",
            name.cyan(),
            wp.firing_rates[i],
            wp.mu[i] * 1e3,
            wp.sigma[i] * 1e3
        );
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::WorkingPoint { setup } => {
            let mut network = build(setup, &cli.results_dir)?;
            let wp = network.working_point()?;
            println!("{}", "Working point:".green().bold());
            print_working_point(&population_names(&network, wp.firing_rates.len()), &wp);
            finish(&network, setup)?;
        }

        Commands::Spectra { setup } => {
            let mut network = build(setup, &cli.results_dir)?;
            let omegas = network.analysis_params().omegas()?;
            let transfer = network.transfer_function(None)?;
            let power = network.power_spectra()?;
            let names = population_names(&network, power.ncols());

            println!("{}", "Power spectra (|H| in Hz/mV, power in Hz^2/Hz):".green().bold());
            print!("  {:>10}", "f (Hz)");
            for name in &names {
                print!(" {:>12} {:>12}", format!("|H| {}", name), format!("P {}", name));
            }
            println!();
            for (f, omega) in omegas.iter().enumerate() {
                print!("  {:>10.3}", omega / (2.0 * std::f64::consts::PI));
                for p in 0..names.len() {
                    print!(" {:>12.4} {:>12.4e}", transfer[[f, p]].norm() * 1e-3, power[[f, p]]);
                }
                println!();
            }
            finish(&network, setup)?;
        }

        Commands::Eigen { setup, matrix } => {
            let selector: MatrixSelector = matrix.parse()?;
            let mut network = build(setup, &cli.results_dir)?;
            let omegas = network.analysis_params().omegas()?;
            let values = network.eigenvalue_spectra(selector)?;

            println!("{} {}", "Eigenvalues of".green().bold(), selector.to_string().cyan());
            for (f, omega) in omegas.iter().enumerate() {
                let row: Vec<String> = values
                    .row(f)
                    .iter()
                    .map(|v| format!("{:+.4}{:+.4}i", v.re, v.im))
                    .collect();
                println!("  {:>10.3} Hz  {}", omega / (2.0 * std::f64::consts::PI), row.join("  "));
            }
            finish(&network, setup)?;
        }

        Commands::Sensitivity { setup, freq } => {
            let mut network = build(setup, &cli.results_dir)?;
            let measure = network.sensitivity_measure(Quantity::hz(*freq))?;
            let names = population_names(&network, measure.sensitivity_amp.nrows());

            println!(
                "{} {} Hz (eigenvalue {:.4}{:+.4}i)",
                "Sensitivity at".green().bold(),
                freq,
                measure.critical_eigenvalue.re,
                measure.critical_eigenvalue.im
            );
            for (label, matrix) in [("amplitude", &measure.sensitivity_amp), ("frequency", &measure.sensitivity_freq)] {
                println!("  {}", label.yellow());
                print!("  {:>8}", "");
                for name in &names {
                    print!(" {:>9}", name);
                }
                println!();
                for (i, row) in matrix.rows().into_iter().enumerate() {
                    print!("  {:>8}", names[i].cyan());
                    for v in row {
                        print!(" {:>9.4}", v);
                    }
                    println!();
                }
            }
            finish(&network, setup)?;
        }

        Commands::Sweep { setup, parameter, values } => {
            let base = build(setup, &cli.results_dir)?;
            let changes = values
                .iter()
                .map(|v| parse_override(&format!("{}={}", parameter, v)).map(|(_, value)| (v.clone(), value)))
                .collect::<Result<Vec<_>, _>>()?;

            tracing::info!(parameter = %parameter, count = changes.len(), "starting sweep");
            let rows = Mutex::new(Vec::with_capacity(changes.len()));
            changes.par_iter().try_for_each(|(label, value)| -> anyhow::Result<()> {
                let mut changed = ParameterMap::new();
                changed.insert(parameter.clone(), value.clone());
                let mut network = base.change_parameters(changed, ParameterMap::new())?;
                let wp = network.working_point()?;
                let output = sweep_output_name(setup.output.as_deref(), parameter, label);
                finish_as(&network, setup, output.as_deref())?;
                rows.lock().push((label.clone(), wp));
                Ok(())
            })?;

            let mut rows = rows.into_inner();
            rows.sort_by_key(|(label, _)| values.iter().position(|v| v == label));
            for (label, wp) in &rows {
                println!("{} {} = {}", "Working point for".green().bold(), parameter, label.cyan());
                print_working_point(&population_names(&base, wp.firing_rates.len()), wp);
            }
        }

        Commands::Show { setup } => {
            let network = build(setup, &cli.results_dir)?;
            let results = network.list_computed_results();
            if results.is_empty() {
                println!("{}", "No results computed for this parameter set".yellow());
            } else {
                println!("{}", "Computed results:".green().bold());
                for name in results {
                    println!("  {}", name.cyan());
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_output_names_are_distinct() {
        let names: Vec<_> = ["4", "4.5", "5"]
            .iter()
            .map(|v| sweep_output_name(Some("run"), "g", v))
            .collect();
        assert_eq!(names[0].as_deref(), Some("run_g_4"));
        assert_eq!(names[1].as_deref(), Some("run_g_4.5"));
        assert_ne!(names[0], names[2]);
    }

    #[test]
    fn test_sweep_without_output_keeps_hashed_names() {
        assert_eq!(sweep_output_name(None, "g", "4"), None);
    }

    #[test]
    fn test_sweep_accepts_output_flag() {
        let cli = Cli::try_parse_from([
            "meanfield", "sweep", "net.yaml", "ana.yaml", "--save", "--output", "run", "-p", "g", "4", "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Sweep { setup, parameter, values } => {
                assert_eq!(setup.output.as_deref(), Some("run"));
                assert_eq!(parameter, "g");
                assert_eq!(values, vec!["4", "5"]);
            }
            _ => panic!("expected the sweep subcommand"),
        }
    }
}
