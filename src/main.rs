//! network-clearing CLI
//!
//! Run the compute server, submit jobs to it, or clear jobs locally.
//!
//! # Usage
//!
//! ```bash
//! # Run a compute server
//! network-clearing serve --port 9109
//!
//! # Generate a random job and clear it on a server
//! network-clearing generate --nodes 1000 --output job.json
//! network-clearing submit --input job.json --host compute-1 --port 9109
//!
//! # Clear locally, JSON output
//! network-clearing compute --input job.json --format json
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use network_clearing::clearing::engine::ClearingEngine;
use network_clearing::clearing::summary::ClearingSummary;
use network_clearing::core::job::ClearingJob;
use network_clearing::core::result::ClearingResult;
use network_clearing::error::{Error, Result};
use network_clearing::net::client::ComputeClient;
use network_clearing::net::config::{ClientConfig, ServerConfig, DEFAULT_PORT};
use network_clearing::net::server::ComputeServer;
use network_clearing::simulation::stress_test::{generate_random_network, NetworkConfig};
use network_clearing::wire::frame::Compression;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

/// Clearing payment vectors for networks of defaulting agents
#[derive(Parser)]
#[command(name = "network-clearing", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the compute server
    Serve {
        /// Interface to listen on
        #[arg(long, env = "CLEARING_HOST", default_value = "0.0.0.0")]
        host: String,

        /// Listening port
        #[arg(short, long, env = "CLEARING_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Compression for result frames: none, gzip or deflate
        #[arg(long, env = "CLEARING_COMPRESSION", default_value = "gzip")]
        compression: Compression,

        /// Liability rows per data frame
        #[arg(long, default_value_t = 256)]
        nodes_per_frame: usize,
    },

    /// Send a job to a compute server and print the result
    Submit {
        /// Path to a JSON job file
        #[arg(short, long)]
        input: PathBuf,

        /// Compute server host
        #[arg(long, env = "CLEARING_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Compute server port
        #[arg(short, long, env = "CLEARING_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Connect timeout in milliseconds
        #[arg(long, env = "CLEARING_CONNECT_TIMEOUT_MS", default_value_t = 10_000)]
        connect_timeout_ms: u64,

        /// Compression for job frames: none, gzip or deflate
        #[arg(long, env = "CLEARING_COMPRESSION", default_value = "gzip")]
        compression: Compression,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Clear a job in this process
    Compute {
        /// Path to a JSON job file
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Generate a random job (for testing)
    Generate {
        /// Number of nodes
        #[arg(long, default_value_t = 100)]
        nodes: usize,

        /// Average creditors per node
        #[arg(long, default_value_t = 4)]
        edges_per_node: usize,

        /// Seed for a reproducible network
        #[arg(long)]
        seed: Option<u64>,

        /// Iteration id stamped on the job
        #[arg(long, default_value_t = 0)]
        iteration: u32,

        /// Write to file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn load_job(path: &Path) -> Result<ClearingJob> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))
}

fn print_result(totals: &[f64], result: &ClearingResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(result).map_err(std::io::Error::from)?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            println!("{}", ClearingSummary::new(totals, result));
            println!("{:>8} {:>16} {:>16} {:>8}", "node", "paid", "equity", "default");
            for node in 0..result.node_count() {
                let round = result.default_order_of_node[node];
                println!(
                    "{:>8} {:>16.2} {:>16.2} {:>8}",
                    node,
                    result.clearing_payment_vector[node],
                    result.equity_of_node[node],
                    if round == 0 { "-".to_string() } else { round.to_string() }
                );
            }
        }
    }
    Ok(())
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Serve {
            host,
            port,
            compression,
            nodes_per_frame,
        } => {
            let mut config = ServerConfig {
                host,
                port,
                ..Default::default()
            };
            config.codec.compression = compression;
            config.codec.nodes_per_frame = nodes_per_frame;
            ComputeServer::bind(config)?.serve()
        }
        Command::Submit {
            input,
            host,
            port,
            connect_timeout_ms,
            compression,
            format,
        } => {
            let job = load_job(&input)?;
            let totals = job.total_liabilities();
            let mut config = ClientConfig::new(host, port);
            config.connect_timeout_ms = connect_timeout_ms;
            config.codec.compression = compression;
            let result = ComputeClient::new(config)?.submit(job)?;
            print_result(&totals, &result, format)
        }
        Command::Compute { input, format } => {
            let job = load_job(&input)?;
            let totals = job.total_liabilities();
            let started = Instant::now();
            let (result, stats) = ClearingEngine::default().clear(job)?;
            info!(
                "cleared {} nodes in {} rounds ({} sweeps) in {:?}",
                result.node_count(),
                stats.rounds,
                stats.sweeps,
                started.elapsed()
            );
            print_result(&totals, &result, format)
        }
        Command::Generate {
            nodes,
            edges_per_node,
            seed,
            iteration,
            output,
        } => {
            let config = NetworkConfig {
                node_count: nodes,
                avg_liabilities_per_node: edges_per_node,
                seed,
                iteration,
                ..Default::default()
            };
            let job = generate_random_network(&config);
            let json = serde_json::to_string_pretty(&job).map_err(std::io::Error::from)?;
            match output {
                Some(path) => {
                    fs::write(&path, json)?;
                    eprintln!(
                        "Generated {} liabilities across {} nodes → {}",
                        job.liability_graph.edge_count(),
                        nodes,
                        path.display()
                    );
                }
                None => println!("{}", json),
            }
            Ok(())
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
