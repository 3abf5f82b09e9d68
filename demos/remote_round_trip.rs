//! Remote clearing example.
//!
//! Starts a compute server on a loopback port, submits a few randomly
//! generated jobs through a client, and checks each result against a local
//! run.

use network_clearing::clearing::engine::ClearingEngine;
use network_clearing::net::client::ComputeClient;
use network_clearing::net::config::{ClientConfig, ServerConfig};
use network_clearing::net::server::ComputeServer;
use network_clearing::simulation::stress_test::{generate_random_network, NetworkConfig};
use std::thread;
use std::time::Instant;

fn main() -> network_clearing::error::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let server = ComputeServer::bind(ServerConfig {
        host: "127.0.0.1".to_string(),
        ..ServerConfig::default().with_port(0)
    })?;
    let addr = server.local_addr()?;
    thread::spawn(move || server.serve());

    let mut client = ComputeClient::new(ClientConfig::new("127.0.0.1", addr.port()))?;
    let engine = ClearingEngine::default();

    for period in 0..5 {
        let job = generate_random_network(&NetworkConfig {
            node_count: 5_000,
            seed: Some(u64::from(period)),
            iteration: period,
            ..Default::default()
        });
        let (local, _) = engine.clear(job.clone())?;

        let started = Instant::now();
        let remote = client.submit(job)?;
        println!(
            "period {}: {} defaults, remote run took {:?}, matches local: {}",
            period,
            remote.defaulted_nodes().len(),
            started.elapsed(),
            remote == local
        );
    }

    println!("\n{} jobs cleared remotely", client.submitted());
    Ok(())
}
