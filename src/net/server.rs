//! Compute server: one thread and one job per accepted connection.
//!
//! Handlers share nothing. Each owns its socket, its decoded job and its
//! engine run, and the job's storage is released as soon as the result has
//! been written. Thread count is not bounded; the server expects a single
//! orchestrator submitting one job per simulated period.

use crate::clearing::engine::ClearingEngine;
use crate::error::{ErrorKind, Result};
use crate::net::config::ServerConfig;
use crate::wire::codec::{CodecOptions, Decoder, Encoder};
use log::{debug, error, info, warn};
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Instant;

/// What a handler did with one connection's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub iteration: u32,
    pub nodes: usize,
    pub rounds: u32,
    pub defaulted: usize,
}

pub struct ComputeServer {
    listener: TcpListener,
    config: ServerConfig,
}

impl ComputeServer {
    /// Validate the configuration and bind the listening socket.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind((config.host.as_str(), config.port))?;
        info!("compute server listening on {}", listener.local_addr()?);
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, handing each to its own thread.
    ///
    /// Failures on a single connection are logged by its handler and never
    /// reach this loop.
    pub fn serve(&self) -> Result<()> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => self.spawn_handler(stream),
                Err(e) => error!("accept failed: {}", e),
            }
        }
        Ok(())
    }

    fn spawn_handler(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());
        let options = self.config.codec;
        let engine = ClearingEngine::new(self.config.engine);

        let spawned = thread::Builder::new()
            .name(format!("clearing-{}", peer))
            .spawn(move || match handle_connection(stream, &options, &engine) {
                Ok(report) => debug!("connection from {} closed after job {}", peer, report.iteration),
                Err(e) => warn!("connection from {} failed: {}", peer, e),
            });
        if let Err(e) = spawned {
            error!("could not spawn handler thread: {}", e);
        }
    }
}

/// Serve one connection: read a job, clear it, write the result or an
/// error frame, and close.
pub fn handle_connection(
    stream: TcpStream,
    options: &CodecOptions,
    engine: &ClearingEngine,
) -> Result<JobReport> {
    stream.set_nodelay(true)?;
    let started = Instant::now();

    let mut decoder = Decoder::new(BufReader::new(&stream), options.max_frame_len);
    let mut encoder = Encoder::new(BufWriter::new(&stream), *options);

    let outcome = decoder.read_job().and_then(|job| {
        let nodes = job.node_count();
        engine.clear(job).map(|cleared| (nodes, cleared))
    });

    let report = match outcome {
        Ok((nodes, (result, stats))) => {
            encoder.write_result(&result)?;
            let report = JobReport {
                iteration: result.iteration,
                nodes,
                rounds: stats.rounds,
                defaulted: stats.defaulted,
            };
            info!(
                "cleared job {}: {} nodes, {} rounds, {} defaults in {:?}",
                report.iteration,
                report.nodes,
                report.rounds,
                report.defaulted,
                started.elapsed()
            );
            report
        }
        Err(err) => {
            if err.kind() != ErrorKind::Io {
                if let Err(send_err) = encoder.write_error(err.kind(), &err.to_string()) {
                    debug!("could not report error to peer: {}", send_err);
                }
            }
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("shutdown after failed job: {}", e);
            }
            return Err(err);
        }
    };

    drop(encoder);
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        debug!("shutdown after job {}: {}", report.iteration, e);
    }
    Ok(report)
}
