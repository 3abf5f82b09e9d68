//! Compute client: ships one job per connection and blocks for its result.

use crate::core::job::ClearingJob;
use crate::core::result::ClearingResult;
use crate::error::{Error, Result};
use crate::net::config::ClientConfig;
use crate::wire::codec::{Decoder, Encoder};
use log::{debug, info};
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Instant;

/// Submits clearing jobs to a remote compute server.
///
/// `submit` takes `&mut self`, so a client has at most one job in flight.
/// Every job gets a fresh connection.
pub struct ComputeClient {
    config: ClientConfig,
    submitted: u64,
}

impl ComputeClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            submitted: 0,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Jobs that completed successfully through this client.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Send `job` to the server and wait for its clearing result.
    ///
    /// The job is dropped as soon as it has been written, before the client
    /// blocks on the reply. There is no timeout once connected.
    pub fn submit(&mut self, job: ClearingJob) -> Result<ClearingResult> {
        let started = Instant::now();
        let iteration = job.iteration;
        let nodes = job.node_count();
        let stream = self.connect()?;
        stream.set_nodelay(true)?;

        let mut decoder = Decoder::new(BufReader::new(&stream), self.config.codec.max_frame_len);
        let sent = {
            let mut encoder = Encoder::new(BufWriter::new(&stream), self.config.codec);
            encoder.write_job(&job)
        };
        drop(job);

        if let Err(write_err) = sent {
            // The server may have stopped reading because it rejected the job.
            return Err(match decoder.read_result() {
                Err(remote @ Error::Remote { .. }) => remote,
                _ => write_err,
            });
        }
        stream.shutdown(Shutdown::Write)?;
        debug!("job {} sent, waiting for result", iteration);

        let result = decoder.read_result()?;
        if result.iteration != iteration {
            return Err(Error::protocol(format!(
                "sent job {} but received result {}",
                iteration, result.iteration
            )));
        }
        if result.node_count() != nodes {
            return Err(Error::protocol(format!(
                "sent {} nodes but received a result for {}",
                nodes,
                result.node_count()
            )));
        }

        self.submitted += 1;
        info!(
            "job {} cleared remotely: {} nodes in {:?}",
            iteration,
            nodes,
            started.elapsed()
        );
        Ok(result)
    }

    fn connect(&self) -> Result<TcpStream> {
        let timeout = self.config.connect_timeout()?;
        let mut last_err = None;
        for addr in self.config.server_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(match last_err {
            Some(e) => Error::Io(e),
            None => Error::Config(format!("no address for {}", self.config.host)),
        })
    }
}

/// Submit one job to the server at `server_addr` with default settings.
pub fn submit(job: ClearingJob, server_addr: SocketAddr) -> Result<ClearingResult> {
    let config = ClientConfig::new(server_addr.ip().to_string(), server_addr.port());
    ComputeClient::new(config)?.submit(job)
}
