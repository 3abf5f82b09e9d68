//! Configuration for the compute server and client.

use crate::clearing::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::wire::codec::CodecOptions;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 9109;

/// Compute server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to listen on
    #[serde(default = "default_listen_host")]
    pub host: String,

    /// Listening port; 0 picks a free port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Framing of results sent back to clients
    #[serde(default)]
    pub codec: CodecOptions,

    /// Clearing engine tuning
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: DEFAULT_PORT,
            codec: CodecOptions::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_codec(&self.codec)?;
        let tolerance = self.engine.tolerance;
        if tolerance.is_nan() || tolerance < 0.0 || self.engine.max_sweeps == 0 {
            return Err(Error::Config(format!(
                "engine tolerance must be non-negative and max_sweeps positive, got {} and {}",
                self.engine.tolerance, self.engine.max_sweeps
            )));
        }
        Ok(())
    }
}

/// Compute client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Compute server host name or address
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Compute server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Framing of jobs sent to the server
    #[serde(default)]
    pub codec: CodecOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: DEFAULT_PORT,
            connect_timeout_ms: default_connect_timeout_ms(),
            codec: CodecOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Resolve the configured server to socket addresses.
    pub fn server_addrs(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("cannot resolve {}:{}: {}", self.host, self.port, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::Config(format!(
                "{}:{} resolved to no addresses",
                self.host, self.port
            )));
        }
        Ok(addrs)
    }

    pub fn connect_timeout(&self) -> Result<Duration> {
        if self.connect_timeout_ms == 0 {
            return Err(Error::Config("connect timeout must be positive".into()));
        }
        Ok(Duration::from_millis(self.connect_timeout_ms))
    }

    pub fn validate(&self) -> Result<()> {
        validate_codec(&self.codec)?;
        self.connect_timeout()?;
        Ok(())
    }
}

fn validate_codec(codec: &CodecOptions) -> Result<()> {
    if codec.nodes_per_frame == 0 || codec.values_per_frame == 0 {
        return Err(Error::Config("frames must carry at least one node".into()));
    }
    if codec.max_frame_len < 64 || codec.max_frame_len > u32::MAX as usize {
        return Err(Error::Config(format!(
            "max frame length {} is outside 64..={}",
            codec.max_frame_len,
            u32::MAX
        )));
    }
    Ok(())
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
