use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use crate::network::DEFAULT_HEADER_SIZE;
use crate::{AppError, AppResult};

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_backlog() -> i32 {
    100
}

fn default_buffer_size() -> usize {
    1024
}

/// Validated engine configuration, immutable after `start`.
///
/// `buffer_size` is the per-connection receive window B; `max_connections`
/// is the connection cap N. The engine allocates exactly B·N receive bytes
/// up front.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, CopyGetters)]
pub struct EngineConfig {
    #[serde(default = "default_host")]
    #[getset(get = "pub")]
    host: String,

    #[getset(get_copy = "pub")]
    port: u16,

    #[serde(default = "default_backlog")]
    #[getset(get_copy = "pub")]
    backlog: i32,

    #[serde(default = "default_buffer_size")]
    #[getset(get_copy = "pub")]
    buffer_size: usize,

    #[getset(get_copy = "pub")]
    max_connections: usize,
}

impl EngineConfig {
    pub fn new(port: u16, max_connections: usize) -> Self {
        EngineConfig {
            host: default_host(),
            port,
            backlog: default_backlog(),
            buffer_size: default_buffer_size(),
            max_connections,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Loads configuration from a TOML/YAML/JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| AppError::Configuration("non-utf8 config file path".into()))?;
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;
        let engine_config: EngineConfig = settings.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Checks every field before any socket is opened.
    pub fn validate(&self) -> AppResult<()> {
        if self.port == 0 {
            return Err(AppError::Configuration("port must be in 1..65535".into()));
        }
        if self.buffer_size <= DEFAULT_HEADER_SIZE {
            return Err(AppError::Configuration(format!(
                "buffer size {} cannot hold a frame header",
                self.buffer_size
            )));
        }
        if self.max_connections == 0 {
            return Err(AppError::Configuration(
                "maximum number of connections must be positive".into(),
            ));
        }
        if self.backlog <= 0 {
            return Err(AppError::Configuration(format!(
                "backlog {} must be positive",
                self.backlog
            )));
        }
        self.resolve()?;
        Ok(())
    }

    /// Resolves the configured host and port to a bind address.
    pub fn resolve(&self) -> AppResult<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| AppError::Configuration(format!("unresolvable host {}: {e}", self.host)))?
            .next()
            .ok_or_else(|| {
                AppError::Configuration(format!("host {} resolved to no address", self.host))
            })
    }
}
