//! Configuration handling for the netcore echo server.
//!
//! This module reads the YAML config file and environment variables,
//! providing a unified configuration interface.

use anyhow::Result;
use netcore_session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::{info, warn};

/// Echo server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetcoreConfig {
    /// Listen address
    pub listen: SocketAddr,
    /// Session settings
    pub session: SessionSettings,
}

/// Session settings as they appear in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Maximum bytes requested per socket read
    pub chunk_size: usize,
    /// Maximum retained receive bytes (0 = unlimited)
    pub max_receive_buffer: usize,
    /// Set TCP_NODELAY on accepted sockets
    pub no_delay: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            chunk_size: defaults.chunk_size,
            max_receive_buffer: defaults.max_receive_buffer,
            no_delay: defaults.no_delay,
        }
    }
}

impl Default for NetcoreConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 1111)),
            session: SessionSettings::default(),
        }
    }
}

impl NetcoreConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<Self>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?} ({}), using defaults",
                        config_path.as_ref(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {:?} not found, using defaults", config_path.as_ref());
                Self::default()
            }
            Err(e) => {
                warn!(
                    "Failed to read config file {:?} ({}), using defaults",
                    config_path.as_ref(),
                    e
                );
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Final configuration: listen={}, chunk_size={}, max_receive_buffer={}, no_delay={}",
            config.listen,
            config.session.chunk_size,
            config.session.max_receive_buffer,
            config.session.no_delay
        );

        Ok(config)
    }

    /// Session configuration for the server
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            chunk_size: self.session.chunk_size,
            max_receive_buffer: self.session.max_receive_buffer,
            no_delay: self.session.no_delay,
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(listen) = std::env::var("NETCORE_LISTEN") {
            match listen.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.listen = addr;
                    info!("Listen address overridden by environment: {}", addr);
                }
                Err(e) => warn!("Ignoring invalid NETCORE_LISTEN {:?}: {}", listen, e),
            }
        }

        if let Ok(limit) = std::env::var("NETCORE_MAX_RECEIVE_BUFFER") {
            if let Ok(limit) = limit.parse::<usize>() {
                self.session.max_receive_buffer = limit;
                info!("Receive buffer limit overridden by environment: {}", limit);
            }
        }

        if let Ok(no_delay) = std::env::var("NETCORE_NO_DELAY") {
            self.session.no_delay = no_delay.to_lowercase() == "true";
            info!("TCP_NODELAY overridden by environment: {}", self.session.no_delay);
        }
    }
}
