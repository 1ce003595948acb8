//! Tunnel configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

/// Send allowance both handshake paths grant the peer once a tunnel is up (64 MiB).
pub const DEFAULT_TUNNEL_BUFFER: usize = 64 * 1024 * 1024;

/// Chunk limit offered to accepting sides by the loopback relay (64 KiB).
pub const DEFAULT_CHUNK_LIMIT: usize = 64 * 1024;

/// Configuration shared by every tunnel of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Bytes of send allowance granted to the peer right after construction.
    pub initial_allowance: usize,
    /// Maximum payload per chunk chosen for tunnels accepted through the loopback relay.
    pub chunk_limit: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            initial_allowance: DEFAULT_TUNNEL_BUFFER,
            chunk_limit: DEFAULT_CHUNK_LIMIT,
        }
    }
}

impl TunnelConfig {
    /// Loads a configuration from a `.json` or `.toml` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: TunnelConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| TunnelError::Config {
                reason: e.to_string(),
            })?,
            "json" => serde_json::from_str(&contents).map_err(|e| TunnelError::Config {
                reason: e.to_string(),
            })?,
            other => {
                return Err(TunnelError::Config {
                    reason: format!("unsupported config format: {:?}", other),
                })
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the limits can actually move data.
    pub fn validate(&self) -> Result<()> {
        if self.initial_allowance == 0 {
            return Err(TunnelError::Config {
                reason: "initial_allowance must be positive".to_string(),
            });
        }
        if self.chunk_limit == 0 {
            return Err(TunnelError::Config {
                reason: "chunk_limit must be positive".to_string(),
            });
        }
        Ok(())
    }
}
