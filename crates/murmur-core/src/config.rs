//! Server configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which inference backend the server wires at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Persistent MLX Python daemon over a Unix socket.
    Sidecar,
    /// In-process sine-tone backend for smoke testing.
    Tone,
}

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,

    /// Inference backend selection
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Ceiling applied to generation requests; the underlying
    /// operation is not interrupted when it elapses.
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Per-subscriber buffer of the event-log broadcast channel
    #[serde(default = "default_log_channel_capacity")]
    pub log_channel_capacity: usize,

    /// Unix socket the sidecar daemon listens on
    #[serde(default = "default_sidecar_socket")]
    pub sidecar_socket: PathBuf,

    /// Daemon entry script
    #[serde(default = "default_sidecar_script")]
    pub sidecar_script: PathBuf,

    /// Python interpreter used to launch the daemon
    #[serde(default = "default_python_cmd")]
    pub python_cmd: String,

    /// Per-user base directory for speaker profiles and outputs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backend: default_backend(),
            generation_timeout_secs: default_generation_timeout_secs(),
            log_channel_capacity: default_log_channel_capacity(),
            sidecar_socket: default_sidecar_socket(),
            sidecar_script: default_sidecar_script(),
            python_cmd: default_python_cmd(),
            data_dir: default_data_dir(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `MURMUR_*` environment variables.
    /// Invalid values fall back to defaults with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("MURMUR_HOST") {
            let trimmed = host.trim();
            if !trimmed.is_empty() {
                config.host = trimmed.to_string();
            }
        }

        if let Ok(raw) = std::env::var("MURMUR_PORT") {
            match raw.parse::<u16>() {
                Ok(parsed) => config.port = parsed,
                Err(_) => {
                    warn!("Invalid MURMUR_PORT='{}', falling back to {}", raw, config.port);
                }
            }
        }

        if let Ok(raw) = std::env::var("MURMUR_BACKEND") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "sidecar" => config.backend = BackendKind::Sidecar,
                "tone" => config.backend = BackendKind::Tone,
                other => warn!("Unknown MURMUR_BACKEND='{}', using sidecar", other),
            }
        }

        if let Ok(raw) = std::env::var("MURMUR_GENERATION_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(parsed) if parsed > 0 => config.generation_timeout_secs = parsed,
                _ => warn!(
                    "Invalid MURMUR_GENERATION_TIMEOUT_SECS='{}', falling back to {}",
                    raw, config.generation_timeout_secs
                ),
            }
        }

        if let Ok(dir) = std::env::var("MURMUR_DATA_DIR") {
            let trimmed = dir.trim();
            if !trimmed.is_empty() {
                config.data_dir = PathBuf::from(trimmed);
            }
        }

        config
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_backend() -> BackendKind {
    BackendKind::Sidecar
}

fn default_generation_timeout_secs() -> u64 {
    30 * 60
}

fn default_log_channel_capacity() -> usize {
    256
}

fn default_sidecar_socket() -> PathBuf {
    PathBuf::from("/tmp/murmur_tts_daemon.sock")
}

fn default_sidecar_script() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("scripts/tts_daemon.py")
}

fn default_python_cmd() -> String {
    "python3".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("murmur")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8765);
        assert_eq!(config.generation_timeout_secs, 1800);
        assert_eq!(config.backend, BackendKind::Sidecar);
    }
}
