//! Server configuration: defaults, an optional TOML file, and a `clap`
//! CLI overlay — load the file first, then let explicit flags win.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TftpError};
use crate::packet;

/// Minimum packet buffer needed to hold one full DATA packet
/// (4-byte header + 512-byte payload).
const MIN_PACKET_SIZE: usize = 4 + packet::MAX_PAYLOAD;

/// Default read-buffer size: comfortably larger than one DATA packet
/// without the tuning knobs of RFC 2348 block-size negotiation.
const DEFAULT_PACKET_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the well-known-port listener binds to.
    pub bind_addr: IpAddr,
    /// Well-known port; 69 per RFC 1350, overridable for non-root testing.
    pub port: u16,
    /// Largest datagram the server will allocate a receive buffer for.
    pub max_packet_size: usize,
    /// Per-attempt retransmission timeout.
    pub timeout_secs: u64,
    /// When set, every session endpoint is wrapped by the Operation
    /// Logger and audit records are written here.
    pub op_log_path: Option<PathBuf>,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 69,
            max_packet_size: DEFAULT_PACKET_SIZE,
            timeout_secs: crate::transfer::DEFAULT_TIMEOUT.as_secs(),
            op_log_path: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Load a TOML config file, falling back to defaults for any field
    /// the file omits (`#[serde(default)]` on every field above).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| TftpError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(TftpError::Config("port must be nonzero".to_string()));
        }
        if self.max_packet_size < MIN_PACKET_SIZE {
            return Err(TftpError::Config(format!(
                "max_packet_size must be at least {MIN_PACKET_SIZE} bytes to hold a full DATA packet"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(TftpError::Config("timeout_secs must be nonzero".to_string()));
        }
        if let Some(path) = &self.op_log_path {
            let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
            if let Some(parent) = parent {
                if !parent.is_dir() {
                    return Err(TftpError::Config(format!(
                        "op_log_path parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Write the default configuration as TOML to `path`, failing if
    /// something already exists there.
    pub fn write_default(path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(&ServerConfig::default())
            .map_err(|e| TftpError::Config(format!("serializing default config: {e}")))?;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| TftpError::Config(format!("{}: {e}", path.display())))?;
        use std::io::Write as _;
        file.write_all(toml.as_bytes())
            .map_err(|e| TftpError::Config(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}

/// CLI overlay: flags override whatever `--config` (or the built-in
/// defaults) already set.
#[derive(Debug, Parser)]
#[command(name = "memtftpd", about = "An in-memory TFTP (RFC 1350) server")]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub bind_addr: Option<IpAddr>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub max_packet_size: Option<usize>,

    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[arg(long)]
    pub op_log_path: Option<PathBuf>,

    #[arg(long)]
    pub log_level: Option<String>,

    #[arg(long, value_enum)]
    pub log_format: Option<CliLogFormat>,

    /// Resolve configuration (file + flags), validate it, print nothing
    /// but "ok", and exit without starting the listener.
    #[arg(long)]
    pub check_config: bool,

    /// Write the default configuration to this path as TOML and exit
    /// without starting the listener.
    #[arg(long)]
    pub init_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogFormat {
    Text,
    Json,
}

impl Cli {
    /// Resolve defaults -> config file -> CLI flags, in that priority order.
    pub fn resolve(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind_addr) = self.bind_addr {
            config.bind_addr = bind_addr;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_packet_size) = self.max_packet_size {
            config.max_packet_size = max_packet_size;
        }
        if let Some(timeout_secs) = self.timeout_secs {
            config.timeout_secs = timeout_secs;
        }
        if self.op_log_path.is_some() {
            config.op_log_path = self.op_log_path;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        if let Some(log_format) = self.log_format {
            config.log_format = match log_format {
                CliLogFormat::Text => LogFormat::Text,
                CliLogFormat::Json => LogFormat::Json,
            };
        }

        config.validate()?;
        Ok(config)
    }
}
