use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub geo: GeoConfig,

    #[serde(default)]
    pub detector: DetectorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            listener: ListenerConfig::default(),
            geo: GeoConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/decoyd/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("decoyd/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the journal path
    pub fn journal_path(&self) -> PathBuf {
        PathBuf::from(&self.general.journal_path)
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.general.db_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Path to the append-only JSONL event journal
    #[serde(default = "default_journal_path")]
    pub journal_path: String,

    /// Path to SQLite event store
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            journal_path: default_journal_path(),
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Address to bind listeners on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// TCP ports to listen on
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,

    /// Per-port banners; ports without an entry get the default banner
    #[serde(default = "default_banners")]
    pub banners: Vec<BannerConfig>,

    /// Banner for ports with no override
    #[serde(default = "default_banner")]
    pub default_banner: String,

    /// How long to wait for client data (seconds)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Largest single read from a client (bytes)
    #[serde(default = "default_max_read")]
    pub max_read_bytes: usize,

    /// Stored payload truncation limit (chars)
    #[serde(default = "default_payload_cap")]
    pub payload_cap_chars: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ports: default_ports(),
            banners: default_banners(),
            default_banner: default_banner(),
            read_timeout_secs: default_read_timeout(),
            max_read_bytes: default_max_read(),
            payload_cap_chars: default_payload_cap(),
        }
    }
}

impl ListenerConfig {
    /// Banner to send on the given port
    pub fn banner_for(&self, port: u16) -> &str {
        self.banners
            .iter()
            .find(|b| b.port == port)
            .map(|b| b.banner.as_str())
            .unwrap_or(&self.default_banner)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BannerConfig {
    pub port: u16,
    pub banner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    /// Enable geolocation lookups on the hot path
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lookup timeout in seconds
    #[serde(default = "default_geo_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_geo_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Sliding window length in seconds
    #[serde(default = "default_window")]
    pub window_secs: u64,

    /// Distinct destination ports within the window to qualify as a scan
    #[serde(default = "default_port_threshold")]
    pub port_threshold: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window(),
            port_threshold: default_port_threshold(),
        }
    }
}

// Default value functions

fn default_journal_path() -> String {
    "/var/lib/decoyd/events.jsonl".to_string()
}

fn default_db_path() -> String {
    "/var/lib/decoyd/decoyd.db".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_ports() -> Vec<u16> {
    vec![2222, 2121, 2323]
}

fn default_banners() -> Vec<BannerConfig> {
    vec![
        BannerConfig {
            port: 2222,
            banner: "SSH-2.0-OpenSSH_8.9p1\r\n".to_string(),
        },
        BannerConfig {
            port: 2121,
            banner: "220 FTP Server Ready\r\n".to_string(),
        },
        BannerConfig {
            port: 2323,
            banner: "Welcome to Telnet\r\n".to_string(),
        },
    ]
}

fn default_banner() -> String {
    "220 Service ready\r\n".to_string()
}

fn default_read_timeout() -> u64 {
    3
}

fn default_max_read() -> usize {
    1024
}

fn default_payload_cap() -> usize {
    300
}

fn default_true() -> bool {
    true
}

fn default_geo_timeout() -> u64 {
    2
}

fn default_window() -> u64 {
    300 // 5 minutes
}

fn default_port_threshold() -> u32 {
    5
}
