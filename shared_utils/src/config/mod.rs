//! Configuration management module for FunchoVPN.
//!
//! This module provides functionality for loading, parsing, and managing
//! configuration settings for the FunchoVPN provisioning engine and CLI.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error serializing configuration to TOML
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Transport protocol the tunnel daemon listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// UDP transport (default)
    #[default]
    Udp,
    /// TCP transport
    Tcp,
}

impl Protocol {
    /// The directive spelling the daemon expects ("udp" / "tcp").
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// VPN interface configuration settings.
///
/// These map one-to-one onto the directives of the generated server
/// configuration; every mutation must be followed by a regeneration of
/// the daemon's config file or the running daemon serves stale settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InterfaceConfig {
    /// Logical interface name (default: "server")
    #[serde(default = "default_interface_name")]
    pub name: String,

    /// Port for the tunnel daemon to listen on (default: 1194)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport protocol (default: udp)
    #[serde(default)]
    pub protocol: Protocol,

    /// Base network of the client subnet (default: "10.8.0.0")
    #[serde(default = "default_network")]
    pub network: String,

    /// Netmask of the client subnet (default: "255.255.255.0")
    #[serde(default = "default_netmask")]
    pub netmask: String,

    /// Primary DNS resolver pushed to clients
    #[serde(default = "default_dns1")]
    pub dns1: Option<String>,

    /// Secondary DNS resolver pushed to clients
    #[serde(default = "default_dns2")]
    pub dns2: Option<String>,

    /// Enable LZ4 compression on the tunnel (default: false)
    #[serde(default)]
    pub compression: bool,
}

fn default_interface_name() -> String {
    "server".to_string()
}

fn default_port() -> u16 {
    1194
}

fn default_network() -> String {
    "10.8.0.0".to_string()
}

fn default_netmask() -> String {
    "255.255.255.0".to_string()
}

fn default_dns1() -> Option<String> {
    Some("1.1.1.1".to_string())
}

fn default_dns2() -> Option<String> {
    Some("1.0.0.1".to_string())
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        InterfaceConfig {
            name: default_interface_name(),
            port: default_port(),
            protocol: Protocol::default(),
            network: default_network(),
            netmask: default_netmask(),
            dns1: default_dns1(),
            dns2: default_dns2(),
            compression: false,
        }
    }
}

/// Public endpoint clients dial to reach the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Hostname or address placed in client configs
    #[serde(default = "default_public_host")]
    pub public_host: String,

    /// Port placed in client configs (default: 1194)
    #[serde(default = "default_port")]
    pub public_port: u16,
}

fn default_public_host() -> String {
    "vpn.example.com".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            public_host: default_public_host(),
            public_port: default_port(),
        }
    }
}

/// Filesystem locations of the PKI toolchain and daemon config tree.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PkiConfig {
    /// Working copy of the easy-rsa toolchain (holds the pki/ tree)
    #[serde(default = "default_easy_rsa_dir")]
    pub easy_rsa_dir: PathBuf,

    /// Daemon configuration directory (server.conf lives here)
    #[serde(default = "default_openvpn_dir")]
    pub openvpn_dir: PathBuf,

    /// Distribution copy of easy-rsa used to scaffold the working copy
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
}

fn default_easy_rsa_dir() -> PathBuf {
    PathBuf::from("/etc/openvpn/easy-rsa")
}

fn default_openvpn_dir() -> PathBuf {
    PathBuf::from("/etc/openvpn")
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("/usr/share/easy-rsa")
}

impl Default for PkiConfig {
    fn default() -> Self {
        PkiConfig {
            easy_rsa_dir: default_easy_rsa_dir(),
            openvpn_dir: default_openvpn_dir(),
            source_dir: default_source_dir(),
        }
    }
}

/// Service-manager unit and daemon runtime paths.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// systemd unit controlling the tunnel daemon
    #[serde(default = "default_unit")]
    pub unit: String,

    /// Path of the daemon's live status report
    #[serde(default = "default_status_path")]
    pub status_path: PathBuf,
}

fn default_unit() -> String {
    "openvpn@server".to_string()
}

fn default_status_path() -> PathBuf {
    PathBuf::from("/var/log/openvpn/openvpn-status.log")
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            unit: default_unit(),
            status_path: default_status_path(),
        }
    }
}

/// Client record store location.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Path of the JSON client record file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/funchovpn/clients.json")
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: default_store_path(),
        }
    }
}

/// Main configuration structure for FunchoVPN.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// VPN interface configuration
    #[serde(default)]
    pub interface: InterfaceConfig,

    /// Public endpoint configuration
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// PKI toolchain locations
    #[serde(default)]
    pub pki: PkiConfig,

    /// Service manager settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Client record store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interface: InterfaceConfig::default(),
            endpoint: EndpointConfig::default(),
            pki: PkiConfig::default(),
            service: ServiceConfig::default(),
            store: StoreConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Config::default()
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;

        // Validate the configuration
        config.validate()?;

        // Apply environment variable overrides (take precedence over file)
        let mut config = config;
        Self::apply_env_overrides(&mut config);
        // Re-validate after overrides
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist (fresh-host bootstrap).
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load(&path) {
            Err(ConfigError::FileNotFound(_)) => {
                let mut config = Config::default();
                Self::apply_env_overrides(&mut config);
                config.validate()?;
                Ok(config)
            }
            other => other,
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interface.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "interface.port".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.interface.network.parse::<Ipv4Addr>().is_err() {
            return Err(ConfigError::InvalidValue {
                key: "interface.network".to_string(),
                message: format!("{} is not an IPv4 address", self.interface.network),
            });
        }

        // The address allocator only understands /24 pools; refuse wider
        // or narrower masks until it grows beyond that contract.
        if self.interface.netmask != "255.255.255.0" {
            return Err(ConfigError::InvalidValue {
                key: "interface.netmask".to_string(),
                message: "only 255.255.255.0 is supported".to_string(),
            });
        }

        for (key, dns) in [
            ("interface.dns1", &self.interface.dns1),
            ("interface.dns2", &self.interface.dns2),
        ] {
            if let Some(addr) = dns {
                if addr.parse::<Ipv4Addr>().is_err() {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: format!("{addr} is not an IPv4 address"),
                    });
                }
            }
        }

        if self.endpoint.public_host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "endpoint.public_host".to_string(),
                message: "public host cannot be empty".to_string(),
            });
        }

        if self.endpoint.public_port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "endpoint.public_port".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.service.unit.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "service.unit".to_string(),
                message: "unit name cannot be empty".to_string(),
            });
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "log_level".to_string(),
                    message: format!("unknown log level {other}"),
                });
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides (prefix: FUNCHOVPN_)
    /// Example keys:
    /// - FUNCHOVPN_LOG_LEVEL
    /// - FUNCHOVPN_INTERFACE_PORT, FUNCHOVPN_INTERFACE_PROTOCOL,
    ///   FUNCHOVPN_INTERFACE_NETWORK, FUNCHOVPN_INTERFACE_NETMASK,
    ///   FUNCHOVPN_INTERFACE_DNS1, FUNCHOVPN_INTERFACE_DNS2,
    ///   FUNCHOVPN_INTERFACE_COMPRESSION
    /// - FUNCHOVPN_ENDPOINT_PUBLIC_HOST, FUNCHOVPN_ENDPOINT_PUBLIC_PORT
    /// - FUNCHOVPN_PKI_EASY_RSA_DIR, FUNCHOVPN_PKI_OPENVPN_DIR,
    ///   FUNCHOVPN_PKI_SOURCE_DIR
    /// - FUNCHOVPN_SERVICE_UNIT, FUNCHOVPN_SERVICE_STATUS_PATH
    /// - FUNCHOVPN_STORE_PATH
    fn apply_env_overrides(cfg: &mut Config) {
        use std::env;

        fn parse_bool(s: &str) -> Option<bool> {
            match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Some(true),
                "false" | "0" | "no" | "n" => Some(false),
                _ => None,
            }
        }
        fn parse_u16(s: &str) -> Option<u16> {
            s.parse().ok()
        }

        // Top-level
        if let Ok(v) = env::var("FUNCHOVPN_LOG_LEVEL") {
            cfg.log_level = v;
        }

        // Interface
        if let Ok(v) = env::var("FUNCHOVPN_INTERFACE_PORT") {
            if let Some(n) = parse_u16(&v) {
                cfg.interface.port = n;
            }
        }
        if let Ok(v) = env::var("FUNCHOVPN_INTERFACE_PROTOCOL") {
            cfg.interface.protocol = match v.to_ascii_lowercase().as_str() {
                "tcp" => Protocol::Tcp,
                _ => Protocol::Udp,
            };
        }
        if let Ok(v) = env::var("FUNCHOVPN_INTERFACE_NETWORK") {
            if !v.is_empty() {
                cfg.interface.network = v;
            }
        }
        if let Ok(v) = env::var("FUNCHOVPN_INTERFACE_NETMASK") {
            if !v.is_empty() {
                cfg.interface.netmask = v;
            }
        }
        if let Ok(v) = env::var("FUNCHOVPN_INTERFACE_DNS1") {
            cfg.interface.dns1 = if v.is_empty() { None } else { Some(v) };
        }
        if let Ok(v) = env::var("FUNCHOVPN_INTERFACE_DNS2") {
            cfg.interface.dns2 = if v.is_empty() { None } else { Some(v) };
        }
        if let Ok(v) = env::var("FUNCHOVPN_INTERFACE_COMPRESSION") {
            if let Some(b) = parse_bool(&v) {
                cfg.interface.compression = b;
            }
        }

        // Endpoint
        if let Ok(v) = env::var("FUNCHOVPN_ENDPOINT_PUBLIC_HOST") {
            if !v.is_empty() {
                cfg.endpoint.public_host = v;
            }
        }
        if let Ok(v) = env::var("FUNCHOVPN_ENDPOINT_PUBLIC_PORT") {
            if let Some(n) = parse_u16(&v) {
                cfg.endpoint.public_port = n;
            }
        }

        // PKI
        if let Ok(v) = env::var("FUNCHOVPN_PKI_EASY_RSA_DIR") {
            if !v.is_empty() {
                cfg.pki.easy_rsa_dir = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("FUNCHOVPN_PKI_OPENVPN_DIR") {
            if !v.is_empty() {
                cfg.pki.openvpn_dir = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("FUNCHOVPN_PKI_SOURCE_DIR") {
            if !v.is_empty() {
                cfg.pki.source_dir = PathBuf::from(v);
            }
        }

        // Service
        if let Ok(v) = env::var("FUNCHOVPN_SERVICE_UNIT") {
            if !v.is_empty() {
                cfg.service.unit = v;
            }
        }
        if let Ok(v) = env::var("FUNCHOVPN_SERVICE_STATUS_PATH") {
            if !v.is_empty() {
                cfg.service.status_path = PathBuf::from(v);
            }
        }

        // Store
        if let Ok(v) = env::var("FUNCHOVPN_STORE_PATH") {
            if !v.is_empty() {
                cfg.store.path = PathBuf::from(v);
            }
        }
    }

    /// Reload configuration from the same file it was loaded from
    pub fn reload(&mut self, path: &Path) -> Result<(), ConfigError> {
        *self = Self::load(path)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("funchovpn").join("config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}

/// Configuration manager for handling configuration loading and reloading.
#[derive(Debug)]
pub struct ConfigManager {
    /// Current configuration
    config: Config,
    /// Path to the configuration file
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with the default configuration
    pub fn new() -> Self {
        ConfigManager {
            config: Config::default(),
            config_path: Config::default_path(),
        }
    }

    /// Load configuration from the specified path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = Config::load(&path)?;

        Ok(ConfigManager {
            config,
            config_path: path,
        })
    }

    /// Load configuration from the default path
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(Config::default_path())
    }

    /// Get a reference to the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the current configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Reload configuration from the current path
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        self.config.reload(&self.config_path)
    }

    /// Save the current configuration to the current path
    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.save(&self.config_path)
    }

    /// Save the current configuration to a new path
    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        self.config.save(path)
    }

    /// Get the current configuration file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.interface.port, 1194);
        assert_eq!(config.interface.protocol, Protocol::Udp);
        assert_eq!(config.interface.network, "10.8.0.0");
        assert_eq!(config.interface.netmask, "255.255.255.0");
        assert_eq!(config.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();

        let config_str = r#"
            log_level = "debug"

            [interface]
            port = 443
            protocol = "tcp"
            network = "10.9.0.0"
            compression = true

            [endpoint]
            public_host = "vpn.funcho.example"
            public_port = 443

            [service]
            unit = "openvpn@funcho"
        "#;

        file.write_all(config_str.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.interface.port, 443);
        assert_eq!(config.interface.protocol, Protocol::Tcp);
        assert_eq!(config.interface.network, "10.9.0.0");
        assert!(config.interface.compression);
        assert_eq!(config.endpoint.public_host, "vpn.funcho.example");
        assert_eq!(config.endpoint.public_port, 443);
        assert_eq!(config.service.unit, "openvpn@funcho");
        // Untouched sections keep their defaults
        assert_eq!(config.interface.dns1.as_deref(), Some("1.1.1.1"));
        assert_eq!(config.interface.dns2.as_deref(), Some("1.0.0.1"));
    }

    #[test]
    fn test_save_config() {
        let config = Config {
            log_level: "debug".to_string(),
            interface: InterfaceConfig {
                port: 1195,
                compression: true,
                ..Default::default()
            },
            endpoint: EndpointConfig {
                public_host: "gw.funcho.example".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();

        let loaded_config = Config::load(file.path()).unwrap();

        assert_eq!(loaded_config.log_level, "debug");
        assert_eq!(loaded_config.interface.port, 1195);
        assert!(loaded_config.interface.compression);
        assert_eq!(loaded_config.endpoint.public_host, "gw.funcho.example");
    }

    #[test]
    fn test_validation() {
        // Zero listen port
        let config = Config {
            interface: InterfaceConfig {
                port: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // Unparsable network base
        let config = Config {
            interface: InterfaceConfig {
                network: "not-a-network".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // Only /24 netmasks are supported by the allocator
        let config = Config {
            interface: InterfaceConfig {
                netmask: "255.255.0.0".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // Bad DNS resolver
        let config = Config {
            interface: InterfaceConfig {
                dns1: Some("one.one.one.one".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // Unknown log level
        let config = Config {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.toml");

        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.interface.port, 1194);

        // A present-but-broken file still errors
        std::fs::write(&path, "interface = 3").unwrap();
        assert!(Config::load_or_default(&path).is_err());
    }

    #[test]
    fn test_config_manager() {
        let mut file = NamedTempFile::new().unwrap();

        let config_str = r#"
            log_level = "info"

            [interface]
            port = 1194

            [endpoint]
            public_host = "vpn.funcho.example"
        "#;

        file.write_all(config_str.as_bytes()).unwrap();

        let manager = ConfigManager::load(file.path()).unwrap();

        assert_eq!(manager.config().interface.port, 1194);
        assert_eq!(manager.config().endpoint.public_host, "vpn.funcho.example");

        // Test saving with modifications
        let mut manager = manager;
        manager.config_mut().log_level = "debug".to_string();
        manager.save().unwrap();

        // Reload and check
        let manager = ConfigManager::load(file.path()).unwrap();
        assert_eq!(manager.config().log_level, "debug");
    }
}
