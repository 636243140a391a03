use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, path::Path, time::Duration};

use crate::sink::port_dir_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Remote endpoint a port's captured bytes are mirrored to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardTarget {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_forward_server")]
    pub server: String,
    #[serde(default = "default_forward_port")]
    pub port: u16,
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval: u64,
}

impl Default for ForwardTarget {
    fn default() -> Self {
        Self {
            enabled: false,
            server: default_forward_server(),
            port: default_forward_port(),
            reconnect_interval: default_reconnect_interval_secs(),
        }
    }
}

impl ForwardTarget {
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }
}

/// One configured serial port. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    pub name: String,
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_parity")]
    pub parity: Parity,
    #[serde(default = "default_add_timestamp")]
    pub add_timestamp: bool,
    /// Seconds of silence before the port is shown as offline.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    #[serde(default)]
    pub tcp_forward: ForwardTarget,
}

impl PortSpec {
    pub fn new(name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            name: name.into(),
            baud_rate,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
            add_timestamp: default_add_timestamp(),
            timeout: default_timeout_secs(),
            tcp_forward: ForwardTarget::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn forwarding_enabled(&self) -> bool {
        self.tcp_forward.enabled
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_directory: String,
    #[serde(default = "default_data_dir")]
    pub data_directory: String,
    #[serde(default = "default_error_dir")]
    pub error_directory: String,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_error_dir() -> String {
    "error".to_string()
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> Parity {
    Parity::None
}

fn default_add_timestamp() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_forward_server() -> String {
    "127.0.0.1".to_string()
}

fn default_forward_port() -> u16 {
    8080
}

fn default_reconnect_interval_secs() -> u64 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_directory: default_log_dir(),
            data_directory: default_data_dir(),
            error_directory: default_error_dir(),
            ports: vec![PortSpec::new("COM1", 9600)],
        }
    }
}

impl AppConfig {
    pub fn default_path() -> &'static str {
        "config.json"
    }

    /// Loads the configuration, writing a default file first when none exists.
    /// A freshly bootstrapped file is never used as-is: the caller must edit it.
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            Self::default().save(path_ref)?;
            bail!(
                "created default configuration at {}; edit it and run again",
                path_ref.display()
            );
        }
        Self::load(path_ref)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let raw = fs::read_to_string(path_ref)
            .with_context(|| format!("failed to read configuration from {}", path_ref.display()))?;
        let config: Self = if is_toml(path_ref) {
            toml::from_str(&raw).with_context(|| {
                format!("failed to parse configuration from {}", path_ref.display())
            })?
        } else {
            serde_json::from_str(&raw).with_context(|| {
                format!("failed to parse configuration from {}", path_ref.display())
            })?
        };
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let raw = if is_toml(path_ref) {
            toml::to_string_pretty(self).context("failed to serialize configuration")?
        } else {
            serde_json::to_string_pretty(self).context("failed to serialize configuration")?
        };
        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path_ref, raw)
            .with_context(|| format!("failed to write configuration to {}", path_ref.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.ports.is_empty() {
            bail!("no ports configured");
        }
        let mut seen = HashSet::new();
        for port in &self.ports {
            if port.name.trim().is_empty() {
                bail!("port name must not be empty");
            }
            // Ports share a capture directory when their cleaned names collide.
            if !seen.insert(port_dir_name(&port.name)) {
                bail!("port {} is configured more than once", port.name);
            }
            if port.baud_rate == 0 {
                bail!("port {}: baud rate must be positive", port.name);
            }
            if !(5..=8).contains(&port.data_bits) {
                bail!("port {}: data bits must be between 5 and 8", port.name);
            }
            if !matches!(port.stop_bits, 1 | 2) {
                bail!("port {}: stop bits must be 1 or 2", port.name);
            }
            let forward = &port.tcp_forward;
            if forward.enabled {
                if forward.server.trim().is_empty() {
                    bail!("port {}: tcpForward.server must not be empty", port.name);
                }
                if forward.port == 0 {
                    bail!("port {}: tcpForward.port must be positive", port.name);
                }
                if forward.reconnect_interval == 0 {
                    bail!("port {}: tcpForward.reconnectInterval must be positive", port.name);
                }
            }
        }
        Ok(())
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn load_parses_json_with_defaults() {
        let mut file = NamedTempFile::new().expect("create temp config");
        writeln!(
            file,
            r#"{{"ports": [
                {{"name": "/dev/ttyUSB0", "baudRate": 115200}},
                {{"name": "COM3", "baudRate": 9600, "parity": "even", "addTimestamp": false,
                  "timeout": 10,
                  "tcpForward": {{"enabled": true, "server": "10.0.0.5", "port": 9000}}}}
            ]}}"#
        )
        .unwrap();
        let config = AppConfig::load(file.path()).expect("load config");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.data_directory, "data");
        assert_eq!(config.error_directory, "error");
        assert_eq!(config.ports.len(), 2);

        let first = &config.ports[0];
        assert_eq!(first.data_bits, 8);
        assert_eq!(first.stop_bits, 1);
        assert_eq!(first.parity, Parity::None);
        assert!(first.add_timestamp);
        assert_eq!(first.timeout(), Duration::from_secs(60));
        assert!(!first.forwarding_enabled());

        let second = &config.ports[1];
        assert_eq!(second.parity, Parity::Even);
        assert!(!second.add_timestamp);
        assert_eq!(second.tcp_forward.address(), "10.0.0.5:9000");
        assert_eq!(second.tcp_forward.reconnect_interval(), Duration::from_secs(5));
    }

    #[test]
    fn load_parses_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("collector.toml");
        fs::write(
            &path,
            r#"dataDirectory = "./capture"

[[ports]]
name = "/dev/ttyS1"
baudRate = 19200
"#,
        )
        .unwrap();
        let config = AppConfig::load(&path).expect("load toml config");
        assert_eq!(config.data_directory, "./capture");
        assert_eq!(config.ports[0].baud_rate, 19200);
    }

    #[test]
    fn bootstrap_writes_default_and_fails() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("config.json");
        let err = AppConfig::load_or_bootstrap(&path).unwrap_err();
        assert!(err.to_string().contains("created default configuration"));

        let written = AppConfig::load(&path).expect("default config is valid");
        assert_eq!(written.ports.len(), 1);
        assert_eq!(written.ports[0].name, "COM1");
        assert_eq!(written.ports[0].baud_rate, 9600);
    }

    #[test]
    fn rejects_empty_and_duplicate_ports() {
        let mut config = AppConfig::default();
        config.ports.clear();
        assert!(config.validate().is_err());

        config.ports = vec![PortSpec::new("COM1", 9600), PortSpec::new("COM1", 9600)];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_ports_sharing_a_capture_directory() {
        let mut config = AppConfig::default();
        config.ports = vec![PortSpec::new("COM1", 9600), PortSpec::new("COM1:", 9600)];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("COM1: is configured more than once"));

        config.ports = vec![
            PortSpec::new("/dev/ttyS0", 9600),
            PortSpec::new("dev/ttyS0", 9600),
        ];
        assert!(config.validate().is_err());

        config.ports = vec![
            PortSpec::new("/dev/ttyS0", 9600),
            PortSpec::new("/dev/ttyS1", 9600),
        ];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_forward_target() {
        let mut config = AppConfig::default();
        config.ports[0].tcp_forward.enabled = true;
        config.ports[0].tcp_forward.port = 0;
        assert!(config.validate().is_err());

        // A disabled target is never dialed, so its fields are not checked.
        config.ports[0].tcp_forward.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unparseable_file() {
        let mut file = NamedTempFile::new().expect("create temp config");
        write!(file, "{{ not json").unwrap();
        assert!(AppConfig::load(file.path()).is_err());
    }
}
