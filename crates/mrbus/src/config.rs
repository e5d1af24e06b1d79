// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration.
//!
//! Supports both programmatic and file-based configuration. A
//! [`GatewayConfig`] is only a description; [`GatewayConfig::resolve`]
//! validates it and produces the immutable [`ResolvedConfig`] the running
//! gateway works from.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::BROADCAST_ADDRESS;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Connection to the bus gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bus address used as sender of every frame the gateway originates.
    pub bus_id: u16,

    /// IP address or hostname of the bus gateway.
    pub ip_address: String,

    /// UDP port the bus gateway listens on.
    pub udp_port: u16,

    /// Local receive port. Defaults to `udp_port`; 0 picks an ephemeral port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,

    /// Local address the receive socket binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// ACK wait per attempt (milliseconds).
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Send attempts per frame.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Time broadcast period (seconds, 0 to disable).
    #[serde(default = "default_time_sync_interval")]
    pub time_sync_interval_secs: u64,

    /// Drop inbound frames whose checksum does not verify.
    #[serde(default)]
    pub strict_checksum: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_ack_timeout_ms() -> u64 {
    200
}

fn default_max_attempts() -> u32 {
    3
}

fn default_time_sync_interval() -> u64 {
    60
}

impl GatewayConfig {
    /// Create a configuration with default timing.
    pub fn new(bus_id: u16, ip_address: impl Into<String>, udp_port: u16) -> Self {
        Self {
            bus_id,
            ip_address: ip_address.into(),
            udp_port,
            listen_port: None,
            bind_address: default_bind_address(),
            ack_timeout_ms: default_ack_timeout_ms(),
            max_attempts: default_max_attempts(),
            time_sync_interval_secs: default_time_sync_interval(),
            strict_checksum: false,
        }
    }

    /// Set the local receive port.
    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    /// Set the local bind address.
    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    /// Set the ACK wait per attempt.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the time broadcast period; `None` disables the job.
    pub fn time_sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.time_sync_interval_secs = interval.map_or(0, |i| i.as_secs());
        self
    }

    /// Enable or disable strict checksum verification.
    pub fn strict_checksum(mut self, strict: bool) -> Self {
        self.strict_checksum = strict;
        self
    }

    /// Validate and resolve addresses.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        if self.bus_id >= u16::from(BROADCAST_ADDRESS) {
            return Err(ConfigError::Invalid(format!(
                "Bus ID {} out of range (0..=254)",
                self.bus_id
            )));
        }
        if self.udp_port == 0 {
            return Err(ConfigError::Invalid("UDP port must not be 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ack_timeout_ms must not be 0".into()));
        }

        let host = self.ip_address.trim();
        if host.is_empty() {
            return Err(ConfigError::Invalid("Gateway IP address is empty".into()));
        }
        let gateway_addr = (host, self.udp_port)
            .to_socket_addrs()
            .map_err(|e| {
                ConfigError::Invalid(format!("Cannot resolve gateway address '{}': {}", host, e))
            })?
            .next()
            .ok_or_else(|| {
                ConfigError::Invalid(format!("Gateway address '{}' has no addresses", host))
            })?;

        let bind_ip: IpAddr = self.bind_address.trim().parse().map_err(|_| {
            ConfigError::Invalid(format!("Invalid bind address '{}'", self.bind_address))
        })?;
        let listen_addr = SocketAddr::new(bind_ip, self.listen_port.unwrap_or(self.udp_port));

        let time_sync_interval = match self.time_sync_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(ResolvedConfig {
            bus_address: self.bus_id as u8,
            gateway_addr,
            listen_addr,
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            max_attempts: self.max_attempts,
            time_sync_interval,
            strict_checksum: self.strict_checksum,
        })
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new(1, Ipv4Addr::LOCALHOST.to_string(), 5000)
    }
}

/// Validated gateway settings. Immutable once the gateway is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub bus_address: u8,
    pub gateway_addr: SocketAddr,
    pub listen_addr: SocketAddr,
    pub ack_timeout: Duration,
    pub max_attempts: u32,
    pub time_sync_interval: Option<Duration>,
    pub strict_checksum: bool,
}

/// Supported device types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Two-channel light switch.
    LightControl2,
    /// Four-input, four-output switch.
    Universal4I4O,
    /// Pellet oven controller.
    OvenControl,
    /// Roller shutter actuator.
    RollerShutter,
}

impl DeviceKind {
    /// Default endpoint name.
    pub fn label(self) -> &'static str {
        match self {
            Self::LightControl2 => "lightcontrol2",
            Self::Universal4I4O => "universal4i4o",
            Self::OvenControl => "ovencontrol",
            Self::RollerShutter => "rollershutter",
        }
    }
}

/// Supported group types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    SwitchGroup,
}

/// A device attached to the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub kind: DeviceKind,

    /// Bus address (0..=254).
    pub address: u8,

    /// Name used in logs and channel updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DeviceConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.kind.label(), self.address))
    }
}

/// A group of devices sharing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub kind: GroupKind,

    /// 16-bit group address.
    pub address: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl GroupConfig {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("switchgroup-{}", self.address))
    }
}

/// Configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MrbusConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Statistics reporting interval (seconds, 0 to disable).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    pub gateway: GatewayConfig,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    60
}

impl Default for MrbusConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            stats_interval_secs: default_stats_interval(),
            gateway: GatewayConfig::default(),
            devices: Vec::new(),
            groups: Vec::new(),
        }
    }
}

impl MrbusConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gateway.resolve()?;

        let mut addresses = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            if device.address == BROADCAST_ADDRESS {
                return Err(ConfigError::Invalid(format!(
                    "Device {} uses the broadcast address",
                    i
                )));
            }
            if !addresses.insert(device.address) {
                return Err(ConfigError::Invalid(format!(
                    "Device {} reuses address {}",
                    i, device.address
                )));
            }
        }

        let mut groups = HashSet::new();
        for (i, group) in self.groups.iter().enumerate() {
            if !groups.insert(group.address) {
                return Err(ConfigError::Invalid(format!(
                    "Group {} reuses address {}",
                    i, group.address
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
log_level = "debug"

[gateway]
bus_id = 1
ip_address = "127.0.0.1"
udp_port = 5000

[[devices]]
kind = "lightcontrol2"
address = 3
name = "kitchen"

[[devices]]
kind = "universal4i4o"
address = 4

[[devices]]
kind = "ovencontrol"
address = 10

[[devices]]
kind = "rollershutter"
address = 12

[[groups]]
kind = "switchgroup"
address = 5
"#;

    #[test]
    fn test_parse_sample() {
        let config = MrbusConfig::from_toml(SAMPLE).expect("valid config");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.stats_interval_secs, 60);
        assert_eq!(config.devices.len(), 4);
        assert_eq!(config.devices[0].kind, DeviceKind::LightControl2);
        assert_eq!(config.devices[1].kind, DeviceKind::Universal4I4O);
        assert_eq!(config.devices[2].kind, DeviceKind::OvenControl);
        assert_eq!(config.devices[3].kind, DeviceKind::RollerShutter);
        assert_eq!(config.devices[0].display_name(), "kitchen");
        assert_eq!(config.devices[1].display_name(), "universal4i4o-4");
        assert_eq!(config.groups[0].kind, GroupKind::SwitchGroup);
        assert_eq!(config.groups[0].address, 5);
    }

    #[test]
    fn test_gateway_defaults() {
        let config = MrbusConfig::from_toml(SAMPLE).expect("valid config");
        let gw = &config.gateway;
        assert_eq!(gw.ack_timeout_ms, 200);
        assert_eq!(gw.max_attempts, 3);
        assert_eq!(gw.time_sync_interval_secs, 60);
        assert_eq!(gw.bind_address, "0.0.0.0");
        assert!(gw.listen_port.is_none());
        assert!(!gw.strict_checksum);
    }

    #[test]
    fn test_resolve() {
        let resolved = GatewayConfig::new(1, "127.0.0.1", 5000)
            .resolve()
            .expect("resolves");
        assert_eq!(resolved.bus_address, 1);
        assert_eq!(resolved.gateway_addr, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(resolved.listen_addr, "0.0.0.0:5000".parse().unwrap());
        assert_eq!(resolved.ack_timeout, Duration::from_millis(200));
        assert_eq!(resolved.max_attempts, 3);
        assert_eq!(resolved.time_sync_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_resolve_listen_port_and_disabled_sync() {
        let resolved = GatewayConfig::new(7, "127.0.0.1", 5000)
            .listen_port(0)
            .bind_address("127.0.0.1")
            .time_sync_interval(None)
            .resolve()
            .expect("resolves");
        assert_eq!(resolved.listen_addr, "127.0.0.1:0".parse().unwrap());
        assert!(resolved.time_sync_interval.is_none());
    }

    #[test]
    fn test_resolve_hostname() {
        let resolved = GatewayConfig::new(1, "localhost", 5000)
            .resolve()
            .expect("localhost resolves");
        assert!(resolved.gateway_addr.ip().is_loopback());
    }

    #[test]
    fn test_invalid_bus_id() {
        assert!(GatewayConfig::new(254, "127.0.0.1", 5000).resolve().is_ok());
        for bus_id in [255, 256, 1000] {
            let err = GatewayConfig::new(bus_id, "127.0.0.1", 5000)
                .resolve()
                .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "bus_id {}", bus_id);
        }
    }

    #[test]
    fn test_invalid_port_and_address() {
        assert!(GatewayConfig::new(1, "127.0.0.1", 0).resolve().is_err());
        assert!(GatewayConfig::new(1, "", 5000).resolve().is_err());
        assert!(GatewayConfig::new(1, "not a host name", 5000)
            .resolve()
            .is_err());
        assert!(GatewayConfig::new(1, "127.0.0.1", 5000)
            .bind_address("nowhere")
            .resolve()
            .is_err());
    }

    #[test]
    fn test_invalid_timing() {
        let mut config = GatewayConfig::new(1, "127.0.0.1", 5000);
        config.max_attempts = 0;
        assert!(config.resolve().is_err());

        let mut config = GatewayConfig::new(1, "127.0.0.1", 5000);
        config.ack_timeout_ms = 0;
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_duplicate_device_address_rejected() {
        let mut config = MrbusConfig::from_toml(SAMPLE).expect("valid config");
        config.devices.push(DeviceConfig {
            kind: DeviceKind::LightControl2,
            address: 3,
            name: None,
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_broadcast_device_address_rejected() {
        let mut config = MrbusConfig::default();
        config.devices.push(DeviceConfig {
            kind: DeviceKind::OvenControl,
            address: 0xFF,
            name: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let mut config = MrbusConfig::default();
        for _ in 0..2 {
            config.groups.push(GroupConfig {
                kind: GroupKind::SwitchGroup,
                address: 5,
                name: None,
            });
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_device_kind() {
        let text = r#"
[gateway]
bus_id = 1
ip_address = "127.0.0.1"
udp_port = 5000

[[devices]]
kind = "toaster"
address = 3
"#;
        assert!(matches!(
            MrbusConfig::from_toml(text),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(SAMPLE.as_bytes()).expect("write");
        let config = MrbusConfig::from_file(file.path()).expect("load");
        assert_eq!(config.gateway.bus_id, 1);
        assert_eq!(config.gateway.udp_port, 5000);
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = MrbusConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_serialize_roundtrip_through_toml() {
        let config = MrbusConfig::from_toml(SAMPLE).expect("valid config");
        let text = toml::to_string_pretty(&config).expect("serialize");
        let again = MrbusConfig::from_toml(&text).expect("reparse");
        assert_eq!(again.devices.len(), config.devices.len());
        assert_eq!(again.gateway.ip_address, config.gateway.ip_address);
    }
}
