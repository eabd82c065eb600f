//! Discovery configuration loaded from TOML.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use zonar_protocol::{Announcement, Codec, MAX_DATAGRAM_SIZE};
use zonar_types::{normalize_name, NodeId, Status};

use crate::error::DiscoveryError;

/// Longest accepted pulse interval.
const MAX_PULSE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Largest accepted `id_bits`.
const MAX_ID_BITS: u32 = 1024;

/// User-facing discovery settings.
///
/// Only `name` is required; everything else has a default. Validation
/// happens when an engine is built from the config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Node name, normalized before use. Peers key their registries on it.
    #[serde(default)]
    pub name: String,
    /// Namespace tag carried in every announcement.
    #[serde(default = "default_net")]
    pub net: String,
    /// Where announcements are broadcast. Derived from `local_address`
    /// with a /24 mask when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_address: Option<Ipv4Addr>,
    /// Address of the local interface used for discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_address: Option<Ipv4Addr>,
    /// Discovery port shared by every peer on the broadcast domain.
    #[serde(default = "default_scan_port")]
    pub scan_port: u16,
    #[serde(default = "default_broadcast_identifier")]
    pub broadcast_identifier: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Opaque payload announced with every message.
    #[serde(default)]
    pub payload: String,
    #[serde(default = "default_pulse_interval_ms")]
    pub pulse_interval_ms: u64,
    /// Entropy of the generated node id, in bits.
    #[serde(default = "default_id_bits")]
    pub id_bits: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            net: default_net(),
            broadcast_address: None,
            local_address: None,
            scan_port: default_scan_port(),
            broadcast_identifier: default_broadcast_identifier(),
            protocol_version: default_protocol_version(),
            payload: String::new(),
            pulse_interval_ms: default_pulse_interval_ms(),
            id_bits: default_id_bits(),
        }
    }
}

impl DiscoveryConfig {
    /// Default configuration for a node called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn pulse_interval(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms)
    }

    /// Check the config and derive the values the engine runs on.
    pub fn validate(&self) -> Result<Settings, DiscoveryError> {
        if self.name.trim().is_empty() {
            return Err(DiscoveryError::Config(
                "a node name is required".to_string(),
            ));
        }
        let name = normalize_name(&self.name);
        wire_token("net", &self.net)?;
        wire_token("broadcast_identifier", &self.broadcast_identifier)?;
        wire_token("protocol_version", &self.protocol_version)?;

        let pulse_interval = self.pulse_interval();
        if pulse_interval.is_zero() || pulse_interval > MAX_PULSE_INTERVAL {
            return Err(DiscoveryError::Config(format!(
                "pulse_interval_ms must be between 1 and {}",
                MAX_PULSE_INTERVAL.as_millis()
            )));
        }

        if self.id_bits == 0 || self.id_bits > MAX_ID_BITS {
            return Err(DiscoveryError::Config(format!(
                "id_bits must be between 1 and {MAX_ID_BITS}, got {}",
                self.id_bits
            )));
        }

        let broadcast_ip = match (self.broadcast_address, self.local_address) {
            (Some(broadcast), _) => broadcast,
            (None, Some(local)) => subnet_broadcast(local, 24),
            (None, None) => {
                return Err(DiscoveryError::Config(
                    "either broadcast_address or local_address must be set".to_string(),
                ))
            }
        };

        let settings = Settings {
            name,
            net: self.net.clone(),
            payload: self.payload.clone(),
            scan_port: self.scan_port,
            broadcast: SocketAddr::V4(SocketAddrV4::new(broadcast_ip, self.scan_port)),
            codec: Codec::new(&self.broadcast_identifier, &self.protocol_version),
            pulse_interval,
            keep_alive_timeout: pulse_interval * 11 / 10,
            id_bits: self.id_bits,
        };

        let largest = settings.largest_announcement();
        if largest > MAX_DATAGRAM_SIZE {
            return Err(DiscoveryError::Config(format!(
                "announcement would be {largest} bytes, the limit is {MAX_DATAGRAM_SIZE}"
            )));
        }
        Ok(settings)
    }
}

/// Validated, derived settings. Immutable for the life of an engine.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Normalized node name.
    pub name: String,
    pub net: String,
    pub payload: String,
    pub scan_port: u16,
    /// Broadcast address and scan port that pulses are sent to.
    pub broadcast: SocketAddr,
    pub codec: Codec,
    pub pulse_interval: Duration,
    /// `pulse_interval × 1.1`.
    pub keep_alive_timeout: Duration,
    pub id_bits: u32,
}

impl Settings {
    /// Size of the longest datagram this node sends: `ALIVE` with the widest
    /// reply port.
    fn largest_announcement(&self) -> usize {
        let widest = Announcement {
            net: self.net.clone(),
            id: NodeId::random(self.id_bits),
            name: self.name.clone(),
            reply_port: u16::MAX,
            payload: self.payload.clone(),
        };
        self.codec.encode(Status::Alive, &widest).len()
    }
}

/// Broadcast address of the subnet `addr` belongs to.
pub fn subnet_broadcast(addr: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    let host_mask = u32::MAX
        .checked_shr(u32::from(prefix_len.min(32)))
        .unwrap_or(0);
    Ipv4Addr::from(u32::from(addr) | host_mask)
}

fn wire_token(field: &str, value: &str) -> Result<(), DiscoveryError> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(DiscoveryError::Config(format!(
            "{field} must be a non-empty token without whitespace, got {value:?}"
        )));
    }
    Ok(())
}

/// Load configuration from the given path, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<DiscoveryConfig, DiscoveryError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| DiscoveryError::Config(format!("failed to read config: {e}")))?;
        let config: DiscoveryConfig = toml::from_str(&content)
            .map_err(|e| DiscoveryError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else {
        info!("no config file found, using defaults");
        Ok(DiscoveryConfig::default())
    }
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("zonar")
}

fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn default_net() -> String {
    "zon".to_string()
}

fn default_scan_port() -> u16 {
    5666
}

fn default_broadcast_identifier() -> String {
    "ZONAR".to_string()
}

fn default_protocol_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_pulse_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_id_bits() -> u32 {
    zonar_types::DEFAULT_ID_BITS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> DiscoveryConfig {
        DiscoveryConfig {
            local_address: Some(Ipv4Addr::new(192, 168, 4, 17)),
            ..DiscoveryConfig::new("Web Server")
        }
    }

    #[test]
    fn default_config_serializes() {
        let config = DiscoveryConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("scan_port = 5666"));
        assert!(toml_str.contains("broadcast_identifier = \"ZONAR\""));
        assert!(!toml_str.contains("broadcast_address"));
    }

    #[test]
    fn parse_example_config() {
        let toml_str = r#"
name = "search-node"
net = "prod"
broadcast_address = "10.1.255.255"
scan_port = 7000
payload = "http://10.1.0.4:8080"
pulse_interval_ms = 2000
"#;
        let config: DiscoveryConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.name, "search-node");
        assert_eq!(config.broadcast_address, Some(Ipv4Addr::new(10, 1, 255, 255)));
        assert_eq!(config.scan_port, 7000);
        assert_eq!(config.broadcast_identifier, "ZONAR");
        assert_eq!(config.pulse_interval(), Duration::from_secs(2));

        let settings = config.validate().unwrap();
        assert_eq!(settings.broadcast, "10.1.255.255:7000".parse().unwrap());
        assert_eq!(settings.keep_alive_timeout, Duration::from_millis(2200));
    }

    #[test]
    fn name_is_normalized() {
        assert_eq!(valid().validate().unwrap().name, "web-server");
    }

    #[test]
    fn surrounding_whitespace_is_kept_in_the_key() {
        let config = DiscoveryConfig {
            name: " Web\t".to_string(),
            ..valid()
        };
        assert_eq!(config.validate().unwrap().name, "-web-");
    }

    #[test]
    fn id_bits_bounds() {
        for id_bits in [0, MAX_ID_BITS + 1, u32::MAX] {
            let config = DiscoveryConfig { id_bits, ..valid() };
            assert!(matches!(config.validate(), Err(DiscoveryError::Config(_))));
        }
        let config = DiscoveryConfig {
            id_bits: MAX_ID_BITS,
            ..valid()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let fits = valid().validate().unwrap().largest_announcement();
        // The length prefix grows from "0" to five digits.
        let room = MAX_DATAGRAM_SIZE - fits - 4;

        let config = DiscoveryConfig {
            payload: "x".repeat(room),
            ..valid()
        };
        assert!(config.validate().is_ok());

        let config = DiscoveryConfig {
            payload: "x".repeat(room + 1),
            ..valid()
        };
        assert!(matches!(config.validate(), Err(DiscoveryError::Config(_))));
    }

    #[test]
    fn missing_name_is_rejected() {
        let config = DiscoveryConfig {
            name: "   ".to_string(),
            ..valid()
        };
        assert!(matches!(config.validate(), Err(DiscoveryError::Config(_))));
        let parsed: DiscoveryConfig = toml::from_str("local_address = \"10.0.0.1\"").unwrap();
        assert!(matches!(parsed.validate(), Err(DiscoveryError::Config(_))));
    }

    #[test]
    fn broadcast_derived_from_local_address() {
        let settings = valid().validate().unwrap();
        assert_eq!(settings.broadcast, "192.168.4.255:5666".parse().unwrap());
    }

    #[test]
    fn explicit_broadcast_wins() {
        let config = DiscoveryConfig {
            broadcast_address: Some(Ipv4Addr::BROADCAST),
            ..valid()
        };
        assert_eq!(
            config.validate().unwrap().broadcast,
            "255.255.255.255:5666".parse().unwrap()
        );
    }

    #[test]
    fn no_address_at_all_is_rejected() {
        let config = DiscoveryConfig::new("solo");
        assert!(matches!(config.validate(), Err(DiscoveryError::Config(_))));
    }

    #[test]
    fn wire_tokens_reject_whitespace() {
        for config in [
            DiscoveryConfig {
                net: "two words".to_string(),
                ..valid()
            },
            DiscoveryConfig {
                broadcast_identifier: String::new(),
                ..valid()
            },
            DiscoveryConfig {
                protocol_version: "1.0 beta".to_string(),
                ..valid()
            },
        ] {
            assert!(matches!(config.validate(), Err(DiscoveryError::Config(_))));
        }
    }

    #[test]
    fn pulse_interval_bounds() {
        let zero = DiscoveryConfig {
            pulse_interval_ms: 0,
            ..valid()
        };
        assert!(zero.validate().is_err());
        let huge = DiscoveryConfig {
            pulse_interval_ms: u64::MAX,
            ..valid()
        };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn subnet_broadcast_masks() {
        let addr = Ipv4Addr::new(172, 16, 5, 9);
        assert_eq!(subnet_broadcast(addr, 24), Ipv4Addr::new(172, 16, 5, 255));
        assert_eq!(subnet_broadcast(addr, 16), Ipv4Addr::new(172, 16, 255, 255));
        assert_eq!(subnet_broadcast(addr, 32), addr);
        assert_eq!(subnet_broadcast(addr, 0), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "name = \"db\"\nlocal_address = \"10.0.0.3\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.name, "db");
        assert_eq!(config.net, "zon");
    }

    #[test]
    fn load_config_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, DiscoveryConfig::default());
    }

    #[test]
    fn load_config_rejects_bad_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "scan_port = \"not a port\"").unwrap();
        assert!(matches!(
            load_config(Some(&path)),
            Err(DiscoveryError::Config(_))
        ));
    }
}
