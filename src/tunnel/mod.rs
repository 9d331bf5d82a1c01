//! Tunnel provisioning.
//!
//! The connection manager drives a [`TunnelProvisioner`]; it never touches
//! the host directly. [`WgQuickProvisioner`] brings a WireGuard tunnel up
//! with `wg-quick`, and [`MockTunnel`] scripts outcomes for tests.

mod mock;
mod wireguard;

pub use mock::MockTunnel;
pub use wireguard::{render_config, PinRoute, WgQuickProvisioner};

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Route;

/// Brings a tunnel up over a chosen route and back down.
#[async_trait]
pub trait TunnelProvisioner: Send + Sync {
    /// Establish the tunnel with its underlay pinned to `route`.
    async fn provision(&self, route: &Route) -> Result<()>;

    /// Tear down the tunnel this provisioner brought up.
    async fn teardown(&self) -> Result<()>;

    /// Tear down anything left behind, including by earlier processes.
    async fn teardown_all(&self) -> Result<()>;
}

/// Tunnel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Tunnel interface name. Always excluded from route discovery.
    #[serde(default = "default_interface_name")]
    pub interface_name: String,

    /// Where rendered tunnel configs are written.
    pub config_dir: Option<PathBuf>,

    /// Private key (base64). Prefer `private_key_file`.
    pub private_key: Option<String>,

    /// File holding the private key.
    pub private_key_file: Option<PathBuf>,

    /// Tunnel addresses in CIDR notation.
    #[serde(default)]
    pub address: Vec<String>,

    /// Peer public key (base64).
    pub peer_public_key: Option<String>,

    /// Peer endpoint.
    pub peer_endpoint: Option<SocketAddr>,

    /// Networks routed into the tunnel.
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<String>,

    /// DNS servers used while connected.
    #[serde(default)]
    pub dns: Vec<IpAddr>,

    /// Keepalive interval in seconds (0 = off).
    #[serde(default = "default_keepalive")]
    pub persistent_keepalive: u16,

    pub mtu: Option<u16>,

    /// Upper bound for bringing the tunnel up or down.
    #[serde(default = "default_provision_timeout", with = "humantime_serde")]
    pub provision_timeout: Duration,
}

fn default_interface_name() -> String {
    "rs0".into()
}
fn default_allowed_ips() -> Vec<String> {
    vec!["0.0.0.0/0".into(), "::/0".into()]
}
fn default_keepalive() -> u16 {
    25
}
fn default_provision_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            interface_name: default_interface_name(),
            config_dir: None,
            private_key: None,
            private_key_file: None,
            address: vec![],
            peer_public_key: None,
            peer_endpoint: None,
            allowed_ips: default_allowed_ips(),
            dns: vec![],
            persistent_keepalive: default_keepalive(),
            mtu: None,
            provision_timeout: default_provision_timeout(),
        }
    }
}

impl TunnelConfig {
    /// Check the settings that must hold even when no tunnel is configured.
    pub fn validate(&self) -> Result<()> {
        let name = &self.interface_name;
        // wg-quick derives the interface name from the file name.
        let valid_chars = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_=+.-".contains(c));
        if name.is_empty() || name.len() > 15 || !valid_chars {
            return Err(Error::InvalidConfig(format!(
                "tunnel.interface_name {name:?} is not a valid interface name"
            )));
        }

        if self.provision_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "tunnel.provision_timeout must be greater than zero".into(),
            ));
        }

        if self.private_key.is_some() && self.private_key_file.is_some() {
            return Err(Error::InvalidConfig(
                "set only one of tunnel.private_key and tunnel.private_key_file".into(),
            ));
        }

        Ok(())
    }

    /// Whether enough is configured to bring a tunnel up.
    pub fn is_complete(&self) -> bool {
        (self.private_key.is_some() || self.private_key_file.is_some())
            && self.peer_public_key.is_some()
            && self.peer_endpoint.is_some()
            && !self.address.is_empty()
    }

    /// Directory for rendered configs.
    pub fn resolved_config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "routescout", "routescout").map_or_else(
                || std::env::temp_dir().join("routescout"),
                |dirs| dirs.data_dir().join("tunnels"),
            )
        })
    }

    /// Path of the rendered config for this tunnel.
    pub fn config_path(&self) -> PathBuf {
        self.resolved_config_dir()
            .join(format!("{}.conf", self.interface_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = TunnelConfig::default();
        config.validate().unwrap();
        assert!(!config.is_complete());
        assert_eq!(config.allowed_ips, vec!["0.0.0.0/0", "::/0"]);
    }

    #[test]
    fn test_interface_name_rules() {
        let mut config = TunnelConfig::default();
        config.interface_name = "this-name-is-far-too-long".into();
        assert!(config.validate().is_err());

        config.interface_name = "wg 0".into();
        assert!(config.validate().is_err());

        config.interface_name = "wg-scout0".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_path_uses_interface_name() {
        let config = TunnelConfig {
            config_dir: Some(PathBuf::from("/tmp/rs")),
            interface_name: "wg7".into(),
            ..Default::default()
        };
        assert_eq!(config.config_path(), PathBuf::from("/tmp/rs/wg7.conf"));
    }

    #[test]
    fn test_key_sources_are_exclusive() {
        let config = TunnelConfig {
            private_key: Some("a".into()),
            private_key_file: Some("/etc/key".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
