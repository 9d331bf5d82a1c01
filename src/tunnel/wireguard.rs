//! WireGuard tunnel via `wg-quick`.

use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{TunnelConfig, TunnelProvisioner};
use crate::error::{Error, Result};
use crate::types::{Route, RouteKind};
use crate::util;

/// Where the tunnel's underlay traffic to the peer is pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRoute {
    pub gateway: Option<IpAddr>,
    pub device: Option<String>,
}

impl PinRoute {
    fn is_empty(&self) -> bool {
        self.gateway.is_none() && self.device.is_none()
    }

    #[cfg(not(target_os = "macos"))]
    fn hooks(&self, peer: IpAddr) -> (String, String) {
        let prefix = if peer.is_ipv4() { 32 } else { 128 };
        let mut up = format!("ip route replace {peer}/{prefix}");
        if let Some(gateway) = self.gateway {
            let _ = write!(up, " via {gateway}");
        }
        if let Some(device) = &self.device {
            let _ = write!(up, " dev {device}");
        }
        (up, format!("ip route del {peer}/{prefix}"))
    }

    #[cfg(target_os = "macos")]
    fn hooks(&self, peer: IpAddr) -> (String, String) {
        let family = if peer.is_ipv4() { "-inet" } else { "-inet6" };
        let up = match (self.gateway, &self.device) {
            (Some(gateway), _) => format!("route -q -n add {family} -host {peer} {gateway}"),
            (None, Some(device)) => format!("route -q -n add {family} -host {peer} -interface {device}"),
            (None, None) => String::new(),
        };
        (up, format!("route -q -n delete {family} -host {peer}"))
    }
}

/// Render a `wg-quick` config for `route`.
pub fn render_config(config: &TunnelConfig, private_key: &str, pin: &PinRoute) -> Result<String> {
    let peer_key = config
        .peer_public_key
        .as_deref()
        .ok_or_else(|| Error::ProvisioningFailure("tunnel.peer_public_key is not set".into()))?;
    let endpoint = config
        .peer_endpoint
        .ok_or_else(|| Error::ProvisioningFailure("tunnel.peer_endpoint is not set".into()))?;
    if config.address.is_empty() {
        return Err(Error::ProvisioningFailure("tunnel.address is not set".into()));
    }

    let join = |items: &[String]| items.join(", ");
    let mut out = String::new();

    let _ = writeln!(out, "[Interface]");
    let _ = writeln!(out, "PrivateKey = {private_key}");
    let _ = writeln!(out, "Address = {}", join(&config.address));
    if !config.dns.is_empty() {
        let dns: Vec<String> = config.dns.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "DNS = {}", join(&dns));
    }
    if let Some(mtu) = config.mtu {
        let _ = writeln!(out, "MTU = {mtu}");
    }
    if !pin.is_empty() {
        let (up, down) = pin.hooks(endpoint.ip());
        let _ = writeln!(out, "PostUp = {up}");
        let _ = writeln!(out, "PreDown = {down}");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "[Peer]");
    let _ = writeln!(out, "PublicKey = {peer_key}");
    let _ = writeln!(out, "Endpoint = {endpoint}");
    let _ = writeln!(out, "AllowedIPs = {}", join(&config.allowed_ips));
    if config.persistent_keepalive > 0 {
        let _ = writeln!(out, "PersistentKeepalive = {}", config.persistent_keepalive);
    }

    Ok(out)
}

/// Provisioner that shells out to `wg-quick`.
pub struct WgQuickProvisioner {
    config: TunnelConfig,
    config_path: PathBuf,
    /// Interface up through this instance.
    active: Mutex<bool>,
}

impl WgQuickProvisioner {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config_path: config.config_path(),
            config,
            active: Mutex::new(false),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    async fn private_key(&self) -> Result<String> {
        if let Some(key) = &self.config.private_key {
            return Ok(key.trim().to_string());
        }
        let path = self.config.private_key_file.as_ref().ok_or_else(|| {
            Error::ProvisioningFailure("no tunnel private key configured".into())
        })?;
        let key = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::ProvisioningFailure(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(key.trim().to_string())
    }

    /// Work out the gateway and device the peer should be reached through.
    async fn pin_for(&self, route: &Route) -> PinRoute {
        let device = route.interface.clone();
        if route.kind == RouteKind::GatewayRoute {
            return PinRoute {
                gateway: Some(route.endpoint_hint),
                device,
            };
        }

        // Interface and Wi-Fi hints may be the device's own address.
        let local: Vec<IpAddr> = tokio::task::spawn_blocking(util::get_network_interfaces)
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or_default()
            .into_iter()
            .map(|i| i.address)
            .collect();

        let gateway = if route.has_endpoint() && !local.contains(&route.endpoint_hint) {
            Some(route.endpoint_hint)
        } else if let Some(device) = &device {
            util::read_default_routes(self.config.provision_timeout)
                .await
                .unwrap_or_default()
                .into_iter()
                .find(|g| g.device.as_deref() == Some(device.as_str()))
                .map(|g| g.gateway)
        } else {
            None
        };

        PinRoute { gateway, device }
    }

    async fn write_config(&self, contents: &str) -> Result<()> {
        if let Some(dir) = self.config_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&self.config_path).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, contents.as_bytes()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        Ok(())
    }

    async fn wg_quick(&self, action: &str) -> Result<std::process::Output> {
        let path = self.config_path.to_string_lossy();
        util::run_command("wg-quick", &[action, path.as_ref()], self.config.provision_timeout).await
    }

    async fn down(&self) -> Result<()> {
        if !tokio::fs::try_exists(&self.config_path).await.unwrap_or(false) {
            debug!(path = %self.config_path.display(), "No tunnel config, nothing to tear down");
            return Ok(());
        }

        let output = self
            .wg_quick("down")
            .await
            .map_err(|e| Error::TeardownFailure(e.to_string()))?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Already down is fine.
        if !output.status.success() && !stderr.contains("is not a WireGuard interface") {
            return Err(Error::TeardownFailure(format!(
                "wg-quick down exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        if let Err(e) = tokio::fs::remove_file(&self.config_path).await {
            warn!(error = %e, "Failed to remove tunnel config");
        }
        Ok(())
    }
}

#[async_trait]
impl TunnelProvisioner for WgQuickProvisioner {
    async fn provision(&self, route: &Route) -> Result<()> {
        let key = self.private_key().await?;
        let pin = self.pin_for(route).await;
        let rendered = render_config(&self.config, &key, &pin)?;

        self.write_config(&rendered)
            .await
            .map_err(|e| Error::ProvisioningFailure(format!("cannot write tunnel config: {e}")))?;

        let output = self
            .wg_quick("up")
            .await
            .map_err(|e| Error::ProvisioningFailure(e.to_string()))?;
        if !output.status.success() {
            let _ = tokio::fs::remove_file(&self.config_path).await;
            return Err(Error::ProvisioningFailure(format!(
                "wg-quick up exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        *self.active.lock() = true;
        info!(
            route = %route.id,
            interface = %self.config.interface_name,
            gateway = ?pin.gateway,
            device = ?pin.device,
            "WireGuard tunnel up"
        );
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        self.down().await?;
        *self.active.lock() = false;
        info!(interface = %self.config.interface_name, "WireGuard tunnel down");
        Ok(())
    }

    async fn teardown_all(&self) -> Result<()> {
        let was_active = *self.active.lock();
        self.down().await?;
        *self.active.lock() = false;
        debug!(was_active, "Leftover tunnel state cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RouteId;

    fn config(dir: &Path) -> TunnelConfig {
        TunnelConfig {
            config_dir: Some(dir.to_path_buf()),
            private_key: Some("cHJpdmF0ZQ==".into()),
            address: vec!["10.66.0.2/32".into()],
            peer_public_key: Some("cGVlcg==".into()),
            peer_endpoint: Some("203.0.113.7:51820".parse().unwrap()),
            dns: vec!["1.1.1.1".parse().unwrap()],
            ..Default::default()
        }
    }

    #[test]
    fn test_render_config() {
        let dir = tempfile::tempdir().unwrap();
        let pin = PinRoute {
            gateway: Some("192.168.1.1".parse().unwrap()),
            device: Some("wlan0".into()),
        };
        let rendered = render_config(&config(dir.path()), "cHJpdmF0ZQ==", &pin).unwrap();

        assert!(rendered.starts_with("[Interface]\nPrivateKey = cHJpdmF0ZQ==\n"));
        assert!(rendered.contains("Address = 10.66.0.2/32\n"));
        assert!(rendered.contains("DNS = 1.1.1.1\n"));
        assert!(rendered.contains("Endpoint = 203.0.113.7:51820\n"));
        assert!(rendered.contains("AllowedIPs = 0.0.0.0/0, ::/0\n"));
        assert!(rendered.contains("PersistentKeepalive = 25\n"));
        assert!(rendered.contains("PostUp = "));
        assert!(rendered.contains("203.0.113.7"));
        #[cfg(not(target_os = "macos"))]
        assert!(rendered.contains(
            "PostUp = ip route replace 203.0.113.7/32 via 192.168.1.1 dev wlan0\n"
        ));
    }

    #[test]
    fn test_render_without_pin_has_no_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let pin = PinRoute { gateway: None, device: None };
        let rendered = render_config(&config(dir.path()), "k", &pin).unwrap();
        assert!(!rendered.contains("PostUp"));
    }

    #[test]
    fn test_render_requires_peer() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.peer_public_key = None;
        let pin = PinRoute { gateway: None, device: None };
        assert!(matches!(
            render_config(&config, "k", &pin),
            Err(Error::ProvisioningFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_gateway_route_pins_through_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = WgQuickProvisioner::new(config(dir.path()));
        let route = Route::new(
            RouteId::from("gw:default@10.0.0.1"),
            "default via 10.0.0.1",
            RouteKind::GatewayRoute,
            "10.0.0.1".parse().unwrap(),
            Some("eth0".into()),
        );

        let pin = provisioner.pin_for(&route).await;
        assert_eq!(pin.gateway, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(pin.device.as_deref(), Some("eth0"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_config_written_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let provisioner = WgQuickProvisioner::new(config(dir.path()));
        provisioner.write_config("[Interface]\n").await.unwrap();

        let meta = std::fs::metadata(provisioner.config_path()).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_teardown_without_config_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = WgQuickProvisioner::new(config(dir.path()));
        provisioner.teardown().await.unwrap();
        provisioner.teardown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_key_file_fails_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.private_key = None;
        config.private_key_file = Some(dir.path().join("missing.key"));
        let provisioner = WgQuickProvisioner::new(config);

        let route = Route::new(
            RouteId::from("gw:default@10.0.0.1"),
            "gw",
            RouteKind::GatewayRoute,
            "10.0.0.1".parse().unwrap(),
            None,
        );
        assert!(matches!(
            provisioner.provision(&route).await,
            Err(Error::ProvisioningFailure(_))
        ));
    }
}
