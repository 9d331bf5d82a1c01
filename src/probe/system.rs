//! Host-backed probe built on `ping`, interface counters and the routing table.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::{ProbeConfig, ProbePort};
use crate::error::{Error, Result};
use crate::metrics::LatencySeries;
use crate::util::{self, GatewayRoute, NetworkInterface, WirelessNetwork};

/// Probe that measures through the host's network stack.
///
/// One ping burst per target feeds latency, stability, loss and jitter;
/// the burst is memoized for `series_reuse` so a full measurement costs a
/// single burst.
pub struct SystemProbe {
    config: ProbeConfig,
    series: Mutex<HashMap<IpAddr, (Instant, LatencySeries)>>,
}

impl SystemProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            series: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Latest burst towards `target`, reusing a recent one.
    async fn series(&self, target: IpAddr) -> Result<LatencySeries> {
        {
            let memo = self.series.lock();
            if let Some((taken_at, series)) = memo.get(&target) {
                if taken_at.elapsed() < self.config.series_reuse {
                    return Ok(series.clone());
                }
            }
        }
        self.fresh_series(target).await
    }

    async fn fresh_series(&self, target: IpAddr) -> Result<LatencySeries> {
        let series = self.ping(target).await?;
        trace!(
            %target,
            sent = series.sent,
            received = series.received(),
            "Ping burst finished"
        );

        let mut memo = self.series.lock();
        memo.retain(|_, (taken_at, _)| taken_at.elapsed() < self.config.series_reuse);
        memo.insert(target, (Instant::now(), series.clone()));
        Ok(series)
    }

    async fn ping(&self, target: IpAddr) -> Result<LatencySeries> {
        let count = self.config.ping_count.max(1);
        let (program, args) = ping_command(&self.config, target);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let budget = self.config.ping_interval * count
            + self.config.ping_timeout
            + Duration::from_secs(1);
        let output = util::run_command(program, &args, budget)
            .await
            .map_err(|e| Error::probe(target, e))?;

        // ping exits 1 when nothing answered; anything else is a real failure.
        match output.status.code() {
            Some(0) | Some(1) => Ok(parse_ping_output(
                &String::from_utf8_lossy(&output.stdout),
                count,
            )),
            _ => Err(Error::probe(
                target,
                format!(
                    "{program} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )),
        }
    }

    #[cfg(target_os = "linux")]
    async fn interface_bytes(&self, interface: &str) -> Result<u64> {
        let base = std::path::Path::new("/sys/class/net")
            .join(interface)
            .join("statistics");
        let mut total = 0u64;
        for counter in ["rx_bytes", "tx_bytes"] {
            let raw = tokio::fs::read_to_string(base.join(counter)).await?;
            let value: u64 = raw.trim().parse().map_err(|e| {
                Error::probe(interface, format!("unreadable {counter} counter: {e}"))
            })?;
            total = total.saturating_add(value);
        }
        Ok(total)
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

#[async_trait]
impl ProbePort for SystemProbe {
    async fn probe_latency(&self, target: IpAddr) -> Result<Option<f64>> {
        Ok(self.fresh_series(target).await?.mean_latency())
    }

    #[cfg(target_os = "linux")]
    async fn probe_throughput(&self, interface: &str) -> Result<f64> {
        let window = self.config.throughput_window;
        let before = self.interface_bytes(interface).await?;
        let started = Instant::now();
        tokio::time::sleep(window).await;
        let after = self.interface_bytes(interface).await?;

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return Ok(0.0);
        }
        // Counters reset when the link bounces.
        let delta = after.saturating_sub(before);
        let mbps = (delta as f64 * 8.0) / elapsed / 1_000_000.0;
        tracing::debug!(interface, mbps, "Interface throughput sampled");
        Ok(mbps)
    }

    #[cfg(not(target_os = "linux"))]
    async fn probe_throughput(&self, interface: &str) -> Result<f64> {
        trace!(interface, "Throughput sampling unsupported on this platform");
        Ok(0.0)
    }

    async fn probe_stability(&self, target: IpAddr) -> Result<f64> {
        Ok(self.series(target).await?.stability())
    }

    async fn probe_packet_loss(&self, target: IpAddr) -> Result<f64> {
        Ok(self.series(target).await?.packet_loss())
    }

    async fn probe_jitter(&self, target: IpAddr) -> Result<f64> {
        Ok(self.series(target).await?.jitter())
    }

    async fn list_interfaces(&self) -> Result<Vec<NetworkInterface>> {
        tokio::task::spawn_blocking(util::get_network_interfaces)
            .await
            .map_err(|e| Error::DiscoveryFailure(format!("interface enumeration panicked: {e}")))?
            .map_err(|e| Error::DiscoveryFailure(format!("getifaddrs failed: {e}")))
    }

    async fn list_wireless_networks(&self) -> Result<Vec<WirelessNetwork>> {
        util::scan_wireless_networks(self.config.command_timeout).await
    }

    async fn list_default_routes(&self) -> Result<Vec<GatewayRoute>> {
        util::read_default_routes(self.config.command_timeout).await
    }
}

/// Program and arguments for one ping burst.
#[cfg(target_os = "macos")]
fn ping_command(config: &ProbeConfig, target: IpAddr) -> (&'static str, Vec<String>) {
    let program = if target.is_ipv6() { "ping6" } else { "ping" };
    let mut args = vec![
        "-n".to_string(),
        "-c".to_string(),
        config.ping_count.max(1).to_string(),
    ];
    if target.is_ipv4() {
        args.push("-W".to_string());
        args.push(config.ping_timeout.as_millis().max(1).to_string());
    }
    args.push(target.to_string());
    (program, args)
}

#[cfg(not(target_os = "macos"))]
fn ping_command(config: &ProbeConfig, target: IpAddr) -> (&'static str, Vec<String>) {
    let mut args = Vec::new();
    if target.is_ipv6() {
        args.push("-6".to_string());
    }
    args.extend([
        "-n".to_string(),
        "-c".to_string(),
        config.ping_count.max(1).to_string(),
        "-i".to_string(),
        // Unprivileged ping refuses intervals below 200ms.
        format!("{:.1}", config.ping_interval.as_secs_f64().max(0.2)),
        "-W".to_string(),
        config.ping_timeout.as_secs().max(1).to_string(),
        target.to_string(),
    ]);
    ("ping", args)
}

/// Extract reply RTTs from `ping` output.
///
/// Understands both `time=12.3 ms` and the sub-millisecond `time<1 ms`
/// form. Summary lines are ignored; `sent` is taken from the caller.
pub fn parse_ping_output(output: &str, sent: u32) -> LatencySeries {
    let rtts = output
        .lines()
        .filter_map(|line| {
            let start = line.find("time=").map(|i| i + 5).or_else(|| {
                line.find("time<").map(|i| i + 5)
            })?;
            let value: String = line[start..]
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            value.parse::<f64>().ok()
        })
        .collect();

    LatencySeries::new(sent, rtts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_PING: &str = "\
PING 1.1.1.1 (1.1.1.1) 56(84) bytes of data.
64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=12.4 ms
64 bytes from 1.1.1.1: icmp_seq=2 ttl=57 time=14.0 ms
64 bytes from 1.1.1.1: icmp_seq=4 ttl=57 time=13.1 ms

--- 1.1.1.1 ping statistics ---
4 packets transmitted, 3 received, 25% packet loss, time 603ms
rtt min/avg/max/mdev = 12.400/13.166/14.000/0.655 ms
";

    #[test]
    fn test_parse_linux_ping() {
        let series = parse_ping_output(LINUX_PING, 4);
        assert_eq!(series.rtts_ms, vec![12.4, 14.0, 13.1]);
        assert!((series.packet_loss() - 0.25).abs() < 1e-9);
        assert!((series.mean_latency().unwrap() - 13.166_666).abs() < 1e-3);
    }

    #[test]
    fn test_parse_macos_ping() {
        let output = "\
PING 192.168.1.1 (192.168.1.1): 56 data bytes
64 bytes from 192.168.1.1: icmp_seq=0 ttl=64 time=3.210 ms
64 bytes from 192.168.1.1: icmp_seq=1 ttl=64 time=2.874 ms
";
        let series = parse_ping_output(output, 2);
        assert_eq!(series.received(), 2);
        assert_eq!(series.packet_loss(), 0.0);
    }

    #[test]
    fn test_parse_sub_millisecond_reply() {
        let series = parse_ping_output("Reply from 10.0.0.1: bytes=32 time<1ms TTL=64\n", 1);
        assert_eq!(series.rtts_ms, vec![1.0]);
    }

    #[test]
    fn test_parse_no_replies() {
        let output = "\
PING 10.255.255.1 (10.255.255.1) 56(84) bytes of data.

--- 10.255.255.1 ping statistics ---
4 packets transmitted, 0 received, 100% packet loss, time 3070ms
";
        let series = parse_ping_output(output, 4);
        assert_eq!(series.mean_latency(), None);
        assert_eq!(series.packet_loss(), 1.0);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_ping_command_arguments() {
        let config = ProbeConfig::default();
        let (program, args) = ping_command(&config, "2001:db8::1".parse().unwrap());
        assert_eq!(program, "ping");
        assert_eq!(args[0], "-6");
        assert!(args.contains(&"-c".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("2001:db8::1"));
    }

    #[tokio::test]
    async fn test_series_memo_is_reused() {
        let probe = SystemProbe::default();
        let target: IpAddr = "192.0.2.10".parse().unwrap();
        let series = LatencySeries::new(4, vec![10.0, 10.0, 10.0, 10.0]);
        probe
            .series
            .lock()
            .insert(target, (Instant::now(), series.clone()));

        assert_eq!(probe.series(target).await.unwrap(), series);
        assert_eq!(probe.probe_stability(target).await.unwrap(), 1.0);
        assert_eq!(probe.probe_packet_loss(target).await.unwrap(), 0.0);
    }
}
