//! Tailnet device discovery
//!
//! Peers are discovered from `tailscale status --json` when the Tailscale
//! CLI is installed, falling back to the Tailscale admin API when an API
//! token is configured. Both paths yield the same [`Device`] list; the
//! first entry's hostname doubles as this node's own identity.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Admin API base, see <https://tailscale.com/kb/1101/api>
const API_BASE: &str = "https://api.tailscale.com/api/v2";

/// How long to wait for the local CLI before falling back
const CLI_TIMEOUT: Duration = Duration::from_secs(5);

/// Admin API request timeout
const API_TIMEOUT: Duration = Duration::from_secs(15);

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Neither the CLI nor an API token is usable
    #[error(
        "device discovery unavailable: install the Tailscale CLI \
         (`tailscale status --json` must work) or set TAILSCALE_API_TOKEN"
    )]
    NoSource,

    /// The admin API rejected or failed the request
    #[error("tailscale API: {0}")]
    Api(String),

    /// Device list JSON could not be parsed
    #[error("failed to parse device list: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A device on the tailnet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub hostname: String,
    pub ip: Option<String>,
    pub addrs: Vec<String>,
}

/// List tailnet devices, self first when known
///
/// Tries the local CLI first; an API token enables the admin-API fallback.
pub async fn devices(api_token: Option<&str>) -> Result<Vec<Device>, DiscoveryError> {
    match cli_status().await {
        Ok(json) => return parse_status_json(&json),
        Err(e) => debug!(error = %e, "tailscale CLI unavailable, trying API"),
    }
    match api_token {
        Some(token) if !token.is_empty() => api_devices(token).await,
        _ => Err(DiscoveryError::NoSource),
    }
}

/// Like [`devices`], but splits out this node's hostname
///
/// The self hostname is only known via the CLI path; the API path returns
/// an empty self.
pub async fn self_and_peers(
    api_token: Option<&str>,
) -> Result<(String, Vec<Device>), DiscoveryError> {
    let list = devices(api_token).await?;
    match list.split_first() {
        Some((self_dev, peers)) if self_dev.addrs.is_empty() && self_dev.ip.is_none() => {
            Ok((self_dev.hostname.clone(), peers.to_vec()))
        }
        _ => Ok((String::new(), list)),
    }
}

/// Base URL for a device's peer service, or None when unaddressable
pub fn base_url(device: &Device, port: u16) -> Option<String> {
    if !device.hostname.is_empty() {
        return Some(format!("http://{}:{}", device.hostname, port));
    }
    if let Some(ip) = &device.ip {
        return Some(format!("http://{ip}:{port}"));
    }
    device.addrs.first().map(|addr| {
        let host = addr.split('/').next().unwrap_or(addr);
        format!("http://{host}:{port}")
    })
}

async fn cli_status() -> Result<String, std::io::Error> {
    let run = tokio::process::Command::new("tailscale")
        .args(["status", "--json"])
        .output();
    let output = tokio::time::timeout(CLI_TIMEOUT, run)
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "tailscale status"))??;
    if !output.status.success() {
        return Err(std::io::Error::other(format!(
            "tailscale status exited with {}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Shape of `tailscale status --json` (the fields we use)
#[derive(Deserialize)]
struct StatusJson {
    #[serde(rename = "Self", default)]
    self_node: Option<StatusSelf>,
    #[serde(rename = "Peer", default)]
    peers: HashMap<String, StatusPeer>,
}

#[derive(Deserialize)]
struct StatusSelf {
    #[serde(rename = "HostName", default)]
    hostname: String,
}

#[derive(Deserialize)]
struct StatusPeer {
    #[serde(rename = "HostName", default)]
    hostname: String,
    #[serde(rename = "TailscaleIPs", default)]
    ips: Vec<String>,
}

fn parse_status_json(data: &str) -> Result<Vec<Device>, DiscoveryError> {
    let status: StatusJson = serde_json::from_str(data)?;
    let mut list = Vec::with_capacity(status.peers.len() + 1);
    if let Some(this) = status.self_node {
        if !this.hostname.is_empty() {
            // Self carries no address; only its name matters for filtering.
            list.push(Device {
                hostname: this.hostname,
                ip: None,
                addrs: Vec::new(),
            });
        }
    }
    for peer in status.peers.into_values() {
        list.push(Device {
            hostname: peer.hostname,
            ip: peer.ips.first().cloned(),
            addrs: peer.ips,
        });
    }
    Ok(list)
}

#[derive(Deserialize)]
struct ApiDevicesResponse {
    devices: Vec<ApiDevice>,
}

#[derive(Deserialize)]
struct ApiDevice {
    #[serde(default)]
    name: String,
    #[serde(default)]
    addresses: Vec<String>,
}

async fn api_devices(token: &str) -> Result<Vec<Device>, DiscoveryError> {
    let client = reqwest::Client::builder()
        .timeout(API_TIMEOUT)
        .build()
        .map_err(|e| DiscoveryError::Api(e.to_string()))?;
    let resp = client
        .get(format!("{API_BASE}/tailnet/-/devices"))
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| DiscoveryError::Api(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(DiscoveryError::Api(resp.status().to_string()));
    }
    let body: ApiDevicesResponse = resp
        .json()
        .await
        .map_err(|e| DiscoveryError::Api(e.to_string()))?;

    let list = body
        .devices
        .into_iter()
        .map(|d| {
            // Prefer the 100.x.x.x tailnet IPv4 address.
            let ip = d
                .addresses
                .iter()
                .find(|a| a.starts_with("100."))
                .or_else(|| d.addresses.first())
                .map(|a| a.split('/').next().unwrap_or(a).to_string());
            Device {
                hostname: d.name,
                ip,
                addrs: d.addresses,
            }
        })
        .collect();
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_json_with_self_and_peers() {
        let json = r#"{
            "Self": {"HostName": "laptop"},
            "Peer": {
                "key1": {"HostName": "desktop", "TailscaleIPs": ["100.64.0.2", "fd7a::2"]},
                "key2": {"HostName": "phone", "TailscaleIPs": []}
            }
        }"#;
        let devices = parse_status_json(json).unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].hostname, "laptop");
        assert!(devices[0].addrs.is_empty());

        let desktop = devices.iter().find(|d| d.hostname == "desktop").unwrap();
        assert_eq!(desktop.ip.as_deref(), Some("100.64.0.2"));
    }

    #[test]
    fn parses_status_json_without_self() {
        let devices = parse_status_json(r#"{"Peer": {}}"#).unwrap();
        assert!(devices.is_empty());
    }

    #[test]
    fn base_url_prefers_hostname() {
        let device = Device {
            hostname: "desktop".into(),
            ip: Some("100.64.0.2".into()),
            addrs: vec!["100.64.0.2".into()],
        };
        assert_eq!(
            base_url(&device, 8315).as_deref(),
            Some("http://desktop:8315")
        );
    }

    #[test]
    fn base_url_falls_back_to_ip_then_addr() {
        let by_ip = Device {
            hostname: String::new(),
            ip: Some("100.64.0.2".into()),
            addrs: vec![],
        };
        assert_eq!(
            base_url(&by_ip, 8315).as_deref(),
            Some("http://100.64.0.2:8315")
        );

        let by_addr = Device {
            hostname: String::new(),
            ip: None,
            addrs: vec!["100.64.0.3/32".into()],
        };
        assert_eq!(
            base_url(&by_addr, 8315).as_deref(),
            Some("http://100.64.0.3:8315")
        );

        let unaddressable = Device {
            hostname: String::new(),
            ip: None,
            addrs: vec![],
        };
        assert!(base_url(&unaddressable, 8315).is_none());
    }
}
