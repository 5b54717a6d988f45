use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crypto::IdentityKeys;
use p2p::{LocalIdentity, P2pConfig, PeerId};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

/// Runtime configuration for the terminal host.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub listen_port: u16,
    pub bind_ip: IpAddr,
    pub nickname: String,
    /// `ip:port` entries dialed right after the listener starts.
    pub peers: Vec<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub peer_id: Option<Uuid>,
    /// Hex-encoded X25519 secret; a fresh key is generated when absent.
    pub secret_key: Option<String>,
}

impl NodeConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let candidate = path.map(PathBuf::from).unwrap_or_else(default_config_path);
        if !candidate.exists() {
            if let Some(explicit) = path {
                info!(path = %explicit.display(), "configuration file not found, using defaults");
            }
            return Ok(config);
        }

        let contents = fs::read_to_string(&candidate)
            .with_context(|| format!("failed to read config at {}", candidate.display()))?;
        let raw: RawNodeConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", candidate.display()))?;

        if let Some(port) = raw.listen_port {
            config.listen_port = port;
        }
        if let Some(ip) = raw.bind_ip {
            config.bind_ip = ip;
        }
        if let Some(nickname) = raw.nickname {
            config.nickname = nickname;
        }
        if let Some(peers) = raw.peers {
            config.peers = peers;
        }
        if let Some(secs) = raw.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = raw.read_timeout_secs {
            config.read_timeout = Duration::from_secs(secs);
        }
        if let Some(level) = raw.log_level {
            config.log_level = level;
        }
        if raw.peer_id.is_some() {
            config.peer_id = raw.peer_id;
        }
        if raw.secret_key.is_some() {
            config.secret_key = raw.secret_key;
        }

        info!(path = %candidate.display(), "loaded configuration overrides");
        Ok(config)
    }

    pub fn p2p_config(&self) -> P2pConfig {
        P2pConfig {
            bind_ip: self.bind_ip,
            listen_port: self.listen_port,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            ..P2pConfig::default()
        }
    }

    /// Build the local identity, reusing the configured id and key if any.
    pub fn identity(&self) -> anyhow::Result<LocalIdentity> {
        let keys = match &self.secret_key {
            Some(encoded) => IdentityKeys::from_secret_hex(encoded.trim())
                .context("invalid secret_key in configuration")?,
            None => IdentityKeys::generate(),
        };
        let id = self.peer_id.map(PeerId::from).unwrap_or_else(PeerId::random);
        Ok(LocalIdentity::new(id, self.nickname.clone(), Arc::new(keys)))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        let p2p = P2pConfig::default();
        Self {
            listen_port: p2p.listen_port,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            nickname: "anonymous".to_string(),
            peers: Vec::new(),
            connect_timeout: p2p.connect_timeout,
            read_timeout: p2p.read_timeout,
            log_level: "info".to_string(),
            peer_id: None,
            secret_key: None,
        }
    }
}

fn default_config_path() -> PathBuf {
    PathBuf::from("parley.toml")
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RawNodeConfig {
    listen_port: Option<u16>,
    bind_ip: Option<IpAddr>,
    nickname: Option<String>,
    peers: Option<Vec<String>>,
    connect_timeout_secs: Option<u64>,
    read_timeout_secs: Option<u64>,
    log_level: Option<String>,
    peer_id: Option<Uuid>,
    secret_key: Option<String>,
}
