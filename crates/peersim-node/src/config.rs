//! Configuration types for peersim.
//! Parsed from a TOML file (default `peersim.toml`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use peersim_protocol::{Capability, Nonce, SessionWireFormat};

use crate::p2p_layer::{P2pLayer, P2pOptions};
use crate::session::{Session, SessionOptions};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub target: TargetSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub transport: TransportSection,
}

/// Node under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSection {
    #[serde(default = "default_target_addr")]
    pub addr: String,
    /// UDP session endpoint; the TCP address when unset.
    pub session_addr: Option<String>,
}

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            addr: default_target_addr(),
            session_addr: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Hex, with or without `0x`, at most 16 bytes.
    #[serde(default = "default_nonce")]
    pub nonce: String,
    #[serde(default = "default_10")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub wire_format: SessionWireFormat,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            nonce: default_nonce(),
            timeout_secs: 10,
            wire_format: SessionWireFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_30")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub verify_signatures: bool,
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            verify_signatures: true,
            capabilities: default_capabilities(),
        }
    }
}

// Default value functions
fn default_target_addr() -> String {
    "127.0.0.1:3485".into()
}
fn default_bind_addr() -> String {
    "0.0.0.0:6602".into()
}
fn default_nonce() -> String {
    "0x000000000000000000000000DEADBEEF".into()
}
fn default_10() -> u64 {
    10
}
fn default_30() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_capabilities() -> Vec<Capability> {
    Capability::ALL.to_vec()
}

/// Parse a hex nonce of up to 16 bytes.
pub fn parse_nonce(s: &str) -> anyhow::Result<Nonce> {
    let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    if digits.is_empty() || digits.len() > 32 {
        anyhow::bail!("nonce must be 1 to 32 hex digits, got {s:?}");
    }
    Nonce::from_str_radix(digits, 16).with_context(|| format!("invalid nonce {s:?}"))
}

impl HarnessConfig {
    /// Load config from file, or use defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: HarnessConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn target_addr(&self) -> anyhow::Result<SocketAddr> {
        self.target
            .addr
            .parse()
            .with_context(|| format!("invalid target addr {:?}", self.target.addr))
    }

    pub fn session_target(&self) -> anyhow::Result<SocketAddr> {
        match &self.target.session_addr {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("invalid session addr {addr:?}")),
            None => self.target_addr(),
        }
    }

    pub fn nonce(&self) -> anyhow::Result<Nonce> {
        parse_nonce(&self.session.nonce)
    }

    pub fn session_options(&self) -> anyhow::Result<SessionOptions> {
        let bind_addr = self
            .session
            .bind_addr
            .parse()
            .with_context(|| format!("invalid bind addr {:?}", self.session.bind_addr))?;
        Ok(SessionOptions {
            bind_addr,
            nonce: self.nonce()?,
            timeout: Duration::from_secs(self.session.timeout_secs),
            wire_format: self.session.wire_format,
        })
    }

    pub fn p2p_options(&self) -> P2pOptions {
        P2pOptions {
            timeout: Duration::from_secs(self.transport.timeout_secs),
            verify_signatures: self.transport.verify_signatures,
            capabilities: self.transport.capabilities.clone(),
        }
    }

    /// Unconnected transport to the configured target.
    pub fn build_layer(&self) -> anyhow::Result<P2pLayer> {
        let session = Session::new(self.session_target()?, self.session_options()?);
        Ok(P2pLayer::new(session, self.target_addr()?, self.p2p_options()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = HarnessConfig::default();
        assert_eq!(cfg.target.addr, "127.0.0.1:3485");
        assert_eq!(cfg.session.timeout_secs, 10);
        assert_eq!(cfg.transport.timeout_secs, 30);
        assert_eq!(cfg.nonce().unwrap(), 0xDEAD_BEEF);
        assert_eq!(cfg.session_target().unwrap(), cfg.target_addr().unwrap());
        assert_eq!(cfg.transport.capabilities, Capability::ALL.to_vec());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[target]
addr = "10.0.0.5:3485"
session_addr = "10.0.0.5:3486"

[session]
bind_addr = "0.0.0.0:7000"
nonce = "0x0102"
wire_format = "legacy"

[transport]
timeout_secs = 5
verify_signatures = false
capabilities = ["block-propagation"]
"#;

        let cfg: HarnessConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.session_target().unwrap().port(), 3486);
        assert_eq!(cfg.nonce().unwrap(), 0x0102);
        assert_eq!(cfg.session.wire_format, SessionWireFormat::Legacy);
        // Unset field keeps its default
        assert_eq!(cfg.session.timeout_secs, 10);

        let options = cfg.p2p_options();
        assert!(!options.verify_signatures);
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.capabilities, vec![Capability::BlockPropagation]);

        let session = cfg.session_options().unwrap();
        assert_eq!(session.bind_addr.port(), 7000);
    }

    #[test]
    fn test_missing_sections() {
        let cfg: HarnessConfig = toml::from_str("[target]\naddr = \"127.0.0.1:1\"\n").unwrap();
        assert_eq!(cfg.session.bind_addr, "0.0.0.0:6602");
        assert!(cfg.transport.verify_signatures);
    }

    #[test]
    fn test_parse_nonce() {
        assert_eq!(parse_nonce("DEADBEEF").unwrap(), 0xDEAD_BEEF);
        assert_eq!(parse_nonce("0xffffffffffffffffffffffffffffffff").unwrap(), u128::MAX);
        assert!(parse_nonce("0x").is_err());
        assert!(parse_nonce("0x1ffffffffffffffffffffffffffffffff").is_err());
        assert!(parse_nonce("xyz").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = HarnessConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.target.addr, "127.0.0.1:3485");
    }

    #[test]
    fn test_serialise_default() {
        let cfg = HarnessConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        assert!(toml_str.contains("[session]"));
        assert!(toml_str.contains("wire_format = \"sequenced\""));
        assert!(toml_str.contains("block-propagation"));
    }
}
