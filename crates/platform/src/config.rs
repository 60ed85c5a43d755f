//! Gateway configuration file
//!
//! The gateway reads a single TOML file describing its IKE bind address,
//! the inner tunnel addressing plan and the user-plane address it
//! advertises to devices.
//!
//! ```toml
//! ike_bind_address = "192.0.2.10"
//! ipsec_gateway_address = "10.0.0.1"
//! ue_ip_address_range = "10.0.0.0/24"
//! fqdn = "tngf.example.org"
//! nas_tcp_port = 20000
//! up_ip_address = "192.0.2.11"
//! xfrm_interface_id = 7
//!
//! [retransmit]
//! timeout_ms = 5000
//! max_retries = 3
//! ```

use std::{
    fs,
    net::Ipv4Addr,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, PlatformResult};
use crate::telemetry::DEFAULT_FILTER;

/// Retransmission settings for gateway-initiated exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetransmitSection {
    /// Time to wait for a response before resending, in milliseconds
    #[serde(default = "RetransmitSection::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Resends before the exchange is declared failed
    #[serde(default = "RetransmitSection::default_max_retries")]
    pub max_retries: u32,
}

impl RetransmitSection {
    fn default_timeout_ms() -> u64 {
        5_000
    }

    fn default_max_retries() -> u32 {
        3
    }
}

impl Default for RetransmitSection {
    fn default() -> Self {
        RetransmitSection {
            timeout_ms: Self::default_timeout_ms(),
            max_retries: Self::default_max_retries(),
        }
    }
}

/// On-disk gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Public address the IKE sockets bind to (ports 500 and 4500)
    pub ike_bind_address: Ipv4Addr,

    /// Gateway end of the inner IPsec tunnel
    pub ipsec_gateway_address: Ipv4Addr,

    /// CIDR block device inner addresses are allocated from
    pub ue_ip_address_range: String,

    /// Gateway identity sent in IDr
    pub fqdn: String,

    /// TCP port devices reach NAS signaling on
    pub nas_tcp_port: u16,

    /// User-plane address advertised in CREATE_CHILD_SA
    pub up_ip_address: Ipv4Addr,

    /// Base XFRM interface identifier
    #[serde(default = "GatewayConfig::default_xfrm_interface_id")]
    pub xfrm_interface_id: u32,

    /// Retransmission settings
    #[serde(default)]
    pub retransmit: RetransmitSection,

    /// `tracing` filter directive
    #[serde(default = "GatewayConfig::default_log_filter")]
    pub log_filter: String,

    /// File this configuration was read from
    #[serde(skip)]
    pub config_file_path: PathBuf,
}

impl GatewayConfig {
    fn default_xfrm_interface_id() -> u32 {
        7
    }

    fn default_log_filter() -> String {
        DEFAULT_FILTER.to_string()
    }

    /// Load a config file from a file path
    ///
    /// Only syntax is checked here; call [`GatewayConfig::validate`] before use.
    pub fn load<P: AsRef<Path>>(p: P) -> PlatformResult<Self> {
        let mut config: Self = toml::from_str(&fs::read_to_string(&p)?)?;
        config.config_file_path = p.as_ref().to_owned();
        Ok(config)
    }

    /// Parse a config from a string
    pub fn from_toml(s: &str) -> PlatformResult<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Validate a configuration
    pub fn validate(&self) -> PlatformResult<()> {
        if self.fqdn.is_empty() {
            return Err(PlatformError::Config("fqdn must not be empty".into()));
        }

        let (network, prefix) = parse_cidr(&self.ue_ip_address_range)?;
        if prefix > 30 {
            return Err(PlatformError::Config(format!(
                "ue_ip_address_range {} leaves no room for devices",
                self.ue_ip_address_range
            )));
        }
        let mask = prefix_mask(prefix);
        if u32::from(network) & !mask != 0 {
            return Err(PlatformError::Config(format!(
                "ue_ip_address_range {} has host bits set",
                self.ue_ip_address_range
            )));
        }

        if self.retransmit.timeout_ms == 0 {
            return Err(PlatformError::Config(
                "retransmit.timeout_ms must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

/// Parse `a.b.c.d/n` into network address and prefix length
pub fn parse_cidr(cidr: &str) -> PlatformResult<(Ipv4Addr, u8)> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| PlatformError::Config(format!("{} is not in CIDR notation", cidr)))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|e| PlatformError::Config(format!("{}: {}", cidr, e)))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|e| PlatformError::Config(format!("{}: {}", cidr, e)))?;
    if prefix > 32 {
        return Err(PlatformError::Config(format!(
            "{}: prefix length {} exceeds 32",
            cidr, prefix
        )));
    }
    Ok((addr, prefix))
}

/// Netmask for a prefix length
pub fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
ike_bind_address = "192.0.2.10"
ipsec_gateway_address = "10.0.0.1"
ue_ip_address_range = "10.0.0.0/24"
fqdn = "tngf.example.org"
nas_tcp_port = 20000
up_ip_address = "192.0.2.11"
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = GatewayConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.ike_bind_address, Ipv4Addr::new(192, 0, 2, 10));
        assert_eq!(config.xfrm_interface_id, 7);
        assert_eq!(config.retransmit, RetransmitSection::default());
        assert_eq!(config.log_filter, DEFAULT_FILTER);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", SAMPLE).unwrap();
        writeln!(file, "[retransmit]\ntimeout_ms = 250\nmax_retries = 1").unwrap();

        let config = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(config.retransmit.timeout_ms, 250);
        assert_eq!(config.retransmit.max_retries, 1);
        assert_eq!(config.config_file_path, file.path());
    }

    #[test]
    fn test_missing_file() {
        let result = GatewayConfig::load("/nonexistent/tngf.toml");
        assert!(matches!(result, Err(PlatformError::Io(_))));
    }

    #[test]
    fn test_validate_rejects_host_bits() {
        let mut config = GatewayConfig::from_toml(SAMPLE).unwrap();
        config.ue_ip_address_range = "10.0.0.5/24".into();
        assert!(config.validate().is_err());

        config.ue_ip_address_range = "10.0.0.0/31".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_cidr() {
        assert_eq!(
            parse_cidr("10.1.0.0/16").unwrap(),
            (Ipv4Addr::new(10, 1, 0, 0), 16)
        );
        assert!(parse_cidr("10.1.0.0").is_err());
        assert!(parse_cidr("10.1.0.0/33").is_err());
        assert!(parse_cidr("nope/8").is_err());
    }

    #[test]
    fn test_prefix_mask() {
        assert_eq!(prefix_mask(0), 0);
        assert_eq!(prefix_mask(24), 0xFFFF_FF00);
        assert_eq!(prefix_mask(32), u32::MAX);
    }
}
