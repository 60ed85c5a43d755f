//! Engine configuration
//!
//! Provides [`EngineConfig`] and its builder. A configuration can also be
//! converted from the gateway's file configuration.

use super::{
    nat::{IKE_PORT, NAT_T_PORT},
    pool::Ipv4Subnet,
    retransmit::RetransmitConfig,
    Error, Result,
};
use std::net::Ipv4Addr;
use std::time::Duration;
use tngf_platform::config::GatewayConfig;

/// Default XFRM interface id
pub const DEFAULT_XFRM_INTERFACE_ID: u32 = 7;

/// Default lifetime of an IKE SA that never completes IKE_AUTH
pub const DEFAULT_HALF_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// IKEv2 SA engine configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Public address the IKE sockets are bound to
    pub bind_address: Ipv4Addr,

    /// UDP port for IKE (500)
    pub ike_port: u16,

    /// UDP port for NAT-T (4500)
    pub nat_t_port: u16,

    /// Gateway end of the inner tunnel
    pub gateway_address: Ipv4Addr,

    /// Block device inner addresses come from
    pub ue_subnet: Ipv4Subnet,

    /// Identity sent in IDr
    pub fqdn: String,

    /// TCP port of NAS signaling, sent in IKE_AUTH
    pub nas_tcp_port: u16,

    /// User-plane address sent in CREATE_CHILD_SA
    pub up_ip_address: Ipv4Addr,

    /// Default XFRM interface id
    pub xfrm_interface_id: u32,

    /// Retransmission of gateway requests
    pub retransmit: RetransmitConfig,

    /// How long an SA may sit between IKE_SA_INIT and IKE_AUTH
    pub half_open_timeout: Duration,
}

impl EngineConfig {
    /// Create builder for engine configuration
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.fqdn.is_empty() {
            return Err(Error::InvalidParameter("fqdn cannot be empty".into()));
        }
        if self.ue_subnet.prefix_len() > 30 {
            return Err(Error::InvalidParameter(format!(
                "subnet {} has no room for devices",
                self.ue_subnet
            )));
        }
        if self.ike_port == self.nat_t_port && self.ike_port != 0 {
            return Err(Error::InvalidParameter(
                "IKE and NAT-T ports must differ".into(),
            ));
        }
        if self.retransmit.timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "retransmit timeout must be non-zero".into(),
            ));
        }
        if self.half_open_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "half-open timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for EngineConfig
#[derive(Default)]
pub struct EngineConfigBuilder {
    bind_address: Option<Ipv4Addr>,
    ike_port: Option<u16>,
    nat_t_port: Option<u16>,
    gateway_address: Option<Ipv4Addr>,
    ue_subnet: Option<Ipv4Subnet>,
    fqdn: Option<String>,
    nas_tcp_port: Option<u16>,
    up_ip_address: Option<Ipv4Addr>,
    xfrm_interface_id: Option<u32>,
    retransmit: Option<RetransmitConfig>,
    half_open_timeout: Option<Duration>,
}

impl EngineConfigBuilder {
    /// Create new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the public bind address
    pub fn with_bind_address(mut self, addr: Ipv4Addr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Override the IKE and NAT-T ports
    pub fn with_ports(mut self, ike_port: u16, nat_t_port: u16) -> Self {
        self.ike_port = Some(ike_port);
        self.nat_t_port = Some(nat_t_port);
        self
    }

    /// Set the gateway's inner tunnel address
    pub fn with_gateway_address(mut self, addr: Ipv4Addr) -> Self {
        self.gateway_address = Some(addr);
        self
    }

    /// Set the device address block
    pub fn with_ue_subnet(mut self, subnet: Ipv4Subnet) -> Self {
        self.ue_subnet = Some(subnet);
        self
    }

    /// Set the IDr identity
    pub fn with_fqdn(mut self, fqdn: impl Into<String>) -> Self {
        self.fqdn = Some(fqdn.into());
        self
    }

    /// Set the NAS TCP port
    pub fn with_nas_tcp_port(mut self, port: u16) -> Self {
        self.nas_tcp_port = Some(port);
        self
    }

    /// Set the user-plane address
    pub fn with_up_ip_address(mut self, addr: Ipv4Addr) -> Self {
        self.up_ip_address = Some(addr);
        self
    }

    /// Set the default XFRM interface id
    pub fn with_xfrm_interface_id(mut self, id: u32) -> Self {
        self.xfrm_interface_id = Some(id);
        self
    }

    /// Set retransmission policy
    pub fn with_retransmit(mut self, retransmit: RetransmitConfig) -> Self {
        self.retransmit = Some(retransmit);
        self
    }

    /// Set how long an SA may wait for IKE_AUTH after IKE_SA_INIT
    pub fn with_half_open_timeout(mut self, timeout: Duration) -> Self {
        self.half_open_timeout = Some(timeout);
        self
    }

    /// Build configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if a required field is missing or the
    /// result does not validate
    pub fn build(self) -> Result<EngineConfig> {
        let config = EngineConfig {
            bind_address: self
                .bind_address
                .ok_or_else(|| Error::InvalidParameter("bind_address is required".into()))?,
            ike_port: self.ike_port.unwrap_or(IKE_PORT),
            nat_t_port: self.nat_t_port.unwrap_or(NAT_T_PORT),
            gateway_address: self
                .gateway_address
                .ok_or_else(|| Error::InvalidParameter("gateway_address is required".into()))?,
            ue_subnet: self
                .ue_subnet
                .ok_or_else(|| Error::InvalidParameter("ue_subnet is required".into()))?,
            fqdn: self
                .fqdn
                .ok_or_else(|| Error::InvalidParameter("fqdn is required".into()))?,
            nas_tcp_port: self
                .nas_tcp_port
                .ok_or_else(|| Error::InvalidParameter("nas_tcp_port is required".into()))?,
            up_ip_address: self
                .up_ip_address
                .ok_or_else(|| Error::InvalidParameter("up_ip_address is required".into()))?,
            xfrm_interface_id: self
                .xfrm_interface_id
                .unwrap_or(DEFAULT_XFRM_INTERFACE_ID),
            retransmit: self.retransmit.unwrap_or_default(),
            half_open_timeout: self.half_open_timeout.unwrap_or(DEFAULT_HALF_OPEN_TIMEOUT),
        };

        config.validate()?;
        Ok(config)
    }
}

impl TryFrom<&GatewayConfig> for EngineConfig {
    type Error = Error;

    fn try_from(file: &GatewayConfig) -> Result<Self> {
        EngineConfig::builder()
            .with_bind_address(file.ike_bind_address)
            .with_gateway_address(file.ipsec_gateway_address)
            .with_ue_subnet(file.ue_ip_address_range.parse()?)
            .with_fqdn(file.fqdn.clone())
            .with_nas_tcp_port(file.nas_tcp_port)
            .with_up_ip_address(file.up_ip_address)
            .with_xfrm_interface_id(file.xfrm_interface_id)
            .with_retransmit(RetransmitConfig {
                timeout: Duration::from_millis(file.retransmit.timeout_ms),
                max_retries: file.retransmit.max_retries,
            })
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> EngineConfigBuilder {
        EngineConfig::builder()
            .with_bind_address(Ipv4Addr::new(192, 0, 2, 10))
            .with_gateway_address(Ipv4Addr::new(10, 0, 0, 1))
            .with_ue_subnet("10.0.0.0/24".parse().unwrap())
            .with_fqdn("tngf.example.org")
            .with_nas_tcp_port(20000)
            .with_up_ip_address(Ipv4Addr::new(192, 0, 2, 11))
    }

    #[test]
    fn test_engine_config_builder() {
        let config = builder().build().unwrap();
        assert_eq!(config.ike_port, 500);
        assert_eq!(config.nat_t_port, 4500);
        assert_eq!(config.xfrm_interface_id, DEFAULT_XFRM_INTERFACE_ID);
        assert_eq!(config.retransmit, RetransmitConfig::default());
        assert_eq!(config.half_open_timeout, DEFAULT_HALF_OPEN_TIMEOUT);
    }

    #[test]
    fn test_config_validation() {
        let result = EngineConfig::builder().build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));

        assert!(builder().with_fqdn("").build().is_err());
        assert!(builder()
            .with_ue_subnet("10.0.0.0/31".parse().unwrap())
            .build()
            .is_err());
        assert!(builder().with_ports(4500, 4500).build().is_err());
        assert!(builder()
            .with_retransmit(RetransmitConfig {
                timeout: Duration::ZERO,
                max_retries: 1,
            })
            .build()
            .is_err());
        assert!(builder()
            .with_half_open_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn test_from_gateway_config() {
        let file = GatewayConfig::from_toml(
            r#"
ike_bind_address = "192.0.2.10"
ipsec_gateway_address = "10.0.0.1"
ue_ip_address_range = "10.0.0.0/24"
fqdn = "tngf.example.org"
nas_tcp_port = 20000
up_ip_address = "192.0.2.11"
xfrm_interface_id = 3

[retransmit]
timeout_ms = 250
max_retries = 1
"#,
        )
        .unwrap();

        let config = EngineConfig::try_from(&file).unwrap();
        assert_eq!(config.ue_subnet.to_string(), "10.0.0.0/24");
        assert_eq!(config.xfrm_interface_id, 3);
        assert_eq!(config.retransmit.timeout, Duration::from_millis(250));
        assert_eq!(config.retransmit.max_retries, 1);
    }

    #[test]
    fn test_from_gateway_config_bad_range() {
        let mut file = GatewayConfig::from_toml(
            r#"
ike_bind_address = "192.0.2.10"
ipsec_gateway_address = "10.0.0.1"
ue_ip_address_range = "10.0.0.0/24"
fqdn = "tngf.example.org"
nas_tcp_port = 20000
up_ip_address = "192.0.2.11"
"#,
        )
        .unwrap();
        file.ue_ip_address_range = "10.0.0.0".into();
        assert!(matches!(
            EngineConfig::try_from(&file),
            Err(Error::InvalidParameter(_))
        ));
    }
}
