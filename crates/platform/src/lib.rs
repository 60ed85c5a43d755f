//! # TNGF Platform
//!
//! Process-level types shared by the access gateway crates.
//!
//! This crate provides:
//! - Unified error types (`PlatformError`, `PlatformResult`)
//! - The on-disk gateway configuration (`GatewayConfig`)
//! - Tracing subscriber bootstrap
//!
//! # Examples
//!
//! ```
//! use tngf_platform::{GatewayConfig, PlatformResult};
//!
//! # fn main() -> PlatformResult<()> {
//! let config = GatewayConfig::from_toml(r#"
//!     ike_bind_address = "192.0.2.10"
//!     ipsec_gateway_address = "10.0.0.1"
//!     ue_ip_address_range = "10.0.0.0/24"
//!     fqdn = "tngf.example.org"
//!     nas_tcp_port = 20000
//!     up_ip_address = "192.0.2.11"
//! "#)?;
//! config.validate()?;
//! assert_eq!(config.nas_tcp_port, 20000);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{GatewayConfig, RetransmitSection};
pub use error::{PlatformError, PlatformResult};
pub use telemetry::init_tracing;

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
