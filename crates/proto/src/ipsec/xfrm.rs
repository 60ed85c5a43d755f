//! Kernel IPsec rule parameters
//!
//! A Child SA becomes four kernel objects: an inbound and an outbound ESP
//! state in tunnel mode, and one policy per direction selecting the traffic
//! the state protects. This module only builds the parameters; a
//! [`KernelRuleSink`] installs them.
//!
//! ```text
//! inbound  state   peer_public -> local_public   SPI = inbound
//! inbound  policy  remote_ts   -> local_ts       dir in
//! outbound state   local_public -> peer_public   SPI = outbound
//! outbound policy  local_ts    -> remote_ts      dir out
//! ```
//!
//! Keys are picked by IKE role: when the gateway initiated the
//! CREATE_CHILD_SA exchange it receives with the responder-to-initiator keys
//! and sends with the initiator-to-responder ones. For the signaling SA,
//! created in IKE_AUTH where the device initiates, it is the reverse.

use crate::ipsec::child_sa::{ChildSa, ChildSaState, PortRange};
use crate::ipsec::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Policy direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDirection {
    /// Traffic arriving from the device
    In,
    /// Traffic sent to the device
    Out,
}

impl fmt::Display for PolicyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyDirection::In => f.write_str("in"),
            PolicyDirection::Out => f.write_str("out"),
        }
    }
}

/// Algorithm name and key, as the kernel expects them
#[derive(Clone, PartialEq, Eq)]
pub struct XfrmAlgo {
    /// Kernel crypto API name
    pub name: &'static str,
    /// Key material
    pub key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for XfrmAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XfrmAlgo")
            .field("name", &self.name)
            .field("key_len", &self.key.len())
            .finish()
    }
}

/// ESP-in-UDP encapsulation ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XfrmEncap {
    /// Source UDP port
    pub src_port: u16,
    /// Destination UDP port
    pub dst_port: u16,
}

/// ESP state (one direction)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XfrmState {
    /// Outer source address
    pub src: Ipv4Addr,
    /// Outer destination address
    pub dst: Ipv4Addr,
    /// SPI
    pub spi: u32,
    /// XFRM interface id
    pub if_id: u32,
    /// Integrity algorithm
    pub auth: Option<XfrmAlgo>,
    /// Cipher
    pub crypt: XfrmAlgo,
    /// Extended sequence numbers
    pub esn: bool,
    /// UDP encapsulation
    pub encap: Option<XfrmEncap>,
}

/// Template tying a policy to its state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XfrmTemplate {
    /// Outer source address
    pub src: Ipv4Addr,
    /// Outer destination address
    pub dst: Ipv4Addr,
    /// SPI of the state
    pub spi: u32,
}

/// Tunnel-mode ESP policy (one direction)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XfrmPolicy {
    /// Inner source selector (/32)
    pub src: Ipv4Addr,
    /// Inner destination selector (/32)
    pub dst: Ipv4Addr,
    /// IP protocol the selector matches
    pub proto: u8,
    /// Source ports the selector matches
    pub src_ports: PortRange,
    /// Destination ports the selector matches
    pub dst_ports: PortRange,
    /// Direction
    pub dir: PolicyDirection,
    /// XFRM interface id
    pub if_id: u32,
    /// State template
    pub template: XfrmTemplate,
}

/// Everything the kernel needs for one Child SA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XfrmRules {
    /// State for traffic from the device
    pub inbound_state: XfrmState,
    /// State for traffic to the device
    pub outbound_state: XfrmState,
    /// Policy for traffic from the device
    pub inbound_policy: XfrmPolicy,
    /// Policy for traffic to the device
    pub outbound_policy: XfrmPolicy,
}

impl XfrmRules {
    /// Build the rules of a completed Child SA
    ///
    /// # Arguments
    ///
    /// * `child` - A Completed or Active Child SA
    /// * `is_initiator` - Whether the gateway initiated the exchange that
    ///   created the SA
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the SA has no keys or binding yet
    pub fn from_child_sa(child: &ChildSa, is_initiator: bool) -> Result<Self> {
        if !matches!(child.state, ChildSaState::Completed | ChildSaState::Active) {
            return Err(Error::InvalidState(format!(
                "Child SA {:#010x} is {}",
                child.inbound_spi, child.state
            )));
        }
        let binding = child.binding.as_ref().ok_or_else(|| {
            Error::InvalidState(format!(
                "Child SA {:#010x} has no network binding",
                child.inbound_spi
            ))
        })?;

        let keys = &child.keys;
        let (in_encr, in_integ, out_encr, out_integ) = if is_initiator {
            (
                &keys.encr_responder_to_initiator,
                &keys.integ_responder_to_initiator,
                &keys.encr_initiator_to_responder,
                &keys.integ_initiator_to_responder,
            )
        } else {
            (
                &keys.encr_initiator_to_responder,
                &keys.integ_initiator_to_responder,
                &keys.encr_responder_to_initiator,
                &keys.integ_responder_to_initiator,
            )
        };

        let crypt = |key: &Zeroizing<Vec<u8>>| XfrmAlgo {
            name: child.encryption.xfrm_name(),
            key: key.clone(),
        };
        let auth = |key: &Zeroizing<Vec<u8>>| {
            child.integrity.map(|alg| XfrmAlgo {
                name: alg.xfrm_name(),
                key: key.clone(),
            })
        };

        let inbound_state = XfrmState {
            src: binding.peer_public,
            dst: binding.local_public,
            spi: child.inbound_spi,
            if_id: binding.xfrm_if_id,
            auth: auth(in_integ),
            crypt: crypt(in_encr),
            esn: child.esn,
            encap: binding.encapsulation.map(|encap| XfrmEncap {
                src_port: encap.peer_port,
                dst_port: encap.local_port,
            }),
        };

        let outbound_state = XfrmState {
            src: binding.local_public,
            dst: binding.peer_public,
            spi: child.outbound_spi,
            if_id: binding.xfrm_if_id,
            auth: auth(out_integ),
            crypt: crypt(out_encr),
            esn: child.esn,
            encap: binding.encapsulation.map(|encap| XfrmEncap {
                src_port: encap.local_port,
                dst_port: encap.peer_port,
            }),
        };

        let inbound_policy = XfrmPolicy {
            src: binding.remote_selector,
            dst: binding.local_selector,
            proto: binding.ip_protocol,
            src_ports: binding.remote_ports,
            dst_ports: binding.local_ports,
            dir: PolicyDirection::In,
            if_id: binding.xfrm_if_id,
            template: XfrmTemplate {
                src: inbound_state.src,
                dst: inbound_state.dst,
                spi: inbound_state.spi,
            },
        };

        let outbound_policy = XfrmPolicy {
            src: binding.local_selector,
            dst: binding.remote_selector,
            proto: binding.ip_protocol,
            src_ports: binding.local_ports,
            dst_ports: binding.remote_ports,
            dir: PolicyDirection::Out,
            if_id: binding.xfrm_if_id,
            template: XfrmTemplate {
                src: outbound_state.src,
                dst: outbound_state.dst,
                spi: outbound_state.spi,
            },
        };

        Ok(XfrmRules {
            inbound_state,
            outbound_state,
            inbound_policy,
            outbound_policy,
        })
    }
}

/// Installs and removes kernel IPsec rules
pub trait KernelRuleSink: Send + Sync {
    /// Install both states and both policies
    fn apply(&self, rules: &XfrmRules) -> Result<()>;

    /// Remove rules installed by [`apply`](KernelRuleSink::apply)
    fn remove(&self, rules: &XfrmRules) -> Result<()>;
}

/// Sink that only logs the rules
///
/// Used when the gateway runs without kernel access.
#[derive(Debug, Default)]
pub struct TracingSink;

impl KernelRuleSink for TracingSink {
    fn apply(&self, rules: &XfrmRules) -> Result<()> {
        for state in [&rules.inbound_state, &rules.outbound_state] {
            info!(
                spi = format_args!("{:#010x}", state.spi),
                src = %state.src,
                dst = %state.dst,
                if_id = state.if_id,
                crypt = state.crypt.name,
                auth = state.auth.as_ref().map(|a| a.name).unwrap_or("none"),
                encap = state.encap.is_some(),
                "XFRM state"
            );
        }
        for policy in [&rules.inbound_policy, &rules.outbound_policy] {
            debug!(
                dir = %policy.dir,
                src = %policy.src,
                dst = %policy.dst,
                proto = policy.proto,
                sport = %policy.src_ports,
                dport = %policy.dst_ports,
                "XFRM policy"
            );
        }
        Ok(())
    }

    fn remove(&self, rules: &XfrmRules) -> Result<()> {
        info!(
            inbound_spi = format_args!("{:#010x}", rules.inbound_state.spi),
            outbound_spi = format_args!("{:#010x}", rules.outbound_state.spi),
            "XFRM rules removed"
        );
        Ok(())
    }
}

/// In-memory sink for tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    installed: Mutex<Vec<XfrmRules>>,
    removed: Mutex<Vec<XfrmRules>>,
    fail_next: AtomicBool,
}

impl RecordingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply` fail
    pub fn fail_next_apply(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Rules currently installed
    pub fn installed(&self) -> Vec<XfrmRules> {
        self.installed.lock().clone()
    }

    /// Rules removed so far
    pub fn removed(&self) -> Vec<XfrmRules> {
        self.removed.lock().clone()
    }
}

impl KernelRuleSink for RecordingSink {
    fn apply(&self, rules: &XfrmRules) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::KernelRule("injected failure".into()));
        }
        self.installed.lock().push(rules.clone());
        Ok(())
    }

    fn remove(&self, rules: &XfrmRules) -> Result<()> {
        let mut installed = self.installed.lock();
        let before = installed.len();
        installed.retain(|r| r.inbound_state.spi != rules.inbound_state.spi);
        if installed.len() == before {
            return Err(Error::KernelRule(format!(
                "no rules for SPI {:#010x}",
                rules.inbound_state.spi
            )));
        }
        self.removed.lock().push(rules.clone());
        Ok(())
    }
}

/// Hands out XFRM interface ids
///
/// The signaling SA and the first PDU session of a device use the default
/// interface. Every further user-plane SA gets `base + base + offset`, with
/// a process-wide offset starting at 1.
#[derive(Debug)]
pub struct XfrmInterfaceAllocator {
    base: u32,
    offset: AtomicU32,
}

impl XfrmInterfaceAllocator {
    /// Create an allocator around the default interface id
    pub fn new(base: u32) -> Self {
        XfrmInterfaceAllocator {
            base,
            offset: AtomicU32::new(1),
        }
    }

    /// Default interface id
    pub fn default_id(&self) -> u32 {
        self.base
    }

    /// Allocate a fresh user-plane interface id
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` once the id space is exhausted
    pub fn allocate_for_user_plane(&self) -> Result<u32> {
        let offset = self.offset.fetch_add(1, Ordering::SeqCst);
        self.base
            .checked_add(self.base)
            .and_then(|id| id.checked_add(offset))
            .ok_or_else(|| Error::InvalidState("XFRM interface ids exhausted".into()))
    }
}
