//! Inner tunnel address allocation
//!
//! Devices receive their inner IPv4 address through the CP payload of
//! IKE_AUTH. Addresses come from one CIDR block; the network and broadcast
//! addresses and the gateway's own tunnel address are never handed out.

use crate::ipsec::{Error, Result};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// IPv4 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Subnet {
    /// Create a subnet, clearing any host bits of `addr`
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(Error::InvalidParameter(format!(
                "prefix length {} exceeds 32",
                prefix_len
            )));
        }
        let mask = Self::mask_bits(prefix_len);
        Ok(Ipv4Subnet {
            network: Ipv4Addr::from(u32::from(addr) & mask),
            prefix_len,
        })
    }

    fn mask_bits(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            !0u32 << (32 - u32::from(prefix_len))
        }
    }

    /// Network address
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Netmask, as sent in INTERNAL_IP4_NETMASK
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(Self::mask_bits(self.prefix_len))
    }

    /// Broadcast address
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !Self::mask_bits(self.prefix_len))
    }

    /// Whether `addr` belongs to this subnet
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = Self::mask_bits(self.prefix_len);
        u32::from(addr) & mask == u32::from(self.network)
    }
}

impl FromStr for Ipv4Subnet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidParameter(format!("missing prefix length in {:?}", s)))?;
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|e| Error::InvalidParameter(format!("bad address in {:?}: {}", s, e)))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|e| Error::InvalidParameter(format!("bad prefix in {:?}: {}", s, e)))?;
        Ipv4Subnet::new(addr, prefix)
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Process-wide pool of device inner addresses
#[derive(Debug)]
pub struct InnerAddressPool {
    subnet: Ipv4Subnet,
    gateway: Ipv4Addr,
    allocated: Mutex<HashMap<Ipv4Addr, u64>>,
}

impl InnerAddressPool {
    /// Create a pool over `subnet`, excluding the gateway's tunnel address
    pub fn new(subnet: Ipv4Subnet, gateway: Ipv4Addr) -> Self {
        InnerAddressPool {
            subnet,
            gateway,
            allocated: Mutex::new(HashMap::new()),
        }
    }

    /// Subnet addresses are taken from
    pub fn subnet(&self) -> Ipv4Subnet {
        self.subnet
    }

    fn usable(&self, addr: Ipv4Addr) -> bool {
        addr != self.subnet.network() && addr != self.subnet.broadcast() && addr != self.gateway
    }

    /// Allocate an address for the IKE SA `owner`
    ///
    /// Probing starts at a random host so that consecutive devices do not
    /// receive neighbouring addresses.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when every usable address is taken
    pub fn allocate(&self, owner: u64) -> Result<Ipv4Addr> {
        let base = u32::from(self.subnet.network());
        let size: u64 = 1u64 << (32 - u32::from(self.subnet.prefix_len()));
        let start = rand::thread_rng().gen_range(0..size);

        let mut allocated = self.allocated.lock();
        for step in 0..size {
            // size <= 2^32 so the offset always fits
            let offset = ((start + step) % size) as u32;
            let addr = Ipv4Addr::from(base.wrapping_add(offset));
            if self.usable(addr) && !allocated.contains_key(&addr) {
                allocated.insert(addr, owner);
                return Ok(addr);
            }
        }

        Err(Error::InvalidState("address pool exhausted".into()))
    }

    /// Return an address to the pool
    pub fn release(&self, addr: Ipv4Addr) -> Option<u64> {
        self.allocated.lock().remove(&addr)
    }

    /// IKE SA an address is allocated to
    pub fn owner_of(&self, addr: Ipv4Addr) -> Option<u64> {
        self.allocated.lock().get(&addr).copied()
    }

    /// Number of addresses in use
    pub fn allocated_count(&self) -> usize {
        self.allocated.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_subnet_parse() {
        let subnet: Ipv4Subnet = "10.0.0.77/24".parse().unwrap();
        assert_eq!(subnet.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(subnet.netmask(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(subnet.broadcast(), Ipv4Addr::new(10, 0, 0, 255));
        assert!(subnet.contains(Ipv4Addr::new(10, 0, 0, 9)));
        assert!(!subnet.contains(Ipv4Addr::new(10, 0, 1, 9)));
        assert_eq!(subnet.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn test_subnet_parse_errors() {
        assert!("10.0.0.0".parse::<Ipv4Subnet>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Subnet>().is_err());
        assert!("ten/8".parse::<Ipv4Subnet>().is_err());
    }

    #[test]
    fn test_pool_skips_reserved_addresses() {
        let subnet: Ipv4Subnet = "10.0.0.0/29".parse().unwrap();
        let gateway = Ipv4Addr::new(10, 0, 0, 1);
        let pool = InnerAddressPool::new(subnet, gateway);

        let mut seen = HashSet::new();
        for owner in 0..5 {
            let addr = pool.allocate(owner).unwrap();
            assert!(subnet.contains(addr));
            assert_ne!(addr, gateway);
            assert_ne!(addr, subnet.network());
            assert_ne!(addr, subnet.broadcast());
            assert!(seen.insert(addr));
            assert_eq!(pool.owner_of(addr), Some(owner));
        }

        assert_eq!(
            pool.allocate(99),
            Err(Error::InvalidState("address pool exhausted".into()))
        );
    }

    #[test]
    fn test_pool_release_and_reuse() {
        let pool = InnerAddressPool::new(
            "192.168.5.0/30".parse().unwrap(),
            Ipv4Addr::new(192, 168, 5, 1),
        );
        let addr = pool.allocate(1).unwrap();
        assert_eq!(addr, Ipv4Addr::new(192, 168, 5, 2));
        assert!(pool.allocate(2).is_err());

        assert_eq!(pool.release(addr), Some(1));
        assert_eq!(pool.allocated_count(), 0);
        assert_eq!(pool.allocate(2).unwrap(), addr);
    }
}
