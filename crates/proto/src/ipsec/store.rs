//! Process-wide registry of IKE and Child SAs
//!
//! IKE SAs are keyed by the gateway's 64-bit SPI, Child SA SPIs map to the
//! IKE SA that owns them. Both tables are split into shards, each behind its
//! own `RwLock`, so devices served in parallel rarely touch the same lock.
//!
//! Per-SA state lives behind the SA's own `Mutex`. A shard lock is never
//! held while an SA is locked.

use crate::ipsec::ikev2::state::IkeSa;
use crate::ipsec::{Error, Result};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;

/// Number of shards per table
const SHARD_COUNT: usize = 16;

/// Shared handle to one IKE SA
pub type SharedIkeSa = Arc<Mutex<IkeSa>>;

struct Sharded<K, V> {
    shards: Vec<RwLock<HashMap<K, V>>>,
}

impl<K, V> Sharded<K, V>
where
    K: Copy + Eq + std::hash::Hash + Into<u64>,
{
    fn new() -> Self {
        Sharded {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: K) -> &RwLock<HashMap<K, V>> {
        let raw: u64 = key.into();
        // SPIs are random, the low bits spread well enough
        &self.shards[(raw as usize) % SHARD_COUNT]
    }
}

/// IKE and Child SA registry
pub struct SaStore {
    ike: Sharded<u64, SharedIkeSa>,
    child_owner: Sharded<u32, u64>,
    devices: RwLock<HashMap<String, u64>>,
    half_open: RwLock<HashMap<(u64, SocketAddrV4), u64>>,
}

impl Default for SaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaStore")
            .field("ike_sas", &self.ike_count())
            .finish()
    }
}

impl SaStore {
    /// Create an empty store
    pub fn new() -> Self {
        SaStore {
            ike: Sharded::new(),
            child_owner: Sharded::new(),
            devices: RwLock::new(HashMap::new()),
            half_open: RwLock::new(HashMap::new()),
        }
    }

    /// Pick a random IKE SPI not currently in use
    ///
    /// The SPI is only reserved once [`insert_ike`](Self::insert_ike)
    /// succeeds.
    pub fn allocate_ike_spi(&self) -> u64 {
        let mut rng = rand::thread_rng();
        loop {
            let spi: u64 = rng.gen();
            if spi != 0 && !self.ike.shard(spi).read().contains_key(&spi) {
                return spi;
            }
        }
    }

    /// Register an IKE SA under its local SPI
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpi` if the SPI is already taken
    pub fn insert_ike(&self, local_spi: u64, sa: IkeSa) -> Result<SharedIkeSa> {
        let mut shard = self.ike.shard(local_spi).write();
        if shard.contains_key(&local_spi) {
            return Err(Error::InvalidSpi(local_spi));
        }
        let shared = Arc::new(Mutex::new(sa));
        shard.insert(local_spi, Arc::clone(&shared));
        Ok(shared)
    }

    /// Look up an IKE SA
    pub fn load_ike(&self, local_spi: u64) -> Option<SharedIkeSa> {
        self.ike.shard(local_spi).read().get(&local_spi).cloned()
    }

    /// Remove an IKE SA
    ///
    /// Child SPIs and the device index entry are left to the caller, who
    /// knows them from the SA itself.
    pub fn remove_ike(&self, local_spi: u64) -> Option<SharedIkeSa> {
        self.ike.shard(local_spi).write().remove(&local_spi)
    }

    /// Reserve a random, process-unique inbound Child SA SPI for `owner`
    pub fn allocate_child_spi(&self, owner: u64) -> u32 {
        let mut rng = rand::thread_rng();
        loop {
            let spi: u32 = rng.gen();
            if spi < 256 {
                // 1-255 are reserved by IANA, 0 is invalid
                continue;
            }
            let mut shard = self.child_owner.shard(spi).write();
            if let std::collections::hash_map::Entry::Vacant(entry) = shard.entry(spi) {
                entry.insert(owner);
                return spi;
            }
        }
    }

    /// Free an inbound Child SA SPI
    pub fn release_child_spi(&self, spi: u32) -> Option<u64> {
        self.child_owner.shard(spi).write().remove(&spi)
    }

    /// IKE SA owning an inbound Child SA SPI
    pub fn child_owner(&self, spi: u32) -> Option<u64> {
        self.child_owner.shard(spi).read().get(&spi).copied()
    }

    /// Index an IKE SA by device identity
    ///
    /// Returns the SPI previously registered for the device, if any.
    pub fn bind_device(&self, device_id: &str, local_spi: u64) -> Option<u64> {
        self.devices.write().insert(device_id.to_string(), local_spi)
    }

    /// Drop a device index entry if it still points at `local_spi`
    pub fn unbind_device(&self, device_id: &str, local_spi: u64) {
        let mut devices = self.devices.write();
        if devices.get(device_id) == Some(&local_spi) {
            devices.remove(device_id);
        }
    }

    /// IKE SA of a device
    pub fn device_spi(&self, device_id: &str) -> Option<u64> {
        self.devices.read().get(device_id).copied()
    }

    /// Claim the IKE_SA_INIT slot of a device SPI and address
    ///
    /// # Errors
    ///
    /// Returns the local SPI that already holds the slot
    pub fn claim_half_open(
        &self,
        remote_spi: u64,
        peer: SocketAddrV4,
        local_spi: u64,
    ) -> std::result::Result<(), u64> {
        let mut half_open = self.half_open.write();
        match half_open.get(&(remote_spi, peer)) {
            Some(existing) => Err(*existing),
            None => {
                half_open.insert((remote_spi, peer), local_spi);
                Ok(())
            }
        }
    }

    /// Release an IKE_SA_INIT slot held by `local_spi`
    pub fn release_half_open(&self, remote_spi: u64, peer: SocketAddrV4, local_spi: u64) {
        let mut half_open = self.half_open.write();
        if half_open.get(&(remote_spi, peer)) == Some(&local_spi) {
            half_open.remove(&(remote_spi, peer));
        }
    }

    /// Snapshot of every IKE SA
    pub fn all_ike(&self) -> Vec<(u64, SharedIkeSa)> {
        self.ike
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .map(|(spi, sa)| (*spi, Arc::clone(sa)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Number of IKE SAs
    pub fn ike_count(&self) -> usize {
        self.ike.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Number of reserved Child SA SPIs
    pub fn child_count(&self) -> usize {
        self.child_owner
            .shards
            .iter()
            .map(|shard| shard.read().len())
            .sum()
    }
}
