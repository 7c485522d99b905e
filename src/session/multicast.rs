//! Multicast address allocation (§6, §9).
//!
//! Owned per-[`crate::server::RtspServer`] instance, not a process-wide
//! singleton — two servers in one process (as in tests) must not
//! contend over the same address pool.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use parking_lot::Mutex;
use rand::Rng;

use crate::error::{Result, RtspError};

/// One allocation: a multicast group plus its even RTP port (RTCP is
/// always `rtp_port + 1`, matching RFC 3550 §11 convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MulticastAllocation {
    pub address: Ipv4Addr,
    pub rtp_port: u16,
}

/// Random allocator over the administratively-scoped range
/// `232.0.1.0/24..239.255.255.254`, with collision retry.
pub struct MulticastAddrPool {
    range: (Ipv4Addr, Ipv4Addr),
    in_use: Mutex<HashSet<MulticastAllocation>>,
}

/// Attempts before giving up and reporting the pool exhausted.
const MAX_ATTEMPTS: usize = 100;

impl MulticastAddrPool {
    pub fn new(range: (Ipv4Addr, Ipv4Addr)) -> Self {
        Self {
            range,
            in_use: Mutex::new(HashSet::new()),
        }
    }

    /// Allocate a fresh, currently-unused multicast address and even RTP
    /// port pair.
    pub fn allocate(&self) -> Result<MulticastAllocation> {
        let mut in_use = self.in_use.lock();
        let lo = u32::from(self.range.0);
        let hi = u32::from(self.range.1);
        for _ in 0..MAX_ATTEMPTS {
            let raw = rand::rng().random_range(lo..=hi);
            let address = Ipv4Addr::from(raw);
            let rtp_port = rand::rng().random::<u16>() & 0xfffe;
            let candidate = MulticastAllocation { address, rtp_port };
            if in_use.insert(candidate) {
                return Ok(candidate);
            }
        }
        Err(RtspError::MulticastAddressExhausted)
    }

    pub fn release(&self, allocation: MulticastAllocation) {
        self.in_use.lock().remove(&allocation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> MulticastAddrPool {
        MulticastAddrPool::new((Ipv4Addr::new(232, 0, 1, 0), Ipv4Addr::new(239, 255, 255, 254)))
    }

    #[test]
    fn allocates_within_range() {
        let pool = pool();
        let alloc = pool.allocate().unwrap();
        assert!(u32::from(alloc.address) >= u32::from(Ipv4Addr::new(232, 0, 1, 0)));
        assert!(u32::from(alloc.address) <= u32::from(Ipv4Addr::new(239, 255, 255, 254)));
        assert_eq!(alloc.rtp_port & 1, 0);
    }

    #[test]
    fn release_allows_reallocation() {
        let pool = pool();
        let alloc = pool.allocate().unwrap();
        pool.release(alloc);
        assert!(pool.in_use.lock().is_empty());
    }

    #[test]
    fn distinct_allocations_do_not_collide() {
        let pool = pool();
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let alloc = pool.allocate().unwrap();
            assert!(seen.insert(alloc));
        }
    }
}
