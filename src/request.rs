use crate::address;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    #[default]
    Read,
    Write,
}

/// A read or write against the flat byte-addressed storage.
///
/// Identity is the start address alone: two requests for the same address
/// compare equal even when their sizes differ, and the size of a tracked
/// request may be rewritten by the configured size-update policy.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct Request {
    pub addr: address,
    pub size: u64,
    pub time: u64,
    pub op: Op,
}

impl Request {
    #[must_use]
    pub fn new(addr: address, size: u64, time: u64, op: Op) -> Self {
        Self {
            addr,
            size,
            time,
            op,
        }
    }

    /// Shorthand for a timeless read, the common case in tests and hints.
    #[must_use]
    pub fn read(addr: address, size: u64) -> Self {
        Self::new(addr, size, 0, Op::Read)
    }

    /// A request with zero size carries no data and is used as the
    /// end-of-stream / empty-slot marker.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.size != 0
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl PartialOrd for Request {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Request {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr.cmp(&other.addr)
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "R{{{},{}}}", self.addr, self.size)
    }
}

impl From<trace::Access> for Request {
    fn from(access: trace::Access) -> Self {
        let op = match access.op() {
            trace::Op::Read => Op::Read,
            trace::Op::Write => Op::Write,
        };
        Self::new(access.address, access.size, access.ts, op)
    }
}

#[cfg(test)]
mod tests {
    use super::{Op, Request};
    use std::collections::HashSet;

    #[test]
    fn identity_ignores_size_and_time() {
        let a = Request::new(4096, 512, 1, Op::Read);
        let b = Request::new(4096, 2048, 9, Op::Write);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn ordering_follows_address() {
        let mut requests = vec![Request::read(2048, 512), Request::read(0, 512)];
        requests.sort();
        assert_eq!(requests[0].addr, 0);
    }

    #[test]
    fn zero_sized_requests_are_invalid() {
        assert!(!Request::read(0, 0).valid());
        assert!(Request::read(0, 512).valid());
    }

    #[test]
    fn trace_access_conversion_maps_op() {
        let access = trace::Access {
            ts: 7,
            hname: "host".into(),
            d_number: 0,
            op: "Read".into(),
            address: 1024,
            size: 512,
            r_time: 0,
        };
        let request = Request::from(access);
        assert_eq!(request.op, Op::Read);
        assert_eq!(request.addr, 1024);
        assert_eq!(request.time, 7);
    }
}
