//! Message loss injection and per-tick fairness quotas

use std::collections::HashMap;
use std::net::SocketAddr;

/// Discards every Nth message that passes through it.
///
/// One injector is shared by the inbound and outbound paths so replies
/// are subject to the same loss as requests.
#[derive(Debug, Clone)]
pub struct LossInjector {
    /// Drop every `rate`th message, 0 disables loss
    rate: u32,
    seen: u64,
    dropped: u64,
}

impl LossInjector {
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            seen: 0,
            dropped: 0,
        }
    }

    /// Count one message and report whether it must be discarded
    pub fn should_drop(&mut self) -> bool {
        if self.rate == 0 {
            return false;
        }

        self.seen += 1;
        if self.seen % self.rate as u64 == 0 {
            self.dropped += 1;
            true
        } else {
            false
        }
    }

    /// Total messages discarded since startup
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Per-endpoint message budget for a single tick
#[derive(Debug, Clone)]
pub struct TickQuota {
    limit: u32,
    counts: HashMap<SocketAddr, u32>,
}

impl TickQuota {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            counts: HashMap::new(),
        }
    }

    /// Charge one message to `src`, returns false once the budget is spent
    pub fn admit(&mut self, src: SocketAddr) -> bool {
        let count = self.counts.entry(src).or_insert(0);
        *count += 1;
        *count <= self.limit
    }

    /// Start a new tick
    pub fn reset(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_every_nth() {
        let mut loss = LossInjector::new(5);
        let dropped: Vec<bool> = (0..20).map(|_| loss.should_drop()).collect();
        assert_eq!(dropped.iter().filter(|d| **d).count(), 4);
        assert!(dropped[4] && dropped[9] && dropped[14] && dropped[19]);
        assert_eq!(loss.dropped(), 4);
    }

    #[test]
    fn zero_rate_never_drops() {
        let mut loss = LossInjector::new(0);
        assert!((0..100).all(|_| !loss.should_drop()));
    }

    #[test]
    fn quota_is_per_endpoint_and_resets() {
        let a: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let mut quota = TickQuota::new(2);
        assert!(quota.admit(a));
        assert!(quota.admit(a));
        assert!(!quota.admit(a));
        assert!(quota.admit(b));
        quota.reset();
        assert!(quota.admit(a));
    }
}
