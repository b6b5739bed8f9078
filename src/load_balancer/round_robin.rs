//! Round-robin strategies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{server::Server, LoadBalancer};

/// Upper bound on the length of a weighted schedule.
const MAX_SCHEDULE: u64 = 4096;

/// Round-robin selector.
/// Stores an internal counter to rotate through servers.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, servers: &[Arc<Server>]) -> Option<Arc<Server>> {
        if servers.is_empty() {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = servers.len();

        (0..len)
            .map(|i| &servers[(start + i) % len])
            .find(|server| server.is_healthy())
            .cloned()
    }
}

/// Smooth weighted round robin over a precomputed schedule.
///
/// The schedule interleaves servers in proportion to their weights, e.g.
/// weights `[5, 1, 1]` give `a a b a c a a`. Zero-weight servers never
/// appear. Unhealthy servers are skipped by advancing through the schedule.
#[derive(Debug)]
pub struct WeightedRoundRobin {
    schedule: Vec<usize>,
    counter: AtomicUsize,
}

impl WeightedRoundRobin {
    pub fn new(weights: &[u32]) -> Self {
        Self {
            schedule: smooth_schedule(weights),
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_server(&self, servers: &[Arc<Server>]) -> Option<Arc<Server>> {
        let len = self.schedule.len();
        if len == 0 {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        (0..len)
            .filter_map(|i| servers.get(self.schedule[(start + i) % len]))
            .find(|server| server.is_healthy())
            .cloned()
    }

    fn can_select(&self, server: &Server) -> bool {
        server.weight > 0
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn smooth_schedule(weights: &[u32]) -> Vec<usize> {
    let mut weights: Vec<u64> = weights.iter().map(|&w| w as u64).collect();
    let divisor = weights.iter().copied().filter(|&w| w > 0).fold(0, gcd);
    if divisor == 0 {
        return Vec::new();
    }
    for w in weights.iter_mut() {
        *w /= divisor;
    }

    let mut total: u64 = weights.iter().sum();
    if total > MAX_SCHEDULE {
        for w in weights.iter_mut().filter(|w| **w > 0) {
            *w = (*w * MAX_SCHEDULE / total).max(1);
        }
        total = weights.iter().sum();
    }

    let mut current = vec![0i64; weights.len()];
    let mut schedule = Vec::with_capacity(total as usize);
    for _ in 0..total {
        let mut best: Option<usize> = None;
        for (i, &w) in weights.iter().enumerate() {
            if w == 0 {
                continue;
            }
            current[i] += w as i64;
            if best.map_or(true, |b| current[i] > current[b]) {
                best = Some(i);
            }
        }
        if let Some(b) = best {
            current[b] -= total as i64;
            schedule.push(b);
        }
    }
    schedule
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::state::HealthState;

    fn servers(n: usize) -> Vec<Arc<Server>> {
        (0..n)
            .map(|i| Arc::new(Server::new(&format!("http://127.0.0.1:{}", 9000 + i), 1).unwrap()))
            .collect()
    }

    fn mark_down(server: &Server) {
        assert_eq!(
            server.health().record_probe(false, 1, 1),
            Some(HealthState::Unhealthy)
        );
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let servers = servers(2);

        let s1 = lb.next_server(&servers).unwrap();
        assert_eq!(s1.url, servers[0].url);

        let s2 = lb.next_server(&servers).unwrap();
        assert_eq!(s2.url, servers[1].url);

        let s3 = lb.next_server(&servers).unwrap();
        assert_eq!(s3.url, servers[0].url);
    }

    #[test]
    fn round_robin_skips_unhealthy() {
        let lb = RoundRobin::new();
        let servers = servers(3);
        mark_down(&servers[1]);

        for _ in 0..6 {
            let picked = lb.next_server(&servers).unwrap();
            assert_ne!(picked.url, servers[1].url);
        }

        mark_down(&servers[0]);
        mark_down(&servers[2]);
        assert!(lb.next_server(&servers).is_none());
    }

    #[test]
    fn smooth_schedule_interleaves() {
        assert_eq!(smooth_schedule(&[5, 1, 1]), vec![0, 0, 1, 0, 2, 0, 0]);
        assert_eq!(smooth_schedule(&[2, 2]), vec![0, 1]);
        assert_eq!(smooth_schedule(&[0, 3]), vec![1]);
        assert!(smooth_schedule(&[0, 0]).is_empty());
    }

    #[test]
    fn weighted_distribution_follows_weights() {
        let servers = servers(2);
        let lb = WeightedRoundRobin::new(&[3, 1]);
        let mut counts = [0usize; 2];
        for _ in 0..400 {
            let picked = lb.next_server(&servers).unwrap();
            let index = servers.iter().position(|s| s.url == picked.url).unwrap();
            counts[index] += 1;
        }
        assert_eq!(counts, [300, 100]);
    }

    #[test]
    fn weighted_skips_unhealthy() {
        let servers = servers(2);
        let lb = WeightedRoundRobin::new(&[3, 1]);
        mark_down(&servers[0]);
        for _ in 0..8 {
            assert_eq!(lb.next_server(&servers).unwrap().url, servers[1].url);
        }
    }
}
