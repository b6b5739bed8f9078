//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{server::Server, LoadBalancer};

/// Least connections selector.
/// Selects the healthy server with the fewest in-flight requests.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, servers: &[Arc<Server>]) -> Option<Arc<Server>> {
        // On a tie the first server wins (stability)
        servers
            .iter()
            .filter(|s| s.is_healthy())
            .min_by_key(|s| s.active_requests())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let s1 = Arc::new(Server::new("http://127.0.0.1:8080", 1).unwrap());
        let s2 = Arc::new(Server::new("http://127.0.0.1:8081", 1).unwrap());

        let _busy = s1.track();
        let servers = vec![s1.clone(), s2.clone()];

        // s2 has no requests in flight
        let picked = lb.next_server(&servers).unwrap();
        assert_eq!(picked.url, s2.url);

        let _b = s2.track();
        let _c = s2.track();

        // s1 now has fewer
        let picked = lb.next_server(&servers).unwrap();
        assert_eq!(picked.url, s1.url);
    }

    #[test]
    fn ignores_unhealthy() {
        let lb = LeastConnections::new();
        let s1 = Arc::new(Server::new("http://127.0.0.1:8080", 1).unwrap());
        let s2 = Arc::new(Server::new("http://127.0.0.1:8081", 1).unwrap());
        let _busy = s2.track();
        s1.health().record_probe(false, 1, 1);

        let picked = lb.next_server(&[s1, s2.clone()]).unwrap();
        assert_eq!(picked.url, s2.url);
    }
}
