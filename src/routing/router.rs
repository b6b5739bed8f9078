//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes for one entry point
//! - Look up the first matching route for a request
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Order: priority desc, then specificity desc, then name asc
//! - Routes whose rule pins the host are indexed by host; a request only
//!   scans its host's routes plus the host-agnostic ones, merged in order

use std::cmp::Ordering;
use std::collections::HashMap;

use axum::http::Request;

use crate::routing::rule::{request_host, Rule};

/// A compiled route carrying an arbitrary target.
#[derive(Debug)]
pub struct RouteEntry<T> {
    pub name: String,
    pub rule: Rule,
    pub priority: i64,
    /// Tie-breaker after priority; longer rules are more specific.
    pub specificity: usize,
    pub target: T,
}

impl<T> RouteEntry<T> {
    fn order(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.specificity.cmp(&self.specificity))
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// Ordered routes of a single entry point.
#[derive(Debug)]
pub struct RouteTable<T> {
    routes: Vec<RouteEntry<T>>,
    by_host: HashMap<String, Vec<usize>>,
    any_host: Vec<usize>,
}

impl<T> RouteTable<T> {
    /// Sort and index the given routes.
    pub fn new(mut routes: Vec<RouteEntry<T>>) -> Self {
        routes.sort_by(|a, b| a.order(b));

        let mut by_host: HashMap<String, Vec<usize>> = HashMap::new();
        let mut any_host = Vec::new();
        for (index, route) in routes.iter().enumerate() {
            match route.rule.required_hosts() {
                Some(mut hosts) => {
                    hosts.sort();
                    hosts.dedup();
                    for host in hosts {
                        by_host.entry(host).or_default().push(index);
                    }
                }
                None => any_host.push(index),
            }
        }

        Self {
            routes,
            by_host,
            any_host,
        }
    }

    /// First route, in match order, whose rule matches the request.
    pub fn match_request<B>(&self, req: &Request<B>) -> Option<&RouteEntry<T>> {
        let host = request_host(req);
        self.candidates(host.as_deref())
            .find(|route| route.rule.matches(req))
    }

    /// Routes that could serve `host`, in match order.
    pub fn candidates<'a>(&'a self, host: Option<&str>) -> impl Iterator<Item = &'a RouteEntry<T>> + 'a {
        let specific: &[usize] = host
            .and_then(|h| self.by_host.get(h))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        MergedIndices {
            a: specific,
            b: &self.any_host,
        }
        .map(move |index| &self.routes[index])
    }

    /// All routes in match order.
    pub fn routes(&self) -> &[RouteEntry<T>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Merge of two ascending index lists.
struct MergedIndices<'a> {
    a: &'a [usize],
    b: &'a [usize],
}

impl Iterator for MergedIndices<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        match (self.a.first(), self.b.first()) {
            (Some(&x), Some(&y)) if x < y => {
                self.a = &self.a[1..];
                Some(x)
            }
            (_, Some(&y)) => {
                self.b = &self.b[1..];
                Some(y)
            }
            (Some(&x), None) => {
                self.a = &self.a[1..];
                Some(x)
            }
            (None, None) => None,
        }
    }
}
