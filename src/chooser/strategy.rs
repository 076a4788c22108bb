//! Load-balancing strategies for ordering candidate hosts

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rand::seq::SliceRandom;

use crate::host::HostSpec;

/// Counter values wrap at this bound
const ROUND_ROBIN_BOUND: usize = 1 << 30;

/// Host ordering strategy, selected by `autoBalance`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalance {
    /// Configured order
    #[default]
    None,
    Shuffle,
    RoundRobin,
    /// Round-robin over the first N hosts, shuffled remainder after
    PriorityRoundRobin(usize),
    LeastConn,
}

impl FromStr for LoadBalance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        match value.as_str() {
            "" | "false" => Ok(LoadBalance::None),
            "true" | "balance" | "shuffle" => Ok(LoadBalance::Shuffle),
            "roundrobin" => Ok(LoadBalance::RoundRobin),
            "leastconn" => Ok(LoadBalance::LeastConn),
            _ => {
                let count = value
                    .strip_prefix("priority")
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| format!("Invalid autoBalance value: {}", s))?;
                Ok(LoadBalance::PriorityRoundRobin(count))
            }
        }
    }
}

impl fmt::Display for LoadBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalance::None => write!(f, "false"),
            LoadBalance::Shuffle => write!(f, "shuffle"),
            LoadBalance::RoundRobin => write!(f, "roundrobin"),
            LoadBalance::PriorityRoundRobin(n) => write!(f, "priority{}", n),
            LoadBalance::LeastConn => write!(f, "leastconn"),
        }
    }
}

/// Round-robin positions shared by every caller of the same logical URL
#[derive(Debug, Default)]
pub struct RoundRobinCounters {
    counters: DashMap<String, AtomicUsize>,
}

impl RoundRobinCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position for `url_key`, advancing the shared counter
    pub fn next(&self, url_key: &str) -> usize {
        if let Some(counter) = self.counters.get(url_key) {
            return advance(&counter);
        }
        let counter = self
            .counters
            .entry(url_key.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        advance(&counter)
    }
}

fn advance(counter: &AtomicUsize) -> usize {
    match counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some((v + 1) % ROUND_ROBIN_BOUND)
    }) {
        Ok(previous) | Err(previous) => previous,
    }
}

/// Shuffle everything
pub(crate) fn shuffle(mut hosts: Vec<HostSpec>) -> Vec<HostSpec> {
    hosts.shuffle(&mut rand::thread_rng());
    hosts
}

/// Rotate so `position` leads, then shuffle everything after the first host
pub(crate) fn round_robin(mut hosts: Vec<HostSpec>, position: usize) -> Vec<HostSpec> {
    if hosts.is_empty() {
        return hosts;
    }
    let start = position % hosts.len();
    hosts.rotate_left(start);
    hosts[1..].shuffle(&mut rand::thread_rng());
    hosts
}

/// Round-robin over the candidates among the first `priority` configured
/// hosts, shuffled remaining candidates appended
///
/// The priority set comes from `configured`, so a filtered-out priority host
/// never lets a non-priority host into the head.
pub(crate) fn priority_round_robin(
    candidates: Vec<HostSpec>,
    configured: &[HostSpec],
    priority: usize,
    position: usize,
) -> Vec<HostSpec> {
    let priority_hosts = &configured[..priority.min(configured.len())];
    let (head, tail): (Vec<HostSpec>, Vec<HostSpec>) = candidates
        .into_iter()
        .partition(|h| priority_hosts.contains(h));

    let mut ordered = round_robin(head, position);
    ordered.extend(shuffle(tail));
    ordered
}
