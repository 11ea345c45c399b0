//! Scope descriptors and their resolution against live topology.
//!
//! A scope names a slice of the cluster by role rather than by address:
//! the leader, every follower, a random member, the hosts that currently
//! carry a fault. Resolution queries the topology probe once, samples
//! where the scope calls for it, and hands back hosts or transports.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ClusterRegistry;
use crate::remote::{CommandTransport, SqlTransport};
use crate::topology::{Topology, TopologyError, TopologyProbe};

/// Role-based selector for a slice of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Every member the cluster reports.
    AllNodes,
    /// A strict majority of members, sampled without replacement.
    HalfNodes,
    /// One member, chosen uniformly.
    AnyNode,
    /// The current leader, or nothing if the cluster has none.
    Leader,
    /// Every member except the leader.
    AllFollowers,
    /// One follower, chosen uniformly.
    AnyFollower,
    /// One host from the set that currently carries a fault.
    AnyFaultInjectedNode,
    /// The leader, only if it currently carries a fault.
    FaultInjectedLeader,
    /// One follower from the set that currently carries a fault.
    AnyFaultInjectedFollower,
}

impl Scope {
    /// Parse a plan-file scope name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "all_nodes" => Some(Scope::AllNodes),
            "half_nodes" => Some(Scope::HalfNodes),
            "any_node" => Some(Scope::AnyNode),
            "leader" => Some(Scope::Leader),
            "all_followers" => Some(Scope::AllFollowers),
            "any_follower" => Some(Scope::AnyFollower),
            "any_fault_injected_node" => Some(Scope::AnyFaultInjectedNode),
            "fault_injected_leader" => Some(Scope::FaultInjectedLeader),
            "any_fault_injected_follower" => Some(Scope::AnyFaultInjectedFollower),
            _ => None,
        }
    }

    /// The wire name, as written in plan files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::AllNodes => "all_nodes",
            Scope::HalfNodes => "half_nodes",
            Scope::AnyNode => "any_node",
            Scope::Leader => "leader",
            Scope::AllFollowers => "all_followers",
            Scope::AnyFollower => "any_follower",
            Scope::AnyFaultInjectedNode => "any_fault_injected_node",
            Scope::FaultInjectedLeader => "fault_injected_leader",
            Scope::AnyFaultInjectedFollower => "any_fault_injected_follower",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure while turning a scope into concrete hosts.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// The topology probe could not produce a usable answer.
    #[error(transparent)]
    Topology(#[from] TopologyError),
    /// The cluster reported a host that is not in the configured node table.
    #[error("cluster reports host {host} which is not configured")]
    UnknownHost {
        /// The unconfigured host address.
        host: String,
    },
}

/// Resolves scopes against one topology snapshot per call.
pub struct ScopeResolver {
    registry: Arc<ClusterRegistry>,
    probe: Arc<dyn TopologyProbe>,
}

impl ScopeResolver {
    /// Resolver over `registry`, asking `probe` for the live topology.
    pub fn new(registry: Arc<ClusterRegistry>, probe: Arc<dyn TopologyProbe>) -> Self {
        Self { registry, probe }
    }

    /// Hosts selected by `scope` against the topology as of this call.
    ///
    /// Queries the probe exactly once. An empty selection is legal and
    /// logged as a warning; callers treat it as "nothing to do".
    pub async fn resolve_hosts(&self, scope: Scope) -> Result<Vec<String>, ScopeError> {
        let topology = self.probe.query_topology().await?;
        let injected = self.registry.injected_hosts();
        let hosts = select(scope, &topology, &injected, &mut rand::thread_rng());
        if hosts.is_empty() {
            tracing::warn!(scope = %scope, "scope selected no hosts");
        } else {
            tracing::info!(scope = %scope, hosts = ?hosts, "scope resolved");
        }
        Ok(hosts)
    }

    /// SQL transports for the hosts selected by `scope`.
    ///
    /// A selected host with no configured transport is fatal: it means the
    /// cluster and the plan disagree about membership.
    pub async fn resolve_databases(
        &self,
        scope: Scope,
    ) -> Result<Vec<Arc<dyn SqlTransport>>, ScopeError> {
        let hosts = self.resolve_hosts(scope).await?;
        hosts
            .into_iter()
            .map(|host| {
                self.registry
                    .database_for_host(&host)
                    .ok_or(ScopeError::UnknownHost { host })
            })
            .collect()
    }

    /// Command transports for the hosts selected by `scope`.
    pub async fn resolve_injectors(
        &self,
        scope: Scope,
    ) -> Result<Vec<Arc<dyn CommandTransport>>, ScopeError> {
        let hosts = self.resolve_hosts(scope).await?;
        hosts
            .into_iter()
            .map(|host| {
                self.registry
                    .injector_for_host(&host)
                    .ok_or(ScopeError::UnknownHost { host })
            })
            .collect()
    }
}

/// Pick the hosts `scope` names out of `topology` and the injected set.
///
/// Pure selection; sampling draws from `rng` without replacement.
fn select<R: Rng + ?Sized>(
    scope: Scope,
    topology: &Topology,
    injected: &HashSet<String>,
    rng: &mut R,
) -> Vec<String> {
    let members = &topology.members;
    let followers = topology.followers();
    match scope {
        Scope::AllNodes => members.clone(),
        Scope::HalfNodes => sample(members, members.len() / 2 + 1, rng),
        Scope::AnyNode => sample(members, 1, rng),
        Scope::Leader => topology.leader.iter().cloned().collect(),
        Scope::AllFollowers => followers,
        Scope::AnyFollower => sample(&followers, 1, rng),
        Scope::AnyFaultInjectedNode => {
            let mut candidates: Vec<String> = injected.iter().cloned().collect();
            candidates.sort();
            sample(&candidates, 1, rng)
        }
        Scope::FaultInjectedLeader => topology
            .leader
            .iter()
            .filter(|leader| injected.contains(*leader))
            .cloned()
            .collect(),
        Scope::AnyFaultInjectedFollower => {
            let candidates: Vec<String> = followers
                .into_iter()
                .filter(|follower| injected.contains(follower))
                .collect();
            sample(&candidates, 1, rng)
        }
    }
}

/// Up to `count` distinct items from `candidates`, uniformly.
fn sample<R: Rng + ?Sized>(candidates: &[String], count: usize, rng: &mut R) -> Vec<String> {
    candidates.choose_multiple(rng, count).cloned().collect()
}
