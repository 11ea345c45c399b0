//! Live cluster topology queries.
//!
//! The scope resolver needs to know, at the moment an event fires, who the
//! leader is and which members exist. That snapshot comes from the status
//! endpoint of any one configured member: members are tried in alias order
//! and the first reachable answer wins. Snapshots are never cached across
//! resolutions — leadership is expected to move mid-run.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::NodeIdentity;

/// Observed cluster state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Current leader host, if one is elected.
    pub leader: Option<String>,
    /// All member hosts, in the order the cluster reported them.
    pub members: Vec<String>,
}

impl Topology {
    /// Members that are not the current leader.
    ///
    /// With no elected leader every member counts as a follower.
    pub fn followers(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| Some(m.as_str()) != self.leader.as_deref())
            .cloned()
            .collect()
    }
}

/// Errors from a topology query.
///
/// These are surfaced to the caller of scope resolution, never retried
/// internally — the event task that cannot resolve its scope fails alone.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// No configured member answered the status query.
    #[error("no configured member answered the status query (last failure: {last})")]
    Unreachable {
        /// Failure from the last member tried.
        last: String,
    },
    /// A member answered, but the response could not be interpreted.
    #[error("malformed status response from {host}: {detail}")]
    Malformed {
        /// The member that produced the response.
        host: String,
        /// What was wrong with it.
        detail: String,
    },
}

/// Capability of observing the cluster's current topology.
#[async_trait]
pub trait TopologyProbe: Send + Sync {
    /// Query one live member for the current leader and member set.
    async fn query_topology(&self) -> Result<Topology, TopologyError>;
}

// ---------------------------------------------------------------------------
// Status endpoint wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StatusResponse {
    store: StoreStatus,
}

#[derive(Debug, Deserialize)]
struct StoreStatus {
    #[serde(default)]
    leader: Option<LeaderStatus>,
    nodes: Vec<MemberStatus>,
}

#[derive(Debug, Deserialize)]
struct LeaderStatus {
    #[serde(default)]
    addr: String,
}

#[derive(Debug, Deserialize)]
struct MemberStatus {
    addr: String,
}

/// Drop the port (and any IPv6 brackets) from a reported address.
///
/// The status endpoint reports raft addresses like `10.0.1.11:4002`; the
/// registry tables are keyed by bare host.
fn strip_port(addr: &str) -> String {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']').to_string()
}

/// Parse a status body into a [`Topology`].
fn parse_status(host: &str, body: &str) -> Result<Topology, TopologyError> {
    let status: StatusResponse =
        serde_json::from_str(body).map_err(|e| TopologyError::Malformed {
            host: host.to_string(),
            detail: e.to_string(),
        })?;

    let leader = status
        .store
        .leader
        .map(|l| l.addr)
        .filter(|addr| !addr.is_empty())
        .map(|addr| strip_port(&addr));

    let members = status
        .store
        .nodes
        .iter()
        .map(|n| strip_port(&n.addr))
        .collect();

    Ok(Topology { leader, members })
}

// ---------------------------------------------------------------------------
// HTTP probe
// ---------------------------------------------------------------------------

/// [`TopologyProbe`] over the members' HTTP status endpoints.
pub struct HttpTopologyProbe {
    http: reqwest::Client,
    /// (alias, status URL) in alias order.
    targets: Vec<(String, String)>,
    timeout: Duration,
}

impl HttpTopologyProbe {
    /// Build a probe over the configured members.
    pub fn new(nodes: &[NodeIdentity]) -> Self {
        let timeout = nodes
            .first()
            .map(|n| Duration::from_secs(n.request_timeout_secs))
            .unwrap_or(Duration::from_secs(10));
        Self {
            http: reqwest::Client::new(),
            targets: nodes
                .iter()
                .map(|n| (n.alias.clone(), n.status_url()))
                .collect(),
            timeout,
        }
    }

    async fn try_member(&self, alias: &str, url: &str) -> Result<Topology, TopologyError> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TopologyError::Unreachable {
                last: format!("{alias}: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(TopologyError::Unreachable {
                last: format!("{alias}: status {}", response.status()),
            });
        }

        let body = response.text().await.map_err(|e| TopologyError::Unreachable {
            last: format!("{alias}: {e}"),
        })?;

        parse_status(alias, &body)
    }
}

#[async_trait]
impl TopologyProbe for HttpTopologyProbe {
    async fn query_topology(&self) -> Result<Topology, TopologyError> {
        let mut last = String::from("no members configured");
        for (alias, url) in &self.targets {
            match self.try_member(alias, url).await {
                Ok(topology) => {
                    tracing::debug!(
                        "topology from {alias}: leader={:?}, members={}",
                        topology.leader,
                        topology.members.len()
                    );
                    return Ok(topology);
                }
                // A malformed answer from a live member is not something a
                // different member will fix.
                Err(err @ TopologyError::Malformed { .. }) => return Err(err),
                Err(TopologyError::Unreachable { last: failure }) => {
                    tracing::debug!("status query skipped member: {failure}");
                    last = failure;
                }
            }
        }
        Err(TopologyError::Unreachable { last })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_BODY: &str = r#"{
        "store": {
            "leader": { "addr": "10.0.1.11:4002", "node_id": "1" },
            "nodes": [
                { "id": "1", "addr": "10.0.1.11:4002" },
                { "id": "2", "addr": "10.0.1.12:4002" },
                { "id": "3", "addr": "10.0.1.13:4002" }
            ]
        }
    }"#;

    #[test]
    fn parses_leader_and_members() {
        let topology = parse_status("n1", STATUS_BODY).unwrap();
        assert_eq!(topology.leader.as_deref(), Some("10.0.1.11"));
        assert_eq!(
            topology.members,
            vec!["10.0.1.11", "10.0.1.12", "10.0.1.13"]
        );
    }

    #[test]
    fn empty_leader_addr_means_no_leader() {
        let body = r#"{
            "store": {
                "leader": { "addr": "" },
                "nodes": [ { "addr": "10.0.1.11:4002" } ]
            }
        }"#;
        let topology = parse_status("n1", body).unwrap();
        assert_eq!(topology.leader, None);
        assert_eq!(topology.members, vec!["10.0.1.11"]);
    }

    #[test]
    fn missing_store_is_malformed() {
        let err = parse_status("n1", r#"{"build": {}}"#).unwrap_err();
        match err {
            TopologyError::Malformed { host, .. } => assert_eq!(host, "n1"),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn strips_ports_and_brackets() {
        assert_eq!(strip_port("10.0.1.11:4002"), "10.0.1.11");
        assert_eq!(strip_port("10.0.1.11"), "10.0.1.11");
        assert_eq!(strip_port("[::1]:4002"), "::1");
        assert_eq!(strip_port("node-1.local:4002"), "node-1.local");
    }

    #[test]
    fn followers_exclude_leader() {
        let topology = parse_status("n1", STATUS_BODY).unwrap();
        assert_eq!(topology.followers(), vec!["10.0.1.12", "10.0.1.13"]);

        let leaderless = Topology {
            leader: None,
            members: vec!["a".into(), "b".into()],
        };
        assert_eq!(leaderless.followers(), vec!["a", "b"]);
    }
}
