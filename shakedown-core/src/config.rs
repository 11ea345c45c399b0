//! Cluster configuration loading.
//!
//! The cluster is described by a TOML file listing every node the run may
//! touch, plus a shared retry budget and request timeout:
//!
//! ```toml
//! retry_count = 3
//! request_timeout_secs = 10
//!
//! [nodes.n1]
//! host = "10.0.1.11"
//! api_port = 4001
//! ssh_port = 22
//! db_user = "centos"
//! agent_user = "root"
//! ```
//!
//! ssh authentication is key-based (keys must be pre-configured), so node
//! credentials are user names and ports. The node table is the source of
//! truth for the alias↔host mapping: a host reported by the live cluster
//! that is not configured here is an invariant breach at run time.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Root cluster configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Attempts per remote call (shared by SQL and agent transports).
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Per-request timeout in seconds for HTTP and ssh calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Configured cluster members, keyed by alias. Alias order (the map is
    /// sorted) is the order the topology probe tries members in.
    pub nodes: BTreeMap<String, NodeConfig>,
}

/// One configured cluster member.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Host address (no port).
    pub host: String,
    /// Database HTTP API port.
    pub api_port: u16,
    /// ssh port for the chaos agent (default 22).
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// User for database-side ssh and bookkeeping (default "centos").
    #[serde(default = "default_db_user")]
    pub db_user: String,
    /// User the chaos agent commands run as (default "root").
    #[serde(default = "default_agent_user")]
    pub agent_user: String,
}

/// A configured cluster member with its shared budgets resolved.
///
/// Built once at startup from [`ClusterConfig`]; immutable thereafter.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Logical name from the config file.
    pub alias: String,
    /// Host address (no port).
    pub host: String,
    /// Database HTTP API port.
    pub api_port: u16,
    /// ssh port for the chaos agent.
    pub ssh_port: u16,
    /// Database user.
    pub db_user: String,
    /// Chaos-agent user.
    pub agent_user: String,
    /// Attempts per remote call.
    pub retry_count: u32,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl NodeIdentity {
    /// Base URL of the node's database HTTP API.
    pub fn api_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.api_port)
    }

    /// URL of the node's cluster status endpoint.
    pub fn status_url(&self) -> String {
        format!("{}/status", self.api_base_url())
    }
}

// Default value functions
fn default_retry_count() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_ssh_port() -> u16 {
    22
}

fn default_db_user() -> String {
    "centos".to_string()
}

fn default_agent_user() -> String {
    "root".to_string()
}

impl ClusterConfig {
    /// Load and validate a cluster configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the rest of the engine relies on: at least one
    /// node, and exactly one alias per host (aliases are unique by
    /// construction as map keys).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }

        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (alias, node) in &self.nodes {
            if let Some(first) = seen.insert(node.host.as_str(), alias.as_str()) {
                return Err(ConfigError::DuplicateHost {
                    host: node.host.clone(),
                    first: first.to_string(),
                    second: alias.clone(),
                });
            }
        }
        Ok(())
    }

    /// Materialize the per-node identities, alias-ordered.
    pub fn identities(&self) -> Vec<NodeIdentity> {
        self.nodes
            .iter()
            .map(|(alias, node)| NodeIdentity {
                alias: alias.clone(),
                host: node.host.clone(),
                api_port: node.api_port,
                ssh_port: node.ssh_port,
                db_user: node.db_user.clone(),
                agent_user: node.agent_user.clone(),
                retry_count: self.retry_count,
                request_timeout_secs: self.request_timeout_secs,
            })
            .collect()
    }
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse the configuration file.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// The node table is empty.
    #[error("cluster config has no nodes")]
    NoNodes,
    /// Two aliases point at the same host, breaking the alias↔host
    /// bijection the scope resolver depends on.
    #[error("host {host} is configured twice (aliases {first:?} and {second:?})")]
    DuplicateHost {
        /// The duplicated host address.
        host: String,
        /// First alias claiming the host.
        first: String,
        /// Second alias claiming the host.
        second: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
retry_count = 5
request_timeout_secs = 7

[nodes.n1]
host = "10.0.1.11"
api_port = 4001

[nodes.n2]
host = "10.0.1.12"
api_port = 4001
ssh_port = 2222
db_user = "deploy"
agent_user = "chaos"
"#;

    #[test]
    fn parses_full_config() {
        let config: ClusterConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.request_timeout_secs, 7);
        assert_eq!(config.nodes.len(), 2);

        let n2 = &config.nodes["n2"];
        assert_eq!(n2.host, "10.0.1.12");
        assert_eq!(n2.ssh_port, 2222);
        assert_eq!(n2.db_user, "deploy");
        assert_eq!(n2.agent_user, "chaos");
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: ClusterConfig = toml::from_str(
            r#"
[nodes.n1]
host = "10.0.1.11"
api_port = 4001
"#,
        )
        .unwrap();

        assert_eq!(config.retry_count, 3);
        assert_eq!(config.request_timeout_secs, 10);
        let n1 = &config.nodes["n1"];
        assert_eq!(n1.ssh_port, 22);
        assert_eq!(n1.db_user, "centos");
        assert_eq!(n1.agent_user, "root");
    }

    #[test]
    fn identities_carry_shared_budgets() {
        let config: ClusterConfig = toml::from_str(SAMPLE).unwrap();
        let identities = config.identities();
        assert_eq!(identities.len(), 2);
        assert!(identities.iter().all(|n| n.retry_count == 5));
        assert_eq!(identities[0].alias, "n1");
        assert_eq!(identities[0].api_base_url(), "http://10.0.1.11:4001");
        assert_eq!(identities[0].status_url(), "http://10.0.1.11:4001/status");
    }

    #[test]
    fn rejects_empty_node_table() {
        let config: ClusterConfig = toml::from_str("[nodes]\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoNodes)));
    }

    #[test]
    fn rejects_duplicate_host() {
        let config: ClusterConfig = toml::from_str(
            r#"
[nodes.a]
host = "10.0.1.11"
api_port = 4001

[nodes.b]
host = "10.0.1.11"
api_port = 4001
"#,
        )
        .unwrap();

        match config.validate() {
            Err(ConfigError::DuplicateHost { host, first, second }) => {
                assert_eq!(host, "10.0.1.11");
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("expected DuplicateHost, got {other:?}"),
        }
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = ClusterConfig::from_file(&path).unwrap();
        assert_eq!(config.nodes.len(), 2);

        let missing = ClusterConfig::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
