//! Connection registry for a configured cluster.
//!
//! The registry owns one SQL transport and one command transport per
//! configured node, the alias/host mapping between them, and the shared
//! set of hosts that currently carry an active fault. Everything else in
//! the crate reaches the cluster through this table.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashSet;

use crate::agent::AgentClient;
use crate::config::{ClusterConfig, ConfigError, NodeIdentity};
use crate::remote::{CommandTransport, RemoteError, SqlTransport};
use crate::sql::SqlClient;

/// Per-node transports plus the fault bookkeeping shared across events.
pub struct ClusterRegistry {
    nodes: BTreeMap<String, NodeIdentity>,
    alias_by_host: HashMap<String, String>,
    databases: BTreeMap<String, Arc<dyn SqlTransport>>,
    injectors: BTreeMap<String, Arc<dyn CommandTransport>>,
    injected: DashSet<String>,
}

impl ClusterRegistry {
    /// Build a registry with real HTTP and ssh transports for every node.
    pub fn from_config(config: &ClusterConfig) -> Result<Self, ConfigError> {
        Self::with_transports(
            config,
            |node| Arc::new(SqlClient::new(node)) as Arc<dyn SqlTransport>,
            |node| Arc::new(AgentClient::new(node)) as Arc<dyn CommandTransport>,
        )
    }

    /// Build a registry with caller-supplied transports.
    ///
    /// The factories are invoked once per node in alias order. Used by the
    /// tests, and by embedders that bring their own transport layer.
    pub fn with_transports(
        config: &ClusterConfig,
        mut make_database: impl FnMut(&NodeIdentity) -> Arc<dyn SqlTransport>,
        mut make_injector: impl FnMut(&NodeIdentity) -> Arc<dyn CommandTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut nodes = BTreeMap::new();
        let mut alias_by_host = HashMap::new();
        let mut databases = BTreeMap::new();
        let mut injectors = BTreeMap::new();
        for identity in config.identities() {
            alias_by_host.insert(identity.host.clone(), identity.alias.clone());
            databases.insert(identity.alias.clone(), make_database(&identity));
            injectors.insert(identity.alias.clone(), make_injector(&identity));
            nodes.insert(identity.alias.clone(), identity);
        }

        Ok(Self {
            nodes,
            alias_by_host,
            databases,
            injectors,
            injected: DashSet::new(),
        })
    }

    /// Configured aliases in sorted order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Identity record for an alias.
    pub fn identity(&self, alias: &str) -> Option<&NodeIdentity> {
        self.nodes.get(alias)
    }

    /// Alias that maps to `host`, if the host is configured.
    pub fn alias_of(&self, host: &str) -> Option<&str> {
        self.alias_by_host.get(host).map(String::as_str)
    }

    /// SQL transport for `host`, or `None` when the host is not configured.
    pub fn database_for_host(&self, host: &str) -> Option<Arc<dyn SqlTransport>> {
        let alias = self.alias_by_host.get(host)?;
        self.databases.get(alias).cloned()
    }

    /// Command transport for `host`, or `None` when the host is not configured.
    pub fn injector_for_host(&self, host: &str) -> Option<Arc<dyn CommandTransport>> {
        let alias = self.alias_by_host.get(host)?;
        self.injectors.get(alias).cloned()
    }

    /// SQL transport of the first alias in sorted order.
    ///
    /// Workload setup runs against this node; writes replicate from there.
    pub fn first_database(&self) -> Option<Arc<dyn SqlTransport>> {
        self.databases.values().next().cloned()
    }

    /// Record that `host` now carries an active fault.
    pub fn mark_injected(&self, host: &str) {
        self.injected.insert(host.to_string());
    }

    /// Record that the fault on `host` has been removed.
    pub fn clear_injected(&self, host: &str) {
        self.injected.remove(host);
    }

    /// Whether `host` currently carries an active fault.
    pub fn is_injected(&self, host: &str) -> bool {
        self.injected.contains(host)
    }

    /// Snapshot of the hosts that currently carry an active fault.
    pub fn injected_hosts(&self) -> HashSet<String> {
        self.injected.iter().map(|h| h.clone()).collect()
    }

    /// Open every transport, alias order, failing on the first refusal.
    ///
    /// Runs before any event is scheduled; a node that cannot be reached
    /// here would fail mid-run anyway, so refuse to start instead.
    pub async fn connect_all(&self) -> Result<(), RemoteError> {
        for (alias, database) in &self.databases {
            tracing::info!(alias = alias.as_str(), "opening database transport");
            database.connect().await?;
        }
        for (alias, injector) in &self.injectors {
            tracing::info!(alias = alias.as_str(), "opening injector transport");
            injector.connect().await?;
        }
        Ok(())
    }

    /// Close every transport, logging failures instead of propagating them.
    ///
    /// Teardown runs on every exit path, including after a failed run, so a
    /// node that died mid-run must not block the remaining closes.
    pub async fn teardown_all(&self) {
        for (alias, database) in &self.databases {
            if let Err(err) = database.close().await {
                tracing::error!(
                    alias = alias.as_str(),
                    error = %err,
                    "failed to close database transport"
                );
            }
        }
        for (alias, injector) in &self.injectors {
            if let Err(err) = injector.close().await {
                tracing::error!(
                    alias = alias.as_str(),
                    error = %err,
                    "failed to close injector transport"
                );
            }
        }
    }
}
