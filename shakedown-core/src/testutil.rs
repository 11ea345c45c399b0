//! Scripted transports and probes shared by the module tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{ClusterConfig, NodeConfig};
use crate::registry::ClusterRegistry;
use crate::remote::{CommandTransport, RemoteError, ResultTable, SqlTransport};
use crate::topology::{Topology, TopologyError, TopologyProbe};

/// Probe returning a fixed topology (or a fixed failure).
pub(crate) struct MockProbe {
    pub leader: Option<String>,
    pub members: Vec<String>,
    pub fail: bool,
}

impl MockProbe {
    pub(crate) fn healthy(leader: &str, members: &[&str]) -> Self {
        Self {
            leader: Some(leader.to_string()),
            members: members.iter().map(|m| m.to_string()).collect(),
            fail: false,
        }
    }

    pub(crate) fn unreachable() -> Self {
        Self {
            leader: None,
            members: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl TopologyProbe for MockProbe {
    async fn query_topology(&self) -> Result<Topology, TopologyError> {
        if self.fail {
            return Err(TopologyError::Unreachable {
                last: "mock probe down".into(),
            });
        }
        Ok(Topology {
            leader: self.leader.clone(),
            members: self.members.clone(),
        })
    }
}

/// SQL transport that records batches and replays scripted query tables.
pub(crate) struct MockSql {
    host: String,
    pub executed: Mutex<Vec<Vec<String>>>,
    pub queried: Mutex<Vec<Vec<String>>>,
    pub query_tables: Mutex<Vec<ResultTable>>,
    pub fail_execute: AtomicBool,
    pub fail_query: AtomicBool,
    pub connected: AtomicBool,
    pub closed: AtomicBool,
    pub fail_close: bool,
}

impl MockSql {
    pub(crate) fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            executed: Mutex::new(Vec::new()),
            queried: Mutex::new(Vec::new()),
            query_tables: Mutex::new(Vec::new()),
            fail_execute: AtomicBool::new(false),
            fail_query: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_close: false,
        }
    }

    pub(crate) fn script_query(&self, table: ResultTable) {
        *self.query_tables.lock().unwrap() = vec![table];
    }

    /// Flattened list of every statement executed, batch order preserved.
    pub(crate) fn executed_statements(&self) -> Vec<String> {
        self.executed.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl SqlTransport for MockSql {
    fn host(&self) -> &str {
        &self.host
    }

    async fn connect(&self) -> Result<(), RemoteError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, statements: &[String]) -> Result<(), RemoteError> {
        if self.fail_execute.load(Ordering::SeqCst) {
            return Err(RemoteError::Http("mock execute failure".into()));
        }
        self.executed.lock().unwrap().push(statements.to_vec());
        Ok(())
    }

    async fn query(&self, statements: &[String]) -> Result<Vec<ResultTable>, RemoteError> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(RemoteError::Http("mock query failure".into()));
        }
        self.queried.lock().unwrap().push(statements.to_vec());
        Ok(self.query_tables.lock().unwrap().clone())
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(RemoteError::Http("mock close failure".into()));
        }
        Ok(())
    }
}

/// Command transport replaying a queue of scripted responses.
///
/// When the queue runs dry every command answers with `default_response`.
pub(crate) struct MockAgent {
    host: String,
    pub commands: Mutex<Vec<String>>,
    pub responses: Mutex<VecDeque<Result<String, RemoteError>>>,
    pub default_response: String,
    pub connected: AtomicBool,
    pub closed: AtomicBool,
    pub fail_close: bool,
}

impl MockAgent {
    pub(crate) fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            commands: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            default_response: blade_ok("default-id"),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_close: false,
        }
    }

    pub(crate) fn push_response(&self, response: Result<String, RemoteError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn command_log(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandTransport for MockAgent {
    fn host(&self) -> &str {
        &self.host
    }

    async fn connect(&self) -> Result<(), RemoteError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn run_command(&self, command: &str) -> Result<String, RemoteError> {
        self.commands.lock().unwrap().push(command.to_string());
        match self.responses.lock().unwrap().pop_front() {
            Some(scripted) => scripted,
            None => Ok(self.default_response.clone()),
        }
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(RemoteError::CommandFailed {
                host: self.host.clone(),
                stderr: "mock close failure".into(),
            });
        }
        Ok(())
    }
}

/// A successful chaos-agent response carrying `id` as the fault id.
pub(crate) fn blade_ok(id: &str) -> String {
    format!(r#"{{"code": 200, "success": true, "result": "{id}"}}"#)
}

/// A failed chaos-agent response.
pub(crate) fn blade_fail(detail: &str) -> String {
    format!(r#"{{"code": 500, "success": false, "error": "{detail}"}}"#)
}

/// Build a registry over mock transports for the given (alias, host) pairs.
///
/// Returns the registry plus the concrete mock handles, alias-ordered, so
/// tests can script and inspect them.
pub(crate) fn mock_registry(
    nodes: &[(&str, &str)],
) -> (Arc<ClusterRegistry>, Vec<Arc<MockSql>>, Vec<Arc<MockAgent>>) {
    let config = ClusterConfig {
        retry_count: 2,
        request_timeout_secs: 5,
        nodes: nodes
            .iter()
            .map(|(alias, host)| {
                (
                    alias.to_string(),
                    NodeConfig {
                        host: host.to_string(),
                        api_port: 4001,
                        ssh_port: 22,
                        db_user: "centos".into(),
                        agent_user: "root".into(),
                    },
                )
            })
            .collect(),
    };

    // Alias order matches the config BTreeMap order.
    let sqls: Vec<Arc<MockSql>> = config
        .nodes
        .values()
        .map(|n| Arc::new(MockSql::new(&n.host)))
        .collect();
    let agents: Vec<Arc<MockAgent>> = config
        .nodes
        .values()
        .map(|n| Arc::new(MockAgent::new(&n.host)))
        .collect();

    let mut sql_iter = sqls.iter().cloned();
    let mut agent_iter = agents.iter().cloned();
    let registry = ClusterRegistry::with_transports(
        &config,
        |_| sql_iter.next().expect("one sql mock per node") as Arc<dyn SqlTransport>,
        |_| agent_iter.next().expect("one agent mock per node") as Arc<dyn CommandTransport>,
    )
    .expect("mock config is valid");

    (Arc::new(registry), sqls, agents)
}
