//! Fault injection and its deterministic reversal.
//!
//! A [`Nemesis`] wraps one scheduled fault: it waits for its start offset,
//! dispatches a creation command to the chaos agent on every host its scope
//! resolves to, holds the fault for its declared duration, then destroys
//! every fault id it recorded. The fault record is owned by the nemesis
//! alone; the shared injected-host set in the registry is only advisory
//! input for scope selection.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ClusterRegistry;
use crate::scope::{Scope, ScopeError, ScopeResolver};

/// Network fault kinds the chaos agent knows how to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Drop a percentage of packets.
    NetworkLoss,
    /// Delay packets by a fixed time.
    NetworkDelay,
    /// Duplicate a percentage of packets.
    NetworkDuplicate,
    /// Corrupt a percentage of packets.
    NetworkCorrupt,
}

impl FaultKind {
    /// Parse a plan-file fault name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "network_loss" => Some(FaultKind::NetworkLoss),
            "network_delay" => Some(FaultKind::NetworkDelay),
            "network_duplicate" => Some(FaultKind::NetworkDuplicate),
            "network_corrupt" => Some(FaultKind::NetworkCorrupt),
            _ => None,
        }
    }

    /// The fault name as written in plan files.
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::NetworkLoss => "network_loss",
            FaultKind::NetworkDelay => "network_delay",
            FaultKind::NetworkDuplicate => "network_duplicate",
            FaultKind::NetworkCorrupt => "network_corrupt",
        }
    }

    /// The subcommand the agent expects after `blade create network`.
    fn blade_arg(&self) -> &'static str {
        match self {
            FaultKind::NetworkLoss => "loss",
            FaultKind::NetworkDelay => "delay",
            FaultKind::NetworkDuplicate => "duplicate",
            FaultKind::NetworkCorrupt => "corrupt",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific fault parameters, with plan-file defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultParams {
    /// Interface the fault applies to.
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Packet percentage for loss, duplicate, and corrupt faults.
    #[serde(default = "default_percent")]
    pub percent: u8,
    /// Added latency in milliseconds for delay faults.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u32,
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_percent() -> u8 {
    100
}

fn default_delay_ms() -> u32 {
    200
}

impl Default for FaultParams {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            percent: default_percent(),
            delay_ms: default_delay_ms(),
        }
    }
}

/// Failure in the fault lifecycle.
#[derive(Debug, Error)]
pub enum NemesisError {
    /// The scope could not be resolved.
    #[error(transparent)]
    Scope(#[from] ScopeError),
    /// The agent refused or failed a fault-creation command.
    #[error("fault injection on {host} failed: {detail}")]
    Injection {
        /// Host the creation command targeted.
        host: String,
        /// Agent error text, or the transport failure.
        detail: String,
    },
    /// The agent refused or failed a fault-destruction command.
    #[error("fault recovery on {host} failed: {detail}")]
    Recovery {
        /// Host the destroy command targeted.
        host: String,
        /// Agent error text, or the transport failure.
        detail: String,
    },
}

/// Chaos-agent response envelope. Missing fields count as failure.
#[derive(Debug, Deserialize)]
struct AgentResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl AgentResponse {
    fn parse(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw.trim()).map_err(|err| format!("unparsable agent response: {err}"))
    }

    fn is_ok(&self) -> bool {
        self.success && self.code == 200
    }

    fn failure_detail(&self, raw: &str) -> String {
        self.error.clone().unwrap_or_else(|| raw.trim().to_string())
    }
}

/// Extra seconds granted to the agent-side auto-expiry so that explicit
/// recovery always runs before the agent destroys the fault on its own.
const AGENT_TIMEOUT_MARGIN_SECS: u64 = 60;

/// Render the agent command that creates one fault on one host.
///
/// The listed ports are excluded from the fault so the control plane
/// (ssh and the database API) stays reachable while packets drop.
fn create_command(
    kind: FaultKind,
    params: &FaultParams,
    exclude_ports: &[u16],
    timeout_secs: u64,
) -> String {
    let ports = exclude_ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let mut command = format!(
        "blade create network {} --interface {} --exclude-port {} --timeout {}",
        kind.blade_arg(),
        params.interface,
        ports,
        timeout_secs
    );
    match kind {
        FaultKind::NetworkDelay => {
            command.push_str(&format!(" --time {}", params.delay_ms));
        }
        FaultKind::NetworkLoss | FaultKind::NetworkDuplicate | FaultKind::NetworkCorrupt => {
            command.push_str(&format!(" --percent {}", params.percent));
        }
    }
    command
}

/// Render the agent command that destroys one fault by id.
fn destroy_command(fault_id: &str) -> String {
    format!("blade destroy {fault_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NemesisState {
    Pending,
    Injected,
    Recovered,
}

/// One scheduled fault with its record of agent-issued fault ids.
pub struct Nemesis {
    kind: FaultKind,
    params: FaultParams,
    scope: Scope,
    start_offset: Duration,
    hold: Duration,
    registry: Arc<ClusterRegistry>,
    resolver: Arc<ScopeResolver>,
    state: NemesisState,
    record: BTreeMap<String, Vec<String>>,
}

impl Nemesis {
    /// A pending nemesis; nothing touches the cluster until [`Nemesis::run`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: FaultKind,
        params: FaultParams,
        scope: Scope,
        start_offset: Duration,
        hold: Duration,
        registry: Arc<ClusterRegistry>,
        resolver: Arc<ScopeResolver>,
    ) -> Self {
        Self {
            kind,
            params,
            scope,
            start_offset,
            hold,
            registry,
            resolver,
            state: NemesisState::Pending,
            record: BTreeMap::new(),
        }
    }

    /// Full lifecycle: inject at the start offset, hold, then recover.
    ///
    /// A failed injection still proceeds to recovery after the hold, so
    /// that faults created before the failure are cleaned up. The
    /// injection failure stays the reported outcome.
    pub async fn run(&mut self) -> Result<(), NemesisError> {
        let injected = self.inject().await;
        if let Err(err) = &injected {
            tracing::warn!(
                kind = %self.kind,
                error = %err,
                "injection failed; recovery will still run for any recorded faults"
            );
        }
        tokio::time::sleep(self.hold).await;
        let recovered = self.recover().await;
        injected.and(recovered)
    }

    /// Wait for the start offset, then create the fault on every host the
    /// scope resolves to.
    ///
    /// The first non-success response aborts the loop, leaving the ids
    /// already issued in the record. A partially injected fault is a valid
    /// test condition; recovery remains responsible for all recorded ids.
    pub async fn inject(&mut self) -> Result<(), NemesisError> {
        tokio::time::sleep(self.start_offset).await;
        let injectors = self.resolver.resolve_injectors(self.scope).await?;
        if injectors.is_empty() {
            tracing::warn!(kind = %self.kind, scope = %self.scope, "no targets; fault skipped");
            return Ok(());
        }

        let timeout_secs = self.hold.as_secs() + AGENT_TIMEOUT_MARGIN_SECS;
        for injector in injectors {
            let host = injector.host().to_string();
            let identity = self
                .registry
                .alias_of(&host)
                .and_then(|alias| self.registry.identity(alias))
                .ok_or_else(|| NemesisError::Injection {
                    host: host.clone(),
                    detail: "host is not configured".to_string(),
                })?;
            let command = create_command(
                self.kind,
                &self.params,
                &[identity.ssh_port, identity.api_port],
                timeout_secs,
            );

            let raw = injector
                .run_command(&command)
                .await
                .map_err(|err| NemesisError::Injection {
                    host: host.clone(),
                    detail: err.to_string(),
                })?;
            let fault_id = parse_fault_id(&host, &raw)?;

            tracing::info!(kind = %self.kind, host = host.as_str(), fault_id = fault_id.as_str(), "fault injected");
            self.record.entry(host.clone()).or_default().push(fault_id);
            self.registry.mark_injected(&host);
        }

        self.state = NemesisState::Injected;
        Ok(())
    }

    /// Destroy every recorded fault id, attempting each exactly once.
    ///
    /// Ids whose destroy succeeds are pruned immediately, so a later call
    /// never double-destroys; ids that fail stay recorded for a retry. A
    /// host leaves the injected set only once all of its ids are gone.
    /// With an empty record this is a no-op.
    pub async fn recover(&mut self) -> Result<(), NemesisError> {
        if self.record.is_empty() {
            if self.state == NemesisState::Recovered {
                tracing::debug!(kind = %self.kind, "already recovered");
            }
            return Ok(());
        }

        let mut first_failure = None;
        let hosts: Vec<String> = self.record.keys().cloned().collect();
        for host in hosts {
            let injector = match self.registry.injector_for_host(&host) {
                Some(injector) => injector,
                None => {
                    // Losing the transport for a host that still carries a
                    // fault is unrecoverable from here.
                    let err = NemesisError::Recovery {
                        host: host.clone(),
                        detail: "host is not configured".to_string(),
                    };
                    tracing::error!(error = %err, "cannot recover fault");
                    first_failure.get_or_insert(err);
                    continue;
                }
            };

            let ids = self.record.remove(&host).unwrap_or_default();
            let mut failed_ids = Vec::new();
            for fault_id in ids {
                match destroy_fault(injector.as_ref(), &host, &fault_id).await {
                    Ok(()) => {
                        tracing::info!(host = host.as_str(), fault_id = fault_id.as_str(), "fault removed");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "fault destroy failed");
                        failed_ids.push(fault_id);
                        first_failure.get_or_insert(err);
                    }
                }
            }
            if failed_ids.is_empty() {
                self.registry.clear_injected(&host);
            } else {
                self.record.insert(host, failed_ids);
            }
        }

        match first_failure {
            None => {
                self.state = NemesisState::Recovered;
                Ok(())
            }
            Some(err) => Err(err),
        }
    }
}

async fn destroy_fault(
    injector: &dyn crate::remote::CommandTransport,
    host: &str,
    fault_id: &str,
) -> Result<(), NemesisError> {
    let raw = injector
        .run_command(&destroy_command(fault_id))
        .await
        .map_err(|err| NemesisError::Recovery {
            host: host.to_string(),
            detail: err.to_string(),
        })?;
    let response = AgentResponse::parse(&raw).map_err(|detail| NemesisError::Recovery {
        host: host.to_string(),
        detail,
    })?;
    if response.is_ok() {
        Ok(())
    } else {
        Err(NemesisError::Recovery {
            host: host.to_string(),
            detail: response.failure_detail(&raw),
        })
    }
}

fn parse_fault_id(host: &str, raw: &str) -> Result<String, NemesisError> {
    let response = AgentResponse::parse(raw).map_err(|detail| NemesisError::Injection {
        host: host.to_string(),
        detail,
    })?;
    if !response.is_ok() {
        return Err(NemesisError::Injection {
            host: host.to_string(),
            detail: response.failure_detail(raw),
        });
    }
    match response.result {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(NemesisError::Injection {
            host: host.to_string(),
            detail: "agent reported success without a fault id".to_string(),
        }),
    }
}
