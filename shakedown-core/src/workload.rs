//! Write workloads issued against scope-resolved databases.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::{RemoteError, SqlTransport};
use crate::scope::{Scope, ScopeError, ScopeResolver};

/// Table the workloads write and the checks read.
pub const COUNTER_TABLE: &str = "tc";

/// Name column value for every row this process writes.
const WRITER_TAG: &str = "shakedown";

/// Statements that prepare the counter table for a fresh run.
pub fn init_statements() -> Vec<String> {
    vec![
        format!("CREATE TABLE IF NOT EXISTS {COUNTER_TABLE} (name TEXT, count INTEGER)"),
        format!("DELETE FROM {COUNTER_TABLE}"),
    ]
}

/// Workload kinds a plan can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    /// Insert the next counter value into every resolved database.
    SingleInsert,
}

impl WorkloadKind {
    /// Parse a plan-file workload name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "single_insert" => Some(WorkloadKind::SingleInsert),
            _ => None,
        }
    }

    /// The workload name as written in plan files.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::SingleInsert => "single_insert",
        }
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure while running a workload.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// The scope could not be resolved.
    #[error(transparent)]
    Scope(#[from] ScopeError),
    /// A resolved database refused the write.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Run-wide counter shared by every workload event.
///
/// All workloads in one run draw from the same sequence, so their combined
/// rows form a single contiguous series for the checker to verify.
#[derive(Clone, Default)]
pub struct Sequence(Arc<AtomicU64>);

impl Sequence {
    /// A fresh sequence starting at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// The next counter value; safe to call from concurrent events.
    pub fn next_value(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// One scheduled workload event.
pub struct Workload {
    kind: WorkloadKind,
    scope: Scope,
    start_offset: Duration,
    times: u32,
    sequence: Sequence,
    resolver: Arc<ScopeResolver>,
}

impl Workload {
    /// A pending workload; nothing runs until [`Workload::run`].
    pub fn new(
        kind: WorkloadKind,
        scope: Scope,
        start_offset: Duration,
        times: u32,
        sequence: Sequence,
        resolver: Arc<ScopeResolver>,
    ) -> Self {
        Self {
            kind,
            scope,
            start_offset,
            times,
            sequence,
            resolver,
        }
    }

    /// Wait for the start offset, resolve the scope once, then write.
    pub async fn run(&self) -> Result<(), WorkloadError> {
        tokio::time::sleep(self.start_offset).await;
        let databases = self.resolver.resolve_databases(self.scope).await?;
        if databases.is_empty() {
            tracing::warn!(kind = %self.kind, scope = %self.scope, "no targets; workload skipped");
            return Ok(());
        }
        match self.kind {
            WorkloadKind::SingleInsert => self.single_insert(&databases).await,
        }
    }

    /// `times` rounds of inserting the next counter value into every target.
    ///
    /// The same value goes to every database in a round; replication is
    /// expected to reconcile them, and the checker reads only one node.
    async fn single_insert(
        &self,
        databases: &[Arc<dyn SqlTransport>],
    ) -> Result<(), WorkloadError> {
        for _ in 0..self.times {
            let value = self.sequence.next_value();
            let statement =
                format!("INSERT INTO {COUNTER_TABLE} (name, count) VALUES ('{WRITER_TAG}', {value})");
            for database in databases {
                tracing::debug!(host = database.host(), value, "workload insert");
                database.execute(std::slice::from_ref(&statement)).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::testutil::{mock_registry, MockProbe};

    fn workload_over(
        scope: Scope,
        times: u32,
        sequence: Sequence,
        registry: Arc<crate::registry::ClusterRegistry>,
        probe: MockProbe,
    ) -> Workload {
        let resolver = Arc::new(ScopeResolver::new(registry, Arc::new(probe)));
        Workload::new(
            WorkloadKind::SingleInsert,
            scope,
            Duration::ZERO,
            times,
            sequence,
            resolver,
        )
    }

    #[test]
    fn sequence_is_contiguous_across_clones() {
        let sequence = Sequence::new();
        let other = sequence.clone();

        let mut seen = HashSet::new();
        for _ in 0..5 {
            seen.insert(sequence.next_value());
            seen.insert(other.next_value());
        }

        assert_eq!(seen, (1..=10).collect());
    }

    #[tokio::test]
    async fn single_insert_writes_one_row_per_round() {
        let (registry, sqls, _) = mock_registry(&[("n1", "10.0.0.1")]);
        let probe = MockProbe::healthy("10.0.0.1", &["10.0.0.1"]);
        let workload = workload_over(Scope::Leader, 3, Sequence::new(), registry, probe);

        workload.run().await.unwrap();

        let statements = sqls[0].executed_statements();
        assert_eq!(statements.len(), 3);
        for (i, statement) in statements.iter().enumerate() {
            assert_eq!(
                statement,
                &format!("INSERT INTO tc (name, count) VALUES ('shakedown', {})", i + 1)
            );
        }
    }

    #[tokio::test]
    async fn every_resolved_database_gets_the_same_value() {
        let (registry, sqls, _) = mock_registry(&[("n1", "10.0.0.1"), ("n2", "10.0.0.2")]);
        let probe = MockProbe::healthy("10.0.0.1", &["10.0.0.1", "10.0.0.2"]);
        let workload = workload_over(Scope::AllNodes, 1, Sequence::new(), registry, probe);

        workload.run().await.unwrap();

        let first = sqls[0].executed_statements();
        let second = sqls[1].executed_statements();
        assert_eq!(first, second);
        assert!(first[0].ends_with("1)"));
    }

    #[tokio::test]
    async fn concurrent_workloads_share_the_counter() {
        let (registry, sqls, _) = mock_registry(&[("n1", "10.0.0.1")]);
        let sequence = Sequence::new();
        let first = workload_over(
            Scope::Leader,
            2,
            sequence.clone(),
            registry.clone(),
            MockProbe::healthy("10.0.0.1", &["10.0.0.1"]),
        );
        let second = workload_over(
            Scope::Leader,
            2,
            sequence,
            registry,
            MockProbe::healthy("10.0.0.1", &["10.0.0.1"]),
        );

        let (a, b) = tokio::join!(first.run(), second.run());
        a.unwrap();
        b.unwrap();

        let values: HashSet<String> = sqls[0]
            .executed_statements()
            .iter()
            .map(|s| s.rsplit(' ').next().unwrap().trim_end_matches(')').to_string())
            .collect();
        assert_eq!(
            values,
            ["1", "2", "3", "4"].iter().map(|v| v.to_string()).collect()
        );
    }

    #[tokio::test]
    async fn empty_scope_skips_the_writes() {
        let (registry, sqls, _) = mock_registry(&[("n1", "10.0.0.1")]);
        let probe = MockProbe::healthy("10.0.0.1", &["10.0.0.1"]);
        let workload = workload_over(Scope::AnyFollower, 3, Sequence::new(), registry, probe);

        workload.run().await.unwrap();

        assert!(sqls[0].executed_statements().is_empty());
    }

    #[tokio::test]
    async fn write_failure_propagates() {
        let (registry, sqls, _) = mock_registry(&[("n1", "10.0.0.1")]);
        sqls[0]
            .fail_execute
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let probe = MockProbe::healthy("10.0.0.1", &["10.0.0.1"]);
        let workload = workload_over(Scope::Leader, 1, Sequence::new(), registry, probe);

        let err = workload.run().await.unwrap_err();
        assert!(matches!(err, WorkloadError::Remote(_)));
    }

    #[test]
    fn init_statements_create_and_clear_the_table() {
        let statements = init_statements();
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS tc"));
        assert_eq!(statements[1], "DELETE FROM tc");
    }
}
