//! Consistency checks over the workload's counter table.
//!
//! A violation is a reported outcome, never an error: the run keeps going
//! and the verdict lands in the logs and the run report. Only transport
//! failures propagate.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::{RemoteError, ResultTable};
use crate::scope::{Scope, ScopeError, ScopeResolver};
use crate::workload::COUNTER_TABLE;

/// Check kinds a plan can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Verify the counter column is contiguous and strictly increasing.
    IntegrityCheck,
}

impl CheckKind {
    /// Parse a plan-file check name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "integrity_check" => Some(CheckKind::IntegrityCheck),
            _ => None,
        }
    }

    /// The check name as written in plan files.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::IntegrityCheck => "integrity_check",
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure while running a check (transport or protocol, never a verdict).
#[derive(Debug, Error)]
pub enum CheckError {
    /// The scope could not be resolved.
    #[error(transparent)]
    Scope(#[from] ScopeError),
    /// The resolved database refused the query.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The query answered with something other than integer counts.
    #[error("check query returned a malformed row: {detail}")]
    Malformed {
        /// What was wrong with the row.
        detail: String,
    },
}

/// Verdict of one consistency check.
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// Whether the invariant held.
    pub passed: bool,
    /// Human-readable verdict.
    pub description: String,
    /// On failure, the first adjacent pair that breaks the sequence.
    pub violation: Option<(i64, i64)>,
}

impl CheckReport {
    fn pass(description: impl Into<String>) -> Self {
        Self {
            passed: true,
            description: description.into(),
            violation: None,
        }
    }

    fn fail(description: impl Into<String>, violation: (i64, i64)) -> Self {
        Self {
            passed: false,
            description: description.into(),
            violation: Some(violation),
        }
    }
}

/// Verify `counts` forms a contiguous, strictly increasing sequence.
///
/// Both gaps and duplicates break contiguity; the first offending
/// adjacent pair is reported. Zero or one rows trivially pass.
pub fn verify_contiguous(counts: &[i64]) -> CheckReport {
    for window in counts.windows(2) {
        let (prev, next) = (window[0], window[1]);
        if next != prev + 1 {
            return CheckReport::fail(
                format!("counter sequence breaks between {prev} and {next}"),
                (prev, next),
            );
        }
    }
    CheckReport::pass(format!(
        "{} rows form a contiguous counter sequence",
        counts.len()
    ))
}

fn extract_counts(tables: &[ResultTable]) -> Result<Vec<i64>, CheckError> {
    let table = tables.first().ok_or_else(|| CheckError::Malformed {
        detail: "query returned no result table".to_string(),
    })?;
    table
        .values
        .iter()
        .map(|row| {
            row.first()
                .and_then(|value| value.as_i64())
                .ok_or_else(|| CheckError::Malformed {
                    detail: format!("expected an integer count, got {row:?}"),
                })
        })
        .collect()
}

/// One scheduled consistency check.
pub struct Checker {
    kind: CheckKind,
    scope: Scope,
    start_offset: Duration,
    resolver: Arc<ScopeResolver>,
}

impl Checker {
    /// A pending check; nothing runs until [`Checker::run`].
    pub fn new(
        kind: CheckKind,
        scope: Scope,
        start_offset: Duration,
        resolver: Arc<ScopeResolver>,
    ) -> Self {
        Self {
            kind,
            scope,
            start_offset,
            resolver,
        }
    }

    /// Wait for the start offset, read the counters from one resolved
    /// database, and return the verdict.
    pub async fn run(&self) -> Result<CheckReport, CheckError> {
        tokio::time::sleep(self.start_offset).await;
        let databases = self.resolver.resolve_databases(self.scope).await?;
        let database = match databases.first() {
            Some(database) => database,
            None => {
                tracing::warn!(kind = %self.kind, scope = %self.scope, "no targets; check skipped");
                return Ok(CheckReport::pass("no database resolved; check skipped"));
            }
        };

        let statement = format!("SELECT count FROM {COUNTER_TABLE} ORDER BY count");
        let tables = database.query(std::slice::from_ref(&statement)).await?;
        let counts = extract_counts(&tables)?;
        let report = match self.kind {
            CheckKind::IntegrityCheck => verify_contiguous(&counts),
        };

        if report.passed {
            tracing::info!(kind = %self.kind, host = database.host(), verdict = report.description.as_str(), "check passed");
        } else {
            tracing::error!(kind = %self.kind, host = database.host(), verdict = report.description.as_str(), "check failed");
        }
        Ok(report)
    }
}
