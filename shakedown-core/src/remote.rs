//! Retry machinery and transport capability seams.
//!
//! Every remote interaction — SQL batches over HTTP, chaos-agent commands
//! over ssh — goes through [`with_retries`]: a fixed-count budget with no
//! backoff, a warning per failed attempt, and a final error carrying the
//! last failure. Retry timing is deliberately unspecified beyond the count;
//! adding backoff would silently change run duration semantics.
//!
//! The transports themselves are capability traits so the lifecycle,
//! workload, and checker components can be exercised against scripted
//! implementations in tests.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use thiserror::Error;

/// Errors from remote execution against a cluster node.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Could not reach the node at all.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP-level failure (non-200 status or request error).
    #[error("http error: {0}")]
    Http(String),

    /// One statement of a SQL batch reported an error. The whole call is
    /// failed; statements already applied are not rolled back.
    #[error("statement {index} failed on {host}: {detail}")]
    Statement {
        /// Target host.
        host: String,
        /// Zero-based index of the failing statement in the batch.
        index: usize,
        /// Error text reported for that statement.
        detail: String,
    },

    /// ssh process could not be spawned.
    #[error("ssh spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    /// Remote command failed: non-zero exit or anything on stderr.
    #[error("command failed on {host}: {stderr}")]
    CommandFailed {
        /// Target host.
        host: String,
        /// Captured standard-error text (the failure reason).
        stderr: String,
    },

    /// Response arrived but could not be understood.
    #[error("unexpected response from {host}: {detail}")]
    BadResponse {
        /// Target host.
        host: String,
        /// What was wrong with the response.
        detail: String,
    },

    /// The whole retry budget was spent.
    #[error("{what} failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Description of the operation, for diagnostics.
        what: String,
        /// How many attempts were made.
        attempts: u32,
        /// The failure from the final attempt.
        last: Box<RemoteError>,
    },
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            RemoteError::ConnectionFailed(e.to_string())
        } else {
            RemoteError::Http(e.to_string())
        }
    }
}

/// One ordered result table from a SQL query statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    /// Column names, in select order.
    pub columns: Vec<String>,
    /// Rows in the order the database returned them.
    pub values: Vec<Vec<serde_json::Value>>,
}

/// SQL capability of one cluster node.
///
/// `execute` and `query` take a batch of statements; a call succeeds only
/// if the transport-level response succeeds AND every individual statement
/// reports no error. Implementations retry internally up to their
/// configured budget.
#[async_trait]
pub trait SqlTransport: Send + Sync {
    /// Host this transport talks to.
    fn host(&self) -> &str;

    /// Verify the node is reachable. Called once at startup, before any
    /// event runs.
    async fn connect(&self) -> Result<(), RemoteError>;

    /// Apply a batch of write statements.
    async fn execute(&self, statements: &[String]) -> Result<(), RemoteError>;

    /// Run a batch of read statements, returning one table per statement.
    async fn query(&self, statements: &[String]) -> Result<Vec<ResultTable>, RemoteError>;

    /// Release any resources held for this node.
    async fn close(&self) -> Result<(), RemoteError>;
}

impl fmt::Debug for dyn SqlTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlTransport")
            .field("host", &self.host())
            .finish()
    }
}

/// Chaos-agent command capability of one cluster node.
///
/// A command is a single line handed to the agent; captured stdout is the
/// response and any non-empty stderr is a failure. Implementations retry
/// internally up to their configured budget.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Host this transport talks to.
    fn host(&self) -> &str;

    /// Establish the connection. Called once at startup, before any event
    /// runs.
    async fn connect(&self) -> Result<(), RemoteError>;

    /// Run one command line on the node, returning captured stdout.
    async fn run_command(&self, command: &str) -> Result<String, RemoteError>;

    /// Tear the connection down.
    async fn close(&self) -> Result<(), RemoteError>;
}

/// Run `op` up to `attempts` times, returning the first success.
///
/// Intermediate failures are logged at `warn`; the final failure is wrapped
/// in [`RemoteError::Exhausted`] with the attempt count. A budget of zero is
/// treated as one attempt — "try zero times" would fail every call without
/// touching the wire.
pub async fn with_retries<T, Fut>(
    what: &str,
    attempts: u32,
    mut op: impl FnMut() -> Fut,
) -> Result<T, RemoteError>
where
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                tracing::warn!("{what}: attempt {attempt}/{attempts} failed: {err}");
            }
            Err(err) => {
                return Err(RemoteError::Exhausted {
                    what: what.to_string(),
                    attempts,
                    last: Box::new(err),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn first_success_short_circuits() {
        let calls = AtomicU32::new(0);
        let out = with_retries("op", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, RemoteError>(7) }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let out = with_retries("op", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RemoteError::Http("boom".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_carries_last_failure() {
        let calls = AtomicU32::new(0);
        let err = with_retries::<(), _>("probe", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(RemoteError::Http(format!("failure {n}"))) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            RemoteError::Exhausted {
                what,
                attempts,
                last,
            } => {
                assert_eq!(what, "probe");
                assert_eq!(attempts, 3);
                assert!(last.to_string().contains("failure 3"));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_budget_means_one_attempt() {
        let calls = AtomicU32::new(0);
        let err = with_retries::<(), _>("op", 0, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RemoteError::Http("boom".into())) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RemoteError::Exhausted { attempts: 1, .. }));
    }
}
