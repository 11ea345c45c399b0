//! SQL transport over a node's HTTP API.
//!
//! The database exposes rqlite-style endpoints: `POST /db/execute` and
//! `POST /db/query`, each taking a JSON array of statements and answering
//! with one result object per statement. A call succeeds only if the HTTP
//! response is 200 AND no statement result carries an `error` field; there
//! is no automatic rollback of statements already applied, so workloads
//! must be idempotent or order-independent.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::NodeIdentity;
use crate::remote::{with_retries, RemoteError, ResultTable, SqlTransport};

/// One statement's result object from the database API.
#[derive(Debug, Deserialize)]
pub(crate) struct StatementResult {
    /// Error text, present when the statement failed validation or
    /// execution.
    #[serde(default)]
    pub(crate) error: Option<String>,
    /// Column names, present on query results.
    #[serde(default)]
    pub(crate) columns: Option<Vec<String>>,
    /// Row values, present on non-empty query results.
    #[serde(default)]
    pub(crate) values: Option<Vec<Vec<serde_json::Value>>>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
}

/// Fail on the first statement result that reports an error.
fn validate_results(host: &str, results: &[StatementResult]) -> Result<(), RemoteError> {
    for (index, result) in results.iter().enumerate() {
        if let Some(detail) = &result.error {
            return Err(RemoteError::Statement {
                host: host.to_string(),
                index,
                detail: detail.clone(),
            });
        }
    }
    Ok(())
}

/// Shape validated statement results into ordered tables.
fn into_tables(results: Vec<StatementResult>) -> Vec<ResultTable> {
    results
        .into_iter()
        .map(|r| ResultTable {
            columns: r.columns.unwrap_or_default(),
            values: r.values.unwrap_or_default(),
        })
        .collect()
}

/// [`SqlTransport`] over one node's HTTP API, with the shared retry budget.
pub struct SqlClient {
    host: String,
    alias: String,
    execute_url: String,
    query_url: String,
    status_url: String,
    retry_count: u32,
    timeout: Duration,
    http: reqwest::Client,
}

impl SqlClient {
    /// Build a client for one configured node.
    pub fn new(node: &NodeIdentity) -> Self {
        let base = node.api_base_url();
        Self {
            host: node.host.clone(),
            alias: node.alias.clone(),
            execute_url: format!("{base}/db/execute"),
            query_url: format!("{base}/db/query"),
            status_url: node.status_url(),
            retry_count: node.retry_count,
            timeout: Duration::from_secs(node.request_timeout_secs),
            http: reqwest::Client::new(),
        }
    }

    async fn post_batch(
        &self,
        url: &str,
        statements: &[String],
    ) -> Result<Vec<StatementResult>, RemoteError> {
        tracing::debug!("sql on {} ({}): {:?}", self.alias, self.host, statements);
        let response = self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(&statements)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Http(format!("status {status}: {body}")));
        }

        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::BadResponse {
                host: self.host.clone(),
                detail: e.to_string(),
            })?;

        validate_results(&self.host, &api.results)?;
        Ok(api.results)
    }
}

#[async_trait]
impl SqlTransport for SqlClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn connect(&self) -> Result<(), RemoteError> {
        let what = format!("database probe on {}", self.alias);
        with_retries(&what, self.retry_count, || async {
            let response = self
                .http
                .get(&self.status_url)
                .timeout(self.timeout)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(RemoteError::Http(format!("status {}", response.status())));
            }
            Ok(())
        })
        .await?;
        tracing::info!("database on {} ({}) is reachable", self.alias, self.host);
        Ok(())
    }

    async fn execute(&self, statements: &[String]) -> Result<(), RemoteError> {
        let what = format!("execute on {}", self.alias);
        with_retries(&what, self.retry_count, || async {
            self.post_batch(&self.execute_url, statements).await?;
            Ok(())
        })
        .await
    }

    async fn query(&self, statements: &[String]) -> Result<Vec<ResultTable>, RemoteError> {
        let what = format!("query on {}", self.alias);
        let results = with_retries(&what, self.retry_count, || {
            self.post_batch(&self.query_url, statements)
        })
        .await?;
        Ok(into_tables(results))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        // HTTP connections are pooled by the client; nothing to tear down
        // beyond dropping it.
        tracing::debug!("database client for {} closed", self.alias);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;

    fn node() -> NodeIdentity {
        let config: ClusterConfig = toml::from_str(
            r#"
[nodes.n1]
host = "10.0.1.11"
api_port = 4001
"#,
        )
        .unwrap();
        config.identities().remove(0)
    }

    #[test]
    fn builds_api_urls() {
        let client = SqlClient::new(&node());
        assert_eq!(client.execute_url, "http://10.0.1.11:4001/db/execute");
        assert_eq!(client.query_url, "http://10.0.1.11:4001/db/query");
        assert_eq!(client.status_url, "http://10.0.1.11:4001/status");
    }

    #[test]
    fn statement_error_fails_whole_batch() {
        let api: ApiResponse = serde_json::from_str(
            r#"{"results": [
                {"rows_affected": 1},
                {"error": "no such table: tc"}
            ]}"#,
        )
        .unwrap();

        let err = validate_results("10.0.1.11", &api.results).unwrap_err();
        match err {
            RemoteError::Statement { host, index, detail } => {
                assert_eq!(host, "10.0.1.11");
                assert_eq!(index, 1);
                assert!(detail.contains("no such table"));
            }
            other => panic!("expected Statement, got {other:?}"),
        }
    }

    #[test]
    fn query_results_keep_row_order() {
        let api: ApiResponse = serde_json::from_str(
            r#"{"results": [{
                "columns": ["name", "count"],
                "types": ["text", "integer"],
                "values": [["writer", 1], ["writer", 2], ["writer", 3]]
            }]}"#,
        )
        .unwrap();

        validate_results("h", &api.results).unwrap();
        let tables = into_tables(api.results);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].columns, vec!["name", "count"]);
        assert_eq!(tables[0].values[0][1], serde_json::json!(1));
        assert_eq!(tables[0].values[2][1], serde_json::json!(3));
    }

    #[test]
    fn empty_result_set_has_no_rows() {
        // The API omits "values" entirely when a query matches nothing.
        let api: ApiResponse =
            serde_json::from_str(r#"{"results": [{"columns": ["count"], "types": ["integer"]}]}"#)
                .unwrap();

        let tables = into_tables(api.results);
        assert_eq!(tables[0].columns, vec!["count"]);
        assert!(tables[0].values.is_empty());
    }
}
