//! Execute a plan against a live cluster.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use shakedown_core::config::ClusterConfig;
use shakedown_core::plan::Plan;
use shakedown_core::registry::ClusterRegistry;
use shakedown_core::scheduler::PlanScheduler;
use shakedown_core::scope::ScopeResolver;
use shakedown_core::topology::HttpTopologyProbe;
use shakedown_core::workload::init_statements;

/// Run the run command.
pub async fn run(config_path: &Path, plan_path: &Path, grace: Option<Duration>) -> Result<()> {
    let config = ClusterConfig::from_file(config_path)?;
    let plan = Plan::from_file(plan_path)?;
    if !plan.thought.is_empty() {
        tracing::info!(thought = plan.thought.as_str(), "plan intent");
    }

    let registry = Arc::new(ClusterRegistry::from_config(&config)?);
    let probe = Arc::new(HttpTopologyProbe::new(&config.identities()));
    let resolver = Arc::new(ScopeResolver::new(registry.clone(), probe));

    // A node that cannot be reached now would only fail mid-run, so the
    // whole startup aborts on the first refusal; connections already
    // opened are closed again on the way out.
    if let Err(err) = prepare(&registry).await {
        registry.teardown_all().await;
        return Err(err);
    }

    let mut scheduler = PlanScheduler::new(registry, resolver);
    if let Some(grace) = grace {
        scheduler = scheduler.with_grace(grace);
    }
    let report = scheduler.run(&plan).await;

    if report.clean() {
        Ok(())
    } else {
        anyhow::bail!(
            "run left {} tasks abandoned, {} events failed, {} checks violated",
            report.abandoned,
            report.failed,
            report.checks_failed
        )
    }
}

/// Open every transport and reset the counter table on the first node.
async fn prepare(registry: &Arc<ClusterRegistry>) -> Result<()> {
    registry
        .connect_all()
        .await
        .context("failed to open cluster connections")?;
    let database = registry
        .first_database()
        .context("no nodes configured")?;
    database
        .execute(&init_statements())
        .await
        .context("failed to prepare the counter table")?;
    Ok(())
}
