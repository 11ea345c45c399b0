//! Check a config and plan without touching the cluster.

use std::path::Path;

use anyhow::Result;

use shakedown_core::config::ClusterConfig;
use shakedown_core::duration::format_duration;
use shakedown_core::plan::{Event, Plan};

/// Run the validate command.
pub fn run(config_path: &Path, plan_path: &Path) -> Result<()> {
    let config = ClusterConfig::from_file(config_path)?;
    let plan = Plan::from_file(plan_path)?;

    println!("=== cluster ===");
    for identity in config.identities() {
        println!(
            "  {}: {} (api {}, ssh {})",
            identity.alias, identity.host, identity.api_port, identity.ssh_port
        );
    }

    println!();
    println!("=== plan ===");
    if !plan.thought.is_empty() {
        println!("  thought: {}", plan.thought);
    }
    println!(
        "  total time: {}",
        format_duration(plan.total_time)
    );
    for (index, event) in plan.events.iter().enumerate() {
        println!("  [{index}] {}", describe(event));
    }

    println!();
    println!("config and plan are valid");
    Ok(())
}

fn describe(event: &Event) -> String {
    match event {
        Event::Nemesis(spec) => format!(
            "nemesis {} scope={} start={} duration={}",
            spec.kind,
            spec.scope,
            format_duration(spec.start_offset),
            format_duration(spec.duration)
        ),
        Event::Workload(spec) => format!(
            "workload {} scope={} start={} times={}",
            spec.kind,
            spec.scope,
            format_duration(spec.start_offset),
            spec.times
        ),
        Event::Check(spec) => format!(
            "check {} scope={} start={}",
            spec.kind,
            spec.scope,
            format_duration(spec.start_offset)
        ),
    }
}
