//! Concurrent execution of a plan against a shared wall-clock ceiling.
//!
//! Every event runs as its own task and sleeps its own start offset; the
//! scheduler sleeps the plan's total time and then tears down, whether or
//! not the tasks are done. In-flight tasks are abandoned, never cancelled:
//! they keep running into teardown, and remote calls that lose that race
//! fail and get logged inside their own task. An optional grace period
//! waits for stragglers before abandoning them, for runs where the report
//! should include late finishers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::checker::Checker;
use crate::duration::format_duration;
use crate::nemesis::Nemesis;
use crate::plan::{Event, Plan};
use crate::registry::ClusterRegistry;
use crate::scope::ScopeResolver;
use crate::workload::{Sequence, Workload};

/// What happened to a run's events by the time the scheduler returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Events the plan scheduled.
    pub total_events: usize,
    /// Tasks that completed before the scheduler stopped watching.
    pub finished: usize,
    /// Tasks still in flight when the scheduler moved on to teardown.
    pub abandoned: usize,
    /// Finished tasks that reported an error.
    pub failed: usize,
    /// Checks that completed and reported an invariant violation.
    pub checks_failed: usize,
}

impl RunReport {
    /// True when every task finished cleanly and every check passed.
    pub fn clean(&self) -> bool {
        self.abandoned == 0 && self.failed == 0 && self.checks_failed == 0
    }
}

#[derive(Default)]
struct Counters {
    completed: AtomicUsize,
    failed: AtomicUsize,
    checks_failed: AtomicUsize,
}

impl Counters {
    fn task_done(&self, index: usize, kind: &str, result: Result<(), String>) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(()) => tracing::debug!(event = index, kind, "event finished"),
            Err(error) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(event = index, kind, error, "event failed");
            }
        }
    }

    fn check_violation(&self) {
        self.checks_failed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Runs plans: spawn everything, sleep the ceiling, tear down.
pub struct PlanScheduler {
    registry: Arc<ClusterRegistry>,
    resolver: Arc<ScopeResolver>,
    grace: Option<Duration>,
}

impl PlanScheduler {
    /// A scheduler that abandons stragglers as soon as the ceiling passes.
    pub fn new(registry: Arc<ClusterRegistry>, resolver: Arc<ScopeResolver>) -> Self {
        Self {
            registry,
            resolver,
            grace: None,
        }
    }

    /// Wait up to `grace` for stragglers after the ceiling, then abandon.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }

    /// Run `plan` to its total-time ceiling, then tear down and report.
    ///
    /// Event failures are contained in their own tasks and surface only in
    /// the report and the logs; this method itself does not fail.
    pub async fn run(&self, plan: &Plan) -> RunReport {
        let run_id = uuid::Uuid::new_v4();
        let sequence = Sequence::new();
        let counters = Arc::new(Counters::default());
        tracing::info!(
            run = %run_id,
            events = plan.events.len(),
            total_time = format_duration(plan.total_time).as_str(),
            "plan started"
        );

        let handles: Vec<JoinHandle<()>> = plan
            .events
            .iter()
            .enumerate()
            .map(|(index, event)| self.spawn_event(index, event, &sequence, &counters))
            .collect();

        tokio::time::sleep(plan.total_time).await;

        let in_flight = handles.iter().filter(|h| !h.is_finished()).count();
        match self.grace {
            Some(grace) if in_flight > 0 => {
                tracing::info!(
                    in_flight,
                    grace = format_duration(grace).as_str(),
                    "ceiling reached; waiting for stragglers"
                );
                // Dropping the join on timeout detaches the tasks; they
                // keep running into teardown.
                if tokio::time::timeout(grace, join_all(handles)).await.is_err() {
                    tracing::warn!("grace expired; abandoning remaining tasks");
                }
            }
            _ => {
                if in_flight > 0 {
                    tracing::warn!(in_flight, "ceiling reached; abandoning in-flight tasks");
                }
                drop(handles);
            }
        }

        let finished = counters.completed.load(Ordering::SeqCst);
        let report = RunReport {
            total_events: plan.events.len(),
            finished,
            abandoned: plan.events.len() - finished,
            failed: counters.failed.load(Ordering::SeqCst),
            checks_failed: counters.checks_failed.load(Ordering::SeqCst),
        };
        tracing::info!(
            finished = report.finished,
            abandoned = report.abandoned,
            failed = report.failed,
            checks_failed = report.checks_failed,
            "plan finished"
        );

        self.registry.teardown_all().await;
        report
    }

    fn spawn_event(
        &self,
        index: usize,
        event: &Event,
        sequence: &Sequence,
        counters: &Arc<Counters>,
    ) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let resolver = self.resolver.clone();
        let counters = counters.clone();
        match event {
            Event::Nemesis(spec) => {
                let spec = spec.clone();
                tokio::spawn(async move {
                    let mut nemesis = Nemesis::new(
                        spec.kind,
                        spec.params,
                        spec.scope,
                        spec.start_offset,
                        spec.duration,
                        registry,
                        resolver,
                    );
                    let result = nemesis.run().await;
                    counters.task_done(index, spec.kind.as_str(), result.map_err(|e| e.to_string()));
                })
            }
            Event::Workload(spec) => {
                let spec = spec.clone();
                let sequence = sequence.clone();
                tokio::spawn(async move {
                    let workload = Workload::new(
                        spec.kind,
                        spec.scope,
                        spec.start_offset,
                        spec.times,
                        sequence,
                        resolver,
                    );
                    let result = workload.run().await;
                    counters.task_done(index, spec.kind.as_str(), result.map_err(|e| e.to_string()));
                })
            }
            Event::Check(spec) => {
                let spec = spec.clone();
                tokio::spawn(async move {
                    let checker = Checker::new(spec.kind, spec.scope, spec.start_offset, resolver);
                    let result = match checker.run().await {
                        Ok(report) => {
                            if !report.passed {
                                counters.check_violation();
                            }
                            Ok(())
                        }
                        Err(err) => Err(err.to_string()),
                    };
                    counters.task_done(index, spec.kind.as_str(), result);
                })
            }
        }
    }
}
