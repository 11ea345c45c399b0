//! # shakedown-core
//!
//! Orchestration engine for chaos runs against a replicated SQL cluster.
//!
//! A run is driven by a declarative plan: a list of timed events (fault
//! injections, write workloads, consistency checks) sharing one wall-clock
//! budget. Each event names a logical scope ("current leader", "any
//! follower", ...) that is resolved against the cluster's live topology at
//! the moment the event fires, because leadership is expected to move
//! mid-run.
//!
//! ## Architecture
//!
//! ```text
//! PlanScheduler ──┬── Nemesis ──────┐
//!   (one task     ├── Workload ─────┼──► ScopeResolver ──► TopologyProbe
//!    per event)   └── Checker ──────┘            │
//!                                                ▼
//!                                         ClusterRegistry
//!                                      (alias↔host tables,
//!                                       injected-host set)
//!                                                │
//!                                 ┌──────────────┴──────────────┐
//!                                 ▼                             ▼
//!                           SqlTransport                 CommandTransport
//!                        (HTTP /db/execute,            (ssh → chaos agent)
//!                         /db/query, /status)
//! ```
//!
//! Every remote call runs under a fixed-count retry budget; injected faults
//! are recorded per injector so they can be reversed exactly once. Event
//! tasks are isolated: one failing nemesis or check never cancels its
//! siblings, and tasks still in flight when the plan's total duration
//! elapses are abandoned, not cancelled.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod checker;
pub mod config;
pub mod duration;
pub mod nemesis;
pub mod plan;
pub mod registry;
pub mod remote;
pub mod scheduler;
pub mod scope;
pub mod sql;
pub mod topology;
pub mod workload;

#[cfg(test)]
pub(crate) mod testutil;
