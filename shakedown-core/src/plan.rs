//! Declarative run plans and their parsing into typed events.
//!
//! A plan file is JSON: a free-text `thought`, a `total_time` ceiling, and
//! a list of events. Parsing is strict about the things execution depends
//! on (event types, kind names, scopes, durations) and fails before
//! anything touches the cluster; unknown extra fields are ignored.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::checker::CheckKind;
use crate::duration::{parse_duration, DurationError};
use crate::nemesis::{FaultKind, FaultParams};
use crate::scope::Scope;
use crate::workload::WorkloadKind;

/// Failure while loading or validating a plan file.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The file could not be read.
    #[error("failed to read plan {path}: {source}")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying io failure.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid plan JSON.
    #[error("failed to parse plan: {0}")]
    Parse(#[from] serde_json::Error),
    /// A duration string did not parse.
    #[error("invalid duration in {field}: {source}")]
    Duration {
        /// Which field held the bad duration.
        field: String,
        /// The parse failure.
        #[source]
        source: DurationError,
    },
    /// The event `type` is not nemesis, workload, or check.
    #[error("unknown event type {kind:?}")]
    UnknownEventType {
        /// The unrecognized type string.
        kind: String,
    },
    /// A nemesis event names a fault this build does not provide.
    #[error("unknown nemesis {kind:?}")]
    UnknownNemesis {
        /// The unrecognized fault name.
        kind: String,
    },
    /// A workload event names a workload this build does not provide.
    #[error("unknown workload {kind:?}")]
    UnknownWorkload {
        /// The unrecognized workload name.
        kind: String,
    },
    /// A check event names a check this build does not provide.
    #[error("unknown check {kind:?}")]
    UnknownCheck {
        /// The unrecognized check name.
        kind: String,
    },
    /// An event names a scope this build does not provide.
    #[error("unknown scope {name:?} in event {title:?}")]
    UnknownScope {
        /// The unrecognized scope name.
        name: String,
        /// Title of the event that used it.
        title: String,
    },
    /// The `parameters` object does not fit the fault kind.
    #[error("invalid parameters for event {title:?}: {detail}")]
    Parameters {
        /// Title of the event with bad parameters.
        title: String,
        /// What serde rejected.
        detail: String,
    },
}

/// A parsed plan: immutable events plus the total-duration ceiling.
#[derive(Debug)]
pub struct Plan {
    /// Free-text intent of the run, echoed at startup.
    pub thought: String,
    /// Hard wall-clock ceiling for the whole run.
    pub total_time: Duration,
    /// The scheduled events, in file order.
    pub events: Vec<Event>,
}

/// One scheduled action, typed by its discriminant at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Inject a fault, hold it, recover it.
    Nemesis(NemesisSpec),
    /// Issue writes against resolved databases.
    Workload(WorkloadSpec),
    /// Verify a consistency invariant.
    Check(CheckSpec),
}

/// Parameters of a nemesis event.
#[derive(Debug, Clone, PartialEq)]
pub struct NemesisSpec {
    /// Which fault to create.
    pub kind: FaultKind,
    /// Kind-specific fault parameters.
    pub params: FaultParams,
    /// Where to create it.
    pub scope: Scope,
    /// Seconds from plan start until injection.
    pub start_offset: Duration,
    /// How long the fault stays active before recovery.
    pub duration: Duration,
}

/// Parameters of a workload event.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSpec {
    /// Which workload to run.
    pub kind: WorkloadKind,
    /// Which databases receive the writes.
    pub scope: Scope,
    /// Seconds from plan start until the first write.
    pub start_offset: Duration,
    /// How many rounds of writes to issue.
    pub times: u32,
}

/// Parameters of a check event.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckSpec {
    /// Which invariant to verify.
    pub kind: CheckKind,
    /// Which database to read from.
    pub scope: Scope,
    /// Seconds from plan start until the check runs.
    pub start_offset: Duration,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    thought: String,
    total_time: String,
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    title: String,
    scope: Option<String>,
    start_time: Option<String>,
    duration: Option<String>,
    times: Option<u32>,
    parameters: Option<serde_json::Value>,
}

impl Plan {
    /// Load and validate a plan file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// Validate a plan from its JSON text.
    pub fn parse(raw: &str) -> Result<Self, PlanError> {
        let raw: RawPlan = serde_json::from_str(raw)?;
        let total_time = parse_duration(&raw.total_time).map_err(|source| PlanError::Duration {
            field: "total_time".to_string(),
            source,
        })?;
        let events = raw
            .events
            .into_iter()
            .map(Event::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            thought: raw.thought,
            total_time,
            events,
        })
    }
}

impl Event {
    fn from_raw(raw: RawEvent) -> Result<Self, PlanError> {
        let scope = match raw.scope.as_deref() {
            None => Scope::AnyNode,
            Some(name) => Scope::from_name(name).ok_or_else(|| PlanError::UnknownScope {
                name: name.to_string(),
                title: raw.title.clone(),
            })?,
        };
        let start_offset = event_duration(&raw.title, "start_time", raw.start_time.as_deref())?;

        match raw.event_type.as_str() {
            "nemesis" => {
                let kind = FaultKind::from_name(&raw.title).ok_or_else(|| {
                    PlanError::UnknownNemesis {
                        kind: raw.title.clone(),
                    }
                })?;
                let duration = event_duration(&raw.title, "duration", raw.duration.as_deref())?;
                let params = match raw.parameters {
                    None => FaultParams::default(),
                    Some(value) => serde_json::from_value(value).map_err(|err| {
                        PlanError::Parameters {
                            title: raw.title.clone(),
                            detail: err.to_string(),
                        }
                    })?,
                };
                Ok(Event::Nemesis(NemesisSpec {
                    kind,
                    params,
                    scope,
                    start_offset,
                    duration,
                }))
            }
            "workload" => {
                let kind = WorkloadKind::from_name(&raw.title).ok_or_else(|| {
                    PlanError::UnknownWorkload {
                        kind: raw.title.clone(),
                    }
                })?;
                Ok(Event::Workload(WorkloadSpec {
                    kind,
                    scope,
                    start_offset,
                    times: raw.times.unwrap_or(1),
                }))
            }
            "check" => {
                let kind = CheckKind::from_name(&raw.title).ok_or_else(|| {
                    PlanError::UnknownCheck {
                        kind: raw.title.clone(),
                    }
                })?;
                Ok(Event::Check(CheckSpec {
                    kind,
                    scope,
                    start_offset,
                }))
            }
            other => Err(PlanError::UnknownEventType {
                kind: other.to_string(),
            }),
        }
    }
}

fn event_duration(
    title: &str,
    field: &str,
    value: Option<&str>,
) -> Result<Duration, PlanError> {
    parse_duration(value.unwrap_or("0s")).map_err(|source| PlanError::Duration {
        field: format!("{field} of {title:?}"),
        source,
    })
}
