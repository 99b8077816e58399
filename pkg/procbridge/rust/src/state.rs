// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a process as reported by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    #[serde(alias = "stopped", alias = "failed")]
    Exited,
    // Catch-all for status strings this crate does not know; must stay last.
    #[default]
    #[serde(other)]
    Unknown,
}

impl ProcessStatus {
    pub fn is_alive(self) -> bool {
        self == ProcessStatus::Running
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Unknown => write!(f, "unknown"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Exited => write!(f, "exited"),
        }
    }
}

/// Answer of `WorkerSupervisor::status` for a worker the host knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Stopped,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Observed state of a worker alias.
///
/// `Absent` means the host has no descriptor for the alias, `Unknown` means
/// the host could not be asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum WorkerState {
    Absent,
    Stopped,
    Running { pid: Option<u32> },
    Unknown,
}

impl WorkerState {
    pub fn is_running(self) -> bool {
        matches!(self, WorkerState::Running { .. })
    }

    pub fn pid(self) -> Option<u32> {
        match self {
            WorkerState::Running { pid } => pid,
            _ => None,
        }
    }

    /// Collapse to the two-valued status, `None` for absent or unknown.
    pub fn status(self) -> Option<WorkerStatus> {
        match self {
            WorkerState::Running { .. } => Some(WorkerStatus::Running),
            WorkerState::Stopped => Some(WorkerStatus::Stopped),
            WorkerState::Absent | WorkerState::Unknown => None,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Absent => write!(f, "absent"),
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Running { pid: Some(pid) } => write!(f, "running (pid={pid})"),
            WorkerState::Running { pid: None } => write!(f, "running"),
            WorkerState::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_process_status_from_host_strings() {
        let parse = |s: &str| serde_json::from_value::<ProcessStatus>(s.into()).unwrap();
        assert_eq!(parse("running"), ProcessStatus::Running);
        assert_eq!(parse("exited"), ProcessStatus::Exited);
        assert_eq!(parse("stopped"), ProcessStatus::Exited);
        assert_eq!(parse("zombie"), ProcessStatus::Unknown);
        assert_eq!(parse("unknown"), ProcessStatus::Unknown);
        assert_eq!(ProcessStatus::default(), ProcessStatus::Unknown);
    }

    #[test]
    fn test_worker_state_collapses_to_status() {
        assert_eq!(
            WorkerState::Running { pid: Some(7) }.status(),
            Some(WorkerStatus::Running)
        );
        assert_eq!(WorkerState::Stopped.status(), Some(WorkerStatus::Stopped));
        assert_eq!(WorkerState::Absent.status(), None);
        assert_eq!(WorkerState::Unknown.status(), None);
    }

    #[test]
    fn test_worker_state_pid_only_when_running() {
        assert_eq!(WorkerState::Running { pid: Some(42) }.pid(), Some(42));
        assert_eq!(WorkerState::Stopped.pid(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(WorkerStatus::Stopped.to_string(), "stopped");
        assert_eq!(
            WorkerState::Running { pid: Some(12) }.to_string(),
            "running (pid=12)"
        );
        assert_eq!(ProcessStatus::Exited.to_string(), "exited");
    }

    #[test]
    fn test_worker_state_serializes_tagged() {
        let json = serde_json::to_value(WorkerState::Running { pid: Some(3) }).unwrap();
        assert_eq!(json, serde_json::json!({"state": "running", "pid": 3}));
    }
}
