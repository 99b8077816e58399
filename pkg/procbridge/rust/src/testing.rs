// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! In-memory host runtime for tests.

use crate::errors::{Error, Result};
use crate::rpc::{RpcCall, RpcPort};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const FIRST_PID: u32 = 1000;
const TERMINATED_EXIT_CODE: i32 = 143;

#[derive(Debug, Clone)]
struct FakeProcess {
    cmd: String,
    cwd: Option<String>,
    persistent: bool,
    env: HashMap<String, String>,
    pid: Option<u32>,
    exit_code: Option<i32>,
    output: String,
    error: String,
    messages: Vec<String>,
}

impl FakeProcess {
    fn running(&self) -> bool {
        self.pid.is_some()
    }

    fn status(&self) -> &'static str {
        if self.running() { "running" } else { "exited" }
    }

    fn to_json(&self, alias: &str) -> Value {
        json!({
            "alias": alias,
            "cmd": self.cmd,
            "cwd": self.cwd,
            "persistent": self.persistent,
            "env": self.env,
            "pid": self.pid,
            "status": self.status(),
            "exit_code": self.exit_code,
        })
    }
}

#[derive(Default)]
struct FakeState {
    processes: BTreeMap<String, FakeProcess>,
    calls: Vec<RpcCall>,
    next_pid: u32,
    unreachable: bool,
    refused: HashSet<String>,
}

impl FakeState {
    fn allocate_pid(&mut self) -> u32 {
        let pid = FIRST_PID + self.next_pid;
        self.next_pid += 1;
        pid
    }
}

/// Host runtime keeping its processes in memory.
///
/// Like the real host, `stop` keeps the descriptor around (so it can be
/// restarted) and `cleanup` drops non-persistent descriptors that no longer
/// run.
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
    latency: Mutex<Option<Duration>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<RpcCall> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<RpcCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.endpoint() == endpoint)
            .cloned()
            .collect()
    }

    /// Calls that would change host state.
    pub fn mutations(&self) -> Vec<RpcCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Make every subsequent call fail as if the host were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Delay every answer, widening race windows.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }

    /// Answer `success: false` to every call to `endpoint`.
    pub fn refuse(&self, endpoint: &str) {
        self.state().refused.insert(endpoint.to_string());
    }

    /// Simulate the process behind `alias` exiting on its own.
    pub fn crash(&self, alias: &str, exit_code: i32) {
        if let Some(process) = self.state().processes.get_mut(alias) {
            process.pid = None;
            process.exit_code = Some(exit_code);
        }
    }

    /// Simulate the host forgetting `alias` entirely.
    pub fn remove(&self, alias: &str) {
        self.state().processes.remove(alias);
    }

    /// Seed a descriptor that exists but does not run.
    pub fn insert_stopped(&self, alias: &str, cmd: &str) {
        self.insert(alias, cmd, false, None);
    }

    /// Seed a running descriptor, returning its pid.
    pub fn insert_running(&self, alias: &str, cmd: &str, persistent: bool) -> u32 {
        let pid = self.state().allocate_pid();
        self.insert(alias, cmd, persistent, Some(pid));
        pid
    }

    fn insert(&self, alias: &str, cmd: &str, persistent: bool, pid: Option<u32>) {
        self.state().processes.insert(
            alias.to_string(),
            FakeProcess {
                cmd: cmd.to_string(),
                cwd: None,
                persistent,
                env: HashMap::new(),
                pid,
                exit_code: if pid.is_some() { None } else { Some(0) },
                output: String::new(),
                error: String::new(),
                messages: Vec::new(),
            },
        );
    }

    pub fn set_output(&self, alias: &str, output: &str, error: &str) {
        if let Some(process) = self.state().processes.get_mut(alias) {
            process.output = output.to_string();
            process.error = error.to_string();
        }
    }

    pub fn messages(&self, alias: &str) -> Vec<String> {
        self.state()
            .processes
            .get(alias)
            .map(|p| p.messages.clone())
            .unwrap_or_default()
    }

    pub fn is_running(&self, alias: &str) -> bool {
        self.state()
            .processes
            .get(alias)
            .is_some_and(FakeProcess::running)
    }

    fn answer(state: &mut FakeState, call: &RpcCall) -> Value {
        if state.refused.contains(call.endpoint()) {
            return json!({ "success": false });
        }
        match call {
            RpcCall::Start {
                cmd,
                alias,
                cwd,
                persistent,
                env,
            } => {
                let pid = state.allocate_pid();
                state.processes.insert(
                    alias.clone(),
                    FakeProcess {
                        cmd: cmd.clone(),
                        cwd: cwd.clone(),
                        persistent: *persistent,
                        env: env.clone(),
                        pid: Some(pid),
                        exit_code: None,
                        output: String::new(),
                        error: String::new(),
                        messages: Vec::new(),
                    },
                );
                json!({ "pid": pid })
            }
            RpcCall::Stop { alias } => match state.processes.get_mut(alias) {
                Some(process) => {
                    if process.running() {
                        process.pid = None;
                        process.exit_code = Some(TERMINATED_EXIT_CODE);
                    }
                    json!({ "success": true })
                }
                None => json!({ "success": false }),
            },
            RpcCall::Restart { alias } => {
                if !state.processes.contains_key(alias) {
                    return json!({ "success": false });
                }
                let pid = state.allocate_pid();
                if let Some(process) = state.processes.get_mut(alias) {
                    process.pid = Some(pid);
                    process.exit_code = None;
                }
                json!({ "success": true, "pid": pid })
            }
            RpcCall::Message { message, alias } => match state.processes.get_mut(alias) {
                Some(process) if process.running() => {
                    process.messages.push(message.clone());
                    json!({ "success": true })
                }
                _ => json!({ "success": false }),
            },
            RpcCall::Get { alias } => match state.processes.get(alias) {
                Some(process) => json!({ "success": true, "process": process.to_json(alias) }),
                None => json!({ "success": false }),
            },
            RpcCall::All => {
                let processes: serde_json::Map<String, Value> = state
                    .processes
                    .iter()
                    .map(|(alias, p)| (alias.clone(), p.to_json(alias)))
                    .collect();
                json!({ "processes": processes })
            }
            RpcCall::Exists { alias } => {
                json!({ "exists": state.processes.contains_key(alias) })
            }
            RpcCall::IsRunning { alias } => {
                json!({ "running": state.processes.get(alias).is_some_and(FakeProcess::running) })
            }
            RpcCall::GetPid { alias } => {
                json!({ "pid": state.processes.get(alias).and_then(|p| p.pid) })
            }
            RpcCall::GetStatus { alias } => {
                json!({ "status": state.processes.get(alias).map(FakeProcess::status) })
            }
            RpcCall::GetOutput { alias } => {
                json!({ "output": state.processes.get(alias).map(|p| p.output.clone()) })
            }
            RpcCall::GetError { alias } => {
                json!({ "error": state.processes.get(alias).map(|p| p.error.clone()) })
            }
            RpcCall::GetExitCode { alias } => {
                json!({ "exit_code": state.processes.get(alias).and_then(|p| p.exit_code) })
            }
            RpcCall::Cleanup => {
                let before = state.processes.len();
                state.processes.retain(|_, p| p.running() || p.persistent);
                json!({ "count": before - state.processes.len() })
            }
        }
    }
}

impl RpcPort for FakeHost {
    fn call(&self, call: &RpcCall) -> Result<Value> {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        let mut state = self.state();
        state.calls.push(call.clone());
        if state.unreachable {
            return Err(Error::transport(call.endpoint(), "connection refused"));
        }
        Ok(Self::answer(&mut state, call))
    }
}
