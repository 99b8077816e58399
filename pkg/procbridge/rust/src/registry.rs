// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Alias-addressed control over processes owned by the host runtime.
//!
//! Nothing here is cached: every query is a round trip, because the process
//! lives in another runtime and can exit without telling us.

use crate::alias::ensure_alias;
use crate::command::{console_command, join_argv, script_command};
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::rpc::{RpcCall, RpcPort};
use crate::state::ProcessStatus;
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A process as described by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    #[serde(default)]
    pub alias: String,
    #[serde(rename = "cmd", default)]
    pub command: String,
    #[serde(rename = "cwd", default)]
    pub working_directory: Option<String>,
    #[serde(rename = "env", default, deserialize_with = "lenient_env")]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: ProcessStatus,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

// The host serializes an empty map as `[]`.
fn lenient_env<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(HashMap::new()),
        Some(Value::Array(items)) if items.is_empty() => Ok(HashMap::new()),
        Some(v) => serde_json::from_value(v).map_err(serde::de::Error::custom),
    }
}

fn lenient_status<'de, D>(deserializer: D) -> std::result::Result<ProcessStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<ProcessStatus>::deserialize(deserializer)?.unwrap_or_default())
}

/// Optional parameters of `ProcessRegistry::start`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    pub working_directory: Option<String>,
    pub persistent: bool,
    pub environment: HashMap<String, String>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

pub struct ProcessRegistry {
    port: Arc<dyn RpcPort>,
    php_binary: String,
    console_script: String,
}

impl ProcessRegistry {
    pub fn new(port: Arc<dyn RpcPort>) -> Self {
        let defaults = Config::default();
        Self {
            port,
            php_binary: defaults.php_binary,
            console_script: defaults.console_script,
        }
    }

    pub fn from_config(port: Arc<dyn RpcPort>, config: &Config) -> Self {
        Self {
            port,
            php_binary: config.php_binary.clone(),
            console_script: config.console_script.clone(),
        }
    }

    fn call(&self, call: RpcCall) -> Result<Value> {
        let response = self.port.call(&call)?;
        if !response.is_object() {
            return Err(Error::malformed(
                call.endpoint(),
                format!("expected a JSON object, got {response}"),
            ));
        }
        Ok(response)
    }

    /// Ask the host to launch `command` under `alias`.
    ///
    /// Does not check whether `alias` is already taken; callers that must
    /// not duplicate a process check `exists` first.
    pub fn start(&self, command: &str, alias: &str, options: StartOptions) -> Result<&Self> {
        ensure_alias(alias)?;
        if command.trim().is_empty() {
            return Err(Error::InvalidArgument("command must not be empty".into()));
        }

        let response = self.call(RpcCall::Start {
            cmd: command.to_string(),
            alias: alias.to_string(),
            cwd: options.working_directory,
            persistent: options.persistent,
            env: options.environment,
        })?;
        let pid = read_u32("child-process/start", &response, "pid")?;
        match pid {
            Some(pid) => info!("[{alias}] started (pid={pid}, cmd={command})"),
            None => info!("[{alias}] start requested (cmd={command})"),
        }
        Ok(self)
    }

    /// `start` with an argument vector, each argument shell-quoted.
    pub fn start_argv<S: AsRef<str>>(
        &self,
        argv: &[S],
        alias: &str,
        options: StartOptions,
    ) -> Result<&Self> {
        self.start(&join_argv(argv), alias, options)
    }

    /// Run a PHP script.
    pub fn php<S: AsRef<str>>(
        &self,
        script: &str,
        alias: &str,
        args: &[S],
        options: StartOptions,
    ) -> Result<&Self> {
        self.start(
            &script_command(&self.php_binary, script, args),
            alias,
            options,
        )
    }

    /// Run a command of the application console.
    pub fn console<S: AsRef<str>>(
        &self,
        command: &str,
        alias: &str,
        args: &[S],
        options: StartOptions,
    ) -> Result<&Self> {
        self.start(&self.console_command_line(command, args), alias, options)
    }

    pub(crate) fn console_command_line<S: AsRef<str>>(&self, command: &str, args: &[S]) -> String {
        console_command(&self.php_binary, &self.console_script, command, args)
    }

    pub fn stop(&self, alias: &str) -> Result<bool> {
        ensure_alias(alias)?;
        let response = self.call(RpcCall::Stop {
            alias: alias.to_string(),
        })?;
        let stopped = read_bool("child-process/stop", &response, "success")?;
        if stopped {
            info!("[{alias}] stopped");
        } else {
            warn!("[{alias}] host refused to stop");
        }
        Ok(stopped)
    }

    /// Stop then start the command the host retained for `alias`.
    pub fn restart(&self, alias: &str) -> Result<bool> {
        ensure_alias(alias)?;
        let response = self.call(RpcCall::Restart {
            alias: alias.to_string(),
        })?;
        let restarted = read_bool("child-process/restart", &response, "success")?;
        if restarted {
            let pid = read_u32("child-process/restart", &response, "pid")?;
            info!("[{alias}] restarted (pid={})", display_pid(pid));
        } else {
            warn!("[{alias}] host refused to restart");
        }
        Ok(restarted)
    }

    pub fn message(&self, payload: &str, alias: &str) -> Result<bool> {
        ensure_alias(alias)?;
        let response = self.call(RpcCall::Message {
            message: payload.to_string(),
            alias: alias.to_string(),
        })?;
        read_bool("child-process/message", &response, "success")
    }

    /// Full record for `alias`, or `None` when the host does not know it.
    pub fn get(&self, alias: &str) -> Result<Option<ProcessHandle>> {
        ensure_alias(alias)?;
        let endpoint = "child-process/get";
        let response = self.call(RpcCall::Get {
            alias: alias.to_string(),
        })?;
        if !read_bool(endpoint, &response, "success")? {
            debug!("[{alias}] unknown to host");
            return Ok(None);
        }
        let Some(record) = field(endpoint, &response, "process")? else {
            return Ok(None);
        };
        let mut handle = decode_handle(endpoint, record)?;
        if handle.alias.is_empty() {
            handle.alias = alias.to_string();
        }
        Ok(Some(handle))
    }

    /// Every process the host currently tracks, keyed by alias.
    pub fn all(&self) -> Result<BTreeMap<String, ProcessHandle>> {
        let endpoint = "child-process/all";
        let response = self.call(RpcCall::All)?;
        let mut processes = BTreeMap::new();
        match field(endpoint, &response, "processes")? {
            None => {}
            Some(Value::Object(map)) => {
                for (alias, record) in map {
                    let mut handle = decode_handle(endpoint, record)?;
                    if handle.alias.is_empty() {
                        handle.alias = alias.clone();
                    }
                    processes.insert(alias.clone(), handle);
                }
            }
            Some(Value::Array(items)) => {
                for record in items {
                    let handle = decode_handle(endpoint, record)?;
                    if handle.alias.is_empty() {
                        return Err(Error::malformed(endpoint, "process record without alias"));
                    }
                    processes.insert(handle.alias.clone(), handle);
                }
            }
            Some(other) => {
                return Err(Error::malformed(
                    endpoint,
                    format!("`processes` is not a collection: {other}"),
                ));
            }
        }
        Ok(processes)
    }

    pub fn exists(&self, alias: &str) -> Result<bool> {
        ensure_alias(alias)?;
        let response = self.call(RpcCall::Exists {
            alias: alias.to_string(),
        })?;
        read_bool("child-process/exists", &response, "exists")
    }

    pub fn is_running(&self, alias: &str) -> Result<bool> {
        ensure_alias(alias)?;
        let response = self.call(RpcCall::IsRunning {
            alias: alias.to_string(),
        })?;
        read_bool("child-process/is-running", &response, "running")
    }

    pub fn get_pid(&self, alias: &str) -> Result<Option<u32>> {
        ensure_alias(alias)?;
        let response = self.call(RpcCall::GetPid {
            alias: alias.to_string(),
        })?;
        read_u32("child-process/get-pid", &response, "pid")
    }

    pub fn get_status(&self, alias: &str) -> Result<Option<ProcessStatus>> {
        ensure_alias(alias)?;
        let endpoint = "child-process/get-status";
        let response = self.call(RpcCall::GetStatus {
            alias: alias.to_string(),
        })?;
        match field(endpoint, &response, "status")? {
            None => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|e| Error::malformed(endpoint, e.to_string())),
        }
    }

    pub fn get_output(&self, alias: &str) -> Result<Option<String>> {
        ensure_alias(alias)?;
        let response = self.call(RpcCall::GetOutput {
            alias: alias.to_string(),
        })?;
        read_string("child-process/get-output", &response, "output")
    }

    pub fn get_error(&self, alias: &str) -> Result<Option<String>> {
        ensure_alias(alias)?;
        let response = self.call(RpcCall::GetError {
            alias: alias.to_string(),
        })?;
        read_string("child-process/get-error", &response, "error")
    }

    pub fn get_exit_code(&self, alias: &str) -> Result<Option<i32>> {
        ensure_alias(alias)?;
        let endpoint = "child-process/get-exit-code";
        let response = self.call(RpcCall::GetExitCode {
            alias: alias.to_string(),
        })?;
        match field(endpoint, &response, "exit_code")? {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| Error::malformed(endpoint, format!("`exit_code` is not an i32: {v}"))),
        }
    }

    /// Discard every non-persistent process that is no longer running.
    /// Returns how many the host removed.
    pub fn cleanup(&self) -> Result<usize> {
        let endpoint = "child-process/cleanup";
        let response = self.call(RpcCall::Cleanup)?;
        let count = match field(endpoint, &response, "count")? {
            None => return Err(Error::malformed(endpoint, "missing `count`")),
            Some(v) => v
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| Error::malformed(endpoint, format!("`count` is not a count: {v}")))?,
        };
        info!("host cleaned up {count} process(es)");
        Ok(count)
    }
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map_or_else(|| "?".to_string(), |p| p.to_string())
}

fn decode_handle(endpoint: &str, record: &Value) -> Result<ProcessHandle> {
    serde_json::from_value(record.clone()).map_err(|e| Error::malformed(endpoint, e.to_string()))
}

/// `response[name]`, with JSON `null` folded into `None`.
fn field<'a>(endpoint: &str, response: &'a Value, name: &str) -> Result<Option<&'a Value>> {
    let Some(map) = response.as_object() else {
        return Err(Error::malformed(endpoint, "expected a JSON object"));
    };
    Ok(map.get(name).filter(|v| !v.is_null()))
}

/// Flags drive reconciliation, so an absent flag is an error rather than
/// `false`.
fn read_bool(endpoint: &str, response: &Value, name: &str) -> Result<bool> {
    match field(endpoint, response, name)? {
        None => Err(Error::malformed(endpoint, format!("missing `{name}`"))),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) if n.as_u64() == Some(0) => Ok(false),
        Some(Value::Number(n)) if n.as_u64() == Some(1) => Ok(true),
        Some(other) => Err(Error::malformed(
            endpoint,
            format!("`{name}` is not a boolean: {other}"),
        )),
    }
}

fn read_u32(endpoint: &str, response: &Value, name: &str) -> Result<Option<u32>> {
    match field(endpoint, response, name)? {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| Error::malformed(endpoint, format!("`{name}` is not a pid: {v}"))),
    }
}

fn read_string(endpoint: &str, response: &Value, name: &str) -> Result<Option<String>> {
    match field(endpoint, response, name)? {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(Error::malformed(
            endpoint,
            format!("`{name}` is not a string: {other}"),
        )),
    }
}
