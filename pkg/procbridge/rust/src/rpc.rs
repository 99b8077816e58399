// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! RPC port to the host runtime and its blocking HTTP adapter.

use crate::config::Config;
use crate::errors::{Error, Result};
use log::debug;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

pub const SECRET_HEADER: &str = "X-NativePHP-Secret";

/// One request to the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCall {
    Start {
        cmd: String,
        alias: String,
        cwd: Option<String>,
        persistent: bool,
        env: HashMap<String, String>,
    },
    Stop {
        alias: String,
    },
    Restart {
        alias: String,
    },
    Message {
        message: String,
        alias: String,
    },
    Get {
        alias: String,
    },
    All,
    Exists {
        alias: String,
    },
    IsRunning {
        alias: String,
    },
    GetPid {
        alias: String,
    },
    GetStatus {
        alias: String,
    },
    GetOutput {
        alias: String,
    },
    GetError {
        alias: String,
    },
    GetExitCode {
        alias: String,
    },
    Cleanup,
}

impl RpcCall {
    /// Path of the call below the host API base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            RpcCall::Start { .. } => "child-process/start",
            RpcCall::Stop { .. } => "child-process/stop",
            RpcCall::Restart { .. } => "child-process/restart",
            RpcCall::Message { .. } => "child-process/message",
            RpcCall::Get { .. } => "child-process/get",
            RpcCall::All => "child-process/all",
            RpcCall::Exists { .. } => "child-process/exists",
            RpcCall::IsRunning { .. } => "child-process/is-running",
            RpcCall::GetPid { .. } => "child-process/get-pid",
            RpcCall::GetStatus { .. } => "child-process/get-status",
            RpcCall::GetOutput { .. } => "child-process/get-output",
            RpcCall::GetError { .. } => "child-process/get-error",
            RpcCall::GetExitCode { .. } => "child-process/get-exit-code",
            RpcCall::Cleanup => "child-process/cleanup",
        }
    }

    /// Mutations are POSTed with a JSON body, queries are GETs.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            RpcCall::Start { .. }
                | RpcCall::Stop { .. }
                | RpcCall::Restart { .. }
                | RpcCall::Message { .. }
                | RpcCall::Cleanup
        )
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            RpcCall::Start { alias, .. }
            | RpcCall::Stop { alias }
            | RpcCall::Restart { alias }
            | RpcCall::Message { alias, .. }
            | RpcCall::Get { alias }
            | RpcCall::Exists { alias }
            | RpcCall::IsRunning { alias }
            | RpcCall::GetPid { alias }
            | RpcCall::GetStatus { alias }
            | RpcCall::GetOutput { alias }
            | RpcCall::GetError { alias }
            | RpcCall::GetExitCode { alias } => Some(alias),
            RpcCall::All | RpcCall::Cleanup => None,
        }
    }

    /// Request fields, as sent in the body or the query string.
    pub fn params(&self) -> Value {
        match self {
            RpcCall::Start {
                cmd,
                alias,
                cwd,
                persistent,
                env,
            } => json!({
                "cmd": cmd,
                "alias": alias,
                "cwd": cwd,
                "persistent": persistent,
                "env": env,
            }),
            RpcCall::Message { message, alias } => json!({
                "message": message,
                "alias": alias,
            }),
            RpcCall::All | RpcCall::Cleanup => json!({}),
            other => json!({ "alias": other.alias() }),
        }
    }
}

/// Synchronous request/response channel to the host runtime.
///
/// Implementations return the decoded JSON response. Any failure to obtain
/// one must be an `Error::Transport` or `Error::MalformedResponse`, never a
/// synthesized "negative" response.
pub trait RpcPort: Send + Sync {
    fn call(&self, call: &RpcCall) -> Result<Value>;
}

/// `RpcPort` speaking JSON over HTTP to the host runtime's API.
pub struct HttpRpcPort {
    agent: ureq::Agent,
    base_url: String,
    secret: String,
}

impl HttpRpcPort {
    pub fn new(base_url: &str, secret: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.api_url,
            &config.secret,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn request(&self, method: &str, endpoint: &str) -> ureq::Request {
        self.agent
            .request(method, &self.url(endpoint))
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .set(SECRET_HEADER, &self.secret)
    }
}

/// 4xx answers about the request, as opposed to server failures or a
/// rejected secret, which leave the host state unknown.
fn is_logical_rejection(code: u16) -> bool {
    (400..500).contains(&code) && !matches!(code, 401 | 403 | 407 | 408 | 429)
}

impl RpcPort for HttpRpcPort {
    fn call(&self, call: &RpcCall) -> Result<Value> {
        let endpoint = call.endpoint();
        let params = call.params();
        debug!("rpc {endpoint} {params}");

        let result = if call.is_mutation() {
            self.request("POST", endpoint).send_json(params)
        } else {
            let mut req = self.request("GET", endpoint);
            if let Some(alias) = call.alias() {
                req = req.query("alias", alias);
            }
            req.call()
        };

        let response = match result {
            Ok(resp) => resp,
            // A client-side rejection of the request itself, such as an
            // unknown alias, still carries the host's answer.
            Err(ureq::Error::Status(code, resp)) if is_logical_rejection(code) => {
                debug!("rpc {endpoint} answered HTTP {code}");
                resp
            }
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                return Err(Error::transport(
                    endpoint,
                    format!("host answered HTTP {code}: {}", body.trim()),
                ));
            }
            Err(ureq::Error::Transport(t)) => return Err(Error::transport(endpoint, t.to_string())),
        };

        let body = response
            .into_string()
            .map_err(|e| Error::transport(endpoint, format!("reading body: {e}")))?;
        serde_json::from_str(&body).map_err(|e| Error::malformed(endpoint, e.to_string()))
    }
}
