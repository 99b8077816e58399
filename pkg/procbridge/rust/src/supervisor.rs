// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Fleet of queue workers kept alive on the host runtime.
//!
//! The supervisor reconciles instead of blindly starting: a worker that is
//! already running is left alone, a worker whose descriptor exists but is
//! not running is restarted from the command the host retained, and only a
//! worker the host has never seen gets a fresh `start`.

use crate::alias::worker_alias;
use crate::config::QueueWorkerConfig;
use crate::errors::{Error, Result};
use crate::registry::{ProcessRegistry, StartOptions};
use crate::state::{WorkerState, WorkerStatus};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const QUEUE_WORK_COMMAND: &str = "queue:work";

/// Desired configuration of one queue worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSpec {
    pub connection: String,
    pub queue: String,
    pub tries: u32,
    /// Handed to the worker process; the supervisor never enforces it.
    #[serde(alias = "timeout")]
    pub timeout_secs: u64,
    #[serde(alias = "sleep")]
    pub sleep_secs: u64,
    pub persistent: bool,
}

impl Default for WorkerSpec {
    fn default() -> Self {
        Self {
            connection: "default".to_string(),
            queue: "default".to_string(),
            tries: 3,
            timeout_secs: 60,
            sleep_secs: 3,
            persistent: true,
        }
    }
}

impl WorkerSpec {
    pub fn new(connection: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
            queue: queue.into(),
            ..Self::default()
        }
    }

    pub fn tries(mut self, tries: u32) -> Self {
        self.tries = tries;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn sleep_secs(mut self, secs: u64) -> Self {
        self.sleep_secs = secs;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn alias(&self) -> String {
        worker_alias(&self.connection, &self.queue)
    }

    /// Arguments following `queue:work` on the console command line.
    pub fn command_args(&self) -> Vec<String> {
        vec![
            self.connection.clone(),
            format!("--queue={}", self.queue),
            format!("--tries={}", self.tries),
            format!("--timeout={}", self.timeout_secs),
            format!("--sleep={}", self.sleep_secs),
        ]
    }

    fn validate(&self) -> Result<()> {
        validate_pair(&self.connection, &self.queue)?;
        if self.tries == 0 {
            return Err(Error::InvalidArgument("tries must be at least 1".into()));
        }
        Ok(())
    }
}

fn validate_pair(connection: &str, queue: &str) -> Result<()> {
    if connection.trim().is_empty() {
        return Err(Error::InvalidArgument("connection must not be empty".into()));
    }
    if queue.trim().is_empty() {
        return Err(Error::InvalidArgument("queue must not be empty".into()));
    }
    Ok(())
}

/// Last spec submitted for an alias and the outcome the supervisor recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WorkerEntry {
    spec: WorkerSpec,
    status: WorkerStatus,
}

/// A managed worker with its freshly observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerView {
    pub alias: String,
    #[serde(flatten)]
    pub spec: WorkerSpec,
    #[serde(flatten)]
    pub state: WorkerState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Started {
        connection: String,
        queue: String,
    },
    Restarted {
        connection: String,
        queue: String,
    },
    Stopped {
        connection: String,
        queue: String,
    },
    Failed {
        connection: String,
        queue: String,
        error: String,
    },
}

impl WorkerEvent {
    fn failed(connection: &str, queue: &str, error: impl Into<String>) -> Self {
        WorkerEvent::Failed {
            connection: connection.to_string(),
            queue: queue.to_string(),
            error: error.into(),
        }
    }

    pub fn connection(&self) -> &str {
        match self {
            WorkerEvent::Started { connection, .. }
            | WorkerEvent::Restarted { connection, .. }
            | WorkerEvent::Stopped { connection, .. }
            | WorkerEvent::Failed { connection, .. } => connection,
        }
    }

    pub fn queue(&self) -> &str {
        match self {
            WorkerEvent::Started { queue, .. }
            | WorkerEvent::Restarted { queue, .. }
            | WorkerEvent::Stopped { queue, .. }
            | WorkerEvent::Failed { queue, .. } => queue,
        }
    }
}

impl fmt::Display for WorkerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alias = worker_alias(self.connection(), self.queue());
        match self {
            WorkerEvent::Started { .. } => write!(f, "[{alias}] worker started"),
            WorkerEvent::Restarted { .. } => write!(f, "[{alias}] worker restarted"),
            WorkerEvent::Stopped { .. } => write!(f, "[{alias}] worker stopped"),
            WorkerEvent::Failed { error, .. } => write!(f, "[{alias}] worker failed: {error}"),
        }
    }
}

type Listener = Arc<dyn Fn(&WorkerEvent) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct WorkerSupervisor {
    registry: Arc<ProcessRegistry>,
    workers: Mutex<BTreeMap<String, WorkerEntry>>,
    // One lock per alias, so that two callers never both see "absent" and
    // both issue a start.
    alias_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    listeners: Mutex<Vec<Listener>>,
    log_events: bool,
}

impl WorkerSupervisor {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self {
            registry,
            workers: Mutex::new(BTreeMap::new()),
            alias_locks: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            log_events: false,
        }
    }

    pub fn from_config(registry: Arc<ProcessRegistry>, config: &QueueWorkerConfig) -> Self {
        Self::new(registry).with_event_logging(config.log_worker_events)
    }

    pub fn with_event_logging(mut self, enabled: bool) -> Self {
        self.log_events = enabled;
        self
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Register a listener called after every worker transition.
    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(&WorkerEvent) + Send + Sync + 'static,
    {
        lock(&self.listeners).push(Arc::new(listener));
    }

    fn emit(&self, events: Vec<WorkerEvent>) {
        if events.is_empty() {
            return;
        }
        // Listeners run unlocked so they can call back into the supervisor.
        let listeners: Vec<Listener> = lock(&self.listeners).clone();
        for event in &events {
            if self.log_events {
                info!("{event}");
            }
            for listener in listeners.iter() {
                listener(event);
            }
        }
    }

    fn alias_lock(&self, alias: &str) -> Arc<Mutex<()>> {
        lock(&self.alias_locks)
            .entry(alias.to_string())
            .or_default()
            .clone()
    }

    /// Drop the lock entry of an alias the supervisor does not track, once
    /// no other caller holds it.
    fn release_alias_lock(&self, alias: &str, alias_lock: Arc<Mutex<()>>) {
        drop(alias_lock);
        if lock(&self.workers).contains_key(alias) {
            return;
        }
        let mut locks = lock(&self.alias_locks);
        if locks
            .get(alias)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(alias);
        }
    }

    /// Run `op` holding the alias lock, then emit the events it produced.
    fn with_alias<T>(
        &self,
        alias: &str,
        op: impl FnOnce(&mut Vec<WorkerEvent>) -> Result<T>,
    ) -> Result<T> {
        let alias_lock = self.alias_lock(alias);
        let mut events = Vec::new();
        let result = {
            let _guard = lock(&alias_lock);
            op(&mut events)
        };
        self.release_alias_lock(alias, alias_lock);
        self.emit(events);
        result
    }

    fn record(&self, alias: &str, spec: &WorkerSpec, status: WorkerStatus) {
        lock(&self.workers).insert(
            alias.to_string(),
            WorkerEntry {
                spec: spec.clone(),
                status,
            },
        );
    }

    fn mark_stopped(&self, alias: &str) {
        if let Some(entry) = lock(&self.workers).get_mut(alias) {
            entry.status = WorkerStatus::Stopped;
        }
    }

    fn snapshot(&self) -> Vec<(String, WorkerEntry)> {
        lock(&self.workers)
            .iter()
            .map(|(alias, entry)| (alias.clone(), entry.clone()))
            .collect()
    }

    /// Track a worker started by an earlier process without contacting the
    /// host. Already tracked workers keep their entry.
    pub fn adopt(&self, spec: &WorkerSpec) -> Result<()> {
        spec.validate()?;
        lock(&self.workers)
            .entry(spec.alias())
            .or_insert_with(|| WorkerEntry {
                spec: spec.clone(),
                status: WorkerStatus::Stopped,
            });
        Ok(())
    }

    /// Bring the worker described by `spec` to running.
    ///
    /// Without `force_restart`, a worker that already runs is left untouched
    /// and no command is sent to the host.
    pub fn up(&self, spec: &WorkerSpec, force_restart: bool) -> Result<bool> {
        spec.validate()?;
        let alias = spec.alias();
        self.with_alias(&alias, |events| {
            self.up_locked(&alias, spec, force_restart, events)
        })
    }

    fn up_locked(
        &self,
        alias: &str,
        spec: &WorkerSpec,
        force_restart: bool,
        events: &mut Vec<WorkerEvent>,
    ) -> Result<bool> {
        let exists = self.registry.exists(alias)?;
        if exists && !force_restart && self.registry.is_running(alias)? {
            debug!("[{alias}] already running, nothing to do");
            self.record(alias, spec, WorkerStatus::Running);
            return Ok(true);
        }

        if exists {
            // Relaunch what the host retained for the alias.
            if !self.registry.restart(alias)? {
                events.push(WorkerEvent::failed(
                    &spec.connection,
                    &spec.queue,
                    "host refused to restart the worker",
                ));
                return Ok(false);
            }
            self.record(alias, spec, WorkerStatus::Running);
            events.push(WorkerEvent::Restarted {
                connection: spec.connection.clone(),
                queue: spec.queue.clone(),
            });
            return Ok(true);
        }

        let command = self
            .registry
            .console_command_line(QUEUE_WORK_COMMAND, &spec.command_args());
        self.registry.start(
            &command,
            alias,
            StartOptions::new().persistent(spec.persistent),
        )?;
        self.record(alias, spec, WorkerStatus::Running);
        events.push(WorkerEvent::Started {
            connection: spec.connection.clone(),
            queue: spec.queue.clone(),
        });
        Ok(true)
    }

    /// Stop the worker. Stopping a worker the host never knew succeeds
    /// without contacting it beyond the existence check.
    pub fn down(&self, connection: &str, queue: &str) -> Result<bool> {
        validate_pair(connection, queue)?;
        let alias = worker_alias(connection, queue);
        self.with_alias(&alias, |events| {
            self.down_locked(&alias, connection, queue, events)
        })
    }

    fn down_locked(
        &self,
        alias: &str,
        connection: &str,
        queue: &str,
        events: &mut Vec<WorkerEvent>,
    ) -> Result<bool> {
        if !self.registry.exists(alias)? {
            debug!("[{alias}] not known to host, nothing to stop");
            self.mark_stopped(alias);
            return Ok(true);
        }
        if !self.registry.stop(alias)? {
            events.push(WorkerEvent::failed(
                connection,
                queue,
                "host refused to stop the worker",
            ));
            return Ok(false);
        }
        self.mark_stopped(alias);
        events.push(WorkerEvent::Stopped {
            connection: connection.to_string(),
            queue: queue.to_string(),
        });
        Ok(true)
    }

    /// `down` followed by a forced `up`, atomically for the alias.
    pub fn restart(&self, spec: &WorkerSpec) -> Result<bool> {
        spec.validate()?;
        let alias = spec.alias();
        self.with_alias(&alias, |events| self.restart_locked(&alias, spec, events))
    }

    fn restart_locked(
        &self,
        alias: &str,
        spec: &WorkerSpec,
        events: &mut Vec<WorkerEvent>,
    ) -> Result<bool> {
        if !self.down_locked(alias, &spec.connection, &spec.queue, events)? {
            warn!("[{alias}] stop failed, relaunching anyway");
        }
        self.up_locked(alias, spec, true, events)
    }

    /// `None` when the host has no descriptor for the worker.
    pub fn status(&self, connection: &str, queue: &str) -> Result<Option<WorkerStatus>> {
        validate_pair(connection, queue)?;
        let alias = worker_alias(connection, queue);
        Ok(self.observe(&alias)?.status())
    }

    fn observe(&self, alias: &str) -> Result<WorkerState> {
        if !self.registry.exists(alias)? {
            return Ok(WorkerState::Absent);
        }
        if !self.registry.is_running(alias)? {
            return Ok(WorkerState::Stopped);
        }
        Ok(WorkerState::Running {
            pid: self.registry.get_pid(alias)?,
        })
    }

    fn observe_or_unknown(&self, alias: &str, recorded: WorkerStatus) -> WorkerState {
        self.observe(alias).unwrap_or_else(|e| {
            warn!("[{alias}] cannot observe worker (last recorded {recorded}): {e}");
            WorkerState::Unknown
        })
    }

    /// A worker this supervisor manages, with freshly observed state.
    pub fn get(&self, connection: &str, queue: &str) -> Result<Option<WorkerView>> {
        validate_pair(connection, queue)?;
        let alias = worker_alias(connection, queue);
        let entry = lock(&self.workers).get(&alias).cloned();
        Ok(entry.map(|entry| WorkerView {
            state: self.observe_or_unknown(&alias, entry.status),
            alias,
            spec: entry.spec,
        }))
    }

    /// Every managed worker keyed by alias.
    pub fn all(&self) -> BTreeMap<String, WorkerView> {
        self.snapshot()
            .into_iter()
            .map(|(alias, entry)| {
                let view = WorkerView {
                    state: self.observe_or_unknown(&alias, entry.status),
                    alias: alias.clone(),
                    spec: entry.spec,
                };
                (alias, view)
            })
            .collect()
    }

    /// Stop workers whose descriptor exists but no longer runs. Running
    /// workers are left alone. Returns how many were cleaned.
    pub fn cleanup(&self) -> Result<usize> {
        let mut cleaned = 0;
        for (alias, entry) in self.snapshot() {
            if self.with_alias(&alias, |events| {
                self.cleanup_locked(&alias, &entry.spec, events)
            })? {
                cleaned += 1;
            }
        }
        info!("cleaned up {cleaned} worker(s)");
        Ok(cleaned)
    }

    fn cleanup_locked(
        &self,
        alias: &str,
        spec: &WorkerSpec,
        events: &mut Vec<WorkerEvent>,
    ) -> Result<bool> {
        if !self.registry.exists(alias)? || self.registry.is_running(alias)? {
            return Ok(false);
        }
        if self.registry.stop(alias)? {
            events.push(WorkerEvent::Stopped {
                connection: spec.connection.clone(),
                queue: spec.queue.clone(),
            });
        }
        self.mark_stopped(alias);
        Ok(true)
    }

    /// Stop every managed worker, running or not. Returns how many were
    /// processed.
    pub fn down_all(&self) -> Result<usize> {
        let mut processed = 0;
        for (alias, entry) in self.snapshot() {
            let spec = entry.spec;
            self.with_alias(&alias, |events| {
                self.down_locked(&alias, &spec.connection, &spec.queue, events)
            })?;
            processed += 1;
        }
        info!("stopped {processed} worker(s)");
        Ok(processed)
    }

    /// Restart every managed worker from its stored spec.
    pub fn restart_all(&self) -> Result<usize> {
        let mut processed = 0;
        for (alias, entry) in self.snapshot() {
            self.with_alias(&alias, |events| {
                self.restart_locked(&alias, &entry.spec, events)
            })?;
            processed += 1;
        }
        info!("restarted {processed} worker(s)");
        Ok(processed)
    }

    pub fn exists(&self, connection: &str, queue: &str) -> Result<bool> {
        validate_pair(connection, queue)?;
        self.registry.exists(&worker_alias(connection, queue))
    }

    pub fn is_running(&self, connection: &str, queue: &str) -> Result<bool> {
        validate_pair(connection, queue)?;
        self.registry.is_running(&worker_alias(connection, queue))
    }

    pub fn get_pid(&self, connection: &str, queue: &str) -> Result<Option<u32>> {
        validate_pair(connection, queue)?;
        self.registry.get_pid(&worker_alias(connection, queue))
    }

    pub fn get_output(&self, connection: &str, queue: &str) -> Result<Option<String>> {
        validate_pair(connection, queue)?;
        self.registry.get_output(&worker_alias(connection, queue))
    }

    pub fn get_error(&self, connection: &str, queue: &str) -> Result<Option<String>> {
        validate_pair(connection, queue)?;
        self.registry.get_error(&worker_alias(connection, queue))
    }

    pub fn get_exit_code(&self, connection: &str, queue: &str) -> Result<Option<i32>> {
        validate_pair(connection, queue)?;
        self.registry.get_exit_code(&worker_alias(connection, queue))
    }

    /// Application start hook: bring up the configured workers, forcing a
    /// relaunch of any left over from a previous run.
    pub fn on_app_start(&self, config: &QueueWorkerConfig) -> Result<usize> {
        if !config.auto_start {
            return Ok(0);
        }
        let mut started = 0;
        for spec in &config.auto_start_workers {
            if self.up(spec, true)? {
                started += 1;
            }
        }
        info!(
            "auto-started {started}/{} worker(s)",
            config.auto_start_workers.len()
        );
        Ok(started)
    }

    /// Application quit hook.
    pub fn on_app_quit(&self, config: &QueueWorkerConfig) -> Result<usize> {
        if !config.auto_stop {
            return Ok(0);
        }
        self.down_all()
    }
}
