// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use procbridge::testing::FakeHost;
use procbridge::{
    ProcessRegistry, RpcCall, WorkerSpec, WorkerState, WorkerStatus, WorkerSupervisor,
};

fn setup() -> (Arc<FakeHost>, Arc<WorkerSupervisor>) {
    let host = Arc::new(FakeHost::new());
    let registry = Arc::new(ProcessRegistry::new(host.clone()));
    (host, Arc::new(WorkerSupervisor::new(registry)))
}

#[test]
fn test_up_twice_issues_no_second_launch() {
    let (host, supervisor) = setup();
    let spec = WorkerSpec::default();

    assert!(supervisor.up(&spec, false).unwrap());
    host.clear_calls();

    assert!(supervisor.up(&spec, false).unwrap());
    assert!(
        host.mutations().is_empty(),
        "second up should be a no-op, got {:?}",
        host.mutations()
    );
}

#[test]
fn test_up_after_crash_restarts_instead_of_starting() {
    let (host, supervisor) = setup();
    let spec = WorkerSpec::new("redis", "emails");

    supervisor.up(&spec, false).unwrap();
    host.crash(&spec.alias(), 1);
    host.clear_calls();

    assert!(supervisor.up(&spec, false).unwrap());
    assert_eq!(
        host.mutations(),
        vec![RpcCall::Restart {
            alias: "queue-worker-redis-emails".into()
        }]
    );
    assert!(host.is_running(&spec.alias()));
}

#[test]
fn test_up_and_down_address_the_same_alias() {
    let (host, supervisor) = setup();

    supervisor.up(&WorkerSpec::new("default", "default"), false).unwrap();
    supervisor.down("default", "default").unwrap();

    let aliases: Vec<String> = host
        .mutations()
        .iter()
        .filter_map(|c| c.alias().map(str::to_string))
        .collect();
    assert_eq!(
        aliases,
        vec!["queue-worker-default-default", "queue-worker-default-default"]
    );
}

#[test]
fn test_down_of_unknown_worker_is_a_quiet_success() {
    let (host, supervisor) = setup();

    assert!(supervisor.down("redis", "never-started").unwrap());
    assert!(host.calls_to("child-process/stop").is_empty());
}

#[test]
fn test_cleanup_only_touches_stopped_workers() {
    let (host, supervisor) = setup();
    let running = WorkerSpec::new("redis", "a");
    let crashed = WorkerSpec::new("redis", "b");
    supervisor.up(&running, false).unwrap();
    supervisor.up(&crashed, false).unwrap();
    host.crash(&crashed.alias(), 255);
    host.clear_calls();

    assert_eq!(supervisor.cleanup().unwrap(), 1);

    let stops = host.calls_to("child-process/stop");
    assert_eq!(
        stops,
        vec![RpcCall::Stop {
            alias: crashed.alias()
        }]
    );
    assert!(host.is_running(&running.alias()));
}

#[test]
fn test_down_all_counts_every_worker() {
    let (host, supervisor) = setup();
    let a = WorkerSpec::new("redis", "a");
    let b = WorkerSpec::new("redis", "b");
    supervisor.up(&a, false).unwrap();
    supervisor.up(&b, false).unwrap();
    host.crash(&b.alias(), 1);

    assert_eq!(supervisor.down_all().unwrap(), 2);
    assert!(!host.is_running(&a.alias()));
    assert_eq!(
        supervisor.status("redis", "a").unwrap(),
        Some(WorkerStatus::Stopped)
    );
}

#[test]
fn test_restart_all_stops_and_relaunches_each_worker() {
    let (host, supervisor) = setup();
    let a = WorkerSpec::new("redis", "a");
    let b = WorkerSpec::new("sqs", "b");
    supervisor.up(&a, false).unwrap();
    supervisor.up(&b, false).unwrap();
    host.clear_calls();

    assert_eq!(supervisor.restart_all().unwrap(), 2);

    for spec in [&a, &b] {
        let alias = spec.alias();
        let ops: Vec<&'static str> = host
            .mutations()
            .iter()
            .filter(|c| c.alias() == Some(alias.as_str()))
            .map(RpcCall::endpoint)
            .collect();
        assert_eq!(
            ops,
            vec!["child-process/stop", "child-process/restart"],
            "unexpected calls for {alias}"
        );
        assert!(host.is_running(&alias));
    }
}

#[test]
fn test_redis_emails_lifecycle() {
    let (_host, supervisor) = setup();
    let spec = WorkerSpec::new("redis", "emails").persistent(true);

    assert!(supervisor.up(&spec, false).unwrap());
    assert_eq!(spec.alias(), "queue-worker-redis-emails");
    assert_eq!(
        supervisor.status("redis", "emails").unwrap(),
        Some(WorkerStatus::Running)
    );

    assert!(supervisor.down("redis", "emails").unwrap());
    assert_eq!(
        supervisor.status("redis", "emails").unwrap(),
        Some(WorkerStatus::Stopped)
    );

    // The entry survives as history with its terminal state.
    let all = supervisor.all();
    assert_eq!(all.len(), 1);
    assert_eq!(all["queue-worker-redis-emails"].state, WorkerState::Stopped);
}

#[test]
fn test_status_of_never_started_worker_is_none() {
    let (_host, supervisor) = setup();
    assert_eq!(supervisor.status("redis", "emails").unwrap(), None);
}

#[test]
fn test_restart_relaunches_running_worker() {
    let (host, supervisor) = setup();
    let spec = WorkerSpec::new("redis", "emails");
    supervisor.up(&spec, false).unwrap();
    let first_pid = supervisor.get_pid("redis", "emails").unwrap();
    host.clear_calls();

    assert!(supervisor.restart(&spec).unwrap());

    let ops: Vec<&'static str> = host.mutations().iter().map(RpcCall::endpoint).collect();
    assert_eq!(ops, vec!["child-process/stop", "child-process/restart"]);
    let second_pid = supervisor.get_pid("redis", "emails").unwrap();
    assert!(second_pid.is_some());
    assert_ne!(first_pid, second_pid);
}

#[test]
fn test_concurrent_up_starts_exactly_once() {
    let (host, supervisor) = setup();
    host.set_latency(Duration::from_millis(5));
    let spec = WorkerSpec::new("redis", "emails");

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let supervisor = supervisor.clone();
            let barrier = barrier.clone();
            let spec = spec.clone();
            thread::spawn(move || {
                barrier.wait();
                supervisor.up(&spec, false).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(host.calls_to("child-process/start").len(), 1);
    assert!(host.calls_to("child-process/restart").is_empty());
}

#[test]
fn test_transport_failure_propagates_from_decisions() {
    let (host, supervisor) = setup();
    let spec = WorkerSpec::default();
    supervisor.up(&spec, false).unwrap();
    host.set_unreachable(true);
    host.clear_calls();

    assert!(supervisor.up(&spec, false).unwrap_err().is_transport());
    assert!(supervisor.down("default", "default").unwrap_err().is_transport());
    assert!(supervisor.cleanup().unwrap_err().is_transport());
    assert!(supervisor.down_all().unwrap_err().is_transport());
    assert!(supervisor.is_running("default", "default").is_err());

    // Nothing was mutated while the host was unreachable.
    assert!(host.mutations().is_empty());
    host.set_unreachable(false);
    assert!(host.is_running(&spec.alias()));
}

#[test]
fn test_pass_through_projections() {
    let (host, supervisor) = setup();
    let spec = WorkerSpec::default();
    supervisor.up(&spec, false).unwrap();
    host.set_output(&spec.alias(), "Processing: App\\Jobs\\Mail\n", "");

    assert!(supervisor.exists("default", "default").unwrap());
    assert!(supervisor.is_running("default", "default").unwrap());
    assert_eq!(
        supervisor.get_output("default", "default").unwrap().as_deref(),
        Some("Processing: App\\Jobs\\Mail\n")
    );
    assert_eq!(
        supervisor.get_error("default", "default").unwrap().as_deref(),
        Some("")
    );
    assert_eq!(supervisor.get_exit_code("default", "default").unwrap(), None);

    host.crash(&spec.alias(), 3);
    assert_eq!(supervisor.get_exit_code("default", "default").unwrap(), Some(3));
    assert_eq!(supervisor.get_pid("default", "default").unwrap(), None);
}
