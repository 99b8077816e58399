// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

//! Alias-addressed control of processes owned by a host runtime, and a
//! supervisor keeping queue workers alive on top of it.

pub mod alias;
pub mod command;
pub mod config;
pub mod errors;
pub mod registry;
pub mod rpc;
pub mod state;
pub mod supervisor;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use alias::worker_alias;
pub use config::{Config, QueueWorkerConfig, load_config};
pub use errors::{Error, Result};
pub use registry::{ProcessHandle, ProcessRegistry, StartOptions};
pub use rpc::{HttpRpcPort, RpcCall, RpcPort};
pub use state::{ProcessStatus, WorkerState, WorkerStatus};
pub use supervisor::{WorkerEvent, WorkerSpec, WorkerSupervisor, WorkerView};
