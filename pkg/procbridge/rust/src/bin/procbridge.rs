// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::debug;
use procbridge::config::config_path;
use procbridge::{
    Config, HttpRpcPort, ProcessRegistry, StartOptions, WorkerSpec, WorkerSupervisor, load_config,
};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "procbridge")]
#[command(about = "Control processes and queue workers owned by the host runtime", long_about = None)]
struct Cli {
    /// YAML configuration file (defaults to $PROCBRIDGE_CONFIG or config/procbridge.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host runtime API base URL, overriding the configuration
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[arg(long, global = true, default_value = "info")]
    log_level: log::Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage queue workers
    #[command(subcommand)]
    Worker(WorkerCommand),
    /// Manage arbitrary processes by alias
    #[command(subcommand)]
    Process(ProcessCommand),
}

#[derive(Args, Debug)]
struct WorkerTarget {
    #[arg(long, default_value = "default")]
    connection: String,
    #[arg(long, default_value = "default")]
    queue: String,
}

#[derive(Args, Debug)]
struct WorkerSpecArgs {
    #[command(flatten)]
    target: WorkerTarget,
    #[arg(long, default_value_t = 3)]
    tries: u32,
    /// Seconds a job may run, enforced by the worker itself
    #[arg(long, default_value_t = 60)]
    timeout: u64,
    /// Seconds to sleep when the queue is empty
    #[arg(long, default_value_t = 3)]
    sleep: u64,
    /// Let the host drop the worker when the application disconnects
    #[arg(long)]
    no_persistent: bool,
}

impl WorkerSpecArgs {
    fn spec(&self) -> WorkerSpec {
        WorkerSpec::new(&self.target.connection, &self.target.queue)
            .tries(self.tries)
            .timeout_secs(self.timeout)
            .sleep_secs(self.sleep)
            .persistent(!self.no_persistent)
    }
}

#[derive(Subcommand, Debug)]
enum WorkerCommand {
    Up {
        #[command(flatten)]
        spec: WorkerSpecArgs,
        /// Relaunch even if the worker is already running
        #[arg(long)]
        force: bool,
    },
    Down(WorkerTarget),
    Restart(WorkerSpecArgs),
    Status(WorkerTarget),
    Get(WorkerTarget),
    List,
    Cleanup,
    DownAll,
    RestartAll,
}

#[derive(Subcommand, Debug)]
enum ProcessCommand {
    Start {
        alias: String,
        #[arg(long)]
        cwd: Option<String>,
        #[arg(long)]
        persistent: bool,
        /// Environment variable for the process, as KEY=VALUE
        #[arg(long = "env", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
        /// Command and its arguments
        #[arg(trailing_var_arg = true, required = true)]
        argv: Vec<String>,
    },
    Stop {
        alias: String,
    },
    Restart {
        alias: String,
    },
    Message {
        alias: String,
        message: String,
    },
    Get {
        alias: String,
    },
    List,
    Status {
        alias: String,
    },
    Output {
        alias: String,
    },
    Error {
        alias: String,
    },
    ExitCode {
        alias: String,
    },
    Cleanup,
}

fn parse_key_val(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("invalid environment entry (use KEY=VALUE): {s}"),
    }
}

fn run_worker(command: WorkerCommand, registry: Arc<ProcessRegistry>, config: &Config) -> Result<Value> {
    let supervisor = WorkerSupervisor::from_config(registry, &config.queue_worker);
    // Each invocation starts with an empty registry; seed it with the
    // configured workers so that list and bulk commands cover them.
    for spec in &config.queue_worker.auto_start_workers {
        supervisor.adopt(spec)?;
    }

    let output = match command {
        WorkerCommand::Up { spec, force } => {
            json!({ "success": supervisor.up(&spec.spec(), force)? })
        }
        WorkerCommand::Down(t) => json!({ "success": supervisor.down(&t.connection, &t.queue)? }),
        WorkerCommand::Restart(spec) => json!({ "success": supervisor.restart(&spec.spec())? }),
        WorkerCommand::Status(t) => json!({ "status": supervisor.status(&t.connection, &t.queue)? }),
        WorkerCommand::Get(t) => serde_json::to_value(supervisor.get(&t.connection, &t.queue)?)?,
        WorkerCommand::List => serde_json::to_value(supervisor.all())?,
        WorkerCommand::Cleanup => json!({ "count": supervisor.cleanup()? }),
        WorkerCommand::DownAll => json!({ "count": supervisor.down_all()? }),
        WorkerCommand::RestartAll => json!({ "count": supervisor.restart_all()? }),
    };
    Ok(output)
}

fn run_process(command: ProcessCommand, registry: &ProcessRegistry) -> Result<Value> {
    let output = match command {
        ProcessCommand::Start {
            alias,
            cwd,
            persistent,
            env,
            argv,
        } => {
            let mut options = StartOptions::new().persistent(persistent);
            if let Some(cwd) = cwd {
                options = options.working_directory(cwd);
            }
            for (key, value) in env {
                options = options.env(key, value);
            }
            registry.start_argv(argv.as_slice(), &alias, options)?;
            json!({ "alias": alias, "pid": registry.get_pid(&alias)? })
        }
        ProcessCommand::Stop { alias } => json!({ "success": registry.stop(&alias)? }),
        ProcessCommand::Restart { alias } => json!({ "success": registry.restart(&alias)? }),
        ProcessCommand::Message { alias, message } => {
            json!({ "success": registry.message(&message, &alias)? })
        }
        ProcessCommand::Get { alias } => serde_json::to_value(registry.get(&alias)?)?,
        ProcessCommand::List => serde_json::to_value(registry.all()?)?,
        ProcessCommand::Status { alias } => json!({
            "exists": registry.exists(&alias)?,
            "running": registry.is_running(&alias)?,
            "status": registry.get_status(&alias)?,
        }),
        ProcessCommand::Output { alias } => json!({ "output": registry.get_output(&alias)? }),
        ProcessCommand::Error { alias } => json!({ "error": registry.get_error(&alias)? }),
        ProcessCommand::ExitCode { alias } => json!({ "exit_code": registry.get_exit_code(&alias)? }),
        ProcessCommand::Cleanup => json!({ "count": registry.cleanup()? }),
    };
    Ok(output)
}

#[allow(clippy::print_stdout)]
fn main() -> Result<()> {
    let cli = Cli::parse();
    simple_logger::init_with_level(cli.log_level)?;

    let path = cli.config.unwrap_or_else(config_path);
    let mut config =
        load_config(&path).with_context(|| format!("loading config from {}", path.display()))?;
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    debug!("using host runtime at {}", config.api_url);

    let port = Arc::new(HttpRpcPort::from_config(&config));
    let registry = Arc::new(ProcessRegistry::from_config(port, &config));

    let output = match cli.command {
        Command::Worker(command) => run_worker(command, registry, &config)?,
        Command::Process(command) => run_process(command, &registry)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("APP_ENV=prod").unwrap(),
            ("APP_ENV".to_string(), "prod".to_string())
        );
        assert_eq!(
            parse_key_val("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_key_val("=x").is_err());
        assert!(parse_key_val("novalue").is_err());
    }

    #[test]
    fn test_worker_up_flags() {
        let cli = Cli::parse_from([
            "procbridge",
            "worker",
            "up",
            "--connection",
            "redis",
            "--queue",
            "emails",
            "--tries",
            "5",
            "--no-persistent",
            "--force",
        ]);
        let Command::Worker(WorkerCommand::Up { spec, force }) = cli.command else {
            unreachable!("parsed into the wrong command");
        };
        assert!(force);
        let spec = spec.spec();
        assert_eq!(spec.alias(), "queue-worker-redis-emails");
        assert_eq!(spec.tries, 5);
        assert_eq!(spec.timeout_secs, 60);
        assert!(!spec.persistent);
    }

    #[test]
    fn test_process_start_takes_trailing_argv() {
        let cli = Cli::parse_from([
            "procbridge",
            "process",
            "start",
            "web",
            "--env",
            "PORT=8080",
            "node",
            "server.js",
            "--port",
            "8080",
        ]);
        let Command::Process(ProcessCommand::Start { alias, env, argv, .. }) = cli.command else {
            unreachable!("parsed into the wrong command");
        };
        assert_eq!(alias, "web");
        assert_eq!(env, vec![("PORT".to_string(), "8080".to_string())]);
        assert_eq!(argv, vec!["node", "server.js", "--port", "8080"]);
    }
}
