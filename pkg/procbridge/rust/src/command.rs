// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Command-line construction for processes launched by the host runtime.
//! The host executes a single shell string, so every argument we splice in
//! is POSIX single-quoted.

/// Quote `arg` for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Quote and join an argument vector.
pub fn join_argv<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `<interpreter> '<script>' '<arg>'...`
pub fn script_command<S: AsRef<str>>(interpreter: &str, script: &str, args: &[S]) -> String {
    let mut cmd = format!("{interpreter} {}", shell_quote(script));
    push_args(&mut cmd, args);
    cmd
}

/// `<interpreter> '<console>' <command> '<arg>'...`
///
/// `command` is the console command name and is not quoted.
pub fn console_command<S: AsRef<str>>(
    interpreter: &str,
    console: &str,
    command: &str,
    args: &[S],
) -> String {
    let mut cmd = format!("{interpreter} {} {command}", shell_quote(console));
    push_args(&mut cmd, args);
    cmd
}

fn push_args<S: AsRef<str>>(cmd: &mut String, args: &[S]) {
    for arg in args {
        cmd.push(' ');
        cmd.push_str(&shell_quote(arg.as_ref()));
    }
}
