// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::errors::{Error, Result};

pub const WORKER_ALIAS_PREFIX: &str = "queue-worker-";

/// Alias of the queue worker consuming `queue` on `connection`.
///
/// Plain concatenation: no trimming, no case folding, so that every caller
/// passing the same pair lands on the same host descriptor.
pub fn worker_alias(connection: &str, queue: &str) -> String {
    format!("{WORKER_ALIAS_PREFIX}{connection}-{queue}")
}

pub(crate) fn ensure_alias(alias: &str) -> Result<()> {
    if alias.trim().is_empty() {
        return Err(Error::InvalidArgument("alias must not be empty".into()));
    }
    Ok(())
}
