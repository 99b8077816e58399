// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The host runtime could not be reached in time, or failed the call with
    /// a server or authentication error.
    #[error("transport failure calling {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The host answered, but not with something we can interpret.
    #[error("malformed response from {endpoint}: {message}")]
    MalformedResponse { endpoint: String, message: String },

    /// Rejected locally, no call was issued.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn transport(endpoint: &str, message: impl Into<String>) -> Self {
        Error::Transport {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn malformed(endpoint: &str, message: impl Into<String>) -> Self {
        Error::MalformedResponse {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// True when the state of the host is unknown because of this failure,
    /// as opposed to a call that was never attempted.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::MalformedResponse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(Error::transport("child-process/stop", "connection refused").is_transport());
        assert!(Error::malformed("child-process/get", "not json").is_transport());
        assert!(!Error::InvalidArgument("alias must not be empty".into()).is_transport());
    }

    #[test]
    fn test_display_names_endpoint() {
        let err = Error::transport("child-process/exists", "timed out");
        assert_eq!(
            err.to_string(),
            "transport failure calling child-process/exists: timed out"
        );
    }
}
