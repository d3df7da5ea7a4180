// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Druckbote.
//
// The relay worker matches on these variants explicitly: a job-scoped
// failure aborts only that job, a transport failure is retried, and a
// registration failure at startup ends the process.

use thiserror::Error;

/// Top-level error type for all Druckbote operations.
#[derive(Debug, Error)]
pub enum DruckboteError {
    /// TCP refused, DNS failure, TLS handshake, HTTP 5xx — retried with
    /// back-off, never fatal in steady state.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP 401/407 after the stored secret was supplied.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// An IPP status at or above redirection-other-site on a job-scoped
    /// operation. Aborts the affected job only.
    #[error("IPP status 0x{status:04x}: {detail}")]
    IppJob { status: u16, detail: String },

    /// Fetch-Job returned error-not-fetchable: another proxy took the job.
    #[error("job already fetched by another printer")]
    JobNotFetchable,

    /// Register-Output-Device or Create-Printer-Subscriptions failed at
    /// startup. The process exits with status 1.
    #[error("registration failed: {0}")]
    Registration(String),

    /// A termination signal was observed; loops drain to a safe point.
    #[error("shutdown requested")]
    ShutdownRequested,

    #[error("invalid URI '{0}'")]
    InvalidUri(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DruckboteError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Auth(_))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DruckboteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_transient() {
        assert!(DruckboteError::Transport("connection refused".into()).is_transient());
    }

    #[test]
    fn job_errors_are_not_transient() {
        let err = DruckboteError::IppJob {
            status: 0x0400,
            detail: "bad request".into(),
        };
        assert!(!err.is_transient());
        assert!(!DruckboteError::JobNotFetchable.is_transient());
        assert!(!DruckboteError::ShutdownRequested.is_transient());
    }
}
