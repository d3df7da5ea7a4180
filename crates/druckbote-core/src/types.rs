// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Druckbote proxy.

use serde::{Deserialize, Serialize};

use crate::error::{DruckboteError, Result};

/// IPP job-state enum value as reported by the infrastructure printer.
///
/// The numeric ordering of the IPP enum is meaningful: all terminal states
/// (canceled, aborted, completed) compare greater than all active ones, so
/// scheduling decisions are plain integer comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteJobState(pub i32);

impl RemoteJobState {
    pub const PENDING: RemoteJobState = RemoteJobState(3);
    pub const PENDING_HELD: RemoteJobState = RemoteJobState(4);
    pub const PROCESSING: RemoteJobState = RemoteJobState(5);
    pub const PROCESSING_STOPPED: RemoteJobState = RemoteJobState(6);
    pub const CANCELED: RemoteJobState = RemoteJobState(7);
    pub const ABORTED: RemoteJobState = RemoteJobState(8);
    pub const COMPLETED: RemoteJobState = RemoteJobState(9);

    /// Canceled, aborted, or completed.
    pub fn is_terminal(self) -> bool {
        self >= Self::CANCELED
    }

    /// IPP keyword for the state, for log lines.
    pub fn keyword(self) -> &'static str {
        match self.0 {
            3 => "pending",
            4 => "pending-held",
            5 => "processing",
            6 => "processing-stopped",
            7 => "canceled",
            8 => "aborted",
            9 => "completed",
            _ => "unknown",
        }
    }
}

impl std::fmt::Display for RemoteJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// The proxy's own view of a relayed job.
///
/// Transitions only along
/// `pending → fetching → processing → {completed, aborted, canceled}`;
/// once a terminal state is reached the state never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalJobState {
    /// Queued in the registry, waiting for the relay worker.
    Pending,
    /// The relay worker has claimed the job and is pulling the ticket.
    Fetching,
    /// Document data is flowing to the local device.
    Processing,
    /// All documents delivered.
    Completed,
    /// The remote job was canceled while we were printing.
    Canceled,
    /// A transport or IPP failure stopped this job.
    Aborted,
}

impl LocalJobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Aborted)
    }

    /// The IPP job-state enum value reported as `output-device-job-state`.
    pub fn ipp_enum(self) -> i32 {
        match self {
            Self::Pending => 3,
            Self::Fetching | Self::Processing => 5,
            Self::Canceled => 7,
            Self::Aborted => 8,
            Self::Completed => 9,
        }
    }
}

/// One record in the job registry, keyed by the remote job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyJob {
    /// Identity key assigned by the infrastructure printer.
    pub remote_job_id: i32,
    /// Mirror of the last observed remote job-state.
    pub remote_job_state: RemoteJobState,
    /// Our own relay progress for this job.
    pub local_job_state: LocalJobState,
    /// Job id assigned by the local IPP device; zero for the socket
    /// back-end, which has no job concept.
    pub local_job_id: i32,
}

impl ProxyJob {
    pub fn new(remote_job_id: i32, remote_job_state: RemoteJobState) -> Self {
        Self {
            remote_job_id,
            remote_job_state,
            local_job_state: LocalJobState::Pending,
            local_job_id: 0,
        }
    }
}

/// URI scheme of the local output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceScheme {
    /// IPP Everywhere printer.
    Ipp,
    /// IPP over TLS.
    Ipps,
    /// Legacy PCL printer reached via raw TCP (JetDirect).
    Socket,
}

impl DeviceScheme {
    /// Parse the scheme from a device URI. Only `ipp://`, `ipps://`, and
    /// `socket://` devices can be proxied.
    pub fn parse(device_uri: &str) -> Result<Self> {
        if device_uri.starts_with("ipp://") {
            Ok(Self::Ipp)
        } else if device_uri.starts_with("ipps://") {
            Ok(Self::Ipps)
        } else if device_uri.starts_with("socket://") {
            Ok(Self::Socket)
        } else {
            Err(DruckboteError::InvalidUri(device_uri.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_state_ordering_matches_ipp_enum() {
        assert!(RemoteJobState::PENDING < RemoteJobState::CANCELED);
        assert!(RemoteJobState::PROCESSING < RemoteJobState::CANCELED);
        assert!(!RemoteJobState::PROCESSING_STOPPED.is_terminal());
        assert!(RemoteJobState::CANCELED.is_terminal());
        assert!(RemoteJobState::ABORTED.is_terminal());
        assert!(RemoteJobState::COMPLETED.is_terminal());
    }

    #[test]
    fn local_state_maps_to_ipp_enum() {
        assert_eq!(LocalJobState::Pending.ipp_enum(), 3);
        assert_eq!(LocalJobState::Fetching.ipp_enum(), 5);
        assert_eq!(LocalJobState::Processing.ipp_enum(), 5);
        assert_eq!(LocalJobState::Canceled.ipp_enum(), 7);
        assert_eq!(LocalJobState::Aborted.ipp_enum(), 8);
        assert_eq!(LocalJobState::Completed.ipp_enum(), 9);
    }

    #[test]
    fn device_scheme_accepts_supported_uris() {
        assert_eq!(
            DeviceScheme::parse("ipp://printer.local:631/ipp/print").unwrap(),
            DeviceScheme::Ipp
        );
        assert_eq!(
            DeviceScheme::parse("ipps://printer.local/ipp/print").unwrap(),
            DeviceScheme::Ipps
        );
        assert_eq!(
            DeviceScheme::parse("socket://10.0.0.5:9100").unwrap(),
            DeviceScheme::Socket
        );
    }

    #[test]
    fn device_scheme_rejects_others() {
        assert!(DeviceScheme::parse("lpd://printer.local/queue").is_err());
        assert!(DeviceScheme::parse("printer.local").is_err());
    }
}
