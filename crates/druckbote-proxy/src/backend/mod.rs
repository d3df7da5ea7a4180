// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local submission back-ends.
//
// Two ways to hand a fetched document to the output device: a raw TCP
// byte stream for `socket://` PCL printers, and IPP submission with the
// Create-Job/Send-Document flow (falling back to Print-Job) for
// `ipp://`/`ipps://` printers. Both share one capability set: send a
// job, poll its state, cancel it.

pub mod ipp_device;
pub mod socket;

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use async_compression::futures::bufread::{DeflateDecoder, GzipDecoder};
use futures::io::{AsyncRead, BufReader};
use ipp::prelude::*;
use ipp::request::IppRequestResponse;

use druckbote_core::error::{DruckboteError, Result};
use druckbote_core::types::{DeviceScheme, RemoteJobState};

use crate::attrs;

/// client-error-compression-not-supported, reported when a document
/// arrives in an encoding the proxy cannot undo.
const COMPRESSION_NOT_SUPPORTED: u16 = 0x040F;

/// Job ticket attributes copied from the remote job into the local
/// submission: the operation group...
const TICKET_OPERATION_ATTRS: &[&str] = &[
    "job-name",
    "job-password",
    "job-password-encryption",
    "job-priority",
];

/// ...and the job-template group.
const TICKET_TEMPLATE_ATTRS: &[&str] = &[
    "copies",
    "finishings",
    "finishings-col",
    "job-account-id",
    "job-accounting-user-id",
    "media",
    "media-col",
    "multiple-document-handling",
    "orientation-requested",
    "page-ranges",
    "print-color-mode",
    "print-quality",
    "sides",
];

/// The slice of a fetched job's attributes that travels with each local
/// submission.
#[derive(Debug, Clone, Default)]
pub struct JobTicket {
    pub operation: Vec<IppAttribute>,
    pub job_template: Vec<IppAttribute>,
}

impl JobTicket {
    /// Collect the ticket attributes out of a Fetch-Job response.
    pub fn from_job_attributes(job_attrs: &IppAttributes) -> Self {
        let mut ticket = Self::default();
        for name in TICKET_OPERATION_ATTRS {
            if let Some(attr) = attrs::find_attr(job_attrs, name) {
                ticket.operation.push(attr.clone());
            }
        }
        for name in TICKET_TEMPLATE_ATTRS {
            if let Some(attr) = attrs::find_attr(job_attrs, name) {
                ticket.job_template.push(attr.clone());
            }
        }
        ticket
    }
}

/// Boxed byte stream feeding a back-end.
pub type DocReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// One fetched document: its payload plus the transfer attributes the
/// submission decision depends on.
pub struct DocumentStream {
    payload: IppPayload,
    /// MIME type reported by the service.
    pub format: String,
    /// Payload compression; `None` when the data is plain.
    pub compression: Option<String>,
}

impl DocumentStream {
    /// Take the payload and transfer attributes out of a Fetch-Document
    /// response.
    pub fn from_response(response: IppRequestResponse) -> Self {
        let format = attrs::find_string(response.attributes(), "document-format")
            .unwrap_or("application/octet-stream")
            .to_string();
        let compression = attrs::find_string(response.attributes(), "compression")
            .filter(|value| *value != "none")
            .map(str::to_string);

        Self {
            payload: response.into_payload(),
            format,
            compression,
        }
    }

    /// The raw payload bytes, still compressed if they arrived that way.
    pub fn into_reader(self) -> DocReader {
        Box::new(self.payload)
    }

    /// The payload bytes with any transfer compression undone, the way a
    /// device that cannot decompress needs them.
    pub fn into_decompressed_reader(self) -> Result<DocReader> {
        match self.compression.as_deref() {
            None => Ok(Box::new(self.payload)),
            Some("gzip") => Ok(Box::new(GzipDecoder::new(BufReader::new(self.payload)))),
            Some("deflate") => Ok(Box::new(DeflateDecoder::new(BufReader::new(self.payload)))),
            Some(other) => Err(DruckboteError::IppJob {
                status: COMPRESSION_NOT_SUPPORTED,
                detail: format!("document compression '{other}' is not supported"),
            }),
        }
    }
}

/// Byte counter threaded through a submission so the total can be logged
/// after the stream drains.
pub(crate) struct CountingReader {
    inner: DocReader,
    count: Arc<AtomicU64>,
}

impl CountingReader {
    pub(crate) fn new(inner: DocReader) -> (Self, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        (
            Self {
                inner,
                count: count.clone(),
            },
            count,
        )
    }
}

impl AsyncRead for CountingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(read)) => {
                self.count.fetch_add(read as u64, Ordering::Relaxed);
                Poll::Ready(Ok(read))
            }
            other => other,
        }
    }
}

/// Handle to a job handed to the local device.
#[derive(Debug, Clone, Copy)]
pub enum LocalJobHandle {
    /// Socket back-end: the job is done the moment the stream drains.
    Drained { bytes: u64 },
    /// IPP back-end: a job the local printer tracks by id.
    IppJob { job_id: i32, bytes: u64 },
}

impl LocalJobHandle {
    /// Job id assigned by the local device; zero for the socket path.
    pub fn local_job_id(&self) -> i32 {
        match self {
            Self::Drained { .. } => 0,
            Self::IppJob { job_id, .. } => *job_id,
        }
    }

    pub fn bytes(&self) -> u64 {
        match self {
            Self::Drained { bytes } | Self::IppJob { bytes, .. } => *bytes,
        }
    }
}

/// The local output device, dispatching on the URI scheme.
pub enum LocalDevice {
    Socket(socket::SocketDevice),
    Ipp(ipp_device::IppDevice),
}

impl LocalDevice {
    pub fn from_uri(device_uri: &str, user: &str) -> Result<Self> {
        match DeviceScheme::parse(device_uri)? {
            DeviceScheme::Socket => Ok(Self::Socket(socket::SocketDevice::from_uri(device_uri)?)),
            DeviceScheme::Ipp | DeviceScheme::Ipps => {
                Ok(Self::Ipp(ipp_device::IppDevice::from_uri(device_uri, user)?))
            }
        }
    }

    /// Push one document to the device, applying the job ticket where the
    /// device can honor it.
    pub async fn send_job(
        &self,
        remote_job_id: i32,
        ticket: &JobTicket,
        document: DocumentStream,
    ) -> Result<LocalJobHandle> {
        match self {
            Self::Socket(device) => device.send_job(remote_job_id, document).await,
            Self::Ipp(device) => device.send_job(remote_job_id, ticket, document).await,
        }
    }

    /// Current job-state of a submitted job on the local device.
    pub async fn poll_state(&self, handle: &LocalJobHandle) -> RemoteJobState {
        match (self, handle) {
            (_, LocalJobHandle::Drained { .. }) => RemoteJobState::COMPLETED,
            (Self::Ipp(device), LocalJobHandle::IppJob { job_id, .. }) => {
                device.poll_state(*job_id).await
            }
            // A socket device never issues IPP handles.
            (Self::Socket(_), LocalJobHandle::IppJob { .. }) => RemoteJobState::COMPLETED,
        }
    }

    /// Stop a submitted job. Nothing to do for a drained socket stream.
    pub async fn cancel(&self, remote_job_id: i32, handle: &LocalJobHandle) {
        if let (Self::Ipp(device), LocalJobHandle::IppJob { job_id, .. }) = (self, handle) {
            device.cancel(remote_job_id, *job_id).await;
        }
    }
}
