// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The relay worker: drains the registry's pending jobs one at a time.
//
// For each claimed job it fetches the ticket, acknowledges the job,
// pulls every document, pushes the bytes to the local device, and
// mirrors job and document state back to the infrastructure printer. A
// failing job is aborted and reported; it never takes the proxy down.

use std::sync::Arc;
use std::time::Duration;

use ipp::prelude::*;
use ipp::request::IppRequestResponse;
use tracing::{debug, info, warn};

use druckbote_core::error::{DruckboteError, Result};
use druckbote_core::types::{LocalJobState, RemoteJobState};

use crate::attrs::{self, DeviceAttributes};
use crate::backend::{DocumentStream, JobTicket, LocalDevice, LocalJobHandle};
use crate::registry::JobRegistry;
use crate::session::{self, IppSession, op};

/// IPP document-state enum values reported as
/// `output-device-document-state`.
const DOC_STATE_PROCESSING: i32 = 5;
const DOC_STATE_COMPLETED: i32 = 9;

/// Pause between retries once the proxy is in its steady state.
const RETRY_SECS: u64 = 15;

/// Idle timeout for the condition wait between registry scans.
const WAIT_SECS: u64 = 15;

/// Output formats tried when the operator did not pin one, in order.
const FORMAT_PRIORITY: &[&str] = &[
    "image/urf",
    "image/pwg-raster",
    "application/vnd.hp-pcl",
];

/// The single worker that relays fetchable jobs to the local device.
pub struct RelayWorker {
    session: IppSession,
    registry: Arc<JobRegistry>,
    device: LocalDevice,
    device_attrs: Arc<DeviceAttributes>,
    output_format: Option<String>,
}

impl RelayWorker {
    pub fn new(
        session: IppSession,
        registry: Arc<JobRegistry>,
        device: LocalDevice,
        device_attrs: Arc<DeviceAttributes>,
        output_format: Option<String>,
    ) -> Self {
        Self {
            session,
            registry,
            device,
            device_attrs,
            output_format,
        }
    }

    /// Work loop: claim the next eligible job, otherwise purge finished
    /// records and wait for a wake-up.
    pub async fn run(self) {
        debug!("job processing worker started");

        while !self.registry.is_done() {
            match self.registry.claim_next_pending() {
                Some(job) => self.run_job(job.remote_job_id).await,
                None => {
                    self.registry.remove_if_terminal();
                    self.registry
                        .wait_for_work(Duration::from_secs(WAIT_SECS))
                        .await;
                }
            }
        }

        debug!("job processing worker stopped");
    }

    /// Drive one job through its state machine and report the outcome.
    async fn run_job(&self, job_id: i32) {
        match self.relay_job(job_id).await {
            Ok(()) => {
                self.registry
                    .set_local_state(job_id, LocalJobState::Completed);
                self.update_job_status(job_id).await;
            }
            Err(DruckboteError::JobNotFetchable) => {
                info!(job = job_id, "job already fetched by another printer");
                self.registry
                    .set_local_state(job_id, LocalJobState::Completed);
            }
            Err(DruckboteError::ShutdownRequested) => {}
            Err(err) => {
                warn!(job = job_id, "{err}");
                self.registry.set_local_state(job_id, LocalJobState::Aborted);
                self.update_job_status(job_id).await;
            }
        }
    }

    async fn relay_job(&self, job_id: i32) -> Result<()> {
        let job_response = self.fetch_job(job_id).await?;
        self.acknowledge_job(job_id).await?;

        let num_docs = attrs::find_integer(job_response.attributes(), "number-of-documents")
            .unwrap_or(1)
            .max(1);
        info!(job = job_id, "fetched job with {num_docs} documents");

        self.registry
            .set_local_state(job_id, LocalJobState::Processing);
        self.update_job_status(job_id).await;

        let ticket = JobTicket::from_job_attributes(job_response.attributes());
        let format_accepted =
            select_format(self.output_format.as_deref(), &self.device_attrs);

        for doc_number in 1..=num_docs {
            if self.registry.is_done() {
                return Err(DruckboteError::ShutdownRequested);
            }
            if self.remote_state(job_id).is_terminal() {
                break;
            }

            self.update_document_status(job_id, doc_number, DOC_STATE_PROCESSING)
                .await;

            let response = self
                .fetch_document(job_id, doc_number, format_accepted.as_deref())
                .await?;

            let submitted = if self.remote_state(job_id).is_terminal() {
                None
            } else {
                let document = DocumentStream::from_response(response);
                match self.device.send_job(job_id, &ticket, document).await {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        // The document was received even though printing
                        // failed; acknowledge it before aborting.
                        self.acknowledge_document(job_id, doc_number).await;
                        return Err(err);
                    }
                }
            };

            if let Some(handle) = submitted {
                self.registry.set_local_job_id(job_id, handle.local_job_id());
                if matches!(handle, LocalJobHandle::IppJob { .. }) {
                    self.monitor_local_job(job_id, &handle).await;
                }
                let local = self
                    .registry
                    .get(job_id)
                    .map(|job| job.local_job_state)
                    .unwrap_or(LocalJobState::Processing);
                if !matches!(local, LocalJobState::Canceled | LocalJobState::Aborted) {
                    self.update_document_status(job_id, doc_number, DOC_STATE_COMPLETED)
                        .await;
                }
            }

            self.acknowledge_document(job_id, doc_number).await;
        }

        Ok(())
    }

    /// Fetch-Job against the remote printer, retrying transport failures
    /// every 15 seconds until shutdown.
    async fn fetch_job(&self, job_id: i32) -> Result<IppRequestResponse> {
        let mut first_time = true;
        loop {
            if self.registry.is_done() {
                return Err(DruckboteError::ShutdownRequested);
            }

            let request = self.session.request_for_job(op::FETCH_JOB, job_id);
            match self.session.send(request).await {
                Ok(response) => {
                    session::check_job_response(&response, "unable to fetch job")?;
                    return Ok(response);
                }
                Err(DruckboteError::Transport(detail)) => {
                    if first_time {
                        info!(
                            "'{}' is not responding, retrying in {RETRY_SECS} seconds: {detail}",
                            self.session.public_uri()
                        );
                        first_time = false;
                    }
                    self.sleep_retry().await?;
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn acknowledge_job(&self, job_id: i32) -> Result<()> {
        let request = self.session.request_for_job(op::ACKNOWLEDGE_JOB, job_id);
        let response = self.session.send(request).await?;
        session::require_success(&response, "unable to acknowledge job")
    }

    async fn fetch_document(
        &self,
        job_id: i32,
        doc_number: i32,
        format_accepted: Option<&str>,
    ) -> Result<IppRequestResponse> {
        let mut request = self.session.request_for_job(op::FETCH_DOCUMENT, job_id);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("document-number", IppValue::Integer(doc_number)),
        );
        if let Some(format) = format_accepted {
            request.attributes_mut().add(
                DelimiterTag::OperationAttributes,
                IppAttribute::new(
                    "document-format-accepted",
                    IppValue::MimeMediaType(format.to_string()),
                ),
            );
        }

        let response = self.session.send(request).await?;
        session::require_success(&response, &format!("unable to fetch document #{doc_number}"))?;
        Ok(response)
    }

    async fn acknowledge_document(&self, job_id: i32, doc_number: i32) {
        let mut request = self.session.request_for_job(op::ACKNOWLEDGE_DOCUMENT, job_id);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("document-number", IppValue::Integer(doc_number)),
        );
        if let Err(err) = self.session.send(request).await {
            warn!(job = job_id, "unable to acknowledge document #{doc_number}: {err}");
        }
    }

    /// Poll the local printer until either side reaches a terminal
    /// state; a remote cancel is propagated to the local job.
    async fn monitor_local_job(&self, job_id: i32, handle: &LocalJobHandle) {
        loop {
            if self.remote_state(job_id) >= RemoteJobState::CANCELED {
                break;
            }
            if self.device.poll_state(handle).await >= RemoteJobState::CANCELED {
                return;
            }
            if self.registry.is_done() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        if self.remote_state(job_id) == RemoteJobState::CANCELED {
            info!(job = job_id, "canceling job locally");
            self.device.cancel(job_id, handle).await;
            self.registry.set_local_state(job_id, LocalJobState::Canceled);
        }
    }

    /// Update-Job-Status with the job's current local state. Best-effort:
    /// a failed update is logged, never escalated.
    async fn update_job_status(&self, job_id: i32) {
        let state = self
            .registry
            .get(job_id)
            .map(|job| job.local_job_state)
            .unwrap_or(LocalJobState::Aborted);

        let mut request = self.session.request_for_job(op::UPDATE_JOB_STATUS, job_id);
        request.attributes_mut().add(
            DelimiterTag::JobAttributes,
            IppAttribute::new("output-device-job-state", IppValue::Enum(state.ipp_enum())),
        );

        match self.session.send(request).await {
            Ok(response) if session::status_is_error(session::response_status(&response)) => {
                warn!(
                    job = job_id,
                    "unable to update the job state: status 0x{:04x}",
                    session::response_status(&response)
                );
            }
            Ok(_) => {}
            Err(err) => warn!(job = job_id, "unable to update the job state: {err}"),
        }
    }

    async fn update_document_status(&self, job_id: i32, doc_number: i32, doc_state: i32) {
        let mut request = self
            .session
            .request_for_job(op::UPDATE_DOCUMENT_STATUS, job_id);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("document-number", IppValue::Integer(doc_number)),
        );
        request.attributes_mut().add(
            DelimiterTag::DocumentAttributes,
            IppAttribute::new("output-device-document-state", IppValue::Enum(doc_state)),
        );

        match self.session.send(request).await {
            Ok(response) if session::status_is_error(session::response_status(&response)) => {
                warn!(
                    job = job_id,
                    "unable to update the state for document #{doc_number}: status 0x{:04x}",
                    session::response_status(&response)
                );
            }
            Ok(_) => {}
            Err(err) => warn!(
                job = job_id,
                "unable to update the state for document #{doc_number}: {err}"
            ),
        }
    }

    fn remote_state(&self, job_id: i32) -> RemoteJobState {
        self.registry
            .remote_state(job_id)
            .unwrap_or(RemoteJobState::PENDING)
    }

    /// Steady-state retry pause, observed one second at a time so a
    /// shutdown request is honored promptly.
    async fn sleep_retry(&self) -> Result<()> {
        for _ in 0..RETRY_SECS {
            if self.registry.is_done() {
                return Err(DruckboteError::ShutdownRequested);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(())
    }
}

/// Choose the `document-format-accepted` for Fetch-Document.
///
/// A pinned format always wins. Otherwise, a device that prints PDF gets
/// no preference at all, letting the service choose; failing that the
/// raster and PCL formats are tried in priority order.
pub fn select_format(pinned: Option<&str>, device: &DeviceAttributes) -> Option<String> {
    if let Some(format) = pinned {
        return Some(format.to_string());
    }
    if device.supports_format("application/pdf") {
        return None;
    }
    FORMAT_PRIORITY
        .iter()
        .find(|format| device.supports_format(format))
        .map(|format| (*format).to_string())
}
