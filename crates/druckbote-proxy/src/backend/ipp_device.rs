// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP submission to the local printer.
//
// Preferred flow is Create-Job followed by Send-Document, which gives us
// a job id before any bytes move; printers that do not implement the
// pair get a single Print-Job instead. The remote job's ticket
// attributes ride along on the submission, and the document is streamed
// straight from the fetch response into the printer.

use ipp::model::{IppVersion, Operation};
use ipp::payload::IppPayload;
use ipp::prelude::*;
use tracing::{debug, info, warn};

use druckbote_core::error::{DruckboteError, Result};

use super::{CountingReader, DocumentStream, JobTicket, LocalJobHandle};
use crate::attrs;
use crate::session;
use druckbote_core::types::RemoteJobState;

/// An `ipp://` or `ipps://` output device.
pub struct IppDevice {
    uri: Uri,
    user: String,
}

impl IppDevice {
    /// Parse the device URI. Encryption is always-on when the scheme is
    /// `ipps` or the port is 443; plain `ipp` URIs negotiate TLS only if
    /// the printer asks for it.
    pub fn from_uri(device_uri: &str, user: &str) -> Result<Self> {
        let effective = if device_uri.starts_with("ipp://") && device_uri.contains(":443") {
            device_uri.replacen("ipp://", "ipps://", 1)
        } else {
            device_uri.to_string()
        };
        let uri: Uri = effective
            .parse()
            .map_err(|_| DruckboteError::InvalidUri(device_uri.to_string()))?;

        Ok(Self {
            uri,
            user: user.to_string(),
        })
    }

    /// Submit one document, honoring the remote job's ticket.
    pub async fn send_job(
        &self,
        remote_job_id: i32,
        ticket: &JobTicket,
        document: DocumentStream,
    ) -> Result<LocalJobHandle> {
        // What can this printer do for us?
        let caps = self.query_capabilities().await?;
        let two_step = caps.create_job && caps.send_document;

        // Forward the document compression only when the printer accepts
        // it; otherwise the inbound stream is decompressed here.
        let format = document.format.clone();
        let compression = document.compression.clone();
        let (reader, forwarded_compression) = match compression {
            Some(ref keyword) if caps.compression.iter().any(|c| c == keyword) => {
                (document.into_reader(), Some(keyword.clone()))
            }
            Some(_) => (document.into_decompressed_reader()?, None),
            None => (document.into_reader(), None),
        };

        let (counting, count) = CountingReader::new(reader);
        let payload = IppPayload::new_async(counting);

        let local_job_id = if two_step {
            let job_id = self.create_job(ticket).await?;
            self.send_document(job_id, &format, forwarded_compression.as_deref(), payload)
                .await?;
            job_id
        } else {
            self.print_job(ticket, &format, forwarded_compression.as_deref(), payload)
                .await?
        };
        let bytes = count.load(std::sync::atomic::Ordering::Relaxed);

        info!(
            job = remote_job_id,
            "local job {local_job_id} created, {bytes} bytes"
        );
        Ok(LocalJobHandle::IppJob {
            job_id: local_job_id,
            bytes,
        })
    }

    /// Current job-state on the local printer. Any failure reads as
    /// completed, which stops the relay's polling.
    pub async fn poll_state(&self, local_job_id: i32) -> RemoteJobState {
        let mut request = self.request(Operation::GetJobAttributes);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("job-id", IppValue::Integer(local_job_id)),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "requested-attributes",
                IppValue::Keyword("job-state".to_string()),
            ),
        );

        match AsyncIppClient::new(self.uri.clone()).send(request).await {
            Ok(response) if !session::status_is_error(session::response_status(&response)) => {
                attrs::find_integer(response.attributes(), "job-state")
                    .map(RemoteJobState)
                    .unwrap_or(RemoteJobState::COMPLETED)
            }
            Ok(_) | Err(_) => RemoteJobState::COMPLETED,
        }
    }

    /// Cancel a local job; failures are logged and swallowed, since the
    /// job is being torn down either way.
    pub async fn cancel(&self, remote_job_id: i32, local_job_id: i32) {
        let mut request = self.request(Operation::CancelJob);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("job-id", IppValue::Integer(local_job_id)),
        );

        match AsyncIppClient::new(self.uri.clone()).send(request).await {
            Ok(response) if session::status_is_error(session::response_status(&response)) => {
                warn!(
                    job = remote_job_id,
                    "unable to cancel local job {local_job_id}: status 0x{:04x}",
                    session::response_status(&response)
                );
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    job = remote_job_id,
                    "unable to cancel local job {local_job_id}: {err}"
                );
            }
        }
    }

    async fn query_capabilities(&self) -> Result<DeviceSubmissionCaps> {
        let mut request = self.request(Operation::GetPrinterAttributes);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "requested-attributes",
                IppValue::Array(vec![
                    IppValue::Keyword("compression-supported".to_string()),
                    IppValue::Keyword("operations-supported".to_string()),
                ]),
            ),
        );

        let response = AsyncIppClient::new(self.uri.clone())
            .send(request)
            .await
            .map_err(|e| DruckboteError::Transport(format!("'{}': {e}", self.uri)))?;

        let Some(operations) = attrs::find_attr(response.attributes(), "operations-supported")
        else {
            return Err(DruckboteError::IppJob {
                status: session::response_status(&response),
                detail: "unable to get list of supported operations from printer".to_string(),
            });
        };

        let caps = DeviceSubmissionCaps::from_operations(
            operations.value(),
            attrs::find_attr(response.attributes(), "compression-supported").map(|a| a.value()),
        );
        debug!(
            create_job = caps.create_job,
            send_document = caps.send_document,
            "local printer submission capabilities"
        );
        Ok(caps)
    }

    async fn create_job(&self, ticket: &JobTicket) -> Result<i32> {
        let mut request = self.request(Operation::CreateJob);
        apply_ticket(&mut request, ticket);

        let response = AsyncIppClient::new(self.uri.clone())
            .send(request)
            .await
            .map_err(|e| DruckboteError::Transport(format!("'{}': {e}", self.uri)))?;
        session::require_success(&response, "Create-Job on local printer")?;

        attrs::find_integer(response.attributes(), "job-id")
            .filter(|id| *id > 0)
            .ok_or_else(|| DruckboteError::IppJob {
                status: session::response_status(&response),
                detail: "unable to create local job: no job-id returned".to_string(),
            })
    }

    async fn send_document(
        &self,
        local_job_id: i32,
        format: &str,
        compression: Option<&str>,
        payload: IppPayload,
    ) -> Result<()> {
        let mut request = self.request(Operation::SendDocument);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("job-id", IppValue::Integer(local_job_id)),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "document-format",
                IppValue::MimeMediaType(format.to_string()),
            ),
        );
        if let Some(compression) = compression {
            request.attributes_mut().add(
                DelimiterTag::OperationAttributes,
                IppAttribute::new("compression", IppValue::Keyword(compression.to_string())),
            );
        }
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("last-document", IppValue::Boolean(true)),
        );
        *request.payload_mut() = payload;

        let response = AsyncIppClient::new(self.uri.clone())
            .send(request)
            .await
            .map_err(|e| DruckboteError::Transport(format!("'{}': {e}", self.uri)))?;
        session::require_success(&response, "Send-Document on local printer")
    }

    async fn print_job(
        &self,
        ticket: &JobTicket,
        format: &str,
        compression: Option<&str>,
        payload: IppPayload,
    ) -> Result<i32> {
        let mut request = self.request(Operation::PrintJob);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "document-format",
                IppValue::MimeMediaType(format.to_string()),
            ),
        );
        if let Some(compression) = compression {
            request.attributes_mut().add(
                DelimiterTag::OperationAttributes,
                IppAttribute::new("compression", IppValue::Keyword(compression.to_string())),
            );
        }
        apply_ticket(&mut request, ticket);
        *request.payload_mut() = payload;

        let response = AsyncIppClient::new(self.uri.clone())
            .send(request)
            .await
            .map_err(|e| DruckboteError::Transport(format!("'{}': {e}", self.uri)))?;
        session::require_success(&response, "Print-Job on local printer")?;

        Ok(attrs::find_integer(response.attributes(), "job-id").unwrap_or(0))
    }

    fn request(&self, operation: Operation) -> IppRequestResponse {
        let mut request =
            IppRequestResponse::new(IppVersion::v1_1(), operation, Some(self.uri.clone()));
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "requesting-user-name",
                IppValue::NameWithoutLanguage(self.user.clone()),
            ),
        );
        request
    }
}

/// Copy the remote job's ticket onto a local submission: operation
/// attributes into the operation group, job-template attributes into the
/// job group.
fn apply_ticket(request: &mut IppRequestResponse, ticket: &JobTicket) {
    for attr in &ticket.operation {
        request
            .attributes_mut()
            .add(DelimiterTag::OperationAttributes, attr.clone());
    }
    for attr in &ticket.job_template {
        request
            .attributes_mut()
            .add(DelimiterTag::JobAttributes, attr.clone());
    }
}

/// What the local printer offers for submission.
struct DeviceSubmissionCaps {
    create_job: bool,
    send_document: bool,
    compression: Vec<String>,
}

impl DeviceSubmissionCaps {
    fn from_operations(operations: &IppValue, compression: Option<&IppValue>) -> Self {
        let supported: Vec<i32> = match operations {
            IppValue::Array(values) => values.iter().filter_map(attrs::value_integer).collect(),
            single => attrs::value_integer(single).into_iter().collect(),
        };

        Self {
            create_job: supported.contains(&(Operation::CreateJob as i32)),
            send_document: supported.contains(&(Operation::SendDocument as i32)),
            compression: compression
                .map(|value| {
                    attrs::value_strings(value)
                        .into_iter()
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_uri_keeps_its_scheme() {
        let device = IppDevice::from_uri("ipp://printer.local:631/ipp/print", "user").unwrap();
        assert_eq!(device.uri.scheme_str(), Some("ipp"));
    }

    #[test]
    fn port_443_upgrades_to_tls() {
        let device = IppDevice::from_uri("ipp://printer.local:443/ipp/print", "user").unwrap();
        assert_eq!(device.uri.scheme_str(), Some("ipps"));

        let device = IppDevice::from_uri("ipps://printer.local/ipp/print", "user").unwrap();
        assert_eq!(device.uri.scheme_str(), Some("ipps"));
    }

    #[test]
    fn submission_caps_need_both_operations_for_two_step() {
        let both = IppValue::Array(vec![
            IppValue::Enum(Operation::PrintJob as i32),
            IppValue::Enum(Operation::CreateJob as i32),
            IppValue::Enum(Operation::SendDocument as i32),
        ]);
        let caps = DeviceSubmissionCaps::from_operations(&both, None);
        assert!(caps.create_job && caps.send_document);

        let print_only = IppValue::Array(vec![IppValue::Enum(Operation::PrintJob as i32)]);
        let caps = DeviceSubmissionCaps::from_operations(&print_only, None);
        assert!(!caps.create_job && !caps.send_document);
    }

    #[test]
    fn compression_keywords_are_collected() {
        let ops = IppValue::Enum(Operation::PrintJob as i32);
        let compression = IppValue::Array(vec![
            IppValue::Keyword("none".to_string()),
            IppValue::Keyword("gzip".to_string()),
        ]);
        let caps = DeviceSubmissionCaps::from_operations(&ops, Some(&compression));
        assert_eq!(caps.compression, vec!["none", "gzip"]);
    }
}
