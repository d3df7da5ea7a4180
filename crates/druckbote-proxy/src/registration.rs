// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output-device registration against the infrastructure printer.
//
// When the remote resource is the system service (`/ipp/system`), the
// proxy first registers the output device there and is handed the real
// printer URI through the printer-xri-supported collection. Capability
// mirroring then sends only the attributes that changed since the last
// mirror, and an ippget event subscription is created for the event
// loop to drain.

use ipp::prelude::*;
use ipp::request::IppRequestResponse;
use tracing::{info, warn};

use druckbote_core::error::{DruckboteError, Result};

use crate::attrs::{self, DeviceAttributes};
use crate::capabilities::PROBE_ATTRIBUTES;
use crate::session::{self, IppSession, op, status};

/// The events the proxy subscribes to.
const NOTIFY_EVENTS: &[&str] = &[
    "document-config-changed",
    "document-state-changed",
    "job-config-changed",
    "job-fetchable",
    "job-state-changed",
    "printer-config-changed",
    "printer-state-changed",
];

/// Registration client. Keeps the last mirrored capability bundle so a
/// re-registration with unchanged capabilities sends an empty diff.
pub struct Registrar {
    cached: DeviceAttributes,
}

impl Registrar {
    pub fn new() -> Self {
        Self {
            cached: DeviceAttributes::new(),
        }
    }

    /// Run the full registration sequence. Returns the session to keep
    /// using (rebound to the service-assigned printer URI when the remote
    /// is a system service) and the event subscription id.
    pub async fn register(
        &mut self,
        session: IppSession,
        bundle: &DeviceAttributes,
    ) -> Result<(IppSession, i32)> {
        let session = if session.resource() == "/ipp/system" {
            self.register_output_device(session).await?
        } else {
            session
        };

        self.mirror_attributes(&session, bundle).await?;
        let subscription_id = self.create_subscription(&session).await?;

        Ok((session, subscription_id))
    }

    /// Register-Output-Device against the system service; the response
    /// names the printer URI this proxy must talk to from now on.
    async fn register_output_device(&self, session: IppSession) -> Result<IppSession> {
        let request = register_request(&session);
        let response = session.send(request).await?;

        if session::response_status(&response) >= status::BAD_REQUEST {
            return Err(DruckboteError::Registration(format!(
                "unable to register the output device: status 0x{:04x}",
                session::response_status(&response)
            )));
        }

        let xri_uri = extract_xri_uri(response.attributes()).ok_or_else(|| {
            DruckboteError::Registration("no print service URI returned for output device".into())
        })?;

        info!("registered printer-uri is '{xri_uri}'");

        let session = session.with_uri(&xri_uri)?;
        session.connect().await?;
        Ok(session)
    }

    /// Update-Output-Device-Attributes with every whitelisted attribute
    /// whose value differs from the previously mirrored one.
    async fn mirror_attributes(
        &mut self,
        session: &IppSession,
        bundle: &DeviceAttributes,
    ) -> Result<()> {
        let request = mirror_request(session, bundle, &self.cached);
        let response = session.send(request).await?;

        if session::response_status(&response) != status::OK {
            return Err(DruckboteError::Registration(format!(
                "unable to update the output device with '{}': status 0x{:04x}",
                session.public_uri(),
                session::response_status(&response)
            )));
        }

        self.cached = bundle.clone();
        Ok(())
    }

    /// Create-Printer-Subscriptions with the ippget pull method; the
    /// server picks the lease duration.
    async fn create_subscription(&self, session: &IppSession) -> Result<i32> {
        let request = subscription_request(session);
        let response = session.send(request).await?;

        if session::response_status(&response) != status::OK {
            return Err(DruckboteError::Registration(format!(
                "unable to monitor events on '{}': status 0x{:04x}",
                session.public_uri(),
                session::response_status(&response)
            )));
        }

        let subscription_id = attrs::find_integer(response.attributes(), "notify-subscription-id")
            .ok_or_else(|| {
                DruckboteError::Registration(format!(
                    "unable to monitor events on '{}': no notify-subscription-id returned",
                    session.public_uri()
                ))
            })?;

        info!("monitoring events with subscription #{subscription_id}");
        Ok(subscription_id)
    }
}

impl Default for Registrar {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel the event subscription and deregister the output device. Both
/// are best-effort; a dead server must not block shutdown.
pub async fn deregister(session: &IppSession, subscription_id: i32) {
    let mut cancel = session.request(op::CANCEL_SUBSCRIPTION);
    cancel.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new("notify-subscription-id", IppValue::Integer(subscription_id)),
    );
    if let Err(err) = session.send(cancel).await {
        warn!("unable to cancel subscription #{subscription_id}: {err}");
    }

    let mut dereg = session.request(op::DEREGISTER_OUTPUT_DEVICE);
    dereg.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new(
            "output-device-uuid",
            IppValue::Uri(session.device_uuid().to_string()),
        ),
    );
    if let Err(err) = session.send(dereg).await {
        warn!("unable to deregister the output device: {err}");
    }
}

fn register_request(session: &IppSession) -> IppRequestResponse {
    let mut request = session.request_without_uri(op::REGISTER_OUTPUT_DEVICE);
    request.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new("system-uri", IppValue::Uri(session.public_uri().to_string())),
    );
    request.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new(
            "output-device-uuid",
            IppValue::Uri(session.device_uuid().to_string()),
        ),
    );
    request.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new(
            "printer-service-type",
            IppValue::Keyword("print".to_string()),
        ),
    );
    request
}

fn mirror_request(
    session: &IppSession,
    bundle: &DeviceAttributes,
    cached: &DeviceAttributes,
) -> IppRequestResponse {
    let mut request = session.request(op::UPDATE_OUTPUT_DEVICE_ATTRIBUTES);
    request.attributes_mut().add(
        DelimiterTag::OperationAttributes,
        IppAttribute::new(
            "output-device-uuid",
            IppValue::Uri(session.device_uuid().to_string()),
        ),
    );

    for (name, value) in bundle.changed_since(cached) {
        if PROBE_ATTRIBUTES.contains(&name) {
            request.attributes_mut().add(
                DelimiterTag::PrinterAttributes,
                IppAttribute::new(name, value.clone()),
            );
        }
    }

    request
}

fn subscription_request(session: &IppSession) -> IppRequestResponse {
    let mut request = session.request(op::CREATE_PRINTER_SUBSCRIPTIONS);
    request.attributes_mut().add(
        DelimiterTag::SubscriptionAttributes,
        IppAttribute::new(
            "notify-pull-method",
            IppValue::Keyword("ippget".to_string()),
        ),
    );
    request.attributes_mut().add(
        DelimiterTag::SubscriptionAttributes,
        IppAttribute::new(
            "notify-events",
            IppValue::Array(
                NOTIFY_EVENTS
                    .iter()
                    .map(|event| IppValue::Keyword((*event).to_string()))
                    .collect(),
            ),
        ),
    );
    request.attributes_mut().add(
        DelimiterTag::SubscriptionAttributes,
        IppAttribute::new("notify-lease-duration", IppValue::Integer(0)),
    );
    request
}

/// Pull `printer-xri-supported[0].xri-uri` out of a registration response.
fn extract_xri_uri(response: &IppAttributes) -> Option<String> {
    let attr = attrs::find_attr(response, "printer-xri-supported")?;
    let members = attrs::first_collection(attr.value())?;
    let uri = attrs::collection_member(members, "xri-uri")?;
    attrs::value_strings(uri).first().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipp::model::{IppVersion, StatusCode};

    fn session() -> IppSession {
        IppSession::new(
            "ipp://service.example.com/ipp/system",
            "proxyuser",
            None,
            "urn:uuid:11111111-2222-3333-8444-555555555555",
            0,
        )
        .unwrap()
    }

    #[test]
    fn register_request_addresses_the_system_service() {
        let request = register_request(&session());
        let attrs = request.attributes();
        assert_eq!(request.header().operation_or_status, op::REGISTER_OUTPUT_DEVICE);
        assert!(attrs::find_attr(attrs, "system-uri").is_some());
        assert!(attrs::find_attr(attrs, "printer-uri").is_none());
        assert_eq!(
            attrs::find_string(attrs, "printer-service-type"),
            Some("print")
        );
    }

    #[test]
    fn first_mirror_sends_all_whitelisted_attributes() {
        let bundle = crate::capabilities::socket_device_attributes();
        let request = mirror_request(&session(), &bundle, &DeviceAttributes::new());

        let printer_group_len: usize = request
            .attributes()
            .groups_of(DelimiterTag::PrinterAttributes)
            .map(|group| group.attributes().len())
            .sum();
        assert_eq!(printer_group_len, bundle.len());
    }

    #[test]
    fn second_mirror_with_same_bundle_is_empty() {
        let bundle = crate::capabilities::socket_device_attributes();
        let request = mirror_request(&session(), &bundle, &bundle.clone());

        // Non-scalar values (collections, resolutions) always re-send;
        // scalar capabilities must not. The state keywords and margins
        // are scalar, so they disappear from the diff.
        let names: Vec<String> = request
            .attributes()
            .groups_of(DelimiterTag::PrinterAttributes)
            .flat_map(|group| group.attributes().keys().cloned())
            .collect();
        assert!(!names.contains(&"printer-state".to_string()));
        assert!(!names.contains(&"media-bottom-margin-supported".to_string()));
        assert!(!names.contains(&"sides-supported".to_string()));
    }

    #[test]
    fn subscription_request_lists_the_event_mask() {
        let request = subscription_request(&session());
        let attrs = request.attributes();
        assert_eq!(
            request.header().operation_or_status,
            op::CREATE_PRINTER_SUBSCRIPTIONS
        );
        assert_eq!(attrs::find_string(attrs, "notify-pull-method"), Some("ippget"));
        assert_eq!(attrs::find_integer(attrs, "notify-lease-duration"), Some(0));

        let events = attrs::find_attr(attrs, "notify-events").unwrap();
        let listed = attrs::value_strings(events.value());
        assert_eq!(listed.len(), NOTIFY_EVENTS.len());
        assert!(listed.contains(&"job-fetchable"));
        assert!(listed.contains(&"job-state-changed"));
    }

    #[test]
    fn xri_uri_extraction() {
        let mut response =
            IppRequestResponse::new_response(IppVersion::v2_0(), StatusCode::SuccessfulOk, 1);
        response.attributes_mut().add(
            DelimiterTag::PrinterAttributes,
            IppAttribute::new(
                "printer-xri-supported",
                attrs::collection(vec![
                    (
                        "xri-uri",
                        IppValue::Uri("ipps://host/ipp/print/9".to_string()),
                    ),
                    ("xri-security", IppValue::Keyword("tls".to_string())),
                ]),
            ),
        );

        assert_eq!(
            extract_xri_uri(response.attributes()),
            Some("ipps://host/ipp/print/9".to_string())
        );
    }

    #[test]
    fn missing_xri_collection_is_a_registration_failure() {
        let response =
            IppRequestResponse::new_response(IppVersion::v2_0(), StatusCode::SuccessfulOk, 1);
        assert_eq!(extract_xri_uri(response.attributes()), None);
    }
}
