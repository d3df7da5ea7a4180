// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event polling and job discovery.
//
// The proxy drains its ippget subscription with Get-Notifications, using
// a sequence-number cursor so no event is seen twice. job-fetchable and
// job-state-changed events become registry updates and relay wake-ups;
// an identify-printer request is acknowledged and surfaced to the
// operator. Jobs that became fetchable before the subscription existed
// are found by a one-time Get-Jobs bootstrap scan.

use std::sync::Arc;
use std::time::Duration;

use ipp::prelude::*;
use ipp::request::IppRequestResponse;
use tracing::{debug, info, warn};

use druckbote_core::error::{DruckboteError, Result};
use druckbote_core::types::RemoteJobState;

use crate::attrs;
use crate::registry::JobRegistry;
use crate::session::{IppSession, op};

/// One parsed event-notification group.
#[derive(Debug)]
struct Notification {
    event: Option<String>,
    job_id: Option<i32>,
    job_state: RemoteJobState,
    identify_requested: bool,
}

impl Notification {
    fn new() -> Self {
        Self {
            event: None,
            job_id: None,
            job_state: RemoteJobState::PENDING,
            identify_requested: false,
        }
    }
}

/// The subscription polling loop.
pub struct EventLoop {
    session: IppSession,
    registry: Arc<JobRegistry>,
    subscription_id: i32,
    sequence_number: i32,
}

impl EventLoop {
    pub fn new(session: IppSession, registry: Arc<JobRegistry>, subscription_id: i32) -> Self {
        Self {
            session,
            registry,
            subscription_id,
            sequence_number: 1,
        }
    }

    /// Seed the registry with jobs that were already fetchable before the
    /// subscription was created.
    pub async fn bootstrap(&self) -> Result<()> {
        info!("getting fetchable jobs");

        let mut request = self.session.request(op::GET_JOBS);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("which-jobs", IppValue::Keyword("fetchable".to_string())),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "output-device-uuid",
                IppValue::Uri(self.session.device_uuid().to_string()),
            ),
        );

        let response = self
            .session
            .send(request)
            .await
            .map_err(|err| DruckboteError::Registration(format!("Get-Jobs failed: {err}")))?;

        for group in response.attributes().groups_of(DelimiterTag::JobAttributes) {
            let group_attrs = group.attributes();
            let job_id = group_attrs
                .get("job-id")
                .and_then(|attr| attrs::value_integer(attr.value()));
            let job_state = group_attrs
                .get("job-state")
                .and_then(|attr| attrs::value_integer(attr.value()))
                .map(RemoteJobState)
                .unwrap_or(RemoteJobState::PENDING);

            if let Some(job_id) = job_id
                && (job_state == RemoteJobState::PENDING
                    || job_state == RemoteJobState::PROCESSING_STOPPED)
                && self.registry.insert_if_absent(job_id, job_state)
            {
                info!(job = job_id, "job is now fetchable, queuing up");
            }
        }

        Ok(())
    }

    /// Poll the subscription until shutdown is requested.
    pub async fn run(&mut self) -> Result<()> {
        while !self.registry.is_done() {
            let interval = match self.session.send(self.notifications_request()).await {
                Ok(response) => {
                    let interval = poll_interval(attrs::find_integer(
                        response.attributes(),
                        "notify-get-interval",
                    ));
                    self.dispatch(response.attributes()).await;
                    interval
                }
                Err(err) => {
                    warn!("event poll failed: {err}");
                    poll_interval(None)
                }
            };

            debug!(interval, "pausing before the next event poll");
            self.sleep_shutdown_aware(interval).await;
        }

        Ok(())
    }

    fn notifications_request(&self) -> IppRequestResponse {
        let mut request = self.session.request(op::GET_NOTIFICATIONS);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "notify-subscription-ids",
                IppValue::Integer(self.subscription_id),
            ),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "notify-sequence-numbers",
                IppValue::Integer(self.sequence_number),
            ),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("notify-wait", IppValue::Boolean(false)),
        );
        request
    }

    /// Translate the notification groups of one poll into registry
    /// updates, advancing the sequence cursor past everything seen.
    async fn dispatch(&mut self, response: &IppAttributes) {
        let (notifications, highest_sequence) = parse_notifications(response);

        if let Some(highest) = highest_sequence
            && highest >= self.sequence_number
        {
            self.sequence_number = highest + 1;
        }

        for notification in notifications {
            if notification.identify_requested {
                self.acknowledge_identify_printer().await;
            }

            let (Some(event), Some(job_id)) = (&notification.event, notification.job_id) else {
                continue;
            };

            match event.as_str() {
                "job-fetchable" => {
                    if self.registry.insert_if_absent(job_id, notification.job_state) {
                        info!(job = job_id, "job is now fetchable, queuing up");
                    }
                }
                "job-state-changed" => {
                    if self
                        .registry
                        .update_remote_state(job_id, notification.job_state)
                    {
                        info!(
                            job = job_id,
                            "updated remote job-state to '{}'", notification.job_state
                        );
                    }
                }
                _ => {}
            }
        }
    }

    /// Answer an identify-printer-requested state reason and perform the
    /// requested actions.
    async fn acknowledge_identify_printer(&self) {
        let mut request = self.session.request(op::ACKNOWLEDGE_IDENTIFY_PRINTER);
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                "device-uuid",
                IppValue::Uri(self.session.device_uuid().to_string()),
            ),
        );

        let response = match self.session.send(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!("unable to acknowledge identify request: {err}");
                return;
            }
        };

        let actions = attrs::find_attr(response.attributes(), "identify-actions")
            .map(|attr| attrs::value_strings(attr.value()));
        let message = attrs::find_string(response.attributes(), "message");

        let (display, sound) = identify_outputs(actions.as_deref());
        if display {
            println!(
                "IDENTIFY-PRINTER: display ({})",
                message.unwrap_or("No message supplied")
            );
        }
        if sound {
            println!("IDENTIFY-PRINTER: sound\x07");
        }
    }

    async fn sleep_shutdown_aware(&self, seconds: u64) {
        for _ in 0..seconds {
            if self.registry.is_done() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Clamp the server-advised poll interval to 0..=30 seconds, defaulting
/// to 10 when the server stays silent.
pub fn poll_interval(advertised: Option<i32>) -> u64 {
    let seconds = advertised.unwrap_or(10);
    if (0..=30).contains(&seconds) {
        seconds as u64
    } else {
        30
    }
}

/// Which identify actions to perform: no actions at all means sound.
fn identify_outputs(actions: Option<&[&str]>) -> (bool, bool) {
    match actions {
        None => (false, true),
        Some(actions) => (
            actions.contains(&"display"),
            actions.contains(&"sound"),
        ),
    }
}

/// Scan a Get-Notifications response for the attributes the proxy acts
/// on, and report the highest sequence number seen.
fn parse_notifications(response: &IppAttributes) -> (Vec<Notification>, Option<i32>) {
    let mut notifications = Vec::new();
    let mut highest_sequence = None;

    for group in response.groups_of(DelimiterTag::EventNotificationAttributes) {
        let group_attrs = group.attributes();
        let mut notification = Notification::new();

        if let Some(attr) = group_attrs.get("notify-subscribed-event") {
            notification.event = attrs::value_strings(attr.value())
                .first()
                .map(|s| s.to_string());
        }
        notification.job_id = group_attrs
            .get("notify-job-id")
            .or_else(|| group_attrs.get("job-id"))
            .and_then(|attr| attrs::value_integer(attr.value()));
        if let Some(state) = group_attrs
            .get("job-state")
            .and_then(|attr| attrs::value_integer(attr.value()))
            .filter(|state| *state > 0)
        {
            notification.job_state = RemoteJobState(state);
        }
        if let Some(attr) = group_attrs.get("printer-state-reasons") {
            notification.identify_requested =
                attrs::value_contains_string(attr.value(), "identify-printer-requested");
        }
        if let Some(sequence) = group_attrs
            .get("notify-sequence-number")
            .and_then(|attr| attrs::value_integer(attr.value()))
        {
            highest_sequence = Some(highest_sequence.map_or(sequence, |h: i32| h.max(sequence)));
        }

        notifications.push(notification);
    }

    (notifications, highest_sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipp::model::{IppVersion, StatusCode};

    fn event_response(group: Vec<IppAttribute>) -> IppRequestResponse {
        let mut response =
            IppRequestResponse::new_response(IppVersion::v2_0(), StatusCode::SuccessfulOk, 1);
        for attr in group {
            response
                .attributes_mut()
                .add(DelimiterTag::EventNotificationAttributes, attr);
        }
        response
    }

    #[test]
    fn poll_interval_clamps_to_protocol_bounds() {
        assert_eq!(poll_interval(Some(-1)), 30);
        assert_eq!(poll_interval(Some(0)), 0);
        assert_eq!(poll_interval(Some(7)), 7);
        assert_eq!(poll_interval(Some(30)), 30);
        assert_eq!(poll_interval(Some(99)), 30);
        assert_eq!(poll_interval(None), 10);
    }

    #[test]
    fn identify_without_actions_sounds_once() {
        assert_eq!(identify_outputs(None), (false, true));
    }

    #[test]
    fn identify_actions_are_honored() {
        assert_eq!(identify_outputs(Some(&["display"])), (true, false));
        assert_eq!(identify_outputs(Some(&["sound"])), (false, true));
        assert_eq!(
            identify_outputs(Some(&["display", "sound"])),
            (true, true)
        );
    }

    #[test]
    fn fetchable_event_parses_into_a_notification() {
        let response = event_response(vec![
            IppAttribute::new(
                "notify-subscribed-event",
                IppValue::Keyword("job-fetchable".to_string()),
            ),
            IppAttribute::new("notify-job-id", IppValue::Integer(42)),
            IppAttribute::new("job-state", IppValue::Enum(3)),
            IppAttribute::new("notify-sequence-number", IppValue::Integer(17)),
        ]);

        let (notifications, highest) = parse_notifications(response.attributes());
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].event.as_deref(), Some("job-fetchable"));
        assert_eq!(notifications[0].job_id, Some(42));
        assert_eq!(notifications[0].job_state, RemoteJobState::PENDING);
        assert!(!notifications[0].identify_requested);
        assert_eq!(highest, Some(17));
    }

    #[test]
    fn identify_request_is_detected_in_state_reasons() {
        let response = event_response(vec![
            IppAttribute::new(
                "notify-subscribed-event",
                IppValue::Keyword("printer-state-changed".to_string()),
            ),
            IppAttribute::new(
                "printer-state-reasons",
                IppValue::Array(vec![
                    IppValue::Keyword("none".to_string()),
                    IppValue::Keyword("identify-printer-requested".to_string()),
                ]),
            ),
        ]);

        let (notifications, _) = parse_notifications(response.attributes());
        assert!(notifications[0].identify_requested);
    }

    #[tokio::test]
    async fn dispatch_inserts_and_updates_registry_records() {
        let registry = Arc::new(JobRegistry::new());
        let session = IppSession::new(
            "ipp://service.example.com/ipp/print",
            "proxyuser",
            None,
            "urn:uuid:00000000-0000-3000-8000-000000000000",
            0,
        )
        .unwrap();
        let mut event_loop = EventLoop::new(session, registry.clone(), 5);

        let fetchable = event_response(vec![
            IppAttribute::new(
                "notify-subscribed-event",
                IppValue::Keyword("job-fetchable".to_string()),
            ),
            IppAttribute::new("notify-job-id", IppValue::Integer(42)),
            IppAttribute::new("notify-sequence-number", IppValue::Integer(3)),
        ]);
        event_loop.dispatch(fetchable.attributes()).await;
        assert_eq!(registry.remote_state(42), Some(RemoteJobState::PENDING));
        assert_eq!(event_loop.sequence_number, 4);

        let canceled = event_response(vec![
            IppAttribute::new(
                "notify-subscribed-event",
                IppValue::Keyword("job-state-changed".to_string()),
            ),
            IppAttribute::new("notify-job-id", IppValue::Integer(42)),
            IppAttribute::new("job-state", IppValue::Enum(7)),
            IppAttribute::new("notify-sequence-number", IppValue::Integer(4)),
        ]);
        event_loop.dispatch(canceled.attributes()).await;
        assert_eq!(registry.remote_state(42), Some(RemoteJobState::CANCELED));
        assert_eq!(event_loop.sequence_number, 5);

        // A state change for a job never seen here is ignored.
        let unknown = event_response(vec![
            IppAttribute::new(
                "notify-subscribed-event",
                IppValue::Keyword("job-state-changed".to_string()),
            ),
            IppAttribute::new("notify-job-id", IppValue::Integer(77)),
            IppAttribute::new("job-state", IppValue::Enum(7)),
        ]);
        event_loop.dispatch(unknown.attributes()).await;
        assert_eq!(registry.len(), 1);
    }
}
