use async_trait::async_trait;
use canopy_api::v1alpha1::{Application, Instance};
use kube::Client;
use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

pub const INSTANCE_FAILING_REASON: &str = "InstanceFailing";

/// Event notes are capped by the API server.
const MAX_NOTE_LENGTH: usize = 1024;

/// Receives one notification per failing instance per health poll.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, application: &Application, instance: &Instance, message: &str);
}

pub fn alert_note(instance: &Instance, message: &str) -> String {
    format!(
        "Instance {} r{} is failing: {}",
        instance.hash_of_spec, instance.revision, message
    )
    .chars()
    .take(MAX_NOTE_LENGTH)
    .collect()
}

/// Publishes alerts as `Warning` events on the owning application.
pub struct EventAlertSink {
    recorder: Recorder,
}

impl EventAlertSink {
    pub fn new(client: Client, reporter: Reporter) -> Self {
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl AlertSink for EventAlertSink {
    async fn alert(&self, application: &Application, instance: &Instance, message: &str) {
        warn!(
            "Instance {} r{} of {} is failing: {}",
            instance.hash_of_spec, instance.revision, instance.realm_id, message
        );

        let event = Event {
            type_: EventType::Warning,
            reason: INSTANCE_FAILING_REASON.to_string(),
            note: Some(alert_note(instance, message)),
            action: "HealthCheck".to_string(),
            secondary: None,
        };
        if let Err(err) = self
            .recorder
            .publish(&event, &application.object_ref(&()))
            .await
        {
            warn!("Failed to publish {} event: {}", INSTANCE_FAILING_REASON, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> Instance {
        Instance::builder()
            .hash_of_spec("abc123def0")
            .revision(2)
            .realm_id("shop.storefront")
            .namespace("shop")
            .build()
    }

    #[test]
    fn test_alert_note() {
        assert_eq!(
            alert_note(&instance(), "OOMKilled"),
            "Instance abc123def0 r2 is failing: OOMKilled"
        );

        let long = "x".repeat(4096);
        assert_eq!(alert_note(&instance(), &long).len(), MAX_NOTE_LENGTH);
    }
}
