//! Events about calls, attached to the unit they ran against.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource,
};
use tracing::warn;
use unitops_kube::crd::Unit;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

impl From<Severity> for EventType {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Normal => EventType::Normal,
            Severity::Warning => EventType::Warning,
        }
    }
}

/// Fire and forget, implementations log their failures instead of returning them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        namespace: &str,
        target: &str,
        severity: Severity,
        reason: &str,
        message: &str,
    );
}

/// Publishes Kubernetes events on the [`Unit`].
pub struct EventNotifier {
    recorder: Recorder,
}

impl EventNotifier {
    pub fn new(client: Client, reporter: impl Into<Reporter>) -> Self {
        Self {
            recorder: Recorder::new(client, reporter.into()),
        }
    }
}

fn unit_reference(namespace: &str, name: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some(Unit::api_version(&()).into_owned()),
        kind: Some(Unit::kind(&()).into_owned()),
        name: Some(name.to_owned()),
        namespace: Some(namespace.to_owned()),
        ..Default::default()
    }
}

#[async_trait]
impl Notifier for EventNotifier {
    async fn notify(
        &self,
        namespace: &str,
        target: &str,
        severity: Severity,
        reason: &str,
        message: &str,
    ) {
        let event = Event {
            type_: severity.into(),
            reason: reason.to_owned(),
            note: Some(message.to_owned()),
            action: "Dispatch".to_owned(),
            secondary: None,
        };

        if let Err(error) = self
            .recorder
            .publish(&event, &unit_reference(namespace, target))
            .await
        {
            warn!(%error, namespace, unit = target, reason, "failed to publish event");
        }
    }
}
