use serde::{Deserialize, Serialize};

pub type SubscriptionId = String;

/// Event type filter value that matches every event.
pub const ANY_EVENT_TYPE: &str = "*";

/// A structured event emitted by an app onto the hub's bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubEvent {
    pub event_type: String,
    /// Identifier of the emitting app. Stamped by the hub, never trusted from the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_app: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl HubEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            source_app: None,
            payload,
        }
    }
}

/// Which events a subscription wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_app: Option<String>,
}

impl EventFilter {
    pub fn event_type(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source_app: None,
        }
    }

    pub fn matches(&self, event: &HubEvent) -> bool {
        let type_matches =
            self.event_type == ANY_EVENT_TYPE || self.event_type == event.event_type;
        let source_matches = match &self.source_app {
            Some(app) => event.source_app.as_deref() == Some(app.as_str()),
            None => true,
        };
        type_matches && source_matches
    }
}

/// What a subscriber receives for each matching event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDelivery {
    pub subscription_id: SubscriptionId,
    pub event: HubEvent,
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitReport {
    pub delivered_count: usize,
    pub failed_count: usize,
}
