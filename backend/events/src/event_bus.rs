//! Event Bus
//!
//! Publish-subscribe router between hub sessions. Fan-out runs over a snapshot
//! of the subscription list, so subscribing or unsubscribing while an emission
//! is in flight never affects that emission.

use std::sync::Weak;

use anyhow::Result;
use async_trait::async_trait;
use storehub_core::{EmitReport, EventDelivery, EventFilter, HubEvent, SubscriptionId};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifies the session that owns a subscription.
pub type OwnerId = Uuid;

/// Delivery target of a subscription.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, delivery: EventDelivery) -> Result<()>;
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    owner: OwnerId,
    filter: EventFilter,
    // Weak: a subscription never keeps its session alive.
    target: Weak<dyn EventSink>,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription. Identical requests yield independent handles.
    pub async fn subscribe(
        &self,
        owner: OwnerId,
        filter: EventFilter,
        target: Weak<dyn EventSink>,
    ) -> SubscriptionId {
        let id = Uuid::new_v4().to_string();
        debug!(subscription = %id, owner = %owner, event_type = %filter.event_type, "Subscribed");
        self.subscriptions.write().await.push(Subscription {
            id: id.clone(),
            owner,
            filter,
            target,
        });
        id
    }

    /// Cancel one of `owner`'s subscriptions. Returns `false` if it does not exist
    /// or belongs to someone else.
    pub async fn unsubscribe(&self, owner: OwnerId, id: &str) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| !(s.id == id && s.owner == owner));
        let removed = subscriptions.len() != before;
        if removed {
            debug!(subscription = %id, owner = %owner, "Unsubscribed");
        }
        removed
    }

    /// Drop every subscription owned by `owner`. Returns how many were removed.
    pub async fn remove_owner(&self, owner: OwnerId) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.owner != owner);
        before - subscriptions.len()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Deliver `event` to every matching subscription, in registration order.
    ///
    /// A failing or vanished subscriber is counted and skipped; it never stops
    /// delivery to the rest.
    pub async fn emit(&self, event: HubEvent) -> EmitReport {
        let snapshot: Vec<Subscription> = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|s| s.filter.matches(&event))
            .cloned()
            .collect();

        let mut report = EmitReport::default();
        for subscription in snapshot {
            let Some(target) = subscription.target.upgrade() else {
                warn!(subscription = %subscription.id, "Subscriber is gone, skipping delivery");
                report.failed_count += 1;
                continue;
            };
            let delivery = EventDelivery {
                subscription_id: subscription.id.clone(),
                event: event.clone(),
            };
            match target.deliver(delivery).await {
                Ok(()) => report.delivered_count += 1,
                Err(e) => {
                    warn!(subscription = %subscription.id, error = %e, "Event delivery failed");
                    report.failed_count += 1;
                }
            }
        }

        debug!(
            event_type = %event.event_type,
            delivered = report.delivered_count,
            failed = report.failed_count,
            "Event emitted"
        );
        report
    }
}
