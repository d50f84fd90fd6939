//! Notification subscriptions.
//!
//! Handlers subscribe to a topic, or to every topic with `*`. A delivered
//! notification runs each matching handler in registration order; nothing is
//! ever sent back to the host.

use serde_json::Value;

use crate::error::EngineError;
use crate::plugin::Handler;

/// Topic that matches every notification.
pub const WILDCARD_TOPIC: &str = "*";

/// Frozen table of notification subscriptions.
pub(crate) struct NotificationRouter<S> {
    subscriptions: Vec<(String, Handler<S>)>,
}

impl<S> NotificationRouter<S> {
    pub(crate) fn new(subscriptions: Vec<(String, Handler<S>)>) -> Result<Self, EngineError> {
        if subscriptions.iter().any(|(topic, _)| topic.trim().is_empty()) {
            return Err(EngineError::configuration(
                "notification topics must not be blank",
            ));
        }
        Ok(Self { subscriptions })
    }

    /// Returns the handlers for `topic` in registration order.
    pub(crate) fn handlers_for(&self, topic: &str) -> Vec<Handler<S>> {
        self.subscriptions
            .iter()
            .filter(|(subscribed, _)| subscribed == topic || subscribed == WILDCARD_TOPIC)
            .map(|(_, handler)| *handler)
            .collect()
    }

    /// Returns the distinct subscribed topics for the manifest.
    pub(crate) fn topics(&self) -> Vec<Value> {
        let mut topics: Vec<&str> = Vec::new();
        for (topic, _) in &self.subscriptions {
            if !topics.contains(&topic.as_str()) {
                topics.push(topic);
            }
        }
        topics.into_iter().map(Value::from).collect()
    }
}
