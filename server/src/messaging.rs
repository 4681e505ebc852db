//! Admin Messaging
//!
//! Delivery of operation results to the requesting admin and of audit
//! notices to every admin. Delivery is best effort: failures are logged and
//! never surface to the operation that produced the message.

use fred::interfaces::PubsubInterface;
use fred::prelude::*;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{info, warn};

/// Redis channel names.
pub mod channels {
    /// Messages addressed to one admin.
    pub fn notify(recipient: &str) -> String {
        format!("admin:notify:{recipient}")
    }

    /// Notices for every admin.
    pub const BROADCAST: &str = "admin:broadcast";
}

/// Outbound admin messages.
pub trait Messenger: Send + Sync {
    /// Send `message` to one admin.
    fn notify<'a>(&'a self, recipient: &'a str, message: &'a str) -> BoxFuture<'a, ()>;

    /// Send `message` to every admin.
    fn broadcast_admin<'a>(&'a self, message: &'a str) -> BoxFuture<'a, ()>;
}

#[derive(Debug, Serialize)]
struct AdminMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient: Option<&'a str>,
    message: &'a str,
}

/// Publishes admin messages over Redis pub/sub.
#[derive(Clone)]
pub struct RedisMessenger {
    redis: Client,
}

impl RedisMessenger {
    #[must_use]
    pub const fn new(redis: Client) -> Self {
        Self { redis }
    }

    async fn publish(&self, channel: String, message: AdminMessage<'_>) {
        let payload = match serde_json::to_string(&message) {
            Ok(p) => p,
            Err(e) => {
                warn!(channel = %channel, error = %e, "Failed to serialize admin message");
                return;
            }
        };

        if let Err(e) = self.redis.publish::<(), _, _>(&channel, &payload).await {
            warn!(channel = %channel, error = %e, "Failed to publish admin message");
        }
    }
}

impl Messenger for RedisMessenger {
    fn notify<'a>(&'a self, recipient: &'a str, message: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(self.publish(
            channels::notify(recipient),
            AdminMessage {
                recipient: Some(recipient),
                message,
            },
        ))
    }

    fn broadcast_admin<'a>(&'a self, message: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(self.publish(
            channels::BROADCAST.to_string(),
            AdminMessage {
                recipient: None,
                message,
            },
        ))
    }
}

/// Writes admin messages to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMessenger;

impl Messenger for LogMessenger {
    fn notify<'a>(&'a self, recipient: &'a str, message: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            info!(recipient = %recipient, message = %message, "Admin notification");
        })
    }

    fn broadcast_admin<'a>(&'a self, message: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            info!(message = %message, "Admin broadcast");
        })
    }
}
