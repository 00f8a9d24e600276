//! In-process publish/subscribe channel.
//!
//! Delivery is synchronous: `publish` calls every handler subscribed to the
//! event's topic, in subscription order, before it returns. A handler that
//! fails or panics is logged and skipped; the remaining handlers still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Subscriber callback.
pub type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

/// Event kinds a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// The session ended and all session-scoped state must be dropped.
    SessionCleared,
    /// The backend refused a request because no shop is selected.
    ContextRequired,
}

impl Topic {
    /// Wire-style name, used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionCleared => "session-cleared",
            Self::ContextRequired => "context-required",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    /// The user asked to log out.
    Logout,
    /// The backend rejected the session's credentials.
    AuthFailure,
}

/// A published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    SessionCleared { reason: ClearReason },
    ContextRequired { message: String },
}

impl Event {
    /// Topic this event is delivered on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::SessionCleared { .. } => Topic::SessionCleared,
            Self::ContextRequired { .. } => Topic::ContextRequired,
        }
    }
}

/// Handle returned by [`EventChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Subscription {
    token: SubscriptionToken,
    topic: Topic,
    handler: Handler,
}

/// Topic-based event channel.
#[derive(Default)]
pub struct EventChannel {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionToken
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription {
            token,
            topic,
            handler: Arc::new(handler),
        };
        match self.subscriptions.lock() {
            Ok(mut subs) => subs.push(subscription),
            Err(poisoned) => poisoned.into_inner().push(subscription),
        }
        token
    }

    /// Remove a subscription. Returns `false` if the token was unknown.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subs = match self.subscriptions.lock() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = subs.len();
        subs.retain(|s| s.token != token);
        subs.len() != before
    }

    /// Deliver `event` to every handler subscribed to its topic.
    ///
    /// Handlers run outside the subscription lock, so they may subscribe,
    /// unsubscribe or publish themselves.
    pub fn publish(&self, event: &Event) {
        let topic = event.topic();
        let handlers: Vec<Handler> = {
            let subs = match self.subscriptions.lock() {
                Ok(subs) => subs,
                Err(poisoned) => poisoned.into_inner(),
            };
            subs.iter()
                .filter(|s| s.topic == topic)
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        debug!(%topic, handlers = handlers.len(), "publishing event");

        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%topic, error = %e, "event handler failed"),
                Err(_) => error!(%topic, "event handler panicked"),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cleared() -> Event {
        Event::SessionCleared {
            reason: ClearReason::Logout,
        }
    }

    #[test]
    fn test_delivery_in_subscription_order() {
        let channel = EventChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            channel.subscribe(Topic::SessionCleared, move |_| {
                seen.lock().unwrap().push(name);
                Ok(())
            });
        }

        channel.publish(&cleared());
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_handlers_do_not_block_others() {
        let channel = EventChannel::new();
        let reached = Arc::new(Mutex::new(0));

        channel.subscribe(Topic::SessionCleared, |_| Err("boom".into()));
        channel.subscribe(Topic::SessionCleared, |_| panic!("handler bug"));
        let counter = Arc::clone(&reached);
        channel.subscribe(Topic::SessionCleared, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        channel.publish(&cleared());
        assert_eq!(*reached.lock().unwrap(), 1);
    }

    #[test]
    fn test_topics_are_isolated() {
        let channel = EventChannel::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        channel.subscribe(Topic::ContextRequired, move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });

        channel.publish(&cleared());
        channel.publish(&Event::ContextRequired {
            message: "pick a shop".to_string(),
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Event::ContextRequired {
                message: "pick a shop".to_string()
            }]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let channel = EventChannel::new();
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let token = channel.subscribe(Topic::SessionCleared, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        channel.publish(&cleared());
        assert!(channel.unsubscribe(token));
        assert!(!channel.unsubscribe(token));
        channel.publish(&cleared());

        assert_eq!(*count.lock().unwrap(), 1);
    }
}
