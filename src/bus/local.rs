//! In-process bus transport.
//!
//! Implements the subject semantics of the pub/sub mesh (single-token `*`,
//! tail `>`, `:param` captures) without a network hop. Requests are delivered
//! to every matching subscription and the first reply wins. The embedded
//! binary and the test-suite run services against it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Bus, BusError, BusMessage, Delivery, Replier, SubjectPattern, Subscription};

struct Registered {
    pattern: SubjectPattern,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// A bus living entirely inside this process.
pub struct LocalBus {
    subscriptions: RwLock<Vec<Registered>>,
    next_id: AtomicU64,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }

    /// Deliver to every matching subscription, returns how many accepted it.
    fn deliver(&self, subject: &str, message: &BusMessage, reply: Option<Replier>) -> usize {
        let mut delivered = 0;
        let mut stale = false;

        {
            let subscriptions = self
                .subscriptions
                .read()
                .unwrap_or_else(PoisonError::into_inner);

            for sub in subscriptions.iter().filter(|s| s.pattern.matches(subject)) {
                let delivery = Delivery::new(
                    subject.to_string(),
                    sub.pattern.params(subject),
                    message.clone(),
                    reply.clone(),
                );
                if sub.tx.send(delivery).is_ok() {
                    delivered += 1;
                } else {
                    stale = true;
                }
            }
        }

        if stale {
            self.subscriptions
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|s| !s.tx.is_closed());
        }

        delivered
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn request(
        &self,
        subject: &str,
        message: BusMessage,
        timeout: Duration,
    ) -> Result<BusMessage, BusError> {
        let (tx, mut rx) = mpsc::channel(1);

        // `deliver` consumes the only sender it is given; once every handler
        // drops its clone without replying, `recv` returns `None`.
        if self.deliver(subject, &message, Some(Replier::new(tx))) == 0 {
            return Err(BusError::NoResponders(subject.to_string()));
        }

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) | Err(_) => Err(BusError::Timeout {
                subject: subject.to_string(),
                timeout,
            }),
        }
    }

    async fn publish(&self, subject: &str, message: BusMessage) -> Result<(), BusError> {
        let delivered = self.deliver(subject, &message, None);
        tracing::trace!(subject = %subject, delivered, "Published");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        let pattern = SubjectPattern::parse(pattern)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registered {
                pattern: pattern.clone(),
                tx,
            });

        tracing::debug!(pattern = %pattern.as_str(), subscription_id = id, "Subscribed");
        Ok(Subscription::new(pattern, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_reply_wins() {
        let bus = LocalBus::new();
        let mut first = bus.subscribe("a.b").await.unwrap();
        let mut second = bus.subscribe("a.*").await.unwrap();

        tokio::spawn(async move {
            let mut d = first.next().await.unwrap();
            d.take_reply().unwrap().send(BusMessage::new("first"));
        });
        tokio::spawn(async move {
            let mut d = second.next().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            d.take_reply().unwrap().send(BusMessage::new("second"));
        });

        let reply = bus
            .request("a.b", BusMessage::new("x"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.req_id, "first");
    }

    #[tokio::test]
    async fn times_out_without_reply() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("slow").await.unwrap();
        let holder = tokio::spawn(async move {
            let d = sub.next().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(d);
        });

        let err = bus
            .request("slow", BusMessage::new("x"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout { .. }));
        holder.abort();
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_pruned() {
        let bus = LocalBus::new();
        let sub = bus.subscribe("gone").await.unwrap();
        drop(sub);

        let err = bus
            .request("gone", BusMessage::new("x"), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoResponders(_)));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = LocalBus::new();
        let mut a = bus.subscribe("event.>").await.unwrap();
        let mut b = bus.subscribe("event.created").await.unwrap();

        bus.publish("event.created", BusMessage::new("e")).await.unwrap();

        assert_eq!(a.next().await.unwrap().message.req_id, "e");
        let mut d = b.next().await.unwrap();
        assert!(d.take_reply().is_none());
    }
}
