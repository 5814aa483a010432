//! Verification request notification.
//!
//! Delivery is fire-and-forget: the protocol assumes no delivery guarantee,
//! and a verifier who never responds looks the same as one who was never
//! reached.

use firewatch_registry::{AlertId, VerifierId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A request for `verifier` to look at `alert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Notification {
    pub verifier: VerifierId,
    pub alert: AlertId,
    pub wave: u8,
}

/// Capability to notify a verifier about an alert.
pub trait Notifier: Send + Sync {
    /// Must not block.
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: Notification) {
        info!("Notify {} about alert {} (wave {})", n.verifier, n.alert, n.wave);
    }
}

/// Hands notifications to a delivery task over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, n: Notification) {
        if self.tx.send(n).is_err() {
            warn!("Notification for {} dropped: delivery task gone", n.verifier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let n = Notification {
            verifier: VerifierId(3),
            alert: AlertId::new(),
            wave: 1,
        };
        notifier.notify(n);
        assert_eq!(rx.recv().await, Some(n));
    }

    #[test]
    fn test_channel_notifier_survives_closed_receiver() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.notify(Notification {
            verifier: VerifierId(1),
            alert: AlertId::new(),
            wave: 2,
        });
    }
}
