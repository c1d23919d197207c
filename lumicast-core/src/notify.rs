//! Operator-facing notifications.
//!
//! The orchestrator reports lifecycle events (capture started, recovery
//! escalated, pipeline stopped) through a [`Notifier`]. Delivery is
//! fire-and-forget: a full or missing sink drops the message rather than
//! stalling capture.

use std::fmt;

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Info(String),
    Error(String),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info(msg) => write!(f, "{msg}"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Sending half of the notification channel. `Notifier::default()` has
/// no sink and discards everything.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::Sender<Notification>>,
}

impl Notifier {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A notifier and the receiver for its messages.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.send(Notification::Info(msg.into()));
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.send(Notification::Error(msg.into()));
    }

    fn send(&self, notification: Notification) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_order() {
        let (notifier, mut rx) = Notifier::channel(4);
        notifier.info("capture started");
        notifier.error("gave up");
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::Info("capture started".into())
        );
        assert_eq!(rx.try_recv().unwrap().to_string(), "error: gave up");
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (notifier, mut rx) = Notifier::channel(1);
        notifier.info("first");
        notifier.info("second");
        assert_eq!(rx.try_recv().unwrap(), Notification::Info("first".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_sink_is_noop() {
        let notifier = Notifier::default();
        notifier.error("nobody listens");
    }
}
