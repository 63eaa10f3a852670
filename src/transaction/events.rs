//! Chaincode event subscriptions
//!
//! A [`Registration`] owns a gateway subscription and releases it exactly once,
//! either through an explicit release or when dropped. The paired
//! [`EventStream`] ends once the registration is released.

use futures::Stream;
use pin_project_lite::pin_project;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

use crate::network::{LedgerGateway, SubscriptionId};
use crate::types::{LifecycleError, Result, TransactionId};

/// An event emitted by chaincode during a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    pub chaincode_id: String,
    pub event_name: String,
    #[serde(with = "crate::types::base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub transaction_id: Option<TransactionId>,
    #[serde(default)]
    pub block_number: Option<u64>,
}

/// Event name matcher. Patterns are regular expressions anchored at the
/// start of the name, so `mash([a-zA-Z]+)` matches names beginning with "mash".
#[derive(Debug, Clone)]
pub struct EventFilter {
    pattern: String,
    regex: Regex,
}

impl EventFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
            LifecycleError::Configuration(format!("invalid event pattern '{pattern}': {e}"))
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, event_name: &str) -> bool {
        self.regex.is_match(event_name)
    }
}

/// Scoped handle for a chaincode event listener.
pub struct Registration {
    id: SubscriptionId,
    chaincode_id: String,
    pattern: String,
    released: AtomicBool,
    gateway: Arc<dyn LedgerGateway>,
}

impl Registration {
    pub(crate) fn new(
        id: SubscriptionId,
        chaincode_id: &str,
        filter: &EventFilter,
        gateway: Arc<dyn LedgerGateway>,
    ) -> Self {
        Self {
            id,
            chaincode_id: chaincode_id.to_string(),
            pattern: filter.pattern().to_string(),
            released: AtomicBool::new(false),
            gateway,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn chaincode_id(&self) -> &str {
        &self.chaincode_id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Free the listener. Later calls are no-ops.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            debug!(
                subscription = self.id,
                chaincode = %self.chaincode_id,
                pattern = %self.pattern,
                "Releasing chaincode event registration"
            );
            self.gateway.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("chaincode_id", &self.chaincode_id)
            .field("pattern", &self.pattern)
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

pin_project! {
    /// Lazy, unbounded, non-restartable sequence of chaincode events.
    pub struct EventStream {
        #[pin]
        receiver: mpsc::UnboundedReceiver<ChaincodeEvent>,
        received: u64,
        terminated: bool,
    }
}

impl EventStream {
    pub fn new(receiver: mpsc::UnboundedReceiver<ChaincodeEvent>) -> Self {
        Self {
            receiver,
            received: 0,
            terminated: false,
        }
    }

    /// Number of events yielded so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Whether the stream has ended (its registration was released).
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Stream for EventStream {
    type Item = ChaincodeEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if *this.terminated {
            return Poll::Ready(None);
        }

        match this.receiver.get_mut().poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                *this.received += 1;
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                *this.terminated = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_filter_is_anchored_at_start() {
        let filter = EventFilter::new("mash([a-zA-Z]+)").unwrap();
        assert!(filter.matches("mashTransfer"));
        assert!(filter.matches("mashed"));
        assert!(!filter.matches("smash"));
        assert!(!filter.matches("mash"));
        assert!(!filter.matches("testEvent"));
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        assert!(matches!(
            EventFilter::new("mash(["),
            Err(LifecycleError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_ends_and_stays_ended() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = EventStream::new(rx);

        tx.send(ChaincodeEvent {
            chaincode_id: "exampleCC".into(),
            event_name: "mashTransfer".into(),
            payload: b"Test Payload".to_vec(),
            transaction_id: None,
            block_number: Some(3),
        })
        .unwrap();
        drop(tx);

        assert_eq!(stream.next().await.unwrap().event_name, "mashTransfer");
        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
        assert!(stream.next().await.is_none());
        assert_eq!(stream.received(), 1);
    }
}
