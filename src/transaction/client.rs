//! Transaction client: queries, executes and event confirmation
//!
//! An execute-then-confirm cycle moves through
//! `Idle -> Submitted -> {Confirmed | TimedOut | Rejected}`. A timeout means the
//! transaction is unconfirmed, not failed; it may still commit later.

use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{ChaincodeEvent, EventFilter, EventStream, Registration};
use super::TransactionRequest;
use crate::network::{LedgerGateway, NetworkContext};
use crate::retry::RetryPolicy;
use crate::types::{LifecycleError, Result, TransactionId};

/// State of a single execute-then-confirm cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Submitted(TransactionId),
    Confirmed(TransactionId),
    TimedOut(TransactionId),
    Rejected(String),
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed(_) | Self::TimedOut(_) | Self::Rejected(_))
    }
}

/// A confirmed transaction together with the event that confirmed it.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub transaction_id: TransactionId,
    pub event: ChaincodeEvent,
    pub elapsed: Duration,
}

/// Channel-bound client for chaincode invocations.
pub struct TransactionClient {
    gateway: Arc<dyn LedgerGateway>,
    context: NetworkContext,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl TransactionClient {
    /// Create a client; the context must be bound to a channel.
    pub fn new(gateway: Arc<dyn LedgerGateway>, context: NetworkContext) -> Result<Self> {
        if context.channel_id().is_none() {
            return Err(LifecycleError::Configuration(
                "transaction client requires a channel-bound context".to_string(),
            ));
        }
        Ok(Self {
            gateway,
            context,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn context(&self) -> &NetworkContext {
        &self.context
    }

    /// Read-only invocation. Never mutates the ledger.
    pub async fn query(&self, request: &TransactionRequest) -> Result<Vec<u8>> {
        debug!(
            chaincode = %request.chaincode_id,
            function = %request.function,
            args = %request.display_args(),
            "Querying chaincode"
        );
        self.retry
            .run("query", &self.cancel, || {
                self.gateway.query(&self.context, request)
            })
            .await
    }

    /// Submit a state-mutating invocation. Returns once accepted for ordering.
    pub async fn execute(&self, request: &TransactionRequest) -> Result<TransactionId> {
        debug!(
            chaincode = %request.chaincode_id,
            function = %request.function,
            args = %request.display_args(),
            "Executing chaincode"
        );
        self.retry
            .run("execute", &self.cancel, || {
                self.gateway.execute(&self.context, request)
            })
            .await
    }

    /// Subscribe to events of `chaincode_id` whose names match `pattern`.
    pub async fn register_event(
        &self,
        chaincode_id: &str,
        pattern: &str,
    ) -> Result<(Registration, EventStream)> {
        let filter = EventFilter::new(pattern)?;
        let subscription = self
            .retry
            .run("register_event", &self.cancel, || {
                self.gateway.subscribe(&self.context, chaincode_id, &filter)
            })
            .await?;

        debug!(
            subscription = subscription.id,
            chaincode = %chaincode_id,
            pattern = %pattern,
            "Registered chaincode event listener"
        );

        let registration = Registration::new(
            subscription.id,
            chaincode_id,
            &filter,
            Arc::clone(&self.gateway),
        );
        Ok((registration, EventStream::new(subscription.events)))
    }

    /// Release a registration. Safe to call repeatedly or after a timeout.
    pub fn unregister(&self, registration: &Registration) {
        registration.release();
    }

    /// Wait for the next event, bounded by `timeout`. Events tagged with a
    /// different transaction id than `transaction_id` are skipped.
    pub async fn await_event(
        stream: &mut EventStream,
        transaction_id: Option<&TransactionId>,
        pattern: &str,
        timeout: Duration,
    ) -> Result<ChaincodeEvent> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(event) => {
                        if let (Some(want), Some(got)) = (transaction_id, event.transaction_id.as_ref()) {
                            if want != got {
                                debug!(
                                    expected = %want,
                                    received = %got,
                                    event = %event.event_name,
                                    "Skipping event from another transaction"
                                );
                                continue;
                            }
                        }
                        return Ok(event);
                    }
                    None => {
                        return Err(LifecycleError::Subscription(format!(
                            "event stream for '{pattern}' closed before an event arrived"
                        )));
                    }
                },
                _ = &mut deadline => {
                    return Err(LifecycleError::TimedOut {
                        pattern: pattern.to_string(),
                        waited: timeout,
                    });
                }
            }
        }
    }

    /// Register for `pattern`, execute `request`, and wait up to `timeout` for
    /// the confirming event. The registration is released on every exit path.
    pub async fn execute_and_confirm(
        &self,
        request: &TransactionRequest,
        pattern: &str,
        timeout: Duration,
    ) -> Result<Confirmation> {
        let (registration, mut stream) =
            self.register_event(&request.chaincode_id, pattern).await?;

        let result = self
            .confirm_cycle(request, &mut stream, pattern, timeout)
            .await;

        self.unregister(&registration);
        result
    }

    async fn confirm_cycle(
        &self,
        request: &TransactionRequest,
        stream: &mut EventStream,
        pattern: &str,
        timeout: Duration,
    ) -> Result<Confirmation> {
        let started = Instant::now();

        let transaction_id = match self.execute(request).await {
            Ok(tx_id) => tx_id,
            Err(e) => {
                let state = TxState::Rejected(e.to_string());
                warn!(state = ?state, "Transaction rejected");
                return Err(e);
            }
        };
        let state = TxState::Submitted(transaction_id.clone());
        debug!(state = ?state, "Transaction accepted for ordering");

        match Self::await_event(stream, Some(&transaction_id), pattern, timeout).await {
            Ok(event) => {
                let state = TxState::Confirmed(transaction_id.clone());
                info!(
                    tx_id = %transaction_id,
                    event = %event.event_name,
                    block = ?event.block_number,
                    terminal = state.is_terminal(),
                    "Received chaincode event"
                );
                Ok(Confirmation {
                    transaction_id,
                    event,
                    elapsed: started.elapsed(),
                })
            }
            Err(e) => {
                let state = if matches!(e, LifecycleError::TimedOut { .. }) {
                    TxState::TimedOut(transaction_id.clone())
                } else {
                    state
                };
                warn!(state = ?state, error = %e, "Transaction not confirmed");
                Err(e)
            }
        }
    }
}
