//! Channel provisioner: creates channels and joins organization peers
//!
//! Provisioning a channel:
//! 1. Validate the definition locally (non-empty artifact, at least one signer)
//! 2. Submit the configuration transaction to the ordering service as an admin
//! 3. Join each organization's peers, retrying while the channel propagates
//!
//! Creation is never treated as idempotent: submitting an existing channel id
//! fails with `AlreadyExists`.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ChannelDefinition;
use crate::network::{LedgerGateway, NetworkContext};
use crate::retry::RetryPolicy;
use crate::types::{LifecycleError, Result, TransactionId};

/// Creates channels and joins peers through a [`LedgerGateway`].
pub struct ChannelProvisioner {
    gateway: Arc<dyn LedgerGateway>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ChannelProvisioner {
    pub fn new(gateway: Arc<dyn LedgerGateway>) -> Self {
        Self {
            gateway,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Submit a channel configuration as `admin_ctx`.
    pub async fn create_channel(
        &self,
        admin_ctx: &NetworkContext,
        definition: &ChannelDefinition,
        orderer_endpoint: &str,
    ) -> Result<TransactionId> {
        definition.validate()?;

        if !admin_ctx.identity().is_admin() {
            return Err(LifecycleError::Authorization(format!(
                "{} is not an admin of {} and cannot create channels",
                admin_ctx.identity().user,
                admin_ctx.organization()
            )));
        }

        info!(
            channel = %definition.channel_id,
            submitter = %admin_ctx.identity().user,
            organization = %admin_ctx.organization(),
            signers = definition.signers.len(),
            orderer = %orderer_endpoint,
            "Creating channel"
        );

        let tx_id = self
            .retry
            .run("create_channel", &self.cancel, || {
                self.gateway
                    .save_channel(admin_ctx, definition, orderer_endpoint)
            })
            .await?;

        info!(channel = %definition.channel_id, tx_id = %tx_id, "Channel created");
        Ok(tx_id)
    }

    /// Join every peer of `org_ctx`'s organization to `channel_id`.
    pub async fn join_channel(
        &self,
        org_ctx: &NetworkContext,
        channel_id: &str,
        orderer_endpoint: &str,
    ) -> Result<()> {
        info!(
            channel = %channel_id,
            organization = %org_ctx.organization(),
            orderer = %orderer_endpoint,
            "Joining organization peers to channel"
        );

        let result = self
            .retry
            .run("join_channel", &self.cancel, || {
                self.gateway
                    .join_channel(org_ctx, channel_id, orderer_endpoint)
            })
            .await;

        match result {
            Ok(()) => {
                info!(
                    channel = %channel_id,
                    organization = %org_ctx.organization(),
                    "Peers joined channel"
                );
                Ok(())
            }
            Err(e @ LifecycleError::Cancelled { .. }) => Err(e),
            Err(e) => {
                warn!(
                    channel = %channel_id,
                    organization = %org_ctx.organization(),
                    error = %e,
                    "Org peers failed to join channel"
                );
                Err(LifecycleError::Join {
                    channel_id: channel_id.to_string(),
                    organization: org_ctx.organization().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{GatewayOperation, SigningIdentity, SimulatedNetwork};
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default().with_backoff(Duration::from_millis(1), Duration::from_millis(5))
    }

    async fn admin_contexts(network: &SimulatedNetwork) -> (NetworkContext, NetworkContext) {
        let orderer_admin = network
            .resolve_signing_identity("ordererorg", "Admin")
            .await
            .unwrap();
        let org_admin = network
            .resolve_signing_identity("org1", "Admin")
            .await
            .unwrap();
        (
            NetworkContext::new(orderer_admin, "ordererorg"),
            NetworkContext::new(org_admin, "org1"),
        )
    }

    fn definition(network: &SimulatedNetwork, signer: SigningIdentity) -> ChannelDefinition {
        ChannelDefinition::new(
            "orgchannel",
            network.channel_config_artifact("orgchannel"),
            vec![signer],
        )
    }

    #[tokio::test]
    async fn test_create_then_recreate_fails() {
        let network = Arc::new(SimulatedNetwork::default());
        let (orderer_ctx, org_ctx) = admin_contexts(&network).await;
        let provisioner = ChannelProvisioner::new(network.clone()).with_retry(fast_retry());
        let def = definition(&network, org_ctx.identity().clone());

        let tx = provisioner
            .create_channel(&orderer_ctx, &def, "orderer.example.com")
            .await;
        assert!(tx.is_ok());

        let again = provisioner
            .create_channel(&orderer_ctx, &def, "orderer.example.com")
            .await;
        assert!(matches!(again, Err(LifecycleError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_member_cannot_create_channel() {
        let network = Arc::new(SimulatedNetwork::default());
        let user = network
            .resolve_signing_identity("org1", "User1")
            .await
            .unwrap();
        let ctx = NetworkContext::new(user.clone(), "org1");
        let provisioner = ChannelProvisioner::new(network.clone());

        let result = provisioner
            .create_channel(&ctx, &definition(&network, user), "orderer.example.com")
            .await;
        assert!(matches!(result, Err(LifecycleError::Authorization(_))));
        assert_eq!(network.call_count(GatewayOperation::SaveChannel), 0);
    }

    #[tokio::test]
    async fn test_join_retries_while_channel_propagates() {
        let network = Arc::new(SimulatedNetwork::default().with_join_propagation_failures(2));
        let (orderer_ctx, org_ctx) = admin_contexts(&network).await;
        let provisioner = ChannelProvisioner::new(network.clone()).with_retry(fast_retry());

        provisioner
            .create_channel(
                &orderer_ctx,
                &definition(&network, org_ctx.identity().clone()),
                "orderer.example.com",
            )
            .await
            .unwrap();
        provisioner
            .join_channel(&org_ctx, "orgchannel", "orderer.example.com")
            .await
            .unwrap();

        assert_eq!(network.call_count(GatewayOperation::JoinChannel), 3);
    }

    #[tokio::test]
    async fn test_join_exhaustion_is_join_error() {
        let network = Arc::new(SimulatedNetwork::default().with_join_propagation_failures(10));
        let (orderer_ctx, org_ctx) = admin_contexts(&network).await;
        let provisioner = ChannelProvisioner::new(network.clone())
            .with_retry(fast_retry().with_max_attempts(3));

        provisioner
            .create_channel(
                &orderer_ctx,
                &definition(&network, org_ctx.identity().clone()),
                "orderer.example.com",
            )
            .await
            .unwrap();
        let result = provisioner
            .join_channel(&org_ctx, "orgchannel", "orderer.example.com")
            .await;

        match result {
            Err(LifecycleError::Join {
                channel_id,
                organization,
                ..
            }) => {
                assert_eq!(channel_id, "orgchannel");
                assert_eq!(organization, "org1");
            }
            other => panic!("expected Join error, got {other:?}"),
        }
        assert_eq!(network.call_count(GatewayOperation::JoinChannel), 3);
    }
}
