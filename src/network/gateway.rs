//! The membership/ordering seam
//!
//! [`LedgerGateway`] is everything this crate needs from the outside world:
//! identity resolution plus the channel, resource-management and transaction
//! RPC primitives. Each call makes exactly one remote attempt; retrying is the
//! caller's job (see [`crate::retry::RetryPolicy`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::context::{NetworkContext, SigningIdentity};
use crate::chaincode::{ChaincodePackage, DeploymentProposal};
use crate::channel::ChannelDefinition;
use crate::transaction::{ChaincodeEvent, EventFilter, TransactionRequest};
use crate::types::{Result, TransactionId};

/// Handle for a live event subscription inside a gateway.
pub type SubscriptionId = u64;

/// A live event subscription: its id and the receiving end of its event feed.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<ChaincodeEvent>,
}

/// Result of pushing a chaincode package to an organization's peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalled,
}

/// Low-level ledger network primitives consumed by the lifecycle components.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Short name for logs (e.g. "simulated", "http").
    fn name(&self) -> &str;

    /// Look up the signing identity for a user of an organization.
    async fn resolve_signing_identity(
        &self,
        organization: &str,
        user: &str,
    ) -> Result<SigningIdentity>;

    /// Submit a channel configuration transaction to the ordering service.
    async fn save_channel(
        &self,
        ctx: &NetworkContext,
        definition: &ChannelDefinition,
        orderer_endpoint: &str,
    ) -> Result<TransactionId>;

    /// Join every peer of the context's organization to a channel.
    async fn join_channel(
        &self,
        ctx: &NetworkContext,
        channel_id: &str,
        orderer_endpoint: &str,
    ) -> Result<()>;

    /// Install a package on every peer of the context's organization.
    async fn install_chaincode(
        &self,
        ctx: &NetworkContext,
        package: &ChaincodePackage,
    ) -> Result<InstallOutcome>;

    /// First-time activation of a chaincode on a channel.
    async fn instantiate_chaincode(
        &self,
        ctx: &NetworkContext,
        channel_id: &str,
        proposal: &DeploymentProposal,
    ) -> Result<TransactionId>;

    /// Replace the active version of a chaincode on a channel.
    async fn upgrade_chaincode(
        &self,
        ctx: &NetworkContext,
        channel_id: &str,
        proposal: &DeploymentProposal,
    ) -> Result<TransactionId>;

    /// Read-only invocation on the context's channel.
    async fn query(&self, ctx: &NetworkContext, request: &TransactionRequest) -> Result<Vec<u8>>;

    /// State-mutating invocation; returns once accepted for ordering.
    async fn execute(
        &self,
        ctx: &NetworkContext,
        request: &TransactionRequest,
    ) -> Result<TransactionId>;

    /// Start delivering chaincode events that match `filter`.
    async fn subscribe(
        &self,
        ctx: &NetworkContext,
        chaincode_id: &str,
        filter: &EventFilter,
    ) -> Result<Subscription>;

    /// Stop delivering events for a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}
