//! Chaincode deployer: packaging, install, instantiate and upgrade
//!
//! The deployer acts for one organization admin. A deployment goes:
//! 1. Build a deterministic package from the source directory
//! 2. Install it on every peer of the organization (idempotent)
//! 3. Instantiate it once per channel with an endorsement policy
//! 4. Later versions replace the active one through upgrade
//!
//! Policies are validated locally before any proposal leaves the process.

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{ChaincodePackage, DeploymentProposal};
use crate::network::{InstallOutcome, LedgerGateway, NetworkContext};
use crate::retry::RetryPolicy;
use crate::types::{LifecycleError, Result, TransactionId};

/// Deploys chaincode on behalf of one organization admin.
pub struct ChaincodeDeployer {
    gateway: Arc<dyn LedgerGateway>,
    context: NetworkContext,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ChaincodeDeployer {
    pub fn new(gateway: Arc<dyn LedgerGateway>, admin_ctx: NetworkContext) -> Self {
        Self {
            gateway,
            context: admin_ctx,
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

    pub fn organization(&self) -> &str {
        self.context.organization()
    }

    /// Build a deterministic package from `source_path`.
    pub async fn build_package(
        &self,
        name: &str,
        source_path: &Path,
        version: &str,
    ) -> Result<ChaincodePackage> {
        let package = ChaincodePackage::build_async(name, source_path, version).await?;
        info!(
            chaincode = %package.name,
            version = %package.version,
            digest = %package.digest,
            bytes = package.archive.len(),
            "Built chaincode package"
        );
        Ok(package)
    }

    /// Install `package` on every peer of this organization.
    pub async fn install(&self, package: &ChaincodePackage) -> Result<()> {
        let outcome = self
            .retry
            .run("install", &self.cancel, || {
                self.gateway.install_chaincode(&self.context, package)
            })
            .await?;

        match outcome {
            InstallOutcome::Installed => info!(
                chaincode = %package.name,
                version = %package.version,
                organization = %self.organization(),
                "Installed chaincode on organization peers"
            ),
            InstallOutcome::AlreadyInstalled => info!(
                chaincode = %package.name,
                version = %package.version,
                organization = %self.organization(),
                "Chaincode already installed, nothing to do"
            ),
        }
        Ok(())
    }

    /// First-time activation of a chaincode on `channel_id`.
    pub async fn instantiate(
        &self,
        channel_id: &str,
        proposal: &DeploymentProposal,
    ) -> Result<TransactionId> {
        Self::check_proposal(proposal)?;
        info!(
            channel = %channel_id,
            chaincode = %proposal.name,
            version = %proposal.version,
            policy = %proposal.policy,
            "Instantiating chaincode"
        );

        let tx_id = self
            .retry
            .run("instantiate", &self.cancel, || {
                self.gateway
                    .instantiate_chaincode(&self.context, channel_id, proposal)
            })
            .await?;

        info!(channel = %channel_id, chaincode = %proposal.name, tx_id = %tx_id, "Chaincode instantiated");
        Ok(tx_id)
    }

    /// Activate a new version, replacing the active one on `channel_id`.
    pub async fn upgrade(
        &self,
        channel_id: &str,
        proposal: &DeploymentProposal,
    ) -> Result<TransactionId> {
        Self::check_proposal(proposal)?;
        info!(
            channel = %channel_id,
            chaincode = %proposal.name,
            version = %proposal.version,
            policy = %proposal.policy,
            "Upgrading chaincode"
        );

        let tx_id = self
            .retry
            .run("upgrade", &self.cancel, || {
                self.gateway
                    .upgrade_chaincode(&self.context, channel_id, proposal)
            })
            .await?;

        info!(channel = %channel_id, chaincode = %proposal.name, tx_id = %tx_id, "Chaincode upgraded");
        Ok(tx_id)
    }

    fn check_proposal(proposal: &DeploymentProposal) -> Result<()> {
        if proposal.name.trim().is_empty() || proposal.version.trim().is_empty() {
            return Err(LifecycleError::Configuration(
                "deployment needs a chaincode name and version".to_string(),
            ));
        }
        proposal.policy.validate()
    }
}
