//! Lifecycle orchestrator: drives one end-to-end scenario
//!
//! A run:
//! 1. Optionally provisions (create channel, join peers, package, install, instantiate)
//! 2. Queries the baseline value
//! 3. Registers for the confirming event and executes the transaction
//! 4. Waits for the event, bounded by the scenario timeout
//! 5. Queries again and verifies the value moved by the expected delta
//!
//! Any failure aborts the run with the phase it happened in. The event
//! registration is released on every exit path.

pub mod scenario;

pub use scenario::{ScenarioConfig, UpgradeConfig, DEFAULT_EVENT_TIMEOUT};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chaincode::{ChaincodeDeployer, DeploymentProposal};
use crate::channel::{ChannelDefinition, ChannelProvisioner};
use crate::network::{LedgerGateway, NetworkContext};
use crate::retry::RetryPolicy;
use crate::transaction::{ChaincodeEvent, EventStream, TransactionClient, TransactionRequest};
use crate::types::{byte_args, LifecycleError, TransactionId};

/// Step of a run, reported with every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ResolveIdentity,
    CreateChannel,
    JoinChannel,
    PackageChaincode,
    InstallChaincode,
    InstantiateChaincode,
    UpgradeChaincode,
    BaselineQuery,
    RegisterEvent,
    Execute,
    AwaitEvent,
    FinalQuery,
    Verify,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolveIdentity => "resolve_identity",
            Self::CreateChannel => "create_channel",
            Self::JoinChannel => "join_channel",
            Self::PackageChaincode => "package_chaincode",
            Self::InstallChaincode => "install_chaincode",
            Self::InstantiateChaincode => "instantiate_chaincode",
            Self::UpgradeChaincode => "upgrade_chaincode",
            Self::BaselineQuery => "baseline_query",
            Self::RegisterEvent => "register_event",
            Self::Execute => "execute",
            Self::AwaitEvent => "await_event",
            Self::FinalQuery => "final_query",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run aborted in `phase` because of `source`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{phase} failed: {source}")]
pub struct RunFailure {
    pub phase: Phase,
    pub source: LifecycleError,
    /// Set when the failure ends an orchestrated run
    pub run_id: Option<Uuid>,
}

impl RunFailure {
    pub fn new(phase: Phase, source: LifecycleError) -> Self {
        Self {
            phase,
            source,
            run_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

fn at(phase: Phase) -> impl FnOnce(LifecycleError) -> RunFailure {
    move |source| RunFailure::new(phase, source)
}

/// Transactions submitted while provisioning.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub channel_tx: TransactionId,
    pub package_digest: String,
    pub instantiate_tx: TransactionId,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub channel_id: String,
    pub chaincode_id: String,
    pub provisioning: Option<ProvisionReport>,
    pub before: String,
    pub after: String,
    pub transaction_id: TransactionId,
    pub event_name: String,
    pub block_number: Option<u64>,
    pub confirmation_ms: u64,
    pub elapsed_ms: u64,
}

/// Check that `after == before + expected_delta`, both read as decimal integers.
pub fn verify_delta(
    before: &[u8],
    after: &[u8],
    expected_delta: i64,
) -> Result<(), LifecycleError> {
    let parse = |raw: &[u8]| {
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
    };

    let moved = match (parse(before), parse(after)) {
        (Some(b), Some(a)) => b.checked_add(expected_delta) == Some(a),
        _ => false,
    };
    if moved {
        Ok(())
    } else {
        Err(LifecycleError::Verification {
            before: String::from_utf8_lossy(before).into_owned(),
            after: String::from_utf8_lossy(after).into_owned(),
            expected_delta,
        })
    }
}

/// Cancels the run's token when the deadline passes; disarmed on drop.
struct DeadlineGuard(JoinHandle<()>);

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drives provisioning, deployment and the transaction scenario.
pub struct LifecycleOrchestrator {
    gateway: Arc<dyn LedgerGateway>,
    config: ScenarioConfig,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl LifecycleOrchestrator {
    pub fn new(gateway: Arc<dyn LedgerGateway>, config: ScenarioConfig) -> Self {
        Self {
            gateway,
            config,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cancel this token to abort in-flight retries of any run.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Run the scenario, provisioning first when asked.
    pub async fn run(&self, perform_provisioning: bool) -> Result<RunReport, RunFailure> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let cancel = self.cancel.child_token();
        let _deadline = self.arm_deadline(&cancel);

        info!(
            run_id = %run_id,
            gateway = %self.gateway.name(),
            channel = %self.config.channel_id,
            chaincode = %self.config.chaincode_id,
            provisioning = perform_provisioning,
            "Starting lifecycle run"
        );

        self.run_with(run_id, started, perform_provisioning, &cancel)
            .await
            .map_err(|failure| failure.with_run_id(run_id))
    }

    async fn run_with(
        &self,
        run_id: Uuid,
        started: Instant,
        perform_provisioning: bool,
        cancel: &CancellationToken,
    ) -> Result<RunReport, RunFailure> {
        let provisioning = if perform_provisioning {
            Some(self.provision_with(cancel).await?)
        } else {
            None
        };

        let user_ctx = self
            .context_for(&self.config.organization, &self.config.user, cancel)
            .await?
            .with_channel(&self.config.channel_id);
        let client = TransactionClient::new(Arc::clone(&self.gateway), user_ctx)
            .map_err(at(Phase::ResolveIdentity))?
            .with_retry(self.retry.clone())
            .with_cancellation(cancel.clone());

        let query = TransactionRequest::new(&self.config.chaincode_id, &self.config.function)
            .with_args(byte_args(&self.config.query_args));
        let before = client.query(&query).await.map_err(at(Phase::BaselineQuery))?;
        info!(value = %String::from_utf8_lossy(&before), "Baseline query");

        let (registration, mut stream) = client
            .register_event(&self.config.chaincode_id, &self.config.event_pattern)
            .await
            .map_err(at(Phase::RegisterEvent))?;

        let confirmed = self.execute_and_await(&client, &mut stream, cancel).await;
        client.unregister(&registration);
        let (transaction_id, event, confirmation) = confirmed?;

        let after = client.query(&query).await.map_err(at(Phase::FinalQuery))?;
        verify_delta(&before, &after, self.config.expected_delta).map_err(at(Phase::Verify))?;

        let report = RunReport {
            run_id,
            channel_id: self.config.channel_id.clone(),
            chaincode_id: self.config.chaincode_id.clone(),
            provisioning,
            before: String::from_utf8_lossy(&before).into_owned(),
            after: String::from_utf8_lossy(&after).into_owned(),
            transaction_id,
            event_name: event.event_name,
            block_number: event.block_number,
            confirmation_ms: confirmation.as_millis() as u64,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            run_id = %report.run_id,
            before = %report.before,
            after = %report.after,
            tx_id = %report.transaction_id,
            elapsed_ms = report.elapsed_ms,
            "Transaction verified"
        );
        Ok(report)
    }

    /// Create the channel, join peers, then build, install and instantiate the chaincode.
    pub async fn provision(&self) -> Result<ProvisionReport, RunFailure> {
        let cancel = self.cancel.child_token();
        let _deadline = self.arm_deadline(&cancel);
        self.provision_with(&cancel).await
    }

    /// Install `upgrade.version` on the listed organizations and activate it
    /// with the new policy.
    pub async fn upgrade(&self, upgrade: &UpgradeConfig) -> Result<TransactionId, RunFailure> {
        let cancel = self.cancel.child_token();
        let _deadline = self.arm_deadline(&cancel);
        let channel_id = &self.config.channel_id;

        for organization in &upgrade.install_organizations {
            let deployer = self.deployer_for(organization, &cancel).await?;
            let package = deployer
                .build_package(
                    &self.config.chaincode_id,
                    &self.config.chaincode_path,
                    &upgrade.version,
                )
                .await
                .map_err(at(Phase::PackageChaincode))?;
            deployer
                .install(&package)
                .await
                .map_err(at(Phase::InstallChaincode))?;
        }

        let deployer = self.deployer_for(&self.config.organization, &cancel).await?;
        let proposal = DeploymentProposal {
            name: self.config.chaincode_id.clone(),
            path: self.chaincode_label(),
            version: upgrade.version.clone(),
            args: byte_args(&upgrade.init_args),
            policy: upgrade.policy.clone(),
        };
        deployer
            .upgrade(channel_id, &proposal)
            .await
            .map_err(at(Phase::UpgradeChaincode))
    }

    async fn provision_with(&self, cancel: &CancellationToken) -> Result<ProvisionReport, RunFailure> {
        let config = &self.config;
        let orderer_ctx = self
            .context_for(&config.orderer_organization, &config.admin_user, cancel)
            .await?;
        let org_admin_ctx = self
            .context_for(&config.organization, &config.admin_user, cancel)
            .await?;

        let provisioner = ChannelProvisioner::new(Arc::clone(&self.gateway))
            .with_retry(self.retry.clone())
            .with_cancellation(cancel.clone());

        let definition = ChannelDefinition::from_file(
            &config.channel_id,
            &config.channel_config_path,
            vec![org_admin_ctx.identity().clone()],
        )
        .await
        .map_err(at(Phase::CreateChannel))?;
        let channel_tx = provisioner
            .create_channel(&orderer_ctx, &definition, &config.orderer_endpoint)
            .await
            .map_err(at(Phase::CreateChannel))?;

        for organization in &config.peer_organizations {
            let ctx = if *organization == config.organization {
                org_admin_ctx.clone()
            } else {
                self.context_for(organization, &config.admin_user, cancel)
                    .await?
            };
            provisioner
                .join_channel(&ctx, &config.channel_id, &config.orderer_endpoint)
                .await
                .map_err(at(Phase::JoinChannel))?;
        }

        let deployer = ChaincodeDeployer::new(
            Arc::clone(&self.gateway),
            org_admin_ctx.with_channel(&config.channel_id),
        )
        .with_retry(self.retry.clone())
        .with_cancellation(cancel.clone());

        let package = deployer
            .build_package(
                &config.chaincode_id,
                &config.chaincode_path,
                &config.chaincode_version,
            )
            .await
            .map_err(at(Phase::PackageChaincode))?;
        deployer
            .install(&package)
            .await
            .map_err(at(Phase::InstallChaincode))?;

        let proposal = DeploymentProposal {
            name: config.chaincode_id.clone(),
            path: package.path.clone(),
            version: config.chaincode_version.clone(),
            args: byte_args(&config.init_args),
            policy: config.policy.clone(),
        };
        let instantiate_tx = deployer
            .instantiate(&config.channel_id, &proposal)
            .await
            .map_err(at(Phase::InstantiateChaincode))?;

        info!(
            channel = %config.channel_id,
            chaincode = %config.chaincode_id,
            version = %config.chaincode_version,
            "Provisioning complete"
        );
        Ok(ProvisionReport {
            channel_tx,
            package_digest: package.digest,
            instantiate_tx,
        })
    }

    async fn execute_and_await(
        &self,
        client: &TransactionClient,
        stream: &mut EventStream,
        cancel: &CancellationToken,
    ) -> Result<(TransactionId, ChaincodeEvent, Duration), RunFailure> {
        let request = TransactionRequest::new(&self.config.chaincode_id, &self.config.function)
            .with_args(byte_args(&self.config.tx_args));

        let submitted = Instant::now();
        let transaction_id = client.execute(&request).await.map_err(at(Phase::Execute))?;
        info!(tx_id = %transaction_id, args = %request.display_args(), "Transaction submitted");

        let waited = tokio::select! {
            result = TransactionClient::await_event(
                stream,
                Some(&transaction_id),
                &self.config.event_pattern,
                self.config.event_timeout,
            ) => result,
            _ = cancel.cancelled() => Err(LifecycleError::Cancelled {
                operation: "await_event".to_string(),
            }),
        };

        match waited {
            Ok(event) => {
                info!(
                    tx_id = %transaction_id,
                    event = %event.event_name,
                    payload = %String::from_utf8_lossy(&event.payload),
                    block = ?event.block_number,
                    "Received chaincode event"
                );
                Ok((transaction_id, event, submitted.elapsed()))
            }
            Err(e) => {
                warn!(tx_id = %transaction_id, error = %e, "Transaction not confirmed");
                Err(RunFailure::new(Phase::AwaitEvent, e))
            }
        }
    }

    async fn context_for(
        &self,
        organization: &str,
        user: &str,
        cancel: &CancellationToken,
    ) -> Result<NetworkContext, RunFailure> {
        let identity = self
            .retry
            .run("resolve_signing_identity", cancel, || {
                self.gateway.resolve_signing_identity(organization, user)
            })
            .await
            .map_err(at(Phase::ResolveIdentity))?;
        Ok(NetworkContext::new(identity, organization))
    }

    async fn deployer_for(
        &self,
        organization: &str,
        cancel: &CancellationToken,
    ) -> Result<ChaincodeDeployer, RunFailure> {
        let ctx = self
            .context_for(organization, &self.config.admin_user, cancel)
            .await?
            .with_channel(&self.config.channel_id);
        Ok(ChaincodeDeployer::new(Arc::clone(&self.gateway), ctx)
            .with_retry(self.retry.clone())
            .with_cancellation(cancel.clone()))
    }

    fn chaincode_label(&self) -> String {
        self.config
            .chaincode_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.chaincode_id.clone())
    }

    fn arm_deadline(&self, cancel: &CancellationToken) -> Option<DeadlineGuard> {
        let deadline = self.config.deadline?;
        let cancel = cancel.clone();
        Some(DeadlineGuard(tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!(deadline_ms = deadline.as_millis() as u64, "Run deadline passed, cancelling");
            cancel.cancel();
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_delta() {
        assert!(verify_delta(b"200", b"201", 1).is_ok());
        assert!(verify_delta(b"200", b"199", -1).is_ok());

        match verify_delta(b"200", b"200", 1) {
            Err(LifecycleError::Verification { before, after, .. }) => {
                assert_eq!(before, "200");
                assert_eq!(after, "200");
            }
            other => panic!("expected Verification, got {other:?}"),
        }
        assert!(matches!(
            verify_delta(b"two hundred", b"201", 1),
            Err(LifecycleError::Verification { .. })
        ));
    }

    #[test]
    fn test_failure_names_phase() {
        let failure = RunFailure::new(
            Phase::AwaitEvent,
            LifecycleError::TimedOut {
                pattern: "mash([a-zA-Z]+)".into(),
                waited: Duration::from_secs(20),
            },
        );
        let message = failure.to_string();
        assert!(message.starts_with("await_event failed"));
        assert!(message.contains("unconfirmed"));
    }
}
