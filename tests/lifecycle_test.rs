//! End-to-end lifecycle tests against the in-memory network
//!
//! Covers:
//! - Provision, transact and verify (single organization)
//! - Two-organization upgrade with a stricter endorsement policy
//! - Unconfirmed transactions, deadlines and verification failures
//! - Deployment guards (re-instantiation, duplicate channels)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chaincode_lifecycle::chaincode::{ChaincodeDeployer, DeploymentProposal};
use chaincode_lifecycle::logging::{ReportLogger, RunOutcome, RunRecord};
use chaincode_lifecycle::network::{
    GatewayOperation, LedgerGateway, NetworkContext, SimulatedNetwork,
};
use chaincode_lifecycle::orchestrator::{Phase, UpgradeConfig};
use chaincode_lifecycle::policy::EndorsementPolicy;
use chaincode_lifecycle::retry::RetryPolicy;
use chaincode_lifecycle::transaction::{TransactionClient, TransactionRequest};
use chaincode_lifecycle::types::byte_args;
use chaincode_lifecycle::{LifecycleError, LifecycleOrchestrator, ScenarioConfig};
use tokio_util::sync::CancellationToken;

fn fixture(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(relative)
}

fn scenario() -> ScenarioConfig {
    ScenarioConfig {
        channel_config_path: fixture("channel/orgchannel.tx"),
        chaincode_path: fixture("chaincode/example_cc"),
        event_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::default().with_backoff(Duration::from_millis(1), Duration::from_millis(5))
}

fn network() -> SimulatedNetwork {
    SimulatedNetwork::default().with_commit_delay(Duration::from_millis(10))
}

fn orchestrator(network: &SimulatedNetwork, config: ScenarioConfig) -> LifecycleOrchestrator {
    let gateway: Arc<dyn LedgerGateway> = Arc::new(network.clone());
    LifecycleOrchestrator::new(gateway, config).with_retry(fast_retry())
}

async fn admin_context(network: &SimulatedNetwork, organization: &str) -> NetworkContext {
    let identity = network
        .resolve_signing_identity(organization, "Admin")
        .await
        .unwrap();
    NetworkContext::new(identity, organization).with_channel("orgchannel")
}

// =============================================================================
// Single-organization scenario
// =============================================================================

#[tokio::test]
async fn test_provision_transact_and_verify() {
    let network = network();
    let orchestrator = orchestrator(&network, scenario());

    let report = orchestrator.run(true).await.unwrap();

    assert_eq!(report.before, "200");
    assert_eq!(report.after, "201");
    assert_eq!(report.event_name, "mashTransfer");
    assert!(report.block_number.is_some());
    assert!(report.provisioning.is_some());

    assert_eq!(network.joined_organizations("orgchannel"), ["org1"]);
    assert_eq!(
        network.active_version("orgchannel", "exampleCC").as_deref(),
        Some("0")
    );
    assert_eq!(
        network.ledger_value("orgchannel", "exampleCC", "a"),
        Some(b"99".to_vec())
    );
    assert_eq!(network.listener_count(), 0);
}

#[tokio::test]
async fn test_second_run_reuses_provisioned_network() {
    let network = network();
    let orchestrator = orchestrator(&network, scenario());

    orchestrator.run(true).await.unwrap();
    let report = orchestrator.run(false).await.unwrap();

    assert_eq!(report.before, "201");
    assert_eq!(report.after, "202");
    assert!(report.provisioning.is_none());
}

#[tokio::test]
async fn test_queries_do_not_change_state() {
    let network = network();
    orchestrator(&network, scenario()).provision().await.unwrap();

    let ctx = network
        .resolve_signing_identity("org1", "User1")
        .await
        .unwrap();
    let ctx = NetworkContext::new(ctx, "org1").with_channel("orgchannel");
    let client = TransactionClient::new(Arc::new(network.clone()), ctx).unwrap();

    let query = TransactionRequest::new("exampleCC", "invoke").with_args(byte_args(&["query", "b"]));
    let first = client.query(&query).await.unwrap();
    let second = client.query(&query).await.unwrap();

    assert_eq!(first, b"200");
    assert_eq!(first, second);
    assert_eq!(
        network.ledger_value("orgchannel", "exampleCC", "b"),
        Some(b"200".to_vec())
    );
}

#[tokio::test]
async fn test_join_retries_until_genesis_block_propagates() {
    let network = network().with_join_propagation_failures(2);
    let orchestrator = orchestrator(&network, scenario());

    orchestrator.provision().await.unwrap();

    assert_eq!(network.call_count(GatewayOperation::JoinChannel), 3);
    assert_eq!(network.joined_organizations("orgchannel"), ["org1"]);
}

// =============================================================================
// Two organizations and upgrade
// =============================================================================

#[tokio::test]
async fn test_upgrade_requires_install_on_every_policy_member() {
    let network = network();
    let config = ScenarioConfig {
        peer_organizations: vec!["org1".into(), "org2".into()],
        ..scenario()
    };
    let orchestrator = orchestrator(&network, config);

    let report = orchestrator.run(true).await.unwrap();
    assert_eq!(report.after, "201");

    let partial = UpgradeConfig {
        install_organizations: vec!["org1".into()],
        ..Default::default()
    };
    let failure = orchestrator.upgrade(&partial).await.unwrap_err();
    assert_eq!(failure.phase, Phase::UpgradeChaincode);
    match failure.source {
        LifecycleError::NotInstalled {
            organization,
            version,
            ..
        } => {
            assert_eq!(organization, "org2");
            assert_eq!(version, "1");
        }
        other => panic!("expected NotInstalled, got {other:?}"),
    }
    assert_eq!(
        network.active_version("orgchannel", "exampleCC").as_deref(),
        Some("0")
    );

    orchestrator.upgrade(&UpgradeConfig::default()).await.unwrap();
    assert_eq!(
        network.active_version("orgchannel", "exampleCC").as_deref(),
        Some("1")
    );

    let report = orchestrator.run(false).await.unwrap();
    assert_eq!(report.before, "400");
    assert_eq!(report.after, "401");
}

#[tokio::test]
async fn test_upgrade_to_active_version_is_rejected() {
    let network = network();
    let orchestrator = orchestrator(&network, scenario());
    orchestrator.provision().await.unwrap();

    let same_version = UpgradeConfig {
        version: "0".into(),
        policy: EndorsementPolicy::signed_by_any_member(&["Org1MSP"]),
        install_organizations: vec!["org1".into()],
        ..Default::default()
    };
    let failure = orchestrator.upgrade(&same_version).await.unwrap_err();

    assert_eq!(failure.phase, Phase::UpgradeChaincode);
    assert!(matches!(
        failure.source,
        LifecycleError::AlreadyInstantiated { .. }
    ));
}

// =============================================================================
// Deployment guards
// =============================================================================

#[tokio::test]
async fn test_instantiating_twice_points_at_upgrade() {
    let network = network();
    orchestrator(&network, scenario()).provision().await.unwrap();

    let deployer = ChaincodeDeployer::new(
        Arc::new(network.clone()),
        admin_context(&network, "org1").await,
    )
    .with_retry(fast_retry());
    let proposal = DeploymentProposal {
        name: "exampleCC".into(),
        path: "example_cc".into(),
        version: "0".into(),
        args: byte_args(&["init", "a", "100", "b", "200"]),
        policy: EndorsementPolicy::signed_by_any_member(&["Org1MSP"]),
    };

    let err = deployer.instantiate("orgchannel", &proposal).await.unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyInstantiated { .. }));
    assert!(err.to_string().contains("use upgrade"));
}

#[tokio::test]
async fn test_provisioning_twice_fails_on_existing_channel() {
    let network = network();
    let orchestrator = orchestrator(&network, scenario());
    orchestrator.provision().await.unwrap();

    let failure = orchestrator.provision().await.unwrap_err();
    assert_eq!(failure.phase, Phase::CreateChannel);
    assert_eq!(
        failure.source,
        LifecycleError::AlreadyExists {
            channel_id: "orgchannel".into()
        }
    );
}

#[tokio::test]
async fn test_missing_channel_config_is_a_configuration_error() {
    let network = network();
    let config = ScenarioConfig {
        channel_config_path: fixture("channel/missing.tx"),
        ..scenario()
    };

    let failure = orchestrator(&network, config).run(true).await.unwrap_err();
    assert_eq!(failure.phase, Phase::CreateChannel);
    assert!(matches!(failure.source, LifecycleError::Configuration(_)));
    assert_eq!(network.call_count(GatewayOperation::SaveChannel), 0);
}

// =============================================================================
// Confirmation, deadlines and verification
// =============================================================================

#[tokio::test]
async fn test_missing_event_leaves_transaction_unconfirmed() {
    let network = network().with_events_disabled();
    let config = ScenarioConfig {
        event_timeout: Duration::from_millis(200),
        ..scenario()
    };

    let failure = orchestrator(&network, config).run(true).await.unwrap_err();

    assert_eq!(failure.phase, Phase::AwaitEvent);
    assert!(matches!(failure.source, LifecycleError::TimedOut { .. }));
    assert_eq!(network.listener_count(), 0);

    // The commit itself still lands.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        network.ledger_value("orgchannel", "exampleCC", "b"),
        Some(b"201".to_vec())
    );
}

#[tokio::test]
async fn test_deadline_cancels_the_wait() {
    let network = network().with_events_disabled();
    let config = ScenarioConfig {
        event_timeout: Duration::from_secs(10),
        deadline: Some(Duration::from_millis(300)),
        ..scenario()
    };

    let failure = orchestrator(&network, config).run(true).await.unwrap_err();

    assert_eq!(failure.phase, Phase::AwaitEvent);
    assert!(matches!(failure.source, LifecycleError::Cancelled { .. }));
    assert_eq!(network.listener_count(), 0);
}

#[tokio::test]
async fn test_cancelled_token_stops_before_any_call() {
    let network = network();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let failure = orchestrator(&network, scenario())
        .with_cancellation(cancel)
        .run(true)
        .await
        .unwrap_err();

    assert_eq!(failure.phase, Phase::ResolveIdentity);
    assert!(matches!(failure.source, LifecycleError::Cancelled { .. }));
    assert_eq!(network.call_count(GatewayOperation::ResolveIdentity), 0);
}

#[tokio::test]
async fn test_unexpected_delta_fails_verification() {
    let network = network();
    let config = ScenarioConfig {
        expected_delta: 2,
        ..scenario()
    };

    let failure = orchestrator(&network, config).run(true).await.unwrap_err();

    assert_eq!(failure.phase, Phase::Verify);
    assert_eq!(
        failure.source,
        LifecycleError::Verification {
            before: "200".into(),
            after: "201".into(),
            expected_delta: 2,
        }
    );
    assert!(failure.run_id.is_some());
}

#[tokio::test]
async fn test_failed_run_report_keeps_run_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.jsonl");
    let reports = ReportLogger::new();
    reports.init_file(path.clone()).await.unwrap();

    let network = network();
    let config = ScenarioConfig {
        expected_delta: 2,
        ..scenario()
    };
    let outcome = orchestrator(&network, config).run(true).await;
    reports.log_outcome("simulated", "transfer", &outcome).await;

    let failure = outcome.unwrap_err();
    let line = std::fs::read_to_string(&path).unwrap();
    let record: RunRecord = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(record.outcome, RunOutcome::Failed);
    assert_eq!(Some(record.run_id), failure.run_id);
}

#[tokio::test]
async fn test_non_transient_execute_error_is_not_retried() {
    let network = network();
    let orchestrator = orchestrator(&network, scenario());
    orchestrator.provision().await.unwrap();

    network.fail_next(
        GatewayOperation::Execute,
        LifecycleError::Ordering("rejected by orderer".into()),
        1,
    );
    let failure = orchestrator.run(false).await.unwrap_err();

    assert_eq!(failure.phase, Phase::Execute);
    assert_eq!(network.call_count(GatewayOperation::Execute), 1);
    assert_eq!(network.listener_count(), 0);
}

#[tokio::test]
async fn test_transient_execute_error_is_retried() {
    let network = network();
    let orchestrator = orchestrator(&network, scenario());
    orchestrator.provision().await.unwrap();

    network.fail_next(
        GatewayOperation::Execute,
        LifecycleError::ServiceUnavailable("orderer busy".into()),
        2,
    );
    let report = orchestrator.run(false).await.unwrap();

    assert_eq!(report.after, "201");
    assert_eq!(network.call_count(GatewayOperation::Execute), 3);
}

// =============================================================================
// Transaction client against a provisioned network
// =============================================================================

async fn user_client(network: &SimulatedNetwork) -> TransactionClient {
    let identity = network
        .resolve_signing_identity("org1", "User1")
        .await
        .unwrap();
    let ctx = NetworkContext::new(identity, "org1").with_channel("orgchannel");
    TransactionClient::new(Arc::new(network.clone()), ctx)
        .unwrap()
        .with_retry(fast_retry())
}

#[tokio::test]
async fn test_execute_and_confirm_matches_transaction() {
    let network = network();
    orchestrator(&network, scenario()).provision().await.unwrap();
    let client = user_client(&network).await;

    let request = TransactionRequest::new("exampleCC", "invoke")
        .with_args(byte_args(&["move", "b", "a", "5", "mashRefund"]));
    let confirmation = client
        .execute_and_confirm(&request, "mash([a-zA-Z]+)", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(confirmation.event.event_name, "mashRefund");
    assert_eq!(confirmation.event.payload, b"Test Payload");
    assert_eq!(
        confirmation.event.transaction_id.as_ref(),
        Some(&confirmation.transaction_id)
    );
    assert_eq!(
        network.ledger_value("orgchannel", "exampleCC", "a"),
        Some(b"105".to_vec())
    );
    assert_eq!(network.listener_count(), 0);
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let network = network();
    orchestrator(&network, scenario()).provision().await.unwrap();
    let client = user_client(&network).await;

    let (registration, _stream) = client
        .register_event("exampleCC", "mash([a-zA-Z]+)")
        .await
        .unwrap();
    assert_eq!(network.listener_count(), 1);

    client.unregister(&registration);
    client.unregister(&registration);
    assert!(registration.is_released());
    assert_eq!(network.listener_count(), 0);

    drop(registration);
    assert_eq!(network.listener_count(), 0);
}

#[tokio::test]
async fn test_chaincode_error_surfaces_from_query() {
    let network = network();
    orchestrator(&network, scenario()).provision().await.unwrap();
    let client = user_client(&network).await;

    let query = TransactionRequest::new("exampleCC", "invoke").with_args(byte_args(&["query", "z"]));
    let err = client.query(&query).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Chaincode { status: 500, .. }));
    assert_eq!(network.call_count(GatewayOperation::Query), 1);
}

#[tokio::test]
async fn test_unsatisfied_policy_rejects_execute_without_retry() {
    let network = network();
    let config = ScenarioConfig {
        peer_organizations: vec!["org1".into(), "org2".into()],
        policy: EndorsementPolicy::signed_by_all_members(&["Org1MSP", "Org2MSP"]),
        ..scenario()
    };
    orchestrator(&network, config).provision().await.unwrap();
    let client = user_client(&network).await;

    // org1 alone can still answer queries.
    let query = TransactionRequest::new("exampleCC", "invoke").with_args(byte_args(&["query", "b"]));
    assert_eq!(client.query(&query).await.unwrap(), b"200");

    let transfer =
        TransactionRequest::new("exampleCC", "invoke").with_args(byte_args(&["move", "a", "b", "1"]));
    let err = client.execute(&transfer).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Endorsement(_)));
    assert_eq!(network.call_count(GatewayOperation::Execute), 1);
    assert_eq!(
        network.ledger_value("orgchannel", "exampleCC", "b"),
        Some(b"200".to_vec())
    );
}

#[tokio::test]
async fn test_query_of_uninstantiated_chaincode_fails_endorsement() {
    let network = network();
    orchestrator(&network, scenario()).provision().await.unwrap();
    let client = user_client(&network).await;

    let query = TransactionRequest::new("otherCC", "invoke").with_args(byte_args(&["query", "b"]));
    let err = client.query(&query).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Endorsement(_)));
    assert_eq!(network.call_count(GatewayOperation::Query), 1);
}
