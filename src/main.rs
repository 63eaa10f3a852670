//! Chaincode lifecycle runner
//!
//! Provisions (optionally), transacts and verifies against the configured
//! gateway. Exits non-zero when any run fails.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chaincode_lifecycle::{
    config::{Args, GatewayKind},
    logging::{self, ReportLogger},
    network::{HttpGateway, LedgerGateway, SimulatedNetwork},
    LifecycleOrchestrator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(2);
    }

    let scenario = args.scenario().context("invalid scenario configuration")?;
    let gateway: Arc<dyn LedgerGateway> = match args.gateway {
        GatewayKind::Simulated => Arc::new(SimulatedNetwork::default()),
        GatewayKind::Http => {
            let base_url = args
                .gateway_url
                .clone()
                .context("GATEWAY_URL is required for the http gateway")?;
            let events_url = args.events_url().unwrap_or_else(|| base_url.clone());
            Arc::new(
                HttpGateway::with_timeout(base_url, events_url, args.request_timeout())
                    .context("cannot create HTTP gateway")?,
            )
        }
    };

    info!("======================================");
    info!("  Chaincode lifecycle runner");
    info!("======================================");
    info!("Gateway: {}", gateway.name());
    info!("Channel: {}", scenario.channel_id);
    info!("Chaincode: {}:{}", scenario.chaincode_id, scenario.chaincode_version);
    info!("Policy: {}", scenario.policy);
    info!("Setup: {}", args.setup);
    info!("======================================");

    let reports = ReportLogger::new();
    if let Some(path) = args.report_file.clone() {
        reports
            .init_file(path)
            .await
            .context("cannot open report file")?;
    }

    // Ctrl-C aborts in-flight retries and event waits
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling run");
            on_signal.cancel();
        }
    });

    let orchestrator = LifecycleOrchestrator::new(Arc::clone(&gateway), scenario)
        .with_retry(args.retry_policy())
        .with_cancellation(cancel);

    let outcome = orchestrator.run(args.setup).await;
    reports.log_outcome(gateway.name(), "transfer", &outcome).await;
    let report = outcome.context("lifecycle run failed")?;
    info!(before = %report.before, after = %report.after, "Funds moved");

    if args.upgrade {
        let upgrade = args.upgrade_config().context("invalid upgrade configuration")?;
        let tx_id = orchestrator
            .upgrade(&upgrade)
            .await
            .context("chaincode upgrade failed")?;
        info!(tx_id = %tx_id, version = %upgrade.version, policy = %upgrade.policy, "Chaincode upgraded");

        let outcome = orchestrator.run(false).await;
        reports.log_outcome(gateway.name(), "upgrade", &outcome).await;
        let report = outcome.context("run after upgrade failed")?;
        info!(before = %report.before, after = %report.after, "Funds moved after upgrade");
    }

    Ok(())
}
