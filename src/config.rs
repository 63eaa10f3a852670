//! Configuration for the lifecycle runner
//!
//! CLI arguments and environment variable handling using clap. Every flag has
//! an environment fallback, and a `.env` file is loaded by `main` first.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::orchestrator::{ScenarioConfig, UpgradeConfig};
use crate::policy::EndorsementPolicy;
use crate::retry::RetryPolicy;
use crate::types::Result;

/// Which ledger gateway to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GatewayKind {
    /// In-memory consortium, started empty for every run
    Simulated,
    /// Remote gateway service over HTTP and WebSocket
    Http,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Chaincode lifecycle runner - provision a channel, deploy chaincode and
/// verify a transfer end to end
#[derive(Parser, Debug, Clone)]
#[command(name = "chaincode-lifecycle")]
#[command(about = "Provision channels, deploy chaincode and verify transactions")]
pub struct Args {
    /// Gateway implementation
    #[arg(long, env = "GATEWAY", value_enum, default_value = "simulated")]
    pub gateway: GatewayKind,

    /// Base URL of the gateway service (http gateway only)
    #[arg(long, env = "GATEWAY_URL")]
    pub gateway_url: Option<String>,

    /// WebSocket base URL for chaincode events (http gateway only)
    /// Defaults to GATEWAY_URL with the scheme switched to ws/wss
    #[arg(long, env = "GATEWAY_EVENTS_URL")]
    pub gateway_events_url: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Create the channel, join peers and deploy the chaincode before transacting
    #[arg(long, env = "PERFORM_SETUP", default_value = "false")]
    pub setup: bool,

    /// After the first run, upgrade the chaincode and run again
    #[arg(long, env = "PERFORM_UPGRADE", default_value = "false")]
    pub upgrade: bool,

    /// Channel identifier
    #[arg(long, env = "CHANNEL_ID", default_value = "orgchannel")]
    pub channel_id: String,

    /// Channel configuration transaction artifact
    #[arg(long, env = "CHANNEL_CONFIG", default_value = "./fixtures/channel/orgchannel.tx")]
    pub channel_config: PathBuf,

    /// Organization that deploys and transacts
    #[arg(long, env = "ORG_NAME", default_value = "org1")]
    pub organization: String,

    /// Comma-separated organizations whose peers join the channel
    #[arg(long, env = "PEER_ORGS", default_value = "org1")]
    pub peer_orgs: String,

    /// Admin user label
    #[arg(long, env = "ORG_ADMIN", default_value = "Admin")]
    pub admin_user: String,

    /// Transacting user label
    #[arg(long, env = "ORG_USER", default_value = "User1")]
    pub user: String,

    /// Orderer organization
    #[arg(long, env = "ORDERER_ORG", default_value = "ordererorg")]
    pub orderer_org: String,

    /// Orderer endpoint used for channel creation and joins
    #[arg(long, env = "ORDERER_ENDPOINT", default_value = "orderer.example.com")]
    pub orderer_endpoint: String,

    /// Chaincode identifier
    #[arg(long, env = "CHAINCODE_ID", default_value = "exampleCC")]
    pub chaincode_id: String,

    /// Chaincode source directory
    #[arg(long, env = "CHAINCODE_PATH", default_value = "./fixtures/chaincode/example_cc")]
    pub chaincode_path: PathBuf,

    /// Chaincode version deployed during setup
    #[arg(long, env = "CHAINCODE_VERSION", default_value = "0")]
    pub chaincode_version: String,

    /// Endorsement policy for the initial deployment
    #[arg(long, env = "ENDORSEMENT_POLICY", default_value = "OR('Org1MSP.member')")]
    pub policy: String,

    /// Pattern the confirming chaincode event name must match
    #[arg(long, env = "EVENT_PATTERN", default_value = "mash([a-zA-Z]+)")]
    pub event_pattern: String,

    /// Seconds to wait for the confirming event
    #[arg(long, env = "EVENT_TIMEOUT_SECS", default_value = "20")]
    pub event_timeout_secs: u64,

    /// Expected change of the queried value after the transaction
    #[arg(long, env = "EXPECTED_DELTA", default_value = "1", allow_hyphen_values = true)]
    pub expected_delta: i64,

    /// Overall deadline for each run in seconds (optional)
    #[arg(long, env = "RUN_DEADLINE_SECS")]
    pub deadline_secs: Option<u64>,

    /// Version activated by --upgrade
    #[arg(long, env = "UPGRADE_VERSION", default_value = "1")]
    pub upgrade_version: String,

    /// Endorsement policy activated by --upgrade
    #[arg(
        long,
        env = "UPGRADE_POLICY",
        default_value = "AND('Org1MSP.member','Org2MSP.member')"
    )]
    pub upgrade_policy: String,

    /// Comma-separated organizations that install the upgraded version
    #[arg(long, env = "UPGRADE_ORGS", default_value = "org1,org2")]
    pub upgrade_orgs: String,

    /// Total attempts per remote call, including the first
    #[arg(long, env = "RETRY_ATTEMPTS", default_value = "4")]
    pub retry_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[arg(long, env = "RETRY_INITIAL_BACKOFF_MS", default_value = "500")]
    pub retry_initial_backoff_ms: u64,

    /// Upper bound for a single retry delay in milliseconds
    #[arg(long, env = "RETRY_MAX_BACKOFF_MS", default_value = "60000")]
    pub retry_max_backoff_ms: u64,

    /// Growth factor between retry delays
    #[arg(long, env = "RETRY_BACKOFF_FACTOR", default_value = "2.0")]
    pub retry_backoff_factor: f64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Append a JSON line per run to this file (optional)
    #[arg(long, env = "REPORT_FILE")]
    pub report_file: Option<PathBuf>,
}

impl Args {
    /// Organizations whose peers join the channel, including upgrade installers
    /// when an upgrade is requested.
    pub fn peer_org_list(&self) -> Vec<String> {
        let mut orgs = split_list(&self.peer_orgs);
        if self.upgrade {
            for org in split_list(&self.upgrade_orgs) {
                if !orgs.contains(&org) {
                    orgs.push(org);
                }
            }
        }
        orgs
    }

    /// Events URL, derived from the gateway URL when not given.
    pub fn events_url(&self) -> Option<String> {
        if let Some(ref url) = self.gateway_events_url {
            return Some(url.clone());
        }
        self.gateway_url.as_ref().map(|url| {
            if let Some(rest) = url.strip_prefix("https://") {
                format!("wss://{rest}")
            } else if let Some(rest) = url.strip_prefix("http://") {
                format!("ws://{rest}")
            } else {
                url.clone()
            }
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.gateway == GatewayKind::Http && self.gateway_url.is_none() {
            return Err("GATEWAY_URL is required for the http gateway".to_string());
        }
        if self.gateway == GatewayKind::Simulated && !self.setup {
            return Err(
                "the simulated gateway starts empty; pass --setup to provision it".to_string(),
            );
        }
        if self.retry_attempts == 0 {
            return Err("RETRY_ATTEMPTS must be at least 1".to_string());
        }
        if self.retry_backoff_factor < 1.0 {
            return Err("RETRY_BACKOFF_FACTOR must be at least 1.0".to_string());
        }
        if self.retry_initial_backoff_ms > self.retry_max_backoff_ms {
            return Err(
                "RETRY_INITIAL_BACKOFF_MS must not exceed RETRY_MAX_BACKOFF_MS".to_string(),
            );
        }
        if self.event_timeout_secs == 0 {
            return Err("EVENT_TIMEOUT_SECS must be positive".to_string());
        }
        if split_list(&self.peer_orgs).is_empty() {
            return Err("PEER_ORGS must name at least one organization".to_string());
        }
        Ok(())
    }

    /// The scenario this configuration describes.
    pub fn scenario(&self) -> Result<ScenarioConfig> {
        let defaults = ScenarioConfig::default();
        Ok(ScenarioConfig {
            channel_id: self.channel_id.clone(),
            channel_config_path: self.channel_config.clone(),
            organization: self.organization.clone(),
            peer_organizations: self.peer_org_list(),
            admin_user: self.admin_user.clone(),
            user: self.user.clone(),
            orderer_organization: self.orderer_org.clone(),
            orderer_endpoint: self.orderer_endpoint.clone(),
            chaincode_id: self.chaincode_id.clone(),
            chaincode_path: self.chaincode_path.clone(),
            chaincode_version: self.chaincode_version.clone(),
            policy: parse_policy(&self.policy)?,
            event_pattern: self.event_pattern.clone(),
            event_timeout: Duration::from_secs(self.event_timeout_secs),
            expected_delta: self.expected_delta,
            deadline: self.deadline_secs.map(Duration::from_secs),
            ..defaults
        })
    }

    /// The upgrade performed by `--upgrade`.
    pub fn upgrade_config(&self) -> Result<UpgradeConfig> {
        Ok(UpgradeConfig {
            version: self.upgrade_version.clone(),
            policy: parse_policy(&self.upgrade_policy)?,
            install_organizations: split_list(&self.upgrade_orgs),
            ..UpgradeConfig::default()
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.retry_attempts)
            .with_backoff(
                Duration::from_millis(self.retry_initial_backoff_ms),
                Duration::from_millis(self.retry_max_backoff_ms),
            )
            .with_backoff_factor(self.retry_backoff_factor)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_policy(text: &str) -> Result<EndorsementPolicy> {
    let policy: EndorsementPolicy = text.parse()?;
    policy.validate()?;
    Ok(policy)
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
