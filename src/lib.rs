//! Chaincode lifecycle - channel provisioning, chaincode deployment and
//! confirmed transactions for permissioned ledger networks
//!
//! ## Components
//!
//! - **Retry**: exponential backoff around every remote call
//! - **Channel**: create channels from configuration artifacts and join peers
//! - **Chaincode**: package, install, instantiate and upgrade under endorsement policies
//! - **Transaction**: query, execute and confirm through chaincode events
//! - **Orchestrator**: the end-to-end scenario, phase by phase
//! - **Network**: the gateway seam, with in-memory and HTTP implementations

pub mod chaincode;
pub mod channel;
pub mod config;
pub mod logging;
pub mod network;
pub mod orchestrator;
pub mod policy;
pub mod retry;
pub mod transaction;
pub mod types;

pub use config::Args;
pub use orchestrator::{LifecycleOrchestrator, RunFailure, RunReport, ScenarioConfig};
pub use types::{LifecycleError, Result};
