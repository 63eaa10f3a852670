//! Chaincode packaging and deployment
//!
//! - `package` - deterministic packages built from a source directory
//! - `deployer` - install, instantiate and upgrade with endorsement policies

pub mod deployer;
pub mod package;

pub use deployer::ChaincodeDeployer;
pub use package::ChaincodePackage;

use serde::{Deserialize, Serialize};

use crate::policy::EndorsementPolicy;

/// Everything needed to activate a chaincode version on a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentProposal {
    pub name: String,
    pub path: String,
    pub version: String,
    /// Arguments handed to the chaincode's init handler
    #[serde(with = "crate::types::base64_byte_list")]
    pub args: Vec<Vec<u8>>,
    pub policy: EndorsementPolicy,
}
