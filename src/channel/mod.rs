//! Channel provisioning
//!
//! Creates channels from configuration transaction artifacts and joins
//! organization peers to them.

pub mod provisioner;

pub use provisioner::ChannelProvisioner;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::network::SigningIdentity;
use crate::types::{LifecycleError, Result};

/// A channel configuration ready for submission to the ordering service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    pub channel_id: String,
    /// Opaque configuration transaction produced by an external tool
    #[serde(with = "crate::types::base64_bytes")]
    pub config_tx: Vec<u8>,
    pub signers: Vec<SigningIdentity>,
}

impl ChannelDefinition {
    pub fn new(
        channel_id: impl Into<String>,
        config_tx: Vec<u8>,
        signers: Vec<SigningIdentity>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            config_tx,
            signers,
        }
    }

    /// Load the configuration transaction artifact from disk.
    pub async fn from_file(
        channel_id: impl Into<String>,
        path: impl AsRef<Path>,
        signers: Vec<SigningIdentity>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let config_tx = tokio::fs::read(path).await.map_err(|e| {
            LifecycleError::Configuration(format!(
                "cannot read channel config {}: {}",
                path.display(),
                e
            ))
        })?;
        let definition = Self::new(channel_id, config_tx, signers);
        definition.validate()?;
        Ok(definition)
    }

    /// Local sanity checks before anything is sent to the network.
    pub fn validate(&self) -> Result<()> {
        if self.channel_id.trim().is_empty() {
            return Err(LifecycleError::Configuration(
                "channel id must not be empty".to_string(),
            ));
        }
        if self.config_tx.is_empty() {
            return Err(LifecycleError::Configuration(format!(
                "channel config for {} is empty",
                self.channel_id
            )));
        }
        if self.signers.is_empty() {
            return Err(LifecycleError::Authorization(format!(
                "channel config for {} has no signing identities",
                self.channel_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::MspRole;
    use std::io::Write;

    fn admin() -> SigningIdentity {
        SigningIdentity::new("Admin", "org1", "Org1MSP", MspRole::Admin)
    }

    #[tokio::test]
    async fn test_from_file_reads_artifact() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"orgchannel config").unwrap();

        let definition = ChannelDefinition::from_file("orgchannel", file.path(), vec![admin()])
            .await
            .unwrap();
        assert_eq!(definition.config_tx, b"orgchannel config");
    }

    #[tokio::test]
    async fn test_missing_or_empty_artifact_is_configuration_error() {
        let missing =
            ChannelDefinition::from_file("orgchannel", "/nonexistent/orgchannel.tx", vec![admin()])
                .await;
        assert!(matches!(missing, Err(LifecycleError::Configuration(_))));

        let empty = tempfile::NamedTempFile::new().unwrap();
        let result = ChannelDefinition::from_file("orgchannel", empty.path(), vec![admin()]).await;
        assert!(matches!(result, Err(LifecycleError::Configuration(_))));
    }

    #[test]
    fn test_unsigned_definition_rejected() {
        let definition = ChannelDefinition::new("orgchannel", b"cfg".to_vec(), Vec::new());
        assert!(matches!(
            definition.validate(),
            Err(LifecycleError::Authorization(_))
        ));
    }
}
