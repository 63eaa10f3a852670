//! Scenario constants as explicit values
//!
//! Defaults reproduce the reference two-organization network: channel
//! `orgchannel`, chaincode `exampleCC` seeded with `a=100, b=200`, and a
//! `move a b 1` transfer confirmed by a `mash*` event.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::policy::EndorsementPolicy;

/// Reference wait for the confirming chaincode event
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(20);

/// Everything one orchestrated run needs to know.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub channel_id: String,
    /// Channel configuration transaction artifact
    pub channel_config_path: PathBuf,
    /// Organization that deploys and transacts
    pub organization: String,
    /// Organizations whose peers join the channel during provisioning
    pub peer_organizations: Vec<String>,
    pub admin_user: String,
    pub user: String,
    pub orderer_organization: String,
    pub orderer_endpoint: String,

    pub chaincode_id: String,
    pub chaincode_path: PathBuf,
    pub chaincode_version: String,
    pub init_args: Vec<String>,
    pub policy: EndorsementPolicy,

    /// Function name of the chaincode contract; arguments pick the operation
    pub function: String,
    pub query_args: Vec<String>,
    pub tx_args: Vec<String>,
    pub event_pattern: String,
    #[serde(with = "duration_millis")]
    pub event_timeout: Duration,
    /// Change the transaction must make to the queried value
    pub expected_delta: i64,
    /// Overall deadline; cancels in-flight retries when it passes
    #[serde(default, with = "optional_duration_millis")]
    pub deadline: Option<Duration>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            channel_id: "orgchannel".to_string(),
            channel_config_path: PathBuf::from("./fixtures/channel/orgchannel.tx"),
            organization: "org1".to_string(),
            peer_organizations: vec!["org1".to_string()],
            admin_user: "Admin".to_string(),
            user: "User1".to_string(),
            orderer_organization: "ordererorg".to_string(),
            orderer_endpoint: "orderer.example.com".to_string(),
            chaincode_id: "exampleCC".to_string(),
            chaincode_path: PathBuf::from("./fixtures/chaincode/example_cc"),
            chaincode_version: "0".to_string(),
            init_args: strings(&["init", "a", "100", "b", "200"]),
            policy: EndorsementPolicy::signed_by_any_member(&["Org1MSP"]),
            function: "invoke".to_string(),
            query_args: strings(&["query", "b"]),
            tx_args: strings(&["move", "a", "b", "1"]),
            event_pattern: "mash([a-zA-Z]+)".to_string(),
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            expected_delta: 1,
            deadline: None,
        }
    }
}

/// A new chaincode version to activate over the running one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    pub version: String,
    pub init_args: Vec<String>,
    pub policy: EndorsementPolicy,
    /// Organizations that install the new version before the upgrade
    pub install_organizations: Vec<String>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            init_args: strings(&["init", "a", "100", "b", "400"]),
            policy: EndorsementPolicy::signed_by_all_members(&["Org1MSP", "Org2MSP"]),
            install_organizations: strings(&["org1", "org2"]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod optional_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_network() {
        let config = ScenarioConfig::default();
        assert_eq!(config.policy.to_string(), "OR('Org1MSP.member')");
        assert_eq!(config.event_timeout, Duration::from_secs(20));
        assert_eq!(config.tx_args, ["move", "a", "b", "1"]);

        let upgrade = UpgradeConfig::default();
        assert_eq!(
            upgrade.policy,
            "AND('Org1MSP.member','Org2MSP.member')"
                .parse::<EndorsementPolicy>()
                .unwrap()
        );
    }

    #[test]
    fn test_config_serializes_durations_as_millis() {
        let config = ScenarioConfig {
            deadline: Some(Duration::from_secs(90)),
            ..Default::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["event_timeout"], 20_000);
        assert_eq!(json["deadline"], 90_000);

        let back: ScenarioConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.deadline, Some(Duration::from_secs(90)));
    }
}
