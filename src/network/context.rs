//! Identities and per-operation network contexts
//!
//! A [`NetworkContext`] is an immutable value: deriving a context for another
//! channel or endpoint set always produces a new value.

use serde::{Deserialize, Serialize};

use crate::policy::{MspRole, Principal};

/// A signing credential resolved by the membership subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningIdentity {
    /// User label within the organization (e.g. "Admin", "User1")
    pub user: String,
    /// Organization name (e.g. "org1")
    pub organization: String,
    /// Membership service provider id (e.g. "Org1MSP")
    pub msp_id: String,
    /// Role the credential carries
    pub role: MspRole,
}

impl SigningIdentity {
    pub fn new(
        user: impl Into<String>,
        organization: impl Into<String>,
        msp_id: impl Into<String>,
        role: MspRole,
    ) -> Self {
        Self {
            user: user.into(),
            organization: organization.into(),
            msp_id: msp_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == MspRole::Admin
    }

    /// The principal this identity signs as.
    pub fn principal(&self) -> Principal {
        Principal::new(self.msp_id.clone(), self.role)
    }
}

/// Identity plus target organization, channel and endpoints for one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkContext {
    identity: SigningIdentity,
    organization: String,
    channel_id: Option<String>,
    endpoints: Vec<String>,
}

impl NetworkContext {
    pub fn new(identity: SigningIdentity, organization: impl Into<String>) -> Self {
        Self {
            identity,
            organization: organization.into(),
            channel_id: None,
            endpoints: Vec::new(),
        }
    }

    /// Derive a context bound to the given channel.
    pub fn with_channel(&self, channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: Some(channel_id.into()),
            ..self.clone()
        }
    }

    /// Derive a context that targets specific endpoints.
    pub fn with_endpoints<S: Into<String>>(&self, endpoints: impl IntoIterator<Item = S>) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..self.clone()
        }
    }

    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}
