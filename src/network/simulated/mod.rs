//! In-memory ledger network
//!
//! A small consortium (two peer organizations and an orderer organization)
//! with channels, peer joins, chaincode installs and instances, the reference
//! key/value chaincode and asynchronous commits that emit chaincode events.
//!
//! Used by the binary's `--gateway simulated` mode and throughout the tests,
//! which also rely on its fault injection and per-operation call counters.

pub mod chaincode;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use self::chaincode::WorldState;
use super::context::{NetworkContext, SigningIdentity};
use super::gateway::{InstallOutcome, LedgerGateway, Subscription, SubscriptionId};
use crate::chaincode::{ChaincodePackage, DeploymentProposal};
use crate::channel::ChannelDefinition;
use crate::policy::{EndorsementPolicy, MspRole, Principal};
use crate::transaction::{ChaincodeEvent, EventFilter, RequestKind, TransactionRequest};
use crate::types::{LifecycleError, Result, TransactionId};

/// Delay between ordering acceptance and commit when none is configured.
pub const DEFAULT_COMMIT_DELAY: Duration = Duration::from_millis(50);

/// Gateway primitives, for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    ResolveIdentity,
    SaveChannel,
    JoinChannel,
    Install,
    Instantiate,
    Upgrade,
    Query,
    Execute,
    Subscribe,
}

/// Static description of one organization.
#[derive(Debug, Clone)]
pub struct OrganizationSpec {
    pub name: String,
    pub msp_id: String,
    pub peers: Vec<String>,
    pub admins: Vec<String>,
    pub users: Vec<String>,
}

impl OrganizationSpec {
    pub fn new(name: &str, msp_id: &str) -> Self {
        Self {
            name: name.to_string(),
            msp_id: msp_id.to_string(),
            peers: Vec::new(),
            admins: vec!["Admin".to_string()],
            users: Vec::new(),
        }
    }

    pub fn with_peers(mut self, peers: &[&str]) -> Self {
        self.peers = peers.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_users(mut self, users: &[&str]) -> Self {
        self.users = users.iter().map(|u| u.to_string()).collect();
        self
    }
}

#[derive(Debug)]
struct Instance {
    version: String,
    policy: EndorsementPolicy,
    state: WorldState,
}

#[derive(Debug, Default)]
struct ChannelState {
    joined: BTreeSet<String>,
    instances: HashMap<String, Instance>,
    height: u64,
}

#[derive(Debug)]
struct Listener {
    channel_id: String,
    chaincode_id: String,
    filter: EventFilter,
    sender: mpsc::UnboundedSender<ChaincodeEvent>,
}

#[derive(Debug, Default)]
struct NetworkState {
    channels: HashMap<String, ChannelState>,
    /// (organization, chaincode name, version)
    installed: BTreeSet<(String, String, String)>,
    listeners: HashMap<SubscriptionId, Listener>,
    next_subscription: SubscriptionId,
    calls: HashMap<GatewayOperation, u64>,
    faults: HashMap<GatewayOperation, VecDeque<LifecycleError>>,
    join_failures_remaining: u32,
}

/// Writes and event produced at endorsement time, applied at commit.
struct PendingCommit {
    channel_id: String,
    chaincode_id: String,
    version: String,
    transaction_id: TransactionId,
    state: WorldState,
    event: Option<(String, Vec<u8>)>,
}

/// In-memory [`LedgerGateway`].
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    organizations: Arc<Vec<OrganizationSpec>>,
    orderers: Arc<Vec<String>>,
    state: Arc<Mutex<NetworkState>>,
    commit_delay: Duration,
    emit_events: bool,
}

impl Default for SimulatedNetwork {
    fn default() -> Self {
        let organizations = vec![
            OrganizationSpec::new("org1", "Org1MSP")
                .with_peers(&["peer0.org1.example.com", "peer1.org1.example.com"])
                .with_users(&["User1"]),
            OrganizationSpec::new("org2", "Org2MSP")
                .with_peers(&["peer0.org2.example.com", "peer1.org2.example.com"])
                .with_users(&["User1"]),
            OrganizationSpec::new("ordererorg", "OrdererMSP"),
        ];
        Self::new(organizations, vec!["orderer.example.com".to_string()])
    }
}

impl SimulatedNetwork {
    pub fn new(organizations: Vec<OrganizationSpec>, orderers: Vec<String>) -> Self {
        Self {
            organizations: Arc::new(organizations),
            orderers: Arc::new(orderers),
            state: Arc::new(Mutex::new(NetworkState::default())),
            commit_delay: DEFAULT_COMMIT_DELAY,
            emit_events: true,
        }
    }

    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = delay;
        self
    }

    /// Commit transactions without emitting chaincode events.
    pub fn with_events_disabled(mut self) -> Self {
        self.emit_events = false;
        self
    }

    /// The first `failures` join attempts report the channel as not yet
    /// available, as if the genesis block had not reached the peers.
    pub fn with_join_propagation_failures(self, failures: u32) -> Self {
        self.lock().join_failures_remaining = failures;
        self
    }

    /// Make the next `times` calls of `operation` fail with `error`.
    pub fn fail_next(&self, operation: GatewayOperation, error: LifecycleError, times: usize) {
        let mut state = self.lock();
        let queue = state.faults.entry(operation).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// How many times `operation` has been called.
    pub fn call_count(&self, operation: GatewayOperation) -> u64 {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// A channel configuration artifact this network accepts for `channel_id`.
    pub fn channel_config_artifact(&self, channel_id: &str) -> Vec<u8> {
        let members: Vec<&str> = self
            .organizations
            .iter()
            .filter(|o| !o.peers.is_empty())
            .map(|o| o.msp_id.as_str())
            .collect();
        format!(
            "configtx\nchannel={}\nconsortium=SampleConsortium\nmembers={}\n",
            channel_id,
            members.join(",")
        )
        .into_bytes()
    }

    /// Current committed value of `key` for a chaincode, bypassing endorsement.
    pub fn ledger_value(&self, channel_id: &str, chaincode_id: &str, key: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        state
            .channels
            .get(channel_id)?
            .instances
            .get(chaincode_id)?
            .state
            .get(key)
            .cloned()
    }

    /// Number of live event listeners.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Organizations whose peers have joined `channel_id`.
    pub fn joined_organizations(&self, channel_id: &str) -> Vec<String> {
        self.lock()
            .channels
            .get(channel_id)
            .map(|c| c.joined.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Active chaincode version on a channel.
    pub fn active_version(&self, channel_id: &str, chaincode_id: &str) -> Option<String> {
        let state = self.lock();
        state
            .channels
            .get(channel_id)?
            .instances
            .get(chaincode_id)
            .map(|i| i.version.clone())
    }

    // A poisoned lock only means a test thread panicked mid-update; the
    // simulated state is still usable.
    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and surface an injected fault, if any.
    fn enter(&self, operation: GatewayOperation) -> Result<()> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_insert(0) += 1;
        match state.faults.get_mut(&operation).and_then(|q| q.pop_front()) {
            Some(err) => {
                debug!(?operation, error = %err, "Injected fault");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn organization(&self, name: &str) -> Option<&OrganizationSpec> {
        self.organizations.iter().find(|o| o.name == name)
    }

    fn organization_by_msp(&self, msp_id: &str) -> Option<&OrganizationSpec> {
        self.organizations.iter().find(|o| o.msp_id == msp_id)
    }

    fn known_msp_ids(&self) -> Vec<&str> {
        self.organizations
            .iter()
            .filter(|o| !o.peers.is_empty())
            .map(|o| o.msp_id.as_str())
            .collect()
    }

    /// The context's identity must be a known admin of the context's organization.
    fn require_org_admin(&self, ctx: &NetworkContext, action: &str) -> Result<&OrganizationSpec> {
        let identity = ctx.identity();
        let org = self.organization(ctx.organization()).ok_or_else(|| {
            LifecycleError::Configuration(format!("unknown organization {}", ctx.organization()))
        })?;
        if identity.organization != org.name
            || !identity.is_admin()
            || !org.admins.contains(&identity.user)
        {
            return Err(LifecycleError::Authorization(format!(
                "{} is not an admin of {} and cannot {}",
                identity.user, org.name, action
            )));
        }
        Ok(org)
    }

    fn require_orderer(&self, endpoint: &str) -> Result<()> {
        if self.orderers.iter().any(|o| o == endpoint) {
            Ok(())
        } else {
            Err(LifecycleError::Configuration(format!(
                "unknown orderer endpoint {endpoint}"
            )))
        }
    }

    /// Peers targeted by `ctx`: its explicit endpoints, or every peer of the org.
    fn target_peers(&self, ctx: &NetworkContext, org: &OrganizationSpec) -> Result<Vec<String>> {
        if ctx.endpoints().is_empty() {
            return Ok(org.peers.clone());
        }
        for endpoint in ctx.endpoints() {
            if !org.peers.contains(endpoint) {
                return Err(LifecycleError::Configuration(format!(
                    "{} is not a peer of {}",
                    endpoint, org.name
                )));
            }
        }
        Ok(ctx.endpoints().to_vec())
    }

    fn bound_channel(ctx: &NetworkContext) -> Result<&str> {
        ctx.channel_id().ok_or_else(|| {
            LifecycleError::Configuration("context is not bound to a channel".to_string())
        })
    }

    fn transaction_id(identity: &SigningIdentity) -> TransactionId {
        let mut hasher = Sha256::new();
        hasher.update(Uuid::new_v4().as_bytes());
        hasher.update(identity.msp_id.as_bytes());
        hasher.update(identity.user.as_bytes());
        TransactionId::new(hex::encode(hasher.finalize()))
    }

    /// Shared install check for instantiate and upgrade.
    fn require_installed(
        state: &NetworkState,
        organization: &str,
        name: &str,
        version: &str,
    ) -> Result<()> {
        let key = (organization.to_string(), name.to_string(), version.to_string());
        if state.installed.contains(&key) {
            Ok(())
        } else {
            Err(LifecycleError::NotInstalled {
                name: name.to_string(),
                version: version.to_string(),
                organization: organization.to_string(),
            })
        }
    }

    /// Principals of every peer that would endorse `chaincode_id` on `channel`.
    fn endorsers(
        &self,
        state: &NetworkState,
        channel: &ChannelState,
        chaincode_id: &str,
        version: &str,
    ) -> Vec<Principal> {
        channel
            .joined
            .iter()
            .filter(|org| {
                state.installed.contains(&(
                    (*org).clone(),
                    chaincode_id.to_string(),
                    version.to_string(),
                ))
            })
            .filter_map(|org| self.organization(org))
            .map(|org| Principal::new(org.msp_id.clone(), MspRole::Peer))
            .collect()
    }

    /// Simulate `request` against a copy of the chaincode state.
    fn simulate(
        &self,
        ctx: &NetworkContext,
        request: &TransactionRequest,
        kind: RequestKind,
    ) -> Result<(PendingCommit, Vec<u8>)> {
        let channel_id = Self::bound_channel(ctx)?;
        let state = self.lock();
        let channel = state.channels.get(channel_id).ok_or_else(|| {
            LifecycleError::Configuration(format!("channel {channel_id} does not exist"))
        })?;
        let instance = channel.instances.get(&request.chaincode_id).ok_or_else(|| {
            LifecycleError::Endorsement(format!(
                "chaincode {} is not instantiated on {}",
                request.chaincode_id, channel_id
            ))
        })?;

        let endorsers = self.endorsers(&state, channel, &request.chaincode_id, &instance.version);
        match kind {
            RequestKind::Query => {
                // A query needs any one peer with the active version.
                if endorsers.is_empty() {
                    return Err(LifecycleError::Endorsement(format!(
                        "no joined peer has {}:{} installed",
                        request.chaincode_id, instance.version
                    )));
                }
            }
            RequestKind::Execute => {
                if !instance.policy.is_satisfied_by(&endorsers) {
                    return Err(LifecycleError::Endorsement(format!(
                        "endorsements from {} do not satisfy policy {}",
                        endorsers
                            .iter()
                            .map(|p| p.msp_id.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                        instance.policy
                    )));
                }
            }
        }

        let mut scratch = instance.state.clone();
        let invocation = chaincode::invoke(&mut scratch, &request.function, &request.args)?;

        let pending = PendingCommit {
            channel_id: channel_id.to_string(),
            chaincode_id: request.chaincode_id.clone(),
            version: instance.version.clone(),
            transaction_id: Self::transaction_id(ctx.identity()),
            state: scratch,
            event: invocation.event,
        };
        Ok((pending, invocation.payload))
    }

    fn commit(state: &Arc<Mutex<NetworkState>>, pending: PendingCommit, emit_events: bool) {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        let NetworkState {
            channels,
            listeners,
            ..
        } = &mut *state;

        let Some(channel) = channels.get_mut(&pending.channel_id) else {
            return;
        };
        channel.height += 1;
        let block_number = channel.height - 1;

        match channel.instances.get_mut(&pending.chaincode_id) {
            Some(instance) if instance.version == pending.version => {
                instance.state = pending.state;
            }
            _ => {
                debug!(
                    tx_id = %pending.transaction_id,
                    chaincode = %pending.chaincode_id,
                    "Chaincode version changed before commit, transaction invalidated"
                );
                return;
            }
        }
        debug!(
            tx_id = %pending.transaction_id,
            channel = %pending.channel_id,
            block = block_number,
            "Committed transaction"
        );

        let Some((event_name, payload)) = pending.event else {
            return;
        };
        if !emit_events {
            return;
        }
        let event = ChaincodeEvent {
            chaincode_id: pending.chaincode_id.clone(),
            event_name,
            payload,
            transaction_id: Some(pending.transaction_id.clone()),
            block_number: Some(block_number),
        };
        listeners.retain(|_, listener| {
            let interested = listener.channel_id == pending.channel_id
                && listener.chaincode_id == event.chaincode_id
                && listener.filter.matches(&event.event_name);
            // Drop listeners whose stream has gone away.
            !interested || listener.sender.send(event.clone()).is_ok()
        });
    }

    fn deploy(
        &self,
        ctx: &NetworkContext,
        channel_id: &str,
        proposal: &DeploymentProposal,
        upgrade: bool,
    ) -> Result<TransactionId> {
        let action = if upgrade { "upgrade chaincode" } else { "instantiate chaincode" };
        let org = self.require_org_admin(ctx, action)?;
        proposal.policy.validate_against(&self.known_msp_ids())?;

        let mut state = self.lock();
        let channel = state.channels.get(channel_id).ok_or_else(|| {
            LifecycleError::Configuration(format!("channel {channel_id} does not exist"))
        })?;
        if !channel.joined.contains(&org.name) {
            return Err(LifecycleError::Configuration(format!(
                "{} has not joined channel {}",
                org.name, channel_id
            )));
        }

        match (channel.instances.get(&proposal.name), upgrade) {
            (Some(_), false) => {
                return Err(LifecycleError::AlreadyInstantiated {
                    channel_id: channel_id.to_string(),
                    name: proposal.name.clone(),
                })
            }
            (None, true) => {
                return Err(LifecycleError::Configuration(format!(
                    "chaincode {} is not instantiated on {}, nothing to upgrade",
                    proposal.name, channel_id
                )))
            }
            (Some(active), true) if active.version == proposal.version => {
                return Err(LifecycleError::AlreadyInstantiated {
                    channel_id: channel_id.to_string(),
                    name: proposal.name.clone(),
                })
            }
            _ => {}
        }

        Self::require_installed(&state, &org.name, &proposal.name, &proposal.version)?;
        if upgrade {
            for msp_id in proposal.policy.organizations() {
                let Some(member) = self.organization_by_msp(&msp_id) else {
                    continue;
                };
                Self::require_installed(&state, &member.name, &proposal.name, &proposal.version)?;
            }
        }

        let mut world = WorldState::new();
        chaincode::init(&mut world, &proposal.args)?;

        let tx_id = Self::transaction_id(ctx.identity());
        let channel = state
            .channels
            .get_mut(channel_id)
            .ok_or_else(|| LifecycleError::Configuration(format!("channel {channel_id} vanished")))?;
        channel.instances.insert(
            proposal.name.clone(),
            Instance {
                version: proposal.version.clone(),
                policy: proposal.policy.clone(),
                state: world,
            },
        );
        channel.height += 1;

        info!(
            channel = %channel_id,
            chaincode = %proposal.name,
            version = %proposal.version,
            upgrade,
            "Simulated network activated chaincode"
        );
        Ok(tx_id)
    }
}

#[async_trait]
impl LedgerGateway for SimulatedNetwork {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn resolve_signing_identity(
        &self,
        organization: &str,
        user: &str,
    ) -> Result<SigningIdentity> {
        self.enter(GatewayOperation::ResolveIdentity)?;
        let unknown = || LifecycleError::Identity {
            organization: organization.to_string(),
            user: user.to_string(),
        };

        let org = self.organization(organization).ok_or_else(unknown)?;
        let role = if org.admins.iter().any(|a| a == user) {
            MspRole::Admin
        } else if org.users.iter().any(|u| u == user) {
            MspRole::Member
        } else {
            return Err(unknown());
        };
        Ok(SigningIdentity::new(user, &org.name, &org.msp_id, role))
    }

    async fn save_channel(
        &self,
        ctx: &NetworkContext,
        definition: &ChannelDefinition,
        orderer_endpoint: &str,
    ) -> Result<TransactionId> {
        self.enter(GatewayOperation::SaveChannel)?;
        self.require_orderer(orderer_endpoint)?;
        self.require_org_admin(ctx, "create channels")?;

        let marker = format!("channel={}\n", definition.channel_id);
        let describes_channel = definition
            .config_tx
            .windows(marker.len())
            .any(|w| w == marker.as_bytes());
        if !describes_channel {
            return Err(LifecycleError::Configuration(format!(
                "configuration transaction does not describe channel {}",
                definition.channel_id
            )));
        }
        for signer in &definition.signers {
            if self.organization_by_msp(&signer.msp_id).is_none() {
                return Err(LifecycleError::Authorization(format!(
                    "signer {} belongs to unknown MSP {}",
                    signer.user, signer.msp_id
                )));
            }
        }

        let mut state = self.lock();
        if state.channels.contains_key(&definition.channel_id) {
            return Err(LifecycleError::AlreadyExists {
                channel_id: definition.channel_id.clone(),
            });
        }
        state.channels.insert(
            definition.channel_id.clone(),
            ChannelState {
                height: 1,
                ..Default::default()
            },
        );
        Ok(Self::transaction_id(ctx.identity()))
    }

    async fn join_channel(
        &self,
        ctx: &NetworkContext,
        channel_id: &str,
        orderer_endpoint: &str,
    ) -> Result<()> {
        self.enter(GatewayOperation::JoinChannel)?;
        self.require_orderer(orderer_endpoint)?;
        let org = self.require_org_admin(ctx, "join channels")?;
        let peers = self.target_peers(ctx, org)?;

        let mut state = self.lock();
        if state.join_failures_remaining > 0 {
            state.join_failures_remaining -= 1;
            return Err(LifecycleError::ServiceUnavailable(format!(
                "genesis block for {channel_id} not yet available from {orderer_endpoint}"
            )));
        }
        let channel = state.channels.get_mut(channel_id).ok_or_else(|| {
            LifecycleError::Configuration(format!("channel {channel_id} does not exist"))
        })?;
        if !channel.joined.insert(org.name.clone()) {
            debug!(channel = %channel_id, organization = %org.name, "Peers already joined");
        }
        debug!(channel = %channel_id, peers = ?peers, "Peers joined");
        Ok(())
    }

    async fn install_chaincode(
        &self,
        ctx: &NetworkContext,
        package: &ChaincodePackage,
    ) -> Result<InstallOutcome> {
        self.enter(GatewayOperation::Install)?;
        let org = self.require_org_admin(ctx, "install chaincode")?;
        let peers = self.target_peers(ctx, org)?;
        let channel_id = Self::bound_channel(ctx)?;

        if hex::encode(Sha256::digest(&package.archive)) != package.digest {
            return Err(LifecycleError::Package(format!(
                "package {}:{} digest does not match its archive",
                package.name, package.version
            )));
        }

        let mut state = self.lock();
        let joined = state
            .channels
            .get(channel_id)
            .is_some_and(|c| c.joined.contains(&org.name));
        if !joined {
            return Err(LifecycleError::Configuration(format!(
                "{} must join channel {} before installing chaincode",
                org.name, channel_id
            )));
        }

        let key = (
            org.name.clone(),
            package.name.clone(),
            package.version.clone(),
        );
        if !state.installed.insert(key) {
            return Ok(InstallOutcome::AlreadyInstalled);
        }
        debug!(chaincode = %package.name, version = %package.version, peers = ?peers, "Installed");
        Ok(InstallOutcome::Installed)
    }

    async fn instantiate_chaincode(
        &self,
        ctx: &NetworkContext,
        channel_id: &str,
        proposal: &DeploymentProposal,
    ) -> Result<TransactionId> {
        self.enter(GatewayOperation::Instantiate)?;
        self.deploy(ctx, channel_id, proposal, false)
    }

    async fn upgrade_chaincode(
        &self,
        ctx: &NetworkContext,
        channel_id: &str,
        proposal: &DeploymentProposal,
    ) -> Result<TransactionId> {
        self.enter(GatewayOperation::Upgrade)?;
        self.deploy(ctx, channel_id, proposal, true)
    }

    async fn query(&self, ctx: &NetworkContext, request: &TransactionRequest) -> Result<Vec<u8>> {
        self.enter(GatewayOperation::Query)?;
        let (_discarded, payload) = self.simulate(ctx, request, RequestKind::Query)?;
        Ok(payload)
    }

    async fn execute(
        &self,
        ctx: &NetworkContext,
        request: &TransactionRequest,
    ) -> Result<TransactionId> {
        self.enter(GatewayOperation::Execute)?;
        let (pending, _payload) = self.simulate(ctx, request, RequestKind::Execute)?;
        let tx_id = pending.transaction_id.clone();

        let state = Arc::clone(&self.state);
        let delay = self.commit_delay;
        let emit_events = self.emit_events;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::commit(&state, pending, emit_events);
        });

        Ok(tx_id)
    }

    async fn subscribe(
        &self,
        ctx: &NetworkContext,
        chaincode_id: &str,
        filter: &EventFilter,
    ) -> Result<Subscription> {
        self.enter(GatewayOperation::Subscribe)?;
        let channel_id = Self::bound_channel(ctx)?;

        let (sender, events) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if !state.channels.contains_key(channel_id) {
            return Err(LifecycleError::Subscription(format!(
                "channel {channel_id} does not exist"
            )));
        }
        state.next_subscription += 1;
        let id = state.next_subscription;
        state.listeners.insert(
            id,
            Listener {
                channel_id: channel_id.to_string(),
                chaincode_id: chaincode_id.to_string(),
                filter: filter.clone(),
                sender,
            },
        );
        Ok(Subscription { id, events })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.lock().listeners.remove(&id).is_some() {
            debug!(subscription = id, "Listener removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::byte_args;

    async fn provisioned() -> (SimulatedNetwork, NetworkContext) {
        let network = SimulatedNetwork::default().with_commit_delay(Duration::from_millis(1));
        let orderer = network
            .resolve_signing_identity("ordererorg", "Admin")
            .await
            .unwrap();
        let admin = network
            .resolve_signing_identity("org1", "Admin")
            .await
            .unwrap();
        let orderer_ctx = NetworkContext::new(orderer, "ordererorg");
        let admin_ctx = NetworkContext::new(admin.clone(), "org1");

        let definition = ChannelDefinition::new(
            "orgchannel",
            network.channel_config_artifact("orgchannel"),
            vec![admin],
        );
        network
            .save_channel(&orderer_ctx, &definition, "orderer.example.com")
            .await
            .unwrap();
        network
            .join_channel(&admin_ctx, "orgchannel", "orderer.example.com")
            .await
            .unwrap();
        (network, admin_ctx.with_channel("orgchannel"))
    }

    fn package(version: &str) -> ChaincodePackage {
        let archive = b"example_cc".to_vec();
        ChaincodePackage {
            name: "exampleCC".into(),
            path: "example_cc".into(),
            version: version.into(),
            digest: hex::encode(Sha256::digest(&archive)),
            archive,
        }
    }

    fn proposal(version: &str, policy: EndorsementPolicy) -> DeploymentProposal {
        DeploymentProposal {
            name: "exampleCC".into(),
            path: "example_cc".into(),
            version: version.into(),
            args: byte_args(&["init", "a", "100", "b", "200"]),
            policy,
        }
    }

    #[tokio::test]
    async fn test_unknown_user_is_identity_error() {
        let network = SimulatedNetwork::default();
        let result = network.resolve_signing_identity("org1", "Mallory").await;
        assert!(matches!(result, Err(LifecycleError::Identity { .. })));
        let result = network.resolve_signing_identity("org9", "Admin").await;
        assert!(matches!(result, Err(LifecycleError::Identity { .. })));
    }

    #[tokio::test]
    async fn test_artifact_for_other_channel_rejected() {
        let network = SimulatedNetwork::default();
        let admin = network
            .resolve_signing_identity("ordererorg", "Admin")
            .await
            .unwrap();
        let ctx = NetworkContext::new(admin.clone(), "ordererorg");
        let definition = ChannelDefinition::new(
            "orgchannel",
            network.channel_config_artifact("otherchannel"),
            vec![admin],
        );

        let result = network
            .save_channel(&ctx, &definition, "orderer.example.com")
            .await;
        assert!(matches!(result, Err(LifecycleError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_install_requires_joined_channel() {
        let (network, ctx) = provisioned().await;
        let elsewhere = ctx.with_channel("otherchannel");

        let result = network.install_chaincode(&elsewhere, &package("0")).await;
        assert!(matches!(result, Err(LifecycleError::Configuration(_))));

        assert_eq!(
            network.install_chaincode(&ctx, &package("0")).await.unwrap(),
            InstallOutcome::Installed
        );
        assert_eq!(
            network.install_chaincode(&ctx, &package("0")).await.unwrap(),
            InstallOutcome::AlreadyInstalled
        );
    }

    #[tokio::test]
    async fn test_instantiate_checks() {
        let (network, ctx) = provisioned().await;
        let policy = EndorsementPolicy::signed_by_any_member(&["Org1MSP"]);

        let result = network
            .instantiate_chaincode(&ctx, "orgchannel", &proposal("0", policy.clone()))
            .await;
        assert!(matches!(result, Err(LifecycleError::NotInstalled { .. })));

        network.install_chaincode(&ctx, &package("0")).await.unwrap();
        let unknown = EndorsementPolicy::signed_by_any_member(&["Org9MSP"]);
        let result = network
            .instantiate_chaincode(&ctx, "orgchannel", &proposal("0", unknown))
            .await;
        assert!(matches!(result, Err(LifecycleError::Policy(_))));

        network
            .instantiate_chaincode(&ctx, "orgchannel", &proposal("0", policy.clone()))
            .await
            .unwrap();
        assert_eq!(
            network.ledger_value("orgchannel", "exampleCC", "b"),
            Some(b"200".to_vec())
        );
    }

    #[tokio::test]
    async fn test_execute_commits_and_notifies() {
        let (network, ctx) = provisioned().await;
        let policy = EndorsementPolicy::signed_by_any_member(&["Org1MSP"]);
        network.install_chaincode(&ctx, &package("0")).await.unwrap();
        network
            .instantiate_chaincode(&ctx, "orgchannel", &proposal("0", policy))
            .await
            .unwrap();

        let filter = EventFilter::new("mash([a-zA-Z]+)").unwrap();
        let mut sub = network.subscribe(&ctx, "exampleCC", &filter).await.unwrap();

        let request = TransactionRequest::new("exampleCC", "invoke")
            .with_args(byte_args(&["move", "a", "b", "1"]));
        let tx_id = network.execute(&ctx, &request).await.unwrap();

        let event = sub.events.recv().await.unwrap();
        assert_eq!(event.transaction_id, Some(tx_id));
        assert_eq!(event.event_name, "mashTransfer");
        assert_eq!(
            network.ledger_value("orgchannel", "exampleCC", "b"),
            Some(b"201".to_vec())
        );

        network.unsubscribe(sub.id);
        network.unsubscribe(sub.id);
        assert_eq!(network.listener_count(), 0);
        assert!(sub.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_fault_is_consumed() {
        let network = SimulatedNetwork::default();
        network.fail_next(
            GatewayOperation::ResolveIdentity,
            LifecycleError::Transport("connection reset".into()),
            1,
        );

        assert!(network.resolve_signing_identity("org1", "Admin").await.is_err());
        assert!(network.resolve_signing_identity("org1", "Admin").await.is_ok());
        assert_eq!(network.call_count(GatewayOperation::ResolveIdentity), 2);
    }
}
