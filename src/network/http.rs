//! HTTP gateway client
//!
//! Talks JSON to a ledger gateway service that fronts the peers and the
//! ordering service. Every primitive is one POST; chaincode events arrive over
//! a WebSocket, one JSON text frame per event.
//!
//! Error responses carry a `{kind, message}` body which maps back onto
//! [`LifecycleError`]. Responses without a readable body fall back to the
//! HTTP status (503 is `ServiceUnavailable`, other 5xx are `Transport`).

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::context::{NetworkContext, SigningIdentity};
use super::gateway::{InstallOutcome, LedgerGateway, Subscription, SubscriptionId};
use crate::chaincode::{ChaincodePackage, DeploymentProposal};
use crate::channel::ChannelDefinition;
use crate::transaction::{ChaincodeEvent, EventFilter, TransactionRequest};
use crate::types::{LifecycleError, Result, TransactionId};

/// Default timeout for a single gateway request
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error body returned by the gateway service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

impl RemoteError {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
            channel_id: None,
            name: None,
            version: None,
            organization: None,
            status: None,
        }
    }

    /// Map the wire body onto the local error taxonomy.
    pub fn into_error(self, http_status: StatusCode) -> LifecycleError {
        let Self {
            kind,
            message,
            channel_id,
            name,
            version,
            organization,
            status,
        } = self;

        match kind.as_str() {
            "configuration" => LifecycleError::Configuration(message),
            "authorization" => LifecycleError::Authorization(message),
            "already_exists" => LifecycleError::AlreadyExists {
                channel_id: channel_id.unwrap_or(message),
            },
            "join" => LifecycleError::Join {
                channel_id: channel_id.unwrap_or_default(),
                organization: organization.unwrap_or_default(),
                reason: message,
            },
            "package" => LifecycleError::Package(message),
            "already_instantiated" => LifecycleError::AlreadyInstantiated {
                channel_id: channel_id.unwrap_or_default(),
                name: name.unwrap_or(message),
            },
            "policy" => LifecycleError::Policy(message),
            "not_installed" => LifecycleError::NotInstalled {
                name: name.unwrap_or_default(),
                version: version.unwrap_or_default(),
                organization: organization.unwrap_or(message),
            },
            "endorsement" => LifecycleError::Endorsement(message),
            "ordering" => LifecycleError::Ordering(message),
            "chaincode" => LifecycleError::Chaincode {
                status: status.unwrap_or(500),
                message,
            },
            "identity" => LifecycleError::Identity {
                organization: organization.unwrap_or_default(),
                user: name.unwrap_or(message),
            },
            "service_unavailable" => LifecycleError::ServiceUnavailable(message),
            "transport" => LifecycleError::Transport(message),
            "subscription" => LifecycleError::Subscription(message),
            other => fallback_error(http_status, format!("{other}: {message}")),
        }
    }
}

fn fallback_error(status: StatusCode, message: String) -> LifecycleError {
    match status {
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS => {
            LifecycleError::ServiceUnavailable(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LifecycleError::Authorization(message),
        s if s.is_server_error() => LifecycleError::Transport(message),
        _ => LifecycleError::Configuration(message),
    }
}

#[derive(Debug, Serialize)]
struct ResolveIdentityBody<'a> {
    organization: &'a str,
    user: &'a str,
}

#[derive(Debug, Serialize)]
struct SaveChannelBody<'a> {
    context: &'a NetworkContext,
    definition: &'a ChannelDefinition,
    orderer: &'a str,
}

#[derive(Debug, Serialize)]
struct JoinChannelBody<'a> {
    context: &'a NetworkContext,
    orderer: &'a str,
}

#[derive(Debug, Serialize)]
struct InstallBody<'a> {
    context: &'a NetworkContext,
    package: &'a ChaincodePackage,
}

#[derive(Debug, Serialize)]
struct DeployBody<'a> {
    context: &'a NetworkContext,
    proposal: &'a DeploymentProposal,
}

#[derive(Debug, Serialize)]
struct InvokeBody<'a> {
    context: &'a NetworkContext,
    request: &'a TransactionRequest,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    transaction_id: TransactionId,
}

#[derive(Debug, Deserialize)]
struct InstallResponse {
    outcome: InstallOutcome,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(with = "crate::types::base64_bytes")]
    payload: Vec<u8>,
}

/// [`LedgerGateway`] backed by a remote gateway service.
pub struct HttpGateway {
    client: Client,
    base_url: String,
    events_url: String,
    timeout: Duration,
    next_subscription: AtomicU64,
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, JoinHandle<()>>>>,
}

impl HttpGateway {
    /// Create a gateway client. `events_url` is the WebSocket base (ws:// or wss://).
    pub fn new(base_url: impl Into<String>, events_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, events_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        events_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| LifecycleError::Configuration(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            events_url: events_url.into().trim_end_matches('/').to_string(),
            timeout,
            next_subscription: AtomicU64::new(1),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn channel_path(channel_id: &str, suffix: &str) -> String {
        format!("/channels/{}{}", urlencoding::encode(channel_id), suffix)
    }

    fn bound_channel(ctx: &NetworkContext) -> Result<&str> {
        ctx.channel_id().ok_or_else(|| {
            LifecycleError::Configuration("context is not bound to a channel".to_string())
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(path, body).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| LifecycleError::Transport(format!("invalid response from {path}: {e}")))
    }

    async fn send<B>(&self, path: &str, body: &B) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        debug!(url = %url, "Gateway request");

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let error = match serde_json::from_str::<RemoteError>(&text) {
            Ok(remote) => remote.into_error(status),
            Err(_) => fallback_error(status, format!("{path} returned {status}: {text}")),
        };
        debug!(url = %url, status = %status, error = %error, "Gateway request failed");
        Err(error)
    }

    fn subscriptions(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, JoinHandle<()>>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HttpGateway {
    fn drop(&mut self) {
        for (_, handle) in self.subscriptions().drain() {
            handle.abort();
        }
    }
}

#[async_trait]
impl LedgerGateway for HttpGateway {
    fn name(&self) -> &str {
        "http"
    }

    async fn resolve_signing_identity(
        &self,
        organization: &str,
        user: &str,
    ) -> Result<SigningIdentity> {
        self.post(
            "/identities/resolve",
            &ResolveIdentityBody { organization, user },
        )
        .await
    }

    async fn save_channel(
        &self,
        ctx: &NetworkContext,
        definition: &ChannelDefinition,
        orderer_endpoint: &str,
    ) -> Result<TransactionId> {
        let response: TransactionResponse = self
            .post(
                "/channels",
                &SaveChannelBody {
                    context: ctx,
                    definition,
                    orderer: orderer_endpoint,
                },
            )
            .await?;
        Ok(response.transaction_id)
    }

    async fn join_channel(
        &self,
        ctx: &NetworkContext,
        channel_id: &str,
        orderer_endpoint: &str,
    ) -> Result<()> {
        self.send(
            &Self::channel_path(channel_id, "/join"),
            &JoinChannelBody {
                context: ctx,
                orderer: orderer_endpoint,
            },
        )
        .await?;
        Ok(())
    }

    async fn install_chaincode(
        &self,
        ctx: &NetworkContext,
        package: &ChaincodePackage,
    ) -> Result<InstallOutcome> {
        let response: InstallResponse = self
            .post(
                "/chaincodes/install",
                &InstallBody {
                    context: ctx,
                    package,
                },
            )
            .await?;
        Ok(response.outcome)
    }

    async fn instantiate_chaincode(
        &self,
        ctx: &NetworkContext,
        channel_id: &str,
        proposal: &DeploymentProposal,
    ) -> Result<TransactionId> {
        let response: TransactionResponse = self
            .post(
                &Self::channel_path(channel_id, "/chaincodes/instantiate"),
                &DeployBody {
                    context: ctx,
                    proposal,
                },
            )
            .await?;
        Ok(response.transaction_id)
    }

    async fn upgrade_chaincode(
        &self,
        ctx: &NetworkContext,
        channel_id: &str,
        proposal: &DeploymentProposal,
    ) -> Result<TransactionId> {
        let response: TransactionResponse = self
            .post(
                &Self::channel_path(channel_id, "/chaincodes/upgrade"),
                &DeployBody {
                    context: ctx,
                    proposal,
                },
            )
            .await?;
        Ok(response.transaction_id)
    }

    async fn query(&self, ctx: &NetworkContext, request: &TransactionRequest) -> Result<Vec<u8>> {
        let channel_id = Self::bound_channel(ctx)?;
        let response: QueryResponse = self
            .post(
                &Self::channel_path(channel_id, "/query"),
                &InvokeBody {
                    context: ctx,
                    request,
                },
            )
            .await?;
        Ok(response.payload)
    }

    async fn execute(
        &self,
        ctx: &NetworkContext,
        request: &TransactionRequest,
    ) -> Result<TransactionId> {
        let channel_id = Self::bound_channel(ctx)?;
        let response: TransactionResponse = self
            .post(
                &Self::channel_path(channel_id, "/execute"),
                &InvokeBody {
                    context: ctx,
                    request,
                },
            )
            .await?;
        Ok(response.transaction_id)
    }

    async fn subscribe(
        &self,
        ctx: &NetworkContext,
        chaincode_id: &str,
        filter: &EventFilter,
    ) -> Result<Subscription> {
        let channel_id = Self::bound_channel(ctx)?;
        let url = format!(
            "{}{}?chaincode={}&pattern={}",
            self.events_url,
            Self::channel_path(channel_id, "/events"),
            urlencoding::encode(chaincode_id),
            urlencoding::encode(filter.pattern()),
        );

        let (ws_stream, _) = tokio::time::timeout(self.timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                LifecycleError::Subscription(format!("timeout connecting to event stream {url}"))
            })??;

        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let (sender, events) = mpsc::unbounded_channel();
        let filter = filter.clone();
        let chaincode_id = chaincode_id.to_string();

        let handle = tokio::spawn(async move {
            let (_write, mut read) = ws_stream.split();
            while let Some(message) = read.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(subscription = id, error = %e, "Event stream failed");
                        break;
                    }
                };

                let event: ChaincodeEvent = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(subscription = id, error = %e, "Skipping malformed event frame");
                        continue;
                    }
                };
                if event.chaincode_id != chaincode_id || !filter.matches(&event.event_name) {
                    continue;
                }
                if sender.send(event).is_err() {
                    break;
                }
            }
            debug!(subscription = id, "Event stream closed");
        });

        self.subscriptions().insert(id, handle);
        Ok(Subscription { id, events })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(handle) = self.subscriptions().remove(&id) {
            handle.abort();
            debug!(subscription = id, "Event stream released");
        }
    }
}
