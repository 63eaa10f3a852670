//! Network seam
//!
//! - `context` - signing identities and per-operation contexts
//! - `gateway` - the [`LedgerGateway`] trait consumed by every component
//! - `simulated` - in-memory consortium for local runs and tests
//! - `http` - JSON/WebSocket client for a remote gateway service

pub mod context;
pub mod gateway;
pub mod http;
pub mod simulated;

pub use context::{NetworkContext, SigningIdentity};
pub use gateway::{InstallOutcome, LedgerGateway, Subscription, SubscriptionId};
pub use http::{HttpGateway, RemoteError};
pub use simulated::{GatewayOperation, OrganizationSpec, SimulatedNetwork};
