//! Relay connection
//!
//! The relay RPC surface is abstracted behind two traits:
//! - [`RelayConnector`] opens a logical connection with a bearer token
//! - [`RelayConnection`] is the open hub, plus a [`TransportEvent`] stream
//!
//! [`RelayConnectionController`] keeps exactly one of these alive.

use crate::error::Result;
use crate::manifest::CharacterManifest;
use crate::protocol::{
    ConnectionDescriptor, GroupData, GroupFullInfoDto, GroupPairFullInfoDto, OnlineUserIdentDto,
    RelayEvent, UserData, UserPairDto,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod auth;
pub mod callbacks;
pub mod controller;
pub mod retry;

pub use auth::{AuthTokenSource, HttpAuthClient, TokenCache, TokenKey};
pub use controller::RelayConnectionController;
pub use retry::{random_reconnect_delay, ForeverRetryPolicy};

/// Transport-level notifications
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Server push
    Push(RelayEvent),
    /// The transport lost its link and is retrying on its own
    Reconnecting,
    /// The transport re-established its link
    Reconnected,
    /// The transport gave up
    Closed,
}

/// An open relay hub
#[async_trait]
pub trait RelayConnection: Send + Sync {
    async fn get_connection_descriptor(&self) -> Result<ConnectionDescriptor>;

    /// `Ok(false)` means the server answered but considers the session dead.
    async fn health_check(&self) -> Result<bool>;

    async fn get_paired_users(&self) -> Result<Vec<UserPairDto>>;

    async fn get_all_groups(&self) -> Result<Vec<GroupFullInfoDto>>;

    async fn get_group_members(&self, group: &GroupData) -> Result<Vec<GroupPairFullInfoDto>>;

    async fn get_online_peers(&self) -> Result<Vec<OnlineUserIdentDto>>;

    async fn push_manifest(&self, manifest: &CharacterManifest, recipients: &[UserData]) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Opens relay connections
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        token: &str,
        retry: ForeverRetryPolicy,
    ) -> Result<(Box<dyn RelayConnection>, mpsc::Receiver<TransportEvent>)>;
}
