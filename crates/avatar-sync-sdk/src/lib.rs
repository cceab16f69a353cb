//! Avatar Sync SDK - appearance capture and relay synchronization
//!
//! This SDK provides:
//! - resolution of a live appearance graph into a deduplicated file manifest
//! - coalesced, hash-gated republishing when the appearance changes
//! - a peer directory with pair and group permissions
//! - permission-filtered application of manifests received from peers
//! - one resilient, authenticated relay connection with full resync
//!
//! # Quick start
//!
//! ```rust,no_run
//! use avatar_sync_sdk::{AvatarSyncSdk, EntityKind, HostServices, SyncConfig};
//!
//! async fn run(services: HostServices) -> avatar_sync_sdk::Result<()> {
//!     let config = SyncConfig::builder()
//!         .server_url("wss://relay.example.com")
//!         .default_secret_key("secret")
//!         .build()?;
//!
//!     let sdk = AvatarSyncSdk::initialize(config, services).await?;
//!     sdk.login().await?;
//!
//!     // on every appearance change, then once per frame
//!     sdk.notify_changed(EntityKind::Player);
//!     sdk.tick();
//!
//!     sdk.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod config;
pub mod connection_state;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod manifest;
pub mod peer;
pub mod permissions;
pub mod protocol;
pub mod relay;
pub mod resolver;
pub mod scheduler;
pub mod sdk;
pub mod snapshot;
pub mod store;
pub mod transient;
pub mod version;

#[cfg(test)]
pub mod test_helpers;

pub use broadcaster::ManifestBroadcaster;
pub use config::{ServerSettings, SyncConfig, SyncConfigBuilder};
pub use connection_state::{ConnectionStateManager, ServerState};
pub use error::{Result, SyncError};
pub use events::{EventManager, ListenerId, SyncEvent};
pub use lifecycle::{LifecycleHook, LifecycleManager};
pub use manifest::{CharacterManifest, EntityKind, ResourceManifest};
pub use peer::PeerState;
pub use relay::{RelayConnection, RelayConnectionController, RelayConnector, TransportEvent};
pub use resolver::ResourceGraphResolver;
pub use scheduler::ChangeScheduler;
pub use sdk::{AvatarSyncSdk, HostServices};
pub use snapshot::{AppearanceSnapshot, AppearanceSnapshotSource, HostEnvironment, PathResolver};
pub use store::{ManifestApplier, PeerStore};
pub use transient::{InMemoryTransientStore, TransientResourceStore};
pub use version::{PROTOCOL_VERSION, SDK_VERSION};
