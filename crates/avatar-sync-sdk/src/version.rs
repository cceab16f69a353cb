//! SDK version and relay protocol version.
//!
//! - **SDK Version** comes from Cargo.toml
//! - **Protocol Version** must match what the relay reports in its connection descriptor

/// SDK semver, kept in sync with Cargo.toml through `env!`.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Relay protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 27;
