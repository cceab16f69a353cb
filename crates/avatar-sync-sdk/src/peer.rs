//! Per-peer state machine
//!
//! `Unlinked` (no live connection) → `Online` (relay says the peer is online)
//! → `Initialized` (the peer's avatar was found locally). Manifests received
//! before initialization are stashed and applied on the transition.

use crate::manifest::CharacterManifest;
use crate::permissions::{strip_disabled, DirectPair, FilterFlags};
use crate::protocol::UserData;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Unlinked,
    Online,
    Initialized,
}

/// Live connection handle; exists only while the peer is online.
#[derive(Debug, Clone)]
struct LiveConnection {
    ident: String,
    player_name: Option<String>,
    applied_hash: Option<String>,
}

/// A filtered manifest ready for the applier
#[derive(Debug, Clone)]
pub struct PendingApply {
    pub user: UserData,
    pub player_name: String,
    pub manifest: CharacterManifest,
    pub hash: String,
    pub forced: bool,
}

#[derive(Debug, Clone)]
pub struct Peer {
    user: UserData,
    direct_pair: Option<DirectPair>,
    connection: Option<LiveConnection>,
    last_received: Option<(String, CharacterManifest)>,
}

impl Peer {
    pub fn new(user: UserData) -> Self {
        Self {
            user,
            direct_pair: None,
            connection: None,
            last_received: None,
        }
    }

    pub fn user(&self) -> &UserData {
        &self.user
    }

    pub fn uid(&self) -> &str {
        &self.user.uid
    }

    pub fn state(&self) -> PeerState {
        match &self.connection {
            None => PeerState::Unlinked,
            Some(conn) if conn.player_name.is_some() => PeerState::Initialized,
            Some(_) => PeerState::Online,
        }
    }

    pub fn is_online(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_visible(&self) -> bool {
        self.state() == PeerState::Initialized
    }

    pub fn ident(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.ident.as_str())
    }

    pub fn player_name(&self) -> Option<&str> {
        self.connection.as_ref().and_then(|c| c.player_name.as_deref())
    }

    pub fn direct_pair(&self) -> Option<&DirectPair> {
        self.direct_pair.as_ref()
    }

    pub fn direct_pair_mut(&mut self) -> Option<&mut DirectPair> {
        self.direct_pair.as_mut()
    }

    pub fn set_direct_pair(&mut self, pair: Option<DirectPair>) {
        self.direct_pair = pair;
    }

    pub fn set_user(&mut self, user: UserData) {
        self.user = user;
    }

    pub fn last_received_hash(&self) -> Option<&str> {
        self.last_received.as_ref().map(|(hash, _)| hash.as_str())
    }

    pub fn last_received(&self) -> Option<&CharacterManifest> {
        self.last_received.as_ref().map(|(_, manifest)| manifest)
    }

    /// Returns false when the peer was already online.
    pub fn mark_online(&mut self, ident: String) -> bool {
        if self.connection.is_some() {
            return false;
        }
        self.connection = Some(LiveConnection {
            ident,
            player_name: None,
            applied_hash: None,
        });
        true
    }

    /// Returns true when a live connection was torn down.
    pub fn mark_offline(&mut self) -> bool {
        self.connection.take().is_some()
    }

    /// `Online → Initialized`; a no-op in any other state.
    pub fn initialize(&mut self, player_name: String) -> bool {
        match self.connection.as_mut() {
            Some(conn) if conn.player_name.is_none() => {
                conn.player_name = Some(player_name);
                true
            }
            _ => false,
        }
    }

    /// Stores the manifest unless its hash equals the last one received.
    pub fn receive_manifest(&mut self, manifest: CharacterManifest) -> bool {
        let hash = manifest.content_hash();
        if self.last_received_hash() == Some(hash.as_str()) {
            return false;
        }
        self.last_received = Some((hash, manifest));
        true
    }

    /// Filters the last received manifest for application.
    ///
    /// `None` when not initialized, nothing was received, or the filtered
    /// result equals what was last applied and `forced` is false.
    pub fn prepare_apply(&mut self, flags: FilterFlags, forced: bool) -> Option<PendingApply> {
        let (_, received) = self.last_received.as_ref()?;
        let conn = self.connection.as_mut()?;
        let player_name = conn.player_name.clone()?;

        let mut manifest = received.clone();
        strip_disabled(&mut manifest, flags);
        let hash = manifest.content_hash();
        if !forced && conn.applied_hash.as_deref() == Some(hash.as_str()) {
            return None;
        }
        conn.applied_hash = Some(hash.clone());

        Some(PendingApply {
            user: self.user.clone(),
            player_name,
            manifest,
            hash,
            forced,
        })
    }
}
