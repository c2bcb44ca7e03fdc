//! Divergence arbitration
//!
//! Divergence is never resolved automatically. A [`DivergencePolicy`] only
//! decides how the synchronizer treats the peer afterwards.

use datum_core::{Identifier, RegistryId};

use crate::compare::SyncState;

/// What to do with a peer after it diverged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceAction {
    /// Record, report and keep syncing other identifiers with the peer
    Surface,
    /// Record, report and skip the peer for the rest of the round
    SuspendPeer,
}

/// Pluggable reaction to a detected divergence
pub trait DivergencePolicy: Send + Sync {
    /// Decide the action for a divergence on `identifier` with `peer`
    fn on_divergence(&self, identifier: &Identifier, peer: RegistryId, state: &SyncState) -> DivergenceAction;
}

/// Records and surfaces every divergence, nothing more
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordAndSurface;

impl DivergencePolicy for RecordAndSurface {
    fn on_divergence(&self, _identifier: &Identifier, _peer: RegistryId, _state: &SyncState) -> DivergenceAction {
        DivergenceAction::Surface
    }
}
