//! A node's view of the replica set.
//!
//! Peers are index-addressed in the order given at startup. Every node keeps
//! its own copy of the view; elections shrink it by removing the failed
//! coordinator, which never rejoins.

use std::fmt;

use crate::error::{Error, Result};

/// Stable replica identity: the position in the startup peer list.
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: NodeId,
    pub addr: String,
}

/// Role of a node in the coordinator protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Coordinator,
    /// Waiting for a nominated backup to accept the coordinator role.
    Electing,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "follower"),
            Role::Coordinator => write!(f, "coordinator"),
            Role::Electing => write!(f, "electing"),
        }
    }
}

/// Ordered peers plus the coordinator and backup positions.
///
/// `backup_index` is always `(coordinator_index + 1) % len`.
#[derive(Debug, Clone)]
pub struct PeerView {
    peers: Vec<Peer>,
    coordinator_index: usize,
    backup_index: usize,
}

impl PeerView {
    /// Builds the startup view: ids follow list order, node 0 coordinates.
    pub fn new(addrs: Vec<String>) -> Result<Self> {
        if addrs.is_empty() {
            return Err(Error::InvalidConfig(
                "peer list requires at least one address".into(),
            ));
        }
        let peers = addrs
            .into_iter()
            .enumerate()
            .map(|(id, addr)| Peer { id, addr })
            .collect();
        let mut view = Self {
            peers,
            coordinator_index: 0,
            backup_index: 0,
        };
        view.set_coordinator_index(0);
        Ok(view)
    }

    fn set_coordinator_index(&mut self, index: usize) {
        self.coordinator_index = index;
        self.backup_index = (index + 1) % self.peers.len();
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.peers.iter().map(|peer| peer.id).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn coordinator(&self) -> &Peer {
        &self.peers[self.coordinator_index]
    }

    pub fn backup(&self) -> &Peer {
        &self.peers[self.backup_index]
    }

    pub fn coordinator_index(&self) -> usize {
        self.coordinator_index
    }

    pub fn backup_index(&self) -> usize {
        self.backup_index
    }

    pub fn get(&self, id: NodeId) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.id == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Size of a majority subset: `⌊N/2⌋ + 1`.
    pub fn majority(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    /// Drops `dead` from the view and makes `leader` coordinator.
    ///
    /// Returns `false` and leaves the view untouched when `leader` is not in
    /// the view or is the node being removed.
    pub fn promote(&mut self, dead: NodeId, leader: NodeId) -> bool {
        if dead == leader || !self.contains(leader) {
            return false;
        }
        self.peers.retain(|peer| peer.id != dead);
        match self.peers.iter().position(|peer| peer.id == leader) {
            Some(index) => {
                self.set_coordinator_index(index);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(n: usize) -> PeerView {
        PeerView::new((0..n).map(|i| format!("127.0.0.1:{}", 5001 + i)).collect())
            .expect("valid view")
    }

    #[test]
    fn startup_view_has_node_zero_coordinating() {
        let view = view(3);
        assert_eq!(view.coordinator().id, 0);
        assert_eq!(view.backup().id, 1);
        assert_eq!(view.majority(), 2);
    }

    #[test]
    fn empty_view_is_rejected() {
        assert!(PeerView::new(Vec::new()).is_err());
    }

    #[test]
    fn single_node_backs_itself_up() {
        let view = view(1);
        assert_eq!(view.coordinator().id, 0);
        assert_eq!(view.backup().id, 0);
        assert_eq!(view.majority(), 1);
    }

    #[test]
    fn promote_removes_dead_coordinator_and_recomputes_backup() {
        let mut view = view(3);
        assert!(view.promote(0, 1));
        assert_eq!(view.ids(), vec![1, 2]);
        assert_eq!(view.coordinator().id, 1);
        assert_eq!(view.backup().id, 2);
        assert_eq!(view.backup_index(), (view.coordinator_index() + 1) % view.len());
        assert!(!view.contains(0));
    }

    #[test]
    fn promote_wraps_around_the_end_of_the_list() {
        let mut view = view(4);
        assert!(view.promote(0, 1));
        assert!(view.promote(1, 2));
        assert!(view.promote(2, 3));
        assert_eq!(view.ids(), vec![3]);
        assert_eq!(view.coordinator().id, 3);
        assert_eq!(view.backup().id, 3);
    }

    #[test]
    fn promote_rejects_unknown_leader() {
        let mut view = view(3);
        assert!(!view.promote(0, 7));
        assert!(!view.promote(1, 1));
        assert_eq!(view.ids(), vec![0, 1, 2]);
        assert_eq!(view.coordinator().id, 0);
    }

    #[test]
    fn repeated_promote_is_idempotent() {
        let mut view = view(3);
        assert!(view.promote(0, 1));
        assert!(view.promote(0, 1));
        assert_eq!(view.ids(), vec![1, 2]);
        assert_eq!(view.coordinator().id, 1);
    }
}
