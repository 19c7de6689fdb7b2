//! Coordinator forwarding and failover.
//!
//! A follower that cannot reach the coordinator within the forward timeout
//! nominates the backup (`coordinator + 1` in its view). The nominee promotes
//! itself, tells every other replica with NEWLEADER and acks; the nominator
//! then updates its own view and retries the request against the new
//! coordinator.
//!
//! There is no term or fencing: a coordinator that was only slow keeps
//! believing it leads until someone tells it otherwise.

use tracing::{debug, error, info, warn};

use crate::config::ElectionPolicy;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::protocol::Request;
use crate::topology::NodeId;
use crate::wire::Frame;

impl Node {
    /// Sends a client request to the coordinator and relays its reply
    /// unchanged, electing a replacement whenever the coordinator is gone.
    ///
    /// `frame` is forwarded verbatim; `request` is its decoded form, used
    /// when an election leaves this node in charge.
    pub(crate) async fn forward(&self, request: &Request, frame: &Frame) -> Result<Vec<u8>> {
        // Every failed attempt removes one node from the view, so this bounds
        // the loop even if every coordinator in turn is dead.
        let attempts = self.state.lock().await.view.len() + 1;
        for attempt in 1..=attempts {
            let coordinator = self.coordinator().await;
            if coordinator.id == self.id {
                return self.coordinate(request).await;
            }

            debug!(node = self.id, coordinator = coordinator.id, attempt, "forwarding request");
            match self
                .peers
                .call_raw(&coordinator.addr, frame, self.config.forward_timeout)
                .await
            {
                Ok(body) => return Ok(body),
                Err(err) if err.is_unreachable() => {
                    warn!(
                        node = self.id,
                        coordinator = coordinator.id,
                        error = %err,
                        "coordinator unreachable, starting election"
                    );
                    self.recover(coordinator.id).await?;
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::NoCoordinator { attempts })
    }

    /// Replaces `dead` as coordinator by nominating the backup.
    ///
    /// Returns `Ok` without electing anyone if the view already moved past
    /// `dead` (another request on this node finished an election first).
    pub(crate) async fn recover(&self, dead: NodeId) -> Result<()> {
        let _gate = match self.config.election_policy {
            ElectionPolicy::Fail => self
                .election_gate
                .try_lock()
                .map_err(|_| Error::ElectionInProgress)?,
            ElectionPolicy::Wait => self.election_gate.lock().await,
        };

        let (nominee, view_len) = {
            let mut state = self.state.lock().await;
            if state.view.coordinator().id != dead {
                debug!(node = self.id, dead, "coordinator already replaced");
                return Ok(());
            }
            state.electing = true;
            (state.view.backup().clone(), state.view.len())
        };

        info!(node = self.id, dead, nominee = nominee.id, "nominating backup");
        let outcome = if nominee.id == self.id {
            self.accept_nomination(dead, Some(self.id)).await
        } else {
            // The nominee acks only after announcing itself to every other
            // replica, each announcement bounded by its own rpc timeout.
            let limit = self.config.nominate_timeout(view_len);
            self.peers
                .nominate(&nominee.addr, dead, self.id, limit)
                .await
        };

        let mut state = self.state.lock().await;
        state.electing = false;
        match outcome {
            Ok(()) => {
                state.view.promote(dead, nominee.id);
                info!(node = self.id, coordinator = nominee.id, "new coordinator elected");
                Ok(())
            }
            Err(err) => {
                error!(node = self.id, nominee = nominee.id, error = %err, "election failed");
                Err(Error::ElectionFailed {
                    nominee: nominee.id,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// NOMINATE: take over from `dead` and tell everyone but the nominator.
    pub(crate) async fn handle_nominate(
        &self,
        dead: Option<NodeId>,
        nominator: Option<NodeId>,
    ) -> Result<()> {
        let dead = match dead {
            Some(dead) => dead,
            None => self.coordinator().await.id,
        };
        self.accept_nomination(dead, nominator).await
    }

    async fn accept_nomination(&self, dead: NodeId, nominator: Option<NodeId>) -> Result<()> {
        let notify = {
            let mut state = self.state.lock().await;
            if state.is_coordinator(self.id) {
                debug!(node = self.id, "nominated while already coordinator");
                return Ok(());
            }
            if !state.view.promote(dead, self.id) {
                return Err(Error::MalformedPayload(format!(
                    "node {} cannot replace node {dead}",
                    self.id
                )));
            }
            info!(node = self.id, dead, "promoted to coordinator");
            state
                .view
                .peers()
                .iter()
                .filter(|peer| peer.id != self.id && Some(peer.id) != nominator)
                .cloned()
                .collect::<Vec<_>>()
        };

        // Sequential, and a peer that does not answer is skipped.
        for peer in notify {
            if let Err(err) = self
                .peers
                .new_leader(&peer.addr, self.id, dead, self.config.rpc_timeout)
                .await
            {
                warn!(
                    node = self.id,
                    peer = peer.id,
                    error = %err,
                    "failed to announce new coordinator"
                );
            }
        }
        Ok(())
    }

    /// NEWLEADER: follow `leader` and forget `dead`.
    ///
    /// Missing ids fall back to this node's own view: the current coordinator
    /// is the dead one and its backup is the new leader.
    pub(crate) async fn handle_new_leader(
        &self,
        leader: Option<NodeId>,
        dead: Option<NodeId>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let dead = dead.unwrap_or(state.view.coordinator().id);
        let leader = leader.unwrap_or(state.view.backup().id);
        if !state.view.promote(dead, leader) {
            return Err(Error::MalformedPayload(format!(
                "cannot follow node {leader} in place of node {dead}"
            )));
        }
        info!(node = self.id, leader, dead, "following new coordinator");
        Ok(())
    }
}
