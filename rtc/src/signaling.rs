//! Signaling Coordination
//!
//! Drives the offer/answer/ICE exchange for each peer session: the
//! per-session negotiation state machine, FIFO buffering of candidates that
//! arrive before the remote description, renegotiation after mid-session
//! track additions, and the timeout that moves an unanswered exchange to a
//! terminal failed state.
//!
//! Failures here are scoped to the one session; other peers' negotiations
//! proceed independently.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use glossa_common::{IceCandidate, SdpKind, SessionDescription};
use tracing::{debug, warn};

use crate::backend::MediaTrack;
use crate::error::RtcError;
use crate::registry::{NegotiationState, PeerRegistry, PeerSession};
use crate::snapshot::SnapshotProjector;

/// Per-session negotiation driver.
pub struct SignalingCoordinator {
    registry: Arc<PeerRegistry>,
    projector: Arc<SnapshotProjector>,
    negotiation_timeout: Duration,
}

impl SignalingCoordinator {
    /// Create a coordinator over the registry.
    pub fn new(
        registry: Arc<PeerRegistry>,
        projector: Arc<SnapshotProjector>,
        negotiation_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            projector,
            negotiation_timeout,
        }
    }

    /// Generate a local offer for transmission over the signaling channel.
    ///
    /// Requires the session to be in `New`.
    pub async fn create_offer(
        &self,
        session: &Arc<PeerSession>,
    ) -> Result<SessionDescription, RtcError> {
        if !session
            .transition(NegotiationState::New, NegotiationState::HaveLocalOffer)
            .await
        {
            return Err(RtcError::InvalidState {
                expected: NegotiationState::New.as_str(),
                actual: session.negotiation_state().await.as_str(),
            });
        }

        match session.handle.create_offer().await {
            Ok(offer) => {
                debug!(peer_id = %session.id, "Local offer created");
                self.spawn_negotiation_watchdog(session);
                Ok(offer)
            }
            Err(e) => {
                self.fail_session(session, &e).await;
                Err(e)
            }
        }
    }

    /// Apply a remote offer and produce the local answer.
    ///
    /// Accepted in `New` (first contact) and in `Connected` (remote
    /// renegotiation, e.g. the far side adding screen tracks).
    pub async fn apply_remote_offer(
        &self,
        session: &Arc<PeerSession>,
        offer: SessionDescription,
    ) -> Result<SessionDescription, RtcError> {
        if offer.kind != SdpKind::Offer {
            return Err(RtcError::Signaling("expected an offer".to_string()));
        }

        let accepted = session
            .transition(NegotiationState::New, NegotiationState::HaveRemoteOffer)
            .await
            || session
                .transition(NegotiationState::Connected, NegotiationState::HaveRemoteOffer)
                .await;
        if !accepted {
            return Err(RtcError::InvalidState {
                expected: "new or connected",
                actual: session.negotiation_state().await.as_str(),
            });
        }

        if let Err(e) = session.handle.set_remote_description(offer).await {
            self.fail_session(session, &e).await;
            return Err(e);
        }

        self.flush_candidates(session).await;

        match session.handle.create_answer().await {
            Ok(answer) => {
                // Both descriptions are in place.
                session.set_negotiation_state(NegotiationState::Connected).await;
                debug!(peer_id = %session.id, "Remote offer answered");
                Ok(answer)
            }
            Err(e) => {
                self.fail_session(session, &e).await;
                Err(e)
            }
        }
    }

    /// Apply a remote answer to a previously created local offer.
    pub async fn apply_remote_answer(
        &self,
        session: &Arc<PeerSession>,
        answer: SessionDescription,
    ) -> Result<(), RtcError> {
        if answer.kind != SdpKind::Answer {
            return Err(RtcError::Signaling("expected an answer".to_string()));
        }

        let state = session.negotiation_state().await;
        if state != NegotiationState::HaveLocalOffer {
            return Err(RtcError::InvalidState {
                expected: NegotiationState::HaveLocalOffer.as_str(),
                actual: state.as_str(),
            });
        }

        if let Err(e) = session.handle.set_remote_description(answer).await {
            self.fail_session(session, &e).await;
            return Err(e);
        }

        self.flush_candidates(session).await;
        session
            .transition(NegotiationState::HaveLocalOffer, NegotiationState::Connected)
            .await;
        debug!(peer_id = %session.id, "Remote answer applied");
        Ok(())
    }

    /// Apply or buffer a remote ICE candidate.
    ///
    /// Candidates arriving before the remote description are queued and
    /// flushed in arrival order once it lands; applying before the remote
    /// description is set fails in real WebRTC stacks. A candidate the
    /// backend rejects is logged and absorbed; one bad candidate must not
    /// take the session down.
    pub async fn add_ice_candidate(&self, session: &Arc<PeerSession>, candidate: IceCandidate) {
        // The queue lock also orders late arrivals against the flush.
        let mut pending = session.pending_candidates.lock().await;

        if !session.remote_description_set.load(Ordering::Acquire) {
            pending.push_back(candidate);
            debug!(
                peer_id = %session.id,
                queued = pending.len(),
                "Buffered ICE candidate until remote description is set"
            );
            return;
        }

        if let Err(e) = session.handle.add_ice_candidate(candidate).await {
            warn!(peer_id = %session.id, error = %e, "Failed to apply ICE candidate");
            self.projector.record_error(&e).await;
        }
    }

    /// Attach tracks (screen capture) mid-session and produce a fresh offer.
    ///
    /// Requires the session to be in `Connected`; camera/mic tracks are
    /// attached at creation time, screen tracks only travel through here.
    pub async fn renegotiate(
        &self,
        session: &Arc<PeerSession>,
        tracks: Vec<Arc<dyn MediaTrack>>,
    ) -> Result<SessionDescription, RtcError> {
        if !session
            .transition(NegotiationState::Connected, NegotiationState::HaveLocalOffer)
            .await
        {
            return Err(RtcError::InvalidState {
                expected: NegotiationState::Connected.as_str(),
                actual: session.negotiation_state().await.as_str(),
            });
        }

        for track in tracks {
            if let Err(e) = session.handle.add_track(track).await {
                self.fail_session(session, &e).await;
                return Err(e);
            }
        }

        match session.handle.create_offer().await {
            Ok(offer) => {
                debug!(peer_id = %session.id, "Renegotiation offer created");
                self.spawn_negotiation_watchdog(session);
                Ok(offer)
            }
            Err(e) => {
                self.fail_session(session, &e).await;
                Err(e)
            }
        }
    }

    /// Apply buffered candidates in arrival order, then let new arrivals
    /// apply directly.
    async fn flush_candidates(&self, session: &Arc<PeerSession>) {
        let mut pending = session.pending_candidates.lock().await;
        session.remote_description_set.store(true, Ordering::Release);

        while let Some(candidate) = pending.pop_front() {
            if let Err(e) = session.handle.add_ice_candidate(candidate).await {
                warn!(peer_id = %session.id, error = %e, "Failed to apply buffered ICE candidate");
                self.projector.record_error(&e).await;
            }
        }
    }

    /// Move the session to the terminal failed state and surface the error.
    async fn fail_session(&self, session: &Arc<PeerSession>, error: &RtcError) {
        warn!(peer_id = %session.id, error = %error, "Negotiation failed");
        session.set_negotiation_state(NegotiationState::Failed).await;
        self.projector.record_error(error).await;
        self.projector.publish().await;
    }

    /// Watch one offer/answer exchange; expiry in a negotiating state moves
    /// the session to `Failed` instead of hanging indefinitely.
    fn spawn_negotiation_watchdog(&self, session: &Arc<PeerSession>) {
        let weak = Arc::downgrade(session);
        let registry = self.registry.clone();
        let projector = self.projector.clone();
        let window = self.negotiation_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let Some(session) = weak.upgrade() else { return };
            // Torn-down sessions are left alone.
            if !registry.is_live(&session).await {
                return;
            }

            let state = session.negotiation_state().await;
            if matches!(
                state,
                NegotiationState::HaveLocalOffer | NegotiationState::HaveRemoteOffer
            ) {
                let error = RtcError::NegotiationTimeout(session.id);
                warn!(peer_id = %session.id, "Offer/answer exchange timed out");
                session.set_negotiation_state(NegotiationState::Failed).await;
                projector.record_error(&error).await;
                projector.publish().await;
            }
        });
    }
}
