//! The per-replica state machine (§9: "a pure core, `(State, Event) ->
//! (State, Output)`, wrapped by a thin imperative shell that owns sockets,
//! clocks, and the scheduler").
//!
//! [`ReplicaState`] owns every sub-protocol (`pre_order`, `order`,
//! `suspect_leader`, `reliable_broadcast`, `view_change`, `recovery`,
//! `catchup`) and is the single place that turns an incoming [`Message`] or
//! a timer firing into the outgoing messages and committed ordinals the
//! imperative shell (`prime-node`) must act on. The core never touches a
//! socket, a clock, or `SystemTime::now()` directly — every external fact
//! (`now`, RNG, the wall clock) arrives as part of an [`ReplicaEvent`].

use prime_crypto::envelope::{ReplicaSigningKey, ReplicaVerifyingKey};
use prime_crypto::threshold::{TcPublicKeySet, TcSecretShare, TcShare};
use prime_types::{ClusterParams, Incarnation, Nonce, Ordinal, PoSeq, ReplicaId, View};

use crate::catchup::{self, CatchupRequester, CatchupResponder};
use crate::cluster::ClusterConfig;
use crate::message::{
    CatchupFlag, CatchupRequest, Commit, IncarnationAck, IncarnationCert, Jump, Message,
    MessagePayload, NewIncarnation, NewLeader, NewLeaderProof, OrdCert, PcSet, PendingShare,
    PendingState, PoAckPart, PoAru, PoCert, PoRequest, PrePrepare, Prepare, Report, ResetCert,
    ResetCommit, ResetNewLeader, ResetNewLeaderProof, ResetNewView, ResetPrepare, ResetProposal,
    ResetShare, ResetVote, ResetViewChange, RttMeasure, RttReport, VcList, VcPartialSig, VcProof,
};
use crate::order::Order;
use crate::pre_order::PreOrder;
use crate::recovery::{Recovery, RecoveryStatus};
use crate::reliable_broadcast::ReliableBroadcast;
use crate::suspect_leader::SuspectLeader;
use crate::view_change::{self, ViewChange};

/// Every externally-driven reason the core may need to run.
pub enum ReplicaEvent {
    Message(Message),
    ClientRequest(Vec<u8>),
    Timeout(TimeoutKind),
    Tick { now_ns: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Heartbeat,
    PrePrepare,
    PoAru,
    RttMeasure,
    PrimaryAbdicate,
    CatchupSync,
    CommitStall,
    RecoveryUpdateTimestamp,
}

/// What the shell must do after `process` returns: send messages, and treat
/// any newly executed ordinals as committed output for the SCADA layer.
#[derive(Default)]
pub struct ReplicaOutput {
    pub outgoing: Vec<Message>,
    pub committed: Vec<(ReplicaId, PoSeq)>,
    pub view_installed: Option<View>,
}

impl ReplicaOutput {
    fn push(&mut self, msg: Message) {
        self.outgoing.push(msg);
    }

    fn broadcast(&mut self, own: ReplicaId, key: &ReplicaSigningKey, payload: MessagePayload) {
        let mut msg = Message::broadcast(own, payload);
        msg.sign(key);
        self.push(msg);
    }

    fn targeted(&mut self, own: ReplicaId, to: ReplicaId, key: &ReplicaSigningKey, payload: MessagePayload) {
        let mut msg = Message::targeted(own, to, payload);
        msg.sign(key);
        self.push(msg);
    }
}

pub struct ReplicaState {
    pub own: ReplicaId,
    pub config: ClusterConfig,
    pub member_order: Vec<ReplicaId>,
    signing_key: ReplicaSigningKey,

    pub view: View,
    pub incarnation: Incarnation,
    pub preinstalled_incarnations: Vec<Incarnation>,

    pub pre_order: PreOrder,
    pub order: Order,
    pub suspect_leader: SuspectLeader,
    pub reliable_broadcast: ReliableBroadcast,
    pub view_change: ViewChange,
    pub recovery: Recovery,
    pub catchup_requester: CatchupRequester,
    pub catchup_responder: CatchupResponder,

    pub last_catchup_nonce: Nonce,
    pub rb_seq: u64,

    /// This replica's persistent share of the dedicated view-change
    /// threshold key (§4.4 step 4 signs `(view, start_seq)`; distinct from
    /// ITRC's pre-/post-Prime keys, since view change runs across every
    /// replica — CC and DC alike — not just the CC-role-restricted ones).
    vc_secret_share: TcSecretShare,
    vc_pks: TcPublicKeySet,
    /// Wall-clock time of the most recent `Tick`, used to compute real
    /// elapsed time for the System Reset minimum-wait gate.
    last_now_ns: u64,
}

impl ReplicaState {
    pub fn new(
        own: ReplicaId,
        config: ClusterConfig,
        signing_key: ReplicaSigningKey,
        vc_secret_share: TcSecretShare,
        vc_pks: TcPublicKeySet,
    ) -> Self {
        let member_order: Vec<ReplicaId> = config.iter_members().collect();
        let params = config.params;
        let incarnation = Incarnation::ZERO;
        Self {
            own,
            member_order: member_order.clone(),
            signing_key,
            view: View::INITIAL,
            incarnation,
            preinstalled_incarnations: vec![Incarnation::ZERO; member_order.len()],
            pre_order: PreOrder::new(own, params, incarnation),
            order: Order::new(own, params, member_order.clone()),
            suspect_leader: SuspectLeader::new(own, params, member_order.clone()),
            reliable_broadcast: ReliableBroadcast::new(own, params),
            view_change: ViewChange::new(own, params, View::INITIAL),
            recovery: Recovery::new(own, params),
            catchup_requester: CatchupRequester::new(own, params),
            catchup_responder: CatchupResponder::new(own),
            last_catchup_nonce: Nonce::new(0),
            rb_seq: 0,
            vc_secret_share,
            vc_pks,
            last_now_ns: 0,
            config,
        }
    }

    fn params(&self) -> ClusterParams {
        self.config.params
    }

    fn leader(&self) -> ReplicaId {
        self.view.leader_of(self.params().n)
    }

    fn is_leader(&self) -> bool {
        self.leader() == self.own
    }

    fn verifying_key_of(&self, id: ReplicaId) -> Option<&ReplicaVerifyingKey> {
        self.config.verifying_key_of(id)
    }

    /// Dispatches one event, returning every message to send and ordinal to
    /// deliver as a result.
    pub fn process(&mut self, event: ReplicaEvent) -> ReplicaOutput {
        let mut out = ReplicaOutput::default();
        match event {
            ReplicaEvent::Message(msg) => self.on_message(msg, &mut out),
            ReplicaEvent::ClientRequest(payload) => self.on_client_request(payload, &mut out),
            ReplicaEvent::Timeout(kind) => self.on_timeout(kind, &mut out),
            ReplicaEvent::Tick { now_ns } => self.on_tick(now_ns, &mut out),
        }
        self.drain_ready_ordinals(&mut out);
        out
    }

    fn on_message(&mut self, msg: Message, out: &mut ReplicaOutput) {
        if let Some(vk) = self.verifying_key_of(msg.from) {
            if msg.verify(vk).is_err() {
                return; // drop unauthenticated/tampered traffic
            }
        } else {
            return; // unknown sender
        }

        match msg.payload {
            MessagePayload::PoRequest(req) => self.handle_po_request(req, out),
            MessagePayload::PoAckPart(ack) => self.handle_po_ack(ack, out),
            MessagePayload::PoAru(aru) => self.pre_order.observe_po_aru(aru),
            MessagePayload::PrePrepare(pp) => self.handle_pre_prepare(pp, out),
            MessagePayload::Prepare(p) => self.handle_prepare(p, out),
            MessagePayload::Commit(c) => self.handle_commit(c, out),
            MessagePayload::RttMeasure(m) => self.handle_rtt_measure(m, out),
            MessagePayload::RttReport(r) => self.suspect_leader.observe_peer_alpha(
                r.replica,
                r.alpha_upper_bounds.first().copied().unwrap_or_default(),
            ),
            MessagePayload::NewLeader(nl) => self.handle_new_leader(nl, out),
            MessagePayload::NewLeaderProof(proof) => self.handle_new_leader_proof(proof, out),
            MessagePayload::RbInit(init) => {
                if let Some(echo) = self.reliable_broadcast.on_init(init) {
                    out.broadcast(self.own, &self.signing_key, MessagePayload::RbEcho(echo));
                }
            }
            MessagePayload::RbEcho(echo) => {
                if let Some(ready) = self.reliable_broadcast.on_echo(echo) {
                    out.broadcast(self.own, &self.signing_key, MessagePayload::RbReady(ready));
                }
            }
            MessagePayload::RbReady(ready) => {
                let (amplify, delivered) = self.reliable_broadcast.on_ready(ready);
                if let Some(a) = amplify {
                    out.broadcast(self.own, &self.signing_key, MessagePayload::RbReady(a));
                }
                if let Some(payload) = delivered {
                    self.handle_rb_delivery(payload, out);
                }
            }
            MessagePayload::Report(r) => self.view_change.on_report(r),
            MessagePayload::PcSet(pc) => self.view_change.on_pc_set(pc),
            MessagePayload::VcList(l) => self.handle_vc_list(l, out),
            MessagePayload::VcPartialSig(s) => self.handle_vc_partial_sig(s, out),
            MessagePayload::VcProof(proof) => self.handle_vc_proof(proof, out),
            MessagePayload::Replay(replay) => self.handle_replay(replay, out),
            MessagePayload::ReplayPrepare(p) => {
                if let Some(commit) = self.view_change.on_replay_prepare(p) {
                    out.broadcast(
                        self.own,
                        &self.signing_key,
                        MessagePayload::ReplayCommit(commit),
                    );
                }
            }
            MessagePayload::ReplayCommit(c) => {
                let view = c.view;
                if self.view_change.on_replay_commit(c) && view > self.view {
                    self.install_view(view, out);
                }
            }
            MessagePayload::NewIncarnation(ni) => self.handle_new_incarnation(ni, out),
            MessagePayload::IncarnationAck(ack) => self.handle_incarnation_ack(ack, out),
            MessagePayload::IncarnationCert(cert) => self.handle_incarnation_cert(cert),
            MessagePayload::PendingState(s) => self.recovery.on_pending_state(s),
            MessagePayload::PendingShare(s) => self.recovery.on_pending_share(s),
            MessagePayload::ResetVote(v) => self.handle_reset_vote(v, out),
            MessagePayload::ResetShare(s) => self.recovery.on_reset_share(s),
            MessagePayload::ResetProposal(p) => self.handle_reset_proposal(p, out),
            MessagePayload::ResetPrepare(p) => self.handle_reset_prepare(p, out),
            MessagePayload::ResetCommit(c) => self.handle_reset_commit(c, out),
            MessagePayload::ResetNewLeader(rl) => self.handle_reset_new_leader(rl, out),
            MessagePayload::ResetNewLeaderProof(proof) => {
                self.handle_reset_new_leader_proof(proof, out);
            }
            MessagePayload::ResetViewChange(vc) => self.handle_reset_view_change(vc, out),
            MessagePayload::ResetNewView(nv) => self.handle_reset_new_view(nv, out),
            MessagePayload::ResetCert(cert) => {
                self.recovery.reset_cert = Some(cert);
                self.recovery.status = RecoveryStatus::Normal;
            }
            MessagePayload::CatchupRequest(req) => self.handle_catchup_request(req, out),
            MessagePayload::OrdCert(_) | MessagePayload::PoCert(_) => {}
            MessagePayload::Jump(jump) => self.handle_jump(msg.from, jump, out),
        }
    }

    // ------------------------------------------------------------------
    // Pre-Order handling
    // ------------------------------------------------------------------

    fn handle_po_request(&mut self, req: PoRequest, out: &mut ReplicaOutput) {
        if let Some(ack) = self
            .pre_order
            .process_po_request(req, self.preinstalled_incarnations.clone())
        {
            out.broadcast(self.own, &self.signing_key, MessagePayload::PoAckPart(ack));
        }
    }

    fn handle_po_ack(&mut self, ack: PoAckPart, _out: &mut ReplicaOutput) {
        self.pre_order.process_po_ack_part(ack);
    }

    pub fn submit_po_aru(&mut self, out: &mut ReplicaOutput) {
        let aru = self.pre_order.periodic_po_aru(&self.member_order);
        out.broadcast(self.own, &self.signing_key, MessagePayload::PoAru(aru));
    }

    fn on_client_request(&mut self, payload: Vec<u8>, out: &mut ReplicaOutput) {
        if let Some(req) = self.pre_order.submit(payload) {
            out.broadcast(self.own, &self.signing_key, MessagePayload::PoRequest(req));
        }
    }

    // ------------------------------------------------------------------
    // Order handling
    // ------------------------------------------------------------------

    fn handle_pre_prepare(&mut self, pp: PrePrepare, out: &mut ReplicaOutput) {
        match self
            .order
            .on_pre_prepare_fragment(pp, &self.preinstalled_incarnations)
        {
            Ok(Some(prepare)) => {
                out.broadcast(self.own, &self.signing_key, MessagePayload::Prepare(prepare));
            }
            Ok(None) => {}
            Err(_reason) => {
                // Backwards progress: escalate via suspect-leader, handled
                // at the next periodic suspicion check.
            }
        }
    }

    fn handle_prepare(&mut self, p: Prepare, out: &mut ReplicaOutput) {
        if let Some(commit) = self.order.on_prepare(p) {
            out.broadcast(self.own, &self.signing_key, MessagePayload::Commit(commit));
        }
    }

    fn handle_commit(&mut self, c: Commit, _out: &mut ReplicaOutput) {
        let matrix = self.pre_order.current_matrix();
        self.order.on_commit(c, &matrix);
    }

    /// **Leader only.** Call periodically (driven by `TimeoutKind::PrePrepare`)
    /// to propose the next slot if the proof matrix has changed.
    pub fn leader_tick_pre_prepare(&mut self, fragment_size: usize, out: &mut ReplicaOutput) {
        if !self.is_leader() {
            return;
        }
        let matrix = self.pre_order.current_matrix();
        if let Some(fragments) = self
            .order
            .leader_build_pre_prepare(self.view, &matrix, fragment_size)
        {
            for frag in fragments {
                out.broadcast(self.own, &self.signing_key, MessagePayload::PrePrepare(frag));
            }
        }
    }

    /// Drains every newly-executable Ord-Slot in sequence order, handing
    /// the delivered `(origin, seq)` pairs to the shell as committed work.
    fn drain_ready_ordinals(&mut self, out: &mut ReplicaOutput) {
        loop {
            let next = self.order.slots.keys().copied().find(|seq| {
                self.order.phase(*seq) != Some(crate::order::Phase::Executed)
                    && self
                        .order
                        .ready_to_execute(*seq, |origin, seq| self.pre_order.has_request(origin, seq))
            });
            let Some(seq) = next else { break };
            let delivered = self.order.execute(seq);
            out.committed.extend(delivered);
        }
    }

    // ------------------------------------------------------------------
    // Suspect-Leader handling
    // ------------------------------------------------------------------

    fn handle_rtt_measure(&mut self, m: RttMeasure, out: &mut ReplicaOutput) {
        let reply = RttMeasure {
            from: self.own,
            nonce: m.nonce,
            sent_at_ns: m.sent_at_ns,
        };
        out.targeted(self.own, m.from, &self.signing_key, MessagePayload::RttMeasure(reply));
    }

    fn handle_new_leader(&mut self, nl: NewLeader, out: &mut ReplicaOutput) {
        if let Some(proof) = self.suspect_leader.on_new_leader(nl) {
            out.broadcast(
                self.own,
                &self.signing_key,
                MessagePayload::NewLeaderProof(proof),
            );
        }
    }

    fn handle_new_leader_proof(&mut self, proof: NewLeaderProof, out: &mut ReplicaOutput) {
        if proof.new_view > self.view {
            self.install_view(proof.new_view, out);
        }
    }

    /// Called periodically by the shell; if the current leader is judged
    /// slow, broadcasts a `NewLeader` vote.
    pub fn check_suspicion(&mut self, pre_prepare_period_ns: u64, out: &mut ReplicaOutput) {
        if self.suspect_leader.leader_suspected(pre_prepare_period_ns) {
            let msg = self.suspect_leader.broadcast_new_leader(self.view);
            out.broadcast(self.own, &self.signing_key, MessagePayload::NewLeader(msg));
        }
    }

    fn install_view(&mut self, view: View, out: &mut ReplicaOutput) {
        self.view = view;
        self.suspect_leader.reset_for_new_view();
        self.reliable_broadcast.clear_for_new_view();
        self.view_change = ViewChange::new(self.own, self.params(), view);
        out.view_installed = Some(view);
    }

    // ------------------------------------------------------------------
    // View Change / Replay
    // ------------------------------------------------------------------

    fn handle_rb_delivery(&mut self, payload: Vec<u8>, out: &mut ReplicaOutput) {
        if let Ok(report) = postcard::from_bytes::<Report>(&payload) {
            self.view_change.on_report(report);
        } else if let Ok(pc_set) = postcard::from_bytes::<PcSet>(&payload) {
            self.view_change.on_pc_set(pc_set);
        }
        self.maybe_emit_vc_list(out);
    }

    fn maybe_emit_vc_list(&mut self, out: &mut ReplicaOutput) {
        let executed = self.order.phase(self.order.next_seq.saturating_sub(1));
        let caught_up = |aru: u64| {
            executed.is_some() && aru <= self.order.next_seq.saturating_sub(1)
        };
        if let Some(list) = self.view_change.maybe_build_vc_list(caught_up) {
            out.broadcast(self.own, &self.signing_key, MessagePayload::VcList(list));
        }
    }

    fn handle_vc_list(&mut self, list: VcList, out: &mut ReplicaOutput) {
        self.view_change.on_vc_list(list.clone());
        let caught_up = |_aru: u64| true;
        if let Some(start_seq) = self.view_change.start_seq_for(&list, caught_up) {
            self.view_change.remember_list(start_seq, list.list);
            self.submit_vc_partial_sig(start_seq, out);
        }
    }

    /// Threshold-signs `(view, start_seq)` with this replica's share of the
    /// view-change key and broadcasts the resulting `VcPartialSig` (§4.4
    /// step 4). Only ever signs once per `start_seq`.
    fn submit_vc_partial_sig(&mut self, start_seq: u64, out: &mut ReplicaOutput) {
        if self.view_change.has_sent_partial_sig(start_seq) {
            return;
        }
        self.view_change.mark_partial_sig_sent(start_seq);
        let message = view_change::vc_partial_sig_message(self.view, start_seq);
        let share_bytes = self.vc_secret_share.sign_share(&message).to_bytes();
        let sig = self.view_change.make_partial_sig(start_seq, share_bytes);
        out.broadcast(self.own, &self.signing_key, MessagePayload::VcPartialSig(sig));
    }

    /// On `big_quorum` matching partial signatures, combines them into a
    /// `TcFinal` and sends the resulting `VcProof` to the new leader (§4.4
    /// step 5).
    fn handle_vc_partial_sig(&mut self, sig: VcPartialSig, out: &mut ReplicaOutput) {
        let view = sig.view;
        let start_seq = sig.start_seq;
        let Some(shares) = self.view_change.on_partial_sig(sig) else {
            return;
        };
        let indexed: Vec<(usize, TcShare)> = shares
            .iter()
            .filter_map(|s| {
                let idx = self.member_order.iter().position(|r| *r == s.replica)?;
                let share = TcShare::from_bytes(&s.share).ok()?;
                Some((idx, share))
            })
            .collect();
        let Ok(final_sig) = self.vc_pks.combine(&indexed) else {
            return;
        };
        let proof = self.view_change.build_vc_proof(start_seq, final_sig.to_bytes());
        let new_leader = view.leader_of(self.params().n);
        out.targeted(self.own, new_leader, &self.signing_key, MessagePayload::VcProof(proof));
    }

    /// **New leader only.** Once a `VcProof` combines, rebuilds the `list`
    /// that produced its `start_seq` and broadcasts `Replay` (§4.4 step 6).
    fn handle_vc_proof(&mut self, proof: VcProof, out: &mut ReplicaOutput) {
        if proof.view.leader_of(self.params().n) != self.own {
            return;
        }
        let Some(list) = self.view_change.list_for(proof.start_seq) else {
            return;
        };
        let replay = self.view_change.build_replay(list, proof);
        out.broadcast(self.own, &self.signing_key, MessagePayload::Replay(replay));
    }

    fn handle_replay(&mut self, replay: crate::message::Replay, out: &mut ReplicaOutput) {
        if replay.view <= self.view {
            return;
        }
        let prepare = crate::message::ReplayPrepare {
            view: replay.view,
            replica: self.own,
            digest: prime_crypto::digest::digest(&replay.threshold_sig),
        };
        out.broadcast(
            self.own,
            &self.signing_key,
            MessagePayload::ReplayPrepare(prepare),
        );
    }

    // ------------------------------------------------------------------
    // Proactive Recovery
    // ------------------------------------------------------------------

    fn handle_new_incarnation(&mut self, ni: NewIncarnation, out: &mut ReplicaOutput) {
        if ni.replica == self.own {
            return;
        }
        let digest = prime_crypto::digest::digest(&ni.key);
        if let Some(ack) = self.recovery.on_new_incarnation(
            &ni,
            std::time::Duration::from_nanos(ni.timestamp_ns),
            std::time::Duration::from_millis(250),
            digest,
        ) {
            out.broadcast(self.own, &self.signing_key, MessagePayload::IncarnationAck(ack));
        } else if self.recovery.status == RecoveryStatus::Startup {
            let vote = ResetVote { replica: self.own };
            out.broadcast(self.own, &self.signing_key, MessagePayload::ResetVote(vote));
            // §4.5 abort condition (part 1): `ni.replica` being in Startup
            // too means we're seeing simultaneous Startup with at least one
            // peer; once `suspect_quorum` peers are observed this way, the
            // whole local Prime-level state resets (`PR_Reset_Prime`).
            if self.recovery.observe_peer_startup(ni.replica) {
                self.reset_prime_and_restart();
            }
        }
    }

    /// `PR_Reset_Prime` (§7.4): a full local reset back to `Startup`, used
    /// whenever a recovery abort condition fires. Resets every sub-protocol
    /// that carries state across incarnations, not just `Recovery` itself.
    fn reset_prime_and_restart(&mut self) {
        let params = self.params();
        self.incarnation = Incarnation::ZERO;
        self.preinstalled_incarnations = vec![Incarnation::ZERO; self.member_order.len()];
        self.pre_order = PreOrder::new(self.own, params, self.incarnation);
        self.order = Order::new(self.own, params, self.member_order.clone());
        self.suspect_leader = SuspectLeader::new(self.own, params, self.member_order.clone());
        self.reliable_broadcast = ReliableBroadcast::new(self.own, params);
        self.view = View::INITIAL;
        self.view_change = ViewChange::new(self.own, params, View::INITIAL);
        self.recovery.reset_prime();
    }

    fn handle_incarnation_ack(&mut self, ack: IncarnationAck, out: &mut ReplicaOutput) {
        if let Some(cert) = self.recovery.on_incarnation_ack(ack) {
            out.broadcast(
                self.own,
                &self.signing_key,
                MessagePayload::IncarnationCert(cert),
            );
        }
    }

    fn handle_incarnation_cert(&mut self, cert: IncarnationCert) {
        self.recovery
            .on_incarnation_cert(&cert, std::time::Duration::from_secs(0));
        if cert.acked_replica == self.own {
            self.incarnation = cert.acked_incarnation;
            self.pre_order.reset_to_incarnation(self.incarnation);
        }
        if let Some(col) = self.member_order.iter().position(|r| *r == cert.acked_replica) {
            if let Some(slot) = self.preinstalled_incarnations.get_mut(col) {
                *slot = cert.acked_incarnation;
            }
        }
    }

    /// Starts the join protocol for this replica's own restart.
    pub fn begin_recovery(&mut self, now_ns: u64, nonce: Nonce, key: Vec<u8>, out: &mut ReplicaOutput) {
        let msg = self.recovery.begin_new_incarnation(now_ns, nonce, key);
        out.broadcast(self.own, &self.signing_key, MessagePayload::NewIncarnation(msg));
    }

    // ------------------------------------------------------------------
    // System Reset
    // ------------------------------------------------------------------

    fn handle_reset_vote(&mut self, v: ResetVote, out: &mut ReplicaOutput) {
        if let Some(share) = self.recovery.on_reset_vote(v, self.last_now_ns) {
            out.broadcast(self.own, &self.signing_key, MessagePayload::ResetShare(share));
        }
    }

    fn handle_reset_proposal(&mut self, proposal: ResetProposal, out: &mut ReplicaOutput) {
        let elapsed = self.recovery.elapsed_since_reset(self.last_now_ns);
        if self.recovery.accept_reset_proposal(&proposal, elapsed) {
            let prepare = ResetPrepare {
                replica: self.own,
                proposal_digest: proposal.proposal_digest,
            };
            out.broadcast(
                self.own,
                &self.signing_key,
                MessagePayload::ResetPrepare(prepare),
            );
        }
    }

    fn handle_reset_prepare(&mut self, p: ResetPrepare, out: &mut ReplicaOutput) {
        if self.recovery.on_reset_prepare(p.replica) {
            let commit = ResetCommit {
                replica: self.own,
                proposal_digest: p.proposal_digest,
            };
            out.broadcast(
                self.own,
                &self.signing_key,
                MessagePayload::ResetCommit(commit),
            );
        }
    }

    /// On `big_quorum` matching `ResetCommit`s, adopts the `ResetCert`
    /// (§4.5: `ARU=0, view=1` becomes the starting global state).
    fn handle_reset_commit(&mut self, c: ResetCommit, out: &mut ReplicaOutput) {
        let Some(proposal) = self.recovery.accepted_proposal().cloned() else {
            return;
        };
        if c.proposal_digest != proposal.proposal_digest {
            return;
        }
        if let Some(cert) = self.recovery.on_reset_commit(c.replica, &proposal) {
            // `ARU=0, view=1` becomes the starting global state (§4.5); the
            // reset/recovery bookkeeping that produced `cert` must survive,
            // unlike `reset_prime_and_restart`'s full `PR_Reset_Prime` wipe.
            let params = self.params();
            self.incarnation = Incarnation::ZERO;
            self.pre_order = PreOrder::new(self.own, params, self.incarnation);
            self.order = Order::new(self.own, params, self.member_order.clone());
            self.view = self.recovery.starting_view();
            out.broadcast(self.own, &self.signing_key, MessagePayload::ResetCert(cert));
        }
    }

    /// On `big_quorum` `ResetNewLeader` votes, broadcasts the resulting proof.
    fn handle_reset_new_leader(&mut self, rl: ResetNewLeader, out: &mut ReplicaOutput) {
        if let Some(proof) = self.recovery.on_reset_new_leader(rl) {
            out.broadcast(
                self.own,
                &self.signing_key,
                MessagePayload::ResetNewLeaderProof(proof),
            );
        }
    }

    /// Every replica, on a valid proof, votes for the rotated reset-leader
    /// view via `ResetViewChange`.
    fn handle_reset_new_leader_proof(&mut self, proof: ResetNewLeaderProof, out: &mut ReplicaOutput) {
        if let Some(vc) = self.recovery.on_reset_new_leader_proof(&proof) {
            out.broadcast(
                self.own,
                &self.signing_key,
                MessagePayload::ResetViewChange(vc),
            );
        }
    }

    /// The new reset leader, on `big_quorum` `ResetViewChange`s, broadcasts
    /// `ResetNewView` carrying over any already-prepared proposal.
    fn handle_reset_view_change(&mut self, vc: ResetViewChange, out: &mut ReplicaOutput) {
        if let Some(new_view) = self.recovery.on_reset_view_change(vc) {
            out.broadcast(
                self.own,
                &self.signing_key,
                MessagePayload::ResetNewView(new_view),
            );
        }
    }

    /// Installs the rotated reset-leader view and the carried-over proposal,
    /// then re-votes `ResetPrepare` for it directly (it already cleared the
    /// min-wait gate once in whichever view first accepted it).
    fn handle_reset_new_view(&mut self, nv: ResetNewView, out: &mut ReplicaOutput) {
        self.recovery.on_reset_new_view(&nv);
        let prepare = ResetPrepare {
            replica: self.own,
            proposal_digest: nv.proposal.proposal_digest,
        };
        out.broadcast(
            self.own,
            &self.signing_key,
            MessagePayload::ResetPrepare(prepare),
        );
    }

    // ------------------------------------------------------------------
    // Catchup
    // ------------------------------------------------------------------

    fn handle_catchup_request(&mut self, req: CatchupRequest, out: &mut ReplicaOutput) {
        let our_aru = self.order.next_seq.saturating_sub(1);
        let our_digest = self.proposal_digest_snapshot();
        let latest_cert = self.order.slots.get(&our_aru).and_then(|s| s.cert.clone());
        let now = std::time::Duration::from_secs(0);
        match self.catchup_responder.handle_request(&req, our_digest, our_aru, latest_cert.as_ref(), now) {
            Some(catchup::CatchupResponse::Jump(jump)) => {
                out.targeted(self.own, req.requester, &self.signing_key, MessagePayload::Jump(jump));
            }
            Some(catchup::CatchupResponse::Range { from_exclusive, to_inclusive }) => {
                let mut seq = from_exclusive;
                while seq < to_inclusive {
                    seq += 1;
                    if let Some(slot) = self.order.slots.get(&seq) {
                        if let Some(cert) = &slot.cert {
                            out.targeted(
                                self.own,
                                req.requester,
                                &self.signing_key,
                                MessagePayload::OrdCert(cert.clone()),
                            );
                        }
                    }
                }
            }
            None => {}
        }
    }

    /// Lands a `Jump` (§4.6): adopts the cert's `made_eligible`/`last_executed`
    /// as the new floor for `Order`/`PreOrder`, advances `ppARU`/
    /// `high_prepared`/`stable_catchup`, and installs a higher view if the
    /// cert carries one.
    ///
    /// While a new-incarnation join is in flight (`RecoveryStatus::Recovery`),
    /// a lone responder isn't trusted: responses are collected by
    /// `proposal_digest` and only land once `big_quorum` of them agree,
    /// mirroring the Jump-quorum step of the join protocol (§4.5 steps 4-5).
    /// A digest that disagrees with our own counts toward the abort condition
    /// (§4.5 part 2, `f+k+1` mismatches).
    fn handle_jump(&mut self, responder: ReplicaId, jump: Jump, out: &mut ReplicaOutput) {
        if self.recovery.status != RecoveryStatus::Recovery {
            self.land_jump_cert(&jump, out);
            return;
        }

        let our_digest = self.proposal_digest_snapshot();
        if jump.proposal_digest != our_digest && self.recovery.record_jump_mismatch(jump.proposal_digest) {
            self.reset_prime_and_restart();
            return;
        }

        let Some((_, agreed_jump)) = self.recovery.on_jump_response(responder, jump) else {
            return;
        };
        self.land_jump_cert(&agreed_jump, out);
        if self.recovery.pending_state_complete(responder) {
            self.recovery.complete_join();
        }
    }

    fn land_jump_cert(&mut self, jump: &Jump, out: &mut ReplicaOutput) {
        let Some(cert) = &jump.cert else {
            return;
        };
        let landing = catchup::land_jump(cert);
        self.order.land_jump(&landing);
        self.pre_order.adopt_made_eligible(&landing.made_eligible, &self.member_order);
        if landing.view > self.view {
            self.install_view(landing.view, out);
        }
    }

    fn proposal_digest_snapshot(&self) -> prime_types::Hash {
        self.order
            .slots
            .values()
            .rev()
            .find_map(|s| s.pp_digest)
            .unwrap_or(prime_types::Hash::ZERO)
    }

    pub fn build_catchup_request(&mut self, flag: CatchupFlag, nonce: Nonce) -> CatchupRequest {
        let aru = self.order.next_seq.saturating_sub(1);
        let po_aru = self.pre_order.periodic_po_aru(&self.member_order).cum_aru;
        let digest = self.proposal_digest_snapshot();
        self.catchup_requester.build_request(flag, aru, po_aru, digest, nonce)
    }

    // ------------------------------------------------------------------
    // Timers / ticks
    // ------------------------------------------------------------------

    fn on_timeout(&mut self, kind: TimeoutKind, out: &mut ReplicaOutput) {
        match kind {
            TimeoutKind::PoAru => self.submit_po_aru(out),
            TimeoutKind::PrePrepare => self.leader_tick_pre_prepare(0, out),
            TimeoutKind::Heartbeat | TimeoutKind::RttMeasure => {}
            TimeoutKind::PrimaryAbdicate => self.check_suspicion(500_000_000, out),
            TimeoutKind::CatchupSync => {
                let nonce = Nonce::new(self.last_catchup_nonce.as_u64() + 1);
                self.last_catchup_nonce = nonce;
                let req = self.build_catchup_request(CatchupFlag::Periodic, nonce);
                out.broadcast(self.own, &self.signing_key, MessagePayload::CatchupRequest(req));
            }
            TimeoutKind::CommitStall => {}
            TimeoutKind::RecoveryUpdateTimestamp => {}
        }
    }

    fn on_tick(&mut self, now_ns: u64, out: &mut ReplicaOutput) {
        self.last_now_ns = now_ns;
        self.maybe_broadcast_reset_proposal(out);
        self.maybe_suspect_reset_leader(out);
    }

    /// The leader of the current reset-leader view, once `SYSTEM_RESET_MIN_WAIT`
    /// has genuinely elapsed and a `ResetShare` quorum is in hand, proposes
    /// exactly once (§4.5).
    fn maybe_broadcast_reset_proposal(&mut self, out: &mut ReplicaOutput) {
        if self.recovery.proposal_sent() {
            return;
        }
        if self.recovery.reset_leader_view().leader_of(self.params().n) != self.own {
            return;
        }
        let elapsed = self.recovery.elapsed_since_reset(self.last_now_ns);
        if let Some(proposal) = self.recovery.build_reset_proposal(self.own, elapsed) {
            self.recovery.mark_proposal_sent();
            out.broadcast(
                self.own,
                &self.signing_key,
                MessagePayload::ResetProposal(proposal),
            );
        }
    }

    /// If the reset leader hasn't proposed within `RESET_LEADER_SUSPECT_WAIT`,
    /// vote to rotate it (§4.5's `ResetNewLeader -> ... -> ResetNewView`
    /// chain).
    fn maybe_suspect_reset_leader(&mut self, out: &mut ReplicaOutput) {
        let elapsed = self.recovery.elapsed_since_reset(self.last_now_ns);
        if !self.recovery.should_suspect_reset_leader(elapsed) {
            return;
        }
        self.recovery.mark_reset_new_leader_sent();
        let new_view = self.recovery.reset_leader_view().next();
        let vote = ResetNewLeader {
            replica: self.own,
            new_view,
        };
        out.broadcast(self.own, &self.signing_key, MessagePayload::ResetNewLeader(vote));
    }

    pub fn current_ordinal(&self) -> Ordinal {
        Ordinal::no_op(self.order.next_seq.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_crypto::envelope::ReplicaSigningKey;
    use prime_crypto::threshold::TcDealer;
    use std::collections::BTreeMap;

    fn test_cluster(
        n: u32,
        f: u32,
        k: u32,
    ) -> (ClusterConfig, Vec<ReplicaSigningKey>, Vec<TcSecretShare>, TcPublicKeySet) {
        let params = ClusterParams::new(n, f, k).unwrap();
        let mut members = BTreeMap::new();
        let mut keys = Vec::new();
        for id in params.iter_replicas() {
            let sk = ReplicaSigningKey::deterministic_for_tests(id.as_u32());
            members.insert(
                id,
                crate::cluster::MemberInfo {
                    role: prime_types::NodeRole::ControlCenter,
                    verifying_key: sk.verifying_key(),
                },
            );
            keys.push(sk);
        }
        let dealer = TcDealer::generate(f as usize);
        let vc_pks = TcPublicKeySet::new(dealer.public_key_set());
        let vc_shares: Vec<TcSecretShare> = (0..n as usize).map(|i| dealer.share_for(i)).collect();
        (ClusterConfig::new(params, members), keys, vc_shares, vc_pks)
    }

    #[test]
    fn client_request_produces_a_signed_broadcast_po_request() {
        let (cfg, keys, shares, vc_pks) = test_cluster(4, 1, 0);
        let mut replica = ReplicaState::new(
            ReplicaId::new(1),
            cfg,
            keys[0].clone(),
            shares[0].clone(),
            vc_pks,
        );
        let out = replica.process(ReplicaEvent::ClientRequest(b"hello".to_vec()));
        assert_eq!(out.outgoing.len(), 1);
        assert_eq!(out.outgoing[0].name(), "PO_REQUEST");
        assert!(out.outgoing[0].is_broadcast());
        assert!(out.outgoing[0].is_signed());
    }

    #[test]
    fn leader_of_initial_view_is_replica_one() {
        let (cfg, keys, shares, vc_pks) = test_cluster(4, 1, 0);
        let replica = ReplicaState::new(
            ReplicaId::new(1),
            cfg,
            keys[0].clone(),
            shares[0].clone(),
            vc_pks,
        );
        assert!(replica.is_leader());
    }

    #[test]
    fn full_round_trip_commits_a_client_request_across_four_replicas() {
        let (cfg, keys, shares, vc_pks) = test_cluster(4, 1, 0);
        let mut replicas: Vec<ReplicaState> = (1..=4)
            .map(|i| {
                ReplicaState::new(
                    ReplicaId::new(i),
                    cfg.clone(),
                    keys[(i - 1) as usize].clone(),
                    shares[(i - 1) as usize].clone(),
                    vc_pks.clone(),
                )
            })
            .collect();

        // Leader (replica 1) submits a client request: PoRequest broadcast.
        let out = replicas[0].process(ReplicaEvent::ClientRequest(b"update".to_vec()));
        let po_request = out.outgoing[0].clone();

        // Every replica (including the leader) processes the PoRequest and acks.
        let mut acks = Vec::new();
        for r in replicas.iter_mut() {
            let out = r.process(ReplicaEvent::Message(po_request.clone()));
            acks.extend(out.outgoing);
        }

        // Feed all acks to all replicas; big_quorum=3 certifies the slot and
        // advances cum_aru everywhere.
        for ack in &acks {
            for r in replicas.iter_mut() {
                r.process(ReplicaEvent::Message(ack.clone()));
            }
        }

        // Every replica reports its PoAru so the leader's matrix is non-empty.
        let mut aru_msgs = Vec::new();
        for r in replicas.iter_mut() {
            let mut o = ReplicaOutput::default();
            r.submit_po_aru(&mut o);
            aru_msgs.extend(o.outgoing);
        }
        for aru in &aru_msgs {
            for r in replicas.iter_mut() {
                r.process(ReplicaEvent::Message(aru.clone()));
            }
        }

        // Leader proposes; fan the Pre-Prepare/Prepare/Commit pipeline out.
        let mut frontier = {
            let mut o = ReplicaOutput::default();
            replicas[0].leader_tick_pre_prepare(0, &mut o);
            o.outgoing
        };
        assert!(!frontier.is_empty(), "leader must propose once matrix is non-empty");

        // Run three rounds: PrePrepare -> Prepare -> Commit, broadcasting
        // whatever each round produces to every replica.
        for _ in 0..3 {
            let mut next = Vec::new();
            for msg in &frontier {
                for r in replicas.iter_mut() {
                    let out = r.process(ReplicaEvent::Message(msg.clone()));
                    next.extend(out.outgoing);
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }

        // At least one replica committed the origin's PoSeq.
        let mut committed_anywhere = false;
        for r in replicas.iter_mut() {
            let out = r.process(ReplicaEvent::Tick { now_ns: 0 });
            if !out.committed.is_empty() {
                committed_anywhere = true;
            }
        }
        // `drain_ready_ordinals` also runs inside every `process` call above,
        // so check the replicas' own executed phase directly as a fallback.
        let any_executed = replicas.iter().any(|r| {
            r.order
                .phase(1)
                .map(|p| p == crate::order::Phase::Executed)
                .unwrap_or(false)
        });
        assert!(committed_anywhere || any_executed);
    }
}
