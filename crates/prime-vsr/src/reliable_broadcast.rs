//! Reliable Broadcast (§4.4 step "4.5"): a three-phase Bracha-style
//! echo/ready broadcast, keyed by `(sender, rb_seq, view)`. Used to deliver
//! `Report` and `PcSet` messages during view change with the guarantee that
//! every correct replica delivers the same payload or none at all.

use std::collections::{BTreeMap, BTreeSet};

use prime_types::{ClusterParams, Hash, ReplicaId, View};

use crate::message::{RbEcho, RbInit, RbReady};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RbState {
    Init,
    SentEcho,
    SentReady,
    Delivered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RbKey {
    pub sender: ReplicaId,
    pub rb_seq: u64,
    pub view: View,
}

struct RbInstance {
    state: RbState,
    payload: Option<Vec<u8>>,
    digest: Option<Hash>,
    echoes: BTreeSet<ReplicaId>,
    readies: BTreeSet<ReplicaId>,
}

impl Default for RbInstance {
    fn default() -> Self {
        Self {
            state: RbState::Init,
            payload: None,
            digest: None,
            echoes: BTreeSet::new(),
            readies: BTreeSet::new(),
        }
    }
}

pub struct ReliableBroadcast {
    pub own: ReplicaId,
    pub params: ClusterParams,
    instances: BTreeMap<RbKey, RbInstance>,
}

impl ReliableBroadcast {
    pub fn new(own: ReplicaId, params: ClusterParams) -> Self {
        Self {
            own,
            params,
            instances: BTreeMap::new(),
        }
    }

    fn key_of(sender: ReplicaId, rb_seq: u64, view: View) -> RbKey {
        RbKey { sender, rb_seq, view }
    }

    /// On receiving an `RbInit`, echo it (§4.4/§4.5: every correct replica
    /// echoes the first init it sees for a key).
    pub fn on_init(&mut self, init: RbInit) -> Option<RbEcho> {
        let key = Self::key_of(init.sender, init.rb_seq, init.view);
        let inst = self.instances.entry(key).or_default();
        if inst.state != RbState::Init {
            return None;
        }
        inst.payload = Some(init.payload);
        inst.digest = Some(init.digest);
        inst.state = RbState::SentEcho;
        Some(RbEcho {
            sender: init.sender,
            rb_seq: init.rb_seq,
            view: init.view,
            digest: init.digest,
            echoer: self.own,
        })
    }

    /// On `echo >= 2f+k+1` matching echoes, send `ready` (deliver-amplify).
    /// On `ready >= f+1` (amplify, before having echoed ourselves) also send
    /// `ready`. On `ready >= 2f+k+1` the payload is delivered.
    pub fn on_echo(&mut self, echo: RbEcho) -> Option<RbReady> {
        let key = Self::key_of(echo.sender, echo.rb_seq, echo.view);
        let inst = self.instances.entry(key).or_default();
        inst.echoes.insert(echo.echoer);
        if inst.state == RbState::SentEcho
            && inst.digest == Some(echo.digest)
            && inst.echoes.len() as u32 >= self.params.big_quorum()
        {
            inst.state = RbState::SentReady;
            return Some(RbReady {
                sender: echo.sender,
                rb_seq: echo.rb_seq,
                view: echo.view,
                digest: echo.digest,
                reader: self.own,
            });
        }
        None
    }

    /// Returns `(maybe_amplify_ready, delivered_payload)`.
    pub fn on_ready(&mut self, ready: RbReady) -> (Option<RbReady>, Option<Vec<u8>>) {
        let key = Self::key_of(ready.sender, ready.rb_seq, ready.view);
        let inst = self.instances.entry(key).or_default();
        inst.readies.insert(ready.reader);
        let count = inst.readies.len() as u32;

        let mut amplify = None;
        if matches!(inst.state, RbState::Init | RbState::SentEcho)
            && count >= self.params.small_quorum()
        {
            inst.state = RbState::SentReady;
            amplify = Some(RbReady {
                sender: ready.sender,
                rb_seq: ready.rb_seq,
                view: ready.view,
                digest: ready.digest,
                reader: self.own,
            });
        }

        let mut delivered = None;
        if inst.state != RbState::Delivered && count >= self.params.big_quorum() {
            inst.state = RbState::Delivered;
            delivered = inst.payload.clone();
        }
        (amplify, delivered)
    }

    pub fn is_delivered(&self, sender: ReplicaId, rb_seq: u64, view: View) -> bool {
        self.instances
            .get(&Self::key_of(sender, rb_seq, view))
            .is_some_and(|i| i.state == RbState::Delivered)
    }

    /// Clears all in-progress instances at the start of a new view — no
    /// in-flight RB instance survives a view boundary (§4.4).
    pub fn clear_for_new_view(&mut self) {
        self.instances.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ClusterParams {
        ClusterParams::new(4, 1, 0).unwrap() // big_quorum=3, small_quorum=2
    }

    #[test]
    fn echo_ready_deliver_pipeline() {
        let view = View::new(1);
        let init = RbInit {
            sender: ReplicaId::new(1),
            rb_seq: 1,
            view,
            digest: Hash::ZERO,
            payload: b"report".to_vec(),
        };

        let mut r1 = ReliableBroadcast::new(ReplicaId::new(1), params());
        let mut r2 = ReliableBroadcast::new(ReplicaId::new(2), params());
        let mut r3 = ReliableBroadcast::new(ReplicaId::new(3), params());

        let e1 = r1.on_init(init.clone()).unwrap();
        let e2 = r2.on_init(init.clone()).unwrap();
        let e3 = r3.on_init(init).unwrap();

        // Feed all three echoes into replica 1; quorum of 3 triggers ready.
        assert!(r1.on_echo(e1.clone()).is_none());
        assert!(r1.on_echo(e2.clone()).is_none());
        let ready1 = r1.on_echo(e3.clone()).expect("big_quorum echoes reached");

        // Feed echoes into replica 2 and 3 too, so they also send ready.
        r2.on_echo(e1.clone());
        r2.on_echo(e2.clone());
        let ready2 = r2.on_echo(e3.clone()).unwrap();
        r3.on_echo(e1);
        r3.on_echo(e2);
        let ready3 = r3.on_echo(e3).unwrap();

        let (_, d1) = r1.on_ready(ready1.clone());
        assert!(d1.is_none());
        let (_, d2) = r1.on_ready(ready2);
        assert!(d2.is_none());
        let (_, d3) = r1.on_ready(ready3);
        assert_eq!(d3, Some(b"report".to_vec()));
        assert!(r1.is_delivered(ReplicaId::new(1), 1, view));
    }
}
