//! Runtime layer that executes kernel effects.
//!
//! The kernel is pure and produces effects; the runtime executes them
//! against the external collaborators named in spec §1/§6 — HMI, RTU, and
//! relay emulator — each represented here only as a trait boundary. A real
//! deployment links its own HMI renderer / relay emulator behind these
//! traits; this crate ships stub in-memory implementations sufficient for
//! tests and local development.

use std::collections::VecDeque;

use bytes::Bytes;
use thiserror::Error;

use crate::command::PointId;
use crate::effects::Effect;

/// Pushes point updates to the operator display. The real HMI is an
/// external collaborator (spec §1); this is its interface boundary.
pub trait HmiProxy {
    fn notify(&mut self, point: PointId, value: i64);
}

/// Actuates physical relays/breakers. The relay emulator is an external
/// collaborator (spec §1); this is its interface boundary.
pub trait RelayProxy {
    fn actuate(&mut self, point: PointId, close: bool);
}

/// Delivers a threshold-signed reply back to the RTU/HMI client that
/// submitted the originating update (spec §4.7).
pub trait ClientTransport {
    fn deliver_reply(&mut self, payload: Bytes);
}

/// Runtime that executes kernel effects using pluggable collaborator
/// implementations. Generic over HMI/relay/client-transport so tests can
/// substitute in-memory stubs and a real deployment can substitute its own.
pub struct Runtime<H, R, T>
where
    H: HmiProxy,
    R: RelayProxy,
    T: ClientTransport,
{
    pub hmi: H,
    pub relay: R,
    pub transport: T,
    audit_log: Vec<String>,
}

impl<H, R, T> Runtime<H, R, T>
where
    H: HmiProxy,
    R: RelayProxy,
    T: ClientTransport,
{
    pub fn new(hmi: H, relay: R, transport: T) -> Self {
        Self {
            hmi,
            relay,
            transport,
            audit_log: Vec::new(),
        }
    }

    pub fn execute_effect(&mut self, effect: Effect) -> Result<(), RuntimeError> {
        match effect {
            Effect::RelayActuate { point, close } => {
                self.relay.actuate(point, close);
            }
            Effect::HmiNotify { point, value } => {
                self.hmi.notify(point, value);
            }
            Effect::AuditLogAppend { summary } => {
                self.audit_log.push(summary);
            }
            Effect::ClientReply { payload } => {
                self.transport.deliver_reply(payload);
            }
        }
        Ok(())
    }

    pub fn execute_effects(&mut self, effects: Vec<Effect>) -> Result<(), RuntimeError> {
        for effect in effects {
            self.execute_effect(effect)?;
        }
        Ok(())
    }

    pub fn audit_log(&self) -> &[String] {
        &self.audit_log
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("effect execution failed: {0}")]
    Failed(String),
}

/// In-memory HMI stub: records every notification it receives instead of
/// rendering anything.
#[derive(Debug, Default)]
pub struct StubHmi {
    pub updates: Vec<(PointId, i64)>,
}

impl HmiProxy for StubHmi {
    fn notify(&mut self, point: PointId, value: i64) {
        self.updates.push((point, value));
    }
}

/// In-memory relay stub: records every actuation instead of driving real
/// hardware.
#[derive(Debug, Default)]
pub struct StubRelay {
    pub actuations: Vec<(PointId, bool)>,
}

impl RelayProxy for StubRelay {
    fn actuate(&mut self, point: PointId, close: bool) {
        self.actuations.push((point, close));
    }
}

/// In-memory client transport stub: buffers replies instead of writing to
/// an RTU/HMI's IPC socket.
#[derive(Debug, Default)]
pub struct StubClientTransport {
    pub replies: VecDeque<Bytes>,
}

impl ClientTransport for StubClientTransport {
    fn deliver_reply(&mut self, payload: Bytes) {
        self.replies.push_back(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_dispatches_effects_to_their_collaborators() {
        let mut runtime = Runtime::new(StubHmi::default(), StubRelay::default(), StubClientTransport::default());
        runtime
            .execute_effects(vec![
                Effect::HmiNotify {
                    point: PointId(1),
                    value: 7,
                },
                Effect::RelayActuate {
                    point: PointId(2),
                    close: false,
                },
                Effect::ClientReply {
                    payload: Bytes::from_static(b"reply"),
                },
                Effect::AuditLogAppend {
                    summary: "test".into(),
                },
            ])
            .unwrap();

        assert_eq!(runtime.hmi.updates, vec![(PointId(1), 7)]);
        assert_eq!(runtime.relay.actuations, vec![(PointId(2), false)]);
        assert_eq!(runtime.transport.replies.len(), 1);
        assert_eq!(runtime.audit_log(), &["test".to_string()]);
    }
}
