//! Application state management.
//!
//! The stub keeps state as a plain point-value map, sufficient to exercise
//! the kernel/effect/checkpoint plumbing above it without committing to any
//! real substation data model (out of scope per spec §1).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::PointId;

/// In-memory application state, snapshot-able for checkpointing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    points: BTreeMap<PointId, i64>,
    breakers_closed: BTreeMap<PointId, bool>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point_value(&self, point: PointId) -> Option<i64> {
        self.points.get(&point).copied()
    }

    pub fn breaker_closed(&self, point: PointId) -> Option<bool> {
        self.breakers_closed.get(&point).copied()
    }

    pub(crate) fn set_point(&mut self, point: PointId, value: i64) {
        self.points.insert(point, value);
    }

    pub(crate) fn set_breaker(&mut self, point: PointId, close: bool) {
        self.breakers_closed.insert(point, close);
    }

    /// Serializes the full state for checkpointing (`itrc::checkpoint`
    /// encrypts whatever bytes this returns).
    pub fn snapshot(&self) -> Vec<u8> {
        postcard::to_allocvec(self).expect("state snapshot must serialize")
    }

    /// Reconstructs state from a checkpoint snapshot.
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
