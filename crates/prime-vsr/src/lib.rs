//! Prime: a Byzantine-fault-tolerant ordering engine (§4 of the design).
//!
//! Each submodule owns one sub-protocol's state and is deliberately
//! transport-agnostic: it consumes and produces plain structs from
//! [`message`], never a socket or a clock. [`replica`] is the only module
//! that ties them together into one per-replica state machine.

pub mod catchup;
pub mod cluster;
pub mod error;
pub mod marzullo;
pub mod message;
pub mod order;
pub mod pre_order;
pub mod recovery;
pub mod reliable_broadcast;
pub mod replica;
pub mod suspect_leader;
pub mod view_change;

pub use error::{Error, Result};
