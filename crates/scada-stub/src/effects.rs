//! Effects produced by the kernel.
//!
//! Effects represent side effects the runtime must execute after a command
//! is applied. The kernel is pure — it produces effects but never executes
//! them directly (the same split the teacher's kernel makes between
//! `apply_committed` and `Runtime::execute_effect`).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::command::PointId;

/// An effect to be executed by the runtime once a command has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Actuate a physical relay/breaker through the relay emulator.
    RelayActuate { point: PointId, close: bool },

    /// Push an updated value to the HMI for operator display.
    HmiNotify { point: PointId, value: i64 },

    /// Append an entry to the local audit log.
    AuditLogAppend { summary: String },

    /// Forward an opaque reply payload back to the originating client once
    /// its TC_Final has combined (spec §4.7: "forwards to the external
    /// network addressed by payload content").
    ClientReply { payload: Bytes },
}
