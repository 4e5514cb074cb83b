//! Commands the SCADA application layer accepts once Prime/ITRC has
//! delivered them in ordinal order.
//!
//! The actual substation semantics (switch/transformer/PNNL/EMS state
//! machines) are an external collaborator (spec §1 Non-goal); this crate
//! only defines the thin boundary Prime/ITRC calls across. A real
//! deployment's SCADA process links against this crate and provides its
//! own [`crate::kernel::StateMachine`] implementation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A point identifier within the substation's data model — left opaque
/// here since its shape (breaker/transformer/relay addressing scheme)
/// belongs to the external SCADA state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointId(pub u64);

/// A command carried inside one Prime-ordered update (spec §2 data flow:
/// "a client submits an update ... the SCADA state machine is advanced").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Writes a new analog/digital setpoint to a point.
    SetPoint { point: PointId, value: i64 },

    /// Commands a breaker/relay to open or close.
    BreakerCommand { point: PointId, close: bool },

    /// An opaque application-defined update the stub does not interpret,
    /// carried as raw bytes for the real SCADA state machine to decode.
    RawUpdate(Bytes),
}
