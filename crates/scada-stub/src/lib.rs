//! # scada-stub: Functional core of the SCADA application layer
//!
//! The real substation state machine, HMI rendering, and relay emulator are
//! external collaborators (spec.md §1 Non-goal): this crate only defines
//! the pure `Command -> (State, Vec<Effect>)` boundary Prime/ITRC calls
//! across, plus the IPC endpoint naming both sides agree on (§6) and a
//! stub `Runtime` sufficient for tests and local development.
//!
//! ## Key Principles
//!
//! - **No IO**: the kernel never touches disk, network, or any external resource
//! - **No clocks**: timestamps are added by the runtime, not the kernel
//! - **No randomness**: same input always produces same output
//! - **Pure functions**: `apply_committed(state, command) -> (state, effects)`
//!
//! ## Architecture
//!
//! - [`command`]: commands Prime/ITRC deliver (`SetPoint`, `BreakerCommand`)
//! - [`effects`]: effects for the runtime to execute (`RelayActuate`, `HmiNotify`)
//! - [`state`]: in-memory application state, snapshot-able for checkpointing
//! - [`kernel`]: the `apply_committed` function tying it all together
//! - [`runtime`]: HMI/relay/client-transport collaborator traits plus stubs
//! - [`ipc`]: the Unix-domain datagram endpoint naming convention (§6)

pub mod command;
pub mod effects;
pub mod ipc;
pub mod kernel;
pub mod runtime;
pub mod state;

pub use command::Command;
pub use effects::Effect;
pub use kernel::{KernelError, apply_committed, apply_committed_batch};
pub use runtime::{ClientTransport, HmiProxy, RelayProxy, Runtime, RuntimeError};
pub use state::State;
