//! # itrc: Intrusion-Tolerant Reliable Channel
//!
//! Sits above [`prime_vsr`]'s ordering engine and turns its BFT-ordered
//! output into authoritative, client-verifiable replies (§4.7), periodic
//! encrypted checkpoints with stabilization (§4.8), and update-transfer
//! recovery for replicas that fall behind. Three scheduler tasks
//! (`Itrc_Master`, `Itrc_Prime_Inject`, `Itrc_Client`, §5) drive these
//! concerns cooperatively; the concrete select-loop and socket I/O live in
//! the `prime-node` shell.

pub mod checkpoint;
pub mod error;
pub mod message;
pub mod scheduler;
pub mod tc_queue;
pub mod update_transfer;

pub use error::{Error, Result};
