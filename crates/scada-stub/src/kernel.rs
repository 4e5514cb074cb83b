//! The kernel — pure functional core of the SCADA application stub.
//!
//! The kernel applies committed commands to produce new state and effects.
//! It is completely pure: no IO, no clocks, no randomness. This makes it
//! deterministic and easy to test, and lets `itrc::scheduler::ItrcMaster`
//! call it directly from Prime's delivery path without owning any I/O
//! itself.

use thiserror::Error;

use crate::command::Command;
use crate::effects::Effect;
use crate::state::State;

/// Applies one Prime-delivered command to the state, producing new state
/// and the effects the runtime must execute. Takes ownership of state,
/// returns the new one.
pub fn apply_committed(mut state: State, cmd: Command) -> Result<(State, Vec<Effect>), KernelError> {
    let mut effects = Vec::new();

    match cmd {
        Command::SetPoint { point, value } => {
            state.set_point(point, value);
            effects.push(Effect::HmiNotify { point, value });
            effects.push(Effect::AuditLogAppend {
                summary: format!("setpoint {point:?} = {value}"),
            });
        }
        Command::BreakerCommand { point, close } => {
            state.set_breaker(point, close);
            effects.push(Effect::RelayActuate { point, close });
            effects.push(Effect::AuditLogAppend {
                summary: format!("breaker {point:?} close={close}"),
            });
        }
        Command::RawUpdate(payload) => {
            if payload.is_empty() {
                return Err(KernelError::EmptyRawUpdate);
            }
            effects.push(Effect::AuditLogAppend {
                summary: format!("raw update, {} bytes", payload.len()),
            });
        }
    }

    Ok((state, effects))
}

/// Applies a batch of commands in order, short-circuiting on the first
/// error (mirrors the teacher's `apply_committed_batch`).
pub fn apply_committed_batch(
    mut state: State,
    cmds: Vec<Command>,
) -> Result<(State, Vec<Effect>), KernelError> {
    let mut all_effects = Vec::new();
    for cmd in cmds {
        let (next_state, mut effects) = apply_committed(state, cmd)?;
        state = next_state;
        all_effects.append(&mut effects);
    }
    Ok((state, all_effects))
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("raw update payload must not be empty")]
    EmptyRawUpdate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::PointId;

    #[test]
    fn set_point_updates_state_and_notifies_hmi() {
        let state = State::new();
        let (state, effects) = apply_committed(
            state,
            Command::SetPoint {
                point: PointId(1),
                value: 42,
            },
        )
        .unwrap();
        assert_eq!(state.point_value(PointId(1)), Some(42));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::HmiNotify { value: 42, .. })));
    }

    #[test]
    fn breaker_command_actuates_relay() {
        let state = State::new();
        let (state, effects) = apply_committed(
            state,
            Command::BreakerCommand {
                point: PointId(2),
                close: true,
            },
        )
        .unwrap();
        assert_eq!(state.breaker_closed(PointId(2)), Some(true));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::RelayActuate { close: true, .. })));
    }

    #[test]
    fn empty_raw_update_is_rejected() {
        let state = State::new();
        let result = apply_committed(state, Command::RawUpdate(bytes::Bytes::new()));
        assert!(matches!(result, Err(KernelError::EmptyRawUpdate)));
    }

    #[test]
    fn batch_application_accumulates_effects_in_order() {
        let state = State::new();
        let cmds = vec![
            Command::SetPoint {
                point: PointId(1),
                value: 1,
            },
            Command::SetPoint {
                point: PointId(1),
                value: 2,
            },
        ];
        let (state, effects) = apply_committed_batch(state, cmds).unwrap();
        assert_eq!(state.point_value(PointId(1)), Some(2));
        assert_eq!(effects.len(), 4);
    }
}
