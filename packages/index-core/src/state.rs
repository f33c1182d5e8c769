//! Processor lifecycle state machine.
//!
//! State machine: Ready -> Running -> `StopRequested` -> Stopped, with
//! Ready -> Stopped when a processor is stopped before it ever ran. Every
//! change goes through [`transition`].

use std::fmt;

use crate::error::ProcessorError;

/// Lifecycle state of an [`OperationProcessor`](crate::OperationProcessor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorState {
    /// Constructed, `run()` not yet called.
    Ready,
    /// The worker loop is draining the queue.
    Running,
    /// `stop()` was called; the loop exits after the current operation.
    StopRequested,
    /// Terminal.
    Stopped,
}

/// Input to the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorEvent {
    /// `run()` was called.
    Run,
    /// `stop()` was called.
    Stop,
    /// The worker loop returned.
    LoopExited,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::StopRequested => "stop-requested",
            Self::Stopped => "stopped",
        })
    }
}

impl fmt::Display for ProcessorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Run => "run",
            Self::Stop => "stop",
            Self::LoopExited => "exit",
        })
    }
}

/// Computes the state that follows `current` on `event`.
///
/// `Stop` is idempotent once a stop is pending or complete. `LoopExited`
/// always lands in `Stopped` unless the processor never ran.
///
/// # Errors
///
/// Returns [`ProcessorError::InvalidState`] for transitions the lifecycle
/// does not allow, e.g. running a processor twice.
pub fn transition(
    current: ProcessorState,
    event: ProcessorEvent,
) -> Result<ProcessorState, ProcessorError> {
    use ProcessorEvent::{LoopExited, Run, Stop};
    use ProcessorState::{Ready, Running, StopRequested, Stopped};

    match (current, event) {
        (Ready, Run) => Ok(Running),
        (Ready, Stop) => Ok(Stopped),
        (Running, Stop) => Ok(StopRequested),
        (StopRequested | Stopped, Stop) => Ok(current),
        (Running | StopRequested | Stopped, LoopExited) => Ok(Stopped),
        (Running | StopRequested | Stopped, Run) | (Ready, LoopExited) => {
            Err(ProcessorError::InvalidState {
                state: current,
                event,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessorEvent::{LoopExited, Run, Stop};
    use ProcessorState::{Ready, Running, StopRequested, Stopped};

    #[test]
    fn legal_transitions() {
        assert_eq!(transition(Ready, Run), Ok(Running));
        assert_eq!(transition(Running, Stop), Ok(StopRequested));
        assert_eq!(transition(StopRequested, LoopExited), Ok(Stopped));
        assert_eq!(transition(Ready, Stop), Ok(Stopped));
    }

    #[test]
    fn stop_is_idempotent_after_first_stop() {
        assert_eq!(transition(StopRequested, Stop), Ok(StopRequested));
        assert_eq!(transition(Stopped, Stop), Ok(Stopped));
    }

    #[test]
    fn run_only_from_ready() {
        for state in [Running, StopRequested, Stopped] {
            assert_eq!(
                transition(state, Run),
                Err(ProcessorError::InvalidState { state, event: Run })
            );
        }
    }

    #[test]
    fn loop_cannot_exit_before_running() {
        assert!(transition(Ready, LoopExited).is_err());
    }

    #[test]
    fn error_message_names_state_and_event() {
        let err = transition(Stopped, Run).unwrap_err();
        assert_eq!(err.to_string(), "cannot run a processor in state stopped");
    }
}
