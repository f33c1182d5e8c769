use crate::state::{ProcessorEvent, ProcessorState};

/// Errors returned by [`OperationProcessor`](crate::OperationProcessor) lifecycle calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    #[error("cannot {event} a processor in state {state}")]
    InvalidState {
        state: ProcessorState,
        event: ProcessorEvent,
    },
}

/// How an operation failed while being performed.
#[derive(Debug)]
pub enum OperationFailure {
    /// `perform` returned an error.
    Error(anyhow::Error),
    /// `perform` panicked; carries the panic message when it was a string.
    Panic(String),
}

impl std::fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(err) => write!(f, "{err:#}"),
            Self::Panic(msg) => write!(f, "panicked: {msg}"),
        }
    }
}
