//! Server operation contract: priorities, merge keys, and errors.

use std::fmt;

use serde::Serialize;

use crate::server::AnalysisServer;

/// Scheduling class of a server operation.
///
/// Variants are declared from most to least urgent; the derived `Ord` puts
/// more urgent priorities first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerOperationPriority {
    Shutdown,
    Server,
    ContextChange,
    ContextNotification,
    PriorityContextAnalysisContinue,
    PriorityContextAnalysis,
    ContextAnalysisContinue,
    ContextAnalysis,
    Refactoring,
}

impl ServerOperationPriority {
    /// All priorities, most urgent first.
    pub const ALL: [Self; 9] = [
        Self::Shutdown,
        Self::Server,
        Self::ContextChange,
        Self::ContextNotification,
        Self::PriorityContextAnalysisContinue,
        Self::PriorityContextAnalysis,
        Self::ContextAnalysisContinue,
        Self::ContextAnalysis,
        Self::Refactoring,
    ];

    /// Position in [`ALL`](Self::ALL); used as the lane index.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Priority of an analysis step for a context.
    #[must_use]
    pub fn analysis(is_priority_context: bool, is_continue: bool) -> Self {
        match (is_priority_context, is_continue) {
            (true, true) => Self::PriorityContextAnalysisContinue,
            (true, false) => Self::PriorityContextAnalysis,
            (false, true) => Self::ContextAnalysisContinue,
            (false, false) => Self::ContextAnalysis,
        }
    }
}

/// Identity under which queued operations coalesce.
///
/// Two queued operations with equal keys are redundant: only the most recent
/// one needs to run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeKey {
    /// Operation kind, e.g. `"set-priority-sources"`.
    pub kind: &'static str,
    /// Context the operation targets.
    pub context_id: String,
}

impl MergeKey {
    #[must_use]
    pub fn new(kind: &'static str, context_id: impl Into<String>) -> Self {
        Self {
            kind,
            context_id: context_id.into(),
        }
    }
}

/// A request scheduled on the analysis server's queue.
pub trait ServerOperation: fmt::Debug + Send {
    /// Which lane the operation is queued in.
    fn priority(&self) -> ServerOperationPriority;

    /// Context the operation is bound to, if any.
    ///
    /// Deleting a context discards every queued operation bound to it.
    fn context_id(&self) -> Option<&str> {
        None
    }

    /// `Some` if a newer operation with the same key replaces this one.
    fn merge_key(&self) -> Option<MergeKey> {
        None
    }

    /// Whether taking this operation ends the drain loop.
    fn is_shutdown(&self) -> bool {
        false
    }

    /// Execute the operation on the server's drain loop.
    ///
    /// # Errors
    ///
    /// Returns the error to report to the server listener; the loop continues.
    fn perform(&self, server: &AnalysisServer) -> anyhow::Result<()>;
}

/// Errors reported by the analysis server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid context id: {0}")]
    InvalidContextId(String),
    #[error("context already exists: {0}")]
    ContextAlreadyExists(String),
    #[error("server is shutting down")]
    ShuttingDown,
    #[error("server drain loop already started")]
    AlreadyStarted,
    #[error("server dropped the request before answering")]
    ResponseDropped,
    #[error("operation failed: {0:#}")]
    Operation(#[from] anyhow::Error),
}
