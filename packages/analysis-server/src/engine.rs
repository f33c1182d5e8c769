//! Collaborators of the analysis server: the analysis engine that does the
//! actual work, the listener that receives results, and the index that
//! analysis results are fed into.

use std::collections::{HashMap, HashSet};

use index_core::{Index, IndexStore, SourceContribution, SourceId};
use serde::{Deserialize, Serialize};

use crate::operation::ServerError;

/// Options that control analysis of one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Maximum number of sources whose analysis results are cached.
    pub cache_size: usize,
    /// Whether hints are computed in addition to errors.
    pub hint: bool,
    /// Whether re-analysis after an edit is incremental.
    pub incremental: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            cache_size: 64,
            hint: true,
            incremental: true,
        }
    }
}

/// Sources added, changed and removed in one edit of a context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<SourceId>,
    pub changed: Vec<SourceId>,
    pub removed: Vec<SourceId>,
}

/// Result category a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Errors,
    Highlights,
    Navigation,
    Outline,
}

/// Per-kind set of sources a client wants notifications for.
pub type Subscriptions = HashMap<NotificationKind, HashSet<SourceId>>;

/// What one analysis step learned about one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub source: SourceId,
    /// Diagnostics computed for the source.
    pub errors: Vec<String>,
    /// Index facts for the source, when its unit was resolved in this step.
    pub contribution: Option<SourceContribution>,
}

impl ChangeNotice {
    #[must_use]
    pub fn new(source: impl Into<SourceId>) -> Self {
        Self {
            source: source.into(),
            errors: Vec::new(),
            contribution: None,
        }
    }
}

/// The analysis engine behind the server. Called only from the server's
/// drain loop, one call at a time.
pub trait AnalysisEngine: Send + Sync {
    /// Prepare a new, empty context.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot set the context up (e.g. bad SDK).
    fn create_context(&self, context_id: &str, sdk_directory: &str) -> anyhow::Result<()>;

    /// Release everything held for a context.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to release the context.
    fn delete_context(&self, context_id: &str) -> anyhow::Result<()>;

    /// Apply an edit to a context.
    ///
    /// # Errors
    ///
    /// Returns an error if the edit cannot be applied.
    fn apply_changes(&self, context_id: &str, changes: &ChangeSet) -> anyhow::Result<()>;

    /// Replace the options of a context.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are rejected.
    fn set_options(&self, context_id: &str, options: &AnalysisOptions) -> anyhow::Result<()>;

    /// Tell the engine which sources to analyze first.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the sources.
    fn set_priority_sources(&self, context_id: &str, sources: &[SourceId]) -> anyhow::Result<()>;

    /// Perform one bounded step of analysis.
    ///
    /// Returns `None` when the context has nothing left to analyze.
    ///
    /// # Errors
    ///
    /// Returns an error if the analysis step fails.
    fn perform_analysis_task(&self, context_id: &str) -> anyhow::Result<Option<Vec<ChangeNotice>>>;
}

/// Receives results and errors produced by the server.
///
/// All methods default to no-ops so listeners only implement what they need.
pub trait ServerListener: Send + Sync {
    /// A subscribed result is available.
    fn computed_notification(
        &self,
        _context_id: &str,
        _kind: NotificationKind,
        _notice: &ChangeNotice,
    ) {
    }

    /// A request could not be completed.
    fn server_error(&self, _operation: &str, _error: &ServerError) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl ServerListener for NullListener {}

/// Where analysis results are indexed.
pub trait SourceIndexer: Send + Sync {
    fn index_source(&self, source: SourceId, contribution: SourceContribution);

    fn remove_source(&self, source: SourceId);
}

impl<S: IndexStore> SourceIndexer for Index<S> {
    fn index_source(&self, source: SourceId, contribution: SourceContribution) {
        Index::index_source(self, source, contribution);
    }

    fn remove_source(&self, source: SourceId) {
        Index::remove_source(self, source);
    }
}
