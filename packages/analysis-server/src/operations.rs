//! Concrete requests scheduled by [`AnalysisServer`].

use index_core::SourceId;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::engine::{AnalysisOptions, ChangeNotice, ChangeSet, NotificationKind, Subscriptions};
use crate::operation::{MergeKey, ServerOperation, ServerOperationPriority};
use crate::server::AnalysisServer;

/// Ends the server's drain loop. Served before anything else.
#[derive(Debug)]
pub struct ShutdownOperation;

impl ServerOperation for ShutdownOperation {
    fn priority(&self) -> ServerOperationPriority {
        ServerOperationPriority::Shutdown
    }

    fn is_shutdown(&self) -> bool {
        true
    }

    fn perform(&self, _server: &AnalysisServer) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Answers the server version.
#[derive(Debug)]
pub struct GetVersionOperation {
    reply: Mutex<Option<oneshot::Sender<String>>>,
}

impl GetVersionOperation {
    #[must_use]
    pub fn new(reply: oneshot::Sender<String>) -> Self {
        Self {
            reply: Mutex::new(Some(reply)),
        }
    }
}

impl ServerOperation for GetVersionOperation {
    fn priority(&self) -> ServerOperationPriority {
        ServerOperationPriority::Server
    }

    fn perform(&self, server: &AnalysisServer) -> anyhow::Result<()> {
        if let Some(reply) = self.reply.lock().take() {
            // The requester may have given up; nothing to report then.
            let _ = reply.send(server.version().to_string());
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct CreateContextOperation {
    pub context_id: String,
    pub sdk_directory: String,
}

impl ServerOperation for CreateContextOperation {
    fn priority(&self) -> ServerOperationPriority {
        ServerOperationPriority::ContextChange
    }

    fn context_id(&self) -> Option<&str> {
        Some(&self.context_id)
    }

    fn perform(&self, server: &AnalysisServer) -> anyhow::Result<()> {
        server.internal_create_context(&self.context_id, &self.sdk_directory)
    }
}

#[derive(Debug)]
pub struct DeleteContextOperation {
    pub context_id: String,
}

impl ServerOperation for DeleteContextOperation {
    fn priority(&self) -> ServerOperationPriority {
        ServerOperationPriority::ContextChange
    }

    fn context_id(&self) -> Option<&str> {
        Some(&self.context_id)
    }

    fn perform(&self, server: &AnalysisServer) -> anyhow::Result<()> {
        server.internal_delete_context(&self.context_id)
    }
}

#[derive(Debug)]
pub struct ApplyChangesOperation {
    pub context_id: String,
    pub changes: ChangeSet,
}

impl ServerOperation for ApplyChangesOperation {
    fn priority(&self) -> ServerOperationPriority {
        ServerOperationPriority::ContextChange
    }

    fn context_id(&self) -> Option<&str> {
        Some(&self.context_id)
    }

    fn perform(&self, server: &AnalysisServer) -> anyhow::Result<()> {
        server.internal_apply_changes(&self.context_id, &self.changes)
    }
}

/// Replaces a context's options; only the latest queued request survives.
#[derive(Debug)]
pub struct SetOptionsOperation {
    pub context_id: String,
    pub options: AnalysisOptions,
}

impl ServerOperation for SetOptionsOperation {
    fn priority(&self) -> ServerOperationPriority {
        ServerOperationPriority::ContextChange
    }

    fn context_id(&self) -> Option<&str> {
        Some(&self.context_id)
    }

    fn merge_key(&self) -> Option<MergeKey> {
        Some(MergeKey::new("set-options", &self.context_id))
    }

    fn perform(&self, server: &AnalysisServer) -> anyhow::Result<()> {
        server.internal_set_options(&self.context_id, &self.options)
    }
}

/// Replaces a context's priority sources; only the latest queued request survives.
#[derive(Debug)]
pub struct SetPrioritySourcesOperation {
    pub context_id: String,
    pub sources: Vec<SourceId>,
}

impl ServerOperation for SetPrioritySourcesOperation {
    fn priority(&self) -> ServerOperationPriority {
        ServerOperationPriority::ContextChange
    }

    fn context_id(&self) -> Option<&str> {
        Some(&self.context_id)
    }

    fn merge_key(&self) -> Option<MergeKey> {
        Some(MergeKey::new("set-priority-sources", &self.context_id))
    }

    fn perform(&self, server: &AnalysisServer) -> anyhow::Result<()> {
        server.internal_set_priority_sources(&self.context_id, &self.sources)
    }
}

/// Replaces a context's notification subscriptions.
#[derive(Debug)]
pub struct SubscribeOperation {
    pub context_id: String,
    pub subscriptions: Subscriptions,
}

impl ServerOperation for SubscribeOperation {
    fn priority(&self) -> ServerOperationPriority {
        ServerOperationPriority::ContextChange
    }

    fn context_id(&self) -> Option<&str> {
        Some(&self.context_id)
    }

    fn merge_key(&self) -> Option<MergeKey> {
        Some(MergeKey::new("subscribe", &self.context_id))
    }

    fn perform(&self, server: &AnalysisServer) -> anyhow::Result<()> {
        server.internal_subscribe(&self.context_id, &self.subscriptions)
    }
}

/// Delivers one subscribed result to the listener.
#[derive(Debug)]
pub struct NotificationOperation {
    pub context_id: String,
    pub kind: NotificationKind,
    pub notice: ChangeNotice,
}

impl ServerOperation for NotificationOperation {
    fn priority(&self) -> ServerOperationPriority {
        ServerOperationPriority::ContextNotification
    }

    fn context_id(&self) -> Option<&str> {
        Some(&self.context_id)
    }

    fn perform(&self, server: &AnalysisServer) -> anyhow::Result<()> {
        server
            .listener()
            .computed_notification(&self.context_id, self.kind, &self.notice);
        Ok(())
    }
}

/// One step of analysis for a context.
///
/// At most one is queued per context: scheduling another replaces it.
#[derive(Debug)]
pub struct PerformAnalysisOperation {
    pub context_id: String,
    pub is_priority: bool,
    pub is_continue: bool,
}

impl ServerOperation for PerformAnalysisOperation {
    fn priority(&self) -> ServerOperationPriority {
        ServerOperationPriority::analysis(self.is_priority, self.is_continue)
    }

    fn context_id(&self) -> Option<&str> {
        Some(&self.context_id)
    }

    fn merge_key(&self) -> Option<MergeKey> {
        Some(MergeKey::new("perform-analysis", &self.context_id))
    }

    fn perform(&self, server: &AnalysisServer) -> anyhow::Result<()> {
        server.internal_perform_analysis(&self.context_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_priority_follows_flags() {
        let op = PerformAnalysisOperation {
            context_id: "ctx".to_string(),
            is_priority: true,
            is_continue: true,
        };
        assert_eq!(
            op.priority(),
            ServerOperationPriority::PriorityContextAnalysisContinue
        );
        assert_eq!(
            op.merge_key(),
            Some(MergeKey::new("perform-analysis", "ctx"))
        );
    }

    #[test]
    fn context_changes_share_a_lane_but_not_merge_keys() {
        let options = SetOptionsOperation {
            context_id: "ctx".to_string(),
            options: AnalysisOptions::default(),
        };
        let sources = SetPrioritySourcesOperation {
            context_id: "ctx".to_string(),
            sources: vec![SourceId::new("a.dart")],
        };
        assert_eq!(options.priority(), sources.priority());
        assert_ne!(options.merge_key(), sources.merge_key());
    }

    #[test]
    fn only_shutdown_ends_the_loop() {
        assert!(ShutdownOperation.is_shutdown());
        assert_eq!(
            ShutdownOperation.priority(),
            ServerOperationPriority::Shutdown
        );
        let (tx, _rx) = oneshot::channel();
        assert!(!GetVersionOperation::new(tx).is_shutdown());
    }
}
