//! Test doubles shared by the unit tests of this crate.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::operation::{Operation, OperationKind};
use crate::types::SourceId;

type Action = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Configurable operation whose `Debug` output is just its name.
pub(crate) struct TestOp {
    name: String,
    kind: OperationKind,
    source: Option<SourceId>,
    affinity: Option<SourceId>,
    removes: Option<SourceId>,
    action: Option<Action>,
}

impl TestOp {
    fn new(name: &str, kind: OperationKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            source: None,
            affinity: None,
            removes: None,
            action: None,
        }
    }

    pub(crate) fn mutation(name: &str) -> Self {
        Self::new(name, OperationKind::Mutation)
    }

    pub(crate) fn query(name: &str) -> Self {
        Self::new(name, OperationKind::Query)
    }

    pub(crate) fn removal(name: &str, source: &str) -> Self {
        let mut op = Self::new(name, OperationKind::Mutation);
        op.removes = Some(SourceId::new(source));
        op
    }

    /// Carries `source` and is purged when it is removed.
    pub(crate) fn with_source(mut self, source: &str) -> Self {
        self.source = Some(SourceId::new(source));
        self.affinity = Some(SourceId::new(source));
        self
    }

    /// Purged when `source` is removed, without carrying it.
    pub(crate) fn with_affinity(mut self, source: &str) -> Self {
        self.affinity = Some(SourceId::new(source));
        self
    }

    pub(crate) fn with_action(
        mut self,
        action: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.action = Some(Box::new(action));
        self
    }

    /// Appends the operation name to `log` when performed.
    pub(crate) fn logging_to(self, log: &Arc<Mutex<Vec<String>>>) -> Self {
        let log = Arc::clone(log);
        let name = self.name.clone();
        self.with_action(move || {
            log.lock().push(name.clone());
            Ok(())
        })
    }

    pub(crate) fn shared(self) -> Arc<dyn Operation> {
        Arc::new(self)
    }
}

impl fmt::Debug for TestOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Operation for TestOp {
    fn kind(&self) -> OperationKind {
        self.kind
    }

    fn perform(&self) -> anyhow::Result<()> {
        match &self.action {
            Some(action) => action(),
            None => Ok(()),
        }
    }

    fn affinity(&self, source: &SourceId) -> bool {
        self.affinity.as_ref() == Some(source)
    }

    fn as_removal(&self) -> Option<&SourceId> {
        self.removes.as_ref()
    }

    fn source(&self) -> Option<&SourceId> {
        self.source.as_ref().or(self.removes.as_ref())
    }
}
