//! Scripted indexing session.
//!
//! Starts an [`Index`] over an in-memory store and an [`AnalysisServer`]
//! whose analysis results feed it, edits one context, waits for the server to
//! go idle and prints a JSON summary of what ended up in the index.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use analysis_server::{
    AnalysisEngine, AnalysisOptions, AnalysisServer, ChangeNotice, ChangeSet, NotificationKind,
    ServerConfig, ServerError, ServerListener,
};
use anyhow::Context as _;
use clap::Parser;
use index_core::{
    Element, Index, Location, MemoryIndexStore, PendingSources, ProcessorConfig, Relationship,
    SourceContribution, SourceId, TracingFailureSink,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "indexer-demo")]
#[command(about = "Drive an analysis server and its index through a scripted session")]
struct Args {
    /// Number of sources added to the demo context
    #[arg(long, env = "INDEXER_DEMO_SOURCES", default_value_t = 5)]
    sources: usize,

    /// Poll interval of the index processor and server loop, in milliseconds
    #[arg(long, env = "INDEXER_DEMO_POLL_MS", default_value_t = 10)]
    poll_ms: u64,

    /// How long to wait for the server to go idle, in milliseconds
    #[arg(long, env = "INDEXER_DEMO_IDLE_TIMEOUT_MS", default_value_t = 5_000)]
    idle_timeout_ms: u64,

    /// Never start the index worker, so every indexing request stays pending
    #[arg(long)]
    skip_index_start: bool,

    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, env = "INDEXER_DEMO_LOG", default_value = "info")]
    log_level: String,
}

/// Engine that "analyzes" one pending source per step.
#[derive(Default)]
struct DemoEngine {
    pending: Mutex<HashMap<String, VecDeque<SourceId>>>,
}

impl AnalysisEngine for DemoEngine {
    fn create_context(&self, context_id: &str, _sdk_directory: &str) -> anyhow::Result<()> {
        self.pending.lock().insert(context_id.to_string(), VecDeque::new());
        Ok(())
    }

    fn delete_context(&self, context_id: &str) -> anyhow::Result<()> {
        self.pending.lock().remove(context_id);
        Ok(())
    }

    fn apply_changes(&self, context_id: &str, changes: &ChangeSet) -> anyhow::Result<()> {
        let mut pending = self.pending.lock();
        let queue = pending
            .get_mut(context_id)
            .with_context(|| format!("unknown context {context_id}"))?;
        queue.retain(|source| !changes.removed.contains(source));
        queue.extend(changes.added.iter().chain(&changes.changed).cloned());
        Ok(())
    }

    fn set_options(&self, _context_id: &str, _options: &AnalysisOptions) -> anyhow::Result<()> {
        Ok(())
    }

    fn set_priority_sources(&self, context_id: &str, sources: &[SourceId]) -> anyhow::Result<()> {
        let mut pending = self.pending.lock();
        if let Some(queue) = pending.get_mut(context_id) {
            // Priority sources move to the front, keeping their given order.
            let mut front: VecDeque<SourceId> = VecDeque::new();
            queue.retain(|source| {
                let wanted = sources.contains(source);
                if wanted {
                    front.push_back(source.clone());
                }
                !wanted
            });
            while let Some(source) = front.pop_back() {
                queue.push_front(source);
            }
        }
        Ok(())
    }

    fn perform_analysis_task(
        &self,
        context_id: &str,
    ) -> anyhow::Result<Option<Vec<ChangeNotice>>> {
        let Some(source) = self
            .pending
            .lock()
            .get_mut(context_id)
            .and_then(VecDeque::pop_front)
        else {
            return Ok(None);
        };

        let mut notice = ChangeNotice::new(source.clone());
        notice.contribution = Some(SourceContribution {
            relationships: vec![(
                Element::new("lib.dart", "main"),
                Relationship::new("is-referenced-by"),
                Location::new(source, 0, 4),
            )],
            attributes: Vec::new(),
        });
        Ok(Some(vec![notice]))
    }
}

#[derive(Default)]
struct CountingListener {
    notifications: AtomicUsize,
    errors: AtomicUsize,
}

impl ServerListener for CountingListener {
    fn computed_notification(
        &self,
        context_id: &str,
        kind: NotificationKind,
        notice: &ChangeNotice,
    ) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        info!(context = context_id, ?kind, source = %notice.source, "notification");
    }

    fn server_error(&self, operation: &str, error: &ServerError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!(operation, %error, "request failed");
    }
}

#[derive(Serialize)]
struct Summary {
    version: String,
    contexts: Vec<String>,
    notifications: usize,
    errors: usize,
    references: Option<usize>,
    pending_sources: PendingSources,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let poll_interval = Duration::from_millis(args.poll_ms);
    let index = Arc::new(Index::with_config(
        MemoryIndexStore::new(),
        ProcessorConfig {
            poll_interval,
            ..ProcessorConfig::default()
        },
        Arc::new(TracingFailureSink),
    ));
    if !args.skip_index_start {
        let running = index.start().context("failed to start index processor")?;
        info!(running, "index processor started");
    }

    let listener = Arc::new(CountingListener::default());
    let server = Arc::new(
        AnalysisServer::new(
            ServerConfig {
                poll_interval,
                ..ServerConfig::default()
            },
            Arc::new(DemoEngine::default()),
            listener.clone(),
        )
        .with_indexer(index.clone()),
    );
    let handle = server.start()?;

    let sources: Vec<SourceId> = (0..args.sources)
        .map(|i| SourceId::new(format!("file:///demo/src/part_{i}.dart")))
        .collect();
    server.create_context("demo", "/opt/sdk")?;
    server.subscribe(
        "demo",
        HashMap::from([(
            NotificationKind::Errors,
            sources.iter().cloned().collect::<HashSet<_>>(),
        )]),
    )?;
    server.apply_changes(
        "demo",
        ChangeSet {
            added: sources.clone(),
            ..ChangeSet::default()
        },
    )?;
    if let Some(last) = sources.last() {
        server.set_priority_sources("demo", vec![last.clone()])?;
    }

    if !server
        .wait_for_idle(Duration::from_millis(args.idle_timeout_ms))
        .await
    {
        warn!("server did not go idle before the timeout");
    }
    let version = server.get_version().await?;
    let contexts = server.context_ids();
    server.shutdown();
    handle.await.context("server loop panicked")?;

    let references = if args.skip_index_start {
        None
    } else {
        let (tx, rx) = mpsc::channel();
        index.get_relationships(
            Element::new("lib.dart", "main"),
            Relationship::new("is-referenced-by"),
            move |_: &Element, _: &Relationship, locations: Vec<Location>| {
                let _ = tx.send(locations.len());
            },
        );
        let timeout = Duration::from_millis(args.idle_timeout_ms);
        let count = tokio::task::spawn_blocking(move || rx.recv_timeout(timeout))
            .await
            .context("lookup task panicked")?
            .context("index did not answer the lookup")?;
        Some(count)
    };

    let pending_sources = index.stop(true);
    let summary = Summary {
        version,
        contexts,
        notifications: listener.notifications.load(Ordering::Relaxed),
        errors: listener.errors.load(Ordering::Relaxed),
        references,
        pending_sources,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
