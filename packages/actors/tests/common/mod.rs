#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actors::{AnalysisFuture, Analyzer, BatchEngine, CancellationToken, FnAnalyzer};
use batch_core::{BatchError, EngineConfig, JobEvent, JobId};
use db::{MemoryStore, StateStore};
use tokio::sync::{Semaphore, broadcast};

pub fn urls(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://example.com/site/{i}")).collect()
}

/// Default configuration with a fast dispatch tick.
pub fn test_config() -> EngineConfig {
    EngineConfig::default().with_dispatch_interval(Duration::from_millis(10))
}

pub async fn start_engine(
    config: EngineConfig,
    analyzer: impl Analyzer,
) -> Result<(BatchEngine, Arc<MemoryStore>), BatchError> {
    let store = Arc::new(MemoryStore::new());
    let engine = BatchEngine::start(
        config,
        store.clone() as Arc<dyn StateStore>,
        Arc::new(analyzer),
    )
    .await?;
    Ok((engine, store))
}

/// Analyzer that echoes the item key back.
pub fn echo_analyzer() -> impl Analyzer {
    FnAnalyzer::new("echo", |url: String, _cancel: CancellationToken| -> AnalysisFuture {
        Box::pin(async move { Ok(serde_json::json!({ "url": url })) })
    })
}

/// Analyzer that blocks every call until the gate is opened.
pub fn gated_analyzer(gate: Arc<Semaphore>) -> impl Analyzer {
    FnAnalyzer::new("gated", move |url: String, _cancel: CancellationToken| -> AnalysisFuture {
        let gate = gate.clone();
        Box::pin(async move {
            let _permit = gate.acquire().await.map_err(|e| e.to_string())?;
            Ok(serde_json::json!({ "url": url }))
        })
    })
}

pub fn open_gate(gate: &Semaphore) {
    gate.add_permits(Semaphore::MAX_PERMITS / 2);
}

/// Tracks how many analyzer calls run at the same time.
#[derive(Default)]
pub struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Receive events until the job finishes.
pub async fn events_until_finished(
    rx: &mut broadcast::Receiver<JobEvent>,
    job_id: JobId,
) -> Result<Vec<JobEvent>, Box<dyn std::error::Error>> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await??;
        let finished = matches!(&event, JobEvent::JobFinished { job_id: id, .. } if *id == job_id);
        events.push(event);
        if finished {
            return Ok(events);
        }
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
