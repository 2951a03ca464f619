//! Stand-in analyzer for running batches without an external service.

use std::time::Duration;

use actors::{AnalysisFuture, Analyzer, CancellationToken};

/// Waits a fixed delay per item, then reports the key back.
///
/// Keys containing `fail_marker` fail with an execution error.
pub struct SimulatedAnalyzer {
    delay: Duration,
    fail_marker: Option<String>,
}

impl SimulatedAnalyzer {
    pub fn new(delay: Duration, fail_marker: Option<String>) -> Self {
        Self { delay, fail_marker }
    }
}

impl Analyzer for SimulatedAnalyzer {
    fn name(&self) -> &str {
        "simulated"
    }

    fn analyze(&self, item_key: &str, cancel: CancellationToken) -> AnalysisFuture {
        let delay = self.delay;
        let key = item_key.to_string();
        let fails = self
            .fail_marker
            .as_deref()
            .is_some_and(|marker| key.contains(marker));

        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => return Err("analysis cancelled".to_string()),
                _ = tokio::time::sleep(delay) => {}
            }
            if fails {
                return Err(format!("simulated failure for {key}"));
            }
            Ok(serde_json::json!({
                "url": key,
                "analyzed_in_ms": delay.as_millis() as u64,
            }))
        })
    }
}
