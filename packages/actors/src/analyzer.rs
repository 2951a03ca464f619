//! The per-item analysis capability invoked by batch runners.

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

/// Result of analyzing one item: an opaque JSON payload or an error message.
pub type AnalysisResult = Result<serde_json::Value, String>;

/// Future type for async analyzers.
pub type AnalysisFuture = Pin<Box<dyn Future<Output = AnalysisResult> + Send>>;

/// External analysis capability.
///
/// Called concurrently from many items at once. Implementations should stop
/// work when `cancel` fires; the runner cancels it when the item times out.
pub trait Analyzer: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Analyze a single item key.
    fn analyze(&self, item_key: &str, cancel: CancellationToken) -> AnalysisFuture;
}

/// A closure-based analyzer.
pub struct FnAnalyzer<F>
where
    F: Fn(String, CancellationToken) -> AnalysisFuture + Send + Sync + 'static,
{
    name: String,
    analyze: F,
}

impl<F> FnAnalyzer<F>
where
    F: Fn(String, CancellationToken) -> AnalysisFuture + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, analyze: F) -> Self {
        Self {
            name: name.into(),
            analyze,
        }
    }
}

impl<F> Analyzer for FnAnalyzer<F>
where
    F: Fn(String, CancellationToken) -> AnalysisFuture + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn analyze(&self, item_key: &str, cancel: CancellationToken) -> AnalysisFuture {
        (self.analyze)(item_key.to_string(), cancel)
    }
}

/// Build an [`FnAnalyzer`] from an async body.
///
/// ```ignore
/// let analyzer = analyzer!("echo", |url, _cancel| Ok(serde_json::json!({ "url": url })));
/// ```
#[macro_export]
macro_rules! analyzer {
    ($name:expr, |$key:ident, $cancel:ident| $body:expr) => {
        $crate::FnAnalyzer::new(
            $name,
            |$key: String, $cancel: $crate::CancellationToken| -> $crate::AnalysisFuture {
                Box::pin(async move { $body })
            },
        )
    };
}
