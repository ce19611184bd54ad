//! The downloader run loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::DownloadConfig;
use super::status::{RunId, RunOutcome};
use crate::coordinator::SerializeReport;
use crate::feature::{Extent, Generation, SourceFeature};
use crate::source::{FeatureSource, Page, PageRequest, SourceCapabilities, SourceError};
use crate::store::StoreError;

/// Receiver of a run's pages and of its terminal notification.
pub trait RunSink: Send + Sync + 'static {
    /// Persist one page of features for the run. Called from a blocking
    /// thread.
    fn serialize_batch(
        &self,
        spec: &RunSpec,
        features: Vec<SourceFeature>,
    ) -> Result<SerializeReport, StoreError>;

    /// Terminal notification. Called exactly once per run.
    fn end_of_download(&self, run: RunId, outcome: RunOutcome);
}

/// What one run downloads.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub id: RunId,
    pub extent: Extent,
    pub filter: Option<String>,
    /// Cache epoch the run was started in; batches from an older epoch
    /// are discarded.
    pub epoch: u64,
    /// Generation counter when the run started.
    pub start_generation: Generation,
}

/// Server-side paging behaviour relevant to truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLimits {
    pub max_features_server: Option<u64>,
    pub supports_paging: bool,
}

impl From<&SourceCapabilities> for SourceLimits {
    fn from(caps: &SourceCapabilities) -> Self {
        Self {
            max_features_server: caps.max_features_server,
            supports_paging: caps.supports_paging,
        }
    }
}

/// Delivers the terminal notification when dropped.
///
/// If the run future is dropped before finishing (task abort, panic) the
/// sink still hears about it, as a failure.
struct RunCompletionGuard<K: RunSink> {
    sink: Arc<K>,
    run: RunId,
    outcome: Option<RunOutcome>,
}

impl<K: RunSink> RunCompletionGuard<K> {
    fn new(sink: Arc<K>, run: RunId) -> Self {
        Self {
            sink,
            run,
            outcome: None,
        }
    }

    fn finish(mut self, outcome: RunOutcome) {
        self.outcome = Some(outcome);
    }
}

impl<K: RunSink> Drop for RunCompletionGuard<K> {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| RunOutcome::failed(0, "download task aborted"));
        self.sink.end_of_download(self.run, outcome);
    }
}

enum FetchAbort {
    Cancelled,
    Failed(SourceError),
}

/// Execute one run to its end.
///
/// Cancellation is observed between pages, while a page request is in
/// flight and while backing off before a retry.
pub async fn execute_run<S, K>(
    source: Arc<S>,
    sink: Arc<K>,
    config: DownloadConfig,
    limits: SourceLimits,
    spec: RunSpec,
    cancel: CancellationToken,
) where
    S: FeatureSource,
    K: RunSink,
{
    let guard = RunCompletionGuard::new(Arc::clone(&sink), spec.id);
    info!(run_id = %spec.id, extent = %spec.extent, "Download run started");
    let outcome = run_pages(source.as_ref(), &sink, &config, limits, &spec, &cancel).await;
    match &outcome.end {
        super::RunEnd::Completed => info!(
            run_id = %spec.id,
            features = outcome.feature_count,
            truncated = outcome.truncated,
            "Download run completed"
        ),
        super::RunEnd::Cancelled => info!(
            run_id = %spec.id,
            features = outcome.feature_count,
            "Download run cancelled"
        ),
        super::RunEnd::Failed(reason) => warn!(
            run_id = %spec.id,
            features = outcome.feature_count,
            error = %reason,
            "Download run failed"
        ),
    }
    guard.finish(outcome);
}

async fn run_pages<S, K>(
    source: &S,
    sink: &Arc<K>,
    config: &DownloadConfig,
    limits: SourceLimits,
    spec: &RunSpec,
    cancel: &CancellationToken,
) -> RunOutcome
where
    S: FeatureSource,
    K: RunSink,
{
    let mut delivered: u64 = 0;
    let mut token = None;
    let mut pages: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return RunOutcome::cancelled(delivered);
        }

        let limit = config.page_limit(delivered);
        let request = PageRequest {
            extent: spec.extent,
            filter: spec.filter.clone(),
            token: token.take(),
            limit,
        };

        let page = match fetch_with_retry(source, &request, config, cancel).await {
            Ok(page) => page,
            Err(FetchAbort::Cancelled) => return RunOutcome::cancelled(delivered),
            Err(FetchAbort::Failed(e)) => return RunOutcome::failed(delivered, e.to_string()),
        };
        pages += 1;

        let Page { mut features, next } = page;
        let returned = features.len() as u64;
        let mut capped = false;
        if let Some(rem) = config.max_features.map(|cap| cap.saturating_sub(delivered)) {
            if returned > rem {
                features.truncate(rem as usize);
                capped = true;
            }
        }
        // Without paging, a full page means the server dropped the rest.
        let server_cut = !limits.supports_paging
            && next.is_none()
            && limits
                .max_features_server
                .is_some_and(|max| max > 0 && returned >= max);

        if !features.is_empty() {
            let batch_sink = Arc::clone(sink);
            let batch_spec = spec.clone();
            let report = tokio::task::spawn_blocking(move || {
                batch_sink.serialize_batch(&batch_spec, features)
            })
            .await;
            match report {
                Ok(Ok(report)) if report.stale => {
                    debug!(run_id = %spec.id, "Batch discarded after invalidation");
                    return RunOutcome::cancelled(delivered);
                }
                Ok(Ok(report)) => {
                    delivered += report.delivered();
                    debug!(
                        run_id = %spec.id,
                        page = pages,
                        generation = report.generation,
                        inserted = report.inserted.len(),
                        already_cached = report.already_cached,
                        repeated = report.repeated_in_run,
                        "Page serialized"
                    );
                }
                Ok(Err(e)) => {
                    return RunOutcome::failed(delivered, format!("store error: {}", e))
                }
                Err(e) => {
                    return RunOutcome::failed(delivered, format!("serialize task failed: {}", e))
                }
            }
        }

        let cap_reached = config.max_features.is_some_and(|cap| delivered >= cap);
        match next {
            Some(_) if capped || cap_reached => {
                return RunOutcome::completed(delivered, true);
            }
            Some(next) => token = Some(next),
            None => return RunOutcome::completed(delivered, capped || server_cut),
        }
    }
}

/// Fetch one page, retrying transient errors with exponential backoff.
async fn fetch_with_retry<S: FeatureSource>(
    source: &S,
    request: &PageRequest,
    config: &DownloadConfig,
    cancel: &CancellationToken,
) -> Result<Page, FetchAbort> {
    let mut retry = 0;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchAbort::Cancelled),
            result = source.fetch_page(request) => result,
        };

        match result {
            Ok(page) => return Ok(page),
            Err(e) if e.is_retryable() && retry < config.max_retries => {
                let delay = config.retry_delay(retry);
                retry += 1;
                warn!(
                    attempt = retry,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Page fetch failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchAbort::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(FetchAbort::Failed(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{RunEnd, RunStatus};
    use crate::feature::{LocalId, SourceFeature};
    use crate::source::test_support::ScriptedSource;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::time::Duration;

    /// Records batches and completions; deduplicates by stable id.
    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<HashSet<String>>,
        batches: Mutex<Vec<usize>>,
        ends: Mutex<Vec<(RunId, RunOutcome)>>,
        fail_store: bool,
    }

    impl RunSink for RecordingSink {
        fn serialize_batch(
            &self,
            _spec: &RunSpec,
            features: Vec<SourceFeature>,
        ) -> Result<SerializeReport, StoreError> {
            if self.fail_store {
                return Err(StoreError::Schema("disk full".into()));
            }
            let mut seen = self.seen.lock();
            let mut report = SerializeReport::default();
            for f in &features {
                if seen.insert(f.stable_id.clone()) {
                    report.inserted.push(LocalId(seen.len() as i64));
                } else {
                    report.repeated_in_run += 1;
                }
            }
            self.batches.lock().push(features.len());
            Ok(report)
        }

        fn end_of_download(&self, run: RunId, outcome: RunOutcome) {
            self.ends.lock().push((run, outcome));
        }
    }

    fn spec() -> RunSpec {
        RunSpec {
            id: RunId(1),
            extent: Extent::unbounded(),
            filter: None,
            epoch: 0,
            start_generation: 0,
        }
    }

    fn fast_config() -> DownloadConfig {
        DownloadConfig::default().with_retry_base_delay(Duration::from_millis(1))
    }

    async fn run(
        source: ScriptedSource,
        sink: Arc<RecordingSink>,
        config: DownloadConfig,
        cancel: CancellationToken,
    ) -> Arc<ScriptedSource> {
        let source = Arc::new(source);
        let limits = SourceLimits::from(&source.capabilities());
        execute_run(
            Arc::clone(&source),
            Arc::clone(&sink),
            config,
            limits,
            spec(),
            cancel,
        )
        .await;
        source
    }

    #[tokio::test]
    async fn test_pages_until_exhausted() {
        let sink = Arc::new(RecordingSink::default());
        let source = run(
            ScriptedSource::with_grid(100).with_page_size(40),
            Arc::clone(&sink),
            fast_config().with_max_features(1000),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(source.page_fetches(), 3);
        assert_eq!(*sink.batches.lock(), vec![40, 40, 20]);
        let ends = sink.ends.lock();
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].1, RunOutcome::completed(100, false));
    }

    #[tokio::test]
    async fn test_client_cap_truncates() {
        let sink = Arc::new(RecordingSink::default());
        run(
            ScriptedSource::with_grid(100).with_page_size(40),
            Arc::clone(&sink),
            fast_config().with_max_features(50),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(*sink.batches.lock(), vec![40, 10]);
        assert_eq!(sink.ends.lock()[0].1, RunOutcome::completed(50, true));
    }

    #[tokio::test]
    async fn test_server_cut_without_paging() {
        let sink = Arc::new(RecordingSink::default());
        run(
            ScriptedSource::with_grid(100)
                .with_page_size(40)
                .without_paging(),
            Arc::clone(&sink),
            fast_config(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(*sink.batches.lock(), vec![40]);
        assert_eq!(sink.ends.lock()[0].1, RunOutcome::completed(40, true));
    }

    #[tokio::test]
    async fn test_overlapping_pages_counted_once() {
        let sink = Arc::new(RecordingSink::default());
        run(
            ScriptedSource::with_grid(10)
                .with_page_size(4)
                .with_page_overlap(2),
            Arc::clone(&sink),
            fast_config(),
            CancellationToken::new(),
        )
        .await;

        let ends = sink.ends.lock();
        assert_eq!(ends[0].1.feature_count, 10);
        assert_eq!(sink.seen.lock().len(), 10);
    }

    #[tokio::test]
    async fn test_transient_errors_retried() {
        let sink = Arc::new(RecordingSink::default());
        let source = run(
            ScriptedSource::with_grid(10).with_transient_failures(2),
            Arc::clone(&sink),
            fast_config(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(source.page_fetches(), 3);
        assert!(sink.ends.lock()[0].1.success());
    }

    #[tokio::test]
    async fn test_retries_exhausted_fail_run() {
        let sink = Arc::new(RecordingSink::default());
        let source = run(
            ScriptedSource::with_grid(10).with_transient_failures(10),
            Arc::clone(&sink),
            fast_config().with_max_retries(2),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(source.page_fetches(), 3);
        let ends = sink.ends.lock();
        assert_eq!(ends.len(), 1);
        assert!(matches!(ends[0].1.end, RunEnd::Failed(_)));
    }

    #[tokio::test]
    async fn test_protocol_error_not_retried() {
        let sink = Arc::new(RecordingSink::default());
        let source = run(
            ScriptedSource::with_grid(100)
                .with_page_size(40)
                .with_protocol_error_at_page(1),
            Arc::clone(&sink),
            fast_config(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(source.page_fetches(), 2);
        let ends = sink.ends.lock();
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].1.feature_count, 40);
        assert!(matches!(ends[0].1.status(), RunStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_store_error_fails_run() {
        let sink = Arc::new(RecordingSink {
            fail_store: true,
            ..Default::default()
        });
        run(
            ScriptedSource::with_grid(5),
            Arc::clone(&sink),
            fast_config(),
            CancellationToken::new(),
        )
        .await;

        let ends = sink.ends.lock();
        assert_eq!(ends.len(), 1);
        assert!(!ends[0].1.success());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = run(
            ScriptedSource::with_grid(5),
            Arc::clone(&sink),
            fast_config(),
            cancel,
        )
        .await;

        assert_eq!(source.page_fetches(), 0);
        assert_eq!(sink.ends.lock()[0].1, RunOutcome::cancelled(0));
    }

    #[tokio::test]
    async fn test_aborted_task_still_reports_once() {
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(ScriptedSource::with_grid(100).with_page_delay(Duration::from_secs(60)));
        let limits = SourceLimits::from(&source.capabilities());
        let handle = tokio::spawn(execute_run(
            source,
            Arc::clone(&sink),
            fast_config(),
            limits,
            spec(),
            CancellationToken::new(),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
        let _ = handle.await;

        let ends = sink.ends.lock();
        assert_eq!(ends.len(), 1);
        assert!(matches!(ends[0].1.end, RunEnd::Failed(_)));
    }
}
