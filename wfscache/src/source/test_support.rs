//! Scripted in-process feature source for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;

use super::types::{
    CountResponse, FeatureSource, Page, PageRequest, PageToken, SourceCapabilities, SourceError,
};
use crate::feature::{Extent, Field, FieldKind, FieldValue, Geometry, SourceFeature};

/// How the source answers count-only requests.
#[derive(Debug, Clone, PartialEq)]
pub enum CountMode {
    /// Exact number of features matching the request.
    Exact,
    /// Not advertised in the capabilities.
    Unsupported,
    /// Advertised, but every request is answered as unsupported.
    Refused,
    Error,
}

/// A source serving a fixed list of point features.
///
/// Feature `i` is `f.i` at `(i % 10, i / 10)` with attributes
/// `[i, "name i"]`.
pub struct ScriptedSource {
    features: Vec<SourceFeature>,
    page_size: u64,
    paging: bool,
    overlap: u64,
    transient_failures: AtomicUsize,
    protocol_error_page: Option<usize>,
    page_delay: Option<Duration>,
    gate: Option<Semaphore>,
    count_mode: CountMode,
    layer_extent: Option<Extent>,
    page_fetches: AtomicUsize,
    served_pages: AtomicUsize,
    count_fetches: AtomicUsize,
}

pub fn fields() -> Vec<Field> {
    vec![
        Field::new("rank", FieldKind::Integer),
        Field::new("name", FieldKind::Text),
    ]
}

pub fn point_feature(i: u64) -> SourceFeature {
    let (x, y) = ((i % 10) as f64, (i / 10) as f64);
    SourceFeature::new(
        format!("f.{}", i),
        Some(Geometry::new(
            Extent::point(x, y),
            format!(r#"{{"type":"Point","coordinates":[{},{}]}}"#, x, y).into_bytes(),
        )),
        vec![FieldValue::Integer(i as i64), FieldValue::Text(format!("name {}", i))],
    )
}

impl ScriptedSource {
    pub fn with_grid(n: u64) -> Self {
        Self {
            features: (0..n).map(point_feature).collect(),
            page_size: 1000,
            paging: true,
            overlap: 0,
            transient_failures: AtomicUsize::new(0),
            protocol_error_page: None,
            page_delay: None,
            gate: None,
            count_mode: CountMode::Exact,
            layer_extent: None,
            page_fetches: AtomicUsize::new(0),
            served_pages: AtomicUsize::new(0),
            count_fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn without_paging(mut self) -> Self {
        self.paging = false;
        self
    }

    /// Each following page starts `overlap` features before the previous end.
    pub fn with_page_overlap(mut self, overlap: u64) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail the `index`-th served page (0-based) with a protocol error.
    pub fn with_protocol_error_at_page(mut self, index: usize) -> Self {
        self.protocol_error_page = Some(index);
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = Some(delay);
        self
    }

    /// Pages are only served after [`release_pages`](Self::release_pages).
    pub fn with_gated_pages(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn with_count_mode(mut self, mode: CountMode) -> Self {
        self.count_mode = mode;
        self
    }

    pub fn with_layer_extent(mut self, extent: Extent) -> Self {
        self.layer_extent = Some(extent);
        self
    }

    pub fn release_pages(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn page_fetches(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    pub fn count_fetches(&self) -> usize {
        self.count_fetches.load(Ordering::SeqCst)
    }

    pub fn capabilities(&self) -> SourceCapabilities {
        let mut caps = SourceCapabilities::new("2.0.0", fields());
        caps.max_features_server = Some(self.page_size);
        caps.supports_paging = self.paging;
        caps.supports_hits = self.count_mode != CountMode::Unsupported;
        caps.layer_extent = self.layer_extent;
        caps
    }

    fn matching(&self, extent: &Extent) -> Vec<&SourceFeature> {
        self.features
            .iter()
            .filter(|f| {
                f.geometry
                    .as_ref()
                    .is_some_and(|g| g.bounds.intersects(extent))
            })
            .collect()
    }
}

impl FeatureSource for ScriptedSource {
    async fn describe(&self) -> Result<SourceCapabilities, SourceError> {
        Ok(self.capabilities())
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SourceError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| SourceError::Transient("gate closed".into()))?
                .forget();
        }
        if let Some(delay) = self.page_delay {
            tokio::time::sleep(delay).await;
        }
        let failures = self.transient_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.transient_failures.store(failures - 1, Ordering::SeqCst);
            return Err(SourceError::Transient("connection reset".into()));
        }
        let served = self.served_pages.fetch_add(1, Ordering::SeqCst);
        if self.protocol_error_page == Some(served) {
            return Err(SourceError::Protocol("unexpected element".into()));
        }

        let matching = self.matching(&request.extent);
        let start = match &request.token {
            Some(token) => token
                .0
                .parse::<usize>()
                .map_err(|_| SourceError::Protocol("bad token".into()))?,
            None => 0,
        };
        let size = request
            .limit
            .map_or(self.page_size, |l| l.min(self.page_size)) as usize;
        let end = (start + size).min(matching.len());
        let features: Vec<SourceFeature> = matching[start.min(end)..end]
            .iter()
            .map(|f| (*f).clone())
            .collect();

        let next = if self.paging && end < matching.len() {
            let next_start = end.saturating_sub(self.overlap as usize).max(start + 1);
            Some(PageToken(next_start.to_string()))
        } else {
            None
        };
        Ok(Page { features, next })
    }

    async fn fetch_count(&self, _filter: Option<&str>) -> Result<CountResponse, SourceError> {
        self.count_fetches.fetch_add(1, Ordering::SeqCst);
        match self.count_mode {
            CountMode::Exact => Ok(CountResponse::Exact(self.features.len() as u64)),
            CountMode::Unsupported | CountMode::Refused => Ok(CountResponse::Unsupported),
            CountMode::Error => Err(SourceError::Transient("timeout".into())),
        }
    }
}
