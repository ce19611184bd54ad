//! In-process WFS server used by the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use reqwest::Url;
use serde_json::{json, Value};
use wfscache::source::{AsyncHttpClient, HttpResponse, SourceError};

#[derive(Default)]
struct Counters {
    pages: AtomicUsize,
    hits: AtomicUsize,
}

/// Serves `n` point features `layer.i` at `(i % 10, i / 10)` as GeoJSON.
///
/// Honors STARTINDEX, COUNT, BBOX and RESULTTYPE=hits. Clones share the
/// request counters.
#[derive(Clone)]
pub struct FakeWfsServer {
    n: u64,
    max_page: u64,
    counters: Arc<Counters>,
}

impl FakeWfsServer {
    pub fn new(n: u64) -> Self {
        Self {
            n,
            max_page: 1000,
            counters: Arc::default(),
        }
    }

    /// Server-side cap on COUNT.
    pub fn with_max_page(mut self, max_page: u64) -> Self {
        self.max_page = max_page;
        self
    }

    /// GetFeature requests served, describe included.
    pub fn page_requests(&self) -> usize {
        self.counters.pages.load(Ordering::SeqCst)
    }

    pub fn hits_requests(&self) -> usize {
        self.counters.hits.load(Ordering::SeqCst)
    }

    fn matching(&self, bbox: Option<[f64; 4]>) -> Vec<u64> {
        (0..self.n)
            .filter(|i| {
                let (x, y) = ((i % 10) as f64, (i / 10) as f64);
                bbox.map_or(true, |[x1, y1, x2, y2]| {
                    x >= x1 && x <= x2 && y >= y1 && y <= y2
                })
            })
            .collect()
    }

    fn respond(&self, url: &str) -> HttpResponse {
        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(_) => return HttpResponse::new(400, "bad url"),
        };
        let params: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.to_uppercase(), v.into_owned()))
            .collect();
        let bbox = params.get("BBOX").and_then(|b| {
            let v: Vec<f64> = b.split(',').filter_map(|n| n.parse().ok()).collect();
            (v.len() == 4).then(|| [v[0], v[1], v[2], v[3]])
        });
        let matching = self.matching(bbox);

        if params.get("RESULTTYPE").map(String::as_str) == Some("hits") {
            self.counters.hits.fetch_add(1, Ordering::SeqCst);
            let body = format!(
                r#"<wfs:FeatureCollection numberMatched="{}" numberReturned="0"/>"#,
                matching.len()
            );
            return HttpResponse::new(200, body);
        }

        self.counters.pages.fetch_add(1, Ordering::SeqCst);
        let start: usize = params
            .get("STARTINDEX")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let count = params
            .get("COUNT")
            .and_then(|c| c.parse::<u64>().ok())
            .unwrap_or(self.max_page)
            .min(self.max_page) as usize;
        let end = (start + count).min(matching.len());
        let features: Vec<Value> = matching[start.min(end)..end]
            .iter()
            .map(|i| {
                json!({
                    "type": "Feature",
                    "id": format!("layer.{}", i),
                    "geometry": {"type": "Point", "coordinates": [i % 10, i / 10]},
                    "properties": {"rank": i, "name": format!("name {}", i)}
                })
            })
            .collect();
        let body = json!({
            "type": "FeatureCollection",
            "numberMatched": matching.len(),
            "numberReturned": features.len(),
            "features": features,
        });
        HttpResponse::new(200, body.to_string())
    }
}

impl AsyncHttpClient for FakeWfsServer {
    async fn get(&self, url: &str) -> Result<HttpResponse, SourceError> {
        Ok(self.respond(url))
    }
}
