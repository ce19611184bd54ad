//! WFS GetFeature source with GeoJSON output.
//!
//! Requests are built as KVP GET requests:
//!
//! ```text
//! SERVICE=WFS&REQUEST=GetFeature&VERSION=2.0.0&TYPENAMES=roads
//!   &OUTPUTFORMAT=application/json&BBOX=...&STARTINDEX=200&COUNT=100
//! ```
//!
//! Count-only requests use `RESULTTYPE=hits`, whose response is a small XML
//! document carrying `numberMatched` (2.0) or `numberOfFeatures` (1.1).

use std::sync::OnceLock;

use parking_lot::RwLock;
use regex::Regex;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, warn};

use super::http::{AsyncHttpClient, HttpResponse};
use super::types::{
    CountResponse, FeatureSource, Page, PageRequest, PageToken, SourceCapabilities, SourceError,
};
use super::uri::DataSourceUri;
use crate::feature::{Extent, Field, FieldKind, FieldValue, Geometry, SourceFeature};

/// Default number of features requested per page.
pub const DEFAULT_PAGE_SIZE: u64 = 1000;

const DEFAULT_VERSION: &str = "2.0.0";
const JSON_OUTPUT_FORMAT: &str = "application/json";

/// Exception codes meaning "this server cannot do that".
const UNSUPPORTED_EXCEPTION_CODES: [&str; 3] = [
    "OperationNotSupported",
    "OptionNotSupported",
    "InvalidParameterValue",
];

fn hits_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"number(?:Matched|OfFeatures)\s*=\s*"([^"]*)""#).expect("hits regex is valid")
    })
}

/// WFS feature source over HTTP.
pub struct WfsHttpSource<C: AsyncHttpClient> {
    client: C,
    uri: DataSourceUri,
    page_size: u64,
    /// Schema learned by `describe()`; used to decode pages.
    fields: RwLock<Vec<Field>>,
}

impl<C: AsyncHttpClient> WfsHttpSource<C> {
    pub fn new(client: C, uri: DataSourceUri) -> Self {
        Self {
            client,
            uri,
            page_size: DEFAULT_PAGE_SIZE,
            fields: RwLock::new(Vec::new()),
        }
    }

    /// Set the number of features requested per page.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn uri(&self) -> &DataSourceUri {
        &self.uri
    }

    fn version(&self) -> &str {
        if self.uri.version.eq_ignore_ascii_case("auto") {
            DEFAULT_VERSION
        } else {
            &self.uri.version
        }
    }

    fn is_wfs2(&self) -> bool {
        self.version().starts_with('2')
    }

    fn base_url(&self) -> Result<Url, SourceError> {
        let mut url = Url::parse(&self.uri.url)
            .map_err(|e| SourceError::Protocol(format!("invalid service URL: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("SERVICE", "WFS");
            query.append_pair("REQUEST", "GetFeature");
            query.append_pair("VERSION", self.version());
            let type_key = if self.is_wfs2() { "TYPENAMES" } else { "TYPENAME" };
            query.append_pair(type_key, &self.uri.type_name);
            if let Some(srs) = &self.uri.srs_name {
                query.append_pair("SRSNAME", srs);
            }
        }
        Ok(url)
    }

    /// Build the GetFeature URL for one page.
    fn page_url(
        &self,
        extent: &Extent,
        filter: Option<&str>,
        start_index: u64,
        count: u64,
    ) -> Result<Url, SourceError> {
        let mut url = self.base_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("OUTPUTFORMAT", JSON_OUTPUT_FORMAT);
            match filter {
                // BBOX and FILTER are mutually exclusive; the extent is then
                // applied client-side.
                Some(filter) => {
                    query.append_pair("FILTER", filter);
                }
                None if !extent.is_unbounded() => {
                    query.append_pair("BBOX", &extent.to_bbox_param());
                }
                None => {}
            }
            if self.is_wfs2() {
                query.append_pair("COUNT", &count.to_string());
                if self.uri.paging_enabled {
                    query.append_pair("STARTINDEX", &start_index.to_string());
                }
            } else {
                query.append_pair("MAXFEATURES", &count.to_string());
            }
        }
        Ok(url)
    }

    fn hits_url(&self, filter: Option<&str>) -> Result<Url, SourceError> {
        let mut url = self.base_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("RESULTTYPE", "hits");
            if let Some(filter) = filter {
                query.append_pair("FILTER", filter);
            }
        }
        Ok(url)
    }

    async fn get_json(&self, url: &Url) -> Result<Value, SourceError> {
        let response = self.client.get(url.as_str()).await?;
        check_status(&response)?;
        serde_json::from_slice(&response.body)
            .map_err(|e| SourceError::Protocol(format!("invalid GeoJSON response: {}", e)))
    }
}

/// Map a non-success HTTP response to the matching error class.
fn check_status(response: &HttpResponse) -> Result<(), SourceError> {
    if response.is_success() {
        return Ok(());
    }
    let body = String::from_utf8_lossy(&response.body);
    match response.status {
        408 | 429 | 500..=599 => Err(SourceError::Transient(format!(
            "HTTP {} from server",
            response.status
        ))),
        status if is_unsupported_exception(&body) => Err(SourceError::Unsupported(format!(
            "HTTP {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        ))),
        status => Err(SourceError::Protocol(format!(
            "HTTP {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        ))),
    }
}

fn is_unsupported_exception(body: &str) -> bool {
    body.contains("ExceptionReport")
        && UNSUPPORTED_EXCEPTION_CODES
            .iter()
            .any(|code| body.contains(code))
}

/// Parse a hits response body.
fn parse_hits(body: &str) -> Result<CountResponse, SourceError> {
    if is_unsupported_exception(body) {
        return Ok(CountResponse::Unsupported);
    }
    if body.contains("ExceptionReport") {
        return Err(SourceError::Protocol(format!(
            "exception in hits response: {}",
            body.chars().take(200).collect::<String>()
        )));
    }
    match hits_regex().captures(body) {
        Some(caps) => match caps[1].parse::<u64>() {
            Ok(count) => Ok(CountResponse::Exact(count)),
            // numberMatched="unknown"
            Err(_) => Ok(CountResponse::Unsupported),
        },
        None => Err(SourceError::Protocol(format!(
            "hits response without a feature count: {}",
            body.chars().take(200).collect::<String>()
        ))),
    }
}

/// Compute the bounding box of a GeoJSON geometry object.
fn geometry_bounds(geometry: &Value) -> Option<Extent> {
    if let Some(bbox) = geometry.get("bbox").and_then(Value::as_array) {
        let nums: Vec<f64> = bbox.iter().filter_map(Value::as_f64).collect();
        if nums.len() == 4 {
            return Some(Extent::new(nums[0], nums[1], nums[2], nums[3]));
        }
    }
    let mut extent: Option<Extent> = None;
    if let Some(coords) = geometry.get("coordinates") {
        collect_positions(coords, &mut extent);
    }
    if let Some(parts) = geometry.get("geometries").and_then(Value::as_array) {
        for part in parts {
            if let Some(b) = geometry_bounds(part) {
                extent = Some(extent.map_or(b, |e| e.union(&b)));
            }
        }
    }
    extent
}

fn collect_positions(coords: &Value, extent: &mut Option<Extent>) {
    let Some(items) = coords.as_array() else {
        return;
    };
    if let (Some(x), Some(y)) = (
        items.first().and_then(Value::as_f64),
        items.get(1).and_then(Value::as_f64),
    ) {
        match extent {
            Some(e) => e.expand_to(x, y),
            None => *extent = Some(Extent::point(x, y)),
        }
        return;
    }
    for item in items {
        collect_positions(item, extent);
    }
}

fn json_to_field_value(value: &Value, kind: FieldKind) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => match (kind, n.as_i64()) {
            (FieldKind::Integer, Some(i)) => FieldValue::Integer(i),
            (FieldKind::Text, _) => FieldValue::Text(n.to_string()),
            _ => n.as_f64().map(FieldValue::Double).unwrap_or(FieldValue::Null),
        },
        Value::String(s) => FieldValue::Text(s.clone()),
        other => FieldValue::Text(other.to_string()),
    }
}

fn infer_kind(value: &Value) -> FieldKind {
    match value {
        Value::Bool(_) => FieldKind::Bool,
        Value::Number(n) if n.is_i64() || n.is_u64() => FieldKind::Integer,
        Value::Number(_) => FieldKind::Double,
        _ => FieldKind::Text,
    }
}

/// Schema of a feature's properties. Null values are typed as text.
fn infer_fields(feature: Option<&Value>) -> Vec<Field> {
    feature
        .and_then(|f| f.get("properties"))
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, value)| Field::new(name.clone(), infer_kind(value)))
                .collect()
        })
        .unwrap_or_default()
}

/// Decode one GeoJSON feature against the schema.
fn decode_feature(feature: &Value, fields: &[Field]) -> Result<SourceFeature, SourceError> {
    let stable_id = match feature.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            return Err(SourceError::Protocol(
                "feature without an identifier".to_string(),
            ))
        }
    };

    let geometry = match feature.get("geometry") {
        Some(g) if !g.is_null() => {
            let bounds = geometry_bounds(g).ok_or_else(|| {
                SourceError::Protocol(format!("feature {} has no coordinates", stable_id))
            })?;
            let encoded = serde_json::to_vec(g)
                .map_err(|e| SourceError::Protocol(format!("geometry encoding: {}", e)))?;
            Some(Geometry::new(bounds, encoded))
        }
        _ => None,
    };

    let properties = feature.get("properties");
    let attributes = fields
        .iter()
        .map(|field| {
            properties
                .and_then(|p| p.get(&field.name))
                .map(|v| json_to_field_value(v, field.kind))
                .unwrap_or(FieldValue::Null)
        })
        .collect();

    Ok(SourceFeature {
        stable_id,
        geometry,
        attributes,
    })
}

fn features_array(collection: &Value) -> Result<&Vec<Value>, SourceError> {
    collection
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Protocol("response is not a FeatureCollection".to_string()))
}

impl<C: AsyncHttpClient> FeatureSource for WfsHttpSource<C> {
    async fn describe(&self) -> Result<SourceCapabilities, SourceError> {
        let url = self.page_url(
            &Extent::unbounded(),
            self.uri.filter.as_deref(),
            0,
            1,
        )?;
        let collection = self.get_json(&url).await?;
        let features = features_array(&collection)?;

        let fields = infer_fields(features.first());

        let layer_extent = collection
            .get("bbox")
            .and_then(Value::as_array)
            .and_then(|b| {
                let nums: Vec<f64> = b.iter().filter_map(Value::as_f64).collect();
                (nums.len() == 4).then(|| Extent::new(nums[0], nums[1], nums[2], nums[3]))
            });

        debug!(
            type_name = %self.uri.type_name,
            fields = fields.len(),
            "Described WFS layer"
        );
        *self.fields.write() = fields.clone();

        Ok(SourceCapabilities {
            version: self.version().to_string(),
            fields,
            geometry_attribute: "geometry".to_string(),
            srs_name: self.uri.srs_name.clone(),
            max_features_server: Some(self.page_size),
            supports_paging: self.uri.paging_enabled && self.is_wfs2(),
            supports_hits: true,
            layer_extent,
        })
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SourceError> {
        let start_index = match &request.token {
            Some(token) => token
                .0
                .parse::<u64>()
                .map_err(|_| SourceError::Protocol(format!("bad page token '{}'", token)))?,
            None => 0,
        };
        let count = request
            .limit
            .map_or(self.page_size, |l| l.min(self.page_size))
            .max(1);

        let url = self.page_url(
            &request.extent,
            request.filter.as_deref(),
            start_index,
            count,
        )?;
        let collection = self.get_json(&url).await?;
        let raw = features_array(&collection)?;

        let mut fields = self.fields.read().clone();
        if fields.is_empty() {
            // Not described yet: take the schema from this page.
            fields = infer_fields(raw.first());
        }

        let mut features = Vec::with_capacity(raw.len());
        for item in raw {
            let feature = decode_feature(item, &fields)?;
            if request.filter.is_some() && !request.extent.is_unbounded() {
                match &feature.geometry {
                    Some(g) if g.bounds.intersects(&request.extent) => {}
                    _ => continue,
                }
            }
            features.push(feature);
        }

        let returned = raw.len() as u64;
        let matched = collection.get("numberMatched").and_then(Value::as_u64);
        // Servers may cap a page below COUNT, so a short page only ends
        // paging when the total is unknown.
        let exhausted = !(self.uri.paging_enabled && self.is_wfs2())
            || returned == 0
            || match matched {
                Some(m) => start_index + returned >= m,
                None => returned < count,
            };

        if returned == count && !self.uri.paging_enabled {
            warn!(
                type_name = %self.uri.type_name,
                count = count,
                "Page is full but paging is disabled; result may be truncated"
            );
        }

        Ok(Page {
            features,
            next: (!exhausted).then(|| PageToken((start_index + returned).to_string())),
        })
    }

    async fn fetch_count(&self, filter: Option<&str>) -> Result<CountResponse, SourceError> {
        let url = self.hits_url(filter)?;
        let response = self.client.get(url.as_str()).await?;
        match check_status(&response) {
            Ok(()) => {}
            Err(SourceError::Unsupported(_)) => return Ok(CountResponse::Unsupported),
            Err(e) => return Err(e),
        }
        parse_hits(&String::from_utf8_lossy(&response.body))
    }
}
