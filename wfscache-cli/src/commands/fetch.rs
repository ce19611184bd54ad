//! `wfscache fetch`: download features into the cache and optionally export them.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Args;
use serde_json::{Map, Value};
use tracing::info;
use wfscache::feature::{CachedFeature, Field, FieldValue};

use super::parse_extent;
use crate::error::CliError;
use crate::runner::CliRunner;

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Data source descriptor, e.g. "url='https://host/wfs' typename='ns:layer'"
    #[arg(long)]
    pub uri: String,

    /// Restrict to minx,miny,maxx,maxy
    #[arg(long)]
    pub bbox: Option<String>,

    /// Write features as newline-delimited GeoJSON to this file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

pub async fn run(runner: &CliRunner, args: FetchArgs) -> Result<(), CliError> {
    runner.log_startup("fetch");
    let extent = parse_extent(args.bbox.as_deref())?;
    let uri = runner.parse_uri(&args.uri)?;
    let cache = runner.open_cache(uri).await?;
    let fields = cache.capabilities().fields.clone();

    let mut writer = match &args.output {
        Some(path) => Some(BufWriter::new(File::create(path).map_err(|e| io_error(path, e))?)),
        None => None,
    };

    let start = Instant::now();
    let mut reader = cache.reader(extent);
    match reader.registration().run {
        Some(run) => println!("Downloading {} ({})...", extent, run),
        None => println!("Extent {} already cached", extent),
    }

    let mut total = 0usize;
    while let Some(batch) = reader.next_batch().await? {
        total += batch.len();
        if let (Some(out), Some(path)) = (writer.as_mut(), args.output.as_deref()) {
            for feature in &batch {
                let line = feature_json(feature, &fields).to_string();
                writeln!(out, "{}", line).map_err(|e| io_error(path, e))?;
            }
        }
    }
    if let (Some(mut out), Some(path)) = (writer, args.output.as_deref()) {
        out.flush().map_err(|e| io_error(path, e))?;
    }

    let stats = cache.stats()?;
    info!(features = total, generation = stats.generation, "Fetch finished");
    println!(
        "Read {} features in {:.2}s (cache: {} rows, generation {})",
        total,
        start.elapsed().as_secs_f64(),
        stats.rows,
        stats.generation
    );
    if let Some(path) = &args.output {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn io_error(path: &Path, error: std::io::Error) -> CliError {
    CliError::Io {
        path: path.display().to_string(),
        error,
    }
}

fn value_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Integer(i) => Value::from(*i),
        FieldValue::Double(d) => Value::from(*d),
        FieldValue::Text(s) => Value::String(s.clone()),
    }
}

/// One cached row as a GeoJSON feature.
fn feature_json(feature: &CachedFeature, fields: &[Field]) -> Value {
    let geometry = feature
        .geometry
        .as_ref()
        .and_then(|g| serde_json::from_slice::<Value>(&g.encoded).ok())
        .unwrap_or(Value::Null);
    let properties: Map<String, Value> = fields
        .iter()
        .zip(&feature.attributes)
        .map(|(field, value)| (field.name.clone(), value_json(value)))
        .collect();

    serde_json::json!({
        "type": "Feature",
        "id": feature.stable_id,
        "geometry": geometry,
        "properties": properties,
    })
}
