//! CLI command implementations.
//!
//! - [`fetch`] - Download a layer (or a bounding box of it) into the cache
//! - [`count`] - Report the layer's feature count
//! - [`cache`] - Cache management (stats, clear)
//! - [`config`] - Configuration file management (path, show, init)

pub mod cache;
pub mod config;
pub mod count;
pub mod fetch;

use wfscache::Extent;

use crate::error::CliError;

/// Parse `minx,miny,maxx,maxy`; no bbox means the whole layer.
pub fn parse_extent(bbox: Option<&str>) -> Result<Extent, CliError> {
    match bbox {
        None => Ok(Extent::unbounded()),
        Some(s) => Extent::parse_bbox(s).ok_or_else(|| {
            CliError::InvalidArgument(format!(
                "bounding box '{}' must be minx,miny,maxx,maxy",
                s
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extent() {
        assert!(parse_extent(None).unwrap().is_unbounded());
        assert_eq!(
            parse_extent(Some("1,2,3,4")).unwrap(),
            Extent::new(1.0, 2.0, 3.0, 4.0)
        );
        assert!(matches!(
            parse_extent(Some("1,2,3")),
            Err(CliError::InvalidArgument(_))
        ));
    }
}
