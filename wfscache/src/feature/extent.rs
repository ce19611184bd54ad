//! Axis-aligned rectangular extent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding rectangle used to scope feature requests.
///
/// Coordinates are expressed in the layer's SRS. An extent with infinite
/// bounds ([`Extent::unbounded`]) stands for "the whole layer".
///
/// # Examples
///
/// ```
/// use wfscache::feature::Extent;
///
/// let outer = Extent::new(0.0, 0.0, 10.0, 10.0);
/// let inner = Extent::new(2.0, 2.0, 4.0, 4.0);
/// assert!(outer.contains(&inner));
/// assert!(!inner.contains(&outer));
/// assert!(Extent::unbounded().contains(&outer));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    /// Create an extent, normalizing swapped corners.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// The extent covering the entire coordinate space.
    pub fn unbounded() -> Self {
        Self {
            min_x: f64::NEG_INFINITY,
            min_y: f64::NEG_INFINITY,
            max_x: f64::INFINITY,
            max_y: f64::INFINITY,
        }
    }

    /// Extent of a single point.
    pub fn point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    /// Returns true if any bound is infinite.
    pub fn is_unbounded(&self) -> bool {
        !(self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite())
    }

    /// Returns true if `other` lies entirely within this extent (edges inclusive).
    pub fn contains(&self, other: &Extent) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    /// Returns true if the two extents share at least one point.
    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Smallest extent containing both.
    pub fn union(&self, other: &Extent) -> Extent {
        Extent {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Grow the extent to include a point.
    pub fn expand_to(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Format as a WFS `BBOX` parameter value (`minx,miny,maxx,maxy`).
    pub fn to_bbox_param(&self) -> String {
        format!("{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
    }

    /// Parse `minx,miny,maxx,maxy`.
    pub fn parse_bbox(s: &str) -> Option<Extent> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [x1, y1, x2, y2] => Some(Extent::new(*x1, *y1, *x2, *y2)),
            _ => None,
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "[unbounded]")
        } else {
            write!(
                f,
                "[{}, {} : {}, {}]",
                self.min_x, self.min_y, self.max_x, self.max_y
            )
        }
    }
}
