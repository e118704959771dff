//! Spatial extents as unions of axis-aligned rectangles
//!
//! STAC collections declare their spatial extent as one or more bounding
//! boxes. The union of those boxes is kept as a [`MultiRectangle`], stored as
//! a WGS84 (SRID 4326) `MULTIPOLYGON` WKT string. A query rectangle matches a
//! collection when it intersects any member rectangle.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Spatial reference id of every stored geometry (WGS84)
pub const SRID_WGS84: i32 = 4326;

/// Axis-aligned rectangle `[min_x, min_y, max_x, max_y]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Rectangle {
    /// Build a rectangle, ordering the corners so that min <= max on both axes
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Parse a query bbox `[minX, minY, maxX, maxY]`
    ///
    /// Query boxes are strict: exactly four finite values with min <= max.
    pub fn from_query_bbox(values: &[f64]) -> Result<Self> {
        if values.len() != 4 {
            return Err(Error::InvalidBbox(format!(
                "expected 4 values [minX, minY, maxX, maxY], got {}",
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidBbox("bbox values must be finite".to_string()));
        }
        let (min_x, min_y, max_x, max_y) = (values[0], values[1], values[2], values[3]);
        if min_x > max_x || min_y > max_y {
            return Err(Error::InvalidBbox(format!(
                "inverted corners: [{min_x}, {min_y}, {max_x}, {max_y}]"
            )));
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Parse a bbox declared by a remote catalog
    ///
    /// Accepts 2D (4 values) and 3D (6 values, z dropped) boxes. Corners are
    /// normalized rather than rejected since upstream data is not ours to fix.
    pub fn from_source_bbox(values: &[f64]) -> Result<Self> {
        let (x1, y1, x2, y2) = match values.len() {
            4 => (values[0], values[1], values[2], values[3]),
            6 => (values[0], values[1], values[3], values[4]),
            n => {
                return Err(Error::InvalidBbox(format!(
                    "expected 4 or 6 values, got {n}"
                )))
            }
        };
        if [x1, y1, x2, y2].iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidBbox("bbox values must be finite".to_string()));
        }
        Ok(Self::new(x1, y1, x2, y2))
    }

    /// True when the two rectangles share at least one point (edges included)
    pub fn intersects(&self, other: &Rectangle) -> bool {
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rectangle) -> Rectangle {
        Rectangle {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Coordinates as `[minX, minY, maxX, maxY]`
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    fn wkt_ring(&self) -> String {
        format!(
            "(({x0} {y0}, {x1} {y0}, {x1} {y1}, {x0} {y1}, {x0} {y0}))",
            x0 = self.min_x,
            y0 = self.min_y,
            x1 = self.max_x,
            y1 = self.max_y
        )
    }
}

/// Union of one or more rectangles, the spatial extent of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiRectangle {
    rectangles: Vec<Rectangle>,
}

impl MultiRectangle {
    /// Build from at least one rectangle
    pub fn new(rectangles: Vec<Rectangle>) -> Result<Self> {
        if rectangles.is_empty() {
            return Err(Error::InvalidBbox(
                "spatial extent needs at least one bbox".to_string(),
            ));
        }
        Ok(Self { rectangles })
    }

    /// Member rectangles in declaration order
    pub fn rectangles(&self) -> &[Rectangle] {
        &self.rectangles
    }

    /// Bounding box of the union (coordinate-wise min/max of all members)
    pub fn bounding_box(&self) -> Rectangle {
        let first = self.rectangles[0];
        self.rectangles[1..]
            .iter()
            .fold(first, |acc, rect| acc.union(rect))
    }

    /// True when any member rectangle intersects `query`
    pub fn intersects(&self, query: &Rectangle) -> bool {
        self.rectangles.iter().any(|r| r.intersects(query))
    }

    /// Encode as `MULTIPOLYGON` WKT
    pub fn to_wkt(&self) -> String {
        let polygons: Vec<String> = self.rectangles.iter().map(Rectangle::wkt_ring).collect();
        format!("MULTIPOLYGON({})", polygons.join(", "))
    }

    /// Decode `MULTIPOLYGON` WKT written by [`MultiRectangle::to_wkt`]
    ///
    /// Each polygon is reduced to the bounding rectangle of its exterior ring.
    pub fn from_wkt(wkt: &str) -> Result<Self> {
        let body = wkt
            .trim()
            .strip_prefix("MULTIPOLYGON")
            .map(str::trim)
            .and_then(|s| s.strip_prefix('('))
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| Error::other(format!("not a MULTIPOLYGON: {wkt}")))?;

        let mut rectangles = Vec::new();
        for polygon in body.split(")),") {
            let coords = polygon.replace(['(', ')'], " ");
            let mut acc: Option<Rectangle> = None;
            for pair in coords.split(',') {
                let mut parts = pair.split_whitespace();
                let (Some(x), Some(y)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let x: f64 = x
                    .parse()
                    .map_err(|_| Error::other(format!("bad WKT coordinate: {x}")))?;
                let y: f64 = y
                    .parse()
                    .map_err(|_| Error::other(format!("bad WKT coordinate: {y}")))?;
                let point = Rectangle::new(x, y, x, y);
                acc = Some(acc.map_or(point, |r| r.union(&point)));
            }
            if let Some(rect) = acc {
                rectangles.push(rect);
            }
        }
        Self::new(rectangles)
    }
}
