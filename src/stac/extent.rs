//! Validated value types for remote STAC collection documents
//!
//! Remote `/collections` payloads arrive as loosely shaped JSON. They are
//! deserialized into lenient raw structs and converted once, here, into
//! [`StacCollection`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::geometry::{MultiRectangle, Rectangle};
use super::temporal::{parse_optional_timestamp, TimeInterval};
use crate::error::{Error, Result};

/// Default `type` when a collection omits it
pub const DEFAULT_COLLECTION_TYPE: &str = "Collection";

// ============================================================================
// Raw documents
// ============================================================================

/// Link object of a STAC document
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Link {
    pub rel: Option<String>,
    pub href: Option<String>,
    /// HTTP method for the link, GET when absent
    pub method: Option<String>,
}

impl Link {
    /// True for links that can be followed with a plain GET
    pub fn is_get(&self) -> bool {
        self.method
            .as_deref()
            .map_or(true, |m| m.eq_ignore_ascii_case("GET"))
    }
}

/// First link with relation `rel` that carries an `href`
pub fn find_link<'a>(links: &'a [Link], rel: &str) -> Option<&'a Link> {
    links
        .iter()
        .find(|link| link.rel.as_deref() == Some(rel) && link.href.is_some())
}

#[derive(Debug, Default, Deserialize)]
struct Linked {
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct RawCollection {
    id: Option<String>,
    #[serde(rename = "type")]
    collection_type: Option<String>,
    title: Option<String>,
    description: Option<String>,
    extent: Option<RawExtent>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct RawExtent {
    spatial: Option<RawSpatial>,
    temporal: Option<RawTemporal>,
}

#[derive(Debug, Deserialize)]
struct RawSpatial {
    #[serde(default)]
    bbox: Vec<Vec<f64>>,
}

// Bounds stay untyped so that an unreadable timestamp reaches the converter
#[derive(Debug, Deserialize)]
struct RawTemporal {
    #[serde(default)]
    interval: Vec<Vec<Value>>,
}

// ============================================================================
// Validated collection
// ============================================================================

/// Combined spatial and temporal bounds of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct Extent {
    pub spatial: MultiRectangle,
    pub temporal: TimeInterval,
}

impl Extent {
    pub fn temporal_start(&self) -> Option<DateTime<Utc>> {
        self.temporal.start
    }

    pub fn temporal_end(&self) -> Option<DateTime<Utc>> {
        self.temporal.end
    }
}

/// Outcome of converting one remote collection document
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCollection {
    /// Fully valid, ready to index
    Valid(StacCollection),
    /// Structurally unusable (no id, no extent, no bbox); carries the reason
    Skipped { id: Option<String>, reason: String },
}

/// A remote collection after validation
#[derive(Debug, Clone, PartialEq)]
pub struct StacCollection {
    pub id: String,
    pub collection_type: String,
    pub title: String,
    pub description: String,
    pub extent: Extent,
    /// `href` of the first link with `rel == "items"`
    pub items_link: Option<String>,
}

impl StacCollection {
    /// Convert a raw collection document
    ///
    /// Missing or mistyped structure yields [`ParsedCollection::Skipped`]. A
    /// temporal value that is present but unparseable is an error, because it
    /// means the upstream catalog speaks a dialect we cannot index reliably.
    pub fn from_value(value: &Value) -> Result<ParsedCollection> {
        match RawCollection::deserialize(value) {
            Ok(raw) => Self::from_raw(raw),
            Err(e) => {
                let id = value.get("id").and_then(Value::as_str).map(str::to_string);
                Ok(skipped(id, &format!("malformed collection document: {e}")))
            }
        }
    }

    fn from_raw(raw: RawCollection) -> Result<ParsedCollection> {
        let Some(id) = raw.id else {
            return Ok(skipped(None, "missing id"));
        };
        let Some(extent) = raw.extent else {
            return Ok(skipped(Some(id), "missing extent"));
        };

        let spatial = match extent.spatial.map(parse_spatial) {
            Some(Ok(Some(spatial))) => spatial,
            None | Some(Ok(None)) => return Ok(skipped(Some(id), "missing spatial bbox")),
            Some(Err(err)) => return Ok(skipped(Some(id), &err.to_string())),
        };
        let temporal = match extent.temporal {
            Some(temporal) => parse_temporal(&temporal)?,
            None => TimeInterval::open(),
        };

        Ok(ParsedCollection::Valid(Self {
            items_link: find_link(&raw.links, "items").and_then(|link| link.href.clone()),
            collection_type: raw
                .collection_type
                .unwrap_or_else(|| DEFAULT_COLLECTION_TYPE.to_string()),
            title: raw.title.unwrap_or_else(|| id.clone()),
            description: raw.description.unwrap_or_default(),
            id,
            extent: Extent { spatial, temporal },
        }))
    }
}

fn skipped(id: Option<String>, reason: &str) -> ParsedCollection {
    ParsedCollection::Skipped {
        id,
        reason: reason.to_string(),
    }
}

/// Links of any STAC document, empty when absent or malformed
pub fn links_of(document: &Value) -> Vec<Link> {
    Linked::deserialize(document)
        .map(|linked| linked.links)
        .unwrap_or_default()
}

/// `href` of the first `rel == "items"` link, if any
pub fn items_link(collection: &Value) -> Option<String> {
    find_link(&links_of(collection), "items").and_then(|link| link.href.clone())
}

fn parse_spatial(spatial: RawSpatial) -> Result<Option<MultiRectangle>> {
    if spatial.bbox.is_empty() {
        return Ok(None);
    }
    let rectangles = spatial
        .bbox
        .iter()
        .map(|values| Rectangle::from_source_bbox(values))
        .collect::<Result<Vec<_>>>()?;
    MultiRectangle::new(rectangles).map(Some)
}

// Only the first interval is indexed, later ones are sub-ranges of it per STAC
fn parse_temporal(temporal: &RawTemporal) -> Result<TimeInterval> {
    let Some(pair) = temporal.interval.first() else {
        return Ok(TimeInterval::open());
    };

    let bound = |idx: usize| -> Result<_> {
        match pair.get(idx) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => parse_optional_timestamp(Some(s)),
            Some(other) => Err(Error::ConvertingTimestamp(other.to_string())),
        }
    };

    Ok(TimeInterval {
        start: bound(0)?,
        end: bound(1)?,
    })
}
