//! STAC primitives: geometry, time, validated collection documents and HTTP access
//!
//! - [`geometry`] - Rectangles and multi-rectangle spatial extents (WGS84)
//! - [`temporal`] - Timestamp variants and `start/end` intervals
//! - [`extent`] - Remote collection documents converted to typed values
//! - [`client`] - Rate-limited reader for remote catalogs
//! - [`proxy`] - Read proxy onto the target STAC API

pub mod client;
pub mod extent;
pub mod geometry;
pub mod proxy;
pub mod temporal;

pub use client::{normalize_catalog_url, JsonResponse, StacClient};
pub use extent::{Extent, Link, ParsedCollection, StacCollection};
pub use geometry::{MultiRectangle, Rectangle, SRID_WGS84};
pub use proxy::{ProxyResponse, StacProxy};
pub use temporal::{parse_timestamp, TimeInterval};
