//! Property tests for spatial and temporal extent handling

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use stacport::stac::geometry::{MultiRectangle, Rectangle};
use stacport::stac::temporal::{from_storage, parse_timestamp, to_storage, TimeInterval, TimestampFormat};

fn rectangle() -> impl Strategy<Value = Rectangle> {
    (-180.0f64..180.0, -90.0f64..90.0, -180.0f64..180.0, -90.0f64..90.0)
        .prop_map(|(x1, y1, x2, y2)| Rectangle::new(x1, y1, x2, y2))
}

fn instant() -> impl Strategy<Value = DateTime<Utc>> {
    // 1970 .. 2100, microsecond resolution
    (0i64..4_102_444_800, 0u32..1_000_000).prop_map(|(secs, micros)| {
        Utc.timestamp_opt(secs, micros * 1_000).single().unwrap_or_default()
    })
}

proptest! {
    #[test]
    fn union_bbox_is_coordinate_min_max(rects in prop::collection::vec(rectangle(), 1..8)) {
        let multi = MultiRectangle::new(rects.clone()).unwrap();
        let bbox = multi.bounding_box();

        let min_x = rects.iter().map(|r| r.min_x).fold(f64::INFINITY, f64::min);
        let min_y = rects.iter().map(|r| r.min_y).fold(f64::INFINITY, f64::min);
        let max_x = rects.iter().map(|r| r.max_x).fold(f64::NEG_INFINITY, f64::max);
        let max_y = rects.iter().map(|r| r.max_y).fold(f64::NEG_INFINITY, f64::max);

        prop_assert_eq!(bbox.to_array(), [min_x, min_y, max_x, max_y]);
    }

    #[test]
    fn member_hit_implies_union_hit(rects in prop::collection::vec(rectangle(), 1..8), query in rectangle()) {
        let multi = MultiRectangle::new(rects).unwrap();
        if multi.intersects(&query) {
            prop_assert!(multi.bounding_box().intersects(&query));
        }
    }

    #[test]
    fn wkt_keeps_member_rectangles(rects in prop::collection::vec(rectangle(), 1..5)) {
        let multi = MultiRectangle::new(rects).unwrap();
        let decoded = MultiRectangle::from_wkt(&multi.to_wkt()).unwrap();
        prop_assert_eq!(decoded.rectangles().len(), multi.rectangles().len());
        for (a, b) in decoded.rectangles().iter().zip(multi.rectangles()) {
            for (x, y) in a.to_array().iter().zip(b.to_array()) {
                prop_assert!((x - y).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn every_layout_parses_what_it_formats(t in instant()) {
        for format in TimestampFormat::ALL {
            let parsed = parse_timestamp(&format.format(&t)).unwrap();
            let expected = match format {
                TimestampFormat::Rfc3339WithOffset => {
                    Utc.timestamp_opt(t.timestamp(), 0).single().unwrap()
                }
                _ => t,
            };
            prop_assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn storage_text_order_is_time_order(a in instant(), b in instant()) {
        prop_assert_eq!(to_storage(&a).cmp(&to_storage(&b)), a.cmp(&b));
        prop_assert_eq!(from_storage(&to_storage(&a)).unwrap(), a);
    }

    #[test]
    fn overlap_is_symmetric(a in instant(), b in instant(), c in instant(), d in instant()) {
        let first = TimeInterval { start: Some(a.min(b)), end: Some(a.max(b)) };
        let second = TimeInterval { start: Some(c.min(d)), end: Some(c.max(d)) };
        prop_assert_eq!(first.overlaps(&second), second.overlaps(&first));
        prop_assert!(first.overlaps(&TimeInterval::open()));
    }
}
