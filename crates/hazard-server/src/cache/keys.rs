//! Cache key layout.
//!
//! | Pattern | Value |
//! |---------|-------|
//! | `presence:{viewer}:{zoom}:{bbox}` | visible presence snapshot |
//!
//! `{viewer}` is `v={id}` for a named viewer and `anon` otherwise. Bbox
//! edges are written at full precision; two viewports share an entry only
//! when their edges are identical.
//! | `reports:{bbox}` | raw incident reports for a viewport |

use hazard_core::BoundingBox;

/// Everything derived from live positions.
pub const PRESENCE_PATTERN: &str = "presence:*";
/// Everything derived from the report source.
pub const REPORTS_PATTERN: &str = "reports:*";

pub fn presence_key(viewer_id: Option<&str>, zoom: f64, bbox: Option<&BoundingBox>) -> String {
    format!(
        "presence:{}:{:.1}:{}",
        viewer_id.map_or_else(|| "anon".to_string(), |id| format!("v={id}")),
        zoom,
        bbox.map(bbox_fragment).unwrap_or_else(|| "all".to_string())
    )
}

pub fn reports_key(bbox: &BoundingBox) -> String {
    format!("reports:{}", bbox_fragment(bbox))
}

fn bbox_fragment(bbox: &BoundingBox) -> String {
    format!(
        "{},{},{},{}",
        bbox.west, bbox.south, bbox.east, bbox.north
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_fall_under_their_invalidation_patterns() {
        let bbox = BoundingBox::new(-1.0, -1.0, 1.0, 1.0).unwrap();
        assert!(presence_key(Some("u1"), 14.0, Some(&bbox)).starts_with("presence:"));
        assert_eq!(presence_key(None, 13.0, None), "presence:anon:13.0:all");
        assert_eq!(reports_key(&bbox), "reports:-1,-1,1,1");
    }

    #[test]
    fn anonymous_and_named_viewers_never_share_a_key() {
        assert_ne!(presence_key(None, 14.0, None), presence_key(Some("-"), 14.0, None));
        assert_ne!(presence_key(None, 14.0, None), presence_key(Some("anon"), 14.0, None));
    }

    #[test]
    fn nearby_viewports_get_distinct_keys() {
        let a = BoundingBox::new(10.0, 20.0, 10.1, 20.1).unwrap();
        let b = BoundingBox::new(10.000001, 20.0, 10.1, 20.1).unwrap();
        assert_ne!(reports_key(&a), reports_key(&b));
    }
}
