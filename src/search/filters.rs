//! Filter compiler: high-level search predicates to store predicates
//!
//! Geographic radius compiles in two steps: a coarse bounding box the store
//! can evaluate, plus a haversine post-filter the engine applies to returned
//! candidates.

use crate::error::{Result, TrawlError};
use crate::records::parse_timestamp;
use crate::store::{Bound, CollectionKind, Predicate};
use serde::{Deserialize, Serialize};

const KM_PER_DEGREE_LAT: f64 = 111.0;

/// High-level predicate object accepted by the search API
///
/// Unknown input fields are ignored for forward compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub timestamp_start: Option<String>,
    pub timestamp_end: Option<String>,
    pub direction: Option<String>,
    pub contact: Option<String>,
    pub app: Option<String>,
    /// Restrict to one record type: "message", "chunk", or "image"
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub radius_km: Option<f64>,
}

/// Geographic post-filter parameters
#[derive(Debug, Clone, Copy)]
pub struct GeoFilter {
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

/// Compiled form: a store predicate plus an optional geographic post-filter
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    pub predicate: Predicate,
    pub geo: Option<GeoFilter>,
}

/// Compile high-level filters against a target collection kind
pub fn compile(
    filters: &SearchFilters,
    kind: CollectionKind,
    exclude_noise: bool,
) -> Result<CompiledFilters> {
    let mut clauses = Vec::new();

    let start = parse_filter_timestamp(filters.timestamp_start.as_deref(), "timestamp_start")?;
    let end = parse_filter_timestamp(filters.timestamp_end.as_deref(), "timestamp_end")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(TrawlError::InvalidPredicate(format!(
                "timestamp_start ({}) is after timestamp_end ({})",
                start, end
            )));
        }
    }
    if start.is_some() || end.is_some() {
        match kind {
            // Chunks must satisfy the range on both endpoints; chunks with
            // null timestamps fail the range and are excluded
            CollectionKind::Chunks => {
                clauses.push(Predicate::range(
                    "timestamp_start",
                    start.map(Bound::inclusive),
                    end.map(Bound::inclusive),
                ));
                clauses.push(Predicate::range(
                    "timestamp_end",
                    start.map(Bound::inclusive),
                    end.map(Bound::inclusive),
                ));
            }
            _ => {
                clauses.push(Predicate::range(
                    "timestamp",
                    start.map(Bound::inclusive),
                    end.map(Bound::inclusive),
                ));
            }
        }
    }

    if let Some(direction) = filters.direction.as_deref() {
        match direction.to_ascii_lowercase().as_str() {
            "incoming" | "outgoing" => {
                clauses.push(Predicate::eq("direction", direction.to_ascii_lowercase()));
            }
            other => {
                tracing::debug!("Ignoring unrecognized direction filter '{}'", other);
            }
        }
    }

    if exclude_noise {
        clauses.push(Predicate::eq("is_noise", false));
    }

    if let Some(contact) = &filters.contact {
        clauses.push(Predicate::eq("contact", contact.clone()));
    }

    if let Some(app) = &filters.app {
        clauses.push(Predicate::eq("app", app.clone()));
    }

    if let Some(record_type) = filters.record_type.as_deref() {
        match record_type {
            "message" | "chunk" | "image" => {
                clauses.push(Predicate::eq("type", record_type));
            }
            other => {
                tracing::debug!("Ignoring unrecognized type filter '{}'", other);
            }
        }
    }

    // Geographic radius: all three fields together, otherwise ignored
    let geo = match (filters.gps_lat, filters.gps_lon, filters.radius_km) {
        (Some(lat), Some(lon), Some(radius_km)) => {
            if radius_km <= 0.0 {
                return Err(TrawlError::InvalidPredicate(format!(
                    "radius_km must be positive, got {}",
                    radius_km
                )));
            }
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                return Err(TrawlError::InvalidPredicate(format!(
                    "invalid coordinates ({}, {})",
                    lat, lon
                )));
            }

            let delta_lat = radius_km / KM_PER_DEGREE_LAT;
            let cos_lat = lat.to_radians().cos().max(1e-4);
            let delta_lon = radius_km / (KM_PER_DEGREE_LAT * cos_lat);

            clauses.push(Predicate::range(
                "gps_lat",
                Some(Bound::inclusive(lat - delta_lat)),
                Some(Bound::inclusive(lat + delta_lat)),
            ));
            clauses.push(Predicate::range(
                "gps_lon",
                Some(Bound::inclusive(lon - delta_lon)),
                Some(Bound::inclusive(lon + delta_lon)),
            ));

            Some(GeoFilter {
                lat,
                lon,
                radius_km,
            })
        }
        _ => None,
    };

    Ok(CompiledFilters {
        predicate: Predicate::and(clauses),
        geo,
    })
}

fn parse_filter_timestamp(value: Option<&str>, field: &str) -> Result<Option<f64>> {
    match value {
        None => Ok(None),
        Some(raw) => parse_timestamp(raw)
            .map(|ts| Some(ts.timestamp() as f64))
            .ok_or_else(|| {
                TrawlError::InvalidPredicate(format!("{} '{}' is not a valid timestamp", field, raw))
            }),
    }
}

/// Great-circle distance in kilometers
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MetaValue, Metadata};

    fn meta(entries: &[(&str, MetaValue)]) -> Metadata {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_empty_filters_compile_to_true() {
        let compiled = compile(&SearchFilters::default(), CollectionKind::Messages, false).unwrap();
        assert!(compiled.predicate.is_true());
        assert!(compiled.geo.is_none());
    }

    #[test]
    fn test_time_range_on_messages() {
        let filters = SearchFilters {
            timestamp_start: Some("2024-02-01".to_string()),
            timestamp_end: Some("2024-04-01".to_string()),
            ..Default::default()
        };
        let compiled = compile(&filters, CollectionKind::Messages, false).unwrap();

        let inside = parse_timestamp("2024-03-01").unwrap().timestamp() as f64;
        let outside = parse_timestamp("2024-05-01").unwrap().timestamp() as f64;

        assert!(compiled
            .predicate
            .matches(&meta(&[("timestamp", MetaValue::Num(inside))])));
        assert!(!compiled
            .predicate
            .matches(&meta(&[("timestamp", MetaValue::Num(outside))])));
        // Null timestamps fall outside any range
        assert!(!compiled
            .predicate
            .matches(&meta(&[("timestamp", MetaValue::Null)])));
    }

    #[test]
    fn test_time_range_on_chunks_requires_both_endpoints() {
        let filters = SearchFilters {
            timestamp_start: Some("2024-02-01".to_string()),
            timestamp_end: Some("2024-04-01".to_string()),
            ..Default::default()
        };
        let compiled = compile(&filters, CollectionKind::Chunks, false).unwrap();

        let ts = |s: &str| MetaValue::Num(parse_timestamp(s).unwrap().timestamp() as f64);

        assert!(compiled.predicate.matches(&meta(&[
            ("timestamp_start", ts("2024-02-10")),
            ("timestamp_end", ts("2024-03-10")),
        ])));
        // One endpoint outside the range excludes the chunk
        assert!(!compiled.predicate.matches(&meta(&[
            ("timestamp_start", ts("2024-01-10")),
            ("timestamp_end", ts("2024-03-10")),
        ])));
        assert!(!compiled.predicate.matches(&meta(&[
            ("timestamp_start", MetaValue::Null),
            ("timestamp_end", MetaValue::Null),
        ])));
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let filters = SearchFilters {
            timestamp_start: Some("2024-04-01".to_string()),
            timestamp_end: Some("2024-02-01".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            compile(&filters, CollectionKind::Messages, false),
            Err(TrawlError::InvalidPredicate(_))
        ));
    }

    #[test]
    fn test_direction_and_noise() {
        let filters = SearchFilters {
            direction: Some("incoming".to_string()),
            ..Default::default()
        };
        let compiled = compile(&filters, CollectionKind::Messages, true).unwrap();

        assert!(compiled.predicate.matches(&meta(&[
            ("direction", MetaValue::from("incoming")),
            ("is_noise", MetaValue::from(false)),
        ])));
        assert!(!compiled.predicate.matches(&meta(&[
            ("direction", MetaValue::from("incoming")),
            ("is_noise", MetaValue::from(true)),
        ])));

        // Unrecognized direction values are ignored, not rejected
        let ignored = SearchFilters {
            direction: Some("sideways".to_string()),
            ..Default::default()
        };
        let compiled = compile(&ignored, CollectionKind::Messages, false).unwrap();
        assert!(compiled.predicate.is_true());
    }

    #[test]
    fn test_geo_bounding_box_and_post_filter() {
        let filters = SearchFilters {
            gps_lat: Some(48.8566),
            gps_lon: Some(2.3522),
            radius_km: Some(10.0),
            ..Default::default()
        };
        let compiled = compile(&filters, CollectionKind::Messages, false).unwrap();
        let geo = compiled.geo.unwrap();
        assert_eq!(geo.radius_km, 10.0);

        // ~1km away passes the box
        assert!(compiled.predicate.matches(&meta(&[
            ("gps_lat", MetaValue::Num(48.8656)),
            ("gps_lon", MetaValue::Num(2.3522)),
        ])));
        // ~100km away fails the box
        assert!(!compiled.predicate.matches(&meta(&[
            ("gps_lat", MetaValue::Num(49.76)),
            ("gps_lon", MetaValue::Num(2.3522)),
        ])));
        // Rows without coordinates fail the box
        assert!(!compiled.predicate.matches(&meta(&[])));
    }

    #[test]
    fn test_partial_geo_fields_are_ignored() {
        let filters = SearchFilters {
            gps_lat: Some(48.0),
            ..Default::default()
        };
        let compiled = compile(&filters, CollectionKind::Messages, false).unwrap();
        assert!(compiled.predicate.is_true());
        assert!(compiled.geo.is_none());
    }

    #[test]
    fn test_invalid_geo_values() {
        let filters = SearchFilters {
            gps_lat: Some(48.0),
            gps_lon: Some(2.0),
            radius_km: Some(0.0),
            ..Default::default()
        };
        assert!(compile(&filters, CollectionKind::Messages, false).is_err());

        let filters = SearchFilters {
            gps_lat: Some(95.0),
            gps_lon: Some(2.0),
            radius_km: Some(5.0),
            ..Default::default()
        };
        assert!(compile(&filters, CollectionKind::Messages, false).is_err());
    }

    #[test]
    fn test_record_type_filter() {
        let filters = SearchFilters {
            record_type: Some("chunk".to_string()),
            ..Default::default()
        };
        let compiled = compile(&filters, CollectionKind::Chunks, false).unwrap();
        assert!(compiled
            .predicate
            .matches(&meta(&[("type", MetaValue::from("chunk"))])));
        assert!(!compiled
            .predicate
            .matches(&meta(&[("type", MetaValue::from("message"))])));

        // Unrecognized type values are ignored, not rejected
        let ignored = SearchFilters {
            record_type: Some("video".to_string()),
            ..Default::default()
        };
        let compiled = compile(&ignored, CollectionKind::Messages, false).unwrap();
        assert!(compiled.predicate.is_true());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let filters: SearchFilters = serde_json::from_str(
            r#"{"direction": "incoming", "not_a_field": 42, "another": "x"}"#,
        )
        .unwrap();
        assert_eq!(filters.direction.as_deref(), Some("incoming"));
    }

    #[test]
    fn test_haversine_known_distance() {
        // Paris to Lyon is ~392 km
        let d = haversine_km(48.8566, 2.3522, 45.7640, 4.8357);
        assert!((d - 392.0).abs() < 5.0, "got {}", d);

        assert!(haversine_km(48.0, 2.0, 48.0, 2.0) < 1e-9);
    }
}
