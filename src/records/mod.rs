//! Typed record shapes shared by the pipeline and the search engine

pub mod normalizer;

pub use normalizer::{parse_timestamp, Normalizer, RawImageRecord, RawRecord};

use crate::store::{MetaValue, Metadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a message relative to the device owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
    Unknown,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
            Direction::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "incoming" => Direction::Incoming,
            "outgoing" => Direction::Outgoing,
            _ => Direction::Unknown,
        }
    }
}

/// One normalized message from a seized dump
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Canonical form of the non-owner endpoint of the conversation
    pub contact: String,
    pub contact_name: Option<String>,
    pub direction: Direction,
    pub app: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub is_noise: bool,
    pub source_tag: String,
}

impl Message {
    /// Scalar metadata stored next to the message's vector
    pub fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("type".into(), MetaValue::from("message"));
        meta.insert("timestamp".into(), epoch_value(self.timestamp));
        meta.insert("contact".into(), MetaValue::from(self.contact.clone()));
        meta.insert(
            "contact_name".into(),
            MetaValue::from(self.contact_name.clone()),
        );
        meta.insert(
            "direction".into(),
            MetaValue::from(self.direction.as_str()),
        );
        meta.insert("app".into(), MetaValue::from(self.app.clone()));
        meta.insert("gps_lat".into(), MetaValue::from(self.gps_lat));
        meta.insert("gps_lon".into(), MetaValue::from(self.gps_lon));
        meta.insert("is_noise".into(), MetaValue::from(self.is_noise));
        meta.insert(
            "source_tag".into(),
            MetaValue::from(self.source_tag.clone()),
        );
        meta
    }
}

/// A window of adjacent messages from one conversation, indexed as a single
/// document to preserve context
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunk {
    pub id: String,
    /// Member texts joined with a single line break, in window order
    pub text: String,
    pub timestamp_start: Option<DateTime<Utc>>,
    pub timestamp_end: Option<DateTime<Utc>>,
    pub contact: String,
    pub contact_name: Option<String>,
    pub member_ids: Vec<String>,
    /// True iff every member is noise
    pub is_noise: bool,
    pub source_tag: String,
}

impl ContextChunk {
    pub fn first_message_id(&self) -> &str {
        &self.member_ids[0]
    }

    pub fn member_count(&self) -> usize {
        self.member_ids.len()
    }

    pub fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("type".into(), MetaValue::from("chunk"));
        meta.insert("timestamp_start".into(), epoch_value(self.timestamp_start));
        meta.insert("timestamp_end".into(), epoch_value(self.timestamp_end));
        meta.insert("contact".into(), MetaValue::from(self.contact.clone()));
        meta.insert(
            "contact_name".into(),
            MetaValue::from(self.contact_name.clone()),
        );
        meta.insert(
            "member_ids".into(),
            MetaValue::from(self.member_ids.join(",")),
        );
        meta.insert(
            "first_message_id".into(),
            MetaValue::from(self.first_message_id()),
        );
        meta.insert(
            "member_count".into(),
            MetaValue::from(self.member_count() as f64),
        );
        meta.insert("is_noise".into(), MetaValue::from(self.is_noise));
        meta.insert(
            "source_tag".into(),
            MetaValue::from(self.source_tag.clone()),
        );
        meta
    }
}

/// An image whose caption text serves as the indexed document
#[derive(Debug, Clone, Serialize)]
pub struct ImageRecord {
    pub id: String,
    pub description: String,
    pub filename: Option<String>,
    pub path: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
    pub source_tag: String,
}

impl ImageRecord {
    pub fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("type".into(), MetaValue::from("image"));
        meta.insert("timestamp".into(), epoch_value(self.timestamp));
        meta.insert("filename".into(), MetaValue::from(self.filename.clone()));
        meta.insert("path".into(), MetaValue::from(self.path.clone()));
        meta.insert("gps_lat".into(), MetaValue::from(self.gps_lat));
        meta.insert("gps_lon".into(), MetaValue::from(self.gps_lon));
        meta.insert("is_noise".into(), MetaValue::from(false));
        meta.insert(
            "source_tag".into(),
            MetaValue::from(self.source_tag.clone()),
        );
        meta
    }
}

fn epoch_value(ts: Option<DateTime<Utc>>) -> MetaValue {
    match ts {
        Some(ts) => MetaValue::Num(ts.timestamp() as f64),
        None => MetaValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_direction_round_trip() {
        assert_eq!(Direction::parse("incoming"), Direction::Incoming);
        assert_eq!(Direction::parse("OUTGOING"), Direction::Outgoing);
        assert_eq!(Direction::parse("draft"), Direction::Unknown);
        assert_eq!(Direction::Incoming.as_str(), "incoming");
    }

    #[test]
    fn test_message_metadata() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let msg = Message {
            id: "m1".to_string(),
            text: "hello".to_string(),
            timestamp: Some(ts),
            contact: "+33612345678".to_string(),
            contact_name: Some("Alice".to_string()),
            direction: Direction::Incoming,
            app: None,
            gps_lat: Some(48.85),
            gps_lon: Some(2.35),
            is_noise: false,
            source_tag: "case1".to_string(),
        };

        let meta = msg.metadata();
        assert_eq!(
            meta.get("timestamp").and_then(MetaValue::as_f64),
            Some(ts.timestamp() as f64)
        );
        assert_eq!(
            meta.get("direction").and_then(MetaValue::as_str),
            Some("incoming")
        );
        assert!(meta.get("app").unwrap().is_null());
    }

    #[test]
    fn test_chunk_metadata() {
        let chunk = ContextChunk {
            id: "+336:m1:2".to_string(),
            text: "a\nb".to_string(),
            timestamp_start: None,
            timestamp_end: None,
            contact: "+336".to_string(),
            contact_name: None,
            member_ids: vec!["m1".to_string(), "m2".to_string()],
            is_noise: false,
            source_tag: "case1".to_string(),
        };

        let meta = chunk.metadata();
        assert_eq!(
            meta.get("member_ids").and_then(MetaValue::as_str),
            Some("m1,m2")
        );
        assert_eq!(
            meta.get("member_count").and_then(MetaValue::as_f64),
            Some(2.0)
        );
        assert!(meta.get("timestamp_start").unwrap().is_null());
    }
}
