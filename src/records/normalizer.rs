//! Normalization of raw parser rows into typed records
//!
//! External parsers emit heterogeneous raw rows; the normalizer turns them
//! into `Message`/`ImageRecord` values. Malformed rows are skipped and
//! counted, never surfaced as errors.

use super::{Direction, ImageRecord, Message};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

/// A raw message row as emitted by a tabular parser
///
/// Every field is optional; absent fields become `None` downstream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    pub id: Option<String>,
    #[serde(alias = "message")]
    pub text: Option<String>,
    pub timestamp: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub contact_name: Option<String>,
    pub direction: Option<String>,
    pub app: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
}

/// A raw image row as emitted by a tabular parser
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawImageRecord {
    pub id: Option<String>,
    #[serde(alias = "caption")]
    pub description: Option<String>,
    pub filename: Option<String>,
    pub path: Option<String>,
    pub timestamp: Option<String>,
    pub gps_lat: Option<f64>,
    pub gps_lon: Option<f64>,
}

/// Converts raw rows into typed records, counting what it drops
pub struct Normalizer {
    source_tag: String,
    skipped: usize,
}

impl Normalizer {
    pub fn new(source_tag: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
            skipped: 0,
        }
    }

    /// Rows dropped so far because they were malformed
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Normalize one raw message row; `None` means the row was dropped
    ///
    /// A row needs an id and a non-empty text to be indexable.
    pub fn normalize_message(&mut self, raw: RawRecord) -> Option<Message> {
        let id = match raw.id.filter(|s| !s.is_empty()) {
            Some(id) => id,
            None => {
                self.skipped += 1;
                return None;
            }
        };
        let text = match raw.text.filter(|s| !s.is_empty()) {
            Some(text) => text,
            None => {
                self.skipped += 1;
                tracing::debug!("Dropping message '{}' with empty text", id);
                return None;
            }
        };

        let direction = raw
            .direction
            .as_deref()
            .map(Direction::parse)
            .unwrap_or(Direction::Unknown);

        // The contact is the non-owner endpoint: sender for incoming traffic,
        // recipient otherwise
        let contact = match direction {
            Direction::Incoming => raw.from.clone().or(raw.to.clone()),
            _ => raw.to.clone().or(raw.from.clone()),
        }
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

        Some(Message {
            id,
            text,
            timestamp: raw.timestamp.as_deref().and_then(parse_timestamp),
            contact,
            contact_name: raw.contact_name.filter(|s| !s.is_empty()),
            direction,
            app: raw.app.filter(|s| !s.is_empty()),
            gps_lat: raw.gps_lat,
            gps_lon: raw.gps_lon,
            is_noise: false,
            source_tag: self.source_tag.clone(),
        })
    }

    /// Normalize a whole stream of raw message rows
    pub fn normalize_messages(
        &mut self,
        rows: impl IntoIterator<Item = RawRecord>,
    ) -> Vec<Message> {
        rows.into_iter()
            .filter_map(|raw| self.normalize_message(raw))
            .collect()
    }

    /// Normalize one raw image row; the caption is the indexed document
    pub fn normalize_image(&mut self, raw: RawImageRecord) -> Option<ImageRecord> {
        let id = match raw.id.filter(|s| !s.is_empty()) {
            Some(id) => id,
            None => {
                self.skipped += 1;
                return None;
            }
        };
        let description = match raw.description.filter(|s| !s.is_empty()) {
            Some(d) => d,
            None => {
                self.skipped += 1;
                tracing::debug!("Dropping image '{}' without a description", id);
                return None;
            }
        };

        Some(ImageRecord {
            id,
            description,
            filename: raw.filename.filter(|s| !s.is_empty()),
            path: raw.path.filter(|s| !s.is_empty()),
            timestamp: raw.timestamp.as_deref().and_then(parse_timestamp),
            gps_lat: raw.gps_lat,
            gps_lon: raw.gps_lon,
            source_tag: self.source_tag.clone(),
        })
    }

    pub fn normalize_images(
        &mut self,
        rows: impl IntoIterator<Item = RawImageRecord>,
    ) -> Vec<ImageRecord> {
        rows.into_iter()
            .filter_map(|raw| self.normalize_image(raw))
            .collect()
    }
}

/// Parse a timestamp from the formats seen in evidence exports
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD HH:MM:SS`,
/// `YYYY-MM-DD`, and integer epoch seconds.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    if let Ok(epoch) = value.parse::<i64>() {
        return DateTime::from_timestamp(epoch, 0);
    }

    None
}
