//! Sliding-window context chunks per conversation
//!
//! Chunks never cross contacts. Within a contact, messages are ordered by
//! (timestamp, id) so that null or equal timestamps still chunk
//! deterministically.

use crate::error::{Result, TrawlError};
use crate::records::{ContextChunk, Message};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Window geometry for context chunks
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Messages per window, >= 1
    pub window_size: usize,
    /// Messages shared between adjacent windows, < window_size
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_size: 3,
            overlap: 1,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(TrawlError::Config(
                "chunking.window_size must be >= 1".to_string(),
            ));
        }
        if self.overlap >= self.window_size {
            return Err(TrawlError::Config(format!(
                "chunking.overlap ({}) must be < window_size ({})",
                self.overlap, self.window_size
            )));
        }
        Ok(())
    }

    fn stride(&self) -> usize {
        self.window_size - self.overlap
    }
}

/// Build overlapping context chunks, grouped by contact
///
/// Every message ends up in at least one chunk. The trailing partial window
/// is emitted only when it contains a message the previous window did not,
/// which prevents duplicate trailing chunks.
pub fn build_chunks(messages: &[Message], config: ChunkingConfig) -> Result<Vec<ContextChunk>> {
    config.validate()?;

    // BTreeMap keeps contact iteration order deterministic
    let mut conversations: BTreeMap<&str, Vec<&Message>> = BTreeMap::new();
    for msg in messages {
        conversations.entry(&msg.contact).or_default().push(msg);
    }

    let mut chunks = Vec::new();
    for (contact, mut conv) in conversations {
        conv.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        chunk_conversation(contact, &conv, config, &mut chunks);
    }

    Ok(chunks)
}

fn chunk_conversation(
    contact: &str,
    conv: &[&Message],
    config: ChunkingConfig,
    out: &mut Vec<ContextChunk>,
) {
    let mut start = 0;
    let mut prev_end = 0;

    while start < conv.len() {
        let end = (start + config.window_size).min(conv.len());
        // Trailing window with no new member relative to the previous one
        if start > 0 && end <= prev_end {
            break;
        }

        out.push(make_chunk(contact, &conv[start..end]));
        prev_end = end;

        if end == conv.len() {
            break;
        }
        start += config.stride();
    }
}

fn make_chunk(contact: &str, window: &[&Message]) -> ContextChunk {
    let text = window
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let member_ids: Vec<String> = window.iter().map(|m| m.id.clone()).collect();
    let id = format!("{}:{}:{}", contact, member_ids[0], member_ids.len());

    ContextChunk {
        id,
        text,
        timestamp_start: window.iter().filter_map(|m| m.timestamp).min(),
        timestamp_end: window.iter().filter_map(|m| m.timestamp).max(),
        contact: contact.to_string(),
        contact_name: window.iter().find_map(|m| m.contact_name.clone()),
        member_ids,
        is_noise: window.iter().all(|m| m.is_noise),
        source_tag: window[0].source_tag.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Direction;
    use chrono::{TimeZone, Utc};

    fn msg(id: &str, contact: &str, minute: Option<u32>) -> Message {
        Message {
            id: id.to_string(),
            text: format!("text of {}", id),
            timestamp: minute.map(|m| Utc.with_ymd_and_hms(2024, 1, 1, 10, m, 0).unwrap()),
            contact: contact.to_string(),
            contact_name: None,
            direction: Direction::Incoming,
            app: None,
            gps_lat: None,
            gps_lon: None,
            is_noise: false,
            source_tag: "case1".to_string(),
        }
    }

    fn cfg(window: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            window_size: window,
            overlap,
        }
    }

    #[test]
    fn test_window_one_yields_one_chunk_per_message() {
        let messages = vec![
            msg("m1", "A", Some(1)),
            msg("m2", "A", Some(2)),
            msg("m3", "A", Some(3)),
        ];

        let chunks = build_chunks(&messages, cfg(1, 0)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].id, "A:m1:1");
        assert_eq!(chunks[1].id, "A:m2:1");
        assert_eq!(chunks[2].id, "A:m3:1");
    }

    #[test]
    fn test_single_message_contact_yields_singleton_chunk() {
        let messages = vec![msg("m1", "A", Some(1))];
        let chunks = build_chunks(&messages, cfg(3, 1)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].member_ids, vec!["m1"]);
    }

    #[test]
    fn test_max_overlap_window_count() {
        // window=3, overlap=2 over 5 messages: windows at 0,1,2 then the
        // trailing candidates add nothing new
        let messages: Vec<Message> =
            (1..=5).map(|i| msg(&format!("m{}", i), "A", Some(i))).collect();

        let chunks = build_chunks(&messages, cfg(3, 2)).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].member_ids, vec!["m1", "m2", "m3"]);
        assert_eq!(chunks[1].member_ids, vec!["m2", "m3", "m4"]);
        assert_eq!(chunks[2].member_ids, vec!["m3", "m4", "m5"]);
    }

    #[test]
    fn test_trailing_partial_window_with_new_member() {
        // window=3, overlap=1, 4 messages: [m1..m3] then [m3, m4]
        let messages: Vec<Message> =
            (1..=4).map(|i| msg(&format!("m{}", i), "A", Some(i))).collect();

        let chunks = build_chunks(&messages, cfg(3, 1)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].member_ids, vec!["m1", "m2", "m3"]);
        assert_eq!(chunks[1].member_ids, vec!["m3", "m4"]);
        assert_eq!(chunks[1].id, "A:m3:2");
    }

    #[test]
    fn test_chunks_never_cross_contacts() {
        let messages = vec![
            msg("a1", "A", Some(1)),
            msg("b1", "B", Some(2)),
            msg("a2", "A", Some(3)),
            msg("b2", "B", Some(4)),
        ];

        let chunks = build_chunks(&messages, cfg(2, 0)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].contact, "A");
        assert_eq!(chunks[0].member_ids, vec!["a1", "a2"]);
        assert_eq!(chunks[1].contact, "B");
        assert_eq!(chunks[1].member_ids, vec!["b1", "b2"]);
    }

    #[test]
    fn test_every_message_is_covered() {
        let messages: Vec<Message> =
            (1..=17).map(|i| msg(&format!("m{:02}", i), "A", Some(i))).collect();

        for (window, overlap) in [(1, 0), (3, 1), (4, 3), (5, 0)] {
            let chunks = build_chunks(&messages, cfg(window, overlap)).unwrap();
            for m in &messages {
                assert!(
                    chunks.iter().any(|c| c.member_ids.contains(&m.id)),
                    "message {} not covered by window={} overlap={}",
                    m.id,
                    window,
                    overlap
                );
            }
        }
    }

    #[test]
    fn test_null_timestamps_sort_deterministically() {
        let messages = vec![
            msg("m2", "A", None),
            msg("m1", "A", None),
            msg("m3", "A", Some(5)),
        ];

        let chunks = build_chunks(&messages, cfg(3, 0)).unwrap();
        assert_eq!(chunks.len(), 1);
        // Nulls first, ordered by id; timestamped messages after
        assert_eq!(chunks[0].member_ids, vec!["m1", "m2", "m3"]);
        assert_eq!(chunks[0].text, "text of m1\ntext of m2\ntext of m3");
    }

    #[test]
    fn test_chunk_timestamps_and_noise_conjunction() {
        let mut m1 = msg("m1", "A", Some(1));
        let mut m2 = msg("m2", "A", Some(9));
        m1.is_noise = true;
        m2.is_noise = true;
        let m3 = {
            let mut m = msg("m3", "A", None);
            m.is_noise = false;
            m
        };

        let chunks = build_chunks(&[m1.clone(), m2.clone()], cfg(2, 0)).unwrap();
        assert!(chunks[0].is_noise);
        assert_eq!(chunks[0].timestamp_start, m1.timestamp);
        assert_eq!(chunks[0].timestamp_end, m2.timestamp);

        let chunks = build_chunks(&[m1, m2, m3], cfg(3, 0)).unwrap();
        assert!(!chunks[0].is_noise);
    }

    #[test]
    fn test_all_null_timestamps_yield_null_bounds() {
        let messages = vec![msg("m1", "A", None), msg("m2", "A", None)];
        let chunks = build_chunks(&messages, cfg(2, 0)).unwrap();
        assert!(chunks[0].timestamp_start.is_none());
        assert!(chunks[0].timestamp_end.is_none());
    }

    #[test]
    fn test_invalid_config() {
        assert!(build_chunks(&[], cfg(0, 0)).is_err());
        assert!(build_chunks(&[], cfg(3, 3)).is_err());
    }
}
