//! Conversation reconstruction and browsing
//!
//! Conversations are derived at query time from the messages collection:
//! rows are grouped by contact and ordered by (timestamp, id). Messages
//! without a timestamp fall back to ascending id.

use crate::error::{Result, TrawlError};
use crate::store::{MetaValue, Predicate, ScanOrder, StoredRow, VectorStore};
use serde::Serialize;
use std::collections::BTreeMap;

/// One entry of a reconstructed conversation window
#[derive(Debug, Clone, Serialize)]
pub struct ConversationEntry {
    #[serde(flatten)]
    pub row: StoredRow,
    /// Marks the message the window was built around
    pub is_target: bool,
}

/// Summary of one conversation in a collection
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub contact: String,
    pub contact_name: Option<String>,
    pub message_count: usize,
    pub last_timestamp: Option<f64>,
    pub last_message: String,
}

/// Fetch a target message and its surrounding window
///
/// Returns up to `window_before` rows preceding the target, the target
/// itself (flagged), and up to `window_after` rows following it, all within
/// the same contact.
pub fn reconstruct(
    store: &VectorStore,
    collection: &str,
    message_id: &str,
    window_before: usize,
    window_after: usize,
) -> Result<Vec<ConversationEntry>> {
    let target = store
        .get_by_id(collection, message_id)?
        .ok_or_else(|| TrawlError::NotFound {
            collection: collection.to_string(),
            id: message_id.to_string(),
        })?;

    let contact = target
        .metadata
        .get("contact")
        .and_then(MetaValue::as_str)
        .unwrap_or("unknown")
        .to_string();

    let mut rows = store.scan(
        collection,
        &Predicate::eq("contact", contact),
        None,
        ScanOrder::ById,
    )?;
    sort_chronologically(&mut rows);

    let position = rows
        .iter()
        .position(|r| r.id == message_id)
        .ok_or_else(|| TrawlError::NotFound {
            collection: collection.to_string(),
            id: message_id.to_string(),
        })?;

    let start = position.saturating_sub(window_before);
    let end = (position + window_after + 1).min(rows.len());

    Ok(rows
        .drain(start..end)
        .enumerate()
        .map(|(i, row)| ConversationEntry {
            is_target: start + i == position,
            row,
        })
        .collect())
}

/// List conversations grouped by contact, most recent first
pub fn list_conversations(
    store: &VectorStore,
    collection: &str,
) -> Result<Vec<ConversationSummary>> {
    let rows = store.scan(collection, &Predicate::True, None, ScanOrder::ById)?;

    let mut by_contact: BTreeMap<String, Vec<StoredRow>> = BTreeMap::new();
    for row in rows {
        let contact = row
            .metadata
            .get("contact")
            .and_then(MetaValue::as_str)
            .unwrap_or("unknown")
            .to_string();
        by_contact.entry(contact).or_default().push(row);
    }

    let mut summaries: Vec<ConversationSummary> = by_contact
        .into_iter()
        .map(|(contact, mut rows)| {
            sort_chronologically(&mut rows);
            let last = rows.last().expect("group is non-empty");

            let contact_name = rows
                .iter()
                .find_map(|r| {
                    r.metadata
                        .get("contact_name")
                        .and_then(MetaValue::as_str)
                        .map(str::to_string)
                });

            ConversationSummary {
                contact,
                contact_name,
                message_count: rows.len(),
                last_timestamp: last.metadata.get("timestamp").and_then(MetaValue::as_f64),
                last_message: preview(&last.document),
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.last_timestamp
            .partial_cmp(&a.last_timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.contact.cmp(&b.contact))
    });
    Ok(summaries)
}

/// All messages of one conversation in chronological order
pub fn conversation_messages(
    store: &VectorStore,
    collection: &str,
    contact: &str,
) -> Result<Vec<StoredRow>> {
    let mut rows = store.scan(
        collection,
        &Predicate::eq("contact", contact),
        None,
        ScanOrder::ById,
    )?;
    sort_chronologically(&mut rows);
    Ok(rows)
}

/// Case-insensitive substring search within one conversation
///
/// A plain scan over the conversation, not a retrieval mode.
pub fn grep_conversation(
    store: &VectorStore,
    collection: &str,
    contact: &str,
    query: &str,
) -> Result<Vec<StoredRow>> {
    let needle = query.to_lowercase();
    let rows = conversation_messages(store, collection, contact)?;
    Ok(rows
        .into_iter()
        .filter(|r| r.document.to_lowercase().contains(&needle))
        .collect())
}

/// Order by (timestamp, id); rows without a timestamp sort first by id
fn sort_chronologically(rows: &mut [StoredRow]) {
    rows.sort_by(|a, b| {
        let ta = a.metadata.get("timestamp").and_then(MetaValue::as_f64);
        let tb = b.metadata.get("timestamp").and_then(MetaValue::as_f64);
        ta.partial_cmp(&tb)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn preview(document: &str) -> String {
    if document.len() > 100 {
        let mut end = 100;
        while !document.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &document[..end])
    } else {
        document.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let short = preview("hello");
        assert_eq!(short, "hello");

        let long = "é".repeat(80);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert!(p.len() <= 104);
    }
}
