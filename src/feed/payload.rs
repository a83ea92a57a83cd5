//! Decoding of raw change payloads.
//!
//! A change payload looks like
//! `{"eventType":"INSERT","schema":"public","table":"bookmarks","new":{..},"old":{..}}`.
//! Deletes only carry the old row, and usually only its primary key.

use crate::error::{Result, SyncError};
use crate::types::{Bookmark, BookmarkId};
use serde::Deserialize;

use super::types::FeedEvent;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePayload {
    event_type: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    new: Option<serde_json::Value>,
    #[serde(default)]
    old: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OldKey {
    id: BookmarkId,
}

impl FeedEvent {
    /// Decode a raw change payload into a feed event.
    pub fn decode(bytes: &[u8]) -> Result<FeedEvent> {
        let payload: ChangePayload = serde_json::from_slice(bytes)?;

        if let Some(ref table) = payload.table {
            if table != "bookmarks" {
                return Err(SyncError::Decode(format!("unexpected table: {}", table)));
            }
        }

        match payload.event_type.as_str() {
            "INSERT" => Ok(FeedEvent::inserted(new_row(payload.new)?)),
            "UPDATE" => Ok(FeedEvent::updated(new_row(payload.new)?)),
            "DELETE" => {
                let old = payload
                    .old
                    .ok_or_else(|| SyncError::Decode("delete without old row".into()))?;
                let key: OldKey = serde_json::from_value(old)?;
                Ok(FeedEvent::deleted(key.id))
            }
            other => Err(SyncError::Decode(format!("unknown event type: {}", other))),
        }
    }
}

fn new_row(value: Option<serde_json::Value>) -> Result<Bookmark> {
    let value = value.ok_or_else(|| SyncError::Decode("missing new row".into()))?;
    Ok(serde_json::from_value(value)?)
}
