//! Read-only view over a tracker item's JSON.
//!
//! The tracker payload is loosely shaped: the item may be wrapped in
//! `{"issue": ...}`, history lives under one of several keys, and history
//! entries may be objects, objects with a JSON `content` string, or bare JSON
//! strings. Everything here tolerates those variants and never fails on an
//! odd entry; unreadable entries simply carry no fields.

use chrono::{DateTime, Utc};
use mergeclose_protocol::defaults::FIX_TITLE_PREFIX;
use mergeclose_protocol::time::parse_iso8601;
use mergeclose_protocol::FeedbackMarker;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::gateway::GatewayError;

const HISTORY_KEYS: &[&str] = &["feedback_history", "feedback", "history", "feedback_entries"];
const REVIEW_GATE_EVENTS: &[&str] = &["SESSION_DONE", "OVERFLOW_FIX_CREATED"];
const REVIEW_GATE_STAGE: &str = "REVIEW_GATE";
const REVIEW_GATE_STATUS: &str = "NEEDS_REVIEW";
const REOPEN_EVENTS: &[&str] = &["SESSION_REOPENED", "ISSUE_REOPENED"];
const DEPENDS_ON: &[&str] = &["depends-on", "depends_on"];

#[derive(Debug, Clone, PartialEq)]
pub struct IssueView {
    fields: Map<String, Value>,
}

impl IssueView {
    /// Unwrap a `show_issue` response.
    pub fn from_response(value: Value) -> Result<Self, GatewayError> {
        match value {
            Value::Object(mut map) => {
                if matches!(map.get("issue"), Some(Value::Object(_))) {
                    if let Some(Value::Object(inner)) = map.remove("issue") {
                        return Ok(Self { fields: inner });
                    }
                }
                Ok(Self { fields: map })
            }
            other => Err(GatewayError::InvalidResponse(format!(
                "show_issue payload must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Status, trimmed and lowercased. Empty when absent.
    pub fn status(&self) -> String {
        self.fields
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").and_then(Value::as_str)
    }

    pub fn issue_id(&self) -> Option<&str> {
        self.fields.get("issue_id").and_then(Value::as_str)
    }

    /// Corrective follow-up items are titled `[FIX] ...`.
    pub fn is_fix_child(&self) -> bool {
        self.title().is_some_and(|t| t.starts_with(FIX_TITLE_PREFIX))
    }

    pub fn feedback_history(&self) -> Vec<HistoryEntry> {
        HISTORY_KEYS
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_array))
            .map(|items| items.iter().map(HistoryEntry::from_value).collect())
            .unwrap_or_default()
    }

    /// Parents this item depends on, from the first linkage representation
    /// that yields anything: `linked_parents`, then
    /// `relationships.incoming`, then `links`.
    ///
    /// `fallback_id` stands in for the item's own id when the payload does
    /// not echo `issue_id`.
    pub fn linked_parent_ids(&self, fallback_id: &str) -> Vec<String> {
        let own_id = self.issue_id().unwrap_or(fallback_id);
        let mut ids = self.parents_from_linked_parents();
        if ids.is_empty() {
            ids = self.parents_from_relationships(own_id);
        }
        if ids.is_empty() {
            ids = self.parents_from_links(own_id);
        }
        ids.into_iter().collect()
    }

    fn parents_from_linked_parents(&self) -> BTreeSet<String> {
        self.array("linked_parents")
            .filter_map(|item| item.get("issue_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    fn parents_from_relationships(&self, own_id: &str) -> BTreeSet<String> {
        let incoming = self
            .fields
            .get("relationships")
            .and_then(|r| r.get("incoming"))
            .and_then(Value::as_array);
        match incoming {
            Some(items) => depends_on_sources(items.iter(), own_id, "relationship_type"),
            None => BTreeSet::new(),
        }
    }

    fn parents_from_links(&self, own_id: &str) -> BTreeSet<String> {
        depends_on_sources(self.array("links"), own_id, "type")
    }

    fn array(&self, key: &str) -> impl Iterator<Item = &Value> {
        self.fields
            .get(key)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
    }
}

fn depends_on_sources<'a>(
    relations: impl Iterator<Item = &'a Value>,
    own_id: &str,
    type_key: &str,
) -> BTreeSet<String> {
    relations
        .filter_map(|relation| {
            let from_id = relation.get("from_id")?.as_str()?;
            let to_id = relation.get("to_id")?.as_str()?;
            let kind = relation.get(type_key)?.as_str()?;
            (to_id == own_id && DEPENDS_ON.contains(&kind)).then(|| from_id.to_string())
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One feedback history entry, normalised to an object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryEntry {
    fields: Map<String, Value>,
}

impl HistoryEntry {
    pub fn from_value(value: &Value) -> Self {
        let fields = match value {
            Value::Object(map) => match map.get("content").and_then(Value::as_str) {
                Some(content) => parse_object(content).unwrap_or_else(|| map.clone()),
                None => map.clone(),
            },
            Value::String(raw) => parse_object(raw).unwrap_or_default(),
            _ => Map::new(),
        };
        Self { fields }
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn marker(&self) -> Option<&str> {
        self.str_field("marker")
    }

    pub fn event_type(&self) -> Option<&str> {
        self.str_field("event_type")
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.str_field("timestamp").and_then(|raw| parse_iso8601(raw).ok())
    }

    pub fn has_marker(&self, marker: FeedbackMarker) -> bool {
        self.marker() == Some(marker.as_str())
    }

    /// "Passed review, ready to close."
    pub fn is_review_gate(&self) -> bool {
        self.event_type().is_some_and(|e| REVIEW_GATE_EVENTS.contains(&e))
            && self.str_field("stage") == Some(REVIEW_GATE_STAGE)
            && self.str_field("status") == Some(REVIEW_GATE_STATUS)
    }

    pub fn is_reopen(&self) -> bool {
        self.event_type().is_some_and(|e| REOPEN_EVENTS.contains(&e))
            || self
                .str_field("status")
                .is_some_and(|s| s.trim().eq_ignore_ascii_case("OPEN"))
    }
}

fn parse_object(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Latest timestamp among entries matching `predicate`.
///
/// Compares parsed timestamps, not positions: history order is not
/// guaranteed to be chronological. Entries without a timestamp are ignored.
pub fn latest_timestamp(
    history: &[HistoryEntry],
    predicate: impl Fn(&HistoryEntry) -> bool,
) -> Option<DateTime<Utc>> {
    history
        .iter()
        .filter(|entry| predicate(entry))
        .filter_map(HistoryEntry::timestamp)
        .max()
}
