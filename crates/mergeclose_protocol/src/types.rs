//! Core merge-close types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Close source
// ============================================================================

/// Who asked for the close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseSource {
    Daemon,
    Workflow,
    Operator,
}

impl CloseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseSource::Daemon => "daemon",
            CloseSource::Workflow => "workflow",
            CloseSource::Operator => "operator",
        }
    }
}

impl fmt::Display for CloseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown close source '{0}' (expected daemon, workflow or operator)")]
pub struct ParseCloseSourceError(pub String);

impl FromStr for CloseSource {
    type Err = ParseCloseSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daemon" => Ok(CloseSource::Daemon),
            "workflow" => Ok(CloseSource::Workflow),
            "operator" => Ok(CloseSource::Operator),
            _ => Err(ParseCloseSourceError(s.to_string())),
        }
    }
}

// ============================================================================
// Close payload / result
// ============================================================================

/// One candidate close, built once per merge event and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClosePayload {
    pub issue_id: String,
    pub pr_url: String,
    pub merge_sha: String,
    /// ISO-8601 UTC
    pub merged_at: String,
    pub merged: bool,
    pub source: CloseSource,
}

/// Audit markers appended to tracker items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackMarker {
    MergeEvidenceRecorded,
    MergeCloseApplied,
    MergeCloseRejected,
    MergeCloseSkippedAlreadyClosed,
    OverflowParentClosedByFix,
}

impl FeedbackMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackMarker::MergeEvidenceRecorded => "MERGE_EVIDENCE_RECORDED",
            FeedbackMarker::MergeCloseApplied => "MERGE_CLOSE_APPLIED",
            FeedbackMarker::MergeCloseRejected => "MERGE_CLOSE_REJECTED",
            FeedbackMarker::MergeCloseSkippedAlreadyClosed => "MERGE_CLOSE_SKIPPED_ALREADY_CLOSED",
            FeedbackMarker::OverflowParentClosedByFix => "OVERFLOW_PARENT_CLOSED_BY_FIX",
        }
    }
}

impl fmt::Display for FeedbackMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one state-machine invocation. Always paired with an audit write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloseResult {
    pub applied: bool,
    pub reason: String,
    pub feedback_marker: FeedbackMarker,
}

impl CloseResult {
    pub const APPLIED_REASON: &'static str = "merge close applied";
    pub const ALREADY_CLOSED_REASON: &'static str = "issue already closed";
    pub const NOT_IN_REVIEW_REASON: &'static str = "close allowed only from needs_review";
    pub const NOT_MERGED_REASON: &'static str = "close requires merged=true precondition";
    pub const MISSING_REVIEW_GATE_REASON: &'static str =
        "missing review-gate marker in feedback history";
    pub const STALE_REVIEW_GATE_REASON: &'static str =
        "review-gate marker is older than last reopen";

    pub fn applied() -> Self {
        Self {
            applied: true,
            reason: Self::APPLIED_REASON.to_string(),
            feedback_marker: FeedbackMarker::MergeCloseApplied,
        }
    }

    pub fn already_closed() -> Self {
        Self {
            applied: false,
            reason: Self::ALREADY_CLOSED_REASON.to_string(),
            feedback_marker: FeedbackMarker::MergeCloseSkippedAlreadyClosed,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            applied: false,
            reason: reason.into(),
            feedback_marker: FeedbackMarker::MergeCloseRejected,
        }
    }

    /// The precondition rejection the daemon treats as a skip rather than a
    /// processed record: the item may still reach review later.
    pub fn is_not_in_review(&self) -> bool {
        !self.applied && self.reason == Self::NOT_IN_REVIEW_REASON
    }
}

/// JSON document appended to a tracker item's feedback history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub issue_id: String,
    pub marker: FeedbackMarker,
    pub merge_sha: String,
    pub merged: bool,
    pub merged_at: String,
    pub pr_url: String,
    pub reason: String,
    pub source: CloseSource,
}

impl AuditEntry {
    pub fn new(
        issue_id: &str,
        marker: FeedbackMarker,
        reason: impl Into<String>,
        payload: &ClosePayload,
    ) -> Self {
        Self {
            issue_id: issue_id.to_string(),
            marker,
            merge_sha: payload.merge_sha.clone(),
            merged: payload.merged,
            merged_at: payload.merged_at.clone(),
            pr_url: payload.pr_url.clone(),
            reason: reason.into(),
            source: payload.source,
        }
    }

    /// Compact JSON with sorted keys, the form stored on the tracker.
    pub fn to_content(&self) -> Result<String, serde_json::Error> {
        // serde_json::Map is ordered, so the round trip sorts the keys.
        let value = serde_json::to_value(self)?;
        serde_json::to_string(&value)
    }
}

// ============================================================================
// Upstream merge records
// ============================================================================

/// A merged change as normalised by the source poller. Built in memory from
/// the GraphQL node (`mergeCommit.oid` becomes `merge_sha`), never read from
/// or written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRecord {
    pub number: u64,
    pub url: String,
    /// ISO-8601 UTC, canonical form
    pub merged_at: String,
    pub body: String,
    pub merge_sha: String,
}

impl MergeRecord {
    /// Webhook-shaped event for this record, or `None` if a required field is
    /// blank.
    pub fn to_event(&self) -> Option<serde_json::Value> {
        if self.url.trim().is_empty()
            || self.merged_at.trim().is_empty()
            || self.merge_sha.trim().is_empty()
        {
            return None;
        }
        Some(serde_json::json!({
            "pull_request": {
                "merged": true,
                "html_url": self.url,
                "merge_commit_sha": self.merge_sha,
                "merged_at": self.merged_at,
                "body": self.body,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ClosePayload {
        ClosePayload {
            issue_id: "i-aa11".to_string(),
            pr_url: "https://github.com/acme/repo/pull/101".to_string(),
            merge_sha: "sha-a".to_string(),
            merged_at: "2026-02-22T12:00:00Z".to_string(),
            merged: true,
            source: CloseSource::Daemon,
        }
    }

    #[test]
    fn test_close_source_parse() {
        assert_eq!("Operator".parse::<CloseSource>().unwrap(), CloseSource::Operator);
        assert!("robot".parse::<CloseSource>().is_err());
    }

    #[test]
    fn test_feedback_marker_serialization() {
        let json = serde_json::to_string(&FeedbackMarker::MergeCloseSkippedAlreadyClosed).unwrap();
        assert_eq!(json, "\"MERGE_CLOSE_SKIPPED_ALREADY_CLOSED\"");
        assert_eq!(
            FeedbackMarker::OverflowParentClosedByFix.as_str(),
            "OVERFLOW_PARENT_CLOSED_BY_FIX"
        );
    }

    #[test]
    fn test_audit_entry_keys_sorted() {
        let entry = AuditEntry::new(
            "i-aa11",
            FeedbackMarker::MergeCloseApplied,
            "merge close applied",
            &payload(),
        );
        let content = entry.to_content().unwrap();
        assert!(content.starts_with("{\"issue_id\":\"i-aa11\",\"marker\":\"MERGE_CLOSE_APPLIED\""));
        assert!(content.ends_with("\"source\":\"daemon\"}"));
    }

    #[test]
    fn test_close_payload_rejects_unknown_fields() {
        let raw = r#"{"issue_id":"i-1","pr_url":"u","merge_sha":"s","merged_at":"t","merged":true,"source":"daemon","extra":1}"#;
        assert!(serde_json::from_str::<ClosePayload>(raw).is_err());
    }

    #[test]
    fn test_not_in_review_detection() {
        assert!(CloseResult::rejected(CloseResult::NOT_IN_REVIEW_REASON).is_not_in_review());
        assert!(!CloseResult::rejected(CloseResult::NOT_MERGED_REASON).is_not_in_review());
        assert!(!CloseResult::applied().is_not_in_review());
    }

    #[test]
    fn test_record_to_event_requires_fields() {
        let mut record = MergeRecord {
            number: 7,
            url: "https://github.com/acme/repo/pull/7".to_string(),
            merged_at: "2026-02-22T12:00:00Z".to_string(),
            body: "Issue: i-1".to_string(),
            merge_sha: "abc".to_string(),
        };
        let event = record.to_event().unwrap();
        assert_eq!(event["pull_request"]["merge_commit_sha"], "abc");

        record.merge_sha = "  ".to_string();
        assert!(record.to_event().is_none());
    }
}
