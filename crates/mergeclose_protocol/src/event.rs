//! Merge event → [`ClosePayload`] construction.
//!
//! Validation failures here are permanent for the record in question: the
//! caller logs and skips, it never retries.

use crate::types::{ClosePayload, CloseSource};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("missing canonical Issue line in PR body")]
    MissingIssueLine,

    #[error("multiple Issue lines found in PR body")]
    DuplicateIssueLine,

    #[error("{0} must be an object")]
    NotAnObject(&'static str),

    #[error("pull_request.merged must be true")]
    NotMerged,

    #[error("{0} must be a non-empty string")]
    MissingField(&'static str),

    #[error("invalid issue line pattern: {0}")]
    Pattern(String),
}

const ISSUE_LINE_PATTERN: &str = r"(?m)^Issue:[ \t]*([A-Za-z0-9][A-Za-z0-9._-]*)[ \t]*\r?$";

fn compile_pattern(pattern: &str) -> Result<Regex, PayloadError> {
    Regex::new(pattern).map_err(|e| PayloadError::Pattern(e.to_string()))
}

/// Compiled once; a compile failure is cached and returned to every caller.
fn issue_line_regex() -> Result<&'static Regex, PayloadError> {
    static RE: OnceLock<Result<Regex, PayloadError>> = OnceLock::new();
    RE.get_or_init(|| compile_pattern(ISSUE_LINE_PATTERN))
        .as_ref()
        .map_err(Clone::clone)
}

/// Extract the tracker item id from a PR body.
///
/// The body must carry exactly one `Issue: <id>` line.
pub fn extract_issue_id(body: &str) -> Result<String, PayloadError> {
    let mut matches = issue_line_regex()?
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()));
    match (matches.next(), matches.next()) {
        (Some(id), None) => Ok(id),
        (None, _) => Err(PayloadError::MissingIssueLine),
        (Some(_), Some(_)) => Err(PayloadError::DuplicateIssueLine),
    }
}

/// Build a payload from a webhook-style `{"pull_request": {...}}` event.
pub fn build_payload_from_event(
    event: &Value,
    source: CloseSource,
) -> Result<ClosePayload, PayloadError> {
    let pull_request = event
        .get("pull_request")
        .and_then(Value::as_object)
        .ok_or(PayloadError::NotAnObject("pull_request"))?;

    if pull_request.get("merged") != Some(&Value::Bool(true)) {
        return Err(PayloadError::NotMerged);
    }

    let body = pull_request
        .get("body")
        .and_then(Value::as_str)
        .unwrap_or("");
    let issue_id = extract_issue_id(body)?;

    let required = |key: &str, field: &'static str| -> Result<String, PayloadError> {
        match pull_request.get(key).and_then(Value::as_str) {
            Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
            _ => Err(PayloadError::MissingField(field)),
        }
    };

    Ok(ClosePayload {
        issue_id,
        pr_url: required("html_url", "pull_request.html_url")?,
        merge_sha: required("merge_commit_sha", "pull_request.merge_commit_sha")?,
        merged_at: required("merged_at", "pull_request.merged_at")?,
        merged: true,
        source,
    })
}

/// Payload for the operator fallback path, where a human supplies the merge
/// metadata directly. Fields are trimmed; blanks are rejected.
pub fn build_operator_payload(
    issue_id: &str,
    pr_url: &str,
    merge_sha: &str,
    merged_at: &str,
    source: CloseSource,
) -> Result<ClosePayload, PayloadError> {
    let field = |value: &str, name: &'static str| -> Result<String, PayloadError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Err(PayloadError::MissingField(name))
        } else {
            Ok(trimmed.to_string())
        }
    };
    Ok(ClosePayload {
        issue_id: field(issue_id, "issue_id")?,
        pr_url: field(pr_url, "pr_url")?,
        merge_sha: field(merge_sha, "merge_sha")?,
        merged_at: field(merged_at, "merged_at")?,
        merged: true,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(body: &str) -> Value {
        json!({
            "pull_request": {
                "merged": true,
                "html_url": "https://github.com/acme/repo/pull/101",
                "merge_commit_sha": "sha-a",
                "merged_at": "2026-02-22T12:00:00Z",
                "body": body,
            }
        })
    }

    #[test]
    fn test_issue_line_pattern_compiles() {
        assert!(issue_line_regex().is_ok());
    }

    #[test]
    fn test_bad_pattern_is_an_error_not_a_panic() {
        match compile_pattern(r"(?m)^Issue:(") {
            Err(PayloadError::Pattern(message)) => assert!(!message.is_empty()),
            other => panic!("expected pattern error, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_single_canonical_line() {
        let body = "Fixes a thing.\n\nIssue: i-aa11\n";
        assert_eq!(extract_issue_id(body).unwrap(), "i-aa11");
    }

    #[test]
    fn test_extract_tolerates_crlf() {
        assert_eq!(extract_issue_id("Summary\r\nIssue: i-bb22\r\n").unwrap(), "i-bb22");
    }

    #[test]
    fn test_extract_rejects_missing_and_duplicate() {
        assert_eq!(extract_issue_id("no marker"), Err(PayloadError::MissingIssueLine));
        assert_eq!(
            extract_issue_id("Issue: i-1\nIssue: i-2\n"),
            Err(PayloadError::DuplicateIssueLine)
        );
    }

    #[test]
    fn test_extract_rejects_malformed_line() {
        assert_eq!(
            extract_issue_id("Issue: i-1 and more words"),
            Err(PayloadError::MissingIssueLine)
        );
        assert_eq!(extract_issue_id("  Issue: i-1"), Err(PayloadError::MissingIssueLine));
    }

    #[test]
    fn test_build_payload_from_event() {
        let payload = build_payload_from_event(&event("Issue: i-aa11"), CloseSource::Workflow).unwrap();
        assert_eq!(payload.issue_id, "i-aa11");
        assert_eq!(payload.merge_sha, "sha-a");
        assert!(payload.merged);
        assert_eq!(payload.source, CloseSource::Workflow);
    }

    #[test]
    fn test_build_payload_requires_merged() {
        let mut raw = event("Issue: i-aa11");
        raw["pull_request"]["merged"] = json!(false);
        assert_eq!(
            build_payload_from_event(&raw, CloseSource::Workflow),
            Err(PayloadError::NotMerged)
        );
    }

    #[test]
    fn test_build_payload_requires_fields() {
        let mut raw = event("Issue: i-aa11");
        raw["pull_request"]["merge_commit_sha"] = json!("");
        assert_eq!(
            build_payload_from_event(&raw, CloseSource::Daemon),
            Err(PayloadError::MissingField("pull_request.merge_commit_sha"))
        );
        assert_eq!(
            build_payload_from_event(&json!({"pull_request": []}), CloseSource::Daemon),
            Err(PayloadError::NotAnObject("pull_request"))
        );
    }

    #[test]
    fn test_operator_payload_trims() {
        let payload = build_operator_payload(
            " i-aa11 ",
            "https://github.com/acme/repo/pull/1 ",
            " sha ",
            "2026-02-22T12:00:00Z",
            CloseSource::Operator,
        )
        .unwrap();
        assert_eq!(payload.issue_id, "i-aa11");
        assert_eq!(payload.merge_sha, "sha");
        assert!(build_operator_payload("", "u", "s", "t", CloseSource::Operator).is_err());
    }
}
