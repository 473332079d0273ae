//! End-to-end rules of the close state machine against the in-memory gateway.

use mergeclose_closer::{apply_merge_close, InMemoryGateway};
use mergeclose_protocol::{ClosePayload, CloseResult, CloseSource, FeedbackMarker};
use serde_json::{json, Value};

fn payload(issue_id: &str) -> ClosePayload {
    ClosePayload {
        issue_id: issue_id.to_string(),
        pr_url: "https://github.com/acme/repo/pull/101".to_string(),
        merge_sha: "sha-a".to_string(),
        merged_at: "2026-02-22T12:00:00Z".to_string(),
        merged: true,
        source: CloseSource::Daemon,
    }
}

fn review_gate(ts: &str) -> Value {
    json!({
        "event_type": "SESSION_DONE",
        "stage": "REVIEW_GATE",
        "status": "NEEDS_REVIEW",
        "timestamp": ts
    })
}

fn reviewed_issue() -> Value {
    json!({
        "issue_id": "i-1",
        "status": "needs_review",
        "title": "Ship feature",
        "feedback": [review_gate("2026-02-22T10:00:00Z")]
    })
}

#[test]
fn test_happy_path_closes_and_records_evidence() {
    let mut gateway = InMemoryGateway::new();
    gateway.insert_issue("i-1", reviewed_issue());

    let result = apply_merge_close(&mut gateway, &payload("i-1")).unwrap();

    assert_eq!(result, CloseResult::applied());
    assert_eq!(
        gateway.status_updates(),
        &[("i-1".to_string(), "closed".to_string())]
    );
    assert_eq!(
        gateway.markers("i-1"),
        vec![
            FeedbackMarker::MergeEvidenceRecorded.to_string(),
            FeedbackMarker::MergeCloseApplied.to_string(),
        ]
    );

    let (_, content) = &gateway.feedback()[1];
    let entry: Value = serde_json::from_str(content).unwrap();
    assert_eq!(entry["pr_url"], "https://github.com/acme/repo/pull/101");
    assert_eq!(entry["merge_sha"], "sha-a");
    assert_eq!(entry["source"], "daemon");
    assert_eq!(entry["reason"], "merge close applied");
}

#[test]
fn test_second_attempt_is_idempotent_skip() {
    let mut gateway = InMemoryGateway::new();
    gateway.insert_issue("i-1", reviewed_issue());

    apply_merge_close(&mut gateway, &payload("i-1")).unwrap();
    let second = apply_merge_close(&mut gateway, &payload("i-1")).unwrap();

    assert_eq!(second, CloseResult::already_closed());
    // No new status transition, no duplicate applied marker.
    assert_eq!(gateway.status_updates().len(), 1);
    assert_eq!(
        gateway.markers("i-1"),
        vec![
            "MERGE_EVIDENCE_RECORDED".to_string(),
            "MERGE_CLOSE_APPLIED".to_string(),
            "MERGE_CLOSE_SKIPPED_ALREADY_CLOSED".to_string(),
        ]
    );
}

#[test]
fn test_closed_without_marker_is_backfilled() {
    let mut gateway = InMemoryGateway::new();
    gateway.insert_issue("i-1", json!({"issue": {"status": "Closed", "feedback": []}}));

    let result = apply_merge_close(&mut gateway, &payload("i-1")).unwrap();

    assert!(!result.applied);
    assert_eq!(result.reason, CloseResult::ALREADY_CLOSED_REASON);
    assert!(gateway.status_updates().is_empty());
    assert_eq!(
        gateway.markers("i-1"),
        vec![
            "MERGE_CLOSE_APPLIED".to_string(),
            "MERGE_CLOSE_SKIPPED_ALREADY_CLOSED".to_string(),
        ]
    );
}

#[test]
fn test_not_in_review_rejects() {
    let mut gateway = InMemoryGateway::new();
    gateway.insert_issue("i-1", json!({"status": "in_progress"}));

    let result = apply_merge_close(&mut gateway, &payload("i-1")).unwrap();

    assert!(result.is_not_in_review());
    assert_eq!(result.feedback_marker, FeedbackMarker::MergeCloseRejected);
    assert_eq!(gateway.markers("i-1"), vec!["MERGE_CLOSE_REJECTED".to_string()]);
    assert!(gateway.status_updates().is_empty());
}

#[test]
fn test_missing_review_gate_rejects() {
    let mut gateway = InMemoryGateway::new();
    gateway.insert_issue(
        "i-1",
        json!({
            "status": "needs_review",
            "feedback": [{"event_type": "SESSION_DONE", "stage": "IMPLEMENT", "status": "NEEDS_REVIEW", "timestamp": "2026-02-22T10:00:00Z"}]
        }),
    );

    let result = apply_merge_close(&mut gateway, &payload("i-1")).unwrap();
    assert_eq!(result.reason, CloseResult::MISSING_REVIEW_GATE_REASON);
}

#[test]
fn test_reopen_after_gate_rejects_and_newer_gate_accepts() {
    let mut gateway = InMemoryGateway::new();
    gateway.insert_issue(
        "i-stale",
        json!({
            "status": "needs_review",
            "feedback_history": [
                review_gate("2026-02-22T10:00:00Z"),
                {"content": "{\"event_type\": \"SESSION_REOPENED\", \"timestamp\": \"2026-02-22T11:00:00Z\"}"}
            ]
        }),
    );
    gateway.insert_issue(
        "i-fresh",
        json!({
            "status": "needs_review",
            "feedback_history": [
                review_gate("2026-02-22T12:00:00Z"),
                {"status": "open", "timestamp": "2026-02-22T11:00:00Z"},
                review_gate("2026-02-22T10:00:00Z")
            ]
        }),
    );

    let stale = apply_merge_close(&mut gateway, &payload("i-stale")).unwrap();
    assert_eq!(stale.reason, CloseResult::STALE_REVIEW_GATE_REASON);

    let fresh = apply_merge_close(&mut gateway, &payload("i-fresh")).unwrap();
    assert!(fresh.applied);
}

#[test]
fn test_fix_child_closes_parents_in_review() {
    let mut gateway = InMemoryGateway::new();
    gateway.insert_issue(
        "i-child",
        json!({
            "issue_id": "i-child",
            "status": "needs_review",
            "title": "[FIX] overflow follow-up",
            "feedback": [review_gate("2026-02-22T10:00:00Z")],
            "linked_parents": [{"issue_id": "i-parent-b"}, {"issue_id": "i-parent-a"}, {"issue_id": "i-parent-a"}]
        }),
    );
    gateway.insert_issue("i-parent-a", json!({"status": "needs_review"}));
    gateway.insert_issue("i-parent-b", json!({"status": "in_progress"}));

    let result = apply_merge_close(&mut gateway, &payload("i-child")).unwrap();

    assert!(result.applied);
    assert_eq!(
        gateway.status_updates(),
        &[
            ("i-child".to_string(), "closed".to_string()),
            ("i-parent-a".to_string(), "closed".to_string()),
        ]
    );
    assert_eq!(
        gateway.markers("i-parent-a"),
        vec!["OVERFLOW_PARENT_CLOSED_BY_FIX".to_string()]
    );
    assert!(gateway.markers("i-parent-b").is_empty());

    let (_, content) = gateway
        .feedback()
        .iter()
        .find(|(id, _)| id == "i-parent-a")
        .unwrap();
    let entry: Value = serde_json::from_str(content).unwrap();
    assert_eq!(entry["reason"], "closed by fix child i-child");
    assert_eq!(entry["issue_id"], "i-parent-a");
}

#[test]
fn test_fix_child_cascades_through_incoming_relationships() {
    let mut gateway = InMemoryGateway::new();
    gateway.insert_issue(
        "i-child",
        json!({
            "issue_id": "i-child",
            "status": "needs_review",
            "title": "[FIX] overflow follow-up",
            "feedback": [review_gate("2026-02-22T10:00:00Z")],
            "relationships": {"incoming": [
                {"from_id": "i-parent", "to_id": "i-child", "relationship_type": "depends-on"},
                {"from_id": "i-blocker", "to_id": "i-child", "relationship_type": "blocks"},
                {"from_id": "i-elsewhere", "to_id": "i-other", "relationship_type": "depends-on"}
            ]}
        }),
    );
    gateway.insert_issue("i-parent", json!({"status": "needs_review"}));
    gateway.insert_issue("i-blocker", json!({"status": "needs_review"}));
    gateway.insert_issue("i-elsewhere", json!({"status": "needs_review"}));

    let result = apply_merge_close(&mut gateway, &payload("i-child")).unwrap();

    assert!(result.applied);
    assert_eq!(
        gateway.status_updates(),
        &[
            ("i-child".to_string(), "closed".to_string()),
            ("i-parent".to_string(), "closed".to_string()),
        ]
    );
    assert_eq!(
        gateway.markers("i-parent"),
        vec!["OVERFLOW_PARENT_CLOSED_BY_FIX".to_string()]
    );
    assert!(gateway.markers("i-blocker").is_empty());
    assert!(gateway.markers("i-elsewhere").is_empty());
}

#[test]
fn test_fix_child_cascades_through_links_without_echoed_id() {
    // No `issue_id` field: links are matched against the requested id.
    let mut gateway = InMemoryGateway::new();
    gateway.insert_issue(
        "i-child",
        json!({
            "status": "needs_review",
            "title": "[FIX] overflow follow-up",
            "feedback": [review_gate("2026-02-22T10:00:00Z")],
            "links": [
                {"from_id": "i-parent", "to_id": "i-child", "type": "depends_on"},
                {"from_id": "i-parent", "to_id": "i-child", "type": "depends-on"},
                {"from_id": "i-sibling", "to_id": "i-parent", "type": "depends_on"}
            ]
        }),
    );
    gateway.insert_issue("i-parent", json!({"status": "needs_review"}));
    gateway.insert_issue("i-sibling", json!({"status": "needs_review"}));

    let result = apply_merge_close(&mut gateway, &payload("i-child")).unwrap();

    assert!(result.applied);
    assert_eq!(
        gateway.status_updates(),
        &[
            ("i-child".to_string(), "closed".to_string()),
            ("i-parent".to_string(), "closed".to_string()),
        ]
    );
    let (_, content) = gateway
        .feedback()
        .iter()
        .find(|(id, _)| id == "i-parent")
        .unwrap();
    let entry: Value = serde_json::from_str(content).unwrap();
    assert_eq!(entry["reason"], "closed by fix child i-child");
    assert!(!gateway.show_calls().iter().any(|id| id == "i-sibling"));
}

#[test]
fn test_non_fix_child_does_not_cascade() {
    let mut gateway = InMemoryGateway::new();
    let mut issue = reviewed_issue();
    issue["linked_parents"] = json!([{"issue_id": "i-parent"}]);
    gateway.insert_issue("i-1", issue);
    gateway.insert_issue("i-parent", json!({"status": "needs_review"}));

    apply_merge_close(&mut gateway, &payload("i-1")).unwrap();

    assert_eq!(gateway.status_updates().len(), 1);
    assert!(!gateway.show_calls().iter().any(|id| id == "i-parent"));
}

#[test]
fn test_gateway_failure_mid_transition_propagates() {
    let mut gateway = InMemoryGateway::new();
    gateway.insert_issue(
        "i-child",
        json!({
            "status": "needs_review",
            "title": "[FIX] follow-up",
            "feedback": [review_gate("2026-02-22T10:00:00Z")],
            "linked_parents": [{"issue_id": "i-parent"}]
        }),
    );
    gateway.insert_issue("i-parent", json!({"status": "needs_review"}));
    gateway.fail_on("i-parent");

    assert!(apply_merge_close(&mut gateway, &payload("i-child")).is_err());
    // The child transition already happened and is not rolled back.
    assert_eq!(gateway.status_updates().len(), 1);
}
