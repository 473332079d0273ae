//! The close transition and its audit trail.

use mergeclose_protocol::defaults::{CLOSED_STATUS, REVIEW_STATUS};
use mergeclose_protocol::{AuditEntry, ClosePayload, CloseResult, FeedbackMarker};
use tracing::{debug, info, warn};

use crate::gateway::{GatewayError, IssueGateway};
use crate::issue::{latest_timestamp, HistoryEntry, IssueView};

const BACKFILL_REASON: &str = "backfill merge-close marker for already closed issue";
const EVIDENCE_REASON: &str = "merge evidence recorded";

/// Decide whether `payload.issue_id` may be closed and apply the outcome.
///
/// Rules, first match wins:
/// 1. already closed: backfill `MERGE_CLOSE_APPLIED` if missing, then record
///    the skip;
/// 2. not in `needs_review`: reject;
/// 3. `merged` is false: reject;
/// 4. no review-gate entry with a parseable timestamp: reject;
/// 5. a reopen at or after the latest review gate: reject.
///
/// Otherwise the merge evidence is recorded, the item is closed, and, for a
/// `[FIX]` item, every linked parent still in `needs_review` is closed too.
///
/// Every outcome writes at least one audit entry. Gateway failures abort the
/// transition and propagate; nothing is rolled back.
pub fn apply_merge_close<G: IssueGateway + ?Sized>(
    gateway: &mut G,
    payload: &ClosePayload,
) -> Result<CloseResult, GatewayError> {
    let issue_id = payload.issue_id.as_str();
    let issue = IssueView::from_response(gateway.show_issue(issue_id)?)?;
    let status = issue.status();
    let history = issue.feedback_history();

    if status == CLOSED_STATUS {
        let has_applied = history
            .iter()
            .any(|entry| entry.has_marker(FeedbackMarker::MergeCloseApplied));
        if !has_applied {
            debug!(issue_id, "backfilling merge-close marker");
            append_audit(
                gateway,
                issue_id,
                FeedbackMarker::MergeCloseApplied,
                BACKFILL_REASON,
                payload,
            )?;
        }
        let result = CloseResult::already_closed();
        append_audit(gateway, issue_id, result.feedback_marker, &result.reason, payload)?;
        info!(issue_id, "issue already closed");
        return Ok(result);
    }

    if let Some(reason) = precondition_failure(&status, payload, &history) {
        return reject(gateway, issue_id, payload, reason);
    }

    append_audit(
        gateway,
        issue_id,
        FeedbackMarker::MergeEvidenceRecorded,
        EVIDENCE_REASON,
        payload,
    )?;
    gateway.set_issue_status(issue_id, CLOSED_STATUS)?;
    let result = CloseResult::applied();
    append_audit(gateway, issue_id, result.feedback_marker, &result.reason, payload)?;
    info!(issue_id, pr_url = %payload.pr_url, merge_sha = %payload.merge_sha, "merge close applied");

    if issue.is_fix_child() {
        close_fix_parents(gateway, &issue, payload)?;
    }

    Ok(result)
}

fn precondition_failure(
    status: &str,
    payload: &ClosePayload,
    history: &[HistoryEntry],
) -> Option<&'static str> {
    if status != REVIEW_STATUS {
        return Some(CloseResult::NOT_IN_REVIEW_REASON);
    }
    if !payload.merged {
        return Some(CloseResult::NOT_MERGED_REASON);
    }
    let gate_at = match latest_timestamp(history, HistoryEntry::is_review_gate) {
        Some(ts) => ts,
        None => return Some(CloseResult::MISSING_REVIEW_GATE_REASON),
    };
    match latest_timestamp(history, HistoryEntry::is_reopen) {
        Some(reopen_at) if gate_at <= reopen_at => Some(CloseResult::STALE_REVIEW_GATE_REASON),
        _ => None,
    }
}

fn close_fix_parents<G: IssueGateway + ?Sized>(
    gateway: &mut G,
    child: &IssueView,
    payload: &ClosePayload,
) -> Result<(), GatewayError> {
    let child_id = payload.issue_id.as_str();
    let reason = format!("closed by fix child {}", child_id);
    for parent_id in child.linked_parent_ids(child_id) {
        let parent = IssueView::from_response(gateway.show_issue(&parent_id)?)?;
        if parent.status() != REVIEW_STATUS {
            debug!(parent_id = %parent_id, status = %parent.status(), "parent not in review; left open");
            continue;
        }
        gateway.set_issue_status(&parent_id, CLOSED_STATUS)?;
        append_audit(
            gateway,
            &parent_id,
            FeedbackMarker::OverflowParentClosedByFix,
            &reason,
            payload,
        )?;
        info!(parent_id = %parent_id, child_id, "overflow parent closed by fix");
    }
    Ok(())
}

fn reject<G: IssueGateway + ?Sized>(
    gateway: &mut G,
    issue_id: &str,
    payload: &ClosePayload,
    reason: &str,
) -> Result<CloseResult, GatewayError> {
    let result = CloseResult::rejected(reason);
    append_audit(gateway, issue_id, result.feedback_marker, &result.reason, payload)?;
    warn!(issue_id, reason, "merge close rejected");
    Ok(result)
}

fn append_audit<G: IssueGateway + ?Sized>(
    gateway: &mut G,
    issue_id: &str,
    marker: FeedbackMarker,
    reason: &str,
    payload: &ClosePayload,
) -> Result<(), GatewayError> {
    let content = AuditEntry::new(issue_id, marker, reason, payload)
        .to_content()
        .map_err(|e| GatewayError::InvalidResponse(format!("failed to encode audit entry: {}", e)))?;
    gateway.add_feedback(issue_id, &content)
}
