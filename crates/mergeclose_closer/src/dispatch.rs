//! Event-level entry points around [`apply_merge_close`].

use mergeclose_protocol::{build_payload_from_event, ClosePayload, CloseResult, CloseSource};
use serde::Serialize;
use serde_json::Value;

use crate::closer::apply_merge_close;
use crate::gateway::{GatewayError, IssueGateway};

pub const DRY_RUN_REASON: &str = "dry-run: merge closer invocation skipped";
pub const INVOKED_REASON: &str = "merge closer invoked";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub invoked: bool,
    pub reason: String,
    pub payload: Option<ClosePayload>,
    pub result: Option<CloseResult>,
}

impl DispatchOutcome {
    /// The plan for `payload` without touching the tracker.
    pub fn dry_run(payload: ClosePayload) -> Self {
        Self::not_invoked(DRY_RUN_REASON, Some(payload))
    }

    fn not_invoked(reason: impl Into<String>, payload: Option<ClosePayload>) -> Self {
        Self {
            invoked: false,
            reason: reason.into(),
            payload,
            result: None,
        }
    }
}

/// Validate an event and report the payload that would be dispatched.
/// Touches no tracker.
pub fn preview_from_event(event: &Value, source: CloseSource) -> DispatchOutcome {
    match build_payload_from_event(event, source) {
        Ok(payload) => DispatchOutcome::dry_run(payload),
        Err(err) => DispatchOutcome::not_invoked(err.to_string(), None),
    }
}

/// Run the state machine for an already validated payload.
///
/// Gateway failures are errors; the caller decides whether to retry.
pub fn dispatch_merge_close<G: IssueGateway + ?Sized>(
    gateway: &mut G,
    payload: ClosePayload,
) -> Result<DispatchOutcome, GatewayError> {
    let result = apply_merge_close(gateway, &payload)?;
    Ok(DispatchOutcome {
        invoked: true,
        reason: INVOKED_REASON.to_string(),
        payload: Some(payload),
        result: Some(result),
    })
}
