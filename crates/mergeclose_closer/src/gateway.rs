//! Tracker gateway interface.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("tracker command failed ({command}): {detail}")]
    Command { command: String, detail: String },

    #[error("tracker command returned non-JSON output: {0}")]
    Parse(String),

    #[error("invalid tracker response: {0}")]
    InvalidResponse(String),

    #[error("issue not found: {0}")]
    NotFound(String),

    #[error("failed to spawn tracker command: {0}")]
    Io(#[from] std::io::Error),
}

/// The three tracker operations the close state machine needs.
///
/// Implementations must not interpret the item; `show_issue` returns the
/// tracker's JSON as-is and [`IssueView`](crate::IssueView) does the reading.
pub trait IssueGateway {
    fn show_issue(&mut self, issue_id: &str) -> Result<Value, GatewayError>;

    fn set_issue_status(&mut self, issue_id: &str, status: &str) -> Result<(), GatewayError>;

    fn add_feedback(&mut self, issue_id: &str, content: &str) -> Result<(), GatewayError>;
}

impl<G: IssueGateway + ?Sized> IssueGateway for &mut G {
    fn show_issue(&mut self, issue_id: &str) -> Result<Value, GatewayError> {
        (**self).show_issue(issue_id)
    }

    fn set_issue_status(&mut self, issue_id: &str, status: &str) -> Result<(), GatewayError> {
        (**self).set_issue_status(issue_id, status)
    }

    fn add_feedback(&mut self, issue_id: &str, content: &str) -> Result<(), GatewayError> {
        (**self).add_feedback(issue_id, content)
    }
}
