//! In-process gateway for tests and dry runs.
//!
//! Status updates and feedback are applied to the stored item as well as
//! recorded, so a second close attempt observes the first one's effects.

use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::gateway::{GatewayError, IssueGateway};

#[derive(Debug, Default)]
pub struct InMemoryGateway {
    issues: BTreeMap<String, Value>,
    status_updates: Vec<(String, String)>,
    feedback: Vec<(String, String)>,
    show_calls: Vec<String>,
    failing: BTreeSet<String>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_issue(&mut self, issue_id: &str, issue: Value) {
        self.issues.insert(issue_id.to_string(), issue);
    }

    /// Every subsequent call touching `issue_id` fails with a command error.
    pub fn fail_on(&mut self, issue_id: &str) {
        self.failing.insert(issue_id.to_string());
    }

    pub fn clear_failure(&mut self, issue_id: &str) {
        self.failing.remove(issue_id);
    }

    pub fn issue(&self, issue_id: &str) -> Option<&Value> {
        self.issues.get(issue_id)
    }

    pub fn status_updates(&self) -> &[(String, String)] {
        &self.status_updates
    }

    pub fn feedback(&self) -> &[(String, String)] {
        &self.feedback
    }

    pub fn show_calls(&self) -> &[String] {
        &self.show_calls
    }

    /// Audit markers written to `issue_id`, in order.
    pub fn markers(&self, issue_id: &str) -> Vec<String> {
        self.feedback
            .iter()
            .filter(|(id, _)| id == issue_id)
            .filter_map(|(_, content)| serde_json::from_str::<Value>(content).ok())
            .filter_map(|entry| entry.get("marker").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    fn check(&self, issue_id: &str, command: &str) -> Result<(), GatewayError> {
        if self.failing.contains(issue_id) {
            return Err(GatewayError::Command {
                command: command.to_string(),
                detail: format!("injected failure for {}", issue_id),
            });
        }
        Ok(())
    }

    fn issue_mut(&mut self, issue_id: &str) -> Result<&mut serde_json::Map<String, Value>, GatewayError> {
        let value = self
            .issues
            .get_mut(issue_id)
            .ok_or_else(|| GatewayError::NotFound(issue_id.to_string()))?;
        let wrapped = matches!(value.get("issue"), Some(Value::Object(_)));
        let target = if wrapped { &mut value["issue"] } else { value };
        target
            .as_object_mut()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("{} is not an object", issue_id)))
    }
}

impl IssueGateway for InMemoryGateway {
    fn show_issue(&mut self, issue_id: &str) -> Result<Value, GatewayError> {
        self.show_calls.push(issue_id.to_string());
        self.check(issue_id, "issue show")?;
        self.issues
            .get(issue_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(issue_id.to_string()))
    }

    fn set_issue_status(&mut self, issue_id: &str, status: &str) -> Result<(), GatewayError> {
        self.check(issue_id, "issue update")?;
        self.issue_mut(issue_id)?
            .insert("status".to_string(), Value::String(status.to_string()));
        self.status_updates.push((issue_id.to_string(), status.to_string()));
        Ok(())
    }

    fn add_feedback(&mut self, issue_id: &str, content: &str) -> Result<(), GatewayError> {
        self.check(issue_id, "feedback add")?;
        let issue = self.issue_mut(issue_id)?;
        let entries = issue.entry("feedback").or_insert_with(|| json!([]));
        if let Value::Array(items) = entries {
            items.push(json!({"content": content}));
        }
        self.feedback.push((issue_id.to_string(), content.to_string()));
        Ok(())
    }
}
