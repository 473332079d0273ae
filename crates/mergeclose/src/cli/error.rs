//! Helpful error types for CLI commands
//!
//! Every error carries what went wrong, optional context, and suggestions
//! for how to fix it.

use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    pub fn event_file_unreadable(path: &Path, reason: &str) -> Self {
        Self::new(format!("Cannot read event file: {}", path.display()))
            .with_context(reason.to_string())
            .with_suggestions([
                format!("TRY: Check the file exists: ls -la {}", path.display()),
                "TRY: Save the webhook payload with: gh api repos/OWNER/REPO/pulls/N > event.json"
                    .to_string(),
            ])
    }

    pub fn event_not_json(path: &Path, details: &str) -> Self {
        Self::new(format!("Event file is not valid JSON: {}", path.display()))
            .with_context(details.to_string())
            .with_suggestion("TRY: Validate the JSON: python -m json.tool < FILE")
    }

    pub fn event_not_object() -> Self {
        Self::new("Event file must contain a JSON object")
            .with_suggestion("TRY: The file should look like {\"pull_request\": {...}}")
    }

    pub fn workflow_source_in_operator_mode() -> Self {
        Self::new("Operator mode cannot use --source workflow")
            .with_context("The workflow source is reserved for webhook events (--event-file)")
            .with_suggestions(["TRY: Omit --source, or pass --source operator".to_string()])
    }

    pub fn daemon_already_running(pid: u32, lock_path: &Path) -> Self {
        Self::new(format!("Another merge-close daemon is running (pid {})", pid))
            .with_context(format!("Lock file: {}", lock_path.display()))
            .with_suggestions([
                format!("TRY: Stop the running daemon: kill {}", pid),
                "TRY: Check its health: mergeclose health".to_string(),
            ])
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Render a command failure for JSON callers on stdout.
pub fn print_json_error(err: &anyhow::Error) {
    let body = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => serde_json::json!({
            "error": helpful.message,
            "context": helpful.context,
            "suggestions": helpful.suggestions,
        }),
        None => serde_json::json!({ "error": format!("{:#}", err) }),
    };
    println!("{}", body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpful_error_display() {
        let err = HelpfulError::new("Something went wrong")
            .with_context("While closing")
            .with_suggestion("Try again");

        let display = format!("{}", err);
        assert!(display.contains("ERROR: Something went wrong"));
        assert!(display.contains("CONTEXT: While closing"));
        assert!(display.contains("Try again"));
    }

    #[test]
    fn test_daemon_already_running_names_pid() {
        let err = HelpfulError::daemon_already_running(4242, Path::new("/tmp/d.lock"));
        let display = err.to_string();
        assert!(display.contains("pid 4242"));
        assert!(display.contains("/tmp/d.lock"));
    }
}
