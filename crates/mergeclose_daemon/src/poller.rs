//! Source poller: merged pull requests newer than a timestamp.
//!
//! [`GhCliPoller`] drives the GitHub CLI. Pages come back most recently
//! updated first, not in merge order, so by default every page is walked. The
//! poller normalises each node into a [`MergeRecord`], drops incomplete
//! ones, and returns everything at or after `since` sorted by
//! `(mergedAt, number)`. Transport failures are returned, not retried.

use chrono::{DateTime, Utc};
use mergeclose_protocol::defaults::{DEFAULT_GH_BIN, DEFAULT_PAGE_SIZE};
use mergeclose_protocol::process::{CommandRunner, SystemCommandRunner};
use mergeclose_protocol::time::{format_iso8601, parse_iso8601};
use mergeclose_protocol::MergeRecord;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::config::PaginationMode;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("gh command failed{}: {message}", .exit_code.map(|c| format!(" (exit {})", c)).unwrap_or_default())]
    Command {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("unexpected gh response: {0}")]
    Parse(String),

    #[error("invalid repository slug: '{0}'")]
    InvalidRepoSlug(String),

    #[error("failed to run gh: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that can list merged changes since a timestamp.
pub trait MergeSource {
    fn fetch(&mut self, since: DateTime<Utc>) -> Result<Vec<MergeRecord>, FetchError>;
}

impl<S: MergeSource + ?Sized> MergeSource for &mut S {
    fn fetch(&mut self, since: DateTime<Utc>) -> Result<Vec<MergeRecord>, FetchError> {
        (**self).fetch(since)
    }
}

const MERGED_PRS_QUERY: &str = "query($owner: String!, $name: String!, $first: Int!, $after: String) { \
repository(owner: $owner, name: $name) { \
pullRequests(states: MERGED, first: $first, after: $after, orderBy: {field: UPDATED_AT, direction: DESC}) { \
nodes { number url mergedAt body mergeCommit { oid } } \
pageInfo { hasNextPage endCursor } } } }";

/// One parsed page of the merged-PR listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Complete records at or after `since`, in page order.
    pub records: Vec<MergeRecord>,
    /// The scan stopped at a record merged before `since`.
    pub reached_older: bool,
    /// Cursor for the next page, if the API reports one.
    pub next_cursor: Option<String>,
}

fn shape(msg: &str) -> FetchError {
    FetchError::Parse(msg.to_string())
}

/// Parse a `gh api graphql` response.
///
/// In [`PaginationMode::Watermark`] the scan stops at the first record older
/// than `since`; in [`PaginationMode::Exhaustive`] older records are only
/// filtered out.
pub fn parse_page(
    payload: &Value,
    since: DateTime<Utc>,
    mode: PaginationMode,
) -> Result<Page, FetchError> {
    let pull_requests = payload
        .get("data")
        .ok_or_else(|| shape("response missing data"))?
        .get("repository")
        .filter(|v| v.is_object())
        .ok_or_else(|| shape("response missing repository"))?
        .get("pullRequests")
        .filter(|v| v.is_object())
        .ok_or_else(|| shape("response missing pullRequests"))?;
    let nodes = pull_requests
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| shape("response missing pull request nodes"))?;

    let mut records = Vec::new();
    let mut reached_older = false;
    for node in nodes {
        let merged_at = match node
            .get("mergedAt")
            .and_then(Value::as_str)
            .and_then(|raw| parse_iso8601(raw).ok())
        {
            Some(ts) => ts,
            None => continue,
        };
        if merged_at < since {
            if mode == PaginationMode::Watermark {
                reached_older = true;
                break;
            }
            continue;
        }
        if let Some(record) = normalize_node(node, merged_at) {
            records.push(record);
        } else {
            debug!(node = %node, "dropping incomplete merge record");
        }
    }

    let page_info = pull_requests.get("pageInfo");
    let has_next = page_info
        .and_then(|p| p.get("hasNextPage"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let next_cursor = page_info
        .and_then(|p| p.get("endCursor"))
        .and_then(Value::as_str)
        .filter(|c| has_next && !c.is_empty())
        .map(str::to_string);

    Ok(Page {
        records,
        reached_older,
        next_cursor,
    })
}

fn non_empty_str<'a>(node: &'a Value, key: &str) -> Option<&'a str> {
    node.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn normalize_node(node: &Value, merged_at: DateTime<Utc>) -> Option<MergeRecord> {
    let number = node.get("number")?.as_u64()?;
    let url = non_empty_str(node, "url")?;
    let merge_sha = node
        .get("mergeCommit")
        .and_then(|c| non_empty_str(c, "oid"))?;
    let body = node.get("body").and_then(Value::as_str).unwrap_or("");
    Some(MergeRecord {
        number,
        url: url.to_string(),
        merged_at: format_iso8601(merged_at),
        body: body.to_string(),
        merge_sha: merge_sha.to_string(),
    })
}

/// Ascending `(mergedAt, number)`. Canonical timestamps sort lexically.
pub fn sort_records(records: &mut [MergeRecord]) {
    records.sort_by(|a, b| {
        a.merged_at
            .cmp(&b.merged_at)
            .then_with(|| a.number.cmp(&b.number))
    });
}

pub struct GhCliPoller<R: CommandRunner = SystemCommandRunner> {
    repo_dir: PathBuf,
    gh_bin: String,
    page_size: u32,
    pagination: PaginationMode,
    runner: R,
    repo_slug: Option<(String, String)>,
}

impl GhCliPoller<SystemCommandRunner> {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self::with_runner(repo_dir, SystemCommandRunner)
    }
}

impl<R: CommandRunner> GhCliPoller<R> {
    pub fn with_runner(repo_dir: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            gh_bin: DEFAULT_GH_BIN.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            pagination: PaginationMode::default(),
            runner,
            repo_slug: None,
        }
    }

    pub fn gh_bin(mut self, bin: impl Into<String>) -> Self {
        self.gh_bin = bin.into();
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn pagination(mut self, mode: PaginationMode) -> Self {
        self.pagination = mode;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn run_json(&mut self, args: Vec<String>) -> Result<Value, FetchError> {
        let output = self.runner.run(&self.gh_bin, &args, &self.repo_dir)?;
        if !output.is_success() {
            return Err(FetchError::Command {
                message: output.failure_detail(),
                exit_code: output.exit_code,
            });
        }
        serde_json::from_str(&output.stdout)
            .map_err(|e| FetchError::Parse(format!("gh returned non-JSON output: {}", e)))
    }

    /// `(owner, name)` of the repository at `repo_dir`, resolved once.
    fn resolve_repo(&mut self) -> Result<(String, String), FetchError> {
        if let Some(slug) = &self.repo_slug {
            return Ok(slug.clone());
        }
        let args = ["repo", "view", "--json", "nameWithOwner"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let payload = self.run_json(args)?;
        let slug = payload
            .get("nameWithOwner")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| shape("gh repo view missing nameWithOwner"))?;
        let parsed = split_repo_slug(slug)?;
        self.repo_slug = Some(parsed.clone());
        Ok(parsed)
    }

    fn graphql_args(&self, owner: &str, name: &str, cursor: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "api".to_string(),
            "graphql".to_string(),
            "-f".to_string(),
            format!("query={}", MERGED_PRS_QUERY),
            "-F".to_string(),
            format!("owner={}", owner),
            "-F".to_string(),
            format!("name={}", name),
            "-F".to_string(),
            format!("first={}", self.page_size),
        ];
        if let Some(cursor) = cursor {
            args.push("-F".to_string());
            args.push(format!("after={}", cursor));
        }
        args
    }
}

impl<R: CommandRunner> MergeSource for GhCliPoller<R> {
    fn fetch(&mut self, since: DateTime<Utc>) -> Result<Vec<MergeRecord>, FetchError> {
        let (owner, name) = self.resolve_repo()?;
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;
        loop {
            let args = self.graphql_args(&owner, &name, cursor.as_deref());
            let payload = self.run_json(args)?;
            let page = parse_page(&payload, since, self.pagination)?;
            pages += 1;
            records.extend(page.records);
            if page.reached_older {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        sort_records(&mut records);
        debug!(pages, records = records.len(), since = %format_iso8601(since), "fetched merged pull requests");
        Ok(records)
    }
}

fn split_repo_slug(slug: &str) -> Result<(String, String), FetchError> {
    match slug.trim().split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(FetchError::InvalidRepoSlug(slug.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergeclose_protocol::process::CommandOutput;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::io;
    use std::path::Path;

    struct ScriptedRunner {
        responses: VecDeque<CommandOutput>,
        calls: Vec<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(responses: Vec<CommandOutput>) -> Self {
            Self {
                responses: responses.into(),
                calls: Vec::new(),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&mut self, _program: &str, args: &[String], _cwd: &Path) -> io::Result<CommandOutput> {
            self.calls.push(args.to_vec());
            self.responses
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no scripted response"))
        }
    }

    fn node(number: u64, merged_at: &str) -> Value {
        json!({
            "number": number,
            "url": format!("https://github.com/acme/repo/pull/{}", number),
            "mergedAt": merged_at,
            "body": format!("Issue: i-{}", number),
            "mergeCommit": {"oid": format!("sha-{}", number)}
        })
    }

    fn page(nodes: Vec<Value>, next: Option<&str>) -> Value {
        json!({"data": {"repository": {"pullRequests": {
            "nodes": nodes,
            "pageInfo": {"hasNextPage": next.is_some(), "endCursor": next}
        }}}})
    }

    fn ts(raw: &str) -> DateTime<Utc> {
        parse_iso8601(raw).unwrap()
    }

    #[test]
    fn test_parse_page_drops_incomplete_records() {
        let mut incomplete = node(3, "2026-02-22T12:00:00Z");
        incomplete["mergeCommit"] = json!(null);
        let payload = page(
            vec![
                node(1, "2026-02-22T12:00:00+00:00"),
                incomplete,
                json!({"number": 4, "mergedAt": null}),
                json!({"number": "5", "url": "u", "mergedAt": "2026-02-22T12:00:00Z", "mergeCommit": {"oid": "x"}}),
            ],
            None,
        );
        let parsed = parse_page(&payload, ts("2026-02-01T00:00:00Z"), PaginationMode::Watermark).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].merged_at, "2026-02-22T12:00:00Z");
        assert_eq!(parsed.records[0].merge_sha, "sha-1");
        assert!(!parsed.reached_older);
        assert_eq!(parsed.next_cursor, None);
    }

    #[test]
    fn test_parse_page_watermark_stops_at_older() {
        let payload = page(
            vec![
                node(3, "2026-02-22T12:00:00Z"),
                node(2, "2026-02-20T12:00:00Z"),
                node(1, "2026-02-22T13:00:00Z"),
            ],
            Some("c1"),
        );
        let since = ts("2026-02-21T00:00:00Z");

        let watermark = parse_page(&payload, since, PaginationMode::Watermark).unwrap();
        assert_eq!(watermark.records.len(), 1);
        assert!(watermark.reached_older);

        let exhaustive = parse_page(&payload, since, PaginationMode::Exhaustive).unwrap();
        assert_eq!(exhaustive.records.len(), 2);
        assert!(!exhaustive.reached_older);
        assert_eq!(exhaustive.next_cursor.as_deref(), Some("c1"));
    }

    #[test]
    fn test_parse_page_shape_errors() {
        let err = parse_page(&json!({"data": {}}), ts("2026-02-21T00:00:00Z"), PaginationMode::Watermark)
            .unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn test_fetch_paginates_and_sorts() {
        let runner = ScriptedRunner::new(vec![
            CommandOutput::success("{\"nameWithOwner\": \"acme/repo\"}"),
            CommandOutput::success(
                page(vec![node(7, "2026-02-22T12:00:00Z"), node(5, "2026-02-22T12:00:00Z")], Some("c1"))
                    .to_string(),
            ),
            CommandOutput::success(page(vec![node(4, "2026-02-22T11:00:00Z")], None).to_string()),
        ]);
        let mut poller = GhCliPoller::with_runner("/repo", runner).page_size(2);

        let records = poller.fetch(ts("2026-02-22T00:00:00Z")).unwrap();
        let numbers: Vec<u64> = records.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![4, 5, 7]);

        let calls = &poller.runner().calls;
        assert_eq!(calls.len(), 3);
        assert!(calls[1].contains(&"owner=acme".to_string()));
        assert!(calls[1].contains(&"first=2".to_string()));
        assert!(!calls[1].iter().any(|a| a.starts_with("after=")));
        assert!(calls[2].contains(&"after=c1".to_string()));
    }

    #[test]
    fn test_recently_updated_old_merge_does_not_hide_newer_ones() {
        // #1 merged long ago but was commented on, so it leads the listing.
        let runner = ScriptedRunner::new(vec![
            CommandOutput::success("{\"nameWithOwner\": \"acme/repo\"}"),
            CommandOutput::success(
                page(
                    vec![node(1, "2026-01-01T00:00:00Z"), node(9, "2026-02-22T12:30:00Z")],
                    Some("c1"),
                )
                .to_string(),
            ),
            CommandOutput::success(page(vec![node(8, "2026-02-22T11:30:00Z")], None).to_string()),
        ]);
        let mut poller = GhCliPoller::with_runner("/repo", runner);

        let records = poller.fetch(ts("2026-02-22T11:00:00Z")).unwrap();
        let numbers: Vec<u64> = records.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![8, 9]);
        assert_eq!(poller.runner().calls.len(), 3);
    }

    #[test]
    fn test_watermark_mode_stops_paging_when_opted_in() {
        let runner = ScriptedRunner::new(vec![
            CommandOutput::success("{\"nameWithOwner\": \"acme/repo\"}"),
            CommandOutput::success(
                page(
                    vec![node(9, "2026-02-22T12:30:00Z"), node(1, "2026-01-01T00:00:00Z")],
                    Some("c1"),
                )
                .to_string(),
            ),
        ]);
        let mut poller =
            GhCliPoller::with_runner("/repo", runner).pagination(PaginationMode::Watermark);

        let records = poller.fetch(ts("2026-02-22T11:00:00Z")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, 9);
        assert_eq!(poller.runner().calls.len(), 2);
    }

    #[test]
    fn test_repo_slug_cached_across_fetches() {
        let empty = page(vec![], None).to_string();
        let runner = ScriptedRunner::new(vec![
            CommandOutput::success("{\"nameWithOwner\": \"acme/repo\"}"),
            CommandOutput::success(empty.clone()),
            CommandOutput::success(empty),
        ]);
        let mut poller = GhCliPoller::with_runner("/repo", runner);
        poller.fetch(ts("2026-02-22T00:00:00Z")).unwrap();
        poller.fetch(ts("2026-02-22T00:00:00Z")).unwrap();
        assert_eq!(poller.runner().calls.len(), 3);
    }

    #[test]
    fn test_command_failure_surfaces_exit_code() {
        let runner = ScriptedRunner::new(vec![CommandOutput::failure(4, "gh: authentication required")]);
        let mut poller = GhCliPoller::with_runner("/repo", runner);
        match poller.fetch(ts("2026-02-22T00:00:00Z")) {
            Err(FetchError::Command { message, exit_code }) => {
                assert_eq!(message, "gh: authentication required");
                assert_eq!(exit_code, Some(4));
            }
            other => panic!("expected command error, got {:?}", other),
        }
    }

    #[test]
    fn test_split_repo_slug() {
        assert_eq!(
            split_repo_slug("acme/repo").unwrap(),
            ("acme".to_string(), "repo".to_string())
        );
        assert!(matches!(split_repo_slug("acme"), Err(FetchError::InvalidRepoSlug(_))));
        assert!(split_repo_slug("/repo").is_err());
    }
}
