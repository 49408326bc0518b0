//! GitHub API types shared by the webhook and polling ingestion paths.

pub mod client;
pub mod webhook;

pub use client::GithubClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

/// An issue as GitHub reports it, from either a webhook payload or the
/// issues list endpoint.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    /// The URL for viewing this issue.
    ///
    /// Example: `https://github.com/octocat/Hello-World/issues/1347`
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    /// The issue author.
    pub user: User,
    #[serde(default)]
    pub labels: Vec<Label>,
    /// This is `Some` if the record is actually a pull request. The issues
    /// list endpoint returns pull requests too; webhook `issues` events do
    /// not carry it.
    #[serde(default)]
    pub pull_request: Option<PullRequestDetails>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(PartialEq, Eq, Debug, Clone, serde::Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct User {
    pub login: String,
}

/// An indicator used to differentiate between an issue and a pull request.
///
/// GitHub includes a few fields here (url, html_url, diff_url, patch_url),
/// but only the field's presence matters at this time.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct PullRequestDetails {}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct Repository {
    pub full_name: String,
}

/// The payload of an `issues` webhook event.
///
/// <https://docs.github.com/en/developers/webhooks-and-events/webhooks/webhook-events-and-payloads#issues>
#[derive(Debug, serde::Deserialize)]
pub struct IssuesEvent {
    pub action: IssuesAction,
    pub issue: Issue,
    pub repository: Repository,
}

#[derive(PartialEq, Eq, Debug, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuesAction {
    Opened,
    Edited,
    Closed,
    Reopened,
    Labeled,
    Unlabeled,
    /// Any action the engine has no interest in.
    #[serde(other)]
    Other,
}

/// Retrieves candidate new issues for one repository. The polling loop is
/// the only consumer; the webhook path gets its issues pushed.
#[async_trait]
pub trait IssueFetcher: Send + Sync {
    /// Fetch open issues in `repo`, newest first, on the subscriber's own
    /// credential.
    ///
    /// `since` is advisory: GitHub filters it by update time, so the caller
    /// re-filters by creation time, and entries that are pull requests are
    /// the caller's to drop. A missing or inaccessible repository yields an
    /// empty list; only transport-level failures are errors.
    async fn issues_created_since(
        &self,
        repo: &str,
        token: &SecretString,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<Issue>>;
}
