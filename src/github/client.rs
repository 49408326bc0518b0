use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};

use crate::github::{Issue, IssueFetcher};

/// Issues per list page. GitHub caps `per_page` at 100; 50 keeps payloads
/// small while still covering a poll interval's worth of new issues.
const PER_PAGE: u32 = 50;

#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    api_url: String,
}

impl GithubClient {
    pub fn new(api_url: String) -> Self {
        GithubClient {
            client: Client::new(),
            api_url,
        }
    }

    pub fn new_from_env() -> Self {
        Self::new(
            std::env::var("GITHUB_API_URL")
                .unwrap_or_else(|_| "https://api.github.com".to_string()),
        )
    }
}

#[async_trait]
impl IssueFetcher for GithubClient {
    async fn issues_created_since(
        &self,
        repo: &str,
        token: &SecretString,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<Issue>> {
        let mut query = vec![
            ("state", "open".to_string()),
            ("per_page", PER_PAGE.to_string()),
            ("sort", "created".to_string()),
            ("direction", "desc".to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }

        let mut auth = reqwest::header::HeaderValue::from_maybe_shared(format!(
            "Bearer {}",
            token.expose_secret()
        ))
        .context("GitHub token is not a valid header value")?;
        auth.set_sensitive(true);

        let resp = self
            .client
            .get(format!("{}/repos/{repo}/issues", self.api_url))
            .query(&query)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header(USER_AGENT, "issuebell")
            .header(AUTHORIZATION, auth)
            .send()
            .await
            .with_context(|| format!("failed to fetch issues for {repo}"))?;

        // A missing or inaccessible repository has nothing to report.
        if matches!(
            resp.status(),
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED
        ) {
            tracing::debug!(%repo, status = %resp.status(), "repository not accessible");
            return Ok(Vec::new());
        }

        let resp = resp
            .error_for_status()
            .with_context(|| format!("fetching issues for {repo}"))?;
        let issues = resp
            .json::<Vec<Issue>>()
            .await
            .with_context(|| format!("failed to deserialize issues for {repo}"))?;
        Ok(issues)
    }
}
