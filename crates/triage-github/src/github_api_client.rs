use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde_json::json;
use tracing::debug;
use triage_transport::{
    CallDescriptor, CancelSignal, RateLimitState, ResilientTransport, RetryConfig, TransportError,
};

use crate::issue_filter::IssueListFilters;
use crate::issue_types::{GithubComment, GithubIssue};
use crate::repo_ref::RepoRef;

pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";
const COMMENTS_PER_PAGE: usize = 100;

#[derive(Debug, Clone)]
pub struct GithubClientConfig {
    pub api_base: String,
    /// Personal access token; anonymous requests are sent when absent.
    pub token: Option<String>,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for GithubClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GITHUB_API_BASE.to_string(),
            token: None,
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

/// GitHub REST client. Every call goes through a [`ResilientTransport`]
/// whose quota state is shared with any other client built from the same
/// [`RateLimitState`].
#[derive(Debug, Clone)]
pub struct GithubIssuesClient {
    transport: ResilientTransport,
    api_base: String,
}

impl GithubIssuesClient {
    pub fn new(config: GithubClientConfig, rate_limit: Arc<RateLimitState>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("triage-coordinator"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        if let Some(token) = config
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            let auth_header = format!("Bearer {token}");
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_header).context("invalid github authorization header")?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create github api client")?;
        Ok(Self {
            transport: ResilientTransport::new(http, config.retry, rate_limit),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn transport(&self) -> &ResilientTransport {
        &self.transport
    }

    /// Lists one page of issues. Pull requests returned by the endpoint are dropped.
    pub async fn list_issues(
        &self,
        repo: &RepoRef,
        filters: &IssueListFilters,
        cancel: &CancelSignal,
    ) -> Result<Vec<GithubIssue>, TransportError> {
        let mut call = CallDescriptor::get(
            "list issues",
            format!("{}/repos/{}/{}/issues", self.api_base, repo.owner, repo.name),
        );
        call.query = filters.query_pairs();
        let rows: Vec<GithubIssue> = self.transport.call_json(&call, cancel).await?;
        let total = rows.len();
        let issues = rows
            .into_iter()
            .filter(|issue| !issue.is_pull_request())
            .collect::<Vec<_>>();
        debug!(
            repo = %repo,
            returned = total,
            issues = issues.len(),
            "listed repository issues"
        );
        Ok(issues)
    }

    pub async fn get_issue(
        &self,
        repo: &RepoRef,
        number: u64,
        cancel: &CancelSignal,
    ) -> Result<GithubIssue, TransportError> {
        let call = CallDescriptor::get(
            "get issue",
            format!(
                "{}/repos/{}/{}/issues/{number}",
                self.api_base, repo.owner, repo.name
            ),
        );
        self.transport.call_json(&call, cancel).await
    }

    /// Fetches every comment on an issue, oldest first, following pagination.
    pub async fn get_comments(
        &self,
        repo: &RepoRef,
        number: u64,
        cancel: &CancelSignal,
    ) -> Result<Vec<GithubComment>, TransportError> {
        let mut page = 1_u32;
        let mut rows = Vec::new();
        loop {
            let call = CallDescriptor::get(
                "list issue comments",
                format!(
                    "{}/repos/{}/{}/issues/{number}/comments",
                    self.api_base, repo.owner, repo.name
                ),
            )
            .with_query("sort", "created")
            .with_query("direction", "asc")
            .with_query("per_page", COMMENTS_PER_PAGE)
            .with_query("page", page);
            let chunk: Vec<GithubComment> = self.transport.call_json(&call, cancel).await?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < COMMENTS_PER_PAGE {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(rows)
    }

    pub async fn create_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
        cancel: &CancelSignal,
    ) -> Result<GithubComment, TransportError> {
        let call = CallDescriptor::post(
            "create issue comment",
            format!(
                "{}/repos/{}/{}/issues/{number}/comments",
                self.api_base, repo.owner, repo.name
            ),
            json!({ "body": body }),
        );
        self.transport.call_json(&call, cancel).await
    }
}
