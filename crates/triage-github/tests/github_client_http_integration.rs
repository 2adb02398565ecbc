use httpmock::prelude::*;
use serde_json::{json, Value};
use triage_github::{
    GithubClientConfig, GithubIssuesClient, IssueListFilters, IssueState, RepoRef,
};
use triage_transport::{CancelSignal, RateLimitState, RetryConfig};

fn client(server: &MockServer) -> GithubIssuesClient {
    GithubIssuesClient::new(
        GithubClientConfig {
            api_base: server.base_url(),
            token: Some("test-token".to_string()),
            request_timeout_ms: 5_000,
            retry: RetryConfig {
                base_delay_ms: 1,
                max_delay_ms: 2,
                jitter: false,
                ..RetryConfig::default()
            },
        },
        RateLimitState::shared(),
    )
    .expect("github client")
}

fn repo() -> RepoRef {
    RepoRef::parse("acme/widgets").expect("repo")
}

fn issue_json(number: u64, title: &str) -> Value {
    json!({
        "number": number,
        "title": title,
        "body": "details",
        "state": "open",
        "html_url": format!("https://github.com/acme/widgets/issues/{number}"),
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-02T00:00:00Z",
        "user": {"login": "alice"},
        "labels": [{"name": "bug"}]
    })
}

fn comment_json(id: u64) -> Value {
    json!({
        "id": id,
        "body": format!("comment {id}"),
        "created_at": "2026-01-01T00:00:00Z",
        "updated_at": "2026-01-01T00:00:00Z",
        "user": {"login": "bob"}
    })
}

#[tokio::test]
async fn integration_list_issues_sends_filters_and_drops_pull_requests() {
    let server = MockServer::start();
    let mut pull_request = issue_json(3, "Fix widget");
    pull_request["pull_request"] = json!({"url": "https://api.github.com/repos/acme/widgets/pulls/3"});
    let list = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/issues")
            .header("authorization", "Bearer test-token")
            .header("x-github-api-version", "2022-11-28")
            .query_param("state", "closed")
            .query_param("labels", "bug")
            .query_param("assignee", "alice")
            .query_param("page", "2")
            .query_param("per_page", "100");
        then.status(200)
            .header("x-ratelimit-remaining", "4321")
            .json_body(json!([issue_json(1, "Crash"), pull_request, issue_json(2, "Hang")]));
    });

    let filters = IssueListFilters {
        state: IssueState::Closed,
        labels: vec!["bug".to_string()],
        assignee: Some("alice".to_string()),
        page: 2,
        per_page: 250,
        ..IssueListFilters::default()
    };
    let client = client(&server);
    let issues = client
        .list_issues(&repo(), &filters, &CancelSignal::never())
        .await
        .expect("list issues");

    list.assert_calls(1);
    assert_eq!(
        issues.iter().map(|issue| issue.number).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(client.transport().rate_limit().remaining(), Some(4321));
}

#[tokio::test]
async fn integration_get_comments_follows_pagination_until_short_page() {
    let server = MockServer::start();
    let first_page = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/issues/7/comments")
            .query_param("page", "1")
            .query_param("per_page", "100");
        then.status(200)
            .json_body(Value::Array((1..=100).map(comment_json).collect()));
    });
    let second_page = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/issues/7/comments")
            .query_param("page", "2");
        then.status(200).json_body(json!([comment_json(101)]));
    });

    let comments = client(&server)
        .get_comments(&repo(), 7, &CancelSignal::never())
        .await
        .expect("comments");

    first_page.assert_calls(1);
    second_page.assert_calls(1);
    assert_eq!(comments.len(), 101);
    assert_eq!(comments[100].id, 101);
}

#[tokio::test]
async fn integration_create_comment_posts_body() {
    let server = MockServer::start();
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/issues/7/comments")
            .json_body(json!({"body": "hello"}));
        then.status(201).json_body(json!({
            "id": 900,
            "body": "hello",
            "created_at": "2026-01-03T00:00:00Z",
            "updated_at": "2026-01-03T00:00:00Z",
            "user": {"login": "triage-bot"},
            "html_url": "https://github.com/acme/widgets/issues/7#issuecomment-900"
        }));
    });

    let comment = client(&server)
        .create_comment(&repo(), 7, "hello", &CancelSignal::never())
        .await
        .expect("create comment");

    create.assert_calls(1);
    assert_eq!(comment.id, 900);
    assert!(comment.html_url.expect("url").ends_with("issuecomment-900"));
}

#[tokio::test]
async fn regression_missing_issue_is_invalid_and_not_retried() {
    let server = MockServer::start();
    let missing = server.mock(|when, then| {
        when.method(GET).path("/repos/acme/widgets/issues/404");
        then.status(404).json_body(json!({"message": "Not Found"}));
    });

    let error = client(&server)
        .get_issue(&repo(), 404, &CancelSignal::never())
        .await
        .expect_err("missing issue");

    missing.assert_calls(1);
    assert!(error.is_invalid());
    assert_eq!(error.status(), Some(404));
}

#[tokio::test]
async fn functional_get_issue_retries_server_errors() {
    let server = MockServer::start();
    let failing = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/issues/5")
            .header("x-triage-retry-attempt", "0");
        then.status(500);
    });
    let ok = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/acme/widgets/issues/5")
            .header("x-triage-retry-attempt", "1");
        then.status(200).json_body(issue_json(5, "Flaky"));
    });

    let issue = client(&server)
        .get_issue(&repo(), 5, &CancelSignal::never())
        .await
        .expect("issue");

    failing.assert_calls(1);
    ok.assert_calls(1);
    assert_eq!(issue.title, "Flaky");
}
