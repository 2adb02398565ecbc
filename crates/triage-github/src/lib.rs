//! Issue-tracker boundary: a GitHub REST client routed through the resilient
//! transport, the issue/comment wire types, and progress-comment rendering.

pub mod github_api_client;
pub mod issue_comment;
pub mod issue_filter;
pub mod issue_types;
pub mod repo_ref;

pub use github_api_client::{GithubClientConfig, GithubIssuesClient};
pub use issue_filter::{IssueListFilters, IssueState, MAX_ISSUES_PER_PAGE};
pub use issue_types::{GithubComment, GithubIssue, GithubIssueLabel, GithubUser};
pub use repo_ref::RepoRef;
