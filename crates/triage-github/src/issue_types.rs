use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GithubUser {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GithubIssueLabel {
    pub name: String,
}

/// Issue as returned by `GET /repos/{owner}/{repo}/issues[/{number}]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubIssue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub html_url: String,
    pub created_at: String,
    pub updated_at: String,
    pub user: GithubUser,
    #[serde(default)]
    pub labels: Vec<GithubIssueLabel>,
    #[serde(default)]
    pub assignees: Vec<GithubUser>,
    #[serde(default)]
    pub comments: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<Value>,
}

impl GithubIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|label| label.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubComment {
    pub id: u64,
    pub body: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub user: GithubUser,
    #[serde(default)]
    pub html_url: Option<String>,
}
