use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

pub const MAX_ISSUES_PER_PAGE: u32 = 100;
const DEFAULT_ISSUES_PER_PAGE: u32 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
    All,
}

impl IssueState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueState {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "all" => Ok(Self::All),
            other => bail!("invalid issue state '{other}', expected open|closed|all"),
        }
    }
}

/// Query filters for listing repository issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueListFilters {
    pub state: IssueState,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    /// ISO-8601 timestamp; only issues updated at or after it are returned.
    pub since: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl Default for IssueListFilters {
    fn default() -> Self {
        Self {
            state: IssueState::Open,
            labels: Vec::new(),
            assignee: None,
            since: None,
            page: 1,
            per_page: DEFAULT_ISSUES_PER_PAGE,
        }
    }
}

impl IssueListFilters {
    /// Query pairs for the issues endpoint. Page is at least 1, per-page is clamped to 1..=100.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("state".to_string(), self.state.as_str().to_string()),
            ("page".to_string(), self.page.max(1).to_string()),
            (
                "per_page".to_string(),
                self.per_page.clamp(1, MAX_ISSUES_PER_PAGE).to_string(),
            ),
        ];
        let labels = self
            .labels
            .iter()
            .map(|label| label.trim())
            .filter(|label| !label.is_empty())
            .collect::<Vec<_>>();
        if !labels.is_empty() {
            pairs.push(("labels".to_string(), labels.join(",")));
        }
        if let Some(assignee) = non_empty(self.assignee.as_deref()) {
            pairs.push(("assignee".to_string(), assignee.to_string()));
        }
        if let Some(since) = non_empty(self.since.as_deref()) {
            pairs.push(("since".to_string(), since.to_string()));
        }
        pairs
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
