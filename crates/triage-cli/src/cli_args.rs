use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use triage_agent::DEFAULT_DEVIN_API_URL;
use triage_github::github_api_client::DEFAULT_GITHUB_API_BASE;
use triage_github::{IssueListFilters, IssueState, MAX_ISSUES_PER_PAGE};
use triage_runtime::{RunOptions, TriageConfig};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_growth_factor(value: &str) -> Result<f64, String> {
    let parsed = value
        .parse::<f64>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !parsed.is_finite() || parsed < 1.0 {
        return Err("value must be a finite number of at least 1.0".to_string());
    }
    Ok(parsed)
}

fn parse_per_page(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if !(1..=MAX_ISSUES_PER_PAGE).contains(&parsed) {
        return Err(format!("value must be in range 1..={MAX_ISSUES_PER_PAGE}"));
    }
    Ok(parsed)
}

fn parse_repo_slug(value: &str) -> Result<String, String> {
    triage_github::RepoRef::parse(value)
        .map(|repo| repo.as_slug())
        .map_err(|error| error.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "triage",
    about = "Scope and execute GitHub issues with remote Devin sessions",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(
        long,
        short = 'v',
        global = true,
        help = "Log progress at info level to stderr (RUST_LOG overrides)"
    )]
    pub verbose: bool,

    #[arg(
        long = "github-token",
        env = "GITHUB_TOKEN",
        global = true,
        hide_env_values = true,
        help = "GitHub token; required for private repositories and for posting comments"
    )]
    pub github_token: Option<String>,

    #[arg(
        long = "github-api-base",
        env = "TRIAGE_GITHUB_API_BASE",
        global = true,
        default_value = DEFAULT_GITHUB_API_BASE
    )]
    pub github_api_base: String,

    #[arg(
        long = "devin-api-key",
        env = "DEVIN_API_KEY",
        global = true,
        hide_env_values = true,
        help = "Devin API key"
    )]
    pub devin_api_key: Option<String>,

    #[arg(
        long = "devin-api-url",
        env = "DEVIN_API_URL",
        global = true,
        default_value = DEFAULT_DEVIN_API_URL
    )]
    pub devin_api_url: String,

    #[arg(
        long = "poll-interval",
        env = "DEVIN_POLL_INTERVAL",
        global = true,
        default_value_t = 15,
        value_parser = parse_positive_u64,
        help = "Initial session poll interval in seconds"
    )]
    pub poll_interval_secs: u64,

    #[arg(
        long = "poll-max-interval",
        env = "DEVIN_POLL_MAX_INTERVAL",
        global = true,
        default_value_t = 30,
        value_parser = parse_positive_u64,
        help = "Upper bound for the poll interval in seconds"
    )]
    pub poll_max_interval_secs: u64,

    #[arg(
        long = "poll-timeout",
        env = "DEVIN_POLL_TIMEOUT",
        global = true,
        default_value_t = 1800,
        value_parser = parse_positive_u64,
        help = "Overall poll deadline in seconds (minimum 60)"
    )]
    pub poll_timeout_secs: u64,

    #[arg(
        long = "poll-growth-factor",
        env = "TRIAGE_POLL_GROWTH_FACTOR",
        global = true,
        default_value_t = 1.5,
        value_parser = parse_growth_factor
    )]
    pub poll_growth_factor: f64,

    #[arg(
        long = "request-timeout-ms",
        env = "TRIAGE_REQUEST_TIMEOUT_MS",
        global = true,
        default_value_t = 30_000,
        value_parser = parse_positive_u64
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "TRIAGE_RETRY_MAX_ATTEMPTS",
        global = true,
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Attempts per remote call for transient failures, first attempt included"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "TRIAGE_RETRY_BASE_DELAY_MS",
        global = true,
        default_value_t = 500,
        value_parser = parse_positive_u64
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "github-rate-limit-buffer",
        env = "GITHUB_RATE_LIMIT_BUFFER",
        global = true,
        default_value_t = 100,
        help = "Remaining GitHub quota below which a warning is logged"
    )]
    pub github_rate_limit_buffer: u64,

    #[arg(
        long = "state-dir",
        env = "TRIAGE_STATE_DIR",
        global = true,
        default_value = ".triage",
        help = "Directory holding the session ledger"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "post-comments",
        env = "TRIAGE_POST_COMMENTS",
        global = true,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Post progress comments on the issue"
    )]
    pub post_comments: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List repository issues, annotated with recorded scoping results
    List(ListArgs),
    /// Launch a scoping session for an issue
    Scope(TaskArgs),
    /// Launch an execution session for an issue
    Execute(TaskArgs),
    /// Re-poll a recorded session until it reaches a terminal state
    Resume(ResumeArgs),
    /// Fetch a recorded session once and report its state
    Status(SessionArgs),
    /// Send a message to a session
    Message(MessageArgs),
}

impl Command {
    /// Whether the command calls the agent API and so needs its credentials.
    pub fn needs_agent(&self) -> bool {
        !matches!(self, Command::List(_))
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(value_parser = parse_repo_slug, help = "Repository as owner/repo")]
    pub repo: String,

    #[arg(long, default_value = "open", value_parser = parse_issue_state)]
    pub state: IssueState,

    #[arg(long = "label", help = "Only issues carrying this label (repeatable)")]
    pub labels: Vec<String>,

    #[arg(long)]
    pub assignee: Option<String>,

    #[arg(long, help = "Only issues updated at or after this ISO-8601 timestamp")]
    pub since: Option<String>,

    #[arg(long, default_value_t = 1, value_parser = parse_page)]
    pub page: u32,

    #[arg(long = "per-page", default_value_t = 30, value_parser = parse_per_page)]
    pub per_page: u32,
}

#[derive(Debug, Args)]
pub struct TaskArgs {
    #[arg(value_parser = parse_repo_slug, help = "Repository as owner/repo")]
    pub repo: String,

    #[arg(value_parser = parse_positive_u64)]
    pub issue: u64,

    #[arg(long = "no-wait", help = "Return right after launching the session")]
    pub no_wait: bool,

    #[arg(
        long = "no-reuse",
        help = "Always create a new session instead of reusing an active one"
    )]
    pub no_reuse: bool,
}

#[derive(Debug, Args)]
pub struct ResumeArgs {
    pub session_id: String,

    #[arg(
        long = "poll-timeout-override",
        value_parser = parse_positive_u64,
        help = "Poll deadline in seconds for this resume only"
    )]
    pub poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SessionArgs {
    pub session_id: String,
}

#[derive(Debug, Args)]
pub struct MessageArgs {
    pub session_id: String,
    pub text: String,
}

fn parse_issue_state(value: &str) -> Result<IssueState, String> {
    value.parse::<IssueState>().map_err(|error| error.to_string())
}

fn parse_page(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

impl Cli {
    pub fn triage_config(&self) -> TriageConfig {
        TriageConfig {
            github_api_base: self.github_api_base.clone(),
            github_token: self
                .github_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
            devin_api_url: self.devin_api_url.clone(),
            devin_api_key: self.devin_api_key.clone().unwrap_or_default(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            poll_max_interval: Duration::from_secs(self.poll_max_interval_secs),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            poll_growth_factor: self.poll_growth_factor,
            request_timeout_ms: self.request_timeout_ms,
            retry_max_attempts: self.retry_max_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
            github_rate_limit_buffer: self.github_rate_limit_buffer,
            state_dir: self.state_dir.clone(),
            post_comments: self.post_comments,
        }
    }
}

impl ListArgs {
    pub fn filters(&self) -> IssueListFilters {
        IssueListFilters {
            state: self.state,
            labels: self.labels.clone(),
            assignee: self.assignee.clone(),
            since: self.since.clone(),
            page: self.page,
            per_page: self.per_page,
        }
    }
}

impl TaskArgs {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            reuse: !self.no_reuse,
            wait: !self.no_wait,
            ..RunOptions::default()
        }
    }
}

impl ResumeArgs {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            poll_timeout: self.poll_timeout_secs.map(Duration::from_secs),
            ..RunOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use triage_github::IssueState;

    use super::{Cli, Command};

    #[test]
    fn unit_scope_command_parses_task_and_flags() {
        let cli = Cli::try_parse_from([
            "triage",
            "scope",
            "acme/widgets",
            "42",
            "--no-wait",
            "--devin-api-key",
            "key",
        ])
        .expect("parse");
        let Command::Scope(args) = &cli.command else {
            panic!("expected scope, got {:?}", cli.command);
        };
        assert_eq!(args.repo, "acme/widgets");
        assert_eq!(args.issue, 42);
        let options = args.run_options();
        assert!(!options.wait);
        assert!(options.reuse);

        let config = cli.triage_config();
        assert_eq!(config.devin_api_key, "key");
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.poll_timeout, Duration::from_secs(1800));
        assert!(config.post_comments);
    }

    #[test]
    fn unit_list_command_builds_filters() {
        let cli = Cli::try_parse_from([
            "triage",
            "list",
            "acme/widgets",
            "--state",
            "all",
            "--label",
            "bug",
            "--label",
            "p1",
            "--per-page",
            "50",
        ])
        .expect("parse");
        let Command::List(args) = &cli.command else {
            panic!("expected list, got {:?}", cli.command);
        };
        let filters = args.filters();
        assert_eq!(filters.state, IssueState::All);
        assert_eq!(filters.labels, vec!["bug".to_string(), "p1".to_string()]);
        assert_eq!(filters.per_page, 50);
        assert_eq!(filters.page, 1);
    }

    #[test]
    fn regression_list_needs_no_agent_credentials() {
        let list = Cli::try_parse_from(["triage", "list", "acme/widgets"]).expect("parse");
        assert!(!list.command.needs_agent());
        list.triage_config()
            .validate_settings()
            .expect("list settings are valid without an agent key");

        for argv in [
            vec!["triage", "scope", "acme/widgets", "7"],
            vec!["triage", "execute", "acme/widgets", "7"],
            vec!["triage", "resume", "devin-1"],
            vec!["triage", "status", "devin-1"],
            vec!["triage", "message", "devin-1", "hello"],
        ] {
            let cli = Cli::try_parse_from(argv).expect("parse");
            assert!(cli.command.needs_agent(), "{:?}", cli.command);
        }
    }

    #[test]
    fn regression_invalid_arguments_are_rejected_at_parse_time() {
        assert!(Cli::try_parse_from(["triage", "scope", "not-a-repo", "1"]).is_err());
        assert!(Cli::try_parse_from(["triage", "scope", "acme/widgets", "0"]).is_err());
        assert!(Cli::try_parse_from(["triage", "list", "acme/widgets", "--per-page", "101"]).is_err());
        assert!(Cli::try_parse_from([
            "triage",
            "status",
            "devin-1",
            "--poll-growth-factor",
            "0.5"
        ])
        .is_err());
    }

    #[test]
    fn functional_post_comments_flag_accepts_explicit_false() {
        let cli = Cli::try_parse_from(["triage", "status", "devin-1", "--post-comments=false"])
            .expect("parse");
        assert!(!cli.triage_config().post_comments);
        let Command::Status(args) = &cli.command else {
            panic!("expected status");
        };
        assert_eq!(args.session_id, "devin-1");
    }

    #[test]
    fn unit_resume_timeout_override_maps_to_run_options() {
        let cli = Cli::try_parse_from([
            "triage",
            "resume",
            "devin-9",
            "--poll-timeout-override",
            "120",
        ])
        .expect("parse");
        let Command::Resume(args) = &cli.command else {
            panic!("expected resume");
        };
        assert_eq!(
            args.run_options().poll_timeout,
            Some(Duration::from_secs(120))
        );
    }
}
