use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use triage_agent::{PolicyError, RetryPolicy, DEFAULT_DEVIN_API_URL};
use triage_github::github_api_client::DEFAULT_GITHUB_API_BASE;
use triage_transport::RetryConfig;

use crate::session_ledger::SESSION_LEDGER_FILE_NAME;

pub const MIN_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Runtime settings, normally populated from CLI flags and environment.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub github_api_base: String,
    pub github_token: Option<String>,
    pub devin_api_url: String,
    pub devin_api_key: String,
    pub poll_interval: Duration,
    pub poll_max_interval: Duration,
    pub poll_timeout: Duration,
    pub poll_growth_factor: f64,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    /// Remaining GitHub quota below which a warning is logged.
    pub github_rate_limit_buffer: u64,
    pub state_dir: PathBuf,
    pub post_comments: bool,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            github_api_base: DEFAULT_GITHUB_API_BASE.to_string(),
            github_token: None,
            devin_api_url: DEFAULT_DEVIN_API_URL.to_string(),
            devin_api_key: String::new(),
            poll_interval: Duration::from_secs(15),
            poll_max_interval: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(1800),
            poll_growth_factor: 1.5,
            request_timeout_ms: 30_000,
            retry_max_attempts: 4,
            retry_base_delay_ms: 500,
            github_rate_limit_buffer: 100,
            state_dir: PathBuf::from(".triage"),
            post_comments: true,
        }
    }
}

impl TriageConfig {
    /// Checks user-supplied settings for commands that talk to the agent API.
    pub fn validate(&self) -> Result<()> {
        if self.devin_api_key.trim().is_empty() {
            bail!("a Devin API key is required (set DEVIN_API_KEY or --devin-api-key)");
        }
        self.validate_settings()
    }

    /// Checks everything except agent credentials, for issue-tracker-only commands.
    pub fn validate_settings(&self) -> Result<()> {
        if self.poll_timeout < MIN_POLL_TIMEOUT {
            bail!(
                "poll timeout must be at least {}s (got {}s)",
                MIN_POLL_TIMEOUT.as_secs(),
                self.poll_timeout.as_secs()
            );
        }
        if self.request_timeout_ms == 0 {
            bail!("request timeout must be greater than 0");
        }
        if self.retry_max_attempts == 0 {
            bail!("retry max attempts must be greater than 0");
        }
        if self.state_dir.as_os_str().is_empty() {
            bail!("state directory cannot be empty");
        }
        self.poll_policy(None)?;
        Ok(())
    }

    pub fn poll_policy(
        &self,
        deadline_override: Option<Duration>,
    ) -> Result<RetryPolicy, PolicyError> {
        RetryPolicy::new(
            self.poll_interval,
            self.poll_max_interval,
            self.poll_growth_factor,
            deadline_override.unwrap_or(self.poll_timeout),
        )
    }

    pub fn github_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            base_delay_ms: self.retry_base_delay_ms,
            low_quota_buffer: self.github_rate_limit_buffer,
            ..RetryConfig::default()
        }
    }

    pub fn devin_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            base_delay_ms: self.retry_base_delay_ms,
            low_quota_buffer: 0,
            ..RetryConfig::default()
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join(SESSION_LEDGER_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::TriageConfig;

    fn valid() -> TriageConfig {
        TriageConfig {
            devin_api_key: "key".to_string(),
            ..TriageConfig::default()
        }
    }

    #[test]
    fn unit_default_config_with_key_is_valid() {
        valid().validate().expect("valid");
        let policy = valid().poll_policy(None).expect("policy");
        assert_eq!(policy.initial_interval(), Duration::from_secs(15));
        assert_eq!(policy.max_interval(), Duration::from_secs(30));
        assert_eq!(policy.deadline(), Duration::from_secs(1800));
    }

    #[test]
    fn regression_validate_rejects_missing_key_and_short_timeout() {
        let error = TriageConfig::default().validate().expect_err("missing key");
        assert!(error.to_string().contains("Devin API key"));

        let error = TriageConfig {
            poll_timeout: Duration::from_secs(59),
            ..valid()
        }
        .validate()
        .expect_err("short timeout");
        assert!(error.to_string().contains("at least 60s"));
    }

    #[test]
    fn regression_settings_validate_without_agent_key() {
        let config = TriageConfig {
            devin_api_key: String::new(),
            ..valid()
        };
        config.validate_settings().expect("settings alone are valid");
        assert!(config.validate().is_err());

        let error = TriageConfig {
            retry_max_attempts: 0,
            ..config
        }
        .validate_settings()
        .expect_err("zero attempts");
        assert!(error.to_string().contains("retry max attempts"));
    }

    #[test]
    fn regression_validate_rejects_inverted_poll_intervals() {
        let error = TriageConfig {
            poll_interval: Duration::from_secs(60),
            poll_max_interval: Duration::from_secs(30),
            ..valid()
        }
        .validate()
        .expect_err("inverted");
        assert!(error.to_string().contains("exceeds the maximum"));
    }

    #[test]
    fn unit_retry_configs_carry_shared_settings() {
        let config = TriageConfig {
            retry_max_attempts: 6,
            github_rate_limit_buffer: 250,
            ..valid()
        };
        assert_eq!(config.github_retry().max_attempts, 6);
        assert_eq!(config.github_retry().low_quota_buffer, 250);
        assert_eq!(config.devin_retry().max_attempts, 6);
        assert!(config.ledger_path().ends_with("sessions.json"));
    }
}
