//! Trigger client - starts a build job over HTTP.
//!
//! The build server exposes one endpoint per job, described by a URL template
//! with a single `%s` placeholder for the job name:
//!
//! ```text
//! http://jenkins.local:8080/job/%s/build   +  "svc"
//!   -> POST http://jenkins.local:8080/job/svc/build
//!      Authorization: Basic base64(username:api_token)
//! ```
//!
//! The request has no body. The response body is only logged; any 2xx status
//! counts as success. There is no retry: one qualifying event, one call.

use crate::config::ConfigError;
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Placeholder substituted with the job name
pub const JOB_PLACEHOLDER: &str = "%s";

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body excerpt kept in errors and logs
const BODY_SNIPPET_LEN: usize = 256;

/// Errors from a trigger call. All of them are recoverable.
#[derive(Error, Debug)]
pub enum TriggerError {
    /// Caller passed an empty job name
    #[error("job name must not be empty")]
    EmptyJobName,

    /// Request could not be built or sent
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Build server answered with a non-2xx status
    #[error("{url} returned status {status}: {body}")]
    Status { url: String, status: u16, body: String },
}

/// Credentials and endpoint of the build server.
#[derive(Clone, PartialEq, Eq)]
pub struct TriggerConfig {
    username: String,
    api_token: String,
    url_template: String,
}

impl TriggerConfig {
    /// Validate and build the configuration.
    ///
    /// Every field is required and the template must contain exactly one
    /// `%s`. Failing here is meant to stop the process at startup.
    pub fn new(
        username: impl Into<String>,
        api_token: impl Into<String>,
        url_template: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let username = username.into();
        let api_token = api_token.into();
        let url_template = url_template.into();

        if username.is_empty() {
            return Err(ConfigError::MissingField("trigger.username".into()));
        }
        if api_token.is_empty() {
            return Err(ConfigError::MissingField("trigger.api_token".into()));
        }
        if url_template.is_empty() {
            return Err(ConfigError::MissingField("trigger.url_template".into()));
        }

        let placeholders = url_template.matches(JOB_PLACEHOLDER).count();
        if placeholders != 1 {
            return Err(ConfigError::ValidationError(format!(
                "trigger.url_template must contain exactly one '{}', found {}",
                JOB_PLACEHOLDER, placeholders
            )));
        }

        if !url_template.starts_with("http://") && !url_template.starts_with("https://") {
            return Err(ConfigError::ValidationError(
                "trigger.url_template must start with http:// or https://".into(),
            ));
        }

        Ok(Self {
            username,
            api_token,
            url_template,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    /// URL of the build endpoint for a job
    pub fn job_url(&self, job: &str) -> String {
        self.url_template.replacen(JOB_PLACEHOLDER, job, 1)
    }
}

impl fmt::Debug for TriggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerConfig")
            .field("username", &self.username)
            .field("api_token", &"<redacted>")
            .field("url_template", &self.url_template)
            .finish()
    }
}

/// Result of a successful trigger call.
#[derive(Debug, Clone)]
pub struct TriggerResponse {
    pub url: String,
    pub status: u16,
}

/// Anything that can start a build job by name.
#[async_trait]
pub trait JobTrigger: Send + Sync {
    async fn trigger(&self, job: &str) -> Result<TriggerResponse, TriggerError>;
}

/// HTTP client for the build server's job trigger endpoint.
#[derive(Debug, Clone)]
pub struct TriggerClient {
    config: TriggerConfig,

    /// HTTP client (reused for connection pooling)
    client: Client,

    timeout: Duration,
}

impl TriggerClient {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// Build the authenticated POST for a job without sending it.
    pub fn build_request(&self, job: &str) -> Result<reqwest::Request, TriggerError> {
        if job.is_empty() {
            return Err(TriggerError::EmptyJobName);
        }

        let url = self.config.job_url(job);
        self.client
            .post(&url)
            .basic_auth(&self.config.username, Some(&self.config.api_token))
            .timeout(self.timeout)
            .build()
            .map_err(|source| TriggerError::Request { url, source })
    }
}

#[async_trait]
impl JobTrigger for TriggerClient {
    async fn trigger(&self, job: &str) -> Result<TriggerResponse, TriggerError> {
        let request = self.build_request(job)?;
        let url = request.url().to_string();

        debug!(url = %url, job = %job, "Sending trigger request");

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(source) => {
                error!(url = %url, job = %job, error = %source, "Trigger request failed");
                return Err(TriggerError::Request { url, source });
            }
        };

        let status = response.status();

        // The body is diagnostic only; failing to read it doesn't change the outcome
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(url = %url, error = %e, "Could not read trigger response body");
                String::new()
            }
        };

        debug!(url = %url, status = %status, body = %body, "Received trigger response");

        if status.is_success() {
            info!(url = %url, job = %job, status = %status, "Build job triggered");
            Ok(TriggerResponse {
                url,
                status: status.as_u16(),
            })
        } else {
            let body = snippet(&body);
            error!(
                url = %url,
                job = %job,
                status = %status,
                body = %body,
                "Build server rejected trigger"
            );
            Err(TriggerError::Status {
                url,
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn snippet(body: &str) -> String {
    match body.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}
