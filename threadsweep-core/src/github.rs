use serde_json::Value;
use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors arising from driving the external `gh` binary.
#[derive(Debug, Error)]
pub enum GhError {
    #[error("gh CLI is not installed or not accessible")]
    CliNotFound,
    #[error("gh command timed out after {0} seconds")]
    Timeout(u64),
    #[error("GitHub API rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("GitHub authentication failed: {0}")]
    Authentication(String),
    #[error("GitHub API call failed: {0}")]
    Api(String),
    #[error("failed to parse gh output as JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("failed to run gh: {0}")]
    Io(std::io::Error),
}

/// Thin wrapper around the `gh` command-line tool.
///
/// All GitHub traffic in this crate goes through `gh` subprocesses rather
/// than direct HTTP, so authentication and proxy handling are inherited
/// from the user's existing `gh auth` setup.
#[derive(Debug, Clone)]
pub struct GhClient {
    program: String,
    timeout: Duration,
}

impl Default for GhClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GhClient {
    pub fn new() -> Self {
        Self {
            program: "gh".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            program: "gh".to_string(),
            timeout,
        }
    }

    /// Run `gh` with the given arguments and return its stdout.
    pub async fn run(&self, args: &[&str]) -> Result<String, GhError> {
        debug!("Running gh {}", args.join(" "));

        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.program)
                .args(args)
                .output(),
        )
        .await
        .map_err(|_| GhError::Timeout(self.timeout.as_secs()))?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GhError::CliNotFound
            } else {
                GhError::Io(e)
            }
        })?;

        if let Some(err) = classify_failure(&output) {
            error!("gh command failed: {}", err);
            return Err(err);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Get the installed gh CLI version, e.g. "2.40.1".
    pub async fn version(&self) -> Result<String, GhError> {
        let stdout = self.run(&["--version"]).await?;
        parse_version(&stdout).ok_or_else(|| GhError::Api("unrecognized gh version output".into()))
    }

    /// Check whether gh is authenticated with GitHub. A missing or broken
    /// gh binary is an error; an unauthenticated gh is `Ok(false)`.
    pub async fn check_auth(&self) -> Result<bool, GhError> {
        match self.run(&["auth", "status"]).await {
            Ok(_) => Ok(true),
            Err(err @ (GhError::CliNotFound | GhError::Io(_) | GhError::Timeout(_))) => Err(err),
            Err(_) => Ok(false),
        }
    }

    /// Get the current repository in "owner/repo" form, if run inside one.
    pub async fn current_repo(&self) -> Result<String, GhError> {
        let stdout = self.run(&["repo", "view", "--json", "nameWithOwner"]).await?;
        let data: Value = serde_json::from_str(&stdout)?;
        data.get("nameWithOwner")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GhError::Api("repo view returned no nameWithOwner".into()))
    }

    /// Execute a GraphQL query via `gh api graphql` and return the parsed
    /// response. GraphQL-level errors are surfaced as [`GhError::Api`].
    pub async fn graphql(&self, query: &str, variables: Option<&Value>) -> Result<Value, GhError> {
        let query_arg = format!("query={}", query);
        let mut args = vec!["api", "graphql", "-f", query_arg.as_str()];

        let variables_arg = variables.map(|v| format!("variables={}", v));
        if let Some(var_arg) = variables_arg.as_deref() {
            args.push("-f");
            args.push(var_arg);
        }

        let stdout = self.run(&args).await?;
        let response: Value = serde_json::from_str(&stdout)?;

        if let Some(errors) = response.get("errors").and_then(Value::as_array) {
            let messages: Vec<&str> = errors
                .iter()
                .map(|e| e.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
                .collect();
            return Err(GhError::Api(format!(
                "GraphQL query failed: {}",
                messages.join("; ")
            )));
        }

        info!("GraphQL query succeeded");
        Ok(response)
    }
}

/// Classify a finished gh invocation into an error, or None on success.
///
/// Rate-limit phrases in stderr are an error regardless of exit status,
/// since gh sometimes reports them on exit 0.
fn classify_failure(output: &Output) -> Option<GhError> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lowered = stderr.to_lowercase();

    if ["rate limit", "rate limited", "api rate limit"]
        .iter()
        .any(|phrase| lowered.contains(phrase))
    {
        return Some(GhError::RateLimited(stderr.trim().to_string()));
    }

    if output.status.success() {
        return None;
    }

    if ["authentication", "unauthorized", "forbidden"]
        .iter()
        .any(|phrase| lowered.contains(phrase))
    {
        return Some(GhError::Authentication(stderr.trim().to_string()));
    }

    Some(GhError::Api(stderr.trim().to_string()))
}

/// Parse the version number from output like "gh version 2.40.1 (2023-12-13)".
fn parse_version(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        if line.starts_with("gh version") {
            return line.split_whitespace().nth(2).map(str::to_string);
        }
    }
    None
}
