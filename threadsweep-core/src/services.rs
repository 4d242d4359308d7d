//! The three narrow collaborator contracts used by the bulk coordinator:
//! fetching candidate threads, posting replies, and resolving threads.
//!
//! Each contract is a trait so the coordinator and rollback handlers can be
//! exercised against in-memory fakes; the production implementations drive
//! the GitHub GraphQL API through [`GhClient`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::github::{GhClient, GhError};
use crate::graphql::{
    reply_variables, resolve_thread_mutation, thread_mutation_variables, thread_reply_mutation,
    unresolve_thread_mutation, QueryBuildError, ReviewThreadsQuery,
};
use crate::models::{preview, ReplyOutcome, ResolveOutcome, ReviewThread};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("thread {0} not found")]
    ThreadNotFound(String),
    #[error("permission denied: {0}. Ensure you have write access to the repository")]
    PermissionDenied(String),
    #[error("could not determine repository; run inside a repository with a GitHub remote")]
    NoRepository,
    #[error(transparent)]
    InvalidRequest(#[from] QueryBuildError),
    #[error(transparent)]
    Gh(#[from] GhError),
    #[error("{0}")]
    Malformed(String),
}

#[async_trait]
pub trait ThreadFetcher: Send + Sync {
    /// Enumerate the currently-unresolved review threads on a pull request.
    async fn fetch_unresolved_threads(
        &self,
        pr_number: u64,
    ) -> Result<Vec<ReviewThread>, ServiceError>;
}

#[async_trait]
pub trait ThreadReplier: Send + Sync {
    async fn post_reply(&self, thread_id: &str, body: &str)
        -> Result<ReplyOutcome, ServiceError>;
}

#[async_trait]
pub trait ThreadResolver: Send + Sync {
    async fn resolve_thread(&self, thread_id: &str) -> Result<ResolveOutcome, ServiceError>;
    async fn unresolve_thread(&self, thread_id: &str) -> Result<ResolveOutcome, ServiceError>;
}

/// Map a GraphQL error message onto the service taxonomy.
fn classify_api_error(err: GhError, thread_id: &str) -> ServiceError {
    if let GhError::Api(message) = &err {
        let lowered = message.to_lowercase();
        if lowered.contains("not found") || lowered.contains("does not exist") {
            return ServiceError::ThreadNotFound(thread_id.to_string());
        }
        if lowered.contains("permission")
            || lowered.contains("forbidden")
            || lowered.contains("not accessible")
        {
            return ServiceError::PermissionDenied(message.clone());
        }
    }
    ServiceError::Gh(err)
}

/// Fetches review threads for a pull request in the current repository.
pub struct FetchService {
    gh: Arc<GhClient>,
    limit: usize,
}

impl FetchService {
    pub fn new(gh: Arc<GhClient>) -> Self {
        Self { gh, limit: 100 }
    }

    pub fn with_limit(gh: Arc<GhClient>, limit: usize) -> Self {
        Self { gh, limit }
    }

    pub async fn fetch_review_threads(
        &self,
        pr_number: u64,
        include_resolved: bool,
    ) -> Result<Vec<ReviewThread>, ServiceError> {
        let repo = self
            .gh
            .current_repo()
            .await
            .map_err(|_| ServiceError::NoRepository)?;
        let (owner, name) = repo
            .split_once('/')
            .ok_or_else(|| ServiceError::Malformed(format!("invalid repository: {repo}")))?;

        let query = ReviewThreadsQuery::new()
            .limit(self.limit)?
            .include_resolved(include_resolved);
        let response = self
            .gh
            .graphql(
                &query.render(),
                Some(&query.variables(owner, name, pr_number)),
            )
            .await?;

        let (mut threads, truncated) = extract_threads(&response, pr_number)?;
        if query.filters_resolved() {
            threads.retain(|t| !t.is_resolved);
        }
        if truncated {
            warn!(
                "PR #{} has more review threads than the fetch limit of {}; \
                 later threads were not fetched",
                pr_number, self.limit
            );
        }

        info!(
            "Fetched {} review threads for PR #{}",
            threads.len(),
            pr_number
        );
        Ok(threads)
    }
}

/// Pull the thread nodes out of a review-threads response. The second
/// element reports whether the server had more pages than the query asked
/// for, so callers can flag the truncation.
fn extract_threads(
    response: &Value,
    pr_number: u64,
) -> Result<(Vec<ReviewThread>, bool), ServiceError> {
    let review_threads = response
        .pointer("/data/repository/pullRequest/reviewThreads")
        .ok_or_else(|| {
            ServiceError::Malformed(format!("no review thread data returned for PR #{pr_number}"))
        })?;
    let nodes = review_threads
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ServiceError::Malformed(format!("no review thread data returned for PR #{pr_number}"))
        })?;

    let threads = nodes
        .iter()
        .filter_map(ReviewThread::from_graphql_node)
        .collect();
    let truncated = review_threads
        .pointer("/pageInfo/hasNextPage")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok((threads, truncated))
}

#[async_trait]
impl ThreadFetcher for FetchService {
    async fn fetch_unresolved_threads(
        &self,
        pr_number: u64,
    ) -> Result<Vec<ReviewThread>, ServiceError> {
        self.fetch_review_threads(pr_number, false).await
    }
}

/// Posts replies to review threads via the thread-reply mutation.
pub struct ReplyService {
    gh: Arc<GhClient>,
}

impl ReplyService {
    pub fn new(gh: Arc<GhClient>) -> Self {
        Self { gh }
    }
}

#[async_trait]
impl ThreadReplier for ReplyService {
    async fn post_reply(
        &self,
        thread_id: &str,
        body: &str,
    ) -> Result<ReplyOutcome, ServiceError> {
        let variables = reply_variables(thread_id, body)?;
        let response = self
            .gh
            .graphql(thread_reply_mutation(), Some(&variables))
            .await
            .map_err(|e| classify_api_error(e, thread_id))?;

        let comment = response
            .pointer("/data/addPullRequestReviewThreadReply/comment")
            .filter(|c| !c.is_null())
            .ok_or_else(|| {
                ServiceError::Malformed("no comment data returned from reply mutation".into())
            })?;

        let outcome = ReplyOutcome {
            reply_id: str_field(comment, "id"),
            reply_url: str_field(comment, "url"),
            thread_id: thread_id.to_string(),
            created_at: str_field(comment, "createdAt"),
            author: comment
                .pointer("/author/login")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            body_preview: preview(body),
        };
        info!("Posted reply {} to thread {}", outcome.reply_id, thread_id);
        Ok(outcome)
    }
}

/// Resolves and unresolves review threads.
pub struct ResolveService {
    gh: Arc<GhClient>,
}

impl ResolveService {
    pub fn new(gh: Arc<GhClient>) -> Self {
        Self { gh }
    }

    async fn run_mutation(
        &self,
        thread_id: &str,
        action: &str,
        mutation: &str,
        response_key: &str,
    ) -> Result<ResolveOutcome, ServiceError> {
        let variables = thread_mutation_variables(thread_id)?;
        let response = self
            .gh
            .graphql(mutation, Some(&variables))
            .await
            .map_err(|e| classify_api_error(e, thread_id))?;

        let thread = response
            .pointer(&format!("/data/{response_key}/thread"))
            .filter(|t| !t.is_null())
            .ok_or_else(|| {
                warn!("No thread data returned while trying to {action} {thread_id}");
                ServiceError::Malformed(format!(
                    "no thread data returned from {action} mutation"
                ))
            })?;

        info!("Thread {} {}d", thread_id, action);
        Ok(ResolveOutcome {
            thread_id: thread_id.to_string(),
            action: action.to_string(),
            success: true,
            is_resolved: thread
                .get("isResolved")
                .and_then(Value::as_bool)
                .unwrap_or(action == "resolve"),
            thread_url: str_field(thread, "url"),
        })
    }
}

#[async_trait]
impl ThreadResolver for ResolveService {
    async fn resolve_thread(&self, thread_id: &str) -> Result<ResolveOutcome, ServiceError> {
        self.run_mutation(
            thread_id,
            "resolve",
            resolve_thread_mutation(),
            "resolveReviewThread",
        )
        .await
    }

    async fn unresolve_thread(&self, thread_id: &str) -> Result<ResolveOutcome, ServiceError> {
        self.run_mutation(
            thread_id,
            "unresolve",
            unresolve_thread_mutation(),
            "unresolveReviewThread",
        )
        .await
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(nodes: Value, has_next_page: bool) -> Value {
        json!({
            "data": {
                "repository": {
                    "pullRequest": {
                        "reviewThreads": {
                            "pageInfo": { "hasNextPage": has_next_page, "endCursor": "abc" },
                            "nodes": nodes,
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_extract_threads_reports_truncation() {
        let nodes = json!([{ "id": "PRRT_kwDOABcd12M5" }]);
        let (threads, truncated) = extract_threads(&response(nodes, true), 7).unwrap();
        assert_eq!(threads.len(), 1);
        assert!(truncated);

        let nodes = json!([{ "id": "PRRT_kwDOABcd12M5" }]);
        let (_, truncated) = extract_threads(&response(nodes, false), 7).unwrap();
        assert!(!truncated);
    }

    #[test]
    fn test_extract_threads_missing_data() {
        let err = extract_threads(&json!({"data": {"repository": null}}), 7).unwrap_err();
        assert!(matches!(err, ServiceError::Malformed(_)));
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify_api_error(
            GhError::Api("GraphQL query failed: Could not resolve; thread not found".into()),
            "PRT_abc12345",
        );
        assert!(matches!(err, ServiceError::ThreadNotFound(id) if id == "PRT_abc12345"));
    }

    #[test]
    fn test_classify_permission_denied() {
        let err = classify_api_error(
            GhError::Api("Resource not accessible by integration".into()),
            "PRT_abc12345",
        );
        assert!(matches!(err, ServiceError::PermissionDenied(_)));
    }

    #[test]
    fn test_classify_passthrough() {
        let err = classify_api_error(GhError::Timeout(30), "PRT_abc12345");
        assert!(matches!(err, ServiceError::Gh(GhError::Timeout(30))));
    }
}
