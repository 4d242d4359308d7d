//! GraphQL document construction for the GitHub API.
//!
//! Queries and mutations are rendered as strings and executed through
//! [`crate::github::GhClient::graphql`].

use serde_json::{json, Value};
use thiserror::Error;

use crate::node_id::{validate_thread_id, NodeIdError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryBuildError {
    #[error("thread limit must be between 1 and 100, got {0}")]
    InvalidLimit(usize),
    #[error("comment limit must be between 1 and 50, got {0}")]
    InvalidCommentLimit(usize),
    #[error(transparent)]
    NodeId(#[from] NodeIdError),
}

/// Builder for the review-threads query on a pull request.
#[derive(Debug, Clone)]
pub struct ReviewThreadsQuery {
    limit: usize,
    comment_limit: usize,
    include_resolved: bool,
}

impl Default for ReviewThreadsQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl ReviewThreadsQuery {
    pub fn new() -> Self {
        Self {
            limit: 100,
            comment_limit: 10,
            include_resolved: false,
        }
    }

    pub fn limit(mut self, limit: usize) -> Result<Self, QueryBuildError> {
        if !(1..=100).contains(&limit) {
            return Err(QueryBuildError::InvalidLimit(limit));
        }
        self.limit = limit;
        Ok(self)
    }

    pub fn comment_limit(mut self, limit: usize) -> Result<Self, QueryBuildError> {
        if !(1..=50).contains(&limit) {
            return Err(QueryBuildError::InvalidCommentLimit(limit));
        }
        self.comment_limit = limit;
        Ok(self)
    }

    pub fn include_resolved(mut self, include: bool) -> Self {
        self.include_resolved = include;
        self
    }

    /// The GitHub API has no server-side resolved filter on reviewThreads,
    /// so resolved threads must be filtered out of the response.
    pub fn filters_resolved(&self) -> bool {
        !self.include_resolved
    }

    pub fn render(&self) -> String {
        format!(
            r#"query($owner: String!, $repo: String!, $number: Int!) {{
  repository(owner: $owner, name: $repo) {{
    pullRequest(number: $number) {{
      id
      number
      title
      url
      reviewThreads(first: {limit}) {{
        pageInfo {{
          hasNextPage
          endCursor
        }}
        nodes {{
          id
          isResolved
          isOutdated
          line
          path
          comments(first: {comment_limit}) {{
            nodes {{
              id
              body
              createdAt
              author {{
                login
              }}
              url
            }}
          }}
        }}
      }}
    }}
  }}
}}"#,
            limit = self.limit,
            comment_limit = self.comment_limit,
        )
    }

    pub fn variables(&self, owner: &str, repo: &str, pr_number: u64) -> Value {
        json!({
            "owner": owner,
            "repo": repo,
            "number": pr_number,
        })
    }
}

pub fn resolve_thread_mutation() -> &'static str {
    r#"mutation ResolveReviewThread($threadId: ID!) {
  resolveReviewThread(input: {threadId: $threadId}) {
    thread {
      id
      isResolved
      url
    }
  }
}"#
}

pub fn unresolve_thread_mutation() -> &'static str {
    r#"mutation UnresolveReviewThread($threadId: ID!) {
  unresolveReviewThread(input: {threadId: $threadId}) {
    thread {
      id
      isResolved
      url
    }
  }
}"#
}

pub fn thread_reply_mutation() -> &'static str {
    r#"mutation AddThreadReply($threadId: ID!, $body: String!) {
  addPullRequestReviewThreadReply(input: {pullRequestReviewThreadId: $threadId, body: $body}) {
    comment {
      id
      body
      createdAt
      url
      author {
        login
      }
    }
  }
}"#
}

/// Variables for the resolve/unresolve mutations. Validates the thread ID.
pub fn thread_mutation_variables(thread_id: &str) -> Result<Value, QueryBuildError> {
    validate_thread_id(thread_id)?;
    Ok(json!({ "threadId": thread_id }))
}

/// Variables for the thread-reply mutation. Validates the thread ID.
pub fn reply_variables(thread_id: &str, body: &str) -> Result<Value, QueryBuildError> {
    validate_thread_id(thread_id)?;
    Ok(json!({ "threadId": thread_id, "body": body }))
}
