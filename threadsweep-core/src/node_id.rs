//! Validation for GitHub GraphQL node IDs.
//!
//! Node IDs are base64-like strings with a prefix identifying the entity
//! type (e.g. `PRRT_kwDOAbc123` for a review thread). Legacy numeric IDs
//! are also accepted where the REST API used them.

use thiserror::Error;

const MIN_SUFFIX_LEN: usize = 5;
const MAX_SUFFIX_LEN: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeIdError {
    #[error("ID must not be empty")]
    Empty,
    #[error("unrecognized node ID prefix in '{0}' (expected a thread ID like PRT_/PRRT_/RT_ or a numeric ID)")]
    UnknownPrefix(String),
    #[error("node ID '{0}' contains invalid characters")]
    InvalidCharacters(String),
    #[error("node ID '{0}' has an invalid length (suffix must be {MIN_SUFFIX_LEN}-{MAX_SUFFIX_LEN} characters)")]
    InvalidLength(String),
    #[error("'{id}' is a {found} ID, but a {expected} ID is required")]
    WrongKind {
        id: String,
        found: &'static str,
        expected: &'static str,
    },
}

/// Entity types distinguishable by node ID prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    IssueComment,
    ReviewComment,
    Thread,
    ReviewThread,
    LegacyReviewThread,
    Review,
    PullRequest,
    /// Plain numeric ID from the REST API era.
    Numeric,
}

impl EntityKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::IssueComment => "IC_",
            EntityKind::ReviewComment => "PRRC_",
            EntityKind::Thread => "PRT_",
            EntityKind::ReviewThread => "PRRT_",
            EntityKind::LegacyReviewThread => "RT_",
            EntityKind::Review => "PRR_",
            EntityKind::PullRequest => "PR_",
            EntityKind::Numeric => "",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            EntityKind::IssueComment => "issue comment",
            EntityKind::ReviewComment => "review comment",
            EntityKind::Thread | EntityKind::ReviewThread | EntityKind::LegacyReviewThread => {
                "review thread"
            }
            EntityKind::Review => "review",
            EntityKind::PullRequest => "pull request",
            EntityKind::Numeric => "numeric",
        }
    }

    pub fn is_thread(&self) -> bool {
        matches!(
            self,
            EntityKind::Thread | EntityKind::ReviewThread | EntityKind::LegacyReviewThread
        )
    }
}

// Longest prefixes first so PRRT_ is not mistaken for PR_.
const PREFIXED_KINDS: [EntityKind; 7] = [
    EntityKind::ReviewComment,
    EntityKind::ReviewThread,
    EntityKind::Review,
    EntityKind::Thread,
    EntityKind::IssueComment,
    EntityKind::LegacyReviewThread,
    EntityKind::PullRequest,
];

fn valid_suffix_chars(suffix: &str) -> bool {
    suffix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '-'))
}

/// Classify an ID by prefix and validate its format.
pub fn classify(id: &str) -> Result<EntityKind, NodeIdError> {
    if id.is_empty() {
        return Err(NodeIdError::Empty);
    }

    if id.chars().all(|c| c.is_ascii_digit()) {
        return Ok(EntityKind::Numeric);
    }

    for kind in PREFIXED_KINDS {
        if let Some(suffix) = id.strip_prefix(kind.prefix()) {
            if !(MIN_SUFFIX_LEN..=MAX_SUFFIX_LEN).contains(&suffix.len()) {
                return Err(NodeIdError::InvalidLength(id.to_string()));
            }
            if !valid_suffix_chars(suffix) {
                return Err(NodeIdError::InvalidCharacters(id.to_string()));
            }
            return Ok(kind);
        }
    }

    Err(NodeIdError::UnknownPrefix(id.to_string()))
}

/// Validate that `id` identifies a review thread (or is a legacy numeric ID).
pub fn validate_thread_id(id: &str) -> Result<EntityKind, NodeIdError> {
    let kind = classify(id)?;
    if kind.is_thread() || kind == EntityKind::Numeric {
        Ok(kind)
    } else {
        Err(NodeIdError::WrongKind {
            id: id.to_string(),
            found: kind.describe(),
            expected: "review thread",
        })
    }
}
