use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A review thread on a pull request, as returned by the fetch service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewThread {
    pub thread_id: String,
    pub is_resolved: bool,
    pub is_outdated: bool,
    pub path: Option<String>,
    pub line: Option<u64>,
    /// Author of the first comment in the thread.
    pub author: Option<String>,
    /// First 100 characters of the first comment.
    pub body_preview: Option<String>,
    pub url: Option<String>,
}

impl ReviewThread {
    /// Build a thread from a `reviewThreads.nodes[]` entry of the GraphQL
    /// response. Returns None if the node has no ID.
    pub fn from_graphql_node(node: &Value) -> Option<Self> {
        let thread_id = node.get("id")?.as_str()?.to_string();
        let first_comment = node
            .pointer("/comments/nodes")
            .and_then(Value::as_array)
            .and_then(|nodes| nodes.first());

        Some(Self {
            thread_id,
            is_resolved: node
                .get("isResolved")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            is_outdated: node
                .get("isOutdated")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            path: node.get("path").and_then(Value::as_str).map(str::to_string),
            line: node.get("line").and_then(Value::as_u64),
            author: first_comment
                .and_then(|c| c.pointer("/author/login"))
                .and_then(Value::as_str)
                .map(str::to_string),
            body_preview: first_comment
                .and_then(|c| c.get("body"))
                .and_then(Value::as_str)
                .map(preview),
            url: first_comment
                .and_then(|c| c.get("url"))
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// Result of posting a reply to a review thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyOutcome {
    pub reply_id: String,
    pub reply_url: String,
    pub thread_id: String,
    pub created_at: String,
    pub author: String,
    pub body_preview: String,
}

/// Result of resolving or unresolving a review thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveOutcome {
    pub thread_id: String,
    /// "resolve" or "unresolve".
    pub action: String,
    pub success: bool,
    pub is_resolved: bool,
    pub thread_url: String,
}

/// First 100 characters of a comment body, with an ellipsis when truncated.
pub fn preview(body: &str) -> String {
    let mut out: String = body.chars().take(100).collect();
    if body.chars().count() > 100 {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_graphql_node() {
        let node = json!({
            "id": "PRRT_kwDOABcd12M5MTg3",
            "isResolved": false,
            "isOutdated": true,
            "path": "src/lib.rs",
            "line": 42,
            "comments": {
                "nodes": [
                    {
                        "id": "PRRC_kwDOABcd12M5",
                        "body": "Please rename this variable",
                        "author": { "login": "octocat" },
                        "url": "https://github.com/o/r/pull/1#discussion_r1"
                    }
                ]
            }
        });

        let thread = ReviewThread::from_graphql_node(&node).unwrap();
        assert_eq!(thread.thread_id, "PRRT_kwDOABcd12M5MTg3");
        assert!(!thread.is_resolved);
        assert!(thread.is_outdated);
        assert_eq!(thread.path.as_deref(), Some("src/lib.rs"));
        assert_eq!(thread.line, Some(42));
        assert_eq!(thread.author.as_deref(), Some("octocat"));
        assert_eq!(
            thread.body_preview.as_deref(),
            Some("Please rename this variable")
        );
    }

    #[test]
    fn test_from_graphql_node_missing_id() {
        assert!(ReviewThread::from_graphql_node(&json!({"isResolved": true})).is_none());
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(150);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 103);
        assert!(p.ends_with("..."));
        assert_eq!(preview("short"), "short");
    }
}
