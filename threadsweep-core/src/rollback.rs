//! Compensation logic for recorded operations.
//!
//! Handlers are registered per [`OperationKind`] and invoked by the
//! transaction manager during a rollback sweep. A handler returns plain
//! booleans rather than errors: rollback already runs on a failure path,
//! and the sweep wants to continue past individual failures.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::services::ThreadResolver;
use crate::transaction::{HandlerRegistry, OperationKind, OperationRecord};

#[async_trait]
pub trait RollbackHandler: Send + Sync {
    /// Whether this record carries enough information to be compensated.
    fn can_rollback(&self, record: &OperationRecord) -> bool;

    /// Attempt the compensation. Returns whether it succeeded.
    async fn rollback(&self, record: &OperationRecord) -> bool;
}

/// Handler for posted replies. GitHub review-thread replies cannot be
/// deleted through the GraphQL API we drive, so this handler always
/// declines; the record stays in the audit trail as non-compensable.
pub struct ReplyRollbackHandler;

#[async_trait]
impl RollbackHandler for ReplyRollbackHandler {
    fn can_rollback(&self, _record: &OperationRecord) -> bool {
        false
    }

    async fn rollback(&self, record: &OperationRecord) -> bool {
        let reply_id = record
            .rollback_data
            .as_ref()
            .and_then(|d| d.get("reply_id"))
            .and_then(Value::as_str)
            .unwrap_or("<unknown>");
        warn!(
            "Reply {} on thread {} cannot be deleted; leaving it in place",
            reply_id, record.thread_id
        );
        false
    }
}

/// Handler for resolve/unresolve operations: performs the inverse call.
pub struct ResolveRollbackHandler {
    resolver: Arc<dyn ThreadResolver>,
}

impl ResolveRollbackHandler {
    pub fn new(resolver: Arc<dyn ThreadResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl RollbackHandler for ResolveRollbackHandler {
    fn can_rollback(&self, record: &OperationRecord) -> bool {
        matches!(
            record.kind,
            OperationKind::ThreadResolve | OperationKind::ThreadUnresolve
        )
    }

    async fn rollback(&self, record: &OperationRecord) -> bool {
        let result = match record.kind {
            OperationKind::ThreadResolve => {
                self.resolver.unresolve_thread(&record.thread_id).await
            }
            OperationKind::ThreadUnresolve => {
                self.resolver.resolve_thread(&record.thread_id).await
            }
            OperationKind::ReplyPost => return false,
        };

        match result {
            Ok(outcome) => {
                debug!(
                    "Reversed {} on thread {}",
                    record.kind.as_str(),
                    record.thread_id
                );
                outcome.success
            }
            Err(err) => {
                warn!(
                    "Failed to reverse {} on thread {}: {}",
                    record.kind.as_str(),
                    record.thread_id,
                    err
                );
                false
            }
        }
    }
}

/// Dispatches to the right handler for a record's kind; useful where a
/// single handler instance must cover several kinds.
pub struct CompositeRollbackHandler {
    reply: ReplyRollbackHandler,
    resolve: ResolveRollbackHandler,
}

impl CompositeRollbackHandler {
    pub fn new(resolver: Arc<dyn ThreadResolver>) -> Self {
        Self {
            reply: ReplyRollbackHandler,
            resolve: ResolveRollbackHandler::new(resolver),
        }
    }

    fn delegate(&self, record: &OperationRecord) -> &dyn RollbackHandler {
        match record.kind {
            OperationKind::ReplyPost => &self.reply,
            OperationKind::ThreadResolve | OperationKind::ThreadUnresolve => &self.resolve,
        }
    }
}

#[async_trait]
impl RollbackHandler for CompositeRollbackHandler {
    fn can_rollback(&self, record: &OperationRecord) -> bool {
        self.delegate(record).can_rollback(record)
    }

    async fn rollback(&self, record: &OperationRecord) -> bool {
        self.delegate(record).rollback(record).await
    }
}

/// The standard registry: replies are non-compensable, resolve and
/// unresolve are reversed through the given resolver.
pub fn default_rollback_handlers(resolver: Arc<dyn ThreadResolver>) -> HandlerRegistry {
    let mut handlers: HandlerRegistry = HashMap::new();
    handlers.insert(OperationKind::ReplyPost, Box::new(ReplyRollbackHandler));
    handlers.insert(
        OperationKind::ThreadResolve,
        Box::new(ResolveRollbackHandler::new(resolver.clone())),
    );
    handlers.insert(
        OperationKind::ThreadUnresolve,
        Box::new(ResolveRollbackHandler::new(resolver)),
    );
    handlers
}
