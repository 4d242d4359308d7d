//! Bulk "reply then resolve" across the review threads of a pull request.
//!
//! The coordinator turns a sequence of independent remote calls into one
//! unit of work: in atomic mode the first failure aborts the transaction
//! and rolls back every prior success; in non-atomic mode each item stands
//! alone and the batch always completes. Remote failures are reported as
//! per-item outcomes, not errors; [`BulkOperationError`] is reserved for
//! upfront validation, target resolution, and contract violations.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{preview, ReplyOutcome, ResolveOutcome, ReviewThread};
use crate::rollback::default_rollback_handlers;
use crate::services::{ServiceError, ThreadFetcher, ThreadReplier, ThreadResolver};
use crate::transaction::{
    AuditReport, Metadata, OperationKind, RollbackStrategy, TransactionError, TransactionHandle,
    TransactionManager, TransactionManagerConfig, TransactionStatus,
};

const ROLLED_BACK_ERROR: &str = "Rolled back due to atomic failure";
const NOT_ATTEMPTED_ERROR: &str = "Not attempted due to atomic failure";

/// One bulk request: which PR, what to post, and how strictly to treat
/// failures.
#[derive(Debug, Clone)]
pub struct BulkRequest {
    pub pr_number: u64,
    pub message: String,
    /// Specific threads to target; `None` means every unresolved thread.
    pub thread_ids: Option<Vec<String>>,
    pub atomic: bool,
    pub dry_run: bool,
    pub rollback_strategy: Option<RollbackStrategy>,
    pub include_audit_report: bool,
}

impl BulkRequest {
    pub fn new(pr_number: u64, message: impl Into<String>) -> Self {
        Self {
            pr_number,
            message: message.into(),
            thread_ids: None,
            atomic: true,
            dry_run: false,
            rollback_strategy: None,
            include_audit_report: false,
        }
    }
}

/// Internal per-item descriptor, fixed before any remote call is made.
#[derive(Debug, Clone)]
struct BulkOperation {
    operation_id: String,
    thread_id: String,
}

/// Outcome of one reply-then-resolve item.
#[derive(Debug, Clone, Serialize)]
pub struct BulkOperationResult {
    pub operation_id: String,
    pub thread_id: String,
    pub success: bool,
    pub reply_result: Option<ReplyOutcome>,
    pub resolve_result: Option<ResolveOutcome>,
    pub error: Option<String>,
    pub rollback_attempted: bool,
    pub rollback_success: bool,
}

impl BulkOperationResult {
    fn pending(operation: &BulkOperation) -> Self {
        Self {
            operation_id: operation.operation_id.clone(),
            thread_id: operation.thread_id.clone(),
            success: false,
            reply_result: None,
            resolve_result: None,
            error: None,
            rollback_attempted: false,
            rollback_success: false,
        }
    }
}

/// Aggregate report for one bulk run. Either every field describes a
/// completed batch or the call returned an error; callers never see a
/// half-populated summary.
#[derive(Debug, Clone, Serialize)]
pub struct BulkOperationSummary {
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub results: Vec<BulkOperationResult>,
    pub atomic_failure: bool,
    pub rollback_performed: bool,
    pub transaction_id: Option<Uuid>,
    pub transaction_status: Option<TransactionStatus>,
    pub checkpoints_created: usize,
    pub audit_report: Option<AuditReport>,
}

impl BulkOperationSummary {
    fn empty() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            results: Vec::new(),
            atomic_failure: false,
            rollback_performed: false,
            transaction_id: None,
            transaction_status: None,
            checkpoints_created: 0,
            audit_report: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BulkOperationError {
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },
    #[error("thread IDs not found among unresolved threads: {missing:?}")]
    ThreadsNotFound { missing: Vec<String> },
    #[error("failed to fetch target threads: {0}")]
    Fetch(#[source] ServiceError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(
        "bulk operation failed after {completed_operations} completed operations \
         (transaction {transaction_id}): {message}"
    )]
    Orchestration {
        transaction_id: Uuid,
        completed_operations: usize,
        message: String,
    },
}

fn validation(field: impl Into<String>, message: impl Into<String>) -> BulkOperationError {
    BulkOperationError::Validation {
        field: field.into(),
        message: message.into(),
    }
}

/// Drives bulk reply-and-resolve runs over the three collaborator
/// contracts, recording every remote effect in a [`TransactionManager`].
pub struct BulkOperationCoordinator {
    fetcher: Arc<dyn ThreadFetcher>,
    replier: Arc<dyn ThreadReplier>,
    resolver: Arc<dyn ThreadResolver>,
    manager: TransactionManager,
    checkpoint_interval: usize,
}

impl BulkOperationCoordinator {
    pub fn new(
        fetcher: Arc<dyn ThreadFetcher>,
        replier: Arc<dyn ThreadReplier>,
        resolver: Arc<dyn ThreadResolver>,
    ) -> Self {
        Self::with_config(
            fetcher,
            replier,
            resolver,
            TransactionManagerConfig::default(),
            10,
        )
    }

    pub fn with_config(
        fetcher: Arc<dyn ThreadFetcher>,
        replier: Arc<dyn ThreadReplier>,
        resolver: Arc<dyn ThreadResolver>,
        config: TransactionManagerConfig,
        checkpoint_interval: usize,
    ) -> Self {
        let manager =
            TransactionManager::with_config(default_rollback_handlers(resolver.clone()), config);
        Self {
            fetcher,
            replier,
            resolver,
            manager,
            checkpoint_interval: checkpoint_interval.max(1),
        }
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// Reply to and resolve each target thread of the request.
    pub async fn bulk_reply_and_resolve(
        &mut self,
        request: &BulkRequest,
    ) -> Result<BulkOperationSummary, BulkOperationError> {
        validate_request(request)?;

        let targets = self.resolve_targets(request).await?;
        if targets.is_empty() {
            info!("No target threads for PR #{}; nothing to do", request.pr_number);
            return Ok(BulkOperationSummary::empty());
        }

        let operations: Vec<BulkOperation> = targets
            .iter()
            .enumerate()
            .map(|(i, thread)| BulkOperation {
                operation_id: format!("bulk_op_{i:03}"),
                thread_id: thread.thread_id.clone(),
            })
            .collect();

        if request.dry_run {
            return Ok(dry_run_summary(&operations));
        }

        let mut metadata = Metadata::new();
        metadata.insert("pr_number".into(), request.pr_number.into());
        metadata.insert("thread_count".into(), operations.len().into());
        metadata.insert("atomic".into(), request.atomic.into());
        metadata.insert("message_preview".into(), preview(&request.message).into());
        let handle = self.manager.begin(request.rollback_strategy, metadata)?;

        let mut summary = if request.atomic {
            self.run_atomic(&handle, &operations, request).await?
        } else {
            self.run_non_atomic(&handle, &operations, request).await?
        };

        summary.transaction_id = Some(handle.id());
        summary.transaction_status = self.status_of(handle.id());
        if request.include_audit_report {
            summary.audit_report = Some(self.manager.generate_audit_report(Some(handle.id()))?);
        }
        Ok(summary)
    }

    /// Fetch the unresolved threads and narrow them to the requested IDs,
    /// preserving fetch order. Requested IDs that are not among the
    /// unresolved threads fail the whole request before any mutation.
    async fn resolve_targets(
        &self,
        request: &BulkRequest,
    ) -> Result<Vec<ReviewThread>, BulkOperationError> {
        let all_threads = self
            .fetcher
            .fetch_unresolved_threads(request.pr_number)
            .await
            .map_err(BulkOperationError::Fetch)?;

        let Some(ids) = &request.thread_ids else {
            return Ok(all_threads);
        };

        let mut wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let targets: Vec<ReviewThread> = all_threads
            .into_iter()
            .filter(|thread| wanted.remove(thread.thread_id.as_str()))
            .collect();

        if !wanted.is_empty() {
            let mut missing: Vec<String> = wanted.into_iter().map(str::to_string).collect();
            missing.sort();
            return Err(BulkOperationError::ThreadsNotFound { missing });
        }
        Ok(targets)
    }

    async fn run_atomic(
        &mut self,
        handle: &TransactionHandle,
        operations: &[BulkOperation],
        request: &BulkRequest,
    ) -> Result<BulkOperationSummary, BulkOperationError> {
        let mut checkpoints_created = self.initial_checkpoint(handle)?;
        let mut successes: Vec<BulkOperationResult> = Vec::new();
        let mut failed: Option<BulkOperationResult> = None;
        let mut next_index = operations.len();

        for (index, operation) in operations.iter().enumerate() {
            match self.execute_single(handle, operation, &request.message).await {
                Ok(result) if result.success => {
                    successes.push(result);
                    checkpoints_created +=
                        self.interval_checkpoint(handle, successes.len())?;
                }
                Ok(result) => {
                    failed = Some(result);
                    next_index = index + 1;
                    break;
                }
                Err(err) => return Err(self.orchestration_failure(handle, &successes, err).await),
            }
        }

        let Some(failed) = failed else {
            // Every item succeeded.
            self.manager.commit_transaction(handle)?;
            let total = successes.len();
            return Ok(BulkOperationSummary {
                total_operations: total,
                successful_operations: total,
                failed_operations: 0,
                results: successes,
                checkpoints_created,
                ..BulkOperationSummary::empty()
            });
        };

        warn!(
            "Atomic failure on {}; rolling back {} completed operations",
            failed.operation_id,
            successes.len()
        );
        self.manager
            .abort_transaction(handle, Some(&format!("{} failed atomically", failed.operation_id)))
            .await?;

        // Per-thread rollback outcomes come from the resolve records of the
        // aborted transaction; posted replies are never compensable.
        let resolve_rollbacks: HashMap<String, bool> = self
            .status_transaction(handle.id())
            .map(|tx| {
                tx.operations
                    .iter()
                    .filter(|op| op.kind == OperationKind::ThreadResolve)
                    .map(|op| (op.thread_id.clone(), op.rollback_success))
                    .collect()
            })
            .unwrap_or_default();

        let mut results = successes;
        for result in &mut results {
            result.success = false;
            result.error = Some(ROLLED_BACK_ERROR.to_string());
            result.rollback_attempted = true;
            result.rollback_success = resolve_rollbacks
                .get(&result.thread_id)
                .copied()
                .unwrap_or(false);
        }
        results.push(failed);
        for operation in &operations[next_index..] {
            let mut skipped = BulkOperationResult::pending(operation);
            skipped.error = Some(NOT_ATTEMPTED_ERROR.to_string());
            results.push(skipped);
        }

        Ok(BulkOperationSummary {
            total_operations: operations.len(),
            successful_operations: 0,
            failed_operations: operations.len(),
            results,
            atomic_failure: true,
            rollback_performed: true,
            checkpoints_created,
            ..BulkOperationSummary::empty()
        })
    }

    async fn run_non_atomic(
        &mut self,
        handle: &TransactionHandle,
        operations: &[BulkOperation],
        request: &BulkRequest,
    ) -> Result<BulkOperationSummary, BulkOperationError> {
        let mut checkpoints_created = self.initial_checkpoint(handle)?;
        let mut results: Vec<BulkOperationResult> = Vec::new();
        let mut successful = 0usize;

        for operation in operations {
            match self.execute_single(handle, operation, &request.message).await {
                Ok(result) => {
                    if result.success {
                        successful += 1;
                        checkpoints_created += self.interval_checkpoint(handle, successful)?;
                    }
                    results.push(result);
                }
                Err(err) => return Err(self.orchestration_failure(handle, &results, err).await),
            }
        }

        // The batch completed; individual failures stay per-item.
        self.manager.commit_transaction(handle)?;
        Ok(BulkOperationSummary {
            total_operations: operations.len(),
            successful_operations: successful,
            failed_operations: operations.len() - successful,
            results,
            checkpoints_created,
            ..BulkOperationSummary::empty()
        })
    }

    /// Post the reply, then resolve the thread, recording each remote
    /// effect separately so a failure between the two leaves an auditable
    /// partial state. Remote failures become a failed result; only
    /// transaction misuse surfaces as an error.
    async fn execute_single(
        &mut self,
        handle: &TransactionHandle,
        operation: &BulkOperation,
        message: &str,
    ) -> Result<BulkOperationResult, TransactionError> {
        let mut result = BulkOperationResult::pending(operation);

        let reply = match self.replier.post_reply(&operation.thread_id, message).await {
            Ok(reply) => reply,
            Err(err) => {
                result.error = Some(err.to_string());
                return Ok(result);
            }
        };
        self.manager.record_operation(
            handle,
            OperationKind::ReplyPost,
            &operation.thread_id,
            serde_json::json!({ "reply_url": reply.reply_url }),
            Some(serde_json::json!({ "reply_id": reply.reply_id })),
        )?;
        result.reply_result = Some(reply);

        let resolve = match self.resolver.resolve_thread(&operation.thread_id).await {
            Ok(resolve) => resolve,
            Err(err) => {
                result.error = Some(err.to_string());
                return Ok(result);
            }
        };
        self.manager.record_operation(
            handle,
            OperationKind::ThreadResolve,
            &operation.thread_id,
            serde_json::json!({ "thread_url": resolve.thread_url }),
            None,
        )?;
        result.resolve_result = Some(resolve);
        result.success = true;
        Ok(result)
    }

    fn initial_checkpoint(
        &mut self,
        handle: &TransactionHandle,
    ) -> Result<usize, TransactionError> {
        if !self.manager.checkpoints_enabled() {
            return Ok(0);
        }
        self.manager
            .create_checkpoint(handle, "bulk operation start", None)?;
        Ok(1)
    }

    /// Checkpoint every `checkpoint_interval` successful items.
    fn interval_checkpoint(
        &mut self,
        handle: &TransactionHandle,
        successful_so_far: usize,
    ) -> Result<usize, TransactionError> {
        if !self.manager.checkpoints_enabled()
            || successful_so_far % self.checkpoint_interval != 0
        {
            return Ok(0);
        }
        self.manager.create_checkpoint(
            handle,
            &format!("after {successful_so_far} successful operations"),
            None,
        )?;
        Ok(1)
    }

    /// Best-effort abort, then wrap the contract violation with enough
    /// context to diagnose how far the batch got.
    async fn orchestration_failure(
        &mut self,
        handle: &TransactionHandle,
        completed: &[BulkOperationResult],
        err: TransactionError,
    ) -> BulkOperationError {
        let message = err.to_string();
        if let Err(abort_err) = self
            .manager
            .abort_transaction(handle, Some(&message))
            .await
        {
            warn!("Abort after orchestration failure also failed: {abort_err}");
        }
        BulkOperationError::Orchestration {
            transaction_id: handle.id(),
            completed_operations: completed.len(),
            message,
        }
    }

    fn status_transaction(&self, id: Uuid) -> Option<&crate::transaction::Transaction> {
        self.manager
            .current_transaction()
            .into_iter()
            .chain(self.manager.history().iter().rev())
            .find(|tx| tx.transaction_id == id)
    }

    fn status_of(&self, id: Uuid) -> Option<TransactionStatus> {
        self.status_transaction(id).map(|tx| tx.status)
    }
}

fn validate_request(request: &BulkRequest) -> Result<(), BulkOperationError> {
    if request.pr_number == 0 {
        return Err(validation("pr_number", "PR number must be positive"));
    }
    if request.message.trim().is_empty() {
        return Err(validation("message", "reply message must not be empty"));
    }
    if let Some(ids) = &request.thread_ids {
        for (i, id) in ids.iter().enumerate() {
            if id.trim().is_empty() {
                return Err(validation(
                    format!("thread_ids[{i}]"),
                    "thread ID must not be empty",
                ));
            }
        }
    }
    Ok(())
}

/// Simulated run: every target reported successful, no remote mutations,
/// no transaction.
fn dry_run_summary(operations: &[BulkOperation]) -> BulkOperationSummary {
    let results: Vec<BulkOperationResult> = operations
        .iter()
        .map(|operation| BulkOperationResult {
            success: true,
            ..BulkOperationResult::pending(operation)
        })
        .collect();
    BulkOperationSummary {
        total_operations: operations.len(),
        successful_operations: operations.len(),
        failed_operations: 0,
        results,
        ..BulkOperationSummary::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn thread(id: &str) -> ReviewThread {
        ReviewThread {
            thread_id: id.to_string(),
            is_resolved: false,
            is_outdated: false,
            path: Some("src/lib.rs".to_string()),
            line: Some(10),
            author: Some("octocat".to_string()),
            body_preview: Some("please fix".to_string()),
            url: None,
        }
    }

    struct FakeFetcher {
        threads: Vec<ReviewThread>,
    }

    #[async_trait]
    impl ThreadFetcher for FakeFetcher {
        async fn fetch_unresolved_threads(
            &self,
            _pr_number: u64,
        ) -> Result<Vec<ReviewThread>, ServiceError> {
            Ok(self.threads.clone())
        }
    }

    struct FakeReplier {
        fail_for: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeReplier {
        fn new(fail_for: &[&str]) -> Self {
            Self {
                fail_for: fail_for.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ThreadReplier for FakeReplier {
        async fn post_reply(
            &self,
            thread_id: &str,
            body: &str,
        ) -> Result<ReplyOutcome, ServiceError> {
            self.calls.lock().unwrap().push(thread_id.to_string());
            if self.fail_for.iter().any(|id| id == thread_id) {
                return Err(ServiceError::Malformed(format!(
                    "reply to {thread_id} was rejected"
                )));
            }
            Ok(ReplyOutcome {
                reply_id: format!("PRRC_reply_{thread_id}"),
                reply_url: String::new(),
                thread_id: thread_id.to_string(),
                created_at: String::new(),
                author: "octocat".to_string(),
                body_preview: preview(body),
            })
        }
    }

    struct FakeResolver {
        fail_resolve_for: Vec<String>,
        fail_unresolve: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeResolver {
        fn new() -> Self {
            Self {
                fail_resolve_for: Vec::new(),
                fail_unresolve: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn outcome(&self, thread_id: &str, action: &str) -> ResolveOutcome {
            ResolveOutcome {
                thread_id: thread_id.to_string(),
                action: action.to_string(),
                success: true,
                is_resolved: action == "resolve",
                thread_url: String::new(),
            }
        }
    }

    #[async_trait]
    impl ThreadResolver for FakeResolver {
        async fn resolve_thread(&self, thread_id: &str) -> Result<ResolveOutcome, ServiceError> {
            self.calls.lock().unwrap().push(format!("resolve:{thread_id}"));
            if self.fail_resolve_for.iter().any(|id| id == thread_id) {
                return Err(ServiceError::ThreadNotFound(thread_id.to_string()));
            }
            Ok(self.outcome(thread_id, "resolve"))
        }

        async fn unresolve_thread(&self, thread_id: &str) -> Result<ResolveOutcome, ServiceError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("unresolve:{thread_id}"));
            if self.fail_unresolve {
                return Err(ServiceError::PermissionDenied("no write access".into()));
            }
            Ok(self.outcome(thread_id, "unresolve"))
        }
    }

    struct Harness {
        coordinator: BulkOperationCoordinator,
        replier: Arc<FakeReplier>,
        resolver: Arc<FakeResolver>,
    }

    fn harness(threads: &[&str], replier: FakeReplier, resolver: FakeResolver) -> Harness {
        harness_with(threads, replier, resolver, TransactionManagerConfig::default(), 10)
    }

    fn harness_with(
        threads: &[&str],
        replier: FakeReplier,
        resolver: FakeResolver,
        config: TransactionManagerConfig,
        checkpoint_interval: usize,
    ) -> Harness {
        let replier = Arc::new(replier);
        let resolver = Arc::new(resolver);
        let fetcher = Arc::new(FakeFetcher {
            threads: threads.iter().map(|id| thread(id)).collect(),
        });
        let coordinator = BulkOperationCoordinator::with_config(
            fetcher,
            replier.clone(),
            resolver.clone(),
            config,
            checkpoint_interval,
        );
        Harness {
            coordinator,
            replier,
            resolver,
        }
    }

    #[tokio::test]
    async fn test_atomic_first_failure_rolls_back_everything() {
        // Three targets; the second reply is rejected.
        let mut h = harness(
            &["t1", "t2", "t3"],
            FakeReplier::new(&["t2"]),
            FakeResolver::new(),
        );
        let request = BulkRequest::new(7, "Fixed in latest commit");
        let summary = h.coordinator.bulk_reply_and_resolve(&request).await.unwrap();

        assert_eq!(summary.total_operations, 3);
        assert_eq!(summary.successful_operations, 0);
        assert_eq!(summary.failed_operations, 3);
        assert!(summary.atomic_failure);
        assert!(summary.rollback_performed);

        assert_eq!(summary.results[0].error.as_deref(), Some(ROLLED_BACK_ERROR));
        assert!(summary.results[0].rollback_attempted);
        assert!(summary.results[0].rollback_success);
        assert!(summary.results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("reply to t2 was rejected"));
        assert_eq!(
            summary.results[2].error.as_deref(),
            Some(NOT_ATTEMPTED_ERROR)
        );

        // t1 was resolved and then unresolved during rollback; t3 untouched.
        let calls = h.resolver.calls.lock().unwrap();
        assert_eq!(*calls, vec!["resolve:t1", "unresolve:t1"]);
        assert_eq!(*h.replier.calls.lock().unwrap(), vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_atomic_rollback_failure_is_reported_per_item() {
        let resolver = FakeResolver {
            fail_unresolve: true,
            ..FakeResolver::new()
        };
        let mut h = harness(&["t1", "t2"], FakeReplier::new(&["t2"]), resolver);
        let summary = h
            .coordinator
            .bulk_reply_and_resolve(&BulkRequest::new(7, "done"))
            .await
            .unwrap();

        assert!(summary.atomic_failure);
        assert!(summary.results[0].rollback_attempted);
        assert!(!summary.results[0].rollback_success);
        assert_eq!(summary.transaction_status, Some(TransactionStatus::Failed));
    }

    #[tokio::test]
    async fn test_atomic_all_success_commits() {
        let mut h = harness(
            &["t1", "t2"],
            FakeReplier::new(&[]),
            FakeResolver::new(),
        );
        let summary = h
            .coordinator
            .bulk_reply_and_resolve(&BulkRequest::new(7, "done"))
            .await
            .unwrap();

        assert_eq!(summary.successful_operations, 2);
        assert_eq!(summary.failed_operations, 0);
        assert!(!summary.atomic_failure);
        assert!(!summary.rollback_performed);
        assert_eq!(
            summary.transaction_status,
            Some(TransactionStatus::Committed)
        );
        assert!(summary.transaction_id.is_some());
        assert_eq!(summary.results[0].operation_id, "bulk_op_000");
        assert_eq!(summary.results[1].operation_id, "bulk_op_001");
    }

    #[tokio::test]
    async fn test_non_atomic_continues_past_failures() {
        let mut h = harness(
            &["t1", "t2", "t3"],
            FakeReplier::new(&["t2"]),
            FakeResolver::new(),
        );
        let mut request = BulkRequest::new(7, "done");
        request.atomic = false;
        let summary = h.coordinator.bulk_reply_and_resolve(&request).await.unwrap();

        assert_eq!(summary.total_operations, 3);
        assert_eq!(summary.successful_operations, 2);
        assert_eq!(summary.failed_operations, 1);
        assert!(!summary.atomic_failure);
        assert!(!summary.rollback_performed);
        assert_eq!(
            summary.transaction_status,
            Some(TransactionStatus::Committed)
        );
        // t3 still ran despite t2 failing.
        assert_eq!(*h.replier.calls.lock().unwrap(), vec!["t1", "t2", "t3"]);
        assert!(summary.results[2].success);
    }

    #[tokio::test]
    async fn test_empty_target_set_skips_transaction() {
        let mut h = harness(&[], FakeReplier::new(&[]), FakeResolver::new());
        let summary = h
            .coordinator
            .bulk_reply_and_resolve(&BulkRequest::new(7, "done"))
            .await
            .unwrap();

        assert_eq!(summary.total_operations, 0);
        assert!(summary.transaction_id.is_none());
        assert!(summary.transaction_status.is_none());
        assert!(h.coordinator.manager().history().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_cadence() {
        // Interval 2, 5 successful items: initial + after 2 + after 4.
        let mut h = harness_with(
            &["t1", "t2", "t3", "t4", "t5"],
            FakeReplier::new(&[]),
            FakeResolver::new(),
            TransactionManagerConfig::default(),
            2,
        );
        let mut request = BulkRequest::new(7, "done");
        request.atomic = false;
        let summary = h.coordinator.bulk_reply_and_resolve(&request).await.unwrap();

        assert_eq!(summary.checkpoints_created, 3);
        let tx = h.coordinator.manager().history().last().unwrap();
        assert_eq!(tx.checkpoints.len(), 3);
    }

    #[tokio::test]
    async fn test_checkpoints_disabled_skips_them() {
        let mut h = harness_with(
            &["t1", "t2"],
            FakeReplier::new(&[]),
            FakeResolver::new(),
            TransactionManagerConfig {
                enable_checkpoints: false,
                ..Default::default()
            },
            1,
        );
        let summary = h
            .coordinator
            .bulk_reply_and_resolve(&BulkRequest::new(7, "done"))
            .await
            .unwrap();
        assert_eq!(summary.checkpoints_created, 0);
        assert_eq!(summary.successful_operations, 2);
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_remote_calls() {
        let mut h = harness(
            &["t1", "t2"],
            FakeReplier::new(&[]),
            FakeResolver::new(),
        );
        let mut request = BulkRequest::new(7, "done");
        request.dry_run = true;
        let summary = h.coordinator.bulk_reply_and_resolve(&request).await.unwrap();

        assert_eq!(summary.successful_operations, 2);
        assert_eq!(summary.failed_operations, 0);
        assert!(summary.transaction_id.is_none());
        assert!(h.replier.calls.lock().unwrap().is_empty());
        assert!(h.resolver.calls.lock().unwrap().is_empty());
        assert!(h.coordinator.manager().history().is_empty());
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let mut h = harness(&["t1"], FakeReplier::new(&[]), FakeResolver::new());

        let err = h
            .coordinator
            .bulk_reply_and_resolve(&BulkRequest::new(0, "done"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BulkOperationError::Validation { ref field, .. } if field == "pr_number"
        ));

        let err = h
            .coordinator
            .bulk_reply_and_resolve(&BulkRequest::new(7, "   "))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BulkOperationError::Validation { ref field, .. } if field == "message"
        ));

        let mut request = BulkRequest::new(7, "done");
        request.thread_ids = Some(vec!["t1".to_string(), "".to_string()]);
        let err = h.coordinator.bulk_reply_and_resolve(&request).await.unwrap_err();
        assert!(matches!(
            err,
            BulkOperationError::Validation { ref field, .. } if field == "thread_ids[1]"
        ));
    }

    #[tokio::test]
    async fn test_missing_thread_ids_fail_loudly() {
        let mut h = harness(&["t1"], FakeReplier::new(&[]), FakeResolver::new());
        let mut request = BulkRequest::new(7, "done");
        request.thread_ids = Some(vec!["t1".to_string(), "t9".to_string()]);

        let err = h.coordinator.bulk_reply_and_resolve(&request).await.unwrap_err();
        assert!(matches!(
            err,
            BulkOperationError::ThreadsNotFound { ref missing } if missing == &["t9"]
        ));
        assert!(h.replier.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_ids_preserve_fetch_order() {
        let mut h = harness(
            &["t1", "t2", "t3"],
            FakeReplier::new(&[]),
            FakeResolver::new(),
        );
        let mut request = BulkRequest::new(7, "done");
        request.thread_ids = Some(vec!["t3".to_string(), "t1".to_string()]);
        let summary = h.coordinator.bulk_reply_and_resolve(&request).await.unwrap();

        let order: Vec<&str> = summary
            .results
            .iter()
            .map(|r| r.thread_id.as_str())
            .collect();
        assert_eq!(order, vec!["t1", "t3"]);
    }

    #[tokio::test]
    async fn test_resolve_failure_after_reply_keeps_reply_outcome() {
        let resolver = FakeResolver {
            fail_resolve_for: vec!["t1".to_string()],
            ..FakeResolver::new()
        };
        let mut h = harness(&["t1"], FakeReplier::new(&[]), resolver);
        let mut request = BulkRequest::new(7, "done");
        request.atomic = false;
        let summary = h.coordinator.bulk_reply_and_resolve(&request).await.unwrap();

        let result = &summary.results[0];
        assert!(!result.success);
        assert!(result.reply_result.is_some());
        assert!(result.resolve_result.is_none());
        assert!(result.error.as_deref().unwrap().contains("t1 not found"));

        // The reply was recorded even though the item failed.
        let tx = h.coordinator.manager().history().last().unwrap();
        assert_eq!(tx.operations.len(), 1);
        assert_eq!(tx.operations[0].kind, OperationKind::ReplyPost);
    }

    #[tokio::test]
    async fn test_audit_report_embedding() {
        let mut h = harness(&["t1", "t2"], FakeReplier::new(&[]), FakeResolver::new());
        let mut request = BulkRequest::new(7, "done");
        request.atomic = false;
        request.include_audit_report = true;
        let summary = h.coordinator.bulk_reply_and_resolve(&request).await.unwrap();

        let report = summary.audit_report.unwrap();
        assert_eq!(Some(report.transaction_id), summary.transaction_id);
        assert_eq!(report.status, TransactionStatus::Committed);
        // Two records per item: reply then resolve.
        assert_eq!(report.total_operations, 4);
        assert_eq!(report.operations_by_type["reply_post"], 2);
        assert_eq!(report.operations_by_type["thread_resolve"], 2);
        assert_eq!(report.metadata["pr_number"], serde_json::json!(7));
    }

    proptest! {
        #[test]
        fn prop_non_atomic_outcomes_partition(fail_mask in proptest::collection::vec(any::<bool>(), 1..8)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            runtime.block_on(async {
                let ids: Vec<String> = (0..fail_mask.len()).map(|i| format!("t{i}")).collect();
                let failing: Vec<&str> = ids
                    .iter()
                    .zip(&fail_mask)
                    .filter(|(_, fail)| **fail)
                    .map(|(id, _)| id.as_str())
                    .collect();
                let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

                let mut h = harness(&id_refs, FakeReplier::new(&failing), FakeResolver::new());
                let mut request = BulkRequest::new(7, "done");
                request.atomic = false;
                let summary = h.coordinator.bulk_reply_and_resolve(&request).await.unwrap();

                prop_assert_eq!(
                    summary.successful_operations + summary.failed_operations,
                    fail_mask.len()
                );
                prop_assert_eq!(summary.results.len(), fail_mask.len());
                // Every item was attempted regardless of earlier failures.
                prop_assert_eq!(h.replier.calls.lock().unwrap().len(), fail_mask.len());
                Ok(())
            })?;
        }
    }
}
