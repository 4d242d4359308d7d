//! In-memory transaction bookkeeping for bulk remote operations.
//!
//! A [`TransactionManager`] sequences remote side effects under a single
//! logical unit of work. It offers no distributed-transaction guarantees:
//! the remote system has no native transactions and some effects (posted
//! replies) cannot be undone, so rollback is best-effort compensation via
//! registered [`RollbackHandler`]s, with an audit trail of what was and
//! was not undone.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::rollback::RollbackHandler;

pub type Metadata = serde_json::Map<String, serde_json::Value>;
pub type HandlerRegistry = HashMap<OperationKind, Box<dyn RollbackHandler>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RolledBack => "rolled_back",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Active)
    }
}

/// The remote calls this system knows how to record (and maybe undo).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ReplyPost,
    ThreadResolve,
    ThreadUnresolve,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ReplyPost => "reply_post",
            OperationKind::ThreadResolve => "thread_resolve",
            OperationKind::ThreadUnresolve => "thread_unresolve",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStrategy {
    /// Abort performs a full rollback and propagates its result.
    Immediate,
    /// Abort attempts rollback but always completes; the return value alone
    /// signals whether compensation fully succeeded.
    BestEffort,
    /// Like Immediate; checkpoint-bounded rollback is additionally available
    /// through [`TransactionManager::rollback_to_checkpoint`].
    CheckpointBased,
}

impl RollbackStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollbackStrategy::Immediate => "immediate",
            RollbackStrategy::BestEffort => "best_effort",
            RollbackStrategy::CheckpointBased => "checkpoint_based",
        }
    }
}

/// Log entry for one successfully-performed remote call.
///
/// Records are append-only while the transaction is active; a rollback
/// attempt annotates them in place and is made at most once per record.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub timestamp: DateTime<Utc>,
    pub thread_id: String,
    /// What was done (opaque to the manager).
    pub data: serde_json::Value,
    /// What is needed to compensate, if anything.
    pub rollback_data: Option<serde_json::Value>,
    pub rollback_attempted: bool,
    pub rollback_success: bool,
    pub rollback_error: Option<String>,
}

/// A marker in the operation log, usable as a rollback boundary.
#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    pub checkpoint_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Number of operations that existed when the checkpoint was created.
    pub operation_count: usize,
    pub description: String,
    pub data: Option<serde_json::Value>,
}

/// Complete log of one transaction.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    pub operations: Vec<OperationRecord>,
    pub checkpoints: Vec<Checkpoint>,
    pub rollback_strategy: RollbackStrategy,
    pub metadata: Metadata,
    pub error_message: Option<String>,
    /// How many old records were dropped to honor the history bound.
    pub operations_trimmed: u64,
}

/// Proof that a transaction was begun; mutating calls must present it.
///
/// The handle ties call sites to a specific transaction instead of to
/// whatever happens to be active on the manager, so using a handle after
/// its transaction committed or aborted is an error rather than a silent
/// write into someone else's transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHandle {
    id: Uuid,
}

impl TransactionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("cannot begin new transaction: transaction {current} is already active")]
    AlreadyActive { current: Uuid },
    #[error("no active transaction")]
    NoActiveTransaction,
    #[error("transaction handle {presented} does not match the active transaction {active}")]
    StaleHandle { presented: Uuid, active: Uuid },
    #[error("transaction is no longer active (status: {})", .status.as_str())]
    NotActive { status: TransactionStatus },
    #[error("checkpoints are disabled")]
    CheckpointsDisabled,
    #[error("checkpoint {0} not found")]
    CheckpointNotFound(Uuid),
    #[error("transaction {0} not found")]
    TransactionNotFound(Uuid),
}

#[derive(Debug, Clone)]
pub struct TransactionManagerConfig {
    pub default_strategy: RollbackStrategy,
    pub enable_checkpoints: bool,
    /// Cap on the in-memory operation log. Oldest records are dropped past
    /// this point; the audit report exposes how many were lost.
    pub max_operation_history: usize,
    pub max_transaction_history: usize,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            default_strategy: RollbackStrategy::Immediate,
            enable_checkpoints: true,
            max_operation_history: 1000,
            max_transaction_history: 100,
        }
    }
}

/// Structured summary of a transaction's lifecycle and rollback outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub rollback_strategy: RollbackStrategy,
    pub total_operations: usize,
    pub total_checkpoints: usize,
    pub operations_by_type: BTreeMap<&'static str, usize>,
    pub rollback_attempts: usize,
    pub successful_rollbacks: usize,
    pub failed_rollbacks: usize,
    pub operations_trimmed: u64,
    pub error_message: Option<String>,
    pub metadata: Metadata,
}

/// Owns the lifecycle of at most one active transaction plus a bounded
/// history of completed ones.
pub struct TransactionManager {
    config: TransactionManagerConfig,
    handlers: HandlerRegistry,
    active: Option<Transaction>,
    history: Vec<Transaction>,
}

impl TransactionManager {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self::with_config(handlers, TransactionManagerConfig::default())
    }

    pub fn with_config(handlers: HandlerRegistry, config: TransactionManagerConfig) -> Self {
        Self {
            config,
            handlers,
            active: None,
            history: Vec::new(),
        }
    }

    pub fn checkpoints_enabled(&self) -> bool {
        self.config.enable_checkpoints
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Begin a new transaction. Fails if one is already active.
    pub fn begin(
        &mut self,
        rollback_strategy: Option<RollbackStrategy>,
        metadata: Metadata,
    ) -> Result<TransactionHandle, TransactionError> {
        if let Some(active) = &self.active {
            return Err(TransactionError::AlreadyActive {
                current: active.transaction_id,
            });
        }

        let transaction_id = Uuid::new_v4();
        let strategy = rollback_strategy.unwrap_or(self.config.default_strategy);
        self.active = Some(Transaction {
            transaction_id,
            start_time: Utc::now(),
            end_time: None,
            status: TransactionStatus::Active,
            operations: Vec::new(),
            checkpoints: Vec::new(),
            rollback_strategy: strategy,
            metadata,
            error_message: None,
            operations_trimmed: 0,
        });

        info!(
            "Started transaction {} with strategy {}",
            transaction_id,
            strategy.as_str()
        );
        Ok(TransactionHandle { id: transaction_id })
    }

    /// The slot transaction for this handle, regardless of its status.
    fn slot_for(
        &mut self,
        handle: &TransactionHandle,
    ) -> Result<&mut Transaction, TransactionError> {
        let tx = self
            .active
            .as_mut()
            .ok_or(TransactionError::NoActiveTransaction)?;
        if tx.transaction_id != handle.id {
            return Err(TransactionError::StaleHandle {
                presented: handle.id,
                active: tx.transaction_id,
            });
        }
        Ok(tx)
    }

    /// Like [`slot_for`], but the transaction must still be mutable.
    fn active_for(
        &mut self,
        handle: &TransactionHandle,
    ) -> Result<&mut Transaction, TransactionError> {
        let tx = self.slot_for(handle)?;
        if tx.status.is_terminal() {
            return Err(TransactionError::NotActive { status: tx.status });
        }
        Ok(tx)
    }

    /// Append an operation record to the active transaction.
    pub fn record_operation(
        &mut self,
        handle: &TransactionHandle,
        kind: OperationKind,
        thread_id: &str,
        data: serde_json::Value,
        rollback_data: Option<serde_json::Value>,
    ) -> Result<Uuid, TransactionError> {
        let max_history = self.config.max_operation_history;
        let tx = self.active_for(handle)?;

        let operation_id = Uuid::new_v4();
        tx.operations.push(OperationRecord {
            operation_id,
            kind,
            timestamp: Utc::now(),
            thread_id: thread_id.to_string(),
            data,
            rollback_data,
            rollback_attempted: false,
            rollback_success: false,
            rollback_error: None,
        });

        if tx.operations.len() > max_history {
            let excess = tx.operations.len() - max_history;
            tx.operations.drain(..excess);
            tx.operations_trimmed += excess as u64;
            // Checkpoints index into the log, so they shift with it.
            for cp in &mut tx.checkpoints {
                cp.operation_count = cp.operation_count.saturating_sub(excess);
            }
            warn!(
                "Trimmed operation log to {} entries ({} dropped so far)",
                max_history, tx.operations_trimmed
            );
        }

        debug!(
            "Recorded {} operation {} for thread {}",
            kind.as_str(),
            operation_id,
            thread_id
        );
        Ok(operation_id)
    }

    /// Create a checkpoint capturing the current operation count.
    pub fn create_checkpoint(
        &mut self,
        handle: &TransactionHandle,
        description: &str,
        data: Option<serde_json::Value>,
    ) -> Result<Uuid, TransactionError> {
        if !self.config.enable_checkpoints {
            return Err(TransactionError::CheckpointsDisabled);
        }
        let tx = self.active_for(handle)?;

        let checkpoint_id = Uuid::new_v4();
        tx.checkpoints.push(Checkpoint {
            checkpoint_id,
            timestamp: Utc::now(),
            operation_count: tx.operations.len(),
            description: description.to_string(),
            data,
        });

        info!("Created checkpoint {}: {}", checkpoint_id, description);
        Ok(checkpoint_id)
    }

    /// Compensate every operation recorded after the checkpoint, newest
    /// first. Only on full success is the log truncated back to the
    /// checkpoint boundary (and later checkpoints discarded); on partial
    /// failure the log is left as-is so a retry can pick up the remainder.
    pub async fn rollback_to_checkpoint(
        &mut self,
        handle: &TransactionHandle,
        checkpoint_id: Uuid,
    ) -> Result<bool, TransactionError> {
        self.active_for(handle)?;
        let Self {
            handlers, active, ..
        } = self;
        let tx = active.as_mut().expect("checked by active_for");

        let position = tx
            .checkpoints
            .iter()
            .position(|cp| cp.checkpoint_id == checkpoint_id)
            .ok_or(TransactionError::CheckpointNotFound(checkpoint_id))?;
        let boundary = tx.checkpoints[position].operation_count;

        let success = sweep_rollback(handlers, &mut tx.operations[boundary..]).await;
        if success {
            tx.operations.truncate(boundary);
            tx.checkpoints.truncate(position + 1);
        }

        info!(
            "Rollback to checkpoint {}: {}",
            checkpoint_id,
            if success { "successful" } else { "failed" }
        );
        Ok(success)
    }

    /// Compensate every recorded operation, newest first. Sets the status
    /// to RolledBack when every compensation succeeded, Failed otherwise.
    /// A repeated call only retries records not yet attempted.
    pub async fn rollback_transaction(
        &mut self,
        handle: &TransactionHandle,
    ) -> Result<bool, TransactionError> {
        self.slot_for(handle)?;
        Ok(self.rollback_active().await)
    }

    async fn rollback_active(&mut self) -> bool {
        let Self {
            handlers, active, ..
        } = self;
        let tx = active.as_mut().expect("caller verified an active transaction");

        let success = sweep_rollback(handlers, &mut tx.operations).await;
        tx.status = if success {
            TransactionStatus::RolledBack
        } else {
            TransactionStatus::Failed
        };
        tx.end_time = Some(Utc::now());

        info!(
            "Transaction {} rollback: {}",
            tx.transaction_id,
            if success { "successful" } else { "failed" }
        );
        success
    }

    /// Commit the active transaction and move it into history.
    pub fn commit_transaction(
        &mut self,
        handle: &TransactionHandle,
    ) -> Result<(), TransactionError> {
        let tx = self.active_for(handle)?;
        tx.status = TransactionStatus::Committed;
        tx.end_time = Some(Utc::now());

        let tx = self.active.take().expect("checked by active_for");
        let transaction_id = tx.transaction_id;
        self.push_history(tx);

        info!("Committed transaction {}", transaction_id);
        Ok(())
    }

    /// Abort the active transaction, rolling back according to its
    /// strategy, and move it into history regardless of the outcome.
    ///
    /// Returns whether compensation fully succeeded. Under `BestEffort`
    /// the abort itself always completes; under the other strategies the
    /// returned flag is the full-rollback result.
    pub async fn abort_transaction(
        &mut self,
        handle: &TransactionHandle,
        error_message: Option<&str>,
    ) -> Result<bool, TransactionError> {
        let strategy = self.slot_for(handle)?.rollback_strategy;

        let rollback_success = if strategy == RollbackStrategy::BestEffort {
            // Sweep without letting the outcome decide the status.
            let Self {
                handlers, active, ..
            } = self;
            let tx = active.as_mut().expect("checked by slot_for");
            sweep_rollback(handlers, &mut tx.operations).await
        } else {
            self.rollback_active().await
        };

        let mut tx = self.active.take().expect("checked by slot_for");
        if tx.status == TransactionStatus::Active {
            tx.status = TransactionStatus::Failed;
        }
        tx.error_message = error_message.map(str::to_string);
        if tx.end_time.is_none() {
            tx.end_time = Some(Utc::now());
        }
        let transaction_id = tx.transaction_id;
        self.push_history(tx);

        error!(
            "Aborted transaction {}: {}",
            transaction_id,
            error_message.unwrap_or("unknown error")
        );
        Ok(rollback_success)
    }

    fn push_history(&mut self, tx: Transaction) {
        self.history.push(tx);
        if self.history.len() > self.config.max_transaction_history {
            let excess = self.history.len() - self.config.max_transaction_history;
            self.history.drain(..excess);
        }
    }

    pub fn current_transaction(&self) -> Option<&Transaction> {
        self.active.as_ref()
    }

    pub fn history(&self) -> &[Transaction] {
        &self.history
    }

    /// Generate an audit report for the given transaction, defaulting to
    /// the currently-active one.
    pub fn generate_audit_report(
        &self,
        transaction_id: Option<Uuid>,
    ) -> Result<AuditReport, TransactionError> {
        let tx = match transaction_id {
            None => self
                .active
                .as_ref()
                .ok_or(TransactionError::NoActiveTransaction)?,
            Some(id) => self
                .active
                .iter()
                .chain(self.history.iter())
                .find(|tx| tx.transaction_id == id)
                .ok_or(TransactionError::TransactionNotFound(id))?,
        };

        let mut operations_by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
        for op in &tx.operations {
            *operations_by_type.entry(op.kind.as_str()).or_insert(0) += 1;
        }

        Ok(AuditReport {
            transaction_id: tx.transaction_id,
            status: tx.status,
            start_time: tx.start_time,
            end_time: tx.end_time,
            duration_seconds: tx
                .end_time
                .map(|end| (end - tx.start_time).num_milliseconds() as f64 / 1000.0),
            rollback_strategy: tx.rollback_strategy,
            total_operations: tx.operations.len(),
            total_checkpoints: tx.checkpoints.len(),
            operations_by_type,
            rollback_attempts: tx.operations.iter().filter(|op| op.rollback_attempted).count(),
            successful_rollbacks: tx.operations.iter().filter(|op| op.rollback_success).count(),
            failed_rollbacks: tx
                .operations
                .iter()
                .filter(|op| op.rollback_attempted && !op.rollback_success)
                .count(),
            operations_trimmed: tx.operations_trimmed,
            error_message: tx.error_message.clone(),
            metadata: tx.metadata.clone(),
        })
    }
}

/// Walk the given records newest-first, compensating each through its
/// registered handler. Records already attempted are skipped, so a repeat
/// sweep after a partial failure only retries the remainder. A missing
/// handler marks the record failed but does not stop the sweep.
async fn sweep_rollback(handlers: &HandlerRegistry, operations: &mut [OperationRecord]) -> bool {
    let mut all_successful = true;

    for record in operations.iter_mut().rev() {
        if record.rollback_attempted {
            continue;
        }
        record.rollback_attempted = true;

        let Some(handler) = handlers.get(&record.kind) else {
            warn!(
                "No rollback handler for operation kind {}",
                record.kind.as_str()
            );
            record.rollback_success = false;
            record.rollback_error = Some("no rollback handler registered".to_string());
            all_successful = false;
            continue;
        };

        if !handler.can_rollback(record) {
            warn!("Operation {} cannot be rolled back", record.operation_id);
            record.rollback_success = false;
            record.rollback_error = Some("operation cannot be rolled back".to_string());
            all_successful = false;
            continue;
        }

        let success = handler.rollback(record).await;
        record.rollback_success = success;
        if success {
            debug!("Rolled back operation {}", record.operation_id);
        } else {
            error!("Failed to roll back operation {}", record.operation_id);
            record.rollback_error = Some("rollback handler reported failure".to_string());
            all_successful = false;
        }
    }

    all_successful
}
