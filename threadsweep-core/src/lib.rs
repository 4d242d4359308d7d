pub mod bulk;
pub mod github;
pub mod graphql;
pub mod models;
pub mod node_id;
pub mod rollback;
pub mod services;
pub mod transaction;

pub use bulk::{
    BulkOperationCoordinator, BulkOperationError, BulkOperationResult, BulkOperationSummary,
    BulkRequest,
};
pub use github::{GhClient, GhError};
pub use models::{ReplyOutcome, ResolveOutcome, ReviewThread};
pub use rollback::{
    default_rollback_handlers, CompositeRollbackHandler, ReplyRollbackHandler,
    ResolveRollbackHandler, RollbackHandler,
};
pub use services::{
    FetchService, ReplyService, ResolveService, ServiceError, ThreadFetcher, ThreadReplier,
    ThreadResolver,
};
pub use transaction::{
    AuditReport, Checkpoint, OperationKind, OperationRecord, RollbackStrategy, Transaction,
    TransactionError, TransactionHandle, TransactionManager, TransactionManagerConfig,
    TransactionStatus,
};
