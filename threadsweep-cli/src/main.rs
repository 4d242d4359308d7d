use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use threadsweep_core::{
    BulkOperationCoordinator, BulkRequest, FetchService, GhClient, ReplyService, ResolveService,
    RollbackStrategy, ThreadReplier, ThreadResolver, TransactionManagerConfig,
};
use tracing_subscriber::EnvFilter;

mod render;

/// Threadsweep: bulk reply-and-resolve for GitHub PR review threads
#[derive(Parser, Debug)]
#[command(name = "threadsweep")]
#[command(about = "Manage GitHub pull request review threads in bulk", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List review threads on a pull request
    Fetch(FetchArgs),
    /// Post a reply to a review thread
    Reply(ReplyArgs),
    /// Resolve (or unresolve) a review thread
    Resolve(ResolveArgs),
    /// Reply to and resolve many threads as one unit of work
    BulkResolve(BulkResolveArgs),
}

#[derive(Parser, Debug)]
struct FetchArgs {
    /// Pull request number
    #[arg(long)]
    pr: u64,

    /// Include threads that are already resolved
    #[arg(long)]
    resolved: bool,

    /// Maximum number of threads to fetch (1-100)
    #[arg(long, default_value_t = 100)]
    limit: usize,

    /// Human-readable output instead of JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Parser, Debug)]
struct ReplyArgs {
    /// Thread ID to reply to (e.g. PRRT_...)
    #[arg(long)]
    id: String,

    /// Reply body
    #[arg(long)]
    body: String,

    /// Human-readable output instead of JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Parser, Debug)]
struct ResolveArgs {
    /// Thread ID to resolve (e.g. PRRT_...)
    #[arg(long)]
    id: String,

    /// Unresolve instead of resolve
    #[arg(long)]
    undo: bool,

    /// Human-readable output instead of JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Parser, Debug)]
struct BulkResolveArgs {
    /// Pull request number
    #[arg(long)]
    pr: u64,

    /// Reply message posted to each thread before resolving it
    #[arg(long)]
    message: String,

    /// Specific thread IDs to target (defaults to all unresolved threads)
    #[arg(long = "id", num_args = 1..)]
    ids: Vec<String>,

    /// Continue past failures instead of rolling everything back
    #[arg(long)]
    non_atomic: bool,

    /// Simulate without posting or resolving anything
    #[arg(long)]
    dry_run: bool,

    /// On abort, attempt rollback but do not require it to succeed
    #[arg(long)]
    best_effort: bool,

    /// Create a checkpoint every N successful operations
    #[arg(long, default_value_t = 10)]
    checkpoint_interval: usize,

    /// Embed the transaction audit report in the output
    #[arg(long)]
    audit: bool,

    /// Human-readable output instead of JSON
    #[arg(long)]
    pretty: bool,
}

async fn ensure_gh(gh: &GhClient) -> Result<()> {
    gh.version()
        .await
        .context("GitHub CLI (gh) not found; install it from https://cli.github.com")?;
    let authenticated = gh
        .check_auth()
        .await
        .context("Failed to check gh authentication status")?;
    if !authenticated {
        bail!("Not authenticated with GitHub; run 'gh auth login' first");
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn run_fetch(gh: Arc<GhClient>, args: FetchArgs) -> Result<()> {
    let service = FetchService::with_limit(gh, args.limit);
    let threads = service
        .fetch_review_threads(args.pr, args.resolved)
        .await
        .with_context(|| format!("Failed to fetch review threads for PR #{}", args.pr))?;

    if args.pretty {
        print!("{}", render::threads(&threads));
        Ok(())
    } else {
        print_json(&threads)
    }
}

async fn run_reply(gh: Arc<GhClient>, args: ReplyArgs) -> Result<()> {
    let service = ReplyService::new(gh);
    let outcome = service
        .post_reply(&args.id, &args.body)
        .await
        .with_context(|| format!("Failed to reply to thread {}", args.id))?;

    if args.pretty {
        print!("{}", render::reply(&outcome));
        Ok(())
    } else {
        print_json(&outcome)
    }
}

async fn run_resolve(gh: Arc<GhClient>, args: ResolveArgs) -> Result<()> {
    let service = ResolveService::new(gh);
    let outcome = if args.undo {
        service.unresolve_thread(&args.id).await
    } else {
        service.resolve_thread(&args.id).await
    }
    .with_context(|| format!("Failed to update thread {}", args.id))?;

    if args.pretty {
        print!("{}", render::resolve(&outcome));
        Ok(())
    } else {
        print_json(&outcome)
    }
}

async fn run_bulk_resolve(gh: Arc<GhClient>, args: BulkResolveArgs) -> Result<()> {
    let fetcher = Arc::new(FetchService::new(gh.clone()));
    let replier = Arc::new(ReplyService::new(gh.clone()));
    let resolver = Arc::new(ResolveService::new(gh));
    let mut coordinator = BulkOperationCoordinator::with_config(
        fetcher,
        replier,
        resolver,
        TransactionManagerConfig::default(),
        args.checkpoint_interval,
    );

    let request = BulkRequest {
        pr_number: args.pr,
        message: args.message,
        thread_ids: (!args.ids.is_empty()).then_some(args.ids),
        atomic: !args.non_atomic,
        dry_run: args.dry_run,
        rollback_strategy: args.best_effort.then_some(RollbackStrategy::BestEffort),
        include_audit_report: args.audit,
    };

    let summary = coordinator
        .bulk_reply_and_resolve(&request)
        .await
        .with_context(|| format!("Bulk operation on PR #{} failed", args.pr))?;

    if args.pretty {
        print!("{}", render::summary(&summary));
    } else {
        print_json(&summary)?;
    }

    if summary.failed_operations > 0 {
        bail!(
            "{} of {} operation(s) failed",
            summary.failed_operations,
            summary.total_operations
        );
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let gh = Arc::new(GhClient::new());
    ensure_gh(&gh).await?;

    match cli.command {
        Commands::Fetch(args) => run_fetch(gh, args).await,
        Commands::Reply(args) => run_reply(gh, args).await,
        Commands::Resolve(args) => run_resolve(gh, args).await,
        Commands::BulkResolve(args) => run_bulk_resolve(gh, args).await,
    }
}
