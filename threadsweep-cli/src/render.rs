//! Human-readable rendering of command output. JSON output goes through
//! serde directly; these renderers are only used with `--pretty`.

use threadsweep_core::{BulkOperationSummary, ReplyOutcome, ResolveOutcome, ReviewThread};

pub fn threads(threads: &[ReviewThread]) -> String {
    if threads.is_empty() {
        return "No review threads found.\n".to_string();
    }

    let mut out = format!("{} review thread(s):\n", threads.len());
    for thread in threads {
        let location = match (&thread.path, thread.line) {
            (Some(path), Some(line)) => format!("{path}:{line}"),
            (Some(path), None) => path.clone(),
            _ => "(no file)".to_string(),
        };
        let mut flags = Vec::new();
        if thread.is_resolved {
            flags.push("resolved");
        }
        if thread.is_outdated {
            flags.push("outdated");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };

        out.push_str(&format!("\n  {}{}\n", thread.thread_id, flags));
        out.push_str(&format!("    {location}\n"));
        if let Some(author) = &thread.author {
            let body = thread.body_preview.as_deref().unwrap_or("");
            out.push_str(&format!("    {author}: {body}\n"));
        }
    }
    out
}

pub fn reply(outcome: &ReplyOutcome) -> String {
    format!(
        "Posted reply {} to thread {}\n{}\n",
        outcome.reply_id, outcome.thread_id, outcome.reply_url
    )
}

pub fn resolve(outcome: &ResolveOutcome) -> String {
    format!(
        "Thread {} {}d (isResolved: {})\n",
        outcome.thread_id, outcome.action, outcome.is_resolved
    )
}

pub fn summary(summary: &BulkOperationSummary) -> String {
    let mut out = format!(
        "{} operation(s): {} succeeded, {} failed\n",
        summary.total_operations, summary.successful_operations, summary.failed_operations
    );
    if summary.atomic_failure {
        out.push_str("Atomic failure: all completed operations were rolled back.\n");
    }
    if let Some(id) = summary.transaction_id {
        let status = summary
            .transaction_status
            .map(|s| s.as_str())
            .unwrap_or("unknown");
        out.push_str(&format!("Transaction {id} ({status})\n"));
    }

    for result in &summary.results {
        let marker = if result.success { "ok  " } else { "FAIL" };
        out.push_str(&format!("  [{marker}] {}", result.thread_id));
        if let Some(error) = &result.error {
            out.push_str(&format!(" - {error}"));
        }
        if result.rollback_attempted {
            out.push_str(if result.rollback_success {
                " (rolled back)"
            } else {
                " (rollback failed)"
            });
        }
        out.push('\n');
    }

    if let Some(report) = &summary.audit_report {
        out.push_str(&format!(
            "Audit: {} operation(s), {} checkpoint(s), {} rollback(s) attempted ({} failed)\n",
            report.total_operations,
            report.total_checkpoints,
            report.rollback_attempts,
            report.failed_rollbacks
        ));
        if report.operations_trimmed > 0 {
            out.push_str(&format!(
                "Warning: {} operation record(s) were trimmed from the log\n",
                report.operations_trimmed
            ));
        }
    }
    out
}
