//! Helpers for combining upstream outputs into a step's input, and for
//! rendering Report and Alert outputs.

use std::collections::HashSet;

use pipeline::{BatchSummary, ItemStatus, ProcessingItem};

use crate::run::{ReviewEntry, RunReport, StepOutput};

/// Items from every upstream batch, deduplicated by source reference.
///
/// Diamond-shaped graphs deliver the same item along several paths; the
/// first copy in inbound-edge order wins.
pub fn merge_items(inputs: &[&StepOutput]) -> Vec<ProcessingItem> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged = Vec::new();
    for input in inputs {
        for item in input.items() {
            if seen.insert(item.source_ref.as_str()) {
                merged.push(item.clone());
            }
        }
    }
    merged
}

/// Summary over all inputs: merged document batches plus any upstream
/// report or alert summaries.
pub fn merged_summary(inputs: &[&StepOutput]) -> BatchSummary {
    let items = merge_items(inputs);
    let mut summary = BatchSummary::of(&items);
    for input in inputs {
        if matches!(input, StepOutput::Report { .. } | StepOutput::Alert { .. }) {
            summary.absorb(&input.summary());
        }
    }
    summary
}

pub fn build_report(title: &str, inputs: &[&StepOutput]) -> RunReport {
    let items = merge_items(inputs);
    let mut needs_review = Vec::new();
    let mut failures = Vec::new();

    for input in inputs {
        if let StepOutput::Report { report } = input {
            needs_review.extend(report.needs_review.iter().cloned());
            failures.extend(report.failures.iter().cloned());
        }
    }

    for item in &items {
        if item.status == ItemStatus::Error {
            let reason = item.error.as_deref().unwrap_or("failed");
            failures.push(format!("{}: {reason}", item.source_ref));
        }
        for failure in &item.failures {
            failures.push(format!("{}: {failure}", item.source_ref));
        }
        for state in item.attachments.iter().filter(|s| s.needs_review) {
            needs_review.push(ReviewEntry {
                source_ref: item.source_ref.clone(),
                filename: state.attachment.filename.clone(),
                invoice_number: state
                    .extracted
                    .as_ref()
                    .and_then(|inv| inv.invoice_number.clone()),
                issues: state.issues.clone(),
            });
        }
    }

    RunReport {
        title: title.to_string(),
        summary: merged_summary(inputs),
        needs_review,
        failures,
    }
}

/// One-paragraph alert text for a summary.
pub fn render_summary(summary: &BatchSummary) -> String {
    let mut lines = vec![
        format!(
            "{} items: {} completed, {} skipped, {} failed",
            summary.items, summary.completed, summary.skipped, summary.errors
        ),
        format!(
            "{} invoices found, {} extracted, {} rows persisted",
            summary.invoices, summary.extracted, summary.rows_persisted
        ),
    ];
    if summary.needs_review > 0 {
        lines.push(format!("{} attachments need review", summary.needs_review));
    }
    if summary.failures > 0 || summary.issues > 0 {
        lines.push(format!(
            "{} attachment failures, {} validation issues",
            summary.failures, summary.issues
        ));
    }
    lines.join("\n")
}
