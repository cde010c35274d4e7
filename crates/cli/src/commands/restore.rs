//! `campus restore`: apply a snapshot to the store.

use std::path::PathBuf;

use campus_restore::{
    DuplicateStrategy, JobStatus, RestoreJob, RestoreMode, RestoreRequest, RestoreSource,
};

use super::{fail, open, persist};
use crate::{print_json, Context, OutputFormat};

pub struct RestoreArgs {
    pub file: Option<PathBuf>,
    pub backup: Option<String>,
    pub mode: RestoreMode,
    pub duplicates: DuplicateStrategy,
    pub dry_run: bool,
}

pub async fn cmd_restore(ctx: &Context, args: RestoreArgs) {
    let source = match (args.file, args.backup) {
        (Some(file), None) => RestoreSource::File(file),
        (None, Some(job_id)) => RestoreSource::Backup(job_id),
        _ => fail(ctx, "error: give either a snapshot file or --backup <job-id>"),
    };
    let orch = open(ctx);
    let request = RestoreRequest::new(source)
        .mode(args.mode)
        .duplicate_strategy(args.duplicates)
        .dry_run(args.dry_run);
    let job = match orch.restore(request).await {
        Ok(job) => job,
        Err(e) => fail(ctx, &format!("restore error: {}", e)),
    };
    // A failed run was merged back from its snapshot, so the store still
    // changed unless nothing was written at all.
    if !job.dry_run {
        persist(ctx, &orch).await;
    }

    match ctx.output {
        OutputFormat::Json => print_json(&job),
        OutputFormat::Text => {
            if !ctx.quiet {
                print_summary(&job);
            }
        }
    }

    if job.status != JobStatus::Success {
        let detail = job.error_detail.as_deref().unwrap_or("unknown error");
        fail(ctx, &format!("restore {} failed: {}", job.id, detail));
    }
}

fn print_summary(job: &RestoreJob) {
    let Some(report) = &job.report else {
        if let Some(rollback) = &job.rollback {
            let state = if rollback.completed { "completed" } else { "incomplete" };
            println!(
                "rollback from {} {} ({} errors)",
                rollback.snapshot, state, rollback.error_count
            );
        }
        return;
    };
    let heading = if report.preview { "dry run" } else { "restore" };
    println!(
        "{} {} ({}, duplicates: {})",
        heading, job.id, report.mode, report.duplicate_strategy
    );
    println!(
        "  {:<32} {:>8} {:>8} {:>8} {:>9} {:>6}",
        "entity type", "inserted", "updated", "skipped", "conflicts", "errors"
    );
    let rows = report
        .per_entity_type
        .iter()
        .map(|(t, c)| (t.as_str(), c))
        .chain(std::iter::once(("total", &report.total)));
    for (entity_type, c) in rows {
        println!(
            "  {:<32} {:>8} {:>8} {:>8} {:>9} {:>6}",
            entity_type, c.inserted, c.updated, c.skipped, c.conflicts, c.errors
        );
    }
    for (entity_type, conflicts) in &report.conflicts {
        for conflict in conflicts {
            println!(
                "  conflict in {} at record {}: {}",
                entity_type,
                conflict.index,
                conflict.reason.as_deref().unwrap_or("")
            );
        }
    }
    if report.warnings > 0 {
        println!("  {} coercion warnings (see log)", report.warnings);
    }
}
