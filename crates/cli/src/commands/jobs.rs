//! `campus jobs`: inspect recorded jobs.

use campus_restore::{FileJobStore, JobRecord, JobStore};

use super::fail;
use crate::{print_json, Context, OutputFormat};

pub fn cmd_jobs(ctx: &Context, id: Option<&str>) {
    let store = FileJobStore::new(&ctx.jobs_dir);
    let jobs = match id {
        Some(id) => match store.get(id) {
            Ok(Some(job)) => vec![job],
            Ok(None) => fail(ctx, &format!("job {} not found", id)),
            Err(e) => fail(ctx, &format!("error reading job {}: {}", id, e)),
        },
        None => store
            .list()
            .unwrap_or_else(|e| fail(ctx, &format!("error listing jobs: {}", e))),
    };

    match ctx.output {
        OutputFormat::Json => match (id, jobs.as_slice()) {
            (Some(_), [job]) => print_json(job),
            _ => print_json(&jobs),
        },
        OutputFormat::Text => {
            if ctx.quiet {
                return;
            }
            if jobs.is_empty() {
                println!("no jobs");
            }
            for job in &jobs {
                println!("{}", summary_line(job));
                if let (Some(_), Some(detail)) = (id, error_detail(job)) {
                    println!("  error: {}", detail);
                }
            }
        }
    }
}

fn summary_line(job: &JobRecord) -> String {
    match job {
        JobRecord::Restore(r) => format!(
            "{}  restore  {:<8} {}  {}{}",
            r.id,
            r.status,
            r.created_at,
            r.mode,
            if r.dry_run { " (dry run)" } else { "" }
        ),
        JobRecord::Backup(b) => format!(
            "{}  backup   {:<8} {}  {}",
            b.id,
            b.status,
            b.created_at,
            b.file_reference.as_deref().unwrap_or("-")
        ),
    }
}

fn error_detail(job: &JobRecord) -> Option<&str> {
    match job {
        JobRecord::Restore(r) => r.error_detail.as_deref(),
        JobRecord::Backup(b) => b.error_detail.as_deref(),
    }
}
