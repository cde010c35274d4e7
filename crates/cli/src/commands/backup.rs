//! `campus backup`: export entity types to a snapshot file.

use std::path::Path;

use campus_restore::JobStatus;

use super::{fail, open};
use crate::{print_json, Context, OutputFormat};

pub async fn cmd_backup(ctx: &Context, out: &Path, entities: Vec<String>) {
    let orch = open(ctx);
    let requested = (!entities.is_empty()).then_some(entities);
    let job = match orch.create_backup(requested, out).await {
        Ok(job) => job,
        Err(e) => fail(ctx, &format!("backup error: {}", e)),
    };

    match ctx.output {
        OutputFormat::Json => print_json(&job),
        OutputFormat::Text => {
            if !ctx.quiet && job.status == JobStatus::Success {
                println!("backup {} written to {}", job.id, out.display());
                if let Some(report) = &job.report {
                    for (entity_type, count) in &report.entity_types {
                        println!("  {:<32} {:>8}", entity_type, count);
                    }
                    println!("  {:<32} {:>8}", "total", report.total_records);
                }
                if let Some(checksum) = &job.checksum {
                    println!("sha256 {}", checksum);
                }
            }
        }
    }

    if job.status != JobStatus::Success {
        let detail = job.error_detail.as_deref().unwrap_or("unknown error");
        fail(ctx, &format!("backup {} failed: {}", job.id, detail));
    }
}
