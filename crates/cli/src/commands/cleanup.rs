//! `campus cleanup`: retention for job records, backups and snapshots.

use campus_restore::{FileJobStore, Orchestrator};
use campus_store::MemoryStore;

use super::fail;
use crate::{print_json, Context, OutputFormat};

pub async fn cmd_cleanup(ctx: &Context, older_than_days: u32) {
    // Cleanup never reads rows; an empty registry spares a missing store file.
    let orch = Orchestrator::new(
        MemoryStore::new(),
        FileJobStore::new(&ctx.jobs_dir),
        ctx.config.clone(),
    );
    let summary = match orch.cleanup(older_than_days).await {
        Ok(summary) => summary,
        Err(e) => fail(ctx, &format!("cleanup error: {}", e)),
    };
    match ctx.output {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Text => {
            if !ctx.quiet {
                println!(
                    "removed {} files and {} job records",
                    summary.files_removed, summary.records_removed
                );
            }
        }
    }
}
