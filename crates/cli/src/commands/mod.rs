pub mod backup;
pub mod cleanup;
pub mod jobs;
pub mod restore;
pub mod validate;

use std::process;

use campus_restore::{FileJobStore, Orchestrator};
use campus_store::MemoryStore;

use crate::{report_error, store_file, Context};

type CliOrchestrator = Orchestrator<MemoryStore, FileJobStore>;

/// Report `msg` and exit with status 1.
fn fail(ctx: &Context, msg: &str) -> ! {
    report_error(msg, ctx.output, ctx.quiet);
    process::exit(1);
}

/// Load the store file and wire it to the job directory.
fn open(ctx: &Context) -> CliOrchestrator {
    let store = store_file::load(&ctx.store).unwrap_or_else(|msg| fail(ctx, &msg));
    Orchestrator::new(store, FileJobStore::new(&ctx.jobs_dir), ctx.config.clone())
}

/// Persist the store after a command changed it.
async fn persist(ctx: &Context, orch: &CliOrchestrator) {
    if let Err(msg) = store_file::save(&ctx.store, orch.registry()).await {
        fail(ctx, &msg);
    }
}
