//! `campus validate`: check a snapshot file without touching the store.

use std::path::Path;

use campus_restore::{decode, looks_like_snapshot};

use super::fail;
use crate::{Context, OutputFormat};

pub fn cmd_validate(ctx: &Context, file: &Path) {
    let bytes = match std::fs::read(file) {
        Ok(bytes) => bytes,
        Err(e) => fail(ctx, &format!("error reading file '{}': {}", file.display(), e)),
    };
    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => fail(ctx, &format!("error parsing JSON in '{}': {}", file.display(), e)),
    };
    if !looks_like_snapshot(&value) {
        fail(ctx, &format!("'{}' does not look like a snapshot", file.display()));
    }
    let snapshot = match decode(&bytes) {
        Ok(snapshot) => snapshot,
        Err(e) => fail(ctx, &format!("invalid snapshot '{}': {}", file.display(), e)),
    };

    if ctx.quiet {
        return;
    }
    match ctx.output {
        OutputFormat::Text => println!("valid ({} records)", snapshot.len()),
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "valid": true, "records": snapshot.len() }));
        }
    }
}
