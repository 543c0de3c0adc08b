use anyhow::Result;
use clap::Args;
use recall_core::store::{HydrationReport, StoreStats};
use serde::Serialize;

use super::{Context, format_millis};
use crate::output::{pretty_kv, pretty_section, render};

#[derive(Args, Debug)]
pub struct StatsArgs {}

#[derive(Debug, Serialize)]
struct StatsOutput {
    store_path: String,
    #[serde(flatten)]
    store: StoreStats,
    /// Blobs that failed to parse on this read.
    malformed: Vec<String>,
    /// Ids present in both sets on disk.
    overlapping: usize,
}

impl StatsOutput {
    fn new(store_path: String, store: StoreStats, hydration: &HydrationReport) -> Self {
        Self {
            store_path,
            store,
            malformed: hydration
                .malformed
                .iter()
                .map(|key| key.as_str().to_string())
                .collect(),
            overlapping: hydration.overlapping,
        }
    }
}

/// Execute `recall stats`. Opens the store read-only and never creates it.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read.
pub fn run_stats(_args: &StatsArgs, ctx: &Context) -> Result<()> {
    let (store, hydration) = ctx.read_store()?;
    let out = StatsOutput::new(
        ctx.store_path.display().to_string(),
        store.stats(),
        &hydration,
    );

    render(ctx.output, &out, |o, w| {
        pretty_section(w, "Store")?;
        pretty_kv(w, "path", &o.store_path)?;
        pretty_kv(w, "active", o.store.active.to_string())?;
        pretty_kv(w, "retained", o.store.retained.to_string())?;
        pretty_kv(
            w,
            "last purge",
            o.store
                .last_purge_time
                .map_or_else(|| "never".to_string(), format_millis),
        )?;
        if !o.malformed.is_empty() {
            pretty_kv(w, "malformed", o.malformed.join(", "))?;
        }
        if o.overlapping > 0 {
            pretty_kv(w, "overlapping", o.overlapping.to_string())?;
        }
        Ok(())
    })
}
