use anyhow::Result;
use clap::Args;
use recall_core::clock::{Clock, ManualClock, SystemClock};
use recall_core::host::MemoryHost;
use recall_core::purge::PurgeOutcome;
use serde::Serialize;
use std::io::Write;

use super::{Context, format_millis};
use crate::output::{pretty_kv, pretty_section, render};

#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Evaluate as if the current time were this (epoch millis).
    #[arg(long)]
    pub now: Option<i64>,
}

#[derive(Debug, Serialize)]
struct PurgeOutput {
    evaluated_at: i64,
    #[serde(flatten)]
    outcome: PurgeOutcome,
    active: usize,
    retained: usize,
}

/// Execute `recall purge`.
///
/// Starting the engine evaluates the purge policy once, the same way a
/// host restart does; this command reports that evaluation.
///
/// # Errors
///
/// Returns an error if the store cannot be opened.
pub fn run_purge(args: &PurgeArgs, ctx: &Context) -> Result<()> {
    let clock: Box<dyn Clock> = match args.now {
        Some(now) => Box::new(ManualClock::new(now)),
        None => Box::new(SystemClock),
    };
    let now = clock.now_millis();
    // The viewer is irrelevant here: nothing is resolved.
    let engine = ctx.start_engine(MemoryHost::new(String::new()), clock)?;

    let stats = engine.store().stats();
    let out = PurgeOutput {
        evaluated_at: now,
        outcome: engine.startup().purge.clone(),
        active: stats.active,
        retained: stats.retained,
    };
    engine.shutdown();

    render(ctx.output, &out, |o, w| {
        pretty_section(w, "Purge")?;
        pretty_kv(w, "evaluated at", format_millis(o.evaluated_at))?;
        match &o.outcome {
            PurgeOutcome::Initialized { .. } => {
                writeln!(w, "first run: purge clock started, nothing evicted")?;
            }
            PurgeOutcome::NotDue { next_due } => {
                pretty_kv(w, "next due", format_millis(*next_due))?;
            }
            PurgeOutcome::Swept(report) => {
                pretty_kv(w, "evicted", report.evicted.len().to_string())?;
            }
        }
        pretty_kv(w, "active", o.active.to_string())?;
        pretty_kv(w, "retained", o.retained.to_string())
    })
}
