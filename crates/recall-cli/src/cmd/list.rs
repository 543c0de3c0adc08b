use anyhow::Result;
use clap::Args;
use recall_core::model::MessageRecord;
use recall_core::resolver::removed_text;
use serde::Serialize;
use std::io::Write;

use super::{Context, format_millis};
use crate::output::{pretty_section, render};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// List the active set instead of retained messages.
    #[arg(long)]
    pub active: bool,

    /// Only show messages from this thread.
    #[arg(long)]
    pub thread: Option<String>,

    /// Maximum number of rows, newest first.
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ListRow {
    message_id: String,
    thread_id: String,
    author: String,
    timestamp: i64,
    text: String,
}

impl From<&MessageRecord> for ListRow {
    fn from(record: &MessageRecord) -> Self {
        Self {
            message_id: record.message_id.clone(),
            thread_id: record.thread_id.clone(),
            author: record.author.clone(),
            timestamp: record.timestamp,
            text: removed_text(record),
        }
    }
}

/// Execute `recall list`. Opens the store read-only: no purge runs and
/// nothing is written or created.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read.
pub fn run_list(args: &ListArgs, ctx: &Context) -> Result<()> {
    let (store, _) = ctx.read_store()?;
    let records: Vec<&MessageRecord> = if args.active {
        store.active_iter().collect()
    } else {
        store.retained_iter().collect()
    };
    let rows = select_rows(records, args.thread.as_deref(), args.limit);

    let heading = if args.active { "Active" } else { "Retained" };
    render(ctx.output, &rows, |rows, w| {
        pretty_section(w, &format!("{heading} messages ({})", rows.len()))?;
        for row in rows {
            writeln!(
                w,
                "{:<20} {:<12} {:<24} {}",
                row.message_id,
                row.thread_id,
                format_millis(row.timestamp),
                row.text
            )?;
        }
        Ok(())
    })
}

fn select_rows(records: Vec<&MessageRecord>, thread: Option<&str>, limit: Option<usize>) -> Vec<ListRow> {
    let mut records: Vec<&MessageRecord> = records
        .into_iter()
        .filter(|r| thread.is_none_or(|t| r.thread_id == t))
        .collect();
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.message_id.cmp(&b.message_id))
    });
    records
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(ListRow::from)
        .collect()
}
