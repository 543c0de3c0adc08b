use anyhow::{Result, bail};
use clap::Args;
use recall_core::clock::{Clock, SystemClock};
use recall_core::error::ErrorCode;
use recall_core::host::{HostPort, MemoryHost};
use recall_core::model::MessageRecord;
use recall_core::resolver::{self, MessageRef, NoticeAuthor};
use serde::Serialize;
use std::io::Write;

use super::{Context, format_millis};
use crate::output::{CliError, pretty_kv, pretty_section, render, render_error};

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Message id to resolve.
    pub message_id: String,

    /// User id of the person viewing the message.
    #[arg(long)]
    pub viewer: String,

    /// Nickname the viewer has given the author in this thread.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ShowOutput {
    message_id: String,
    thread_id: String,
    author: String,
    timestamp: i64,
    /// Whether this lookup moved the message into the retained set.
    promoted: bool,
    notice: String,
}

/// Execute `recall show <message_id>`.
///
/// Looking up an active message promotes it, exactly as a host lookup
/// would.
///
/// # Errors
///
/// Returns an error if the message is unknown or the store cannot be
/// opened.
pub fn run_show(args: &ShowArgs, ctx: &Context) -> Result<()> {
    let clock: Box<dyn Clock> = Box::new(SystemClock);
    let mut engine = ctx.start_engine(MemoryHost::new(args.viewer.clone()), clock)?;

    let Some(record) = find_record(engine.store(), &args.message_id) else {
        render_error(
            ctx.output,
            &CliError::from_code(
                ErrorCode::MessageNotFound,
                format!("message '{}' is not in the store", args.message_id),
            ),
        )?;
        engine.shutdown();
        bail!("message '{}' not found", args.message_id);
    };

    let reference = MessageRef::from(&record);
    if let Some(name) = &args.name {
        let author_id = engine.host().author_id_from_participant_id(&record.author);
        engine
            .host_mut()
            .set_nickname(&record.thread_id, author_id, name.clone());
    }

    let was_active = engine.store().contains_active(&record.message_id);
    let notice = engine.removed_content(&reference).unwrap_or_else(|| {
        // Only reachable if the record vanished between lookups.
        bare_notice(&resolver::notice_author(engine.host(), &args.viewer, &reference))
    });
    let promoted = was_active && !engine.store().contains_active(&record.message_id);
    engine.shutdown();

    let out = ShowOutput {
        message_id: record.message_id,
        thread_id: record.thread_id,
        author: record.author,
        timestamp: record.timestamp,
        promoted,
        notice,
    };

    render(ctx.output, &out, |o, w| {
        pretty_section(w, &format!("Message {}", o.message_id))?;
        pretty_kv(w, "thread", &o.thread_id)?;
        pretty_kv(w, "author", &o.author)?;
        pretty_kv(w, "sent", format_millis(o.timestamp))?;
        if o.promoted {
            pretty_kv(w, "promoted", "yes")?;
        }
        writeln!(w)?;
        writeln!(w, "{}", o.notice)
    })
}

fn find_record(store: &recall_core::ShadowStore, message_id: &str) -> Option<MessageRecord> {
    store
        .lookup_retained(message_id)
        .or_else(|| store.lookup_active(message_id))
        .cloned()
}

/// Notice without content, used when a message has no retained copy.
#[must_use]
pub fn bare_notice(author: &NoticeAuthor) -> String {
    resolver::format_notice(author, "")
}
