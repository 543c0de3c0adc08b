//! `recall replay`: drive the engine with a recorded host feed.
//!
//! A feed is JSON lines, one tagged record per line. Besides the two
//! lifecycle events the feed also carries the host state the engine reads
//! back (message status, thread nicknames, participant names):
//!
//! ```text
//! {"event":"new_message","thread_id":"t1","message":{"message_id":"m1",...}}
//! {"event":"status","message_id":"m1","status":"deny_tombstone_message"}
//! {"event":"updated_message","thread_id":"t1","message_id":"m1"}
//! {"event":"thread","thread_id":"t1","custom_nickname":{"U2":"Bob"}}
//! {"event":"participant","participant_id":"fbid:U2","short_name":"Bob"}
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use recall_core::clock::{Clock, ManualClock, SystemClock};
use recall_core::event::LifecycleEvent;
use recall_core::host::{MemoryHost, ThreadMetadata};
use recall_core::model::HostMessage;
use recall_core::resolver::MessageRef;
use recall_core::store::StoreStats;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::Context;
use crate::output::{pretty_kv, pretty_section, render};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON-lines feed to replay.
    pub feed: PathBuf,

    /// User id of the person viewing the messages.
    #[arg(long)]
    pub viewer: String,

    /// Pin the clock (epoch millis) instead of using the wall clock.
    #[arg(long)]
    pub now: Option<i64>,
}

/// One line of a host feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FeedLine {
    NewMessage {
        thread_id: String,
        message: HostMessage,
    },
    UpdatedMessage {
        thread_id: String,
        message_id: String,
        #[serde(default)]
        source: Option<String>,
    },
    Status {
        message_id: String,
        #[serde(default)]
        status: Option<String>,
    },
    Thread {
        thread_id: String,
        #[serde(default)]
        custom_nickname: BTreeMap<String, String>,
    },
    Participant {
        participant_id: String,
        short_name: String,
    },
}

impl FeedLine {
    /// Parse one feed line. Blank lines yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the line is not a known feed record.
    pub fn parse(line: &str) -> serde_json::Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(trimmed).map(Some)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub message_id: String,
    pub notice: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub lines: usize,
    pub skipped: usize,
    pub ingested: u64,
    pub ignored: u64,
    pub promoted: u64,
    #[serde(flatten)]
    pub store: StoreStats,
    pub notices: Vec<Notice>,
}

/// Execute `recall replay`.
///
/// # Errors
///
/// Returns an error if the feed cannot be read or the store cannot be
/// opened.
pub fn run_replay(args: &ReplayArgs, ctx: &Context) -> Result<()> {
    let file = File::open(&args.feed)
        .with_context(|| format!("Failed to open feed {}", args.feed.display()))?;

    let clock: Box<dyn Clock> = match args.now {
        Some(now) => Box::new(ManualClock::new(now)),
        None => Box::new(SystemClock),
    };
    let mut engine = ctx.start_engine(MemoryHost::new(args.viewer.clone()), clock)?;

    let mut lines = 0;
    let mut skipped = 0;
    let mut promoted_ids = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", args.feed.display()))?;
        let record = match FeedLine::parse(&line) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(err) => {
                warn!(line = index + 1, error = %err, "skipping unreadable feed line");
                skipped += 1;
                continue;
            }
        };
        lines += 1;

        match record {
            FeedLine::NewMessage { thread_id, message } => {
                engine.host_mut().upsert_message(message.clone());
                engine.dispatch(&LifecycleEvent::NewMessage { thread_id, message });
            }
            FeedLine::UpdatedMessage {
                thread_id,
                message_id,
                source,
            } => {
                let event = LifecycleEvent::UpdatedMessage {
                    thread_id,
                    message_id: message_id.clone(),
                    source,
                };
                if engine.dispatch(&event) {
                    promoted_ids.push(message_id);
                }
            }
            FeedLine::Status { message_id, status } => {
                if !engine.host_mut().set_status(&message_id, status) {
                    warn!(
                        line = index + 1,
                        message_id = %message_id,
                        "status for unknown message"
                    );
                }
            }
            FeedLine::Thread {
                thread_id,
                custom_nickname,
            } => engine
                .host_mut()
                .set_thread(thread_id, ThreadMetadata { custom_nickname }),
            FeedLine::Participant {
                participant_id,
                short_name,
            } => engine.host_mut().set_participant(participant_id, short_name),
        }
    }

    let notices = promoted_ids
        .into_iter()
        .filter_map(|id| {
            let reference = engine.store().lookup_retained(&id).map(MessageRef::from)?;
            engine
                .removed_content(&reference)
                .map(|notice| Notice { message_id: id, notice })
        })
        .collect::<Vec<_>>();

    let stats = engine.stats();
    let summary = ReplaySummary {
        lines,
        skipped,
        ingested: stats.counters.ingested,
        ignored: stats.counters.ignored,
        promoted: stats.counters.promoted_on_update,
        store: stats.store,
        notices,
    };
    let (_, sync) = engine.shutdown();
    info!(
        lines,
        skipped,
        writes_failed = sync.writes_failed,
        "replay finished"
    );

    render(ctx.output, &summary, |s, w| {
        pretty_section(w, "Replay")?;
        pretty_kv(w, "lines", s.lines.to_string())?;
        pretty_kv(w, "skipped", s.skipped.to_string())?;
        pretty_kv(w, "ingested", s.ingested.to_string())?;
        pretty_kv(w, "promoted", s.promoted.to_string())?;
        pretty_kv(w, "active", s.store.active.to_string())?;
        pretty_kv(w, "retained", s.store.retained.to_string())?;
        for notice in &s.notices {
            writeln!(w, "{}  {}", notice.message_id, notice.notice)?;
        }
        Ok(())
    })
}
