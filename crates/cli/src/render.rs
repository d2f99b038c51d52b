//! Output of received events.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use clap::ValueEnum;
use serde_json::Value;

use gerrit_events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per line, as sent by the server
    #[default]
    Json,
    /// One human-readable summary per line
    Text,
}

/// Account fields that name who triggered an event, by preference.
const ACTOR_FIELDS: &[&str] = &[
    "uploader",
    "author",
    "submitter",
    "abandoner",
    "restorer",
    "reviewer",
    "changer",
    "editor",
];

/// One-line description of `event`.
pub fn summarize(event: &Event) -> String {
    let Some(kind) = event.event_type() else {
        return format!("(untyped) {event}");
    };

    let mut line = format!("{kind}:");

    if let Some(change) = event.get("change") {
        let project = change.get("project").and_then(Value::as_str);
        let number = change.get("number").map(display_scalar);
        match (project, number) {
            (Some(project), Some(number)) => line.push_str(&format!(" {project}#{number}")),
            (Some(project), None) => line.push_str(&format!(" {project}")),
            (None, Some(number)) => line.push_str(&format!(" #{number}")),
            (None, None) => {}
        }
        if let Some(subject) = change.get("subject").and_then(Value::as_str) {
            line.push_str(&format!(" \"{subject}\""));
        }
    } else if let Some(update) = event.get("refUpdate") {
        let project = update.get("project").and_then(Value::as_str).unwrap_or("?");
        let name = update.get("refName").and_then(Value::as_str).unwrap_or("?");
        let old = update.get("oldRev").and_then(Value::as_str).map(short_rev);
        let new = update.get("newRev").and_then(Value::as_str).map(short_rev);
        line.push_str(&format!(" {project} {name}"));
        if let (Some(old), Some(new)) = (old, new) {
            line.push_str(&format!(" {old}..{new}"));
        }
    } else if let Some(project) = event.str_at(&["project"]) {
        line.push_str(&format!(" {project}"));
    }

    if let Some(who) = actor(event) {
        line.push_str(&format!(" by {who}"));
    }
    if line.ends_with(':') {
        line.pop();
    }
    line
}

fn actor(event: &Event) -> Option<String> {
    ACTOR_FIELDS.iter().find_map(|field| {
        let account = event.get(field)?;
        account
            .get("name")
            .or_else(|| account.get("username"))
            .or_else(|| account.get("email"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

fn display_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn short_rev(rev: &str) -> &str {
    rev.get(..7).unwrap_or(rev)
}

/// Writes events to `out`, optionally stopping after `limit` of them.
pub struct EventPrinter<W: Write + Send> {
    out: Mutex<W>,
    format: OutputFormat,
    printed: AtomicUsize,
    limit: Option<usize>,
}

impl<W: Write + Send> EventPrinter<W> {
    pub fn new(out: W, format: OutputFormat, limit: Option<usize>) -> Self {
        Self {
            out: Mutex::new(out),
            format,
            printed: AtomicUsize::new(0),
            limit,
        }
    }

    /// Print `event`. Returns `true` once the limit has been reached; events
    /// arriving after that are dropped.
    pub fn print(&self, event: &Event) -> io::Result<bool> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if self.limit_reached() {
            return Ok(true);
        }
        match self.format {
            OutputFormat::Json => writeln!(out, "{event}")?,
            OutputFormat::Text => writeln!(out, "{}", summarize(event))?,
        }
        out.flush()?;
        self.printed.fetch_add(1, Ordering::SeqCst);
        Ok(self.limit_reached())
    }

    pub fn printed(&self) -> usize {
        self.printed.load(Ordering::SeqCst)
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.printed() >= limit)
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
