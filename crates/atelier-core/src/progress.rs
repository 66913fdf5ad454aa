//! Front-end event surfaces for image pulls and container logs.
//!
//! Engine pull progress arrives per layer; front ends want one percentage.
//! [`PullTracker`] aggregates layer byte counts into an integer percent and
//! only reports when it changes, so a pull emits at most 101 progress
//! events plus one terminal event.

use atelier_engine::{LogStream, PullPhase, PullProgress, PullStream};
use futures::stream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// One JSON event of a pull stream: `{"progress": 42}`,
/// `{"status": "completed"}` or `{"error": "..."}`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PullEvent {
    Progress { progress: u8 },
    Status { status: String },
    Error { error: String },
}

impl PullEvent {
    pub fn completed() -> Self {
        PullEvent::Status {
            status: "completed".to_owned(),
        }
    }
}

/// One JSON event of a log stream: `{"line": "..."}`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogEvent {
    pub line: String,
}

/// Aggregates per-layer pull progress into a single 0-100 percentage.
#[derive(Debug, Default)]
pub struct PullTracker {
    layers: BTreeMap<String, (u64, u64)>,
    last_percent: Option<u8>,
}

impl PullTracker {
    /// Fold one engine event in; returns the new percentage when it moved.
    pub fn observe(&mut self, progress: &PullProgress) -> Option<u8> {
        let key = progress.layer_id.clone().unwrap_or_default();
        let entry = self.layers.entry(key).or_default();
        match progress.phase {
            PullPhase::Downloading => {
                *entry = (progress.bytes_current, progress.bytes_total.max(entry.1));
            }
            PullPhase::AlreadyExists | PullPhase::Complete => {
                // Terminal layer events often carry no byte counts; a layer
                // with an unknown size still has to count as finished.
                let total = if entry.1 == 0 {
                    progress.bytes_total.max(1)
                } else {
                    entry.1
                };
                *entry = (total, total);
            }
        }

        let percent = self.percent();
        if self.last_percent == Some(percent) {
            None
        } else {
            self.last_percent = Some(percent);
            Some(percent)
        }
    }

    pub fn percent(&self) -> u8 {
        let (current, total) = self
            .layers
            .values()
            .fold((0u64, 0u64), |(c, t), (lc, lt)| (c + lc, t + lt));
        if total == 0 {
            0
        } else {
            ((current * 100) / total).min(100) as u8
        }
    }
}

/// Adapt an engine pull stream to the front-end event shape. The stream
/// terminates after the first error or, on success, after one `completed`
/// status event.
pub fn pull_events(inner: PullStream) -> impl Stream<Item = PullEvent> + Send {
    stream::unfold(
        (inner, PullTracker::default(), false),
        |(mut inner, mut tracker, done)| async move {
            if done {
                return None;
            }
            loop {
                match inner.next().await {
                    Some(Ok(progress)) => {
                        if let Some(percent) = tracker.observe(&progress) {
                            return Some((
                                PullEvent::Progress { progress: percent },
                                (inner, tracker, false),
                            ));
                        }
                    }
                    Some(Err(error)) => {
                        return Some((
                            PullEvent::Error {
                                error: error.to_string(),
                            },
                            (inner, tracker, true),
                        ));
                    }
                    None => return Some((PullEvent::completed(), (inner, tracker, true))),
                }
            }
        },
    )
}

/// Adapt an engine log stream to the front-end event shape. A transport
/// error ends the stream; the error itself is not a log line.
pub fn log_events(inner: LogStream) -> impl Stream<Item = LogEvent> + Send {
    inner.scan((), |_, item| {
        let next = match item {
            Ok(line) => Some(LogEvent { line }),
            Err(error) => {
                debug!(%error, "log stream ended");
                None
            }
        };
        async move { next }
    })
}
