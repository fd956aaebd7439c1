//! Client-facing job events and the broadcaster seam.
//!
//! Each variant serializes as internally-tagged JSON (`"type": "..."`),
//! ready for whatever transport the embedding application uses. Delivery
//! is fire-and-forget: a slow or absent subscriber never stalls a job.

use serde::{Deserialize, Serialize};

use crate::models::{CounterSnapshot, Lead, SearchSource, SessionStatus};

/// Severity of a job log line.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

/// Events emitted while a job runs.
///
/// Ordering per query: `query_start` precedes any `lead` for that query;
/// `job_done` is always the last event of a session.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ScrapeEvent {
    /// The job driver has started.
    JobStarted {
        session_id: String,
        queries: Vec<String>,
    },

    /// A search query is about to run.
    QueryStart { query: String, sector: String },

    /// Candidate domains surviving the result filter for the current query.
    DomainsFound { count: usize },

    /// A lead was persisted.
    Lead { lead: Lead },

    /// Periodic counter flush (every 10 lead/duplicate completions).
    Progress { counters: CounterSnapshot },

    /// Outcome of a single search-engine round trip.
    SearchProgress {
        query: String,
        results_found: usize,
        blocked: bool,
        source: SearchSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A log line surfaced to the client.
    Log { level: LogLevel, message: String },

    /// The driver failed; the session is marked `error`.
    JobError { error: String },

    /// The driver exited normally.
    JobDone {
        final_status: SessionStatus,
        counters: CounterSnapshot,
    },
}

/// Event delivery as seen by the job driver. Implementations must not
/// block; queue or drop under pressure.
pub(crate) trait Broadcaster: Send + Sync {
    fn broadcast(&self, event: &ScrapeEvent);
}

/// Broadcaster backed by a tokio broadcast channel. Send failures (no
/// active receivers) are ignored.
pub(crate) struct ChannelBroadcaster {
    sender: tokio::sync::broadcast::Sender<ScrapeEvent>,
}

impl ChannelBroadcaster {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ScrapeEvent> {
        self.sender.subscribe()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, event: &ScrapeEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// Test broadcaster that records every event in order.
#[cfg(test)]
pub(crate) struct CollectingBroadcaster {
    pub events: std::sync::Mutex<Vec<ScrapeEvent>>,
}

#[cfg(test)]
impl CollectingBroadcaster {
    pub(crate) fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl Broadcaster for CollectingBroadcaster {
    fn broadcast(&self, event: &ScrapeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_tagged() {
        let event = ScrapeEvent::DomainsFound { count: 7 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "domains_found");
        assert_eq!(json["count"], 7);

        let event = ScrapeEvent::SearchProgress {
            query: "q".into(),
            results_found: 0,
            blocked: true,
            source: SearchSource::Browser,
            error: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "search_progress");
        assert_eq!(json["source"], "browser");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn channel_broadcaster_fans_out() {
        let broadcaster = ChannelBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        broadcaster.broadcast(&ScrapeEvent::DomainsFound { count: 1 });
        match rx.recv().await.unwrap() {
            ScrapeEvent::DomainsFound { count } => assert_eq!(count, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn broadcast_without_receivers_is_fine() {
        let broadcaster = ChannelBroadcaster::new(4);
        broadcaster.broadcast(&ScrapeEvent::DomainsFound { count: 1 });
    }
}
