//! Per-job progress tracking: counters, rate, ETA and the log ring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::broadcast;

use crate::events::LogLevel;

/// Maximum retained log entries; older lines are dropped first.
const LOG_RING_CAPACITY: usize = 500;

/// Sliding window for the leads-per-minute rate.
const RATE_WINDOW_SECS: u64 = 60;

/// Capacity of the in-process update channel.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle state of the tracked job.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum JobPhase {
    Idle,
    Running,
    Stopping,
    Done,
}

/// One line in the bounded log ring.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct LogEntry {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Serializable point-in-time view of the tracker.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct ProgressSnapshot {
    pub status: JobPhase,
    pub total_queries: usize,
    pub processed_queries: usize,
    pub total_domains: usize,
    pub processed_domains: usize,
    pub leads_found: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_sector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_domain: Option<String>,
    /// 0-100, rounded.
    pub progress_pct: u8,
    /// Leads persisted in the last 60 seconds.
    pub leads_per_minute: usize,
    /// Estimated seconds remaining; absent until there is measurable progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    pub elapsed_seconds: u64,
}

/// In-process tracker events for subscribers (UI, tests).
#[derive(Debug, Clone)]
pub(crate) enum TrackerEvent {
    Update(ProgressSnapshot),
    Log(LogEntry),
}

struct TrackerState {
    status: JobPhase,
    started_at: Instant,
    total_queries: usize,
    processed_queries: usize,
    total_domains: usize,
    processed_domains: usize,
    leads_found: usize,
    errors: usize,
    current_sector: Option<String>,
    current_country: Option<String>,
    current_domain: Option<String>,
    lead_times: VecDeque<Instant>,
    log: VecDeque<LogEntry>,
}

impl TrackerState {
    fn new() -> Self {
        Self {
            status: JobPhase::Idle,
            started_at: Instant::now(),
            total_queries: 0,
            processed_queries: 0,
            total_domains: 0,
            processed_domains: 0,
            leads_found: 0,
            errors: 0,
            current_sector: None,
            current_country: None,
            current_domain: None,
            lead_times: VecDeque::new(),
            log: VecDeque::new(),
        }
    }

    fn snapshot(&mut self) -> ProgressSnapshot {
        let now = Instant::now();
        while let Some(front) = self.lead_times.front() {
            if now.duration_since(*front).as_secs() >= RATE_WINDOW_SECS {
                self.lead_times.pop_front();
            } else {
                break;
            }
        }

        let elapsed = self.started_at.elapsed();
        let progress_pct = if self.total_domains == 0 {
            0
        } else {
            let pct =
                (self.processed_domains as f64 / self.total_domains as f64 * 100.0).round() as u64;
            pct.min(100) as u8
        };

        let eta_seconds = if self.processed_domains == 0 || elapsed.as_secs_f64() <= 0.0 {
            None
        } else {
            let rate = self.processed_domains as f64 / elapsed.as_secs_f64();
            if rate <= 0.0 {
                None
            } else {
                let remaining = self.total_domains.saturating_sub(self.processed_domains);
                Some((remaining as f64 / rate).round() as u64)
            }
        };

        ProgressSnapshot {
            status: self.status,
            total_queries: self.total_queries,
            processed_queries: self.processed_queries,
            total_domains: self.total_domains,
            processed_domains: self.processed_domains,
            leads_found: self.leads_found,
            errors: self.errors,
            current_sector: self.current_sector.clone(),
            current_country: self.current_country.clone(),
            current_domain: self.current_domain.clone(),
            progress_pct,
            leads_per_minute: self.lead_times.len(),
            eta_seconds,
            elapsed_seconds: elapsed.as_secs(),
        }
    }
}

/// Tracks one job's progress. Every mutator publishes an updated snapshot
/// (defensive copy) on the subscriber channel.
pub(crate) struct ProgressTracker {
    state: Mutex<TrackerState>,
    updates: broadcast::Sender<TrackerEvent>,
}

impl ProgressTracker {
    pub(crate) fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(TrackerState::new()),
            updates,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.updates.subscribe()
    }

    fn mutate<F: FnOnce(&mut TrackerState)>(&self, f: F) {
        let snapshot = {
            let mut state = self.state.lock().expect("tracker lock poisoned");
            f(&mut state);
            state.snapshot()
        };
        let _ = self.updates.send(TrackerEvent::Update(snapshot));
    }

    pub(crate) fn start(&self, total_queries: usize) {
        self.mutate(|s| {
            s.status = JobPhase::Running;
            s.started_at = Instant::now();
            s.total_queries = total_queries;
        });
    }

    pub(crate) fn set_status(&self, status: JobPhase) {
        self.mutate(|s| s.status = status);
    }

    pub(crate) fn start_query(&self, sector: &str, country: &str) {
        self.mutate(|s| {
            s.current_sector = Some(sector.to_string());
            s.current_country = Some(country.to_string());
            s.current_domain = None;
        });
    }

    pub(crate) fn finish_query(&self) {
        self.mutate(|s| s.processed_queries += 1);
    }

    pub(crate) fn add_domains(&self, count: usize) {
        self.mutate(|s| s.total_domains += count);
    }

    pub(crate) fn set_current_domain(&self, domain: &str) {
        self.mutate(|s| s.current_domain = Some(domain.to_string()));
    }

    pub(crate) fn domain_done(&self) {
        self.mutate(|s| {
            s.processed_domains = (s.processed_domains + 1).min(s.total_domains);
        });
    }

    pub(crate) fn record_lead(&self) {
        self.mutate(|s| {
            s.leads_found += 1;
            s.lead_times.push_back(Instant::now());
        });
    }

    pub(crate) fn record_error(&self) {
        self.mutate(|s| s.errors += 1);
    }

    /// Appends to the log ring and publishes the entry. Returns the entry
    /// so the caller can forward it to the client broadcaster.
    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            ts: Utc::now(),
            level,
            message: message.into(),
        };
        {
            let mut state = self.state.lock().expect("tracker lock poisoned");
            if state.log.len() == LOG_RING_CAPACITY {
                state.log.pop_front();
            }
            state.log.push_back(entry.clone());
        }
        let _ = self.updates.send(TrackerEvent::Log(entry.clone()));
        entry
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().expect("tracker lock poisoned").snapshot()
    }

    #[cfg(test)]
    pub(crate) fn log_len(&self) -> usize {
        self.state.lock().unwrap().log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pct_stays_in_bounds() {
        let tracker = ProgressTracker::new();
        tracker.start(2);
        assert_eq!(tracker.snapshot().progress_pct, 0);

        tracker.add_domains(4);
        tracker.domain_done();
        assert_eq!(tracker.snapshot().progress_pct, 25);

        for _ in 0..10 {
            tracker.domain_done();
        }
        let snap = tracker.snapshot();
        assert_eq!(snap.progress_pct, 100);
        assert!(snap.processed_domains <= snap.total_domains);
    }

    #[test]
    fn eta_absent_until_progress() {
        let tracker = ProgressTracker::new();
        tracker.start(1);
        tracker.add_domains(10);
        assert_eq!(tracker.snapshot().eta_seconds, None);

        std::thread::sleep(std::time::Duration::from_millis(10));
        tracker.domain_done();
        let eta = tracker.snapshot().eta_seconds;
        assert!(eta.is_some());
    }

    #[test]
    fn log_ring_drops_oldest() {
        let tracker = ProgressTracker::new();
        for i in 0..(LOG_RING_CAPACITY + 25) {
            tracker.log(LogLevel::Info, format!("line {}", i));
        }
        assert_eq!(tracker.log_len(), LOG_RING_CAPACITY);
    }

    #[test]
    fn leads_per_minute_counts_recent() {
        let tracker = ProgressTracker::new();
        tracker.start(1);
        tracker.record_lead();
        tracker.record_lead();
        assert_eq!(tracker.snapshot().leads_per_minute, 2);
    }

    #[tokio::test]
    async fn mutators_publish_updates() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();
        tracker.start(3);
        match rx.recv().await.unwrap() {
            TrackerEvent::Update(snap) => {
                assert_eq!(snap.total_queries, 3);
                assert_eq!(snap.status, JobPhase::Running);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
