//! Per-tenant job management and the job driver.
//!
//! One driver task per job walks the query list serially; URL work inside
//! a query fans out through the concurrency limiter. The driver owns its
//! map entry for its lifetime and removes it on the way out — that removal
//! is the only thing that clears `JobAlreadyRunning` for the tenant.

use dashmap::{DashMap, DashSet};
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::analyzer::{Analyzer, AnalyzerRegistry};
use crate::domain::{has_allowed_tld, is_noise_domain, normalize_domain};
use crate::error::{AppError, Result};
use crate::events::{Broadcaster, LogLevel, ScrapeEvent};
use crate::fetcher::{ScrapeOptions, SiteFetcher};
use crate::limiter::ConcurrencyLimiter;
use crate::models::{Counters, CounterSnapshot, JobConfig, QuerySpec, SessionStatus};
use crate::progress::{JobPhase, ProgressTracker, TrackerEvent};
use crate::search::SearchAdapter;
use crate::sink::{InsertOutcome, LeadSink, SessionStore, SessionUpdate};

/// Session counters are flushed and a `progress` event emitted every this
/// many completed lead/duplicate events.
const SESSION_FLUSH_EVERY: usize = 10;

struct JobHandle {
    session_id: String,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    tracker: Arc<ProgressTracker>,
}

/// Holds the per-tenant job map and shared pipeline components.
pub(crate) struct JobManager {
    jobs: Arc<DashMap<String, JobHandle>>,
    registry: Arc<AnalyzerRegistry>,
    search: Arc<SearchAdapter>,
    fetcher: Arc<SiteFetcher>,
    sessions: Arc<dyn SessionStore>,
    sink: Arc<dyn LeadSink>,
}

impl JobManager {
    pub(crate) fn new(
        registry: Arc<AnalyzerRegistry>,
        search: Arc<SearchAdapter>,
        fetcher: Arc<SiteFetcher>,
        sessions: Arc<dyn SessionStore>,
        sink: Arc<dyn LeadSink>,
    ) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            registry,
            search,
            fetcher,
            sessions,
            sink,
        }
    }

    /// Starts a job for the tenant and returns its session id. Fails with
    /// `JobAlreadyRunning` while the tenant has an active driver,
    /// `UnknownUseCase` for an unregistered analyzer key, and `NoQueries`
    /// when the selection produces nothing to search.
    pub(crate) async fn start(
        &self,
        tenant_id: &str,
        list_id: &str,
        use_case: &str,
        config: JobConfig,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<String> {
        if self.jobs.contains_key(tenant_id) {
            return Err(AppError::JobAlreadyRunning(tenant_id.to_string()));
        }

        let analyzer = self.registry.get(use_case)?;
        let queries = analyzer.generate_queries(&config);
        if queries.is_empty() {
            return Err(AppError::NoQueries);
        }

        let session_id = self
            .sessions
            .create(tenant_id, list_id, &config, &queries)
            .await?;

        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let tracker = Arc::new(ProgressTracker::new());

        use dashmap::mapref::entry::Entry;
        match self.jobs.entry(tenant_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(AppError::JobAlreadyRunning(tenant_id.to_string()));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(JobHandle {
                    session_id: session_id.clone(),
                    stop: Arc::clone(&stop),
                    counters: Arc::clone(&counters),
                    tracker: Arc::clone(&tracker),
                });
            }
        }

        tracing::info!(target: "job_driver",
            "Starting job for tenant '{}' ({} queries, use case '{}')",
            tenant_id, queries.len(), use_case);

        let driver = JobDriver {
            tenant_id: tenant_id.to_string(),
            list_id: list_id.to_string(),
            session_id: session_id.clone(),
            config,
            queries,
            analyzer,
            search: Arc::clone(&self.search),
            fetcher: Arc::clone(&self.fetcher),
            sessions: Arc::clone(&self.sessions),
            sink: Arc::clone(&self.sink),
            broadcaster,
            stop,
            counters,
            tracker,
        };

        let jobs = Arc::clone(&self.jobs);
        let tenant_key = tenant_id.to_string();
        tokio::spawn(async move {
            let tracker = Arc::clone(&driver.tracker);
            let sessions = Arc::clone(&driver.sessions);
            let broadcaster = Arc::clone(&driver.broadcaster);
            let counters = Arc::clone(&driver.counters);
            let session_id = driver.session_id.clone();

            let outcome = AssertUnwindSafe(driver.run()).catch_unwind().await;

            let final_status = match outcome {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    tracing::error!(target: "job_driver",
                        "Job for tenant '{}' failed: {}", tenant_key, e);
                    broadcaster.broadcast(&ScrapeEvent::JobError {
                        error: e.to_string(),
                    });
                    SessionStatus::Error
                }
                Err(_) => {
                    tracing::error!(target: "job_driver",
                        "Job driver for tenant '{}' panicked", tenant_key);
                    broadcaster.broadcast(&ScrapeEvent::JobError {
                        error: "job driver panicked".to_string(),
                    });
                    SessionStatus::Error
                }
            };

            let snapshot = counters.snapshot();
            if let Err(e) = sessions
                .update(
                    &session_id,
                    SessionUpdate {
                        counters: snapshot,
                        status: final_status,
                    },
                )
                .await
            {
                tracing::error!(target: "job_driver",
                    "Failed to persist final session state: {}", e);
            }
            tracker.set_status(JobPhase::Done);
            if !matches!(final_status, SessionStatus::Error) {
                broadcaster.broadcast(&ScrapeEvent::JobDone {
                    final_status,
                    counters: snapshot,
                });
            }
            // releasing the tenant entry is what allows the next start()
            jobs.remove(&tenant_key);
        });

        Ok(session_id)
    }

    /// Requests cooperative stop. Returns whether a job existed.
    pub(crate) fn stop(&self, tenant_id: &str) -> bool {
        match self.jobs.get(tenant_id) {
            Some(handle) => {
                tracing::info!(target: "job_driver",
                    "Stop requested for tenant '{}' (session {})",
                    tenant_id, handle.session_id);
                handle.stop.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Requests stop on every active job (shutdown path).
    pub(crate) fn stop_all(&self) {
        for entry in self.jobs.iter() {
            entry.value().stop.store(true, Ordering::SeqCst);
        }
    }

    /// Counter snapshot of the tenant's active job, if any.
    pub(crate) fn status(&self, tenant_id: &str) -> Option<CounterSnapshot> {
        self.jobs.get(tenant_id).map(|h| h.counters.snapshot())
    }

    /// Subscribes to the active job's tracker updates (snapshots + log
    /// entries), if the tenant has one.
    pub(crate) fn subscribe_progress(
        &self,
        tenant_id: &str,
    ) -> Option<tokio::sync::broadcast::Receiver<TrackerEvent>> {
        self.jobs.get(tenant_id).map(|h| h.tracker.subscribe())
    }

    /// Progress snapshot of the tenant's active job, if any.
    pub(crate) fn progress(&self, tenant_id: &str) -> Option<crate::progress::ProgressSnapshot> {
        self.jobs.get(tenant_id).map(|h| h.tracker.snapshot())
    }

    pub(crate) fn active_count(&self) -> usize {
        self.jobs.len()
    }
}

struct JobDriver {
    tenant_id: String,
    list_id: String,
    session_id: String,
    config: JobConfig,
    queries: Vec<QuerySpec>,
    analyzer: Arc<dyn Analyzer>,
    search: Arc<SearchAdapter>,
    fetcher: Arc<SiteFetcher>,
    sessions: Arc<dyn SessionStore>,
    sink: Arc<dyn LeadSink>,
    broadcaster: Arc<dyn Broadcaster>,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    tracker: Arc<ProgressTracker>,
}

impl JobDriver {
    fn log(&self, level: LogLevel, message: String) {
        let entry = self.tracker.log(level, message);
        self.broadcaster.broadcast(&ScrapeEvent::Log {
            level: entry.level,
            message: entry.message,
        });
    }

    async fn run(self) -> Result<SessionStatus> {
        self.tracker.start(self.queries.len());
        self.broadcaster.broadcast(&ScrapeEvent::JobStarted {
            session_id: self.session_id.clone(),
            queries: self.queries.iter().map(|q| q.query.clone()).collect(),
        });
        let limiter = ConcurrencyLimiter::new(self.config.concurrency);
        self.log(
            LogLevel::Info,
            format!(
                "Job started with {} queries (concurrency {})",
                self.queries.len(),
                limiter.max()
            ),
        );
        let processed: Arc<DashSet<String>> = Arc::new(DashSet::new());
        let mut stopped = false;

        for spec in &self.queries {
            if self.stop.load(Ordering::SeqCst) {
                stopped = true;
                break;
            }
            if self.counters.leads_found() >= self.config.target_leads {
                break;
            }

            self.tracker.start_query(&spec.sector_label, &spec.country_label);
            self.broadcaster.broadcast(&ScrapeEvent::QueryStart {
                query: spec.query.clone(),
                sector: spec.sector_label.clone(),
            });

            let result = self.search.search(&spec.query, self.config.use_browser).await;
            self.broadcaster.broadcast(&ScrapeEvent::SearchProgress {
                query: spec.query.clone(),
                results_found: result.urls.len(),
                blocked: result.blocked,
                source: result.source,
                error: result.error.clone(),
            });
            if result.blocked {
                self.log(LogLevel::Warn, format!("Search blocked for '{}'", spec.query));
            }

            let urls: Vec<String> = result
                .urls
                .into_iter()
                .filter(|url| match normalize_domain(url) {
                    Ok(domain) => {
                        has_allowed_tld(&domain)
                            && !is_noise_domain(&domain)
                            && !processed.contains(&domain)
                    }
                    Err(_) => false,
                })
                .collect();

            self.tracker.add_domains(urls.len());
            self.broadcaster
                .broadcast(&ScrapeEvent::DomainsFound { count: urls.len() });

            // all URL tasks settle before the next query starts
            let driver: &JobDriver = &self;
            let tasks = urls.into_iter().map(|url| {
                let limiter = limiter.clone();
                let processed = Arc::clone(&processed);
                async move { limiter.run(driver.process_url(url, processed)).await }
            });
            join_all(tasks).await;

            self.tracker.finish_query();
        }

        let final_status = if stopped {
            self.tracker.set_status(JobPhase::Stopping);
            self.log(LogLevel::Info, "Job stopped on request".to_string());
            SessionStatus::Stopped
        } else {
            self.log(
                LogLevel::Success,
                format!("Job done: {} leads", self.counters.leads_found()),
            );
            SessionStatus::Done
        };
        Ok(final_status)
    }

    async fn process_url(&self, url: String, processed: Arc<DashSet<String>>) {
        if self.stop.load(Ordering::SeqCst) {
            return;
        }
        let domain = match normalize_domain(&url) {
            Ok(domain) => domain,
            Err(_) => return,
        };
        if is_noise_domain(&domain) {
            return;
        }
        // claim the domain before any work so overlapping results from
        // parallel queries cannot double-fetch it
        if !processed.insert(domain.clone()) {
            return;
        }

        self.tracker.set_current_domain(&domain);

        let opts = ScrapeOptions {
            email_validation: self.config.email_validation,
            deep_validation: self.config.deep_validation,
        };

        match self.fetcher.scrape(&url, &self.analyzer, opts).await {
            Err(e) => {
                self.counters.record_error();
                self.tracker.record_error();
                self.log(LogLevel::Warn, format!("Scrape failed for {}: {}", domain, e));
            }
            Ok(None) => {
                tracing::debug!(target: "job_driver",
                    "Skipped {} (noise or already visited)", domain);
            }
            Ok(Some(lead)) => {
                if lead.score < self.config.min_score {
                    self.log(
                        LogLevel::Info,
                        format!(
                            "Dropped {} (score {} below threshold {})",
                            domain, lead.score, self.config.min_score
                        ),
                    );
                } else {
                    match self
                        .sink
                        .insert_deduped(&lead, &self.tenant_id, &self.list_id)
                        .await
                    {
                        Ok(InsertOutcome::Inserted { .. }) => {
                            self.counters.record_lead();
                            self.tracker.record_lead();
                            self.log(
                                LogLevel::Success,
                                format!("Lead: {} ({})", lead.company_name, domain),
                            );
                            self.broadcaster.broadcast(&ScrapeEvent::Lead { lead });
                        }
                        Ok(InsertOutcome::Duplicate) => {
                            self.counters.record_duplicate();
                        }
                        Ok(InsertOutcome::InvalidDomain) => {
                            self.counters.record_error();
                            self.tracker.record_error();
                        }
                        Err(e) => {
                            self.counters.record_error();
                            self.tracker.record_error();
                            self.log(
                                LogLevel::Error,
                                format!("Persistence failed for {}: {}", domain, e),
                            );
                        }
                    }
                    self.flush_progress_if_due().await;
                }
            }
        }

        self.tracker.domain_done();
    }

    async fn flush_progress_if_due(&self) {
        let snapshot = self.counters.snapshot();
        let completed = snapshot.leads_found + snapshot.duplicates_skipped;
        if completed > 0 && completed % SESSION_FLUSH_EVERY == 0 {
            if let Err(e) = self
                .sessions
                .update(
                    &self.session_id,
                    SessionUpdate {
                        counters: snapshot,
                        status: SessionStatus::Running,
                    },
                )
                .await
            {
                tracing::warn!(target: "job_driver", "Session flush failed: {}", e);
            }
            self.broadcaster
                .broadcast(&ScrapeEvent::Progress { counters: snapshot });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ScraperCache;
    use crate::config::Config;
    use crate::events::CollectingBroadcaster;
    use crate::sink::{MemoryLeadSink, MemorySessionStore};
    use crate::validator::EmailValidator;
    use std::time::Duration;

    struct Harness {
        manager: JobManager,
        sessions: Arc<MemorySessionStore>,
    }

    fn harness() -> Harness {
        // searches in these tests either never run (target 0) or hit an
        // unroutable local endpoint and fail instantly
        let mut config = Config::default_config();
        config.search_html_endpoint = "http://127.0.0.1:1/".to_string();
        let config = Arc::new(config);

        let cache = Arc::new(ScraperCache::new());
        let validator =
            Arc::new(EmailValidator::new(Arc::clone(&config), Arc::clone(&cache)).unwrap());
        let fetcher = Arc::new(
            SiteFetcher::new(Arc::clone(&config), Arc::clone(&cache), validator).unwrap(),
        );
        let search =
            Arc::new(SearchAdapter::new(Arc::clone(&config), Arc::clone(&cache)).unwrap());
        let registry = Arc::new(AnalyzerRegistry::with_builtins(None));
        let sessions = Arc::new(MemorySessionStore::new());
        let sink = Arc::new(MemoryLeadSink::new());

        Harness {
            manager: JobManager::new(
                registry,
                search,
                fetcher,
                Arc::clone(&sessions) as Arc<dyn SessionStore>,
                sink,
            ),
            sessions,
        }
    }

    fn immediate_exit_config() -> JobConfig {
        // target 0 makes the driver exit at the loop head, before any search
        JobConfig {
            target_leads: 0,
            use_browser: false,
            ..JobConfig::default()
        }
    }

    async fn wait_for_exit(manager: &JobManager, tenant: &str) {
        for _ in 0..200 {
            if manager.status(tenant).is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job for {} did not exit", tenant);
    }

    #[tokio::test]
    async fn second_start_fails_until_driver_exits() {
        let h = harness();
        let broadcaster = Arc::new(CollectingBroadcaster::new());

        let session_id = h
            .manager
            .start("t1", "l1", "erp", immediate_exit_config(), broadcaster.clone())
            .await
            .unwrap();
        assert!(h.sessions.get(&session_id).is_some());

        let again = h
            .manager
            .start("t1", "l1", "erp", immediate_exit_config(), broadcaster.clone())
            .await;
        assert!(matches!(again, Err(AppError::JobAlreadyRunning(_))));

        wait_for_exit(&h.manager, "t1").await;

        let third = h
            .manager
            .start("t1", "l1", "erp", immediate_exit_config(), broadcaster)
            .await;
        assert!(third.is_ok());
        wait_for_exit(&h.manager, "t1").await;
    }

    #[tokio::test]
    async fn cross_tenant_jobs_run_concurrently() {
        let h = harness();
        let broadcaster = Arc::new(CollectingBroadcaster::new());
        h.manager
            .start("t1", "l1", "erp", immediate_exit_config(), broadcaster.clone())
            .await
            .unwrap();
        let other = h
            .manager
            .start("t2", "l1", "erp", immediate_exit_config(), broadcaster)
            .await;
        assert!(other.is_ok());
        assert_eq!(h.manager.active_count(), 2);
        wait_for_exit(&h.manager, "t1").await;
        wait_for_exit(&h.manager, "t2").await;
    }

    #[tokio::test]
    async fn empty_selection_is_no_queries() {
        let h = harness();
        let config = JobConfig {
            sector_keys: vec!["nonexistent".into()],
            ..immediate_exit_config()
        };
        let result = h
            .manager
            .start("t1", "l1", "erp", config, Arc::new(CollectingBroadcaster::new()))
            .await;
        assert!(matches!(result, Err(AppError::NoQueries)));
    }

    #[tokio::test]
    async fn unknown_use_case_is_rejected() {
        let h = harness();
        let result = h
            .manager
            .start(
                "t1",
                "l1",
                "astrology",
                immediate_exit_config(),
                Arc::new(CollectingBroadcaster::new()),
            )
            .await;
        assert!(matches!(result, Err(AppError::UnknownUseCase(_))));
    }

    #[tokio::test]
    async fn stop_reports_whether_a_job_existed() {
        let h = harness();
        assert!(!h.manager.stop("t1"));

        h.manager
            .start(
                "t1",
                "l1",
                "erp",
                immediate_exit_config(),
                Arc::new(CollectingBroadcaster::new()),
            )
            .await
            .unwrap();
        assert!(h.manager.stop("t1"));
        wait_for_exit(&h.manager, "t1").await;
        assert!(!h.manager.stop("t1"));
    }

    #[tokio::test]
    async fn driver_emits_ordered_events_and_finishes_session() {
        let h = harness();
        let broadcaster = Arc::new(CollectingBroadcaster::new());
        // three queries against an unroutable endpoint: every search fails
        // fast with zero URLs, the driver walks all queries and finishes
        let config = JobConfig {
            sector_keys: vec!["wholesale".into()],
            country_keys: vec!["nl".into()],
            use_browser: false,
            ..JobConfig::default()
        };
        let session_id = h
            .manager
            .start("t1", "l1", "erp", config, broadcaster.clone())
            .await
            .unwrap();
        wait_for_exit(&h.manager, "t1").await;

        let events = broadcaster.events.lock().unwrap().clone();
        assert!(matches!(events.first(), Some(ScrapeEvent::JobStarted { .. })));
        assert!(matches!(events.last(), Some(ScrapeEvent::JobDone { .. })));

        let query_starts = events
            .iter()
            .filter(|e| matches!(e, ScrapeEvent::QueryStart { .. }))
            .count();
        assert_eq!(query_starts, 3);
        let domains_found = events
            .iter()
            .filter(|e| matches!(e, ScrapeEvent::DomainsFound { count: 0 }))
            .count();
        assert_eq!(domains_found, 3);

        // query_start always precedes the matching domains_found
        let first_query_idx = events
            .iter()
            .position(|e| matches!(e, ScrapeEvent::QueryStart { .. }))
            .unwrap();
        let first_domains_idx = events
            .iter()
            .position(|e| matches!(e, ScrapeEvent::DomainsFound { .. }))
            .unwrap();
        assert!(first_query_idx < first_domains_idx);

        let record = h.sessions.get(&session_id).unwrap();
        assert_eq!(record.status, SessionStatus::Done);
    }
}
