//! # Lead Sleuth
//!
//! Sector-driven lead generation: issues search-engine queries per sector
//! and country, scrapes candidate company sites for contact data, scores
//! them against a pluggable analyzer, verifies the primary email address
//! and persists the surviving leads.
//! This serves as the main entry point for the application.

#![warn(missing_docs, unreachable_pub, rust_2018_idioms)]

mod analyzer;
mod cache;
mod config;
mod dns;
mod domain;
mod erp;
mod error;
mod events;
mod fetcher;
mod limiter;
mod manager;
mod models;
mod progress;
mod recruitment;
mod search;
mod sink;
mod validator;

use crate::analyzer::AnalyzerRegistry;
use crate::cache::ScraperCache;
use crate::config::build_config;
use crate::events::{Broadcaster, ChannelBroadcaster, ScrapeEvent};
use crate::fetcher::SiteFetcher;
use crate::manager::JobManager;
use crate::progress::TrackerEvent;
use crate::search::SearchAdapter;
use crate::sink::{LeadSink, MemoryLeadSink, MemorySessionStore, SessionRecord, SessionStore};
use crate::validator::EmailValidator;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::FmtSubscriber;

/// Main entry point for the Lead Sleuth application.
///
/// Initializes logging, loads configuration, wires the pipeline, runs one
/// job for the configured tenant and writes the surviving leads.
#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_thread_names(true)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default tracing subscriber failed");

    tracing::info!(
        "Logging initialized. Starting Lead Sleuth v{}...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Arc::new(build_config()?);
    tracing::debug!("Using configuration: {:?}", config);

    let start_time = std::time::Instant::now();

    let cache = Arc::new(ScraperCache::new());
    let _cache_cleanup = cache.spawn_cleanup();

    let validator = Arc::new(EmailValidator::new(Arc::clone(&config), Arc::clone(&cache))?);
    let fetcher = Arc::new(SiteFetcher::new(
        Arc::clone(&config),
        Arc::clone(&cache),
        validator,
    )?);
    let search = Arc::new(SearchAdapter::new(Arc::clone(&config), Arc::clone(&cache))?);
    let registry = Arc::new(AnalyzerRegistry::with_builtins(config.sectors_file.as_deref()));
    let sessions = Arc::new(MemorySessionStore::new());
    let sink = Arc::new(MemoryLeadSink::new());

    let manager = Arc::new(JobManager::new(
        registry,
        Arc::clone(&search),
        fetcher,
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
        Arc::clone(&sink) as Arc<dyn LeadSink>,
    ));

    // every run starts from a clean visited-domain set
    cache.clear();

    let broadcaster = Arc::new(ChannelBroadcaster::new(1024));
    let ui_task = tokio::spawn(render_events(broadcaster.subscribe()));

    let session_id = manager
        .start(
            &config.tenant,
            &config.list_id,
            &config.use_case,
            config.job.clone(),
            Arc::clone(&broadcaster) as Arc<dyn Broadcaster>,
        )
        .await?;
    tracing::info!(
        "Session {} started for tenant '{}' (use case '{}')",
        session_id,
        config.tenant,
        config.use_case
    );

    if let Some(updates) = manager.subscribe_progress(&config.tenant) {
        tokio::spawn(trace_progress(updates));
    }

    tokio::select! {
        _ = wait_for_completion(Arc::clone(&manager), config.tenant.clone()) => {}
        _ = shutdown_signal() => {
            tracing::warn!("Shutdown requested; stopping all active jobs");
            manager.stop_all();
            wait_for_completion(Arc::clone(&manager), config.tenant.clone()).await;
        }
    }

    ui_task.abort();
    search.shutdown().await;

    sink.save_json(&config.output_file)
        .with_context(|| format!("Failed to save leads to '{}'", config.output_file))?;
    tracing::info!("Leads saved to '{}'", config.output_file);

    log_summary(
        sessions.get(&session_id),
        sink.len(),
        cache.visited_count(),
        start_time.elapsed(),
    );

    Ok(())
}

/// Logs tracker snapshots at debug level for troubleshooting runs.
async fn trace_progress(mut updates: tokio::sync::broadcast::Receiver<TrackerEvent>) {
    loop {
        match updates.recv().await {
            Ok(TrackerEvent::Update(snapshot)) => {
                tracing::debug!(
                    "progress {}% ({}/{} domains, {} leads, eta {:?}s)",
                    snapshot.progress_pct,
                    snapshot.processed_domains,
                    snapshot.total_domains,
                    snapshot.leads_found,
                    snapshot.eta_seconds
                );
            }
            Ok(TrackerEvent::Log(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
}

/// Resolves once the tenant's job has left the active map.
async fn wait_for_completion(manager: Arc<JobManager>, tenant: String) {
    loop {
        if manager.status(&tenant).is_none() {
            return;
        }
        if let Some(snapshot) = manager.progress(&tenant) {
            tracing::trace!(
                "waiting: {}% done, {} queries processed",
                snapshot.progress_pct,
                snapshot.processed_queries
            );
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Completes on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Renders broadcast events as a terminal spinner with per-lead lines.
async fn render_events(mut events: tokio::sync::broadcast::Receiver<ScrapeEvent>) {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));

    let mut queries = 0usize;
    let mut domains = 0usize;
    let mut leads = 0usize;

    loop {
        match events.recv().await {
            Ok(ScrapeEvent::QueryStart { query, .. }) => {
                queries += 1;
                pb.set_message(format!("[query {}] {}", queries, query));
            }
            Ok(ScrapeEvent::DomainsFound { count }) => {
                domains += count;
                pb.set_message(format!("{} domains queued, {} leads", domains, leads));
            }
            Ok(ScrapeEvent::Lead { lead }) => {
                leads += 1;
                pb.println(format!(
                    "+ {} ({}) score {}",
                    lead.company_name, lead.domain, lead.score
                ));
                pb.set_message(format!("{} domains queued, {} leads", domains, leads));
            }
            Ok(ScrapeEvent::JobError { error }) => {
                pb.finish_with_message(format!("job failed: {}", error));
                break;
            }
            Ok(ScrapeEvent::JobDone {
                final_status,
                counters,
            }) => {
                pb.finish_with_message(format!(
                    "{:?}: {} leads, {} duplicates, {} errors",
                    final_status,
                    counters.leads_found,
                    counters.duplicates_skipped,
                    counters.errors_count
                ));
                break;
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Event renderer lagged, skipped {} events", skipped);
            }
            Err(_) => break,
        }
    }
}

/// Logs a summary of the finished run.
fn log_summary(record: Option<SessionRecord>, saved: usize, visited: usize, duration: Duration) {
    tracing::info!("-------------------- Summary --------------------");
    if let Some(record) = record {
        tracing::info!("Tenant / List       : {} / {}", record.tenant_id, record.list_id);
        tracing::info!("Session Started     : {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));
        tracing::info!("Queries Planned     : {}", record.query_count);
        tracing::info!("Final Status        : {:?}", record.status);
        tracing::info!("Leads Found         : {}", record.counters.leads_found);
        tracing::info!("Duplicates Skipped  : {}", record.counters.duplicates_skipped);
        tracing::info!("Errors              : {}", record.counters.errors_count);
    }
    tracing::info!("Domains Visited     : {}", visited);
    tracing::info!("Leads Saved         : {}", saved);
    tracing::info!("Total Time Taken    : {:.2?}", duration);
    tracing::info!("-------------------------------------------------");
}
