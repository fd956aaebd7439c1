//! Defines the core data structures used in the lead-sleuth application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A concrete search-engine query plus its sector/country provenance.
///
/// Produced by [`crate::analyzer::Analyzer::generate_queries`]; immutable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct QuerySpec {
    /// The full search string sent to the engine.
    pub query: String,
    /// Key of the sector this query belongs to (e.g. "wholesale").
    pub sector_key: String,
    /// Human-readable sector label.
    pub sector_label: String,
    /// Country key ("nl", "be", "de").
    pub country_key: String,
    /// Human-readable country label.
    pub country_label: String,
}

/// Per-job options. Immutable once a job has started.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub(crate) struct JobConfig {
    /// Stop the job once this many leads have been persisted.
    pub target_leads: usize,
    /// Selected sector keys; empty means all sectors.
    pub sector_keys: Vec<String>,
    /// Selected country keys; empty means all countries.
    pub country_keys: Vec<String>,
    /// Leads scoring below this threshold are dropped.
    pub min_score: u8,
    /// Validate the primary email address of each lead.
    pub email_validation: bool,
    /// Additionally probe the mailbox over SMTP (slow; port 25).
    pub deep_validation: bool,
    /// Per-job fetcher parallelism.
    pub concurrency: usize,
    /// Search with the headless browser; false forces the HTTP fallback.
    pub use_browser: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            target_leads: 1000,
            sector_keys: Vec::new(),
            country_keys: Vec::new(),
            min_score: 50,
            email_validation: true,
            deep_validation: false,
            concurrency: 5,
            use_browser: true,
        }
    }
}

/// A scored company record with contact data, keyed by normalized domain
/// per tenant.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct Lead {
    pub company_name: String,
    /// The URL the lead was scraped from.
    pub website: String,
    /// Lower-case, `www.`-stripped domain.
    pub domain: String,
    /// The primary (best-ranked) email address, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// All plausible addresses found, ranked, capped at 5.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub all_emails: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Meta description, trimmed to 300 characters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Analyzer score, 0-100.
    pub score: u8,
    /// Opaque per-analyzer JSON with a top-level `score` and a `breakdown` map.
    pub analysis_data: serde_json::Value,
    pub email_valid: bool,
    /// Validator confidence, 0-100.
    pub email_validation_score: u8,
    pub email_validation_reason: String,
    pub found_at: DateTime<Utc>,
}

/// Which path produced a search result.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SearchSource {
    Browser,
    Http,
}

/// Outcome of a single search-engine query.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct SearchResult {
    /// Candidate homepage URLs, deduplicated by domain.
    pub urls: Vec<String>,
    /// The engine served an anti-bot page (or a 429 on the HTTP path).
    pub blocked: bool,
    pub source: SearchSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResult {
    pub(crate) fn empty(source: SearchSource) -> Self {
        Self {
            urls: Vec::new(),
            blocked: false,
            source,
            error: None,
        }
    }

    pub(crate) fn blocked(source: SearchSource) -> Self {
        Self {
            urls: Vec::new(),
            blocked: true,
            source,
            error: None,
        }
    }
}

/// Result of the staged email validation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct EmailValidation {
    pub valid: bool,
    /// Confidence 0-100, monotone in check depth.
    pub score: u8,
    /// Machine-readable reason string (e.g. `mx_verified`, `disposable_domain`).
    pub reason: String,
}

impl EmailValidation {
    pub(crate) fn new(valid: bool, score: u8, reason: &str) -> Self {
        Self {
            valid,
            score,
            reason: reason.to_string(),
        }
    }
}

/// Final status of a job session.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SessionStatus {
    Running,
    Done,
    Stopped,
    Error,
}

/// Shared per-job counters, mutated by worker tasks.
///
/// `leads_found + duplicates_skipped` is monotonically non-decreasing;
/// counters are only ever incremented.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    leads_found: AtomicUsize,
    duplicates_skipped: AtomicUsize,
    errors_count: AtomicUsize,
}

impl Counters {
    pub(crate) fn record_lead(&self) -> usize {
        self.leads_found.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_duplicate(&self) -> usize {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_error(&self) -> usize {
        self.errors_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn leads_found(&self) -> usize {
        self.leads_found.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            leads_found: self.leads_found.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            errors_count: self.errors_count.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the job counters.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CounterSnapshot {
    pub leads_found: usize,
    pub duplicates_skipped: usize,
    pub errors_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_config_defaults() {
        let config = JobConfig::default();
        assert_eq!(config.target_leads, 1000);
        assert_eq!(config.min_score, 50);
        assert!(config.email_validation);
        assert!(!config.deep_validation);
        assert_eq!(config.concurrency, 5);
        assert!(config.use_browser);
        assert!(config.sector_keys.is_empty());
    }

    #[test]
    fn counters_are_monotone() {
        let counters = Counters::default();
        assert_eq!(counters.record_lead(), 1);
        assert_eq!(counters.record_duplicate(), 1);
        assert_eq!(counters.record_lead(), 2);
        let snap = counters.snapshot();
        assert_eq!(snap.leads_found, 2);
        assert_eq!(snap.duplicates_skipped, 1);
        assert_eq!(snap.errors_count, 0);
    }
}
