//! Persistence seams consumed by the job driver.
//!
//! Production deployments plug SQL-backed implementations in here; the
//! in-memory variants below back the CLI binary and the test suite while
//! enforcing the same contracts (notably `(tenant, domain)` uniqueness).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::normalize_domain;
use crate::models::{CounterSnapshot, JobConfig, Lead, QuerySpec, SessionStatus};

/// Result of a deduplicating insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    /// The lead was persisted under the returned id.
    Inserted { id: String },
    /// A lead with the same `(tenant, domain)` already exists.
    Duplicate,
    /// The lead's domain did not survive normalization.
    InvalidDomain,
}

/// Lead persistence. Each insert is its own transaction; the
/// implementation enforces uniqueness on `(tenant_id, normalized domain)`.
#[async_trait]
pub(crate) trait LeadSink: Send + Sync {
    async fn insert_deduped(
        &self,
        lead: &Lead,
        tenant_id: &str,
        list_id: &str,
    ) -> anyhow::Result<InsertOutcome>;
}

/// Mutable fields of a session record.
#[derive(Debug, Clone)]
pub(crate) struct SessionUpdate {
    pub counters: CounterSnapshot,
    pub status: SessionStatus,
}

/// Session bookkeeping for one job execution.
#[async_trait]
pub(crate) trait SessionStore: Send + Sync {
    async fn create(
        &self,
        tenant_id: &str,
        list_id: &str,
        config: &JobConfig,
        queries: &[QuerySpec],
    ) -> anyhow::Result<String>;

    async fn update(&self, session_id: &str, update: SessionUpdate) -> anyhow::Result<()>;
}

/// A persisted lead with its tenant/list attribution.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StoredLead {
    pub id: String,
    pub tenant_id: String,
    pub list_id: String,
    #[serde(flatten)]
    pub lead: Lead,
}

/// In-memory lead sink used by the CLI and tests.
pub(crate) struct MemoryLeadSink {
    leads: Mutex<Vec<StoredLead>>,
    seen: Mutex<HashSet<(String, String)>>,
}

impl MemoryLeadSink {
    pub(crate) fn new() -> Self {
        Self {
            leads: Mutex::new(Vec::new()),
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn leads(&self) -> Vec<StoredLead> {
        self.leads.lock().expect("sink lock poisoned").clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.leads.lock().expect("sink lock poisoned").len()
    }

    /// Writes all stored leads as pretty JSON.
    pub(crate) fn save_json(&self, path: &str) -> anyhow::Result<()> {
        let leads = self.leads();
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &leads)?;
        Ok(())
    }
}

impl Default for MemoryLeadSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeadSink for MemoryLeadSink {
    async fn insert_deduped(
        &self,
        lead: &Lead,
        tenant_id: &str,
        list_id: &str,
    ) -> anyhow::Result<InsertOutcome> {
        let domain = match normalize_domain(&lead.domain) {
            Ok(d) if d.contains('.') => d,
            _ => return Ok(InsertOutcome::InvalidDomain),
        };

        let key = (tenant_id.to_string(), domain);
        {
            let mut seen = self.seen.lock().expect("sink lock poisoned");
            if !seen.insert(key) {
                return Ok(InsertOutcome::Duplicate);
            }
        }

        let id = Uuid::new_v4().to_string();
        self.leads.lock().expect("sink lock poisoned").push(StoredLead {
            id: id.clone(),
            tenant_id: tenant_id.to_string(),
            list_id: list_id.to_string(),
            lead: lead.clone(),
        });
        Ok(InsertOutcome::Inserted { id })
    }
}

/// Session record kept by [`MemorySessionStore`].
#[derive(Debug, Clone)]
pub(crate) struct SessionRecord {
    pub tenant_id: String,
    pub list_id: String,
    pub query_count: usize,
    pub counters: CounterSnapshot,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

/// In-memory session store used by the CLI and tests.
#[derive(Default)]
pub(crate) struct MemorySessionStore {
    sessions: DashMap<String, SessionRecord>,
}

impl MemorySessionStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.get(session_id).map(|r| r.clone())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(
        &self,
        tenant_id: &str,
        list_id: &str,
        _config: &JobConfig,
        queries: &[QuerySpec],
    ) -> anyhow::Result<String> {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            SessionRecord {
                tenant_id: tenant_id.to_string(),
                list_id: list_id.to_string(),
                query_count: queries.len(),
                counters: CounterSnapshot::default(),
                status: SessionStatus::Running,
                created_at: Utc::now(),
            },
        );
        Ok(session_id)
    }

    async fn update(&self, session_id: &str, update: SessionUpdate) -> anyhow::Result<()> {
        if let Some(mut record) = self.sessions.get_mut(session_id) {
            record.counters = update.counters;
            record.status = update.status;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lead(domain: &str) -> Lead {
        Lead {
            company_name: "Acme BV".to_string(),
            website: format!("https://{}", domain),
            domain: domain.to_string(),
            email: Some(format!("info@{}", domain)),
            all_emails: vec![format!("info@{}", domain)],
            phone: None,
            address: None,
            description: None,
            score: 80,
            analysis_data: json!({"score": 80, "breakdown": {}}),
            email_valid: true,
            email_validation_score: 85,
            email_validation_reason: "mx_verified".to_string(),
            found_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reinsert_is_a_duplicate_without_side_effects() {
        let sink = MemoryLeadSink::new();
        let first = sink.insert_deduped(&lead("acme.nl"), "t1", "l1").await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted { .. }));

        let second = sink.insert_deduped(&lead("acme.nl"), "t1", "l1").await.unwrap();
        assert_eq!(second, InsertOutcome::Duplicate);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn uniqueness_is_per_tenant() {
        let sink = MemoryLeadSink::new();
        sink.insert_deduped(&lead("acme.nl"), "t1", "l1").await.unwrap();
        let other_tenant = sink.insert_deduped(&lead("acme.nl"), "t2", "l1").await.unwrap();
        assert!(matches!(other_tenant, InsertOutcome::Inserted { .. }));
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn normalization_collapses_variants() {
        let sink = MemoryLeadSink::new();
        sink.insert_deduped(&lead("www.acme.nl"), "t1", "l1").await.unwrap();
        let variant = sink.insert_deduped(&lead("acme.nl"), "t1", "l1").await.unwrap();
        assert_eq!(variant, InsertOutcome::Duplicate);
    }

    #[tokio::test]
    async fn garbage_domain_is_invalid() {
        let sink = MemoryLeadSink::new();
        let mut bad = lead("acme.nl");
        bad.domain = "localhost".to_string();
        let outcome = sink.insert_deduped(&bad, "t1", "l1").await.unwrap();
        assert_eq!(outcome, InsertOutcome::InvalidDomain);
    }

    #[tokio::test]
    async fn session_store_roundtrip() {
        let store = MemorySessionStore::new();
        let session_id = store
            .create("t1", "l1", &JobConfig::default(), &[])
            .await
            .unwrap();
        assert_eq!(store.get(&session_id).unwrap().status, SessionStatus::Running);

        store
            .update(
                &session_id,
                SessionUpdate {
                    counters: CounterSnapshot {
                        leads_found: 3,
                        duplicates_skipped: 1,
                        errors_count: 0,
                    },
                    status: SessionStatus::Done,
                },
            )
            .await
            .unwrap();
        let record = store.get(&session_id).unwrap();
        assert_eq!(record.status, SessionStatus::Done);
        assert_eq!(record.counters.leads_found, 3);
    }
}
