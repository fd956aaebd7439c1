//! The analyzer contract, the use-case registry and sector catalogs.
//!
//! An analyzer owns a sector taxonomy, turns a job config into search
//! queries, may run a scoped second crawl per site, and scores the
//! accumulated text. Adding a use case means implementing [`Analyzer`]
//! and registering it under a string key.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{JobConfig, QuerySpec};

/// Country targeting for query generation: key, label, query suffix.
pub(crate) const COUNTRIES: &[(&str, &str, &str)] = &[
    ("nl", "Nederland", "Nederland site:.nl"),
    ("be", "België", "België site:.be"),
    ("de", "Deutschland", "Deutschland site:.de"),
];

/// One sector of a use-case taxonomy.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct Sector {
    pub key: String,
    pub label: String,
    /// Base query templates; the country suffix is appended per country.
    pub queries: Vec<String>,
}

/// Output of an analyzer's optional second-pass crawl.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExtraContent {
    /// Visible text to append to the scoring buffer.
    pub text: String,
    /// Analyzer-private payload handed back to `analyze`.
    pub data: Value,
}

/// Everything `analyze` gets to look at for one site.
pub(crate) struct AnalyzerInput<'a> {
    /// Accumulated visible text (homepage, contact pages, extra crawl).
    pub text: &'a str,
    pub url: &'a str,
    pub domain: &'a str,
    pub extra: &'a ExtraContent,
    pub emails: &'a [String],
}

/// Score plus the opaque per-analyzer JSON persisted with the lead.
#[derive(Debug, Clone)]
pub(crate) struct Analysis {
    /// 0-100.
    pub score: u8,
    /// Carries a top-level `score` and a `breakdown` map.
    pub data: Value,
}

/// A pluggable use case. `analyze` must be deterministic: identical input
/// yields identical output.
#[async_trait]
pub(crate) trait Analyzer: Send + Sync {
    /// Registry key ("erp", "recruitment", ...).
    fn key(&self) -> &'static str;

    /// Cartesian product of selected sectors and countries, one query per
    /// base template. Empty selections mean "all".
    fn generate_queries(&self, config: &JobConfig) -> Vec<QuerySpec>;

    /// Optional scoped second crawl (e.g. vacancy pages). The default
    /// fetches nothing.
    async fn fetch_extra(&self, base_url: &Url, client: &Client) -> ExtraContent {
        let _ = (base_url, client);
        ExtraContent::default()
    }

    /// Scores the accumulated content.
    fn analyze(&self, input: &AnalyzerInput<'_>) -> Analysis;
}

/// Builds the sector × country × template product used by both built-in
/// analyzers.
pub(crate) fn build_queries(sectors: &[Sector], config: &JobConfig) -> Vec<QuerySpec> {
    let mut specs = Vec::new();
    for sector in sectors {
        if !config.sector_keys.is_empty() && !config.sector_keys.contains(&sector.key) {
            continue;
        }
        for (country_key, country_label, suffix) in COUNTRIES {
            if !config.country_keys.is_empty()
                && !config.country_keys.iter().any(|k| k == country_key)
            {
                continue;
            }
            for template in &sector.queries {
                specs.push(QuerySpec {
                    query: format!("{} {}", template, suffix),
                    sector_key: sector.key.clone(),
                    sector_label: sector.label.clone(),
                    country_key: country_key.to_string(),
                    country_label: country_label.to_string(),
                });
            }
        }
    }
    specs
}

/// Reads a sectors file: a JSON array of `{key, label, queries[]}`.
pub(crate) fn load_sectors_file(path: &str) -> Result<Vec<Sector>> {
    let content = fs::read_to_string(path)?;
    let sectors: Vec<Sector> = serde_json::from_str(&content)?;
    Ok(sectors)
}

/// Maps use-case keys to analyzers.
pub(crate) struct AnalyzerRegistry {
    analyzers: HashMap<String, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            analyzers: HashMap::new(),
        }
    }

    /// Registry with the two built-in use cases. The ERP analyzer picks up
    /// the sectors file when one is configured.
    pub(crate) fn with_builtins(sectors_file: Option<&str>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::erp::ErpAnalyzer::new(sectors_file)));
        registry.register(Arc::new(crate::recruitment::RecruitmentAnalyzer::new()));
        registry
    }

    pub(crate) fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers
            .insert(analyzer.key().to_string(), analyzer);
    }

    pub(crate) fn get(&self, key: &str) -> Result<Arc<dyn Analyzer>> {
        self.analyzers
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::UnknownUseCase(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sectors() -> Vec<Sector> {
        vec![
            Sector {
                key: "wholesale".into(),
                label: "Groothandel".into(),
                queries: vec!["groothandel".into(), "distributeur".into()],
            },
            Sector {
                key: "manufacturing".into(),
                label: "Productie".into(),
                queries: vec!["productiebedrijf".into()],
            },
        ]
    }

    #[test]
    fn cartesian_product_over_all_selections() {
        let specs = build_queries(&sectors(), &JobConfig::default());
        // (2 + 1 templates) x 3 countries
        assert_eq!(specs.len(), 9);
        assert!(specs
            .iter()
            .any(|s| s.query == "groothandel Nederland site:.nl"));
        assert!(specs
            .iter()
            .any(|s| s.query == "productiebedrijf Deutschland site:.de"));
    }

    #[test]
    fn selections_filter_the_product() {
        let config = JobConfig {
            sector_keys: vec!["wholesale".into()],
            country_keys: vec!["be".into()],
            ..JobConfig::default()
        };
        let specs = build_queries(&sectors(), &config);
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|s| s.country_key == "be"));
        assert!(specs.iter().all(|s| s.sector_key == "wholesale"));
        assert!(specs.iter().all(|s| s.query.ends_with("België site:.be")));
    }

    #[test]
    fn unknown_selection_yields_nothing() {
        let config = JobConfig {
            sector_keys: vec!["nonexistent".into()],
            ..JobConfig::default()
        };
        assert!(build_queries(&sectors(), &config).is_empty());
    }

    #[test]
    fn registry_rejects_unknown_use_case() {
        let registry = AnalyzerRegistry::with_builtins(None);
        assert!(registry.get("erp").is_ok());
        assert!(registry.get("recruitment").is_ok());
        match registry.get("astrology") {
            Err(AppError::UnknownUseCase(key)) => assert_eq!(key, "astrology"),
            other => panic!("expected UnknownUseCase, got {:?}", other.map(|_| ())),
        }
    }
}
