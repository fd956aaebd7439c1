//! ERP-readiness analyzer: scores how likely a company is to need an ERP
//! implementation, based on keyword evidence in the scraped text.

use serde_json::{json, Value};
use std::sync::RwLock;

use crate::analyzer::{build_queries, load_sectors_file, Analysis, Analyzer, AnalyzerInput, Sector};
use crate::error::Result;
use crate::models::{JobConfig, QuerySpec};

/// A scoring dimension: weight plus its curated keyword list.
struct Dimension {
    key: &'static str,
    weight: u8,
    keywords: &'static [&'static str],
}

/// Four dimensions, weights 30/25/25/20. Matching is case-insensitive
/// substring matching; a dimension scores its full weight at 3+ distinct
/// keyword hits, 70% at 2 and 40% at 1.
const DIMENSIONS: &[Dimension] = &[
    Dimension {
        key: "logistics",
        weight: 30,
        keywords: &[
            "warehouse",
            "inventory",
            "logistics",
            "supply chain",
            "fulfilment",
            "fulfillment",
            "voorraad",
            "magazijn",
            "logistiek",
            "expeditie",
            "transportplanning",
            "wms",
        ],
    },
    Dimension {
        key: "operations",
        weight: 25,
        keywords: &[
            "production",
            "manufacturing",
            "assembly",
            "machinery",
            "productie",
            "fabricage",
            "assemblage",
            "werkplaats",
            "maakindustrie",
            "fertigung",
            "produktion",
        ],
    },
    Dimension {
        key: "digitalization",
        weight: 25,
        keywords: &[
            "erp",
            "crm",
            "automatisering",
            "automation",
            "digitalisering",
            "digitalisierung",
            "koppeling",
            "integratie",
            "maatwerk software",
            "exact online",
            "afas",
            "navision",
            "sap",
        ],
    },
    Dimension {
        key: "b2b",
        weight: 20,
        keywords: &[
            "b2b",
            "zakelijk",
            "wholesale",
            "groothandel",
            "leverancier",
            "distributeur",
            "dealer",
            "offerte aanvragen",
            "zakelijke klanten",
            "grosshandel",
            "lieferant",
        ],
    },
];

/// Awarded when the site sits on a Benelux/German TLD but showed no B2B
/// evidence; local SMEs rarely spell it out.
const LOCAL_TLD_BONUS: u8 = 2;

const MAX_SIGNALS_PER_DIMENSION: usize = 5;

fn dimension_score(weight: u8, hits: usize) -> u8 {
    match hits {
        0 => 0,
        1 => (weight as f64 * 0.4).round() as u8,
        2 => (weight as f64 * 0.7).round() as u8,
        _ => weight,
    }
}

fn default_sectors() -> Vec<Sector> {
    vec![
        Sector {
            key: "wholesale".into(),
            label: "Groothandel & Distributie".into(),
            queries: vec![
                "groothandel".into(),
                "technische groothandel".into(),
                "distributeur".into(),
            ],
        },
        Sector {
            key: "manufacturing".into(),
            label: "Productie & Maakindustrie".into(),
            queries: vec![
                "productiebedrijf".into(),
                "machinebouw".into(),
                "metaalbewerking".into(),
            ],
        },
        Sector {
            key: "logistics".into(),
            label: "Transport & Logistiek".into(),
            queries: vec![
                "logistiek dienstverlener".into(),
                "transportbedrijf".into(),
                "warehousing".into(),
            ],
        },
        Sector {
            key: "construction".into(),
            label: "Bouw & Installatie".into(),
            queries: vec!["installatiebedrijf".into(), "bouwbedrijf".into()],
        },
        Sector {
            key: "food".into(),
            label: "Food & Agri".into(),
            queries: vec![
                "voedingsmiddelen producent".into(),
                "agrarische handel".into(),
            ],
        },
    ]
}

/// The `erp` use case. Its sector taxonomy can be overridden by a JSON
/// file and re-read at runtime.
pub(crate) struct ErpAnalyzer {
    sectors: RwLock<Vec<Sector>>,
    sectors_path: Option<String>,
}

impl ErpAnalyzer {
    pub(crate) fn new(sectors_file: Option<&str>) -> Self {
        let analyzer = Self {
            sectors: RwLock::new(default_sectors()),
            sectors_path: sectors_file.map(|s| s.to_string()),
        };
        if analyzer.sectors_path.is_some() {
            if let Err(e) = analyzer.load_sectors() {
                tracing::warn!(
                    "Failed to load sectors file, falling back to built-in taxonomy: {}",
                    e
                );
            }
        }
        analyzer
    }

    /// Re-reads the sectors file. Safe to call while jobs are running;
    /// running jobs keep the query list they started with.
    pub(crate) fn load_sectors(&self) -> Result<usize> {
        let path = match &self.sectors_path {
            Some(path) => path.clone(),
            None => return Ok(self.sectors.read().expect("sectors lock poisoned").len()),
        };
        let sectors = load_sectors_file(&path)?;
        let count = sectors.len();
        *self.sectors.write().expect("sectors lock poisoned") = sectors;
        tracing::info!("Loaded {} sectors from {}", count, path);
        Ok(count)
    }
}

#[async_trait::async_trait]
impl Analyzer for ErpAnalyzer {
    fn key(&self) -> &'static str {
        "erp"
    }

    fn generate_queries(&self, config: &JobConfig) -> Vec<QuerySpec> {
        let sectors = self.sectors.read().expect("sectors lock poisoned");
        build_queries(&sectors, config)
    }

    fn analyze(&self, input: &AnalyzerInput<'_>) -> Analysis {
        let haystack = input.text.to_lowercase();

        let mut total: u16 = 0;
        let mut breakdown = serde_json::Map::new();

        for dimension in DIMENSIONS {
            let signals: Vec<&str> = dimension
                .keywords
                .iter()
                .filter(|keyword| haystack.contains(*keyword))
                .copied()
                .collect();
            let hits = signals.len();
            let mut score = dimension_score(dimension.weight, hits);

            if dimension.key == "b2b"
                && score == 0
                && [".nl", ".be", ".de"]
                    .iter()
                    .any(|tld| input.domain.ends_with(tld))
            {
                score = LOCAL_TLD_BONUS;
            }

            total += score as u16;
            breakdown.insert(
                dimension.key.to_string(),
                json!({
                    "score": score,
                    "max": dimension.weight,
                    "hits": hits,
                    "signals": signals
                        .iter()
                        .take(MAX_SIGNALS_PER_DIMENSION)
                        .collect::<Vec<_>>(),
                }),
            );
        }

        let score = total.min(100) as u8;
        Analysis {
            score,
            data: json!({
                "score": score,
                "breakdown": Value::Object(breakdown),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ExtraContent;

    fn analyze(text: &str, domain: &str) -> Analysis {
        let extra = ExtraContent::default();
        let url = format!("https://{}", domain);
        let input = AnalyzerInput {
            text,
            url: &url,
            domain,
            extra: &extra,
            emails: &[],
        };
        ErpAnalyzer::new(None).analyze(&input)
    }

    #[test]
    fn logistics_text_on_dutch_tld() {
        let analysis = analyze("warehouse inventory logistics", "x.nl");
        assert_eq!(analysis.score, 32);
        let breakdown = &analysis.data["breakdown"];
        assert_eq!(breakdown["logistics"]["score"], 30);
        assert_eq!(breakdown["logistics"]["hits"], 3);
        assert_eq!(breakdown["b2b"]["score"], 2);
        assert_eq!(breakdown["operations"]["score"], 0);
        assert_eq!(breakdown["digitalization"]["score"], 0);
    }

    #[test]
    fn hit_tiers() {
        assert_eq!(analyze("", "x.com").data["breakdown"]["logistics"]["score"], 0);
        // 1 hit -> 40% of 30, rounded
        assert_eq!(
            analyze("warehouse", "x.com").data["breakdown"]["logistics"]["score"],
            12
        );
        // 2 hits -> 70% of 30
        assert_eq!(
            analyze("warehouse inventory", "x.com").data["breakdown"]["logistics"]["score"],
            21
        );
        // 3+ hits -> full weight
        assert_eq!(
            analyze("warehouse inventory logistics magazijn", "x.com").data["breakdown"]
                ["logistics"]["score"],
            30
        );
    }

    #[test]
    fn bonus_only_when_b2b_is_empty() {
        let with_b2b = analyze("groothandel", "x.nl");
        // one b2b hit: 40% of 20 = 8, no bonus on top
        assert_eq!(with_b2b.data["breakdown"]["b2b"]["score"], 8);

        let foreign = analyze("warehouse", "x.fr");
        assert_eq!(foreign.data["breakdown"]["b2b"]["score"], 0);
    }

    #[test]
    fn total_is_capped_at_100() {
        let text = "warehouse inventory logistics magazijn \
                    production manufacturing assembly \
                    erp crm automatisering \
                    b2b groothandel leverancier";
        let analysis = analyze(text, "x.nl");
        assert_eq!(analysis.score, 100);
        assert!(analysis.score <= 100);
    }

    #[test]
    fn analysis_is_deterministic() {
        let a = analyze("warehouse inventory erp groothandel", "x.be");
        let b = analyze("warehouse inventory erp groothandel", "x.be");
        assert_eq!(a.score, b.score);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn query_generation_uses_taxonomy() {
        let analyzer = ErpAnalyzer::new(None);
        let specs = analyzer.generate_queries(&JobConfig::default());
        assert!(!specs.is_empty());
        assert!(specs
            .iter()
            .any(|s| s.query == "groothandel Nederland site:.nl"));
        // every query carries a country suffix
        assert!(specs.iter().all(|s| s.query.contains("site:.")));
    }
}
