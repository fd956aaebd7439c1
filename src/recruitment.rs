//! Recruitment-appeal analyzer: scores how actively a company is hiring,
//! driven by a vacancy-page crawl, hiring language and ATS fingerprints.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use crate::analyzer::{build_queries, Analysis, Analyzer, AnalyzerInput, ExtraContent, Sector};
use crate::fetcher::{same_domain_links, visible_text};
use crate::models::{JobConfig, QuerySpec};

/// Fetch budget per vacancy page.
const VACANCY_PAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw HTML captured per page for ATS detection, capped.
const MAX_CAPTURED_HTML: usize = 20 * 1024;

/// At most this many vacancy links are followed per site.
const MAX_VACANCY_LINKS: usize = 2;

/// Occurrence cap for the vacancy-indicator count.
const MAX_VACANCY_INDICATORS: usize = 50;

static VACANCY_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(vacatures?|jobs?|careers?|werken-bij|werkenbij|karriere|stellenangebote?|join-?us|work-with-us)")
        .expect("vacancy link regex must compile")
});

static VACANCY_INDICATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"vacature|functie|job opening|we (?:zijn op zoek|zoeken)|open position|stellenangebot")
        .expect("vacancy indicator regex must compile")
});

static HR_LOCAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(hr|jobs?|careers?|recruitment|vacatures?|werk|talent|people)\b")
        .expect("hr local-part regex must compile")
});

static HR_CONTEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:hr|recruitment|personeelszaken|people)[\s-]?(?:afdeling|team|manager|department|officer)")
        .expect("hr context regex must compile")
});

const GROWTH_KEYWORDS: &[&str] = &[
    "groei",
    "uitbreiding",
    "expansie",
    "expansion",
    "expanding",
    "scale-up",
    "scaleup",
    "snelgroeiend",
    "fast-growing",
    "nieuwe vestiging",
    "new office",
    "wachstum",
    "doorgroeien",
];

/// ATS fingerprints matched against the captured raw HTML.
const ATS_PATTERNS: &[(&str, &str)] = &[
    ("Teamtailor", "teamtailor"),
    ("Recruitee", "recruitee"),
    ("Workable", "workable"),
    ("Greenhouse", "greenhouse.io"),
    ("Lever", "lever.co"),
    ("Homerun", "homerun.co"),
    ("BambooHR", "bamboohr"),
    ("Personio", "personio"),
    ("SmartRecruiters", "smartrecruiters"),
    ("Jobvite", "jobvite"),
    ("iCIMS", "icims"),
    ("Ashby", "ashbyhq"),
];

fn detect_ats(html: &str) -> Option<&'static str> {
    let haystack = html.to_lowercase();
    ATS_PATTERNS
        .iter()
        .find(|(_, pattern)| haystack.contains(pattern))
        .map(|(name, _)| *name)
}

fn vacancy_count_score(count: usize) -> u8 {
    match count {
        0 => 0,
        1 => 5,
        2..=4 => 10,
        5..=9 => 18,
        _ => 25,
    }
}

fn growth_score(distinct: usize) -> u8 {
    match distinct {
        0 => 0,
        1 => 8,
        2 => 14,
        _ => 20,
    }
}

fn push_capped(buffer: &mut String, html: &str) {
    let mut end = html.len().min(MAX_CAPTURED_HTML);
    while end > 0 && !html.is_char_boundary(end) {
        end -= 1;
    }
    buffer.push_str(&html[..end]);
    buffer.push('\n');
}

fn default_sectors() -> Vec<Sector> {
    vec![
        Sector {
            key: "technology".into(),
            label: "IT & Software".into(),
            queries: vec!["software bedrijf".into(), "it dienstverlener".into()],
        },
        Sector {
            key: "engineering".into(),
            label: "Techniek & Engineering".into(),
            queries: vec!["ingenieursbureau".into(), "technisch installatiebedrijf".into()],
        },
        Sector {
            key: "logistics".into(),
            label: "Transport & Logistiek".into(),
            queries: vec!["transportbedrijf".into(), "logistiek dienstverlener".into()],
        },
        Sector {
            key: "healthcare".into(),
            label: "Zorg".into(),
            queries: vec!["zorginstelling".into(), "thuiszorgorganisatie".into()],
        },
        Sector {
            key: "hospitality".into(),
            label: "Horeca & Retail".into(),
            queries: vec!["horecagroothandel".into(), "retailketen".into()],
        },
    ]
}

/// The `recruitment` use case.
pub(crate) struct RecruitmentAnalyzer {
    sectors: Vec<Sector>,
}

impl RecruitmentAnalyzer {
    pub(crate) fn new() -> Self {
        Self {
            sectors: default_sectors(),
        }
    }
}

async fn fetch_html(client: &Client, url: &str) -> Option<String> {
    let response = client
        .get(url)
        .timeout(VACANCY_PAGE_TIMEOUT)
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.text().await.ok()
}

#[async_trait::async_trait]
impl Analyzer for RecruitmentAnalyzer {
    fn key(&self) -> &'static str {
        "recruitment"
    }

    fn generate_queries(&self, config: &JobConfig) -> Vec<QuerySpec> {
        build_queries(&self.sectors, config)
    }

    /// Fetches the homepage, fingerprints any ATS, follows up to two
    /// same-domain vacancy links and captures their text and (capped) HTML.
    async fn fetch_extra(&self, base_url: &Url, client: &Client) -> ExtraContent {
        let mut captured_html = String::new();
        let mut text = String::new();
        let mut ats = None;
        let mut vacancy_page_found = false;

        let links: Vec<String> = match fetch_html(client, base_url.as_str()).await {
            Some(html) => {
                ats = detect_ats(&html);
                push_capped(&mut captured_html, &html);
                same_domain_links(&html, base_url)
                    .into_iter()
                    .filter(|link| VACANCY_LINK_RE.is_match(&link.to_lowercase()))
                    .take(MAX_VACANCY_LINKS)
                    .collect()
            }
            None => {
                tracing::debug!(target: "scrape_task",
                    "Vacancy crawl skipped, homepage unreachable: {}", base_url);
                Vec::new()
            }
        };

        for link in &links {
            match fetch_html(client, link).await {
                Some(html) => {
                    vacancy_page_found = true;
                    if ats.is_none() {
                        ats = detect_ats(&html);
                    }
                    text.push_str(&visible_text(&html));
                    text.push(' ');
                    push_capped(&mut captured_html, &html);
                }
                None => {
                    tracing::debug!(target: "scrape_task", "Vacancy page fetch failed: {}", link);
                }
            }
        }

        ExtraContent {
            text,
            data: json!({
                "vacancy_page_found": vacancy_page_found,
                "vacancy_urls": links,
                "ats": ats,
                "vacancy_html": captured_html,
            }),
        }
    }

    fn analyze(&self, input: &AnalyzerInput<'_>) -> Analysis {
        let haystack = input.text.to_lowercase();
        let data = &input.extra.data;

        let vacancy_page_found = data
            .get("vacancy_page_found")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let presence_score: u8 = if vacancy_page_found { 35 } else { 0 };

        let indicator_count = VACANCY_INDICATOR_RE
            .find_iter(&haystack)
            .count()
            .min(MAX_VACANCY_INDICATORS);
        let count_score = vacancy_count_score(indicator_count);

        let growth_signals: Vec<&str> = GROWTH_KEYWORDS
            .iter()
            .filter(|keyword| haystack.contains(*keyword))
            .copied()
            .collect();
        let growth = growth_score(growth_signals.len());

        let hr_email = input.emails.iter().any(|email| {
            email
                .split('@')
                .next()
                .map(|local| HR_LOCAL_RE.is_match(&local.to_lowercase()))
                .unwrap_or(false)
        });
        let hr_contact = hr_email || HR_CONTEXT_RE.is_match(&haystack);
        let hr_score: u8 = if hr_contact { 10 } else { 0 };

        let captured = data
            .get("vacancy_html")
            .and_then(Value::as_str)
            .unwrap_or("");
        let ats = detect_ats(captured);
        let ats_score: u8 = if ats.is_some() { 10 } else { 0 };

        let total = (presence_score as u16
            + count_score as u16
            + growth as u16
            + hr_score as u16
            + ats_score as u16)
            .min(100) as u8;

        Analysis {
            score: total,
            data: json!({
                "score": total,
                "breakdown": {
                    "vacancy_presence": {
                        "score": presence_score,
                        "max": 35,
                        "found": vacancy_page_found,
                    },
                    "vacancy_count": {
                        "score": count_score,
                        "max": 25,
                        "hits": indicator_count,
                    },
                    "growth_signals": {
                        "score": growth,
                        "max": 20,
                        "hits": growth_signals.len(),
                        "signals": growth_signals.iter().take(5).collect::<Vec<_>>(),
                    },
                    "hr_contact": {
                        "score": hr_score,
                        "max": 10,
                        "via_email": hr_email,
                    },
                    "ats_detected": {
                        "score": ats_score,
                        "max": 10,
                        "ats": ats,
                    },
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze_with(text: &str, emails: &[String], extra: ExtraContent) -> Analysis {
        let input = AnalyzerInput {
            text,
            url: "https://acme.nl",
            domain: "acme.nl",
            extra: &extra,
            emails,
        };
        RecruitmentAnalyzer::new().analyze(&input)
    }

    #[test]
    fn hiring_company_scores_87() {
        // vacancy page found, 6 indicators, 2 growth signals, HR email, ATS
        let text = "vacature vacature vacature functie functie open position \
                    expansion nieuwe vestiging";
        let extra = ExtraContent {
            text: String::new(),
            data: json!({
                "vacancy_page_found": true,
                "ats": "Teamtailor",
                "vacancy_html": "<script src=\"https://scripts.teamtailor.com/widget.js\"></script>",
            }),
        };
        let emails = vec!["jobs@acme.nl".to_string()];
        let analysis = analyze_with(text, &emails, extra);
        assert_eq!(analysis.score, 87);
        let breakdown = &analysis.data["breakdown"];
        assert_eq!(breakdown["vacancy_presence"]["score"], 35);
        assert_eq!(breakdown["vacancy_count"]["score"], 18);
        assert_eq!(breakdown["growth_signals"]["score"], 14);
        assert_eq!(breakdown["hr_contact"]["score"], 10);
        assert_eq!(breakdown["ats_detected"]["score"], 10);
    }

    #[test]
    fn vacancy_count_tiers() {
        assert_eq!(vacancy_count_score(0), 0);
        assert_eq!(vacancy_count_score(1), 5);
        assert_eq!(vacancy_count_score(2), 10);
        assert_eq!(vacancy_count_score(5), 18);
        assert_eq!(vacancy_count_score(10), 25);
        assert_eq!(vacancy_count_score(50), 25);
    }

    #[test]
    fn indicator_count_comes_from_text() {
        for (count, expected) in [(0usize, 0u8), (1, 5), (2, 10), (5, 18), (10, 25)] {
            let text = vec!["vacature"; count].join(" ");
            let analysis = analyze_with(&text, &[], ExtraContent::default());
            assert_eq!(
                analysis.data["breakdown"]["vacancy_count"]["score"], expected,
                "count {}",
                count
            );
        }
    }

    #[test]
    fn hr_email_locals() {
        for email in ["hr@x.nl", "jobs@x.nl", "careers@x.nl", "recruitment@x.nl", "werk@x.nl"] {
            let analysis = analyze_with("", &[email.to_string()], ExtraContent::default());
            assert_eq!(
                analysis.data["breakdown"]["hr_contact"]["score"], 10,
                "email {}",
                email
            );
        }
        let analysis = analyze_with("", &["info@x.nl".to_string()], ExtraContent::default());
        assert_eq!(analysis.data["breakdown"]["hr_contact"]["score"], 0);
    }

    #[test]
    fn hr_context_without_email() {
        let analysis = analyze_with(
            "neem contact op met onze hr afdeling",
            &[],
            ExtraContent::default(),
        );
        assert_eq!(analysis.data["breakdown"]["hr_contact"]["score"], 10);
    }

    #[test]
    fn ats_detection_against_captured_html() {
        assert_eq!(detect_ats("<script src='x.recruitee.com'>"), Some("Recruitee"));
        assert_eq!(detect_ats("jobs.lever.co/acme"), Some("Lever"));
        assert_eq!(detect_ats("<p>plain page</p>"), None);
    }

    #[test]
    fn query_generation_uses_own_taxonomy() {
        let analyzer = RecruitmentAnalyzer::new();
        let specs = analyzer.generate_queries(&JobConfig::default());
        assert!(specs
            .iter()
            .any(|s| s.query == "software bedrijf Nederland site:.nl"));
    }
}
