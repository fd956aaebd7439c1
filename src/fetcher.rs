//! Fetches candidate company sites and extracts contact data and text.
//!
//! One homepage plus at most two contact pages per site; the analyzer may
//! add its own scoped crawl via `fetch_extra`. `scraper::Html` is not
//! `Send`, so documents are parsed inside synchronous scopes and reduced
//! to owned data before the next suspension point.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{redirect, Client};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::analyzer::{Analyzer, AnalyzerInput};
use crate::cache::ScraperCache;
use crate::config::Config;
use crate::domain::{is_noise_domain, normalize_domain, normalize_url};
use crate::error::{AppError, Result};
use crate::models::Lead;
use crate::validator::{is_service_address, EmailValidator};

const MAX_CONTACT_LINKS: usize = 2;
const MAX_EMAILS: usize = 5;
const MAX_DESCRIPTION_CHARS: usize = 300;
const MAX_EMAIL_LOCAL_LEN: usize = 40;

/// Politeness pause before each contact-page fetch.
const CONTACT_PAGE_DELAY: Duration = Duration::from_millis(500);

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w.+-]+@[\w.-]+\.[a-zA-Z]{2,}").expect("email regex must compile"));

static CONTACT_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(contact|over-ons|about|kontakt|kontaktieren|uber-uns|over|info)[/-]?$")
        .expect("contact link regex must compile")
});

/// Matches addresses scraped out of `srcset`/asset attributes, e.g.
/// `logo@2x.png`.
static ASSET_EXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.(png|jpe?g|gif|svg|webp|ico|css|js|woff2?|ttf|otf)$")
        .expect("asset extension regex must compile")
});

static PHONE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // NL
        r"(?:\+31|0031)\s?(?:\(0\))?\s?[1-9](?:[\s.-]?\d){7,8}",
        // BE
        r"(?:\+32|0032)\s?(?:\(0\))?\s?[1-9](?:[\s.-]?\d){7,8}",
        // DE
        r"(?:\+49|0049)\s?(?:\(0\))?\s?[1-9](?:[\s.-]?\d){6,10}",
        // generic international
        r"\+\d{1,3}[\s.-]?\d{4,14}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("phone regex must compile"))
    .collect()
});

/// Role locals ranked ahead of other same-domain addresses.
const PREFERRED_LOCALS: &[&str] = &["info", "contact", "sales", "office", "admin"];

const ADDRESS_SELECTORS: &[&str] = &[
    r#"[itemtype*="PostalAddress"]"#,
    "address",
    ".address",
    ".contact-info",
    r#"[class*="adres"]"#,
];

/// Per-scrape validation switches, copied from the job config.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScrapeOptions {
    pub email_validation: bool,
    pub deep_validation: bool,
}

/// Owned reduction of one parsed HTML document.
struct ParsedPage {
    text: String,
    title: Option<String>,
    og_site_name: Option<String>,
    meta_description: Option<String>,
    og_description: Option<String>,
    first_h1: Option<String>,
    contact_links: Vec<String>,
    address: Option<String>,
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        input.to_string()
    } else {
        input.chars().take(max).collect()
    }
}

/// Collapsed visible text of the document body.
pub(crate) fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").expect("body selector must parse");
    let mut text = String::new();
    if let Some(body) = document.select(&body_selector).next() {
        for fragment in body.text() {
            text.push_str(fragment.trim());
            text.push(' ');
        }
    } else {
        for fragment in document.root_element().text() {
            text.push_str(fragment.trim());
            text.push(' ');
        }
    }
    collapse_whitespace(&text)
}

/// All unique same-domain absolute http(s) links in the document.
pub(crate) fn same_domain_links(html: &str, base: &Url) -> Vec<String> {
    let base_domain = match normalize_domain(base.as_str()) {
        Ok(domain) => domain,
        Err(_) => return Vec::new(),
    };
    let document = Html::parse_document(html);
    let anchor_selector = Selector::parse("a[href]").expect("anchor selector must parse");

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&anchor_selector) {
        let href = match element.value().attr("href") {
            Some(href) => href,
            None => continue,
        };
        let absolute = match base.join(href) {
            Ok(url) => url,
            Err(_) => continue,
        };
        if absolute.scheme() != "http" && absolute.scheme() != "https" {
            continue;
        }
        match normalize_domain(absolute.as_str()) {
            Ok(domain) if domain == base_domain => {}
            _ => continue,
        }
        let mut clean = absolute.clone();
        clean.set_query(None);
        clean.set_fragment(None);
        let link = clean.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }
    links
}

fn first_meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
}

fn parse_page(html: &str, base: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    let title_selector = Selector::parse("title").expect("title selector must parse");
    let title = document
        .select(&title_selector)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|s| !s.is_empty());

    let h1_selector = Selector::parse("h1").expect("h1 selector must parse");
    let first_h1 = document
        .select(&h1_selector)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|s| !s.is_empty());

    let mut address = None;
    for raw_selector in ADDRESS_SELECTORS {
        let selector = match Selector::parse(raw_selector) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if let Some(candidate) = document
            .select(&selector)
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .find(|text| (10..=200).contains(&text.chars().count()))
        {
            address = Some(candidate);
            break;
        }
    }

    let contact_links = same_domain_links(html, base)
        .into_iter()
        .filter(|link| CONTACT_LINK_RE.is_match(link.to_lowercase().trim_end_matches('/')))
        .take(MAX_CONTACT_LINKS)
        .collect();

    ParsedPage {
        text: visible_text(html),
        title,
        og_site_name: first_meta_content(&document, r#"meta[property="og:site_name"]"#),
        meta_description: first_meta_content(&document, r#"meta[name="description"]"#),
        og_description: first_meta_content(&document, r#"meta[property="og:description"]"#),
        first_h1,
        contact_links,
        address,
    }
}

/// Finds, filters and ranks email addresses in the accumulated text.
/// Same-domain addresses come first (role locals leading), everything
/// else trails; capped at 5.
fn extract_emails(text: &str, domain: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut preferred = Vec::new();
    let mut same_domain = Vec::new();
    let mut other = Vec::new();

    for found in EMAIL_RE.find_iter(text) {
        let email = found.as_str().to_lowercase();
        let (local, host) = match email.rsplit_once('@') {
            Some(parts) => parts,
            None => continue,
        };
        if local.len() > MAX_EMAIL_LOCAL_LEN
            || host.contains("..")
            || host.ends_with('.')
            || ASSET_EXT_RE.is_match(&email)
            || is_service_address(&email)
        {
            continue;
        }
        if !seen.insert(email.clone()) {
            continue;
        }
        if host == domain {
            if PREFERRED_LOCALS.contains(&local) {
                preferred.push(email);
            } else {
                same_domain.push(email);
            }
        } else {
            other.push(email);
        }
    }

    let mut ranked = preferred;
    ranked.extend(same_domain);
    ranked.extend(other);
    ranked.truncate(MAX_EMAILS);
    ranked
}

fn extract_phone(text: &str) -> Option<String> {
    PHONE_RES
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| m.as_str().trim().to_string())
}

fn company_name(parsed: &ParsedPage, domain: &str) -> String {
    if let Some(name) = &parsed.og_site_name {
        return name.clone();
    }
    if let Some(title) = &parsed.title {
        if title.chars().count() < 80 {
            if let Some(first) = title.split(['-', '–', '—']).next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    if let Some(h1) = &parsed.first_h1 {
        if h1.chars().count() <= 80 {
            return h1.clone();
        }
    }
    domain.to_string()
}

fn description(parsed: &ParsedPage) -> Option<String> {
    parsed
        .meta_description
        .clone()
        .or_else(|| parsed.og_description.clone())
        .map(|d| truncate_chars(&d, MAX_DESCRIPTION_CHARS))
}

/// Retrieves one site and turns it into a scored candidate lead.
pub(crate) struct SiteFetcher {
    client: Client,
    cache: Arc<ScraperCache>,
    validator: Arc<EmailValidator>,
    config: Arc<Config>,
}

impl SiteFetcher {
    pub(crate) fn new(
        config: Arc<Config>,
        cache: Arc<ScraperCache>,
        validator: Arc<EmailValidator>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(redirect::Policy::limited(5))
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            cache,
            validator,
            config,
        })
    }

    /// Scrapes one candidate URL into a [`Lead`].
    ///
    /// Returns `Ok(None)` when the domain is noise or already globally
    /// visited; network and parse failures surface as `Err`.
    pub(crate) async fn scrape(
        &self,
        url: &str,
        analyzer: &Arc<dyn Analyzer>,
        opts: ScrapeOptions,
    ) -> Result<Option<Lead>> {
        let base = normalize_url(url)?;
        let domain = normalize_domain(url)?;

        if is_noise_domain(&domain) {
            tracing::debug!(target: "scrape_task", "Skipping noise domain {}", domain);
            return Ok(None);
        }
        if !self.cache.mark_visited(&domain) {
            tracing::debug!(target: "scrape_task", "Skipping already-visited domain {}", domain);
            return Ok(None);
        }

        tracing::debug!(target: "scrape_task", "Fetching homepage {}", base);
        let response = self
            .client
            .get(base.clone())
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() && !status.is_redirection() {
            return Err(AppError::Fetch(format!("HTTP {} for {}", status, url)));
        }
        let homepage_html = response.text().await?;

        let parsed = parse_page(&homepage_html, &base);
        let mut text = parsed.text.clone();
        let mut address = parsed.address.clone();

        for link in &parsed.contact_links {
            tokio::time::sleep(CONTACT_PAGE_DELAY).await;
            tracing::debug!(target: "scrape_task", "Fetching contact page {}", link);
            let contact_response = self
                .client
                .get(link.as_str())
                .timeout(self.config.contact_page_timeout)
                .send()
                .await;
            match contact_response {
                Ok(response) if response.status().is_success() => match response.text().await {
                    Ok(html) => {
                        let contact_parsed = parse_page(&html, &base);
                        text.push(' ');
                        text.push_str(&contact_parsed.text);
                        if address.is_none() {
                            address = contact_parsed.address;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(target: "scrape_task", "Contact page body failed {}: {}", link, e);
                    }
                },
                Ok(response) => {
                    tracing::debug!(target: "scrape_task",
                        "Contact page {} returned {}", link, response.status());
                }
                Err(e) => {
                    tracing::debug!(target: "scrape_task", "Contact page fetch failed {}: {}", link, e);
                }
            }
        }

        let extra = analyzer.fetch_extra(&base, &self.client).await;
        if !extra.text.is_empty() {
            text.push(' ');
            text.push_str(&extra.text);
        }

        let emails = extract_emails(&text, &domain);
        let phone = extract_phone(&text);
        let name = company_name(&parsed, &domain);
        let description = description(&parsed);

        let analysis = analyzer.analyze(&AnalyzerInput {
            text: &text,
            url,
            domain: &domain,
            extra: &extra,
            emails: &emails,
        });

        let (email_valid, email_score, email_reason) = match emails.first() {
            Some(primary) if opts.email_validation => {
                let validation = self
                    .validator
                    .validate(primary, opts.deep_validation)
                    .await;
                (validation.valid, validation.score, validation.reason)
            }
            Some(_) => (false, 0, "validation_disabled".to_string()),
            None => (false, 0, "no_email_found".to_string()),
        };

        tracing::info!(target: "scrape_task",
            "Scraped {} (score {}, {} emails)", domain, analysis.score, emails.len());

        Ok(Some(Lead {
            company_name: name,
            website: url.to_string(),
            domain,
            email: emails.first().cloned(),
            all_emails: emails,
            phone,
            address,
            description,
            score: analysis.score,
            analysis_data: analysis.data,
            email_valid,
            email_validation_score: email_score,
            email_validation_reason: email_reason,
            found_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_ranking_prefers_domain_roles() {
        let text = "reach us at sales@acme.nl or jan@acme.nl, \
                    previously partner@other.com and info@acme.nl";
        let emails = extract_emails(text, "acme.nl");
        assert_eq!(
            emails,
            vec![
                "sales@acme.nl".to_string(),
                "info@acme.nl".to_string(),
                "jan@acme.nl".to_string(),
                "partner@other.com".to_string(),
            ]
        );
    }

    #[test]
    fn email_filters_reject_junk() {
        let text = "logo@2x.png support@sentry.io a@b..com \
                    someone.with.an.unreasonably.long.local.part.over.forty@acme.nl \
                    info@acme.nl";
        let emails = extract_emails(text, "acme.nl");
        assert_eq!(emails, vec!["info@acme.nl".to_string()]);
    }

    #[test]
    fn email_list_is_capped_at_five() {
        let text = "a@acme.nl b@acme.nl c@acme.nl d@acme.nl e@acme.nl f@acme.nl";
        assert_eq!(extract_emails(text, "acme.nl").len(), 5);
    }

    #[test]
    fn contact_link_patterns() {
        for path in [
            "https://acme.nl/contact",
            "https://acme.nl/contact/",
            "https://acme.nl/over-ons",
            "https://acme.nl/kontakt",
            "https://acme.nl/about",
        ] {
            assert!(
                CONTACT_LINK_RE.is_match(path.trim_end_matches('/')),
                "{} should match",
                path
            );
        }
        assert!(!CONTACT_LINK_RE.is_match("https://acme.nl/products"));
        assert!(!CONTACT_LINK_RE.is_match("https://acme.nl/contact/form/submit"));
    }

    #[test]
    fn parse_page_extracts_fields() {
        let html = r#"<html><head>
            <title>Acme BV - Groothandel in techniek</title>
            <meta name="description" content="Acme levert technische onderdelen.">
            <meta property="og:site_name" content="Acme BV">
            </head><body>
            <h1>Welkom bij Acme</h1>
            <p>Bel ons op +31 20 1234567 of mail info@acme.nl</p>
            <div class="address">Dorpsstraat 1, 1234 AB Amsterdam</div>
            <a href="/contact">Contact</a>
            <a href="/products">Producten</a>
            <a href="https://facebook.com/acme">Facebook</a>
            </body></html>"#;
        let base = Url::parse("https://acme.nl/").unwrap();
        let parsed = parse_page(html, &base);

        assert_eq!(parsed.og_site_name.as_deref(), Some("Acme BV"));
        assert_eq!(
            parsed.meta_description.as_deref(),
            Some("Acme levert technische onderdelen.")
        );
        assert_eq!(parsed.first_h1.as_deref(), Some("Welkom bij Acme"));
        assert_eq!(parsed.contact_links, vec!["https://acme.nl/contact".to_string()]);
        assert_eq!(
            parsed.address.as_deref(),
            Some("Dorpsstraat 1, 1234 AB Amsterdam")
        );
        assert!(parsed.text.contains("Welkom bij Acme"));
    }

    #[test]
    fn company_name_precedence() {
        let base = Url::parse("https://acme.nl/").unwrap();

        let with_og = parse_page(
            r#"<html><head><title>T - X</title><meta property="og:site_name" content="OG Name"></head><body></body></html>"#,
            &base,
        );
        assert_eq!(company_name(&with_og, "acme.nl"), "OG Name");

        let with_title = parse_page(
            "<html><head><title>Acme BV - Groothandel</title></head><body></body></html>",
            &base,
        );
        assert_eq!(company_name(&with_title, "acme.nl"), "Acme BV");

        let long_title = format!(
            "<html><head><title>{}</title></head><body><h1>Acme</h1></body></html>",
            "x".repeat(90)
        );
        let with_h1 = parse_page(&long_title, &base);
        assert_eq!(company_name(&with_h1, "acme.nl"), "Acme");

        let bare = parse_page("<html><body></body></html>", &base);
        assert_eq!(company_name(&bare, "acme.nl"), "acme.nl");
    }

    #[test]
    fn description_is_trimmed_to_300() {
        let base = Url::parse("https://acme.nl/").unwrap();
        let html = format!(
            r#"<html><head><meta name="description" content="{}"></head><body></body></html>"#,
            "word ".repeat(100)
        );
        let parsed = parse_page(&html, &base);
        let desc = description(&parsed).unwrap();
        assert!(desc.chars().count() <= 300);
    }

    #[test]
    fn phone_extraction() {
        assert_eq!(
            extract_phone("Bel +31 20 1234567 vandaag").as_deref(),
            Some("+31 20 1234567")
        );
        assert!(extract_phone("call +49 30 123456 now").is_some());
        assert!(extract_phone("geen nummer hier").is_none());
    }

    #[test]
    fn same_domain_links_filters_and_dedupes() {
        let html = r#"<html><body>
            <a href="/jobs">Jobs</a>
            <a href="/jobs">Jobs again</a>
            <a href="https://acme.nl/vacatures?page=2#top">Vacatures</a>
            <a href="https://elsewhere.com/jobs">External</a>
            <a href="mailto:info@acme.nl">Mail</a>
            </body></html>"#;
        let base = Url::parse("https://www.acme.nl/").unwrap();
        let links = same_domain_links(html, &base);
        assert_eq!(
            links,
            vec![
                "https://www.acme.nl/jobs".to_string(),
                "https://acme.nl/vacatures".to_string(),
            ]
        );
    }
}
