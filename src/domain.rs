//! Utility functions for handling domain names, URLs and the noise lists.

use crate::error::{AppError, Result};
use url::Url;

/// TLDs accepted by the result filter. Everything else is dropped before
/// the fetch pipeline ever sees it.
const ALLOWED_TLDS: &[&str] = &[
    ".nl", ".be", ".de", ".com", ".eu", ".net", ".org", ".biz", ".info",
];

/// Well-known social, marketplace, job-board, CDN and dev-platform hosts
/// that never yield a usable company lead. Matched exactly or as a suffix
/// after a dot (so `nl.linkedin.com` is noise via `linkedin.com`).
pub(crate) const NOISE_DOMAINS: &[&str] = &[
    // social
    "facebook.com",
    "instagram.com",
    "linkedin.com",
    "twitter.com",
    "x.com",
    "youtube.com",
    "tiktok.com",
    "pinterest.com",
    "reddit.com",
    "snapchat.com",
    "vimeo.com",
    "tumblr.com",
    // marketplaces & big commerce
    "marktplaats.nl",
    "bol.com",
    "amazon.com",
    "amazon.nl",
    "amazon.de",
    "ebay.com",
    "ebay.nl",
    "zalando.nl",
    "aliexpress.com",
    "etsy.com",
    "booking.com",
    "tripadvisor.com",
    "thuisbezorgd.nl",
    // job boards
    "indeed.com",
    "indeed.nl",
    "glassdoor.com",
    "glassdoor.nl",
    "monsterboard.nl",
    "nationalevacaturebank.nl",
    "werkzoeken.nl",
    "jobbird.com",
    "stepstone.de",
    "stepstone.nl",
    // directories & reviews
    "kvk.nl",
    "goudengids.nl",
    "telefoonboek.nl",
    "openingstijden.nl",
    "trustpilot.com",
    "yelp.com",
    "yellowpages.com",
    "drimble.nl",
    // reference & media
    "wikipedia.org",
    "wikimedia.org",
    "google.com",
    "archive.org",
    "medium.com",
    "blogspot.com",
    "wordpress.com",
    // dev platforms & site builders
    "github.com",
    "gitlab.com",
    "stackoverflow.com",
    "wix.com",
    "wixsite.com",
    "squarespace.com",
    "shopify.com",
    "weebly.com",
    "jimdo.com",
    // CDN / infra
    "cloudflare.com",
    "akamai.com",
    "jsdelivr.net",
    "unpkg.com",
    "googleapis.com",
    "gstatic.com",
    "googleusercontent.com",
    "windows.net",
];

/// Hosts belonging to the search engine itself; links back into the engine
/// are either redirect wrappers (`uddg=`) or navigation chrome.
pub(crate) const SEARCH_ENGINE_HOSTS: &[&str] = &["duckduckgo.com", "duck.com"];

/// Extracts the normalized domain (e.g. "example.com") from a URL string
/// or bare hostname. Handles missing schemes, "www." prefixes and ports.
///
/// Normalization is idempotent: feeding the output back in returns the
/// same domain.
pub(crate) fn normalize_domain(input: &str) -> Result<String> {
    if input.trim().is_empty() {
        return Err(AppError::DomainExtraction(
            "Input URL string is empty".to_string(),
        ));
    }

    let with_scheme = if !input.starts_with("http://") && !input.starts_with("https://") {
        format!("https://{}", input.trim())
    } else {
        input.trim().to_string()
    };

    let url = Url::parse(&with_scheme)?;
    let host = url.host_str().ok_or_else(|| {
        AppError::DomainExtraction(format!("Could not extract host from '{}'", input))
    })?;

    let host = host.to_lowercase();
    let domain = host.strip_prefix("www.").unwrap_or(&host);
    Ok(domain.to_string())
}

/// Parses a website string into a `Url`, adding a scheme if necessary.
pub(crate) fn normalize_url(input: &str) -> Result<Url> {
    if input.trim().is_empty() {
        return Err(AppError::DomainExtraction("Website URL is empty".to_string()));
    }
    let with_scheme = if !input.starts_with("http://") && !input.starts_with("https://") {
        format!("https://{}", input.trim())
    } else {
        input.trim().to_string()
    };
    Ok(Url::parse(&with_scheme)?)
}

/// True when the domain carries one of the accepted TLDs.
pub(crate) fn has_allowed_tld(domain: &str) -> bool {
    ALLOWED_TLDS.iter().any(|tld| domain.ends_with(tld))
}

/// Exact-or-suffix match of `domain` against a host list.
fn matches_host_list(domain: &str, list: &[&str]) -> bool {
    list.iter()
        .any(|noise| domain == *noise || domain.ends_with(&format!(".{}", noise)))
}

/// True when the domain is on the hard-coded noise list.
pub(crate) fn is_noise_domain(domain: &str) -> bool {
    matches_host_list(domain, NOISE_DOMAINS)
}

/// True when the host belongs to the search engine itself.
pub(crate) fn is_search_engine_host(host: &str) -> bool {
    matches_host_list(host, SEARCH_ENGINE_HOSTS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain_simple() {
        assert_eq!(
            normalize_domain("https://www.example.com").unwrap(),
            "example.com"
        );
        assert_eq!(normalize_domain("http://example.com").unwrap(), "example.com");
        assert_eq!(normalize_domain("example.com").unwrap(), "example.com");
    }

    #[test]
    fn test_normalize_domain_edge_cases() {
        assert_eq!(normalize_domain("www.example.com").unwrap(), "example.com");
        assert_eq!(
            normalize_domain("https://EXAMPLE.com/path?query=1").unwrap(),
            "example.com"
        );
        assert_eq!(
            normalize_domain("http://example.com:8080").unwrap(),
            "example.com"
        );
        assert_eq!(
            normalize_domain("https://sub.domain.example.co.uk").unwrap(),
            "sub.domain.example.co.uk"
        );
    }

    #[test]
    fn test_normalize_domain_idempotent() {
        let once = normalize_domain("https://www.Voorbeeld.NL/contact").unwrap();
        let twice = normalize_domain(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, "voorbeeld.nl");
    }

    #[test]
    fn test_normalize_domain_invalid() {
        assert!(normalize_domain("").is_err());
        assert!(normalize_domain("http://").is_err());
    }

    #[test]
    fn test_allowed_tlds() {
        assert!(has_allowed_tld("example.nl"));
        assert!(has_allowed_tld("example.com"));
        assert!(has_allowed_tld("example.info"));
        assert!(!has_allowed_tld("example.fr"));
        assert!(!has_allowed_tld("example.co.uk"));
    }

    #[test]
    fn test_noise_matching_exact_and_suffix() {
        assert!(is_noise_domain("facebook.com"));
        assert!(is_noise_domain("nl-nl.facebook.com"));
        assert!(is_noise_domain("shop.bol.com"));
        assert!(!is_noise_domain("notfacebook.com"));
        assert!(!is_noise_domain("mycompany.nl"));
    }

    #[test]
    fn test_search_engine_hosts() {
        assert!(is_search_engine_host("duckduckgo.com"));
        assert!(is_search_engine_host("html.duckduckgo.com"));
        assert!(!is_search_engine_host("example.com"));
    }
}
