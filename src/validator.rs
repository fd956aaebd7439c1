//! Tiered email validation: syntax, disposable/service filters, MX lookup
//! and an optional SMTP mailbox probe.
//!
//! The validator never returns an error; every internal failure maps to a
//! `reason` string on the result. Scores are monotone in check depth:
//! syntax failure < missing MX < DNS failure < MX verified < SMTP verified.

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::ToSocketAddrs;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use trust_dns_resolver::TokioAsyncResolver;

use crate::cache::ScraperCache;
use crate::config::Config;
use crate::dns::{create_resolver, resolve_mx};
use crate::error::Result;
use crate::models::EmailValidation;

const SCORE_NO_MX: u8 = 10;
const SCORE_REJECTED: u8 = 15;
const SCORE_DNS_FAILED: u8 = 20;
const SCORE_MX_GENERIC: u8 = 70;
const SCORE_SMTP_GENERIC: u8 = 75;
const SCORE_MX: u8 = 85;
const SCORE_SMTP: u8 = 95;

static EMAIL_SYNTAX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
        .expect("email syntax regex must compile")
});

static GENERIC_LOCAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(info|contact|admin|support|hello|sales|noreply|no-reply|mail|office|service|help|billing|accounts?)$")
        .expect("generic local-part regex must compile")
});

/// Throwaway providers that never belong to a real company mailbox.
const DISPOSABLE_DOMAINS: &[&str] = &[
    "mailinator.com",
    "10minutemail.com",
    "guerrillamail.com",
    "guerrillamail.org",
    "sharklasers.com",
    "tempmail.com",
    "temp-mail.org",
    "throwawaymail.com",
    "yopmail.com",
    "maildrop.cc",
    "getnada.com",
    "dispostable.com",
    "trashmail.com",
    "trashmail.de",
    "mailnesia.com",
    "mintemail.com",
    "mohmal.com",
    "spamgourmet.com",
    "mytemp.email",
    "fakeinbox.com",
    "tempinbox.com",
    "burnermail.io",
    "spambog.com",
    "emailondeck.com",
    "mail-temporaire.fr",
];

/// Infrastructure and tooling hosts that show up in scraped markup but are
/// never a company contact address.
const SERVICE_HOST_PATTERNS: &[&str] = &[
    "sentry",
    "amazonaws",
    "cloudflare",
    "cloudfront",
    "google-analytics",
    "googletagmanager",
    "doubleclick",
    "wixpress",
    "sendgrid",
    "mailgun",
    "mailchimp",
    "hubspot",
    "zendesk",
    "intercom",
    "godaddy",
    "akamai",
    "fastly",
    "azurewebsites",
    "herokuapp",
];

/// True when the address lives on a service/infra host rather than a
/// company domain. Shared with the site fetcher's email filter.
pub(crate) fn is_service_address(email: &str) -> bool {
    match email.rsplit_once('@') {
        Some((_, host)) => {
            let host = host.to_lowercase();
            SERVICE_HOST_PATTERNS.iter().any(|p| host.contains(p))
        }
        None => false,
    }
}

/// True when the local part is a role name (info, sales, ...).
pub(crate) fn is_generic_local(email: &str) -> bool {
    email
        .split('@')
        .next()
        .map(|local| GENERIC_LOCAL_RE.is_match(&local.to_lowercase()))
        .unwrap_or(false)
}

fn is_disposable_domain(domain: &str) -> bool {
    DISPOSABLE_DOMAINS
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{}", d)))
}

/// Outcome of the RCPT TO state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmtpProbe {
    Exists,
    Rejected,
    Inconclusive,
}

/// Staged, short-circuiting email validator.
pub(crate) struct EmailValidator {
    resolver: TokioAsyncResolver,
    cache: Arc<ScraperCache>,
    config: Arc<Config>,
}

impl EmailValidator {
    pub(crate) fn new(config: Arc<Config>, cache: Arc<ScraperCache>) -> Result<Self> {
        let resolver = create_resolver(&config)?;
        Ok(Self {
            resolver,
            cache,
            config,
        })
    }

    /// MX exchanges for `domain`, most preferred first, via the shared
    /// TTL cache. Only successful lookups (including "no records") are
    /// cached; failures stay uncached so they can recover.
    async fn mx_exchanges(&self, domain: &str) -> Result<Option<Vec<String>>> {
        let cache_key = format!("mx:{}", domain);
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(exchanges) = serde_json::from_value::<Vec<String>>(cached) {
                return Ok(Some(exchanges));
            }
        }

        let lookup =
            tokio::time::timeout(self.config.dns_timeout, resolve_mx(&self.resolver, domain))
                .await;
        match lookup {
            Ok(Ok(servers)) => {
                let exchanges: Vec<String> =
                    servers.into_iter().map(|s| s.exchange).collect();
                if let Ok(value) = serde_json::to_value(&exchanges) {
                    self.cache.set(&cache_key, value, None);
                }
                Ok(Some(exchanges))
            }
            Ok(Err(e)) => {
                tracing::debug!(target: "smtp_task", "DNS lookup failed for {}: {}", domain, e);
                Err(e)
            }
            Err(_) => {
                tracing::debug!(target: "smtp_task", "DNS lookup timed out for {}", domain);
                Ok(None)
            }
        }
    }

    /// Validates `email`. With `deep` set, an SMTP RCPT probe follows the
    /// MX lookup; otherwise the MX result is final.
    pub(crate) async fn validate(&self, email: &str, deep: bool) -> EmailValidation {
        let email = email.trim().to_lowercase();

        if !EMAIL_SYNTAX_RE.is_match(&email) {
            return EmailValidation::new(false, 0, "invalid_format");
        }

        let domain = email
            .rsplit_once('@')
            .map(|(_, d)| d.to_string())
            .unwrap_or_default();

        if is_disposable_domain(&domain) {
            return EmailValidation::new(false, 0, "disposable_domain");
        }

        if is_service_address(&email) {
            return EmailValidation::new(false, 0, "service_domain");
        }

        let generic = is_generic_local(&email);

        let exchanges = match self.mx_exchanges(&domain).await {
            Ok(Some(exchanges)) => exchanges,
            Ok(None) | Err(_) => {
                return EmailValidation::new(false, SCORE_DNS_FAILED, "dns_lookup_failed");
            }
        };

        if exchanges.is_empty() {
            return EmailValidation::new(false, SCORE_NO_MX, "no_mx_records");
        }

        let base_score = if generic { SCORE_MX_GENERIC } else { SCORE_MX };
        let base_reason = if generic { "generic_address" } else { "mx_verified" };

        if !deep {
            return EmailValidation::new(true, base_score, base_reason);
        }

        // exchanges are sorted by preference; the first is the primary MX
        let mail_server = exchanges[0].clone();
        match self.smtp_probe(&email, &mail_server).await {
            SmtpProbe::Exists => {
                let score = if generic { SCORE_SMTP_GENERIC } else { SCORE_SMTP };
                EmailValidation::new(true, score, "smtp_verified")
            }
            SmtpProbe::Rejected => EmailValidation::new(false, SCORE_REJECTED, "smtp_rejected"),
            SmtpProbe::Inconclusive => EmailValidation::new(true, base_score, "smtp_inconclusive"),
        }
    }

    async fn smtp_probe(&self, email: &str, mail_server: &str) -> SmtpProbe {
        let email = email.to_string();
        let server = mail_server.to_string();
        let sender = self.config.smtp_sender_email.clone();
        let budget = self.config.smtp_timeout;

        let handle = tokio::task::spawn_blocking(move || {
            smtp_probe_blocking(&email, &server, &sender, budget)
        });

        match tokio::time::timeout(budget + Duration::from_secs(1), handle).await {
            Ok(Ok(probe)) => probe,
            Ok(Err(e)) => {
                tracing::warn!(target: "smtp_task", "SMTP probe task failed: {}", e);
                SmtpProbe::Inconclusive
            }
            Err(_) => {
                tracing::debug!(target: "smtp_task", "SMTP probe timed out for {}", mail_server);
                SmtpProbe::Inconclusive
            }
        }
    }
}

/// Drives the SMTP handshake on port 25: greeting, EHLO, MAIL FROM,
/// RCPT TO. 250/251 on RCPT means the mailbox exists; 550/551/553 means
/// it does not; everything else is inconclusive.
fn smtp_probe_blocking(
    email: &str,
    mail_server: &str,
    sender: &str,
    timeout: Duration,
) -> SmtpProbe {
    use lettre::transport::smtp::client::SmtpConnection;
    use lettre::transport::smtp::commands::{Ehlo, Mail, Rcpt};
    use lettre::transport::smtp::extension::ClientId;
    use lettre::Address;

    let recipient = match Address::from_str(email) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::debug!(target: "smtp_task", "Invalid recipient format '{}': {}", email, e);
            return SmtpProbe::Inconclusive;
        }
    };
    let sender_address = match Address::from_str(sender) {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(target: "smtp_task", "Invalid sender email in config: {}", e);
            return SmtpProbe::Inconclusive;
        }
    };

    let socket_addr = match (mail_server, 25_u16)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
    {
        Some(addr) => addr,
        None => {
            tracing::debug!(target: "smtp_task", "Could not resolve mail server address: {}", mail_server);
            return SmtpProbe::Inconclusive;
        }
    };

    let helo_name = ClientId::Domain("localhost".to_string());

    let mut conn = match SmtpConnection::connect(socket_addr, Some(timeout), &helo_name, None, None)
    {
        Ok(conn) => conn,
        Err(e) => {
            tracing::debug!(target: "smtp_task", "SMTP connection failed for {}: {}", mail_server, e);
            return SmtpProbe::Inconclusive;
        }
    };

    if let Err(e) = conn.command(Ehlo::new(helo_name.clone())) {
        tracing::debug!(target: "smtp_task", "EHLO failed on {}: {}", mail_server, e);
        return SmtpProbe::Inconclusive;
    }

    match conn.command(Mail::new(Some(sender_address), vec![])) {
        Ok(response) if response.is_positive() => {}
        Ok(response) => {
            tracing::debug!(target: "smtp_task",
                "MAIL FROM rejected by {}: {}", mail_server, response.code());
            conn.quit().ok();
            return SmtpProbe::Inconclusive;
        }
        Err(e) => {
            tracing::debug!(target: "smtp_task", "MAIL FROM failed on {}: {}", mail_server, e);
            conn.quit().ok();
            return SmtpProbe::Inconclusive;
        }
    }

    let probe = match conn.command(Rcpt::new(recipient, vec![])) {
        Ok(response) => match u16::from(response.code()) {
            250 | 251 => SmtpProbe::Exists,
            550 | 551 | 553 => SmtpProbe::Rejected,
            code => {
                tracing::debug!(target: "smtp_task",
                    "RCPT TO inconclusive on {} (code {})", mail_server, code);
                SmtpProbe::Inconclusive
            }
        },
        // some servers slam the door instead of answering; lettre surfaces
        // the 5xx as an error string
        Err(e) => {
            let err_string = e.to_string();
            if err_string.contains("550") || err_string.contains("551") || err_string.contains("553")
            {
                SmtpProbe::Rejected
            } else {
                tracing::debug!(target: "smtp_task", "RCPT TO error on {}: {}", mail_server, e);
                SmtpProbe::Inconclusive
            }
        }
    };

    conn.quit().ok();
    probe
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> EmailValidator {
        EmailValidator::new(
            Arc::new(Config::default_config()),
            Arc::new(ScraperCache::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn bad_syntax_fails_fast() {
        let v = validator();
        let result = v.validate("not-an-email", false).await;
        assert_eq!(result, EmailValidation::new(false, 0, "invalid_format"));

        let result = v.validate("user@nodot", false).await;
        assert_eq!(result.reason, "invalid_format");
    }

    #[tokio::test]
    async fn disposable_domain_is_rejected() {
        let v = validator();
        let result = v.validate("x@mailinator.com", false).await;
        assert_eq!(result, EmailValidation::new(false, 0, "disposable_domain"));
    }

    #[tokio::test]
    async fn service_host_is_rejected() {
        let v = validator();
        let result = v.validate("abc123@o123.ingest.sentry.io", false).await;
        assert_eq!(result, EmailValidation::new(false, 0, "service_domain"));
    }

    #[test]
    fn generic_local_parts() {
        assert!(is_generic_local("info@acme.nl"));
        assert!(is_generic_local("no-reply@acme.nl"));
        assert!(is_generic_local("accounts@acme.nl"));
        assert!(is_generic_local("account@acme.nl"));
        assert!(!is_generic_local("jan.jansen@acme.nl"));
        assert!(!is_generic_local("information@acme.nl"));
    }

    #[test]
    fn service_address_matching() {
        assert!(is_service_address("bounce@mail.sendgrid.net"));
        assert!(is_service_address("noc@cloudflare.com"));
        assert!(!is_service_address("info@acme.nl"));
    }

    #[test]
    fn score_ladder_is_monotone() {
        // regex-fail < no-MX < dns-fail < MX-only < SMTP-verified
        assert!(0 < SCORE_NO_MX);
        assert!(SCORE_NO_MX < SCORE_DNS_FAILED);
        assert!(SCORE_DNS_FAILED < SCORE_MX_GENERIC);
        assert!(SCORE_MX_GENERIC < SCORE_MX);
        assert!(SCORE_MX_GENERIC < SCORE_SMTP_GENERIC);
        assert!(SCORE_MX < SCORE_SMTP);
    }
}
